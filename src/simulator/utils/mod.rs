pub mod image;
pub mod log;
pub mod report;
