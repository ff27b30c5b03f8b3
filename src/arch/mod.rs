pub mod tpu;
