use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
  Step(u32), // Step N cycles
  Continue,
  Print,
  Quit,
}

const USAGE: &str = "Use Enter to step, 'si 100' to step N cycles, 'c' to continue, 'p' to print state, 'q' to quit";

/// Parse one line of shell input. Empty input steps a single cycle.
pub fn parse_command(line: &str) -> std::result::Result<ShellCommand, String> {
  let trimmed = line.trim();
  if trimmed.is_empty() {
    return Ok(ShellCommand::Step(1));
  }

  if let Some(rest) = trimmed.strip_prefix("si") {
    let num_str = rest.trim();
    if num_str.is_empty() {
      return Err("'si' requires a number, e.g., 'si 100'".to_string());
    }
    return match num_str.parse::<u32>() {
      Ok(n) if n > 0 => Ok(ShellCommand::Step(n)),
      Ok(_) => Err("step count must be greater than 0".to_string()),
      Err(e) => Err(format!("invalid number '{}': {}", num_str, e)),
    };
  }

  match trimmed {
    "c" => Ok(ShellCommand::Continue),
    "p" => Ok(ShellCommand::Print),
    "q" => Ok(ShellCommand::Quit),
    _ => Err(format!("Unknown command: '{}'. {}", trimmed, USAGE)),
  }
}

/// Line-editing prompt for step mode
pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    let editor = DefaultEditor::new().map_err(io::Error::other)?;
    Ok(Self { editor })
  }

  /// Block until a valid command is entered. Ctrl-C and Ctrl-D quit.
  pub fn read_command(&mut self) -> Result<ShellCommand> {
    loop {
      match self.editor.readline("(tpusim) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(command) => return Ok(command),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(ShellCommand::Quit),
        Err(err) => return Err(io::Error::other(err)),
      }
    }
  }
}
