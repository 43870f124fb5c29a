//! Loader for the line-oriented program format.
//!
//! One instruction byte per line, written as a binary literal. A `#` starts
//! a comment that runs to the end of the line; blank lines are skipped. The
//! resulting bytes land in machine memory starting at address 0.

use std::fs;
use std::path::Path;

/// A parse failure, with the 1-based source line it occurred on.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
  #[error("line {line}: invalid binary literal `{literal}`")]
  InvalidLiteral { line: usize, literal: String },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// A program image ready to be copied into machine memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
  bytes: Vec<u8>,
}

impl Program {
  /// Parses program text, one binary literal per line.
  pub fn from_source(source: &str) -> Result<Self, ParseError> {
    let mut bytes = Vec::new();
    for (index, raw) in source.lines().enumerate() {
      let literal = raw.split('#').next().unwrap_or("").trim();
      if literal.is_empty() {
        continue;
      }
      let byte = u8::from_str_radix(literal, 2).map_err(|_| ParseError::InvalidLiteral {
        line: index + 1,
        literal: literal.to_owned(),
      })?;
      bytes.push(byte);
    }
    Ok(Self { bytes })
  }

  /// Reads and parses a program file.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
    Self::from_source(&fs::read_to_string(path)?)
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl From<Vec<u8>> for Program {
  fn from(bytes: Vec<u8>) -> Self {
    Self { bytes }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_literals_comments_and_blanks() {
    let source = "\
# Print the number 8 and halt.

10000010 # LDI R0,8
00000000
00001000
01000111 # PRN R0
00000000
00000001 # HLT
";
    let program = Program::from_source(source).unwrap();
    assert_eq!(
      program.bytes(),
      &[0b1000_0010, 0, 8, 0b0100_0111, 0, 0b0000_0001]
    );
  }

  #[test]
  fn comment_only_and_empty_sources() {
    assert_eq!(Program::from_source("").unwrap().bytes(), &[] as &[u8]);
    let program = Program::from_source("# nothing here\n   \n").unwrap();
    assert_eq!(program.bytes(), &[] as &[u8]);
  }

  #[test]
  fn reports_the_failing_line() {
    let err = Program::from_source("00000001\n2000000\n").unwrap_err();
    match err {
      ParseError::InvalidLiteral { line, literal } => {
        assert_eq!(line, 2);
        assert_eq!(literal, "2000000");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn rejects_literals_wider_than_a_byte() {
    assert!(Program::from_source("111111111\n").is_err());
  }

  #[test]
  fn from_raw_bytes() {
    let program: Program = vec![0b0000_0001].into();
    assert_eq!(program.bytes(), &[1]);
  }
}
