//! An emulator for the LS-8 microcomputer: an 8-bit register machine with a
//! single 256-byte address space, eight general-purpose registers, a flags
//! byte, and a stack descending from the top of memory.
//!
//! Programs arrive either as raw bytes or as a line-oriented text file of
//! binary literals (see [`program`]). Printed output goes through the
//! [`console::Console`] sink so hosts and tests can capture it.

pub mod alu;
pub mod console;
pub mod opcode;
pub mod program;
pub mod vm;
