use std::env;
use std::process;

use color_eyre::eyre::{eyre, Result};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use emulator::console::Terminal;
use emulator::program::Program;
use emulator::vm::Vm;

fn main() -> Result<()> {
  color_eyre::install()?;

  let args: Vec<String> = env::args().collect();
  let trace = args.iter().any(|arg| arg == "--trace");
  let path = args
    .iter()
    .skip(1)
    .find(|arg| !arg.starts_with("--"))
    .ok_or_else(|| eyre!("usage: {} <program.ls8> [--trace]", args[0]))?;

  let level = if trace {
    LevelFilter::Trace
  } else {
    LevelFilter::Info
  };
  SimpleLogger::new().with_level(level).init()?;

  let program = Program::from_file(path)?;
  info!("loaded {} bytes from {path}", program.bytes().len());

  let mut vm = Vm::new();
  vm.load_program(program.bytes())?;

  if let Err(fault) = vm.run(&mut Terminal) {
    eprintln!("fatal: {fault}");
    process::exit(1);
  }
  Ok(())
}
