use log::{debug, trace};

use crate::alu::{self, Flags};
use crate::console::Console;
use crate::opcode::Opcode;

/// Number of cells in the machine's single address space.
pub const MEMORY_SIZE: usize = 256;

/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 8;

/// Register conventionally holding the interrupt mask.
pub const IM: usize = 5;

/// Register conventionally holding pending interrupt bits.
pub const IS: usize = 6;

/// Initial stack pointer; the stack descends from here toward the program.
pub const STACK_BASE: u8 = 0xF4;

/// First interrupt-vector cell; vectors for interrupts 0-7 live at
/// 0xF8-0xFF.
pub const VECTOR_TABLE: u8 = 0xF8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Running,
  Halted,
}

/// A fatal condition. Every variant terminates the run; the machine has no
/// partial-failure mode.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Fault {
  #[error("unknown instruction 0b{opcode:08b} at address {pc}")]
  UnknownOpcode { opcode: u8, pc: u8 },

  #[error("address {address} out of range")]
  OutOfBoundsAccess { address: usize },

  #[error("stack overflow at address {pc}")]
  StackOverflow { pc: u8 },

  #[error("stack is empty")]
  StackUnderflow,

  #[error("division by zero")]
  DivisionByZero,

  #[error("modulo by zero")]
  ModuloByZero,
}

/// The machine's address space: 256 byte cells, zero until the loader
/// overwrites them.
#[derive(Debug)]
struct Memory {
  cells: [u8; MEMORY_SIZE],
}

impl Memory {
  fn new() -> Self {
    Self {
      cells: [0; MEMORY_SIZE],
    }
  }

  fn read(&self, address: usize) -> Result<u8, Fault> {
    self
      .cells
      .get(address)
      .copied()
      .ok_or(Fault::OutOfBoundsAccess { address })
  }

  fn write(&mut self, address: usize, value: u8) -> Result<(), Fault> {
    match self.cells.get_mut(address) {
      Some(cell) => {
        *cell = value;
        Ok(())
      }
      None => Err(Fault::OutOfBoundsAccess { address }),
    }
  }
}

/// The LS-8 processor: memory, register file, flags, and the
/// fetch-decode-execute loop. Handlers receive the whole machine by
/// exclusive reference; nothing is shared or global.
#[derive(Debug)]
pub struct Vm {
  pc: u8,
  sp: u8,
  registers: [u8; REGISTER_COUNT],
  flags: Flags,
  memory: Memory,
  state: State,
  interrupts_enabled: bool,
}

impl Vm {
  /// Creates a machine with zeroed memory and registers, ready to load.
  pub fn new() -> Self {
    Self {
      pc: 0,
      sp: STACK_BASE,
      registers: [0; REGISTER_COUNT],
      flags: Flags::default(),
      memory: Memory::new(),
      state: State::Running,
      interrupts_enabled: true,
    }
  }

  /// Copies a program image into memory starting at address 0.
  pub fn load_program(&mut self, bytes: &[u8]) -> Result<(), Fault> {
    for (address, &byte) in bytes.iter().enumerate() {
      self.memory.write(address, byte)?;
    }
    Ok(())
  }

  /// Executes instructions until the machine halts or faults.
  pub fn run<C>(&mut self, console: &mut C) -> Result<(), Fault>
  where
    C: Console,
  {
    while self.step(console)? == State::Running {}
    Ok(())
  }

  /// Executes a single fetch-decode-execute cycle, unless already halted.
  pub fn step<C>(&mut self, console: &mut C) -> Result<State, Fault>
  where
    C: Console,
  {
    if self.state == State::Halted {
      return Ok(State::Halted);
    }
    let mut cycle = Cycle::new(self, console);
    cycle.run()?;
    Ok(self.state)
  }

  pub fn state(&self) -> State {
    self.state
  }

  /// Read-only view of a general-purpose register, for tracing and tests.
  pub fn read_register(&self, index: usize) -> u8 {
    self.registers[index]
  }

  /// Read-only view of a memory cell, for tracing and tests.
  pub fn peek_memory(&self, address: usize) -> Option<u8> {
    self.memory.cells.get(address).copied()
  }

  fn push(&mut self, value: u8) -> Result<(), Fault> {
    // The stack may grow down only to the cell above the current
    // instruction; meeting the program counter is an overflow.
    if self.sp as u16 <= self.pc as u16 + 2 {
      return Err(Fault::StackOverflow { pc: self.pc });
    }
    self.sp -= 1;
    self.memory.write(self.sp as usize, value)
  }

  fn pop(&mut self) -> Result<u8, Fault> {
    if self.sp == STACK_BASE {
      return Err(Fault::StackUnderflow);
    }
    let value = self.memory.read(self.sp as usize)?;
    self.sp += 1;
    Ok(value)
  }

  /// Services the lowest pending unmasked interrupt, if any: pushes the
  /// interrupted state and vectors the program counter.
  fn service_interrupts(&mut self) -> Result<(), Fault> {
    if !self.interrupts_enabled {
      return Ok(());
    }
    let pending = self.registers[IM] & self.registers[IS];
    if pending == 0 {
      return Ok(());
    }
    let n = pending.trailing_zeros() as u8;
    debug!("servicing interrupt {n}");
    self.interrupts_enabled = false;
    self.registers[IS] &= !(1 << n);
    self.push(self.pc)?;
    self.push(self.flags.bits())?;
    for index in 0..=IS {
      self.push(self.registers[index])?;
    }
    self.pc = self.memory.read((VECTOR_TABLE + n) as usize)?;
    Ok(())
  }
}

impl Default for Vm {
  fn default() -> Self {
    Self::new()
  }
}

/// One fetch-decode-execute cycle borrowing the machine and its console.
struct Cycle<'vm, 'console, C> {
  vm: &'vm mut Vm,
  console: &'console mut C,
}

impl<'vm, 'console, C> Cycle<'vm, 'console, C>
where
  C: Console,
{
  fn new(vm: &'vm mut Vm, console: &'console mut C) -> Self {
    Self { vm, console }
  }

  /// Fetches the operand byte `index` places after the opcode. Reading past
  /// the end of memory is a fault, never a wrap.
  #[inline]
  fn operand(&self, index: usize) -> Result<u8, Fault> {
    self.vm.memory.read(self.vm.pc as usize + 1 + index)
  }

  /// Fetches an operand and interprets it as a register index.
  fn register_operand(&self, index: usize) -> Result<usize, Fault> {
    Ok((self.operand(index)? & 0b111) as usize)
  }

  fn run(&mut self) -> Result<(), Fault> {
    self.vm.service_interrupts()?;
    let pc = self.vm.pc;
    let byte = self.vm.memory.read(pc as usize)?;
    let op = Opcode::decode(byte).ok_or(Fault::UnknownOpcode { opcode: byte, pc })?;
    trace!("{pc:>3}: {}", op.mnemonic());
    match op {
      Opcode::Nop => {}
      Opcode::Halt => halt(self),
      Opcode::LoadImmediate => load_immediate(self)?,
      Opcode::Load => load(self)?,
      Opcode::Store => store(self)?,
      Opcode::Push => push_register(self)?,
      Opcode::Pop => pop_register(self)?,
      Opcode::PrintNumber => print_number(self)?,
      Opcode::PrintAscii => print_ascii(self)?,
      Opcode::Add
      | Opcode::Subtract
      | Opcode::Multiply
      | Opcode::Divide
      | Opcode::Modulo
      | Opcode::And
      | Opcode::Or
      | Opcode::Xor
      | Opcode::ShiftLeft
      | Opcode::ShiftRight => binary_alu(self, op)?,
      Opcode::Increment | Opcode::Decrement | Opcode::Not => unary_alu(self, op)?,
      Opcode::Compare => compare(self)?,
      Opcode::Call => call(self)?,
      Opcode::Return => ret(self)?,
      Opcode::Interrupt => interrupt(self)?,
      Opcode::InterruptReturn => interrupt_return(self)?,
      Opcode::Jump => jump(self)?,
      Opcode::JumpIfEqual
      | Opcode::JumpIfNotEqual
      | Opcode::JumpIfGreater
      | Opcode::JumpIfLess
      | Opcode::JumpIfLessOrEqual
      | Opcode::JumpIfGreaterOrEqual => conditional_jump(self, op)?,
    }
    if !op.redirects_pc() {
      self.vm.pc = pc.wrapping_add(op.width());
    }
    Ok(())
  }
}

fn halt<C>(cycle: &mut Cycle<'_, '_, C>)
where
  C: Console,
{
  cycle.vm.state = State::Halted;
}

// r[a] ← vvvvvvvv
fn load_immediate<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let value = cycle.operand(1)?;
  cycle.vm.registers[a] = value;
  Ok(())
}

// r[a] ← m[r[b]]
fn load<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let b = cycle.register_operand(1)?;
  let value = cycle.vm.memory.read(cycle.vm.registers[b] as usize)?;
  cycle.vm.registers[a] = value;
  Ok(())
}

// m[r[a]] ← r[b]
fn store<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let b = cycle.register_operand(1)?;
  let address = cycle.vm.registers[a] as usize;
  cycle.vm.memory.write(address, cycle.vm.registers[b])
}

fn push_register<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  cycle.vm.push(cycle.vm.registers[a])
}

fn pop_register<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let value = cycle.vm.pop()?;
  cycle.vm.registers[a] = value;
  Ok(())
}

fn print_number<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  cycle.console.print_number(cycle.vm.registers[a]);
  Ok(())
}

fn print_ascii<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  cycle.console.print_ascii(cycle.vm.registers[a]);
  Ok(())
}

// r[a] ← r[a] op r[b]
fn binary_alu<C>(cycle: &mut Cycle<'_, '_, C>, op: Opcode) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let b = cycle.register_operand(1)?;
  let (x, y) = (cycle.vm.registers[a], cycle.vm.registers[b]);
  let result = match op {
    Opcode::Add => alu::add(x, y),
    Opcode::Subtract => alu::sub(x, y),
    Opcode::Multiply => alu::mul(x, y),
    Opcode::Divide => alu::div(x, y)?,
    Opcode::Modulo => alu::rem(x, y)?,
    Opcode::And => alu::and(x, y),
    Opcode::Or => alu::or(x, y),
    Opcode::Xor => alu::xor(x, y),
    Opcode::ShiftLeft => alu::shl(x, y),
    Opcode::ShiftRight => alu::shr(x, y),
    _ => unreachable!("not a binary ALU opcode"),
  };
  cycle.vm.registers[a] = result;
  Ok(())
}

// r[a] ← op r[a]
fn unary_alu<C>(cycle: &mut Cycle<'_, '_, C>, op: Opcode) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let x = cycle.vm.registers[a];
  cycle.vm.registers[a] = match op {
    Opcode::Increment => alu::inc(x),
    Opcode::Decrement => alu::dec(x),
    Opcode::Not => alu::not(x),
    _ => unreachable!("not a unary ALU opcode"),
  };
  Ok(())
}

// fl ← cmp(r[a], r[b])
fn compare<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let b = cycle.register_operand(1)?;
  cycle.vm.flags = alu::compare(cycle.vm.registers[a], cycle.vm.registers[b]);
  Ok(())
}

// push(pc + 2); pc ← r[a]
fn call<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let return_address = cycle.vm.pc.wrapping_add(2);
  cycle.vm.push(return_address)?;
  cycle.vm.pc = cycle.vm.registers[a];
  Ok(())
}

// pc ← pop()
fn ret<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  cycle.vm.pc = cycle.vm.pop()?;
  Ok(())
}

// IS ← IS | (1 << r[a]); serviced at the top of the next cycle
fn interrupt<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let n = cycle.vm.registers[a] & 0b111;
  cycle.vm.registers[IS] |= 1 << n;
  cycle.vm.pc = cycle.vm.pc.wrapping_add(2);
  Ok(())
}

// r[6..0], fl, pc ← pop × 9; interrupts re-enabled
fn interrupt_return<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  for index in (0..=IS).rev() {
    cycle.vm.registers[index] = cycle.vm.pop()?;
  }
  let bits = cycle.vm.pop()?;
  cycle.vm.flags = Flags::from_bits(bits);
  cycle.vm.pc = cycle.vm.pop()?;
  cycle.vm.interrupts_enabled = true;
  Ok(())
}

// pc ← r[a]
fn jump<C>(cycle: &mut Cycle<'_, '_, C>) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  cycle.vm.pc = cycle.vm.registers[a];
  Ok(())
}

// pc ← r[a] when the tested flags hold, else fall through
fn conditional_jump<C>(cycle: &mut Cycle<'_, '_, C>, op: Opcode) -> Result<(), Fault>
where
  C: Console,
{
  let a = cycle.register_operand(0)?;
  let flags = cycle.vm.flags;
  let taken = match op {
    Opcode::JumpIfEqual => flags.equal(),
    Opcode::JumpIfNotEqual => !flags.equal(),
    Opcode::JumpIfGreater => flags.greater(),
    Opcode::JumpIfLess => flags.less(),
    Opcode::JumpIfLessOrEqual => flags.less() || flags.equal(),
    Opcode::JumpIfGreaterOrEqual => flags.greater() || flags.equal(),
    _ => unreachable!("not a conditional jump opcode"),
  };
  if taken {
    cycle.vm.pc = cycle.vm.registers[a];
  } else {
    cycle.vm.pc = cycle.vm.pc.wrapping_add(op.width());
  }
  Ok(())
}
