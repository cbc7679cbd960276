use std::fmt;

use crate::alu::{self, AluOp, Flags};
use crate::fault::Fault;
use crate::memory::{Addressing, Memory};
use crate::opcode::{Condition, Instruction, Opcode, HEADER_LEN};
use crate::register::{RegisterFile, RegisterId, Width, REGISTER_COUNT};

/// Bytes per interrupt vector table entry; each holds a 64-bit handler address.
pub const VECTOR_ENTRY_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Running,
  Halted,
}

/// What a core does after reporting a fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
  /// Drop the instruction's effects and continue at the next one.
  #[default]
  Skip,
  /// Drop the instruction's effects and clear RUNNING.
  Halt,
}

/// Called once per decoded instruction, before it executes.
///
/// A fetch that faults (an illegal family/variant, a header or trailing field
/// past the end of memory) never reaches the hook; it is only reported.
pub type TraceHook = Box<dyn FnMut(&Instruction)>;

/// A single core: its register file, flag register and bookkeeping.
///
/// The memory image is not owned here; it is handed to [`Core::step`] so that
/// several cores can take turns on the same image.
pub struct Core {
  id: usize,
  registers: RegisterFile,
  flags: Flags,
  policy: FaultPolicy,
  last_fault: Option<Fault>,
  faults: u64,
  steps: u64,
  trace: Option<TraceHook>,
}

impl Core {
  /// A halted core with every register cleared.
  pub fn new(id: usize) -> Self {
    Self {
      id,
      registers: RegisterFile::new(),
      flags: Flags::empty(),
      policy: FaultPolicy::default(),
      last_fault: None,
      faults: 0,
      steps: 0,
      trace: None,
    }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn registers(&self) -> &RegisterFile {
    &self.registers
  }

  pub fn registers_mut(&mut self) -> &mut RegisterFile {
    &mut self.registers
  }

  pub fn flags(&self) -> Flags {
    self.flags
  }

  pub fn state(&self) -> State {
    if self.flags.contains(Flags::RUNNING) {
      State::Running
    } else {
      State::Halted
    }
  }

  pub fn is_running(&self) -> bool {
    self.state() == State::Running
  }

  /// The most recent fault this core reported, if any.
  pub fn last_fault(&self) -> Option<&Fault> {
    self.last_fault.as_ref()
  }

  pub fn fault_count(&self) -> u64 {
    self.faults
  }

  /// Instructions attempted so far, faulted ones included.
  pub fn steps(&self) -> u64 {
    self.steps
  }

  pub fn set_fault_policy(&mut self, policy: FaultPolicy) {
    self.policy = policy;
  }

  pub fn set_trace_hook(&mut self, hook: TraceHook) {
    self.trace = Some(hook);
  }

  /// Clear every register and flag, leaving the core halted.
  pub fn clear(&mut self) {
    self.registers.clear();
    self.flags = Flags::empty();
    self.last_fault = None;
  }

  /// Start executing at `entry`, with the stack growing down from it.
  pub fn boot(&mut self, entry: u64) {
    self.registers.set_pc(entry);
    self.registers.set_sp(entry);
    self.flags.insert(Flags::RUNNING);
  }

  /// Execute exactly one instruction. A no-op once the core is halted.
  pub fn step(&mut self, memory: &mut Memory) {
    let _ = self.try_step(memory);
  }

  /// Like [`Core::step`], but tells the caller what happened.
  ///
  /// A returned fault has already been handled according to the fault policy.
  pub fn try_step(&mut self, memory: &mut Memory) -> Result<(), Error> {
    if !self.is_running() {
      return Err(Error::MachineHalted);
    }
    self.steps += 1;
    let pc = self.registers.pc();
    self.cycle(memory).map_err(|fault| {
      self.report(pc, &fault);
      Error::Faulted(fault)
    })
  }

  fn cycle(&mut self, memory: &mut Memory) -> Result<(), Fault> {
    let instruction = self.fetch(memory)?;
    tracing::trace!(
      core = self.id,
      pc = self.registers.pc(),
      len = instruction.encoded_len(),
      "{instruction}"
    );
    if let Some(hook) = self.trace.as_mut() {
      hook(&instruction);
    }

    let mut task = Task::new(self.registers.clone(), self.flags, memory);
    task.run(&instruction)?;
    let Task {
      registers,
      flags,
      writes,
      ..
    } = task;

    // every pending write was bounds-checked when it was staged
    for write in writes {
      memory.write(write.width, write.address, write.value)?;
    }
    self.registers = registers;
    self.flags = flags;

    if !self.is_running() {
      tracing::info!(core = self.id, steps = self.steps, "halted");
    }
    Ok(())
  }

  /// Read the header and trailing field at PC, advancing PC past both.
  fn fetch(&mut self, memory: &Memory) -> Result<Instruction, Fault> {
    let lo = self.registers.lo();
    let pc = self.registers.pc();
    self.registers.set_pc(pc.wrapping_add(HEADER_LEN as u64));
    let header = memory.slice(local(memory, pc, lo, HEADER_LEN)?, HEADER_LEN)?;
    let (family, variant, operand) = (header[0], header[1], header[2]);

    let opcode = Opcode::try_from((family, variant))?;
    let trailing_len = opcode.operand_len(operand);
    let at = self.registers.pc();
    self.registers.set_pc(at.wrapping_add(trailing_len as u64));

    let mut trailing = [0u8; 16];
    if trailing_len > 0 {
      let bytes = memory.slice(local(memory, at, lo, trailing_len)?, trailing_len)?;
      trailing[..trailing_len].copy_from_slice(bytes);
    }

    Ok(Instruction {
      opcode,
      operand,
      trailing: u128::from_le_bytes(trailing),
      trailing_len,
    })
  }

  fn report(&mut self, pc: u64, fault: &Fault) {
    tracing::warn!(core = self.id, pc, class = ?fault.class(), "{fault}");
    self.faults += 1;
    self.last_fault = Some(fault.clone());
    if self.policy == FaultPolicy::Halt {
      self.flags.remove(Flags::RUNNING);
      tracing::info!(core = self.id, steps = self.steps, "halted on fault");
    }
  }
}

impl fmt::Debug for Core {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Core")
      .field("id", &self.id)
      .field("pc", &self.registers.pc())
      .field("sp", &self.registers.sp())
      .field("flags", &self.flags)
      .field("policy", &self.policy)
      .field("last_fault", &self.last_fault)
      .field("steps", &self.steps)
      .finish_non_exhaustive()
  }
}

/// Why a step did not complete normally.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("machine is halted")]
  MachineHalted,

  #[error(transparent)]
  Faulted(#[from] Fault),
}

fn local(memory: &Memory, address: u64, lo: u64, len: usize) -> Result<u64, Fault> {
  Addressing::Local.resolve(address, lo).ok_or(Fault::Memory {
    address,
    len,
    size: memory.len(),
  })
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
  address: u64,
  width: Width,
  value: u128,
}

/// One instruction in flight.
///
/// Works on a copy of the register file and flags and queues its memory
/// writes, so that nothing is visible to the core until the whole instruction
/// has succeeded.
struct Task<'mem> {
  registers: RegisterFile,
  flags: Flags,
  memory: &'mem Memory,
  writes: Vec<PendingWrite>,
}

impl<'mem> Task<'mem> {
  fn new(registers: RegisterFile, flags: Flags, memory: &'mem Memory) -> Self {
    Self {
      registers,
      flags,
      memory,
      writes: Vec::new(),
    }
  }

  fn run(&mut self, instruction: &Instruction) -> Result<(), Fault> {
    match instruction.opcode {
      Opcode::MoveRegister => move_register(self, instruction)?,
      Opcode::MoveImmediate => move_immediate(self, instruction)?,
      Opcode::LoadLocal => load(self, instruction, Addressing::Local)?,
      Opcode::StoreLocal => store(self, instruction, Addressing::Local)?,
      Opcode::LoadGlobal => load(self, instruction, Addressing::Global)?,
      Opcode::StoreGlobal => store(self, instruction, Addressing::Global)?,
      Opcode::Alu(op) => arithmetic(self, instruction, op)?,
      Opcode::Compare => compare(self, instruction)?,
      Opcode::Push => push(self, instruction)?,
      Opcode::Pop => pop(self, instruction)?,
      Opcode::PushImmediate(width) => push_immediate(self, instruction, width)?,
      Opcode::Jump(condition) => jump(self, instruction, condition),
      Opcode::CallImmediate => call_immediate(self, instruction)?,
      Opcode::CallRegister => call_register(self, instruction)?,
      Opcode::Return => ret(self)?,
      Opcode::Interrupt => interrupt(self, instruction)?,
      Opcode::InterruptReturn => interrupt_return(self)?,
      Opcode::Halt => halt(self),
    }
    Ok(())
  }

  #[inline]
  fn reg(&self, raw: u8) -> Result<RegisterId, Fault> {
    RegisterId::new(raw)
  }

  /// The shared view of `ids`, or a mismatch against the first one.
  fn same_width(&self, ids: &[RegisterId]) -> Result<Width, Fault> {
    let expected = ids[0].width();
    match ids.iter().find(|id| id.width() != expected) {
      Some(id) => Err(Fault::WidthMismatch {
        expected,
        found: id.width(),
      }),
      None => Ok(expected),
    }
  }

  fn resolve(&self, mode: Addressing, address: u64, width: Width) -> Result<u64, Fault> {
    let fault = || Fault::Memory {
      address,
      len: width.bytes(),
      size: self.memory.len(),
    };
    let effective = mode.resolve(address, self.registers.lo()).ok_or_else(fault)?;
    self.memory.range(effective, width.bytes())?;
    Ok(effective)
  }

  /// Read memory as it will look once the queued writes land.
  fn load(&self, mode: Addressing, address: u64, width: Width) -> Result<u128, Fault> {
    let address = self.resolve(mode, address, width)?;
    let mut bytes = self.memory.read(width, address)?.to_le_bytes();
    let end = address + width.bytes() as u64;
    for write in &self.writes {
      let src = write.value.to_le_bytes();
      for (i, byte) in src.iter().enumerate().take(write.width.bytes()) {
        let at = write.address + i as u64;
        if (address..end).contains(&at) {
          bytes[(at - address) as usize] = *byte;
        }
      }
    }
    Ok(u128::from_le_bytes(bytes))
  }

  fn store(&mut self, mode: Addressing, address: u64, width: Width, value: u128) -> Result<(), Fault> {
    let address = self.resolve(mode, address, width)?;
    self.writes.push(PendingWrite {
      address,
      width,
      value,
    });
    Ok(())
  }

  /// Decrement SP by the width, then write at the new SP.
  fn push(&mut self, width: Width, value: u128) -> Result<(), Fault> {
    let sp = self.registers.sp().wrapping_sub(width.bytes() as u64);
    self.store(Addressing::Local, sp, width, value)?;
    self.registers.set_sp(sp);
    Ok(())
  }

  /// Read at SP, then increment SP by the width.
  fn pop(&mut self, width: Width) -> Result<u128, Fault> {
    let sp = self.registers.sp();
    let value = self.load(Addressing::Local, sp, width)?;
    self.registers.set_sp(sp.wrapping_add(width.bytes() as u64));
    Ok(value)
  }
}

// r[d] ← r[s]
fn move_register(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let d = task.reg(i.operand)?;
  let s = task.reg(i.byte(0))?;
  task.same_width(&[d, s])?;
  let value = task.registers.get(s);
  task.registers.set(d, value);
  Ok(())
}

// r[d] ← v
fn move_immediate(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let d = task.reg(i.operand)?;
  task.registers.set(d, i.trailing);
  Ok(())
}

// r[d] ← m[a]
fn load(task: &mut Task<'_>, i: &Instruction, mode: Addressing) -> Result<(), Fault> {
  let d = task.reg(i.operand)?;
  let value = task.load(mode, i.address(), d.width())?;
  task.registers.set(d, value);
  Ok(())
}

// m[a] ← r[d]
fn store(task: &mut Task<'_>, i: &Instruction, mode: Addressing) -> Result<(), Fault> {
  let s = task.reg(i.operand)?;
  let value = task.registers.get(s);
  task.store(mode, i.address(), s.width(), value)
}

// r[d] ← r[a] op r[b]
fn arithmetic(task: &mut Task<'_>, i: &Instruction, op: AluOp) -> Result<(), Fault> {
  let d = task.reg(i.operand)?;
  let a = task.reg(i.byte(0))?;
  let b = task.reg(i.byte(1))?;
  let width = task.same_width(&[d, a, b])?;
  let (x, y) = (task.registers.get(a), task.registers.get(b));
  let result = alu::apply(op, width, x, y, &mut task.flags)?;
  task.registers.set(d, result);
  Ok(())
}

// flags ← r[a] − r[b]
fn compare(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let a = task.reg(i.byte(0))?;
  let b = task.reg(i.byte(1))?;
  let width = task.same_width(&[a, b])?;
  let (x, y) = (task.registers.get(a), task.registers.get(b));
  alu::apply(AluOp::Sub, width, x, y, &mut task.flags)?;
  Ok(())
}

fn push(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let r = task.reg(i.operand)?;
  let value = task.registers.get(r);
  task.push(r.width(), value)
}

fn pop(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let r = task.reg(i.operand)?;
  let value = task.pop(r.width())?;
  task.registers.set(r, value);
  Ok(())
}

fn push_immediate(task: &mut Task<'_>, i: &Instruction, width: Width) -> Result<(), Fault> {
  task.push(width, i.trailing)
}

// if cond : pc ← a
fn jump(task: &mut Task<'_>, i: &Instruction, condition: Condition) {
  if condition.holds(task.flags) {
    task.registers.set_pc(i.address());
  }
}

// push pc; pc ← a
fn call_immediate(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  call(task, i.address())
}

// push pc; pc ← r[d]
fn call_register(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  let r = task.reg(i.operand)?;
  if r.width() != Width::W64 {
    return Err(Fault::WidthMismatch {
      expected: Width::W64,
      found: r.width(),
    });
  }
  let target = task.registers.get(r) as u64;
  call(task, target)
}

fn call(task: &mut Task<'_>, target: u64) -> Result<(), Fault> {
  let ret = task.registers.pc();
  task.push(Width::W64, ret as u128)?;
  task.registers.set_pc(target);
  Ok(())
}

// pc ← pop64
fn ret(task: &mut Task<'_>) -> Result<(), Fault> {
  let pc = task.pop(Width::W64)?;
  task.registers.set_pc(pc as u64);
  Ok(())
}

// push r00..r50; pc ← m[n × 8 + r[ip]]
fn interrupt(task: &mut Task<'_>, i: &Instruction) -> Result<(), Fault> {
  for index in 0..REGISTER_COUNT {
    let value = task.registers.get(RegisterId::of(index, Width::W128));
    task.push(Width::W128, value)?;
  }
  let vector = (i.byte(0) as u64 * VECTOR_ENTRY_SIZE).wrapping_add(task.registers.ip());
  let handler = task.load(Addressing::Local, vector, Width::W64)?;
  task.registers.set_pc(handler as u64);
  Ok(())
}

// pop r50..r00
fn interrupt_return(task: &mut Task<'_>) -> Result<(), Fault> {
  for index in (0..REGISTER_COUNT).rev() {
    let value = task.pop(Width::W128)?;
    task.registers.set(RegisterId::of(index, Width::W128), value);
  }
  Ok(())
}

// (stop execution)
fn halt(task: &mut Task<'_>) {
  task.flags.remove(Flags::RUNNING);
}
