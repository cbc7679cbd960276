use std::fmt;

use crate::fault::Fault;

/// Number of physical registers. Every view id of every register fits in a
/// single operand byte: `50 * 5 + 4 = 254`.
pub const REGISTER_COUNT: usize = 51;

/// Program counter.
pub const PC: usize = 50;
/// Stack pointer.
pub const SP: usize = 49;
/// Relocation base added to local addresses.
pub const LO: usize = 48;
/// Interrupt vector base.
pub const IP: usize = 47;

/// One of the five views through which a register can be accessed.
///
/// The discriminant is the `id mod 5` part of a register id.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
  W128 = 0,
  W64 = 1,
  W32 = 2,
  W16 = 3,
  W8 = 4,
}

impl Width {
  pub const ALL: [Width; 5] = [Self::W128, Self::W64, Self::W32, Self::W16, Self::W8];

  pub const fn bytes(self) -> usize {
    match self {
      Self::W128 => 16,
      Self::W64 => 8,
      Self::W32 => 4,
      Self::W16 => 2,
      Self::W8 => 1,
    }
  }

  pub const fn bits(self) -> u32 {
    self.bytes() as u32 * 8
  }

  /// All ones across the view.
  pub const fn mask(self) -> u128 {
    match self {
      Self::W128 => u128::MAX,
      width => (1u128 << width.bits()) - 1,
    }
  }

  pub const fn sign_bit(self) -> u128 {
    1u128 << (self.bits() - 1)
  }

  /// The mnemonic prefix used when printing a register through this view.
  pub const fn prefix(self) -> char {
    match self {
      Self::W128 => 'r',
      Self::W64 => 'l',
      Self::W32 => 'i',
      Self::W16 => 's',
      Self::W8 => 'b',
    }
  }
}

impl From<u8> for Width {
  fn from(id: u8) -> Self {
    match id % 5 {
      0 => Self::W128,
      1 => Self::W64,
      2 => Self::W32,
      3 => Self::W16,
      4 => Self::W8,
      _ => unreachable!(),
    }
  }
}

impl fmt::Display for Width {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-bit", self.bits())
  }
}

/// An encoded register operand: `index = id / 5`, `width = id % 5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId(u8);

impl RegisterId {
  /// Validate an operand byte, rejecting ids past the last register.
  pub fn new(raw: u8) -> Result<Self, Fault> {
    if (raw / 5) as usize >= REGISTER_COUNT {
      return Err(Fault::UnknownRegister(raw));
    }
    Ok(Self(raw))
  }

  /// Build the id for `index` viewed through `width`.
  ///
  /// Panics if `index` is not a register.
  pub const fn of(index: usize, width: Width) -> Self {
    assert!(index < REGISTER_COUNT);
    Self(index as u8 * 5 + width as u8)
  }

  pub const fn raw(self) -> u8 {
    self.0
  }

  pub const fn index(self) -> usize {
    (self.0 / 5) as usize
  }

  pub fn width(self) -> Width {
    Width::from(self.0)
  }
}

impl fmt::Display for RegisterId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{:02}", self.width().prefix(), self.index())
  }
}

/// 128 bits of little-endian storage with five overlapping views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Register {
  bytes: [u8; 16],
}

impl Register {
  /// Read the low `width` bytes, zero-extended.
  pub fn get(&self, width: Width) -> u128 {
    let mut buf = [0u8; 16];
    let n = width.bytes();
    buf[..n].copy_from_slice(&self.bytes[..n]);
    u128::from_le_bytes(buf)
  }

  /// Overwrite the low `width` bytes, leaving the rest untouched.
  pub fn set(&mut self, width: Width, value: u128) {
    let n = width.bytes();
    self.bytes[..n].copy_from_slice(&value.to_le_bytes()[..n]);
  }
}

/// The per-core register file, general registers and PC/SP/LO/IP alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
  registers: [Register; REGISTER_COUNT],
}

impl RegisterFile {
  pub fn new() -> Self {
    Self {
      registers: [Register::default(); REGISTER_COUNT],
    }
  }

  pub fn clear(&mut self) {
    self.registers = [Register::default(); REGISTER_COUNT];
  }

  pub fn get(&self, id: RegisterId) -> u128 {
    self.registers[id.index()].get(id.width())
  }

  pub fn set(&mut self, id: RegisterId, value: u128) {
    self.registers[id.index()].set(id.width(), value);
  }

  /// The 64-bit view of register `index`, used for addresses.
  pub fn word(&self, index: usize) -> u64 {
    self.get(RegisterId::of(index, Width::W64)) as u64
  }

  pub fn set_word(&mut self, index: usize, value: u64) {
    self.set(RegisterId::of(index, Width::W64), value as u128);
  }

  pub fn pc(&self) -> u64 {
    self.word(PC)
  }

  pub fn set_pc(&mut self, value: u64) {
    self.set_word(PC, value);
  }

  pub fn sp(&self) -> u64 {
    self.word(SP)
  }

  pub fn set_sp(&mut self, value: u64) {
    self.set_word(SP, value);
  }

  pub fn lo(&self) -> u64 {
    self.word(LO)
  }

  pub fn ip(&self) -> u64 {
    self.word(IP)
  }
}

impl Default for RegisterFile {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for RegisterFile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (index, register) in self.registers.iter().enumerate() {
      let full = register.get(Width::W128);
      writeln!(
        f,
        "r{:02} {:016x}{:016x} {:016x} {:08x} {:04x} {:02x}",
        index,
        (full >> 64) as u64,
        full as u64,
        register.get(Width::W64),
        register.get(Width::W32),
        register.get(Width::W16),
        register.get(Width::W8),
      )?;
    }
    Ok(())
  }
}
