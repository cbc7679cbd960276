use crate::register::Width;

/// A condition that aborts the instruction which raised it.
///
/// Faults never escape a step: the core reports them, throws away whatever the
/// instruction had staged, and carries on (or halts, see
/// [`FaultPolicy`](crate::vm::FaultPolicy)).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
  #[error("illegal instruction: family {family:#04x}, variant {variant:#04x}")]
  IllegalInstruction { family: u8, variant: u8 },

  #[error("register id {0:#04x} does not name a register")]
  UnknownRegister(u8),

  #[error("operand width mismatch: expected {expected}, found {found}")]
  WidthMismatch { expected: Width, found: Width },

  #[error("memory access of {len} bytes at {address:#x} is outside the {size} byte image")]
  Memory { address: u64, len: usize, size: usize },

  #[error("division by zero")]
  DivideByZero,
}

/// The three fault classes an instruction can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
  IllegalInstruction,
  Memory,
  Arithmetic,
}

impl Fault {
  pub fn class(&self) -> FaultClass {
    match self {
      Self::IllegalInstruction { .. } | Self::UnknownRegister(_) | Self::WidthMismatch { .. } => {
        FaultClass::IllegalInstruction
      }
      Self::Memory { .. } => FaultClass::Memory,
      Self::DivideByZero => FaultClass::Arithmetic,
    }
  }
}
