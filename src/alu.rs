use std::fmt;

use crate::fault::Fault;
use crate::register::Width;

/// The flag register: run state plus the outcome of the last ALU call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
  pub const RUNNING: Flags = Flags(1 << 0);
  pub const EQUALS: Flags = Flags(1 << 1);
  pub const LESS: Flags = Flags(1 << 2);
  /// Same bit as [`Flags::LESS`]; `jl` reads it under this name.
  pub const OVERFLOW: Flags = Flags::LESS;
  pub const MORE: Flags = Flags(1 << 3);

  const COMPARISON: Flags = Flags(Self::EQUALS.0 | Self::LESS.0 | Self::MORE.0);

  pub const fn empty() -> Self {
    Self(0)
  }

  pub const fn contains(self, other: Flags) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn insert(&mut self, other: Flags) {
    self.0 |= other.0;
  }

  pub fn remove(&mut self, other: Flags) {
    self.0 &= !other.0;
  }

  /// Replace LESS/EQUALS/MORE with the unsigned ordering of `a` and `b`.
  fn compare(&mut self, a: u128, b: u128) {
    self.remove(Self::COMPARISON);
    self.insert(match a.cmp(&b) {
      std::cmp::Ordering::Less => Self::LESS,
      std::cmp::Ordering::Equal => Self::EQUALS,
      std::cmp::Ordering::Greater => Self::MORE,
    });
  }
}

impl fmt::Display for Flags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names = [
      (Self::RUNNING, 'R'),
      (Self::EQUALS, 'E'),
      (Self::LESS, 'L'),
      (Self::MORE, 'M'),
    ];
    for (flag, name) in names {
      let c = if self.contains(flag) { name } else { '-' };
      write!(f, "{c}")?;
    }
    Ok(())
  }
}

/// The operations the arithmetic unit understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
  Sum,
  Sub,
  Mul,
  /// Unsigned, truncating.
  Div,
  /// Two's-complement, truncating toward zero.
  Idiv,
  And,
  Or,
  Xor,
  Shl,
  Shr,
}

/// Apply `op` to two operands of `width` and refresh the comparison flags.
///
/// Operands are truncated to `width` first; the result is always within it.
/// LESS/EQUALS/MORE always come from the unsigned comparison of the truncated
/// operands, whatever `op` is. On a fault the flags are left alone.
pub fn apply(op: AluOp, width: Width, a: u128, b: u128, flags: &mut Flags) -> Result<u128, Fault> {
  let mask = width.mask();
  let (a, b) = (a & mask, b & mask);
  let result = match op {
    AluOp::Sum => a.wrapping_add(b),
    AluOp::Sub => a.wrapping_sub(b),
    AluOp::Mul => a.wrapping_mul(b),
    AluOp::Div => a.checked_div(b).ok_or(Fault::DivideByZero)?,
    AluOp::Idiv => signed_div(width, a, b)?,
    AluOp::And => a & b,
    AluOp::Or => a | b,
    AluOp::Xor => a ^ b,
    AluOp::Shl => shift(width, b).map_or(0, |n| a << n),
    AluOp::Shr => shift(width, b).map_or(0, |n| a >> n),
  };
  flags.compare(a, b);
  Ok(result & mask)
}

// quotient of the magnitudes, negated when exactly one operand is negative
fn signed_div(width: Width, a: u128, b: u128) -> Result<u128, Fault> {
  if b == 0 {
    return Err(Fault::DivideByZero);
  }
  let sign = width.sign_bit();
  let negate = |v: u128| (!v).wrapping_add(1) & width.mask();
  let (a_neg, b_neg) = (a & sign != 0, b & sign != 0);
  let a_mag = if a_neg { negate(a) } else { a };
  let b_mag = if b_neg { negate(b) } else { b };
  let quotient = a_mag / b_mag;
  Ok(if a_neg != b_neg { negate(quotient) } else { quotient })
}

fn shift(width: Width, amount: u128) -> Option<u32> {
  u32::try_from(amount).ok().filter(|n| *n < width.bits())
}
