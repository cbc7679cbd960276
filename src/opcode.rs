use std::fmt;

use crate::alu::{AluOp, Flags};
use crate::fault::Fault;
use crate::register::{RegisterId, Width};

/// Every instruction starts with `family`, `variant` and one register operand
/// byte.
pub const HEADER_LEN: usize = 3;

/// A decoded (family, variant) pair.
///
/// `d` is the operand byte of the header, `s`, `a` and `b` come from the
/// trailing field. Addresses and immediates are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  /// | Operation      | Semantics/RTL | Encoding       |
  /// |----------------|---------------|----------------|
  /// | Move           | `r[d] ← r[s]` | `00 00 dd ss`  |
  MoveRegister,

  /// The immediate is as wide as the view of `d`.
  ///
  /// | Operation      | Semantics/RTL | Encoding          |
  /// |----------------|---------------|-------------------|
  /// | Load Immediate | `r[d] ← v`    | `00 01 dd vv..`   |
  MoveImmediate,

  /// | Operation   | Semantics/RTL         | Encoding                 |
  /// |-------------|-----------------------|--------------------------|
  /// | Load Local  | `r[d] ← m[a + r[lo]]` | `00 02 dd aaaaaaaaaaaaaaaa` |
  LoadLocal,

  /// | Operation   | Semantics/RTL         | Encoding                 |
  /// |-------------|-----------------------|--------------------------|
  /// | Store Local | `m[a + r[lo]] ← r[d]` | `00 03 dd aaaaaaaaaaaaaaaa` |
  StoreLocal,

  /// | Operation    | Semantics/RTL  | Encoding                 |
  /// |--------------|----------------|--------------------------|
  /// | Load Global  | `r[d] ← m[a]`  | `00 04 dd aaaaaaaaaaaaaaaa` |
  LoadGlobal,

  /// | Operation    | Semantics/RTL  | Encoding                 |
  /// |--------------|----------------|--------------------------|
  /// | Store Global | `m[a] ← r[d]`  | `00 05 dd aaaaaaaaaaaaaaaa` |
  StoreGlobal,

  /// Register triples, all through the same view. `cmp` ignores `d` and only
  /// keeps the flags.
  ///
  /// | Operation | Semantics/RTL             | Encoding      |
  /// |-----------|---------------------------|---------------|
  /// | Sum       | `r[d] ← r[a] + r[b]`      | `01 00 dd aa bb` |
  /// | Subtract  | `r[d] ← r[a] − r[b]`      | `01 01 dd aa bb` |
  /// | Compare   | `flags ← r[a] ? r[b]`     | `01 02 dd aa bb` |
  /// | Multiply  | `r[d] ← r[a] × r[b]`      | `01 03 dd aa bb` |
  /// | Divide    | `r[d] ← r[a] ÷ r[b]`      | `01 04 dd aa bb` |
  /// | Signed ÷  | `r[d] ← r[a] ÷ r[b]`      | `01 05 dd aa bb` |
  /// | AND       | `r[d] ← r[a] & r[b]`      | `01 06 dd aa bb` |
  /// | OR        | `r[d] ← r[a] \| r[b]`     | `01 07 dd aa bb` |
  /// | XOR       | `r[d] ← r[a] ^ r[b]`      | `01 08 dd aa bb` |
  /// | Shift L   | `r[d] ← r[a] << r[b]`     | `01 09 dd aa bb` |
  /// | Shift R   | `r[d] ← r[a] >> r[b]`     | `01 0A dd aa bb` |
  Alu(AluOp),
  Compare,

  /// | Operation | Semantics/RTL                   | Encoding   |
  /// |-----------|---------------------------------|------------|
  /// | Push      | `sp ← sp − n; m[sp] ← r[d]`     | `02 00 dd` |
  Push,

  /// | Operation | Semantics/RTL                   | Encoding   |
  /// |-----------|---------------------------------|------------|
  /// | Pop       | `r[d] ← m[sp]; sp ← sp + n`     | `02 01 dd` |
  Pop,

  /// Variants `02`..`06` push a 128, 64, 32, 16 or 8 bit immediate.
  PushImmediate(Width),

  /// Conditional jumps to an absolute (local) target.
  ///
  /// | Operation | Condition          | Encoding                    |
  /// |-----------|--------------------|-----------------------------|
  /// | je        | `E`                | `03 00 dd aaaaaaaaaaaaaaaa` |
  /// | jne       | `!E`               | `03 01 dd aaaaaaaaaaaaaaaa` |
  /// | jl        | `L`                | `03 02 dd aaaaaaaaaaaaaaaa` |
  /// | jb        | `M`                | `03 03 dd aaaaaaaaaaaaaaaa` |
  /// | jle       | `L ∨ E`            | `03 04 dd aaaaaaaaaaaaaaaa` |
  /// | jbe       | `!M ∨ E`           | `03 05 dd aaaaaaaaaaaaaaaa` |
  Jump(Condition),

  /// | Operation     | Semantics/RTL              | Encoding                    |
  /// |---------------|----------------------------|-----------------------------|
  /// | Call          | `push pc; pc ← a`          | `03 06 dd aaaaaaaaaaaaaaaa` |
  CallImmediate,

  /// `d` must be a 64-bit view.
  ///
  /// | Operation     | Semantics/RTL              | Encoding   |
  /// |---------------|----------------------------|------------|
  /// | Call Register | `push pc; pc ← r[d]`       | `03 07 dd` |
  CallRegister,

  /// | Operation | Semantics/RTL  | Encoding   |
  /// |-----------|----------------|------------|
  /// | Return    | `pc ← pop64`   | `03 08 dd` |
  Return,

  /// | Operation | Semantics/RTL                               | Encoding      |
  /// |-----------|---------------------------------------------|---------------|
  /// | Interrupt | `push r00..r50; pc ← m[n × 8 + r[ip]]`      | `03 09 dd nn` |
  Interrupt,

  /// | Operation        | Semantics/RTL     | Encoding   |
  /// |------------------|-------------------|------------|
  /// | Interrupt Return | `pop r50..r00`    | `03 0A dd` |
  InterruptReturn,

  /// | Operation | Semantics/RTL      | Encoding   |
  /// |-----------|--------------------|------------|
  /// | Halt      | `(stop execution)` | `FF 00 dd` |
  Halt,
}

/// Flag tests used by the conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
  Equal,
  NotEqual,
  Less,
  More,
  LessOrEqual,
  BelowOrEqual,
}

impl Condition {
  /// Test the flag bits exactly as the jump encodes them.
  pub fn holds(self, flags: Flags) -> bool {
    match self {
      Self::Equal => flags.contains(Flags::EQUALS),
      Self::NotEqual => !flags.contains(Flags::EQUALS),
      Self::Less => flags.contains(Flags::LESS),
      Self::More => flags.contains(Flags::MORE),
      Self::LessOrEqual => flags.contains(Flags::LESS) || flags.contains(Flags::EQUALS),
      Self::BelowOrEqual => !flags.contains(Flags::MORE) || flags.contains(Flags::EQUALS),
    }
  }
}

impl TryFrom<(u8, u8)> for Opcode {
  type Error = Fault;

  fn try_from((family, variant): (u8, u8)) -> Result<Self, Self::Error> {
    let op = match (family, variant) {
      (0x00, 0x00) => Self::MoveRegister,
      (0x00, 0x01) => Self::MoveImmediate,
      (0x00, 0x02) => Self::LoadLocal,
      (0x00, 0x03) => Self::StoreLocal,
      (0x00, 0x04) => Self::LoadGlobal,
      (0x00, 0x05) => Self::StoreGlobal,
      (0x01, 0x00) => Self::Alu(AluOp::Sum),
      (0x01, 0x01) => Self::Alu(AluOp::Sub),
      (0x01, 0x02) => Self::Compare,
      (0x01, 0x03) => Self::Alu(AluOp::Mul),
      (0x01, 0x04) => Self::Alu(AluOp::Div),
      (0x01, 0x05) => Self::Alu(AluOp::Idiv),
      (0x01, 0x06) => Self::Alu(AluOp::And),
      (0x01, 0x07) => Self::Alu(AluOp::Or),
      (0x01, 0x08) => Self::Alu(AluOp::Xor),
      (0x01, 0x09) => Self::Alu(AluOp::Shl),
      (0x01, 0x0A) => Self::Alu(AluOp::Shr),
      (0x02, 0x00) => Self::Push,
      (0x02, 0x01) => Self::Pop,
      (0x02, 0x02) => Self::PushImmediate(Width::W128),
      (0x02, 0x03) => Self::PushImmediate(Width::W64),
      (0x02, 0x04) => Self::PushImmediate(Width::W32),
      (0x02, 0x05) => Self::PushImmediate(Width::W16),
      (0x02, 0x06) => Self::PushImmediate(Width::W8),
      (0x03, 0x00) => Self::Jump(Condition::Equal),
      (0x03, 0x01) => Self::Jump(Condition::NotEqual),
      (0x03, 0x02) => Self::Jump(Condition::Less),
      (0x03, 0x03) => Self::Jump(Condition::More),
      (0x03, 0x04) => Self::Jump(Condition::LessOrEqual),
      (0x03, 0x05) => Self::Jump(Condition::BelowOrEqual),
      (0x03, 0x06) => Self::CallImmediate,
      (0x03, 0x07) => Self::CallRegister,
      (0x03, 0x08) => Self::Return,
      (0x03, 0x09) => Self::Interrupt,
      (0x03, 0x0A) => Self::InterruptReturn,
      (0xFF, 0x00) => Self::Halt,
      _ => return Err(Fault::IllegalInstruction { family, variant }),
    };
    Ok(op)
  }
}

impl Opcode {
  /// Length of the trailing field. Only `MoveImmediate` depends on the
  /// operand byte, whose view sets the immediate's size.
  pub fn operand_len(self, operand: u8) -> usize {
    match self {
      Self::MoveRegister => 1,
      Self::MoveImmediate => Width::from(operand).bytes(),
      Self::LoadLocal | Self::StoreLocal | Self::LoadGlobal | Self::StoreGlobal => 8,
      Self::Alu(_) | Self::Compare => 2,
      Self::Push | Self::Pop => 0,
      Self::PushImmediate(width) => width.bytes(),
      Self::Jump(_) | Self::CallImmediate => 8,
      Self::CallRegister | Self::Return | Self::InterruptReturn => 0,
      Self::Interrupt => 1,
      Self::Halt => 0,
    }
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      Self::MoveRegister
      | Self::MoveImmediate
      | Self::LoadLocal
      | Self::StoreLocal
      | Self::LoadGlobal
      | Self::StoreGlobal => "mov",
      Self::Alu(AluOp::Sum) => "sum",
      Self::Alu(AluOp::Sub) => "sub",
      Self::Alu(AluOp::Mul) => "mul",
      Self::Alu(AluOp::Div) => "div",
      Self::Alu(AluOp::Idiv) => "idiv",
      Self::Alu(AluOp::And) => "and",
      Self::Alu(AluOp::Or) => "or",
      Self::Alu(AluOp::Xor) => "xor",
      Self::Alu(AluOp::Shl) => "shl",
      Self::Alu(AluOp::Shr) => "shr",
      Self::Compare => "cmp",
      Self::Push | Self::PushImmediate(_) => "push",
      Self::Pop => "pop",
      Self::Jump(Condition::Equal) => "je",
      Self::Jump(Condition::NotEqual) => "jne",
      Self::Jump(Condition::Less) => "jl",
      Self::Jump(Condition::More) => "jb",
      Self::Jump(Condition::LessOrEqual) => "jle",
      Self::Jump(Condition::BelowOrEqual) => "jbe",
      Self::CallImmediate | Self::CallRegister => "call",
      Self::Return => "ret",
      Self::Interrupt => "int",
      Self::InterruptReturn => "iret",
      Self::Halt => "hlt",
    }
  }
}

/// One fetched instruction: the decoded opcode, the header operand byte and
/// the trailing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
  pub opcode: Opcode,
  pub operand: u8,
  /// The trailing field, little-endian, zero-extended.
  pub trailing: u128,
  pub trailing_len: usize,
}

impl Instruction {
  /// Total encoded length.
  pub fn encoded_len(&self) -> usize {
    HEADER_LEN + self.trailing_len
  }

  /// The trailing field read as a 64-bit address.
  pub fn address(&self) -> u64 {
    self.trailing as u64
  }

  /// Byte `n` of the trailing field.
  pub fn byte(&self, n: usize) -> u8 {
    (self.trailing >> (8 * n)) as u8
  }
}

// operand bytes that may not be valid register ids still print
struct Reg(u8);

impl fmt::Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match RegisterId::new(self.0) {
      Ok(id) => write!(f, "{id}"),
      Err(_) => write!(f, "?{:02x}", self.0),
    }
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let d = Reg(self.operand);
    let digits = self.trailing_len * 2;
    let mnemonic = self.opcode.mnemonic();
    match self.opcode {
      Opcode::MoveRegister => write!(f, "{mnemonic} {d} {}", Reg(self.byte(0))),
      Opcode::MoveImmediate => write!(f, "{mnemonic} {d} {:0digits$x}", self.trailing),
      Opcode::PushImmediate(_) => write!(f, "{mnemonic} {:0digits$x}", self.trailing),
      Opcode::LoadLocal => write!(f, "{mnemonic} {d} [{:016x}]", self.address()),
      Opcode::StoreLocal => write!(f, "{mnemonic} {{{:016x}}} {d}", self.address()),
      Opcode::LoadGlobal => write!(f, "{mnemonic} {d} [{:016x}]g", self.address()),
      Opcode::StoreGlobal => write!(f, "{mnemonic} {{{:016x}}}g {d}", self.address()),
      Opcode::Alu(_) => write!(f, "{mnemonic} {d} {} {}", Reg(self.byte(0)), Reg(self.byte(1))),
      Opcode::Compare => write!(f, "{mnemonic} {} {}", Reg(self.byte(0)), Reg(self.byte(1))),
      Opcode::Push | Opcode::Pop | Opcode::CallRegister => write!(f, "{mnemonic} {d}"),
      Opcode::Jump(_) | Opcode::CallImmediate => write!(f, "{mnemonic} {:016x}", self.address()),
      Opcode::Interrupt => write!(f, "{mnemonic} {:02x}", self.byte(0)),
      Opcode::Return | Opcode::InterruptReturn | Opcode::Halt => write!(f, "{mnemonic}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn instruction(family: u8, variant: u8, operand: u8, trailing: u128) -> Instruction {
    let opcode = Opcode::try_from((family, variant)).unwrap();
    Instruction {
      opcode,
      operand,
      trailing,
      trailing_len: opcode.operand_len(operand),
    }
  }

  #[test]
  fn decode_families() {
    assert_eq!(Opcode::try_from((0x00, 0x00)), Ok(Opcode::MoveRegister));
    assert_eq!(Opcode::try_from((0x01, 0x02)), Ok(Opcode::Compare));
    assert_eq!(Opcode::try_from((0x02, 0x06)), Ok(Opcode::PushImmediate(Width::W8)));
    assert_eq!(
      Opcode::try_from((0x03, 0x05)),
      Ok(Opcode::Jump(Condition::BelowOrEqual))
    );
    assert_eq!(Opcode::try_from((0xFF, 0x00)), Ok(Opcode::Halt));
  }

  #[test]
  fn unknown_pairs_are_illegal() {
    for (family, variant) in [(0x04, 0x01), (0x00, 0x06), (0x01, 0x0B), (0x02, 0x07), (0x03, 0x0B), (0xFF, 0x01)] {
      assert_eq!(
        Opcode::try_from((family, variant)),
        Err(Fault::IllegalInstruction { family, variant })
      );
    }
  }

  #[test]
  fn immediate_length_follows_view() {
    assert_eq!(Opcode::MoveImmediate.operand_len(0), 16);
    assert_eq!(Opcode::MoveImmediate.operand_len(1), 8);
    assert_eq!(Opcode::MoveImmediate.operand_len(7), 4);
    assert_eq!(Opcode::MoveImmediate.operand_len(13), 2);
    assert_eq!(Opcode::MoveImmediate.operand_len(19), 1);
  }

  #[test]
  fn fixed_lengths() {
    assert_eq!(Opcode::MoveRegister.operand_len(0), 1);
    assert_eq!(Opcode::LoadGlobal.operand_len(0), 8);
    assert_eq!(Opcode::Compare.operand_len(0), 2);
    assert_eq!(Opcode::Pop.operand_len(0), 0);
    assert_eq!(Opcode::PushImmediate(Width::W32).operand_len(0), 4);
    assert_eq!(Opcode::CallImmediate.operand_len(0), 8);
    assert_eq!(Opcode::CallRegister.operand_len(0), 0);
    assert_eq!(Opcode::Interrupt.operand_len(0), 1);
    assert_eq!(Opcode::Halt.operand_len(0), 0);
  }

  #[test]
  fn trailing_field_accessors() {
    let i = instruction(0x01, 0x00, 0, 0x0A05);
    assert_eq!(i.byte(0), 0x05);
    assert_eq!(i.byte(1), 0x0A);
    assert_eq!(i.encoded_len(), 5);
  }

  #[test]
  fn conditions() {
    let mut equal = Flags::RUNNING;
    equal.insert(Flags::EQUALS);
    let mut less = Flags::empty();
    less.insert(Flags::LESS);
    let mut more = Flags::empty();
    more.insert(Flags::MORE);

    assert!(Condition::Equal.holds(equal));
    assert!(!Condition::Equal.holds(less));
    assert!(Condition::NotEqual.holds(more));
    assert!(!Condition::NotEqual.holds(equal));
    assert!(Condition::Less.holds(less));
    assert!(!Condition::Less.holds(more));
    assert!(Condition::More.holds(more));
    assert!(!Condition::More.holds(equal));
    assert!(Condition::LessOrEqual.holds(less) && Condition::LessOrEqual.holds(equal));
    assert!(!Condition::LessOrEqual.holds(more));
    // MORE clear or EQUALS set
    assert!(Condition::BelowOrEqual.holds(less) && Condition::BelowOrEqual.holds(equal));
    assert!(!Condition::BelowOrEqual.holds(more));
    assert!(Condition::BelowOrEqual.holds(Flags::empty()));
  }

  #[test]
  fn disassembly() {
    assert_eq!(instruction(0x00, 0x00, 1, 6).to_string(), "mov l00 l01");
    assert_eq!(instruction(0x00, 0x01, 19, 0x2A).to_string(), "mov b03 2a");
    assert_eq!(instruction(0x00, 0x02, 2, 0x10).to_string(), "mov i00 [0000000000000010]");
    assert_eq!(instruction(0x01, 0x02, 0, 0x0702).to_string(), "cmp i00 i01");
    assert_eq!(instruction(0x02, 0x04, 0, 7).to_string(), "push 00000007");
    assert_eq!(instruction(0x03, 0x00, 0, 0x400).to_string(), "je 0000000000000400");
    assert_eq!(instruction(0x03, 0x09, 0, 3).to_string(), "int 03");
    assert_eq!(instruction(0x02, 0x00, 255, 0).to_string(), "push ?ff");
    assert_eq!(instruction(0xFF, 0x00, 0, 0).to_string(), "hlt");
  }
}
