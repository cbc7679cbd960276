//! Property tests over the register file, the ALU and the control-flow unit.

use proptest::prelude::*;

use crate::alu::{self, AluOp, Flags};
use crate::memory::Memory;
use crate::register::{RegisterId, Width, IP, REGISTER_COUNT};
use crate::vm::{Core, State, VECTOR_ENTRY_SIZE};

const ORIGIN: u64 = 0x400;

fn width() -> impl Strategy<Value = Width> {
  prop::sample::select(Width::ALL.to_vec())
}

fn boot(program: &[u8]) -> (Core, Memory) {
  let mut memory = Memory::new(0x1000);
  memory.load(ORIGIN, program).unwrap();
  let mut core = Core::new(0);
  core.boot(ORIGIN);
  (core, memory)
}

fn raw(index: usize, width: Width) -> u8 {
  RegisterId::of(index, width).raw()
}

proptest! {
  /// Every id below 255 names a register, and composing it back gives the same id.
  #[test]
  fn register_id_round_trip(raw in 0u8..255) {
    let id = RegisterId::new(raw).unwrap();
    prop_assert!(id.index() < REGISTER_COUNT);
    prop_assert_eq!(RegisterId::of(id.index(), id.width()), id);
  }

  /// A narrow write only touches the low bytes of the register.
  #[test]
  fn narrow_write_keeps_upper_bytes(w in width(), old in any::<u128>(), new in any::<u128>()) {
    let mut core = Core::new(0);
    let registers = core.registers_mut();
    registers.set(RegisterId::of(3, Width::W128), old);
    registers.set(RegisterId::of(3, w), new);
    let full = registers.get(RegisterId::of(3, Width::W128));
    prop_assert_eq!(full & w.mask(), new & w.mask());
    prop_assert_eq!(full & !w.mask(), old & !w.mask());
  }

  /// After any successful ALU operation exactly one of LESS, EQUALS and MORE is set.
  #[test]
  fn comparison_flags_exclusive(
    op in prop::sample::select(vec![
      AluOp::Sum, AluOp::Sub, AluOp::Mul, AluOp::Div, AluOp::Idiv,
      AluOp::And, AluOp::Or, AluOp::Xor, AluOp::Shl, AluOp::Shr,
    ]),
    w in width(),
    a in any::<u128>(),
    b in any::<u128>(),
  ) {
    let mut flags = Flags::RUNNING;
    if let Ok(result) = alu::apply(op, w, a, b, &mut flags) {
      prop_assert_eq!(result & !w.mask(), 0);
      let set = [Flags::LESS, Flags::EQUALS, Flags::MORE]
        .into_iter()
        .filter(|f| flags.contains(*f))
        .count();
      prop_assert_eq!(set, 1);
    }
    prop_assert!(flags.contains(Flags::RUNNING));
  }

  /// `push r; pop r'` copies the value and leaves SP where it started.
  #[test]
  fn push_pop_round_trip(w in width(), value in any::<u128>()) {
    #[rustfmt::skip]
    let program = [
      0x02, 0x00, raw(1, w),
      0x02, 0x01, raw(2, w),
      0xFF, 0x00, 0x00,
    ];
    let (mut core, mut memory) = boot(&program);
    core.registers_mut().set(RegisterId::of(1, w), value);
    core.step(&mut memory);
    prop_assert_eq!(core.registers().sp(), ORIGIN - w.bytes() as u64);
    core.step(&mut memory);
    prop_assert_eq!(core.registers().get(RegisterId::of(2, w)), value & w.mask());
    prop_assert_eq!(core.registers().sp(), ORIGIN);
  }

  /// Pushing an immediate and popping it back gives the immediate.
  #[test]
  fn push_immediate_pop_round_trip(w in width(), value in any::<u128>()) {
    let mut program = vec![0x02, 0x02 + w as u8, 0x00];
    program.extend_from_slice(&value.to_le_bytes()[..w.bytes()]);
    program.extend_from_slice(&[0x02, 0x01, raw(4, w), 0xFF, 0x00, 0x00]);
    let (mut core, mut memory) = boot(&program);
    core.step(&mut memory);
    core.step(&mut memory);
    prop_assert_eq!(core.registers().get(RegisterId::of(4, w)), value & w.mask());
    prop_assert_eq!(core.registers().sp(), ORIGIN);
    prop_assert_eq!(core.fault_count(), 0);
  }

  /// `call a` into a lone `ret` comes straight back to the instruction after the call.
  #[test]
  fn call_return_round_trip(target in 0x800u64..0xF00) {
    let mut program = vec![0x03, 0x06, 0x00];
    program.extend_from_slice(&target.to_le_bytes());
    program.extend_from_slice(&[0xFF, 0x00, 0x00]);
    let (mut core, mut memory) = boot(&program);
    memory.load(target, &[0x03, 0x08, 0x00]).unwrap();

    core.step(&mut memory);
    prop_assert_eq!(core.registers().pc(), target);
    prop_assert_eq!(core.registers().sp(), ORIGIN - 8);
    core.step(&mut memory);
    prop_assert_eq!(core.registers().pc(), ORIGIN + 11);
    prop_assert_eq!(core.registers().sp(), ORIGIN);
    core.step(&mut memory);
    prop_assert_eq!(core.state(), State::Halted);
    prop_assert_eq!(core.fault_count(), 0);
  }

  /// `int n` into a lone `iret` restores every register, PC aside.
  #[test]
  fn interrupt_return_restores_registers(
    vector in 0u8..8,
    values in prop::collection::vec(any::<u128>(), IP),
  ) {
    let handler = 0x600;
    let vectors = 0x700;
    let (mut core, mut memory) = boot(&[0x03, 0x09, 0x00, vector, 0xFF, 0x00, 0x00]);
    memory.load(handler, &[0x03, 0x0A, 0x00]).unwrap();
    memory
      .write(Width::W64, vectors + vector as u64 * VECTOR_ENTRY_SIZE, handler as u128)
      .unwrap();
    for (index, value) in values.iter().enumerate() {
      core.registers_mut().set(RegisterId::of(index, Width::W128), *value);
    }
    core.registers_mut().set_word(IP, vectors);

    let mut before = core.registers().clone();
    before.set_pc(ORIGIN + 4);
    core.step(&mut memory);
    prop_assert_eq!(core.registers().pc(), handler);
    core.step(&mut memory);
    prop_assert_eq!(core.registers(), &before);
    prop_assert_eq!(core.registers().sp(), ORIGIN);
  }

  /// A faulting divide changes nothing but PC.
  #[test]
  fn fault_leaves_no_trace(w in width(), a in any::<u128>()) {
    #[rustfmt::skip]
    let program = [
      0x01, 0x04, raw(5, w), raw(1, w), raw(2, w),
      0xFF, 0x00, 0x00,
    ];
    let (mut core, mut memory) = boot(&program);
    core.registers_mut().set(RegisterId::of(1, Width::W128), a);
    core.registers_mut().set(RegisterId::of(5, Width::W128), !a);
    let mut before = core.registers().clone();
    before.set_pc(ORIGIN + 5);
    let flags = core.flags();

    core.step(&mut memory);
    prop_assert_eq!(core.registers(), &before);
    prop_assert_eq!(core.flags(), flags);
    prop_assert_eq!(core.fault_count(), 1);
    prop_assert!(core.is_running());
  }
}
