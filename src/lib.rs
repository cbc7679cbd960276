//! A software CPU with 128-bit registers and a variable-length instruction set
//!
//! Every register can be viewed at 128, 64, 32, 16 or 8 bits; the view is part
//! of the register id an instruction names. Instructions are a 3 byte header
//! (family, variant, register) followed by whatever trailing bytes the opcode
//! needs. Faulting instructions leave no trace beyond the PC advance.

pub mod alu;
pub mod fault;
pub mod machine;
pub mod memory;
pub mod opcode;
pub mod region;
pub mod register;
pub mod vm;

#[cfg(test)]
mod property_tests;
