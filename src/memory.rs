use std::ops::Range;

use crate::fault::Fault;
use crate::register::Width;

/// How an encoded address is turned into an index into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
  /// Relative to the LO register.
  Local,
  /// Used as-is.
  Global,
}

impl Addressing {
  /// Apply the relocation base `lo` to `address`, `None` on overflow.
  pub fn resolve(self, address: u64, lo: u64) -> Option<u64> {
    match self {
      Self::Local => address.checked_add(lo),
      Self::Global => Some(address),
    }
  }
}

/// The flat byte image shared by every core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
  bytes: Vec<u8>,
}

impl Memory {
  /// A zero-filled image of `size` bytes.
  pub fn new(size: usize) -> Self {
    Self { bytes: vec![0; size] }
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.bytes
  }

  /// Bounds-check an access of `len` bytes starting at `address`.
  pub fn range(&self, address: u64, len: usize) -> Result<Range<usize>, Fault> {
    let fault = || Fault::Memory {
      address,
      len,
      size: self.bytes.len(),
    };
    let start = usize::try_from(address).map_err(|_| fault())?;
    let end = start.checked_add(len).ok_or_else(fault)?;
    if end > self.bytes.len() {
      return Err(fault());
    }
    Ok(start..end)
  }

  /// Little-endian read of `width` bytes, zero-extended.
  pub fn read(&self, width: Width, address: u64) -> Result<u128, Fault> {
    let range = self.range(address, width.bytes())?;
    let mut buf = [0u8; 16];
    buf[..width.bytes()].copy_from_slice(&self.bytes[range]);
    Ok(u128::from_le_bytes(buf))
  }

  /// Little-endian write of the low `width` bytes of `value`.
  pub fn write(&mut self, width: Width, address: u64, value: u128) -> Result<(), Fault> {
    let range = self.range(address, width.bytes())?;
    self.bytes[range].copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
    Ok(())
  }

  /// Copy raw bytes in at `address`.
  pub fn load(&mut self, address: u64, data: &[u8]) -> Result<(), Fault> {
    let range = self.range(address, data.len())?;
    self.bytes[range].copy_from_slice(data);
    Ok(())
  }

  /// Read `len` raw bytes starting at `address`.
  pub fn slice(&self, address: u64, len: usize) -> Result<&[u8], Fault> {
    let range = self.range(address, len)?;
    Ok(&self.bytes[range])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_is_zeroed() {
    let memory = Memory::new(64);
    assert_eq!(memory.len(), 64);
    assert!(memory.as_slice().iter().all(|b| *b == 0));
  }

  #[test]
  fn little_endian() {
    let mut memory = Memory::new(32);
    memory.write(Width::W32, 4, 0xDEAD_BEEF).unwrap();
    assert_eq!(memory.slice(4, 4).unwrap(), &[0xEF, 0xBE, 0xAD, 0xDE]);
    assert_eq!(memory.read(Width::W16, 4).unwrap(), 0xBEEF);
    assert_eq!(memory.read(Width::W64, 4).unwrap(), 0xDEAD_BEEF);
  }

  #[test]
  fn write_only_touches_width() {
    let mut memory = Memory::new(32);
    memory.load(0, &[0xFF; 32]).unwrap();
    memory.write(Width::W16, 8, 0x1234_5678).unwrap();
    assert_eq!(memory.slice(7, 4).unwrap(), &[0xFF, 0x78, 0x56, 0xFF]);
  }

  #[test]
  fn full_width() {
    let mut memory = Memory::new(16);
    let value = 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10;
    memory.write(Width::W128, 0, value).unwrap();
    assert_eq!(memory.read(Width::W128, 0).unwrap(), value);
  }

  #[test]
  fn out_of_bounds() {
    let mut memory = Memory::new(16);
    assert_eq!(
      memory.read(Width::W64, 9),
      Err(Fault::Memory { address: 9, len: 8, size: 16 })
    );
    assert!(memory.write(Width::W8, 16, 1).is_err());
    assert!(memory.read(Width::W8, u64::MAX).is_err());
    assert!(memory.read(Width::W64, 8).is_ok());
  }

  #[test]
  fn failed_write_leaves_image_untouched() {
    let mut memory = Memory::new(16);
    assert!(memory.write(Width::W64, 12, u128::MAX).is_err());
    assert!(memory.as_slice().iter().all(|b| *b == 0));
  }

  #[test]
  fn addressing() {
    assert_eq!(Addressing::Local.resolve(0x10, 0x400), Some(0x410));
    assert_eq!(Addressing::Global.resolve(0x10, 0x400), Some(0x10));
    assert_eq!(Addressing::Local.resolve(u64::MAX, 1), None);
  }
}
