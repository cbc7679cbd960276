use std::fs;
use std::path::Path;

/// A region of bytes that can be copied into the memory image
pub trait Region {
  fn bytes(&self) -> &[u8];
}

/// A BIOS image: the first program a machine runs, loaded at a fixed offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bios {
  bytes: Vec<u8>,
}

impl Bios {
  /// Read an image from disk
  pub fn read<P>(path: P) -> std::io::Result<Self>
  where
    P: AsRef<Path>,
  {
    let bytes = fs::read(path)?;
    Ok(Self { bytes })
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

impl From<Vec<u8>> for Bios {
  fn from(bytes: Vec<u8>) -> Self {
    Self { bytes }
  }
}

impl Region for Bios {
  fn bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl Region for [u8] {
  fn bytes(&self) -> &[u8] {
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_vec() {
    let bios: Bios = vec![0xFF, 0x00, 0x00].into();
    assert_eq!(bios.len(), 3);
    assert_eq!(bios.bytes(), &[0xFF, 0x00, 0x00]);
  }

  #[test]
  fn read_missing_file() {
    let err = Bios::read("/definitely/not/a/bios.bin").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
  }

  #[test]
  fn read_from_disk() {
    let path = std::env::temp_dir().join(format!("softcpu-bios-{}.bin", std::process::id()));
    fs::write(&path, [0x00, 0x01, 0x04, 0x2A, 0xFF, 0x00, 0x00]).unwrap();
    let bios = Bios::read(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(bios.bytes(), &[0x00, 0x01, 0x04, 0x2A, 0xFF, 0x00, 0x00]);
  }
}
