use std::io;
use std::path::PathBuf;

use crate::memory::Memory;
use crate::region::Region;
use crate::vm::{Core, FaultPolicy};

/// Where the BIOS goes when nothing else is configured.
pub const DEFAULT_BIOS_OFFSET: u64 = 1024;
/// 1 MiB.
pub const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;
/// Exit status for a configuration that cannot describe a machine.
pub const BAD_CONFIG_EXIT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
  pub memory_size: usize,
  pub bios_offset: u64,
  pub cores: usize,
  pub fault_policy: FaultPolicy,
}

impl Default for MachineConfig {
  fn default() -> Self {
    Self {
      memory_size: DEFAULT_MEMORY_SIZE,
      bios_offset: DEFAULT_BIOS_OFFSET,
      cores: 1,
      fault_policy: FaultPolicy::Skip,
    }
  }
}

/// Anything that stops a machine from getting to its first step.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
  #[error("cannot read BIOS image {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("BIOS image of {len} bytes does not fit at offset {offset:#x} in {size} bytes of memory")]
  TooLarge { len: usize, offset: u64, size: usize },

  #[error("a machine needs at least one core")]
  NoCores,
}

impl LoadError {
  /// The process exit status for this error; each kind gets its own.
  pub fn exit_code(&self) -> u8 {
    match self {
      Self::Io { .. } => 2,
      Self::TooLarge { .. } => 3,
      Self::NoCores => BAD_CONFIG_EXIT,
    }
  }
}

/// How a [`Machine::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  /// Round-robin passes over the cores.
  pub rounds: u64,
  /// Instructions attempted across all cores.
  pub steps: u64,
  pub faults: u64,
  /// Every core had stopped when the run ended.
  pub halted: bool,
}

/// The whole machine: one memory image shared by every core.
///
/// Cores take turns, one instruction each, in index order. Nothing here runs
/// two cores at once, which is the only reason sharing the image is sound.
#[derive(Debug)]
pub struct Machine {
  config: MachineConfig,
  memory: Memory,
  cores: Vec<Core>,
}

impl Machine {
  /// Allocate zeroed memory and cleared, halted cores.
  pub fn new(config: MachineConfig) -> Result<Self, LoadError> {
    if config.cores == 0 {
      return Err(LoadError::NoCores);
    }
    let cores = (0..config.cores)
      .map(|id| {
        let mut core = Core::new(id);
        core.set_fault_policy(config.fault_policy);
        core
      })
      .collect();
    tracing::debug!(memory = config.memory_size, cores = config.cores, "machine allocated");
    Ok(Self {
      config,
      memory: Memory::new(config.memory_size),
      cores,
    })
  }

  pub fn memory(&self) -> &Memory {
    &self.memory
  }

  pub fn memory_mut(&mut self) -> &mut Memory {
    &mut self.memory
  }

  pub fn cores(&self) -> &[Core] {
    &self.cores
  }

  pub fn core(&self, index: usize) -> Option<&Core> {
    self.cores.get(index)
  }

  /// Copy `bios` in at the configured offset and boot core 0 on it.
  pub fn load<R>(&mut self, bios: &R) -> Result<(), LoadError>
  where
    R: Region + ?Sized,
  {
    let offset = self.config.bios_offset;
    let bytes = bios.bytes();
    self.memory.load(offset, bytes).map_err(|_| LoadError::TooLarge {
      len: bytes.len(),
      offset,
      size: self.memory.len(),
    })?;
    tracing::debug!(len = bytes.len(), offset, "BIOS loaded");
    self.start_core(0, offset);
    Ok(())
  }

  /// Boot core `index` at `entry`; `None` if there is no such core.
  pub fn start_core(&mut self, index: usize, entry: u64) -> Option<()> {
    let core = self.cores.get_mut(index)?;
    core.boot(entry);
    tracing::debug!(core = index, entry, "core started");
    Some(())
  }

  pub fn is_running(&self) -> bool {
    self.cores.iter().any(Core::is_running)
  }

  /// One round: every running core executes one instruction, in index order.
  pub fn step(&mut self) {
    for core in self.cores.iter_mut() {
      core.step(&mut self.memory);
    }
  }

  /// Step until every core has halted, or `max_rounds` rounds have passed.
  pub fn run(&mut self, max_rounds: Option<u64>) -> RunSummary {
    let mut rounds = 0;
    while self.is_running() && max_rounds.map_or(true, |max| rounds < max) {
      self.step();
      rounds += 1;
    }
    let summary = RunSummary {
      rounds,
      steps: self.cores.iter().map(Core::steps).sum(),
      faults: self.cores.iter().map(Core::fault_count).sum(),
      halted: !self.is_running(),
    };
    tracing::info!(
      rounds = summary.rounds,
      steps = summary.steps,
      faults = summary.faults,
      halted = summary.halted,
      "run finished"
    );
    summary
  }
}
