use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use softcpu::machine::{
  LoadError, Machine, MachineConfig, BAD_CONFIG_EXIT, DEFAULT_BIOS_OFFSET, DEFAULT_MEMORY_SIZE,
};
use softcpu::region::Bios;
use softcpu::vm::FaultPolicy;

/// Boot a BIOS image and run it until every core halts
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
  /// BIOS image to load
  #[arg(default_value = "std_bios.bin")]
  bios: PathBuf,

  /// Size of the memory image in bytes
  #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE)]
  memory_size: usize,

  /// Where the BIOS is copied to, and where core 0 starts
  #[arg(long, default_value_t = DEFAULT_BIOS_OFFSET)]
  bios_offset: u64,

  #[arg(long, default_value_t = 1)]
  cores: usize,

  /// Stop after this many rounds, even if a core is still running
  #[arg(long)]
  max_steps: Option<u64>,

  /// Stop a core at its first fault instead of skipping the instruction
  #[arg(long)]
  halt_on_fault: bool,

  /// Wait for Enter before every round
  #[arg(long)]
  interactive: bool,

  /// Print every core's registers when the run ends
  #[arg(long)]
  dump: bool,

  /// Trace every instruction
  #[arg(short, long)]
  verbose: bool,
}

impl Args {
  fn config(&self) -> MachineConfig {
    MachineConfig {
      memory_size: self.memory_size,
      bios_offset: self.bios_offset,
      cores: self.cores,
      fault_policy: if self.halt_on_fault {
        FaultPolicy::Halt
      } else {
        FaultPolicy::Skip
      },
    }
  }
}

// help and version requests are not failures; clap prints them and exits 0
fn parse_failure(err: &clap::Error) -> Option<u8> {
  match err.kind() {
    ErrorKind::DisplayHelp
    | ErrorKind::DisplayVersion
    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => None,
    _ => Some(BAD_CONFIG_EXIT),
  }
}

fn main() -> ExitCode {
  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(err) => match parse_failure(&err) {
      Some(code) => {
        let _ = err.print();
        return ExitCode::from(code);
      }
      None => err.exit(),
    },
  };

  let default = if args.verbose { "trace" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let mut machine = match boot(&args) {
    Ok(machine) => machine,
    Err(err) => {
      tracing::error!("{err}");
      return ExitCode::from(err.exit_code());
    }
  };

  if args.interactive {
    run_interactive(&mut machine, args.max_steps);
  } else {
    machine.run(args.max_steps);
  }

  if args.dump {
    for core in machine.cores() {
      println!("core {} [{}]", core.id(), core.flags());
      print!("{}", core.registers());
    }
  }
  ExitCode::SUCCESS
}

fn boot(args: &Args) -> Result<Machine, LoadError> {
  let bios = Bios::read(&args.bios).map_err(|source| LoadError::Io {
    path: args.bios.clone(),
    source,
  })?;
  let mut machine = Machine::new(args.config())?;
  machine.load(&bios)?;
  Ok(machine)
}

// one round per line of stdin; EOF stops early
fn run_interactive(machine: &mut Machine, max_rounds: Option<u64>) {
  let mut lines = io::stdin().lock().lines();
  let mut rounds = 0;
  while machine.is_running() && max_rounds.map_or(true, |max| rounds < max) {
    if !matches!(lines.next(), Some(Ok(_))) {
      break;
    }
    machine.step();
    rounds += 1;
    for core in machine.cores() {
      println!("core {} pc {:#x} [{}]", core.id(), core.registers().pc(), core.flags());
    }
  }
  tracing::info!(rounds, "interactive run finished");
}
