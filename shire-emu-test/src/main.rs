use clap::Parser;
use shire_emu_core::system::{SocConfig, SocVariant, System};
use shire_emu_core::topology::{COMPUTE_SHIRE_COUNT, IO_SHIRE_SP};
use shire_emu_core::mmu::Mmu;
use shire_emu_core::topology::HartIndex;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Signature file to output signature to (riscv-arch-test format)
    #[arg(long, short)]
    signature: Option<PathBuf>,
    /// Bitmask of compute shires to populate
    #[arg(long, default_value_t = 1)]
    shires: u64,
    /// Bitmask of minions to populate per shire
    #[arg(long, default_value_t = 1)]
    minions: u64,
    /// Populate both threads of each minion
    #[arg(long, default_value_t = false)]
    multithreaded: bool,
    /// Bytes of DRAM to install (power of two)
    #[arg(long, default_value_t = 1 << 30)]
    dram_size: u64,
    /// Model the Erbium single-tile variant instead of the full chip
    #[arg(long, default_value_t = false)]
    erbium: bool,
    /// Override the reset PC for every neighborhood
    #[arg(long)]
    reset_pc: Option<u64>,
    /// Maximum scheduler passes before giving up (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_passes: u64,
    /// Elf file to run
    elf: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let variant = if args.erbium {
        SocVariant::Erbium
    } else {
        SocVariant::EtSoc1
    };
    let mut system = System::new(SocConfig {
        variant,
        dram_size: args.dram_size,
    });

    let shire_count = if args.erbium { 1 } else { COMPUTE_SHIRE_COUNT };
    for shire in 0..shire_count {
        if args.shires & (1 << shire) != 0 {
            system.config_simulated_harts(shire, args.minions, args.multithreaded, true);
        }
    }
    if !args.erbium {
        system.config_simulated_harts(IO_SHIRE_SP, 0, false, false);
    }

    let entry = match system.load_elf_path(&args.elf) {
        Ok(entry) => entry,
        Err(err) => {
            eprintln!("failed to load {}: {err}", args.elf.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(reset_pc) = args.reset_pc {
        for neigh in 0..shire_count * 4 {
            system.config_reset_pc(neigh, reset_pc);
        }
    } else {
        for neigh in 0..shire_count * 4 {
            system.config_reset_pc(neigh, entry);
        }
    }
    system.cold_reset();

    if args.max_passes == 0 {
        system.run();
    } else {
        for _ in 0..args.max_passes {
            if system.get_emu_done() {
                break;
            }
            system.step_pass();
        }
        if !system.get_emu_done() {
            eprintln!("gave up after {} passes", args.max_passes);
            return ExitCode::FAILURE;
        }
    }

    if let Some(path) = &args.signature {
        if let Err(err) = dump_signature(&mut system, &args.elf, path) {
            eprintln!("failed to write signature: {err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::from(system.exit_code() as u8)
}

/// Dumps the memory between the `begin_signature` and `end_signature` symbols, one 32-bit
/// word per line.
fn dump_signature(
    system: &mut System,
    elf_path: &PathBuf,
    out_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = std::fs::read(elf_path)?;
    let elf = goblin_parse(&image)?;
    let mut signature_start = None;
    let mut signature_end = None;
    for sym in elf.syms.iter() {
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name == "begin_signature" {
            signature_start = Some(sym.st_value);
        } else if name == "end_signature" {
            signature_end = Some(sym.st_value);
        }
    }
    let start = signature_start.ok_or("missing symbol `begin_signature`")?;
    let end = signature_end.ok_or("missing symbol `end_signature`")?;
    assert!(start % 4 == 0 && end % 4 == 0 && start <= end);

    // Read through the first populated hart's address view, so the dump sees exactly what
    // the guest saw.
    let hart = first_populated_hart(system).ok_or("no populated harts")?;
    let mut file = File::create(out_path)?;
    let mut mmu = Mmu::new(system, hart);
    for address in (start..end).step_by(4) {
        let word = mmu
            .load32(address)
            .map_err(|err| format!("guest memory error reading signature: {err}"))?;
        writeln!(file, "{word:08x}")?;
    }
    Ok(())
}

fn goblin_parse(image: &[u8]) -> Result<goblin::elf::Elf<'_>, goblin::error::Error> {
    goblin::elf::Elf::parse(image)
}

fn first_populated_hart(system: &System) -> Option<HartIndex> {
    system
        .hart_indices()
        .into_iter()
        .find(|&index| {
            !matches!(
                system.hart(index).lifecycle,
                shire_emu_core::hart::Lifecycle::Nonexistent
            )
        })
}
