use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::process;
use std::sync::Arc;

mod banked_memory;
mod clock;
mod config;
mod console;
mod cpu;
mod diagnostics;
mod disk;
mod drive_table;
mod error;
mod keyboard_unix;
mod machine;
mod mpm_sys;
mod runner;
mod session;
#[cfg(test)]
mod session_test;
mod xios;
mod xios_call;

use self::clock::SystemClock;
use self::config::{Config, CONFIG_FILE};
use self::console::ConsolePool;
use self::cpu::Z80;
use self::drive_table::drive_letter;
use self::error::EmuError;
use self::keyboard_unix::{Command, Keyboard};
use self::runner::{BatchOutcome, Runner};
use self::session::{Session, TraceFlags};

#[derive(Parser)]
#[command(
    name = "mpmii",
    about = "MP/M II emulator for the terminal",
    long_about = "mpmii - MP/M II Emulator\n\n\
        Runs a banked Z80 MP/M II system with the XIOS serviced by the host.\n\
        Boots MPM.SYS directly, a memory snapshot, or the boot sector of drive A.\n\
        Configuration is loaded from mpmii.toml; command-line arguments override config file settings.",
    version,
)]
struct Cli {
    /// Mount a disk image, as DRIVE:FILE (e.g. A:system.img). Repeatable
    #[arg(short = 'd', long = "disk", value_name = "DRIVE:FILE")]
    disks: Vec<String>,

    /// Mount a disk image read-only, as DRIVE:FILE. Repeatable
    #[arg(short = 'r', long = "read-only-disk", value_name = "DRIVE:FILE")]
    read_only_disks: Vec<String>,

    /// Use the host terminal as a console
    #[arg(short = 'l', long)]
    local: bool,

    /// Stop after SECS seconds
    #[arg(short = 't', long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Number of memory banks (1-16)
    #[arg(long, value_name = "N")]
    banks: Option<usize>,

    /// Memory snapshot to load at 0x0000 and start at 0x0100
    #[arg(long, value_name = "FILE")]
    image: Option<String>,

    /// MPM.SYS to load directly, without MPMLDR
    #[arg(long, value_name = "FILE")]
    mpm_sys: Option<String>,

    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = CONFIG_FILE)]
    config: String,

    /// Trace CPU instruction execution
    #[arg(short = 'c', long)]
    cpu_trace: bool,

    /// Trace I/O port access
    #[arg(short = 'i', long)]
    trace_io: bool,

    /// Trace XIOS calls
    #[arg(short = 'x', long)]
    trace_xios: bool,

    /// Trace disk record transfers
    #[arg(long)]
    trace_disk: bool,

    /// Enable all trace options
    #[arg(long)]
    trace_all: bool,

    /// Run memory diagnostics then exit
    #[arg(long)]
    diagnostics: bool,
}

fn main() {
    let cli = Cli::parse();

    let trace = TraceFlags {
        io: cli.trace_io || cli.trace_all,
        xios: cli.trace_xios || cli.trace_all,
        disk: cli.trace_disk || cli.trace_all,
    };
    let trace_cpu = cli.cpu_trace || cli.trace_all;
    let any_trace = trace.io || trace.xios || trace.disk || trace_cpu;

    env_logger::Builder::new()
        .filter_level(if any_trace {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_env("RUST_LOG")
        .init();

    if let Err(e) = run(cli, trace, trace_cpu) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli, trace: TraceFlags, trace_cpu: bool) -> Result<(), EmuError> {
    // Load configuration from file, then apply CLI overrides
    let mut config = Config::load_from_path(&cli.config);
    config.apply_cli_overrides(
        cli.banks,
        cli.image.as_deref(),
        cli.mpm_sys.as_deref(),
        cli.local,
        cli.timeout,
    );
    for spec in &cli.disks {
        config.add_disk_spec(spec, false)?;
    }
    for spec in &cli.read_only_disks {
        config.add_disk_spec(spec, true)?;
    }

    info!("mpmii - MP/M II Emulator");
    info!("Configuration: {}", config.get_description());

    let consoles = Arc::new(ConsolePool::new());
    let mut session = Session::new(config.banks, Arc::clone(&consoles), trace)?;

    if cli.diagnostics {
        let results = diagnostics::run_diagnostics(session.memory_mut());
        let all_passed = diagnostics::print_results(&results);
        process::exit(if all_passed { 0 } else { 1 });
    }

    for mount in config.mounts()? {
        session
            .drives
            .mount(mount.drive, &mount.path, mount.read_only)
            .map_err(|source| EmuError::Mount {
                drive: drive_letter(mount.drive),
                path: mount.path.clone().into(),
                source,
            })?;
    }

    let mut cpu = Z80::new(trace_cpu);
    if let Some(path) = &config.mpm_sys {
        mpm_sys::load(&mut session, &mut cpu, path)?;
    } else if let Some(path) = &config.memory_image {
        session.load_image(path, &mut cpu)?;
    } else {
        session.boot_from_disk(&mut cpu)?;
    }

    let mut keyboard = if config.local_console {
        consoles.set_local(true);
        match consoles.get(config.local_console_index) {
            Some(console) => {
                info!("Local console is console {}", console.id());
                info!("F2 shows the status, F4 quits");
            }
            None => warn!(
                "No console {}, keys will be dropped",
                config.local_console_index
            ),
        }
        Some(Keyboard::new())
    } else {
        None
    };

    let mut runner = Runner::new(cpu, SystemClock::new(), config.runner_config());
    let local_index = config.local_console_index;
    let outcome = runner.run(&mut session, |session| {
        let Some(keyboard) = keyboard.as_mut() else {
            return true;
        };
        if let Some(console) = session.consoles.get(local_index) {
            keyboard.poll(console);
        }

        let mut keep_running = true;
        for command in keyboard.commands.drain(..) {
            match command {
                Command::Quit => keep_running = false,
                Command::ShowStatus => show_status(session),
            }
        }
        keep_running
    });

    // Restore the terminal before the final report
    drop(keyboard);
    for drive in 0..drive_table::MAX_DRIVES {
        session.drives.unmount(drive);
    }
    info!(
        "{} instructions, {} ticks, {} seconds",
        runner.instructions(),
        session.xios.ticks(),
        session.xios.seconds()
    );
    if outcome == BatchOutcome::Deadlocked {
        let sp = runner.cpu.sp();
        warn!(
            "PC=0x{:04x} SP=0x{:04x} (top 0x{:04x})",
            runner.cpu.pc(),
            sp,
            session.machine.peek16(sp)
        );
    }
    Ok(())
}

fn show_status(session: &Session) {
    info!(
        "Bank {} of {}, clock {}, {} ticks, XIOS at 0x{:04x}, last signal 0x{:02x}",
        session.memory().current_bank(),
        session.memory().num_banks(),
        if session.xios.clock_enabled() { "on" } else { "off" },
        session.xios.ticks(),
        session.xios.base(),
        session.machine.last_signal()
    );
    info!(
        "Consoles: {} active, {} connected",
        session.consoles.active_consoles(),
        session.consoles.connected_count()
    );
    info!("Current drive {}:", drive_letter(session.drives.current_drive()));
    for drive in 0..drive_table::MAX_DRIVES {
        if let Some(disk) = session.drives.get(drive) {
            let dpb = disk.dpb();
            info!(
                "  {}: {} ({} blocks, {} directory entries)",
                drive_letter(drive),
                disk.info(),
                dpb.dsm as u32 + 1,
                dpb.drm as u32 + 1
            );
        }
    }
}
