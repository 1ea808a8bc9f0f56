//! Blunux installer - main entry point

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};
use std::path::{Path, PathBuf};

use blunux_installer::cli::{Cli, Commands};
use blunux_installer::config::{Configuration, InstallOptions};
use blunux_installer::engine::storage::{plan_partitioning, plan_storage};
use blunux_installer::executor::{DryRunExecutor, Executor, SystemExecutor};
use blunux_installer::hardware::{parse_disk_list, resolve_firmware_mode, HardwareInfo};
use blunux_installer::install_state::InstallStage;
use blunux_installer::installer::{effective_boot_mode, InstallPlan, Installer};
use blunux_installer::process_guard::{init_signal_handlers, InterruptFlag};
use blunux_installer::progress::ConsoleProgress;
use blunux_installer::tools::disk::Lsblk;
use blunux_installer::types::BootMode;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() {
    init_logger();
    info!("Blunux installer starting up");

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed: {:?}", cli);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install {
            config,
            disk,
            mount_point,
            firmware,
        } => run_install(&config, disk, mount_point, firmware, cli.dry_run),
        Commands::Validate { config } => run_validate(&config),
        Commands::Plan {
            disk,
            firmware,
            config,
        } => run_plan(&disk, firmware, config.as_deref()),
        Commands::Disks => run_disks(),
    }
}

fn load_config(path: &Path) -> Result<Configuration> {
    info!("Loading configuration from {:?}", path);
    let config = Configuration::load_from_file(path)?;
    config.validate().context("Configuration is invalid")?;
    Ok(config)
}

fn run_install(
    config_path: &Path,
    disk: Option<String>,
    mount_point: PathBuf,
    firmware: BootMode,
    dry_run: bool,
) -> Result<()> {
    let mut config = Configuration::load_from_file(config_path)?;
    if let Some(disk) = disk {
        info!("Target disk overridden on the command line: {}", disk);
        config.install.target_disk = disk;
    }
    config.validate().context("Configuration is invalid")?;

    if !dry_run && !nix::unistd::Uid::effective().is_root() {
        bail!("Installation must be run as root (use --dry-run to preview)");
    }

    let options = InstallOptions {
        mount_point,
        boot_mode: firmware,
        ..InstallOptions::default()
    };
    let hardware = HardwareInfo::detect(effective_boot_mode(&config, &options));

    let interrupt = InterruptFlag::new();
    if let Err(e) = init_signal_handlers(interrupt.clone()) {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }

    let mut system = SystemExecutor::new();
    let mut preview = DryRunExecutor::preview();
    let exec: &mut dyn Executor = if dry_run {
        info!("Dry-run mode: nothing will be executed or written");
        &mut preview
    } else {
        &mut system
    };
    let mut progress = ConsoleProgress::stdout();

    let installer = Installer::new(config, options, hardware, exec, &mut progress).with_interrupt(interrupt);
    println!("{}", installer.plan());

    match installer.run() {
        Ok(report) => {
            println!("{}", report);
            if !dry_run {
                println!("Remove the installation medium and reboot.");
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!(
                "Completed {} of {} stages before {} failed.",
                failure.completed.len(),
                InstallStage::total(),
                failure.stage
            );
            if failure.source.is_destructive() {
                eprintln!("The target disk may be left partially written.");
            } else {
                eprintln!("The target is still mounted for inspection.");
            }
            Err(anyhow!(failure.to_string()))
        }
    }
}

fn run_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    info!("Configuration validation successful");
    println!("✓ Configuration file is valid: {:?}", config_path);
    println!(
        "  {} -> {} ({}, {} bootloader, kernel {})",
        config.install.hostname,
        config.install.target_disk,
        if config.install.encryption { "encrypted" } else { "unencrypted" },
        config.install.bootloader,
        config.kernel
    );
    Ok(())
}

fn run_plan(disk: &str, firmware: BootMode, config_path: Option<&Path>) -> Result<()> {
    let firmware = resolve_firmware_mode(firmware);
    let plan = plan_partitioning(disk, firmware.partition_scheme());
    println!("{}", plan.summary());

    if let Some(path) = config_path {
        let mut config = load_config(path)?;
        config.install.target_disk = disk.to_string();

        let install = InstallPlan::resolve(&config, firmware);
        let encryption = config
            .install
            .encryption
            .then_some(install.strategy.key_derivation());

        let ops = plan_storage(&plan.layout, encryption, Path::new("/mnt"));
        println!("  Storage ({}):", ops.len());
        for (i, op) in ops.iter().enumerate() {
            println!("    {}. {}", i + 1, op);
        }

        println!("{}", install);
        for warning in &install.warnings {
            println!("warning: {}", warning);
        }
    }
    Ok(())
}

fn run_disks() -> Result<()> {
    let mut exec = SystemExecutor::new();
    let exec: &mut dyn Executor = &mut exec;
    let output = exec.run_tool(&Lsblk::Disks).context("Failed to run lsblk")?;
    output.ensure_success("lsblk").context("Failed to enumerate disks")?;

    let disks = parse_disk_list(&output.stdout);
    if disks.is_empty() {
        bail!("No disks found");
    }
    for disk in disks {
        println!("{}", disk);
    }
    Ok(())
}
