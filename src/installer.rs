//! Pipeline driver
//!
//! Runs the nine install stages in order against one `Executor`, reports each
//! stage to a `ProgressSink` and stops at the first fatal failure. Everything
//! that can be decided without touching the machine (partition scheme, boot
//! strategy, kernel substitution, package set) is resolved up front into an
//! `InstallPlan`.

use std::fmt;

use crate::config::{Configuration, InstallOptions};
use crate::engine::storage::{self, MountState, PartitionLayout};
use crate::error::{InstallError, Result, StepFailure};
use crate::executor::Executor;
use crate::hardware::{FirmwareMode, HardwareInfo};
use crate::install_state::{InstallStage, InstallerContext, StepPolicy};
use crate::logic::boot::{self, BootStrategy};
use crate::logic::drivers::{self, Driver};
use crate::logic::resolver::{resolve_packages, KernelPlan};
use crate::logic::{base, finalize, locale, system, users, Warnings};
use crate::process_guard::InterruptFlag;
use crate::progress::ProgressSink;
use crate::types::{BootMode, PartitionScheme};

/// Firmware override in effect: command line first, then configuration
pub fn effective_boot_mode(config: &Configuration, options: &InstallOptions) -> BootMode {
    match options.boot_mode {
        BootMode::Auto => config.install.boot_mode,
        forced => forced,
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Decisions taken before the first side effect
#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    pub firmware: FirmwareMode,
    pub layout: PartitionLayout,
    pub strategy: BootStrategy,
    pub kernel: KernelPlan,
    /// Base package set, sorted and deduplicated
    pub packages: Vec<String>,
    pub warnings: Vec<String>,
}

impl InstallPlan {
    pub fn resolve(config: &Configuration, firmware: FirmwareMode) -> Self {
        let scheme = firmware.partition_scheme();
        let layout = PartitionLayout::for_disk(config.install.target_disk.trim(), scheme);
        let mut warnings = Vec::new();

        let (strategy, fallback) = BootStrategy::resolve(config.install.bootloader, scheme);
        warnings.extend(fallback);

        let kernel = KernelPlan::resolve(config.kernel);
        if let Some(deferred) = kernel.deferred {
            warnings.push(format!(
                "{} is not in the official repositories; installing {} now, \
                 run ~/setup-linux-bore.sh after first boot for {}",
                deferred.package(),
                kernel.installed.package(),
                deferred.package()
            ));
        }

        let packages = resolve_packages(config, &kernel, strategy);

        Self {
            firmware,
            layout,
            strategy,
            kernel,
            packages,
            warnings,
        }
    }

    pub fn scheme(&self) -> PartitionScheme {
        self.layout.scheme
    }
}

impl fmt::Display for InstallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Firmware:   {}", self.firmware)?;
        writeln!(f, "Layout:     {}", self.layout)?;
        writeln!(f, "Boot:       {}", self.strategy)?;
        writeln!(f, "Kernel:     {}", self.kernel)?;
        write!(f, "Packages:   {}", self.packages.len())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub completed: Vec<InstallStage>,
    pub warnings: Vec<String>,
    pub strategy: BootStrategy,
    pub kernel: KernelPlan,
    pub drivers: Vec<Driver>,
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Installation complete ({} of {} stages)",
            self.completed.len(),
            InstallStage::total()
        )?;
        writeln!(f, "Boot:   {}", self.strategy)?;
        write!(f, "Kernel: {}", self.kernel)?;
        if !self.drivers.is_empty() {
            let names: Vec<String> = self.drivers.iter().map(|d| d.to_string()).collect();
            write!(f, "\nDrivers: {}", names.join(", "))?;
        }
        for warning in &self.warnings {
            write!(f, "\nwarning: {warning}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Installer
// ============================================================================

/// One installation run
pub struct Installer<'a> {
    config: Configuration,
    options: InstallOptions,
    hardware: HardwareInfo,
    exec: &'a mut dyn Executor,
    progress: &'a mut dyn ProgressSink,
    interrupt: InterruptFlag,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: Configuration,
        options: InstallOptions,
        hardware: HardwareInfo,
        exec: &'a mut dyn Executor,
        progress: &'a mut dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            options,
            hardware,
            exec,
            progress,
            interrupt: InterruptFlag::new(),
        }
    }

    /// Stop between stages once `flag` is raised
    pub fn with_interrupt(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn plan(&self) -> InstallPlan {
        InstallPlan::resolve(&self.config, self.hardware.firmware)
    }

    /// Run every stage. On a fatal failure the target is left mounted.
    pub fn run(self) -> std::result::Result<InstallReport, StepFailure> {
        let plan = self.plan();
        let Installer {
            config,
            options,
            hardware,
            exec,
            progress,
            interrupt,
        } = self;

        log::info!("Installing to {} ({})", plan.layout.disk, hardware);
        let mut pipeline = Pipeline {
            exec,
            progress,
            interrupt,
            ctx: InstallerContext::new(),
            warnings: Warnings::new(),
        };
        for warning in &plan.warnings {
            pipeline.warnings.warn(warning.clone());
            pipeline.progress.warning(warning);
        }

        let (layout, mount) = pipeline.fatal(InstallStage::PreparingDisk, |exec, _| {
            prepare_disk(exec, &config, &options, &plan)
        })?;

        pipeline.fatal(InstallStage::InstallingBaseSystem, |exec, _| {
            base::install_base_system(exec, &mount, &plan.packages)
        })?;

        pipeline.fatal(InstallStage::GeneratingFstab, |exec, _| {
            base::generate_fstab(exec, &mount)
        })?;

        pipeline.fatal(InstallStage::ConfiguringSystem, |exec, warnings| {
            system::configure_system(exec, &config, &mount, hardware.ram_mib, warnings)
        })?;

        let detected = pipeline
            .best_effort(InstallStage::DetectingDrivers, |exec, _| {
                drivers::install_drivers(exec, &mount)
            })?
            .unwrap_or_default();

        pipeline.fatal(InstallStage::ConfiguringLocale, |exec, warnings| {
            locale::configure_locale(exec, &config, &mount, warnings)
        })?;

        pipeline.fatal(InstallStage::ConfiguringUsers, |exec, _| {
            users::configure_users(exec, &config, &mount)
        })?;

        let outcome = pipeline.fatal(InstallStage::InstallingBootloader, |exec, _| {
            boot::install_bootloader(exec, &config, &layout, &mount, &plan.kernel, plan.strategy)
        })?;

        pipeline.fatal(InstallStage::Finalizing, |exec, warnings| {
            finalize::finalize(exec, &config, &mount, &plan.kernel, &outcome, warnings)
        })?;

        pipeline
            .ctx
            .finish()
            .map_err(|e| StepFailure::new(InstallStage::Finalizing, e.into()))?;

        log::info!("Installation complete");
        Ok(InstallReport {
            completed: pipeline.ctx.completed_stages(),
            warnings: pipeline.warnings.into_vec(),
            strategy: outcome.strategy,
            kernel: plan.kernel,
            drivers: detected,
        })
    }
}

/// Stage 1: clear and partition the disk, format, mount
fn prepare_disk(
    exec: &mut dyn Executor,
    config: &Configuration,
    options: &InstallOptions,
    plan: &InstallPlan,
) -> Result<(PartitionLayout, MountState)> {
    config.validate()?;
    config.require_encryption_secret()?;

    let encrypted = config.install.encryption;
    let layout = storage::plan_and_partition(exec, &plan.layout.disk, plan.scheme(), options.settle_delay)?;
    storage::format(
        exec,
        &layout,
        encrypted.then_some(&config.install.encryption_password),
        plan.strategy.key_derivation(),
    )?;
    let mount = storage::mount(exec, &layout, encrypted, &options.mount_point)?;

    Ok((layout, mount))
}

/// Stage bookkeeping shared by every step
struct Pipeline<'a> {
    exec: &'a mut dyn Executor,
    progress: &'a mut dyn ProgressSink,
    interrupt: InterruptFlag,
    ctx: InstallerContext,
    warnings: Warnings,
}

impl Pipeline<'_> {
    /// Run a stage whose failure stops the pipeline
    fn fatal<T>(
        &mut self,
        stage: InstallStage,
        body: impl FnOnce(&mut dyn Executor, &mut Warnings) -> Result<T>,
    ) -> std::result::Result<T, StepFailure> {
        self.execute(stage, body)?
            .map_err(|e| StepFailure::new(stage, e))
    }

    /// Run a stage whose failure only becomes a warning
    fn best_effort<T>(
        &mut self,
        stage: InstallStage,
        body: impl FnOnce(&mut dyn Executor, &mut Warnings) -> Result<T>,
    ) -> std::result::Result<Option<T>, StepFailure> {
        Ok(self.execute(stage, body)?.ok())
    }

    /// Enter `stage`, run it and apply its policy. The outer error is a
    /// pipeline stop; the inner one a tolerated best-effort failure.
    fn execute<T>(
        &mut self,
        stage: InstallStage,
        body: impl FnOnce(&mut dyn Executor, &mut Warnings) -> Result<T>,
    ) -> std::result::Result<Result<T>, StepFailure> {
        self.ctx
            .transition_to(stage)
            .map_err(|e| StepFailure::new(stage, e.into()))?;

        if self.interrupt.is_requested() {
            log::warn!(
                "{} received, stopping before {}",
                self.interrupt.signal_name().unwrap_or("Interrupt"),
                stage
            );
            return Err(self.stop(stage, InstallError::Interrupted(stage.to_string())));
        }

        let step = stage.step();
        log::info!("{}", step);
        self.progress.step_started(step);

        let seen = self.warnings.len();
        let result = body(&mut *self.exec, &mut self.warnings);
        for warning in self.warnings.iter().skip(seen) {
            self.progress.warning(warning);
        }

        match result {
            Ok(value) => {
                self.progress.step_finished(step);
                Ok(Ok(value))
            }
            Err(e) => {
                let message = e.to_string();
                self.progress.step_failed(step, &message);
                match stage.policy() {
                    StepPolicy::BestEffort => {
                        self.warnings.warn(format!("{stage}: {message}"));
                        Ok(Err(e))
                    }
                    StepPolicy::Fatal => {
                        log::error!("{} failed: {}", stage, message);
                        if e.is_destructive() {
                            log::error!("The target disk may be left in an undefined state");
                        }
                        Err(self.stop(stage, e))
                    }
                }
            }
        }
    }

    /// Mark the run failed and describe how far it got
    fn stop(&mut self, stage: InstallStage, source: InstallError) -> StepFailure {
        if let Err(e) = self.ctx.fail() {
            log::warn!("Could not record failure of {}: {}", stage, e);
        }
        let failed = self.ctx.failed_at().unwrap_or(stage);
        StepFailure::new(failed, source).with_completed(self.ctx.completed_stages())
    }
}
