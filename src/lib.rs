//! Blunux Installer Library
//!
//! Core of the Blunux installer: takes a validated configuration and a target
//! disk and provisions a bootable system through a nine-stage pipeline. Every
//! side effect goes through the `Executor` trait, so the whole pipeline runs
//! against `DryRunExecutor` in `--dry-run` mode and in tests.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod process_guard;
pub mod profiles;
pub mod progress;
pub mod tool_args;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use config::{Configuration, InstallOptions, Secret};
pub use error::{FailureKind, InstallError, StepFailure};
pub use executor::{CommandOutput, DryRunExecutor, Executor, Invocation, SystemExecutor};
pub use install_state::{InstallStage, InstallationStep, InstallerContext, StepPolicy};
pub use installer::{InstallPlan, InstallReport, Installer};
pub use process_guard::{ChildRegistry, CommandProcessGroup, InterruptFlag};
pub use progress::{ConsoleProgress, ProgressSink};
pub use tool_args::ToolArgs;
pub use types::{BootMode, Bootloader, InputMethodEngine, Kernel, PartitionScheme, SwapMode};

// Hardware detection
pub use hardware::{DiskInfo, FirmwareMode, HardwareInfo};

// Storage engine
pub use engine::naming::{partition_path, split_partition_path};
pub use engine::storage::{MountState, PartitionLayout, StorageOp, StoragePlan};

// Package/service resolution
pub use logic::resolver::{resolve_packages, resolve_services, KernelPlan};
