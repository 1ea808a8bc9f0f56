//! Install State Machine
//!
//! The pipeline driver owns an `InstallerContext` that is the single source of
//! truth for how far an installation got. Stages run strictly in order: a
//! stage can only be entered after its predecessor completed, nothing can be
//! skipped, and there is no way back.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! PreparingDisk ─ InstallingBaseSystem ─ GeneratingFstab ─ ConfiguringSystem
//!     ↓
//! DetectingDrivers ─ ConfiguringLocale ─ ConfiguringUsers ─ InstallingBootloader
//!     ↓
//! Finalizing
//!     ↓
//! Completed
//!
//! (Any running stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

/// What a failure of a stage means for the rest of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// The first failure stops the pipeline
    Fatal,
    /// Failure is recorded as a warning and the pipeline continues
    BestEffort,
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum InstallStage {
    /// Plan, partition, format and mount the target disk.
    /// This is the only DESTRUCTIVE stage.
    PreparingDisk = 1,
    /// Bulk package installation via pacstrap
    InstallingBaseSystem = 2,
    GeneratingFstab = 3,
    /// Timezone, hostname, services and swap
    ConfiguringSystem = 4,
    /// GPU and Wi-Fi driver packages from `lspci`
    DetectingDrivers = 5,
    ConfiguringLocale = 6,
    ConfiguringUsers = 7,
    InstallingBootloader = 8,
    /// Branding, deferred scripts, ownership and unmount
    Finalizing = 9,
}

impl InstallStage {
    const ALL: [Self; 9] = [
        Self::PreparingDisk,
        Self::InstallingBaseSystem,
        Self::GeneratingFstab,
        Self::ConfiguringSystem,
        Self::DetectingDrivers,
        Self::ConfiguringLocale,
        Self::ConfiguringUsers,
        Self::InstallingBootloader,
        Self::Finalizing,
    ];

    /// Every stage, in order
    pub const fn all() -> &'static [Self] {
        &Self::ALL
    }

    /// 1-based position in the pipeline
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    pub const fn total() -> usize {
        Self::ALL.len()
    }

    /// Returns true if this stage writes to the raw disk
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::PreparingDisk)
    }

    pub const fn policy(self) -> StepPolicy {
        match self {
            Self::DetectingDrivers => StepPolicy::BestEffort,
            _ => StepPolicy::Fatal,
        }
    }

    /// Returns the next stage, or None after `Finalizing`
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::PreparingDisk => Some(Self::InstallingBaseSystem),
            Self::InstallingBaseSystem => Some(Self::GeneratingFstab),
            Self::GeneratingFstab => Some(Self::ConfiguringSystem),
            Self::ConfiguringSystem => Some(Self::DetectingDrivers),
            Self::DetectingDrivers => Some(Self::ConfiguringLocale),
            Self::ConfiguringLocale => Some(Self::ConfiguringUsers),
            Self::ConfiguringUsers => Some(Self::InstallingBootloader),
            Self::InstallingBootloader => Some(Self::Finalizing),
            Self::Finalizing => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::PreparingDisk => "Preparing disk",
            Self::InstallingBaseSystem => "Installing base system",
            Self::GeneratingFstab => "Generating fstab",
            Self::ConfiguringSystem => "Configuring system",
            Self::DetectingDrivers => "Detecting hardware drivers",
            Self::ConfiguringLocale => "Configuring locale and input method",
            Self::ConfiguringUsers => "Configuring users",
            Self::InstallingBootloader => "Installing bootloader",
            Self::Finalizing => "Finalizing",
        }
    }

    /// Progress notification payload for this stage
    pub fn step(self) -> InstallationStep {
        InstallationStep {
            index: self.order() as usize,
            total: Self::total(),
            description: self.description(),
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One pipeline step as reported to a progress sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallationStep {
    /// 1-based
    pub index: usize,
    pub total: usize,
    pub description: &'static str,
}

impl fmt::Display for InstallationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.index, self.total, self.description)
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running(InstallStage),
    Completed,
    /// Carries the stage at which the failure occurred
    Failed(InstallStage),
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "Not started"),
            Self::Running(stage) => write!(f, "{}", stage),
            Self::Completed => write!(f, "Installation complete"),
            Self::Failed(stage) => write!(f, "Failed at {}", stage),
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage { from: RunState, to: InstallStage },

    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition { from: RunState, to: InstallStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RunState },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },

    #[error("No stage is running")]
    NotRunning,
}

/// Owns the current run state and validates every transition.
///
/// # Example
///
/// ```
/// use blunux_installer::install_state::{InstallerContext, InstallStage, RunState};
///
/// let mut ctx = InstallerContext::new();
/// ctx.transition_to(InstallStage::PreparingDisk).unwrap();
/// assert_eq!(ctx.state(), RunState::Running(InstallStage::PreparingDisk));
///
/// // Cannot skip stages
/// assert!(ctx.transition_to(InstallStage::ConfiguringUsers).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct InstallerContext {
    state: RunState,
    completed: Vec<InstallStage>,
}

impl Default for InstallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallerContext {
    pub fn new() -> Self {
        Self {
            state: RunState::NotStarted,
            completed: Vec::with_capacity(InstallStage::total()),
        }
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn failed_at(&self) -> Option<InstallStage> {
        match self.state {
            RunState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    /// Stages that ran to completion, in order
    pub fn completed_stages(&self) -> Vec<InstallStage> {
        self.completed.clone()
    }

    /// Stage that `advance` would enter next
    fn expected_next(&self) -> Option<InstallStage> {
        match self.state {
            RunState::NotStarted => Some(InstallStage::PreparingDisk),
            RunState::Running(stage) => stage.next(),
            RunState::Completed | RunState::Failed(_) => None,
        }
    }

    /// Complete the running stage and enter the next one, or finish the run
    /// after `Finalizing`.
    fn advance(&mut self) -> Result<RunState, InstallTransitionError> {
        if self.state.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.state });
        }

        if let RunState::Running(stage) = self.state {
            self.completed.push(stage);
        }
        self.state = match self.expected_next() {
            Some(next) => RunState::Running(next),
            None => RunState::Completed,
        };

        Ok(self.state)
    }

    /// Enter `target`, which must be the immediate next stage.
    ///
    /// The caller states which stage it expects, so pipeline ordering
    /// mistakes surface as errors.
    pub fn transition_to(&mut self, target: InstallStage) -> Result<RunState, InstallTransitionError> {
        if self.state.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.state });
        }

        if let RunState::Running(current) = self.state {
            if target == current {
                return Err(InstallTransitionError::AlreadyAtStage { stage: target });
            }
            if target < current {
                return Err(InstallTransitionError::BackwardTransition {
                    from: self.state,
                    to: target,
                });
            }
        }

        if self.expected_next() != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.state,
                to: target,
            });
        }

        self.advance()
    }

    /// Complete the final stage
    pub fn finish(&mut self) -> Result<(), InstallTransitionError> {
        match self.state {
            RunState::Running(InstallStage::Finalizing) => {
                self.advance()?;
                Ok(())
            }
            RunState::Running(stage) => Err(InstallTransitionError::SkippedStage {
                from: self.state,
                to: stage.next().unwrap_or(InstallStage::Finalizing),
            }),
            RunState::NotStarted => Err(InstallTransitionError::NotRunning),
            RunState::Completed | RunState::Failed(_) => {
                Err(InstallTransitionError::FromTerminalState { from: self.state })
            }
        }
    }

    /// Mark the running stage as failed
    pub fn fail(&mut self) -> Result<(), InstallTransitionError> {
        match self.state {
            RunState::Running(stage) => {
                self.state = RunState::Failed(stage);
                Ok(())
            }
            RunState::NotStarted => Err(InstallTransitionError::NotRunning),
            RunState::Completed | RunState::Failed(_) => {
                Err(InstallTransitionError::FromTerminalState { from: self.state })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // InstallStage Tests
    // =========================================================================

    #[test]
    fn test_stage_order_is_sequential() {
        for (i, stage) in InstallStage::all().iter().enumerate() {
            assert_eq!(stage.order() as usize, i + 1, "{:?}", stage);
        }
        assert_eq!(InstallStage::total(), 9);
    }

    #[test]
    fn test_stage_next_forms_chain() {
        let mut current = InstallStage::PreparingDisk;
        let mut count = 1;
        while let Some(next) = current.next() {
            assert!(next > current);
            current = next;
            count += 1;
        }
        assert_eq!(current, InstallStage::Finalizing);
        assert_eq!(count, 9);
    }

    #[test]
    fn test_only_driver_detection_is_best_effort() {
        for stage in InstallStage::all() {
            let expected = if *stage == InstallStage::DetectingDrivers {
                StepPolicy::BestEffort
            } else {
                StepPolicy::Fatal
            };
            assert_eq!(stage.policy(), expected, "{:?}", stage);
        }
    }

    #[test]
    fn test_only_disk_preparation_is_destructive() {
        let destructive: Vec<_> = InstallStage::all()
            .iter()
            .filter(|s| s.is_destructive())
            .collect();
        assert_eq!(destructive, vec![&InstallStage::PreparingDisk]);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            InstallStage::InstallingBootloader.step().to_string(),
            "[8/9] Installing bootloader"
        );
        assert_eq!(InstallStage::ConfiguringLocale.to_string(), "Configuring locale and input method");
    }

    // =========================================================================
    // InstallerContext Tests
    // =========================================================================

    #[test]
    fn test_transition_through_all_stages() {
        let mut ctx = InstallerContext::new();
        for stage in InstallStage::all() {
            assert_eq!(ctx.transition_to(*stage), Ok(RunState::Running(*stage)));
        }
        ctx.finish().unwrap();

        assert_eq!(ctx.state(), RunState::Completed);
        assert_eq!(ctx.completed_stages(), InstallStage::all().to_vec());
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut ctx = InstallerContext::new();
        let err = ctx.transition_to(InstallStage::GeneratingFstab).unwrap_err();
        assert!(matches!(err, InstallTransitionError::SkippedStage { .. }));

        ctx.transition_to(InstallStage::PreparingDisk).unwrap();
        let err = ctx.transition_to(InstallStage::ConfiguringSystem).unwrap_err();
        assert!(matches!(err, InstallTransitionError::SkippedStage { .. }));
    }

    #[test]
    fn test_cannot_go_backwards_or_repeat() {
        let mut ctx = InstallerContext::new();
        ctx.transition_to(InstallStage::PreparingDisk).unwrap();
        ctx.transition_to(InstallStage::InstallingBaseSystem).unwrap();

        let err = ctx.transition_to(InstallStage::PreparingDisk).unwrap_err();
        assert!(matches!(err, InstallTransitionError::BackwardTransition { .. }));

        let err = ctx.transition_to(InstallStage::InstallingBaseSystem).unwrap_err();
        assert!(matches!(err, InstallTransitionError::AlreadyAtStage { .. }));
    }

    #[test]
    fn test_fail_records_stage_and_is_terminal() {
        let mut ctx = InstallerContext::new();
        assert_eq!(ctx.fail(), Err(InstallTransitionError::NotRunning));

        ctx.transition_to(InstallStage::PreparingDisk).unwrap();
        ctx.transition_to(InstallStage::InstallingBaseSystem).unwrap();
        assert_eq!(ctx.failed_at(), None);
        ctx.fail().unwrap();

        assert_eq!(ctx.failed_at(), Some(InstallStage::InstallingBaseSystem));
        assert_eq!(ctx.completed_stages(), vec![InstallStage::PreparingDisk]);
        assert!(matches!(
            ctx.transition_to(InstallStage::GeneratingFstab).unwrap_err(),
            InstallTransitionError::FromTerminalState { .. }
        ));
        assert!(ctx.fail().is_err());
    }

    #[test]
    fn test_finish_only_after_finalizing() {
        let mut ctx = InstallerContext::new();
        assert_eq!(ctx.finish(), Err(InstallTransitionError::NotRunning));
        ctx.transition_to(InstallStage::PreparingDisk).unwrap();
        assert!(ctx.finish().is_err());

        for stage in &InstallStage::all()[1..] {
            ctx.transition_to(*stage).unwrap();
        }
        ctx.finish().unwrap();
        assert_eq!(ctx.state(), RunState::Completed);
        assert_eq!(ctx.completed_stages().len(), 9);
    }

    #[test]
    fn test_error_display() {
        let err = InstallTransitionError::SkippedStage {
            from: RunState::NotStarted,
            to: InstallStage::ConfiguringUsers,
        };
        let msg = err.to_string();
        assert!(msg.contains("Cannot skip"));
        assert!(msg.contains("Not started"));
        assert!(msg.contains("Configuring users"));
    }
}
