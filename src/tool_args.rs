//! Type-safe tool argument contracts.
//!
//! Every external utility the installer drives has a struct implementing
//! `ToolArgs`. The struct is the contract: field names map to the exact flags
//! the tool expects, so a flag mismatch is a compile error rather than a
//! failed installation.

use crate::config::Secret;

/// Trait for typed tool arguments.
///
/// # Contract
///
/// - `program()`: executable name, resolved through `PATH` (inside the target
///   root when the invocation is chrooted).
/// - `to_cli_args()`: arguments exactly as the tool parses them.
/// - `stdin()`: payload piped to the tool. Credentials travel only here,
///   never in the argument vector where `ps` could see them.
///
/// # Example
///
/// ```
/// use blunux_installer::tool_args::ToolArgs;
/// use blunux_installer::tools::disk::Wipefs;
///
/// let args = Wipefs { device: "/dev/sda".into() };
/// assert_eq!(args.program(), "wipefs");
/// assert_eq!(args.to_cli_args(), vec!["-af", "/dev/sda"]);
/// assert!(args.stdin().is_none());
/// ```
pub trait ToolArgs {
    /// Executable name
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments
    fn to_cli_args(&self) -> Vec<String>;

    /// Secret payload for the tool's standard input
    fn stdin(&self) -> Option<Secret> {
        None
    }
}
