//! Side-effect execution
//!
//! Every external tool invocation and every file written into the target goes
//! through the `Executor` trait. `SystemExecutor` performs the effects for
//! real; `DryRunExecutor` records them, which backs both `--dry-run` and the
//! test suite.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Secret;
use crate::error::{InstallError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::tool_args::ToolArgs;

/// One external tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Payload piped to standard input; never logged
    pub stdin: Option<Secret>,
    /// Run inside this root via `arch-chroot`
    pub chroot: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
            chroot: None,
        }
    }

    /// Build an invocation from typed tool arguments
    pub fn tool<T: ToolArgs>(args: &T) -> Self {
        Self {
            program: args.program().to_string(),
            args: args.to_cli_args(),
            stdin: args.stdin(),
            chroot: None,
        }
    }

    /// Run the same tool inside the target root
    pub fn in_chroot(mut self, root: impl Into<PathBuf>) -> Self {
        self.chroot = Some(root.into());
        self
    }

    /// Full argument vector, including the `arch-chroot` prefix
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        if let Some(root) = &self.chroot {
            argv.push("arch-chroot".to_string());
            argv.push(root.display().to_string());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Short name used in error messages, e.g. `parted mklabel`
    pub fn context(&self) -> String {
        match self.args.iter().find(|a| !a.starts_with('-')) {
            Some(sub) if !sub.starts_with('/') => format!("{} {}", self.program, sub),
            _ => self.program.clone(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))?;
        if self.stdin.is_some() {
            write!(f, " <<< <redacted>")?;
        }
        Ok(())
    }
}

/// Captured result of a tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// A successful run with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Check if the tool succeeded and return an error if not.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(InstallError::CommandFailed {
                context: context.to_string(),
                code: self.exit_code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Like `ensure_success`, but tags the failure with a specific error class
    pub fn ensure_success_as(
        &self,
        context: &str,
        wrap: fn(String) -> InstallError,
    ) -> Result<()> {
        self.ensure_success(context)
            .map_err(|e| wrap(e.to_string()))
    }
}

/// Narrow capability interface over every side effect the installer performs.
pub trait Executor {
    /// Run a tool and capture its output. A non-zero exit is `Ok` with
    /// `success == false`; only a failure to start the tool is `Err`.
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Write a file, creating parent directories
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    /// Append to a file, creating it and its parent directories if needed
    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    fn create_dir_all(&mut self, path: &Path) -> Result<()>;

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()>;

    fn read_to_string(&mut self, path: &Path) -> Result<String>;

    fn exists(&mut self, path: &Path) -> bool;

    /// Give the kernel and udev time to catch up (e.g. after partprobe)
    fn settle(&mut self, delay: Duration);
}

impl dyn Executor + '_ {
    /// Run a typed tool on the host
    pub fn run_tool<T: ToolArgs>(&mut self, args: &T) -> Result<CommandOutput> {
        self.run(&Invocation::tool(args))
    }

    /// Run a typed tool inside the target root
    pub fn run_in<T: ToolArgs>(&mut self, root: &Path, args: &T) -> Result<CommandOutput> {
        self.run(&Invocation::tool(args).in_chroot(root))
    }

    /// Run a tool whose failure only produces a warning
    pub fn run_best_effort(&mut self, invocation: &Invocation) -> bool {
        match self.run(invocation) {
            Ok(output) if output.success => true,
            Ok(output) => {
                log::warn!(
                    "{} failed (exit code {}): {}",
                    invocation.context(),
                    output.exit_code.unwrap_or(-1),
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                log::warn!("{}: {}", invocation.context(), e);
                false
            }
        }
    }
}

// ============================================================================
// SystemExecutor
// ============================================================================

/// Executes tools as real child processes and touches the real filesystem.
#[derive(Debug, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Log each line of `pipe` as it arrives and hand back everything read
fn stream_lines<R: Read + Send + 'static>(pipe: R, program: String) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut collected = String::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    log::info!("[{}] {}", program, text.trim_end());
                    collected.push_str(&text);
                }
                Err(e) => {
                    log::warn!("Reading output of {}: {}", program, e);
                    break;
                }
            }
        }
        collected
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default()
}

impl Executor for SystemExecutor {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput> {
        let argv = invocation.argv();
        log::info!("exec: {}", invocation);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .in_new_process_group();

        let mut child = cmd.spawn().map_err(|source| InstallError::Spawn {
            program: argv[0].clone(),
            source,
        })?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.started(pid, &invocation.program);
        }

        // Readers must be draining before stdin is written
        let stdout_reader = child
            .stdout
            .take()
            .map(|pipe| stream_lines(pipe, invocation.program.clone()));
        let stderr_reader = child
            .stderr
            .take()
            .map(|pipe| stream_lines(pipe, invocation.program.clone()));

        if let Some(secret) = &invocation.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // Dropping the pipe afterwards signals EOF
                if let Err(e) = pipe.write_all(secret.expose().as_bytes()) {
                    log::warn!("Failed to write stdin of {}: {}", invocation.program, e);
                }
            }
        }

        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);
        let status = child.wait();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.finished(pid);
        }

        let status = status?;
        let result = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success(),
        };

        if result.success {
            log::debug!("{} exited successfully", invocation.program);
        } else {
            log::info!(
                "{} failed with exit code {}",
                invocation.program,
                result.exit_code.unwrap_or(-1)
            );
        }

        Ok(result)
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        log::debug!("write: {}", path.display());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        log::debug!("append: {}", path.display());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn read_to_string(&mut self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    fn exists(&mut self, path: &Path) -> bool {
        path.exists()
    }

    fn settle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

// ============================================================================
// DryRunExecutor
// ============================================================================

/// A side effect recorded by `DryRunExecutor`
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Run(Invocation),
    WriteFile { path: PathBuf, contents: String },
    AppendFile { path: PathBuf, contents: String },
    CreateDir(PathBuf),
    SetMode { path: PathBuf, mode: u32 },
    Settle(Duration),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(invocation) => write!(f, "run    {invocation}"),
            Self::WriteFile { path, contents } => {
                write!(f, "write  {} ({} bytes)", path.display(), contents.len())
            }
            Self::AppendFile { path, contents } => {
                write!(f, "append {} ({} bytes)", path.display(), contents.len())
            }
            Self::CreateDir(path) => write!(f, "mkdir  {}", path.display()),
            Self::SetMode { path, mode } => write!(f, "chmod  {:o} {}", mode, path.display()),
            Self::Settle(delay) => write!(f, "settle {}ms", delay.as_millis()),
        }
    }
}

/// Matches a tool by program name and, optionally, an argument substring
#[derive(Debug, Clone)]
struct Matcher {
    program: String,
    arg_contains: Option<String>,
}

impl Matcher {
    fn new(program: &str, arg_contains: Option<&str>) -> Self {
        Self {
            program: program.to_string(),
            arg_contains: arg_contains.map(String::from),
        }
    }

    fn matches(&self, invocation: &Invocation) -> bool {
        invocation.program == self.program
            && self
                .arg_contains
                .as_ref()
                .is_none_or(|needle| invocation.args.join(" ").contains(needle.as_str()))
    }
}

/// Records every action instead of performing it.
///
/// Files written through it live in an in-memory map; reading a file that was
/// never written returns an empty string. Tools succeed with empty output
/// unless a failure or canned output was registered for them.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    actions: Vec<Action>,
    files: BTreeMap<PathBuf, String>,
    existing: BTreeSet<PathBuf>,
    failures: Vec<(Matcher, i32, String)>,
    outputs: Vec<(Matcher, String)>,
    echo: bool,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor behind `--dry-run`: echoes every action and answers the
    /// queries whose output later steps depend on with placeholders.
    pub fn preview() -> Self {
        Self::new()
            .echo()
            .with_output("genfstab", "# <fstab generated at install time>\n")
            .with_output("blkid", "00000000-0000-0000-0000-000000000000\n")
    }

    /// Print every action to stdout as it is recorded
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Make every invocation of `program` exit with code 1
    pub fn fail_on(self, program: &str) -> Self {
        self.fail_on_matching(program, None, 1)
    }

    /// Make invocations of `program` whose arguments contain `needle` fail
    pub fn fail_on_args(self, program: &str, needle: &str) -> Self {
        self.fail_on_matching(program, Some(needle), 1)
    }

    fn fail_on_matching(mut self, program: &str, needle: Option<&str>, code: i32) -> Self {
        self.failures.push((
            Matcher::new(program, needle),
            code,
            format!("{program}: injected failure"),
        ));
        self
    }

    /// Canned stdout for invocations of `program`
    pub fn with_output(mut self, program: &str, stdout: &str) -> Self {
        self.outputs.push((Matcher::new(program, None), stdout.to_string()));
        self
    }

    /// Canned stdout for invocations of `program` whose arguments contain `needle`
    pub fn with_output_for(mut self, program: &str, needle: &str, stdout: &str) -> Self {
        self.outputs
            .push((Matcher::new(program, Some(needle)), stdout.to_string()));
        self
    }

    /// Seed a file as if it already existed
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.files.insert(path.into(), contents.to_string());
        self
    }

    /// Make `exists` report true for a path that holds no content
    pub fn with_existing(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing.insert(path.into());
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Every recorded tool invocation, in order
    pub fn invocations(&self) -> Vec<&Invocation> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Run(invocation) => Some(invocation),
                _ => None,
            })
            .collect()
    }

    /// Recorded invocations rendered as argument vectors joined by spaces
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|i| i.argv().join(" "))
            .collect()
    }

    /// Index of the first command line containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.command_lines().iter().position(|c| c.contains(needle))
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }

    /// Current contents of a file in the in-memory tree
    pub fn file(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }

    /// Mode last applied to a path
    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.actions.iter().rev().find_map(|a| match a {
            Action::SetMode { path: p, mode } if p == path.as_ref() => Some(*mode),
            _ => None,
        })
    }

    fn record(&mut self, action: Action) {
        if self.echo {
            println!("{action}");
        }
        self.actions.push(action);
    }
}

impl Executor for DryRunExecutor {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput> {
        log::debug!("dry-run: {}", invocation);
        self.record(Action::Run(invocation.clone()));

        if let Some((_, code, stderr)) = self.failures.iter().find(|(m, _, _)| m.matches(invocation)) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
                exit_code: Some(*code),
                success: false,
            });
        }

        let stdout = self
            .outputs
            .iter()
            .find(|(m, _)| m.matches(invocation))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        Ok(CommandOutput::ok(stdout))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.record(Action::WriteFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn append_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.record(Action::AppendFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        self.record(Action::CreateDir(path.to_path_buf()));
        self.existing.insert(path.to_path_buf());
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        self.record(Action::SetMode {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn read_to_string(&mut self, path: &Path) -> Result<String> {
        Ok(self.files.get(path).cloned().unwrap_or_default())
    }

    fn exists(&mut self, path: &Path) -> bool {
        self.files.contains_key(path) || self.existing.contains(path)
    }

    fn settle(&mut self, delay: Duration) {
        self.record(Action::Settle(delay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::disk::Wipefs;
    use crate::tools::system::Chpasswd;

    #[test]
    fn test_invocation_chroot_prefix() {
        let invocation = Invocation::new("locale-gen", vec![]).in_chroot("/mnt");
        assert_eq!(invocation.argv(), vec!["arch-chroot", "/mnt", "locale-gen"]);
    }

    #[test]
    fn test_invocation_display_redacts_stdin() {
        let invocation = Invocation::tool(&Chpasswd {
            username: "root".to_string(),
            password: Secret::new("toor"),
        });
        let shown = invocation.to_string();
        assert!(!shown.contains("toor"));
        assert!(shown.ends_with("<<< <redacted>"));
    }

    #[test]
    fn test_invocation_context() {
        let invocation = Invocation::new(
            "parted",
            vec!["-s".into(), "/dev/sda".into(), "mklabel".into(), "gpt".into()],
        );
        assert_eq!(invocation.context(), "parted");
        let invocation = Invocation::new("cryptsetup", vec!["luksFormat".into()]);
        assert_eq!(invocation.context(), "cryptsetup luksFormat");
    }

    #[test]
    fn test_ensure_success() {
        let ok = CommandOutput::ok("");
        assert!(ok.ensure_success("wipefs").is_ok());

        let failed = CommandOutput {
            stdout: String::new(),
            stderr: "device busy\n".to_string(),
            exit_code: Some(1),
            success: false,
        };
        let err = failed.ensure_success("parted mklabel").unwrap_err();
        assert_eq!(err.to_string(), "parted mklabel failed (exit code 1): device busy");

        let err = failed
            .ensure_success_as("parted mklabel", InstallError::Partition)
            .unwrap_err();
        assert!(err.is_destructive());
    }

    #[test]
    fn test_dry_run_records_and_injects() {
        let mut exec = DryRunExecutor::new()
            .fail_on_args("parted", "mklabel")
            .with_output("blkid", "1234-ABCD\n");
        let exec_dyn: &mut dyn Executor = &mut exec;

        let out = exec_dyn
            .run_tool(&Wipefs {
                device: "/dev/sda".to_string(),
            })
            .unwrap();
        assert!(out.success);

        let out = exec_dyn
            .run(&Invocation::new("parted", vec!["-s".into(), "/dev/sda".into(), "mklabel".into()]))
            .unwrap();
        assert!(!out.success);

        let out = exec_dyn
            .run(&Invocation::new("blkid", vec!["/dev/sda1".into()]))
            .unwrap();
        assert_eq!(out.stdout, "1234-ABCD\n");

        assert_eq!(exec.invocations().len(), 3);
        assert!(exec.ran("wipefs -af /dev/sda"));
    }

    #[test]
    fn test_dry_run_file_map() {
        let mut exec = DryRunExecutor::new().with_file("/mnt/etc/fstab", "UUID=x / ext4\n");
        let path = Path::new("/mnt/etc/fstab");
        exec.append_file(path, "/swapfile none swap defaults 0 0\n").unwrap();
        assert_eq!(
            exec.file(path),
            Some("UUID=x / ext4\n/swapfile none swap defaults 0 0\n")
        );
        assert_eq!(exec.read_to_string(Path::new("/nope")).unwrap(), "");
        assert!(!exec.exists(Path::new("/nope")));
        exec.set_mode(path, 0o600).unwrap();
        assert_eq!(exec.mode(path), Some(0o600));
    }

    #[test]
    fn test_system_executor_file_ops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/sudoers.d/wheel");
        let mut exec = SystemExecutor::new();

        exec.write_file(&path, "%wheel ALL=(ALL:ALL) ALL\n").unwrap();
        exec.append_file(&path, "# end\n").unwrap();
        exec.set_mode(&path, 0o440).unwrap();

        assert_eq!(
            exec.read_to_string(&path).unwrap(),
            "%wheel ALL=(ALL:ALL) ALL\n# end\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o440);
        assert!(exec.exists(&path));
    }

    #[test]
    fn test_system_executor_pipes_stdin() {
        let mut exec = SystemExecutor::new();
        let mut invocation = Invocation::new("cat", vec![]);
        invocation.stdin = Some(Secret::new("user:pass\n"));
        let out = exec.run(&invocation).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "user:pass\n");
    }

    #[test]
    fn test_system_executor_keeps_streamed_output() {
        let mut exec = SystemExecutor::new();
        let script = "printf 'one\\ntwo\\n'; echo oops >&2; printf tail; exit 3";
        let out = exec
            .run(&Invocation::new("sh", vec!["-c".to_string(), script.to_string()]))
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "one\ntwo\ntail");
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn test_system_executor_drains_large_output() {
        let mut exec = SystemExecutor::new();
        let mut invocation = Invocation::new("sh", vec!["-c".to_string(), "seq 1 20000; cat".to_string()]);
        invocation.stdin = Some(Secret::new("done"));
        let out = exec.run(&invocation).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.lines().count(), 20001);
        assert!(out.stdout.ends_with("20000\ndone"));
    }

    #[test]
    fn test_system_executor_missing_program() {
        let mut exec = SystemExecutor::new();
        let err = exec
            .run(&Invocation::new("definitely-not-a-real-tool-42", vec![]))
            .unwrap_err();
        assert!(matches!(err, InstallError::Spawn { .. }));
    }
}
