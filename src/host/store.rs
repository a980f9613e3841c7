//! Primitive host operations every configuration step is built from.
//!
//! The store never remembers anything: each call looks at the filesystem or
//! runs a command and reports what it found.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::HostError;

/// stderr fragments meaning escalation was refused or the caller lacks rights.
const PERMISSION_SIGNATURES: &[&str] = &[
    "a password is required",
    "incorrect password",
    "not in the sudoers",
    "Operation not permitted",
];

/// Keeps staged copies of concurrent writes apart.
static STAGED: AtomicUsize = AtomicUsize::new(0);

/// What sits at a path, without following a final symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathState {
    Missing,
    File,
    Dir,
    Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// `Ok` on success, otherwise the matching [`HostError`].
    pub fn check(self, argv: &[String]) -> Result<Self, HostError> {
        if self.success {
            return Ok(self);
        }
        Err(command_error(argv, &self))
    }
}

pub fn command_error(argv: &[String], output: &CommandOutput) -> HostError {
    let command = argv.join(" ");
    let stderr = output.stderr.trim().to_string();
    if PERMISSION_SIGNATURES.iter().any(|s| stderr.contains(s)) {
        return HostError::PermissionDenied(format!("`{command}`: {stderr}"));
    }
    HostError::CommandFailed {
        command,
        status: output.status.clone(),
        stderr,
    }
}

/// Runs external commands and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput, HostError>;
}

pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput, HostError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(HostError::CommandFailed {
                command: String::new(),
                status: "empty command".into(),
                stderr: String::new(),
            });
        };
        debug!("Running `{}`", argv.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::CommandFailed {
                command: argv.join(" "),
                status: "could not start".into(),
                stderr: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Host file and command primitives.
#[async_trait]
pub trait HostConfigStore: Send + Sync {
    /// Contents of `path`, or `None` if it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<String>, HostError>;

    /// Replace `path` atomically: write a sibling temp file, flush it to
    /// disk, then rename it over the target.
    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), HostError>;

    async fn stat(&self, path: &Path) -> Result<PathState, HostError>;

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), HostError>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), HostError>;

    /// Delete a file or symlink. `Ok(false)` if nothing was there.
    async fn remove(&self, path: &Path) -> Result<bool, HostError>;

    async fn run(&self, argv: &[String]) -> Result<CommandOutput, HostError>;

    async fn run_privileged(&self, argv: &[String]) -> Result<CommandOutput, HostError>;

    /// Make `path` hold exactly `contents`. `Ok(true)` if it had to be written.
    async fn ensure_file(&self, path: &Path, contents: &str) -> Result<bool, HostError> {
        if self.read_file(path).await?.as_deref() == Some(contents) {
            return Ok(false);
        }
        self.write_file(path, contents).await?;
        Ok(true)
    }

    /// Make sure nothing is at `path`. `Ok(true)` if something was removed.
    async fn ensure_absent(&self, path: &Path) -> Result<bool, HostError> {
        self.remove(path).await
    }
}

/// [`HostConfigStore`] over the real filesystem.
///
/// Reads always happen in-process. Writes do too unless an escalation prefix
/// is configured, in which case every change goes through `mkdir`, `cp`,
/// `mv`, `ln` and `rm` run behind that prefix.
pub struct FsHostConfigStore {
    escalation: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl FsHostConfigStore {
    /// `escalation` is prepended to privileged commands (e.g. `["sudo"]`).
    pub fn new(escalation: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { escalation, runner }
    }

    fn escalated(&self) -> bool {
        !self.escalation.is_empty()
    }

    async fn privileged(&self, program: &str, args: &[&Path]) -> Result<(), HostError> {
        self.privileged_with(program, &[], args).await
    }

    async fn privileged_with(
        &self,
        program: &str,
        flags: &[&str],
        args: &[&Path],
    ) -> Result<(), HostError> {
        let argv: Vec<String> = std::iter::once(program.to_string())
            .chain(flags.iter().map(|f| f.to_string()))
            .chain(args.iter().map(|p| p.to_string_lossy().into_owned()))
            .collect();
        self.run_privileged(&argv).await?.check(&argv)?;
        Ok(())
    }

    /// Stage `contents` somewhere the caller can write, then copy it next to
    /// `path` and rename it into place as root.
    async fn write_escalated(&self, path: &Path, contents: &str) -> Result<(), HostError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = std::env::temp_dir().join(format!(
            "falcon-{}-{}-{name}",
            std::process::id(),
            STAGED.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&staged, contents)
            .await
            .map_err(|e| HostError::io(&staged, e))?;

        let tmp = temp_path(path);
        let result = async {
            if let Some(parent) = path.parent() {
                self.privileged_with("mkdir", &["-p"], &[parent]).await?;
            }
            self.privileged("cp", &[staged.as_path(), tmp.as_path()]).await?;
            self.privileged_with("mv", &["-f"], &[tmp.as_path(), path]).await?;
            self.privileged("sync", &[]).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            debug!("Unable to remove {}: {}", staged.display(), e);
        }
        result
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.falcon-tmp"))
}

#[async_trait]
impl HostConfigStore for FsHostConfigStore {
    async fn read_file(&self, path: &Path) -> Result<Option<String>, HostError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::io(path, e)),
        }
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), HostError> {
        if self.escalated() {
            return self.write_escalated(path, contents).await;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::io(parent, e))?;
        }
        let tmp = temp_path(path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| HostError::io(&tmp, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| HostError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| HostError::io(&tmp, e))?;
        drop(file);

        // Keep the mode of the file being replaced.
        if let Ok(meta) = tokio::fs::metadata(path).await {
            tokio::fs::set_permissions(&tmp, meta.permissions())
                .await
                .map_err(|e| HostError::io(&tmp, e))?;
        }
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| HostError::io(path, e))
    }

    async fn stat(&self, path: &Path) -> Result<PathState, HostError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PathState::Missing),
            Err(e) => return Err(HostError::io(path, e)),
        };
        if meta.file_type().is_symlink() {
            let target = tokio::fs::read_link(path)
                .await
                .map_err(|e| HostError::io(path, e))?;
            return Ok(PathState::Symlink(target));
        }
        if meta.is_dir() {
            return Ok(PathState::Dir);
        }
        Ok(PathState::File)
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), HostError> {
        if self.escalated() {
            return self.privileged_with("ln", &["-s"], &[target, link]).await;
        }
        tokio::fs::symlink(target, link)
            .await
            .map_err(|e| HostError::io(link, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        if self.escalated() {
            return self.privileged_with("mv", &["-f"], &[from, to]).await;
        }
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| HostError::io(from, e))
    }

    async fn remove(&self, path: &Path) -> Result<bool, HostError> {
        if self.escalated() {
            if self.stat(path).await? == PathState::Missing {
                return Ok(false);
            }
            self.privileged_with("rm", &["-f"], &[path]).await?;
            return Ok(true);
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HostError::io(path, e)),
        }
    }

    async fn run(&self, argv: &[String]) -> Result<CommandOutput, HostError> {
        self.runner.run(argv).await
    }

    async fn run_privileged(&self, argv: &[String]) -> Result<CommandOutput, HostError> {
        let full: Vec<String> = self
            .escalation
            .iter()
            .chain(argv.iter())
            .cloned()
            .collect();
        self.runner.run(&full).await
    }
}
