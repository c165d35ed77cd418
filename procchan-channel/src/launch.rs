//! How a worker process is launched

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::warn;

/// Launch options for a worker process.
///
/// The channel only uses what is configured here; it never reads the host's
/// argv, environment or working directory on its own. Use
/// [`LaunchOptions::from_host`] to pass those through explicitly.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Interpreter or runtime that runs the entry point. When unset the entry
    /// point itself is executed.
    pub program: Option<PathBuf>,
    /// Flags for the interpreter, placed before the entry point
    pub exec_args: Vec<OsString>,
    /// Arguments placed after the entry point
    pub args: Vec<OsString>,
    /// Environment variables to set
    pub env: Vec<(OsString, OsString)>,
    /// Start from an empty environment instead of the inherited one
    pub clear_env: bool,
    /// Working directory; inherited when unset
    pub cwd: Option<PathBuf>,
}

impl LaunchOptions {
    /// Snapshot the host's arguments, environment and working directory
    pub fn from_host() -> Self {
        Self {
            program: None,
            exec_args: Vec::new(),
            args: std::env::args_os().skip(1).collect(),
            env: std::env::vars_os().collect(),
            clear_env: true,
            cwd: std::env::current_dir().ok(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_exec_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.exec_args.push(arg.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Build the command: `program [exec_args] entry [args]`, stdin and stdout
    /// piped for the control channel, stderr inherited.
    pub(crate) fn command(&self, entry: &Path) -> Command {
        let mut cmd = match &self.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.args(&self.exec_args).arg(entry);
                cmd
            }
            None => {
                if !self.exec_args.is_empty() {
                    warn!(
                        "Ignoring {} interpreter flags for {}: no interpreter configured",
                        self.exec_args.len(),
                        entry.display()
                    );
                }
                Command::new(entry)
            }
        };

        cmd.args(&self.args);

        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &Command) -> Vec<OsString> {
        let std_cmd = cmd.as_std();
        std::iter::once(std_cmd.get_program().to_os_string())
            .chain(std_cmd.get_args().map(|a| a.to_os_string()))
            .collect()
    }

    #[test]
    fn test_interpreter_layout() {
        let options = LaunchOptions::default()
            .with_program("node")
            .with_exec_arg("--max-old-space-size=512")
            .with_args(["--target", "web"]);

        let cmd = options.command(Path::new("worker.js"));
        assert_eq!(
            argv(&cmd),
            vec!["node", "--max-old-space-size=512", "worker.js", "--target", "web"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_direct_entry_ignores_exec_args() {
        let options = LaunchOptions::default().with_exec_arg("--inspect").with_arg("-v");
        let cmd = options.command(Path::new("/usr/bin/worker"));
        assert_eq!(
            argv(&cmd),
            vec![OsString::from("/usr/bin/worker"), OsString::from("-v")]
        );
    }

    #[test]
    fn test_env_and_cwd_applied() {
        let options = LaunchOptions::default()
            .with_env("WORKER_MODE", "fast")
            .with_cwd("/tmp");
        let cmd = options.command(Path::new("w"));
        let std_cmd = cmd.as_std();

        let envs: Vec<_> = std_cmd.get_envs().collect();
        assert!(envs.contains(&(OsStr::new("WORKER_MODE"), Some(OsStr::new("fast")))));
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_from_host_is_an_explicit_snapshot() {
        let options = LaunchOptions::from_host();
        assert!(options.clear_env);
        assert!(!options.env.is_empty());
        assert!(options.cwd.is_some());
    }
}
