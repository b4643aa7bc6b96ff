use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::context::Context;
use crate::error::{DeployError, DeployResult};
use crate::executor::local::run_process;
use crate::executor::{Executor, format_command};

const RECONNECT_ATTEMPTS: u32 = 3;

/// Executes commands over a persistent SSH session.
///
/// The session rides on an OpenSSH control socket: one master
/// connection is established up front and every subsequent command
/// multiplexes over it, so all runtime CLI invocations for a host
/// funnel through a single connection. Before each command the
/// master is probed with `ssh -O check`; a dead master is
/// re-established with up to three backoff attempts before the
/// failure surfaces. Cancelling the context kills the local `ssh`
/// client, which tears down the remote command with it.
pub struct RemoteExecutor {
    host: String,
    port: u16,
    user: String,
    key_path: Option<String>,
    control_path: PathBuf,
    // Owns the directory holding the control socket.
    _control_dir: tempfile::TempDir,
}

impl RemoteExecutor {
    /// Open the master connection to `user@host:port`.
    pub fn connect(
        ctx: &Context,
        host: &str,
        port: u16,
        user: &str,
        key_path: Option<&str>,
    ) -> DeployResult<Self> {
        let control_dir = tempfile::Builder::new().prefix("gantry-ssh-").tempdir()?;
        let executor = Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            key_path: key_path.map(ToString::to_string),
            control_path: control_dir.path().join("control.sock"),
            _control_dir: control_dir,
        };

        executor.open_master(ctx)?;
        Ok(executor)
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn control_path_arg(&self) -> String {
        format!("ControlPath={}", self.control_path.display())
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            self.control_path_arg(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    fn open_master(&self, ctx: &Context) -> DeployResult<()> {
        ctx.check()?;

        let mut args = self.base_args();
        args.splice(
            0..0,
            [
                "-o".to_string(),
                "ControlMaster=yes".to_string(),
                "-o".to_string(),
                "ControlPersist=600".to_string(),
                "-N".to_string(),
                "-f".to_string(),
            ],
        );
        args.push(self.destination());

        // The backgrounded master keeps its pipes open, so this
        // invocation must not capture output; errors go straight
        // to the operator's terminal. ConnectTimeout bounds the
        // wait.
        let status = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DeployError::CommandNotFound("ssh".to_string())
                } else {
                    DeployError::Io(e)
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::Transport(format!(
                "failed to connect to {}",
                self.destination()
            )))
        }
    }

    /// Probe the control master and reconnect with backoff if it
    /// is gone.
    fn ensure_connected(&self, ctx: &Context) -> DeployResult<()> {
        if self.master_alive(ctx) {
            return Ok(());
        }

        for attempt in 1..=RECONNECT_ATTEMPTS {
            if self.open_master(ctx).is_ok() && self.master_alive(ctx) {
                return Ok(());
            }
            if attempt < RECONNECT_ATTEMPTS {
                thread::sleep(Duration::from_secs(u64::from(attempt)));
            }
        }

        Err(DeployError::Transport(format!(
            "failed to re-establish SSH connection to {} after {RECONNECT_ATTEMPTS} attempts",
            self.destination()
        )))
    }

    fn master_alive(&self, ctx: &Context) -> bool {
        let check_args = vec![
            "-O".to_string(),
            "check".to_string(),
            "-o".to_string(),
            self.control_path_arg(),
            self.destination(),
        ];
        let refs: Vec<&str> = check_args.iter().map(String::as_str).collect();
        matches!(run_process(ctx, "ssh", &refs), Ok((_, status)) if status.success())
    }
}

impl Executor for RemoteExecutor {
    fn run(&self, ctx: &Context, program: &str, args: &[&str]) -> DeployResult<Vec<u8>> {
        ctx.check()?;
        self.ensure_connected(ctx)?;

        let remote_command = build_remote_command(program, args);
        let mut ssh_args = self.base_args();
        ssh_args.push(self.destination());
        ssh_args.push(remote_command);

        let refs: Vec<&str> = ssh_args.iter().map(String::as_str).collect();
        let (output, status) = run_process(ctx, "ssh", &refs)?;

        if status.success() {
            Ok(output)
        } else if status.code() == Some(255) {
            // 255 is ssh itself failing, not the remote command.
            Err(DeployError::Transport(format!(
                "session to {} broke: {}",
                self.destination(),
                String::from_utf8_lossy(&output).trim()
            )))
        } else {
            Err(DeployError::command_failed(
                format_command(program, args),
                &output,
            ))
        }
    }

    fn copy_file(&self, ctx: &Context, local_path: &str, remote_path: &str) -> DeployResult<()> {
        ctx.check()?;
        self.ensure_connected(ctx)?;

        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            self.control_path_arg(),
            "-P".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(local_path.to_string());
        args.push(format!("{}:{remote_path}", self.destination()));

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let (output, status) = run_process(ctx, "scp", &refs)?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::Transport(format!(
                "scp to {} failed: {}",
                self.destination(),
                String::from_utf8_lossy(&output).trim()
            )))
        }
    }
}

/// Join a program and its arguments into one remote shell command,
/// single-quoting each argument.
fn build_remote_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![quote_arg(program)];
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

/// Quote an argument for the remote shell. Everything is wrapped
/// in single quotes; embedded single quotes are closed, escaped,
/// and reopened.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}
