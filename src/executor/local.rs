use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::context::Context;
use crate::error::{DeployError, DeployResult};
use crate::executor::{Executor, format_command};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Executes commands as child processes on the operator machine.
///
/// stdout and stderr are drained into one shared buffer by worker
/// threads while the main path waits on the process and watches the
/// context; cancellation kills the child.
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a process, drain its combined output, and wait for exit
/// while watching the context. Shared by the local and remote
/// executors; the caller classifies the exit status.
pub(crate) fn run_process(
    ctx: &Context,
    program: &str,
    args: &[&str],
) -> DeployResult<(Vec<u8>, std::process::ExitStatus)> {
    ctx.check()?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::CommandNotFound(program.to_string())
            } else {
                DeployError::Io(e)
            }
        })?;

    let output = Arc::new(Mutex::new(Vec::new()));
    let readers = spawn_readers(&mut child, &output);

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if ctx.is_done() {
                    let _ = child.kill();
                    let _ = child.wait();
                    for r in readers {
                        let _ = r.join();
                    }
                    return Err(DeployError::Cancelled);
                }
                thread::sleep(WAIT_POLL);
            }
        }
    };

    for r in readers {
        let _ = r.join();
    }

    let output = match Arc::try_unwrap(output) {
        Ok(m) => m.into_inner().unwrap_or_default(),
        Err(shared) => shared.lock().map(|b| b.clone()).unwrap_or_default(),
    };

    Ok((output, status))
}

impl Executor for LocalExecutor {
    fn run(&self, ctx: &Context, program: &str, args: &[&str]) -> DeployResult<Vec<u8>> {
        let (output, status) = run_process(ctx, program, args)?;

        if status.success() {
            Ok(output)
        } else {
            Err(DeployError::command_failed(
                format_command(program, args),
                &output,
            ))
        }
    }

    fn copy_file(&self, ctx: &Context, local_path: &str, remote_path: &str) -> DeployResult<()> {
        ctx.check()?;

        if !std::path::Path::new(local_path).exists() {
            return Err(DeployError::FileNotFound(local_path.to_string()));
        }
        if let Some(parent) = std::path::Path::new(remote_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local_path, remote_path)?;
        Ok(())
    }
}

fn spawn_readers(
    child: &mut Child,
    output: &Arc<Mutex<Vec<u8>>>,
) -> Vec<thread::JoinHandle<()>> {
    let mut readers = Vec::new();

    if let Some(stdout) = child.stdout.take() {
        readers.push(drain(stdout, Arc::clone(output)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(drain(stderr, Arc::clone(output)));
    }

    readers
}

fn drain<R: Read + Send + 'static>(
    mut source: R,
    output: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        while let Ok(n) = source.read(&mut buf) {
            if n == 0 {
                break;
            }
            if let Ok(mut out) = output.lock() {
                out.extend_from_slice(&buf[..n]);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_text;

    #[test]
    fn captures_stdout() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();

        let output = run_text(&executor, &ctx, "echo", &["hello"]).unwrap();

        assert_eq!(output, "hello");
    }

    #[test]
    fn captures_stderr_in_combined_output() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();

        let output = run_text(
            &executor,
            &ctx,
            "sh",
            &["-c", "echo out; echo err >&2"],
        )
        .unwrap();

        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[test]
    fn nonzero_exit_reports_command_and_output() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();

        let err = executor
            .run(&ctx, "sh", &["-c", "echo boom >&2; exit 3"])
            .unwrap_err();

        match err {
            DeployError::CommandFailed { command, output } => {
                assert!(command.starts_with("sh -c"));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_program_reports_not_found() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();

        let err = executor
            .run(&ctx, "definitely-not-a-real-program", &[])
            .unwrap_err();

        assert!(matches!(err, DeployError::CommandNotFound(_)));
    }

    #[test]
    fn cancelled_context_refuses_to_start() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();
        ctx.cancel();

        let err = executor.run(&ctx, "echo", &["hi"]).unwrap_err();

        assert!(matches!(err, DeployError::Cancelled));
    }

    #[test]
    fn deadline_kills_running_command() {
        let executor = LocalExecutor::new();
        let ctx = Context::new().with_timeout(Duration::from_millis(100));

        let err = executor.run(&ctx, "sleep", &["5"]).unwrap_err();

        assert!(matches!(err, DeployError::Cancelled));
    }

    #[test]
    fn copy_file_copies_content() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("nested/dst.txt");
        std::fs::write(&src, "payload").unwrap();

        executor
            .copy_file(&ctx, src.to_str().unwrap(), dst.to_str().unwrap())
            .unwrap();

        assert_eq!(std::fs::read_to_string(dst).unwrap(), "payload");
    }

    #[test]
    fn copy_missing_file_fails() {
        let executor = LocalExecutor::new();
        let ctx = Context::new();

        let err = executor
            .copy_file(&ctx, "/no/such/file", "/tmp/out")
            .unwrap_err();

        assert!(matches!(err, DeployError::FileNotFound(_)));
    }
}
