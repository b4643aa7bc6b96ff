pub mod local;
pub mod remote;

use crate::context::Context;
use crate::error::DeployResult;

/// The capability the deployment engine runs against: execute a
/// command and copy a file to the target host.
///
/// Two implementations exist - [`local::LocalExecutor`] spawns
/// child processes on the operator machine, and
/// [`remote::RemoteExecutor`] funnels everything over a persistent
/// SSH session. The engine does not care which one it holds.
pub trait Executor {
    /// Run `program` with `args` and return the complete combined
    /// stdout/stderr. A non-zero exit reports
    /// [`DeployError::CommandFailed`] carrying the command string
    /// and the output tail.
    ///
    /// [`DeployError::CommandFailed`]: crate::error::DeployError::CommandFailed
    fn run(&self, ctx: &Context, program: &str, args: &[&str]) -> DeployResult<Vec<u8>>;

    /// Copy a local file to a path on the target host.
    fn copy_file(&self, ctx: &Context, local_path: &str, remote_path: &str) -> DeployResult<()>;
}

/// Render a program and its arguments as one loggable line.
#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}

/// Run a command and return its output as trimmed UTF-8 text.
pub fn run_text(
    executor: &dyn Executor,
    ctx: &Context,
    program: &str,
    args: &[&str],
) -> DeployResult<String> {
    let output = executor.run(ctx, program, args)?;
    Ok(String::from_utf8_lossy(&output).trim().to_string())
}
