use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::build::Build;
use crate::config::{Config, Server};
use crate::context::Context;
use crate::deployment::Deployment;
use crate::error::{DeployError, DeployResult};
use crate::executor::local::LocalExecutor;
use crate::executor::remote::RemoteExecutor;
use crate::progress::{ConsoleProgress, Progress};
use crate::provision::Provisioner;
use crate::proxy;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(version)]
#[command(about = "Zero-downtime Docker deployments over SSH")]
struct Cli {
    /// Path to the project file
    #[arg(long, default_value = "gantry.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy all services to every configured server
    Deploy,

    /// Build (and push) images for services with a build path
    Build {
        /// Build only, do not push to the registry
        #[arg(long)]
        skip_push: bool,
    },

    /// Provision a fresh server: Docker, firewall, operator user
    Setup,

    /// Print the generated reverse proxy config and exit
    Render,
}

/// Parse arguments and dispatch. Diagnostics go to stderr; the
/// caller turns the result into the process exit code.
pub fn run() -> DeployResult<()> {
    let cli = Cli::parse();
    let cfg = Config::load(Path::new(&cli.config))?;
    let progress = ConsoleProgress::new();

    match cli.command {
        Command::Deploy => cmd_deploy(&cfg, &progress),
        Command::Build { skip_push } => cmd_build(&cfg, &progress, skip_push),
        Command::Setup => cmd_setup(&cfg, &progress),
        Command::Render => {
            println!("{}", proxy::render_config(&cfg));
            Ok(())
        }
    }
}

fn cmd_deploy(cfg: &Config, progress: &dyn Progress) -> DeployResult<()> {
    let ctx = Context::new();
    let mut failed = 0usize;

    for server in &cfg.servers {
        if let Err(err) = deploy_to_server(&ctx, cfg, server, progress) {
            eprintln!("Failed to deploy to server {}: {err}", server.host);
            failed += 1;
            continue;
        }
        progress.success(&format!("Deployed to server {}", server.host));
    }

    if failed > 0 {
        return Err(DeployError::Other(format!(
            "deployment failed on {failed} of {} servers",
            cfg.servers.len()
        )));
    }

    progress.success("Deployment completed.");
    Ok(())
}

fn deploy_to_server(
    ctx: &Context,
    cfg: &Config,
    server: &Server,
    progress: &dyn Progress,
) -> DeployResult<()> {
    progress.step(&format!("Connecting to {}...", server.host));

    let key = resolve_key(server, false)?;
    let executor = RemoteExecutor::connect(
        ctx,
        &server.host,
        server.port,
        &server.user,
        key.as_deref(),
    )?;
    progress.success(&format!("Connected to {}", server.host));

    Deployment::new(&executor)
        .with_progress(progress)
        .deploy(ctx, cfg)
}

fn cmd_build(cfg: &Config, progress: &dyn Progress, skip_push: bool) -> DeployResult<()> {
    let ctx = Context::new();
    let executor = LocalExecutor::new();
    let build = Build::new(&executor).with_progress(progress);

    for service in &cfg.services {
        let Some(path) = &service.path else {
            continue;
        };
        build.build(&ctx, &service.image, path)?;
        if !skip_push {
            build.push(&ctx, &service.image)?;
        }
    }

    Ok(())
}

fn cmd_setup(cfg: &Config, progress: &dyn Progress) -> DeployResult<()> {
    let ctx = Context::new();
    let mut failed = 0usize;

    for server in &cfg.servers {
        progress.step(&format!("Setting up server {}...", server.host));

        let result = setup_server(&ctx, server, progress);
        if let Err(err) = result {
            eprintln!("Failed to set up server {}: {err}", server.host);
            failed += 1;
            continue;
        }
        progress.success(&format!("Server {} ready", server.host));
    }

    if failed > 0 {
        return Err(DeployError::Other(format!(
            "setup failed on {failed} of {} servers",
            cfg.servers.len()
        )));
    }

    Ok(())
}

fn setup_server(ctx: &Context, server: &Server, progress: &dyn Progress) -> DeployResult<()> {
    let key = resolve_key(server, false)?;
    let public_key_path =
        resolve_key(server, true)?.ok_or_else(|| {
            DeployError::FileNotFound("no SSH public key found to authorize".to_string())
        })?;
    let public_key = std::fs::read_to_string(&public_key_path)?;

    // Provisioning connects as root; the operator user does not
    // exist yet.
    let executor = RemoteExecutor::connect(ctx, &server.host, server.port, "root", key.as_deref())?;

    Provisioner::new(&executor)
        .with_progress(progress)
        .provision(ctx, &server.user, &public_key)
}

/// The private key configured for a server, or the first default
/// key under `~/.ssh`. With `public` set, resolves the matching
/// `.pub` file instead.
fn resolve_key(server: &Server, public: bool) -> DeployResult<Option<String>> {
    let suffix = if public { ".pub" } else { "" };

    if let Some(key) = &server.ssh_key {
        let path = format!("{key}{suffix}");
        return if Path::new(&path).exists() {
            Ok(Some(path))
        } else {
            Err(DeployError::FileNotFound(path))
        };
    }

    let home = std::env::var("HOME").map_err(|_| DeployError::EnvMissing("HOME".to_string()))?;
    let ssh_dir = PathBuf::from(home).join(".ssh");

    for name in ["id_rsa", "id_ecdsa", "id_ed25519"] {
        let path = ssh_dir.join(format!("{name}{suffix}"));
        if path.exists() {
            return Ok(Some(path.display().to_string()));
        }
    }

    Ok(None)
}
