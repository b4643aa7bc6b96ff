use std::time::Duration;

use crate::context::Context;
use crate::error::DeployResult;
use crate::executor::Executor;
use crate::progress::{Progress, SilentProgress};

/// Whole-run deadline for host provisioning.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(300);

static SILENT: SilentProgress = SilentProgress;

/// One-shot setup of a fresh host over a root SSH session:
/// container runtime, firewall, operator account, SSH key. Not
/// part of the reconciliation loop - deploys assume a provisioned
/// host.
pub struct Provisioner<'a> {
    executor: &'a dyn Executor,
    progress: &'a dyn Progress,
}

impl<'a> Provisioner<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self {
            executor,
            progress: &SILENT,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Run the full provisioning sequence: software, firewall,
    /// operator user, authorized key. `public_key` is the key
    /// text to install for the operator user.
    pub fn provision(&self, ctx: &Context, user: &str, public_key: &str) -> DeployResult<()> {
        let ctx = ctx.with_timeout(PROVISION_TIMEOUT);

        self.install_software(&ctx)?;
        self.configure_firewall(&ctx)?;
        self.create_operator_user(&ctx, user)?;
        self.install_authorized_key(&ctx, user, public_key)?;

        Ok(())
    }

    fn run_sequence(&self, ctx: &Context, step: &str, done: &str, commands: &[String]) -> DeployResult<()> {
        self.progress.step(step);

        for command in commands {
            if let Err(err) = self.executor.run(ctx, "sh", &["-c", command]) {
                self.progress.error(&format!("{step} failed: {err}"));
                return Err(err);
            }
        }

        self.progress.success(done);
        Ok(())
    }

    fn install_software(&self, ctx: &Context) -> DeployResult<()> {
        let commands = vec![
            "apt-get update".to_string(),
            "apt-get install -y apt-transport-https ca-certificates curl wget git software-properties-common"
                .to_string(),
            "curl -fsSL https://download.docker.com/linux/ubuntu/gpg | apt-key add -".to_string(),
            "add-apt-repository \"deb [arch=amd64] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable\" -y"
                .to_string(),
            "apt-get update".to_string(),
            "apt-get install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin".to_string(),
        ];

        self.run_sequence(
            ctx,
            "Installing Docker and essential software...",
            "Essential software and Docker installed.",
            &commands,
        )
    }

    fn configure_firewall(&self, ctx: &Context) -> DeployResult<()> {
        let commands = vec![
            "apt-get install -y ufw".to_string(),
            "ufw default deny incoming".to_string(),
            "ufw default allow outgoing".to_string(),
            "ufw allow 22/tcp".to_string(),
            "ufw allow 80/tcp".to_string(),
            "ufw allow 443/tcp".to_string(),
            "echo 'y' | ufw enable".to_string(),
        ];

        self.run_sequence(
            ctx,
            "Configuring firewall...",
            "Firewall configured.",
            &commands,
        )
    }

    fn create_operator_user(&self, ctx: &Context, user: &str) -> DeployResult<()> {
        let exists = self
            .executor
            .run(ctx, "sh", &["-c", &format!("id -u {user} > /dev/null 2>&1")])
            .is_ok();

        if exists {
            self.progress
                .warn(&format!("User {user} already exists, skipping creation."));
        } else {
            let commands = vec![format!("adduser --gecos '' --disabled-password {user}")];
            self.run_sequence(
                ctx,
                &format!("Creating user {user}..."),
                &format!("User {user} created."),
                &commands,
            )?;
        }

        self.run_sequence(
            ctx,
            &format!("Adding user {user} to the docker group..."),
            &format!("User {user} added to the docker group."),
            &[format!("usermod -aG docker {user}")],
        )
    }

    fn install_authorized_key(
        &self,
        ctx: &Context,
        user: &str,
        public_key: &str,
    ) -> DeployResult<()> {
        let key = public_key.trim();
        let commands = vec![
            format!("mkdir -p /home/{user}/.ssh"),
            format!("echo '{key}' | tee -a /home/{user}/.ssh/authorized_keys"),
            format!("chown -R {user}:{user} /home/{user}/.ssh"),
            format!("chmod 700 /home/{user}/.ssh"),
            format!("chmod 600 /home/{user}/.ssh/authorized_keys"),
        ];

        self.run_sequence(
            ctx,
            "Configuring SSH access for the operator user...",
            "SSH access configured.",
            &commands,
        )
    }
}
