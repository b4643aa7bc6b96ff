use std::thread;
use std::time::Duration;

use crate::config::{Config, Service};
use crate::context::Context;
use crate::docker::{DockerCli, HealthSpec, RunSpec};
use crate::error::{DeployError, DeployResult};
use crate::executor::{Executor, run_text};
use crate::fingerprint::{CONFIG_HASH_LABEL, fingerprint};
use crate::health::wait_healthy;
use crate::progress::{Progress, SilentProgress};
use crate::proxy;

const SHADOW_SUFFIX: &str = "_new";
const DEFAULT_ALIAS_SETTLE: Duration = Duration::from_secs(1);

static SILENT: SilentProgress = SilentProgress;

/// What `reconcile` decided to do with a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    Installed,
    Updated,
    Unchanged,
}

/// The per-host deployment engine.
///
/// A `Deployment` is a pure function of the project model and the
/// executor it is bound to: all state of record lives in the
/// host's container runtime (names, labels, networks). Services
/// are reconciled one at a time, in declaration order, and the
/// reverse proxy last, so its upstream aliases all resolve by the
/// time it starts.
///
/// # Example
///
/// ```no_run
/// use gantry::{Config, Context, Deployment, LocalExecutor};
///
/// fn main() -> gantry::DeployResult<()> {
///     let cfg = Config::load(std::path::Path::new("gantry.yaml"))?;
///     let executor = LocalExecutor::new();
///
///     Deployment::new(&executor).deploy(&Context::new(), &cfg)
/// }
/// ```
pub struct Deployment<'a> {
    executor: &'a dyn Executor,
    progress: &'a dyn Progress,
    settle: Duration,
}

impl<'a> Deployment<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self {
            executor,
            progress: &SILENT,
            settle: DEFAULT_ALIAS_SETTLE,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Override the pause between attaching the service alias to
    /// the new container and detaching the old one. The default of
    /// one second absorbs cached lookups in the runtime's embedded
    /// DNS resolver; the swap sequence itself is fixed.
    #[must_use]
    pub const fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Reconcile one host to the declaration: prerequisites,
    /// storages, services in order, proxy last.
    pub fn deploy(&self, ctx: &Context, cfg: &Config) -> DeployResult<()> {
        let network = cfg.network_name();
        let docker = DockerCli::new(self.executor);

        self.progress.step("Preparing network");
        self.ensure_network(&docker, ctx, &network)?;
        self.progress.success("Network ready");

        self.progress.step("Preparing volumes");
        for volume in &cfg.volumes {
            self.ensure_volume(&docker, ctx, volume)?;
        }
        self.progress.success("Volumes ready");

        for storage in &cfg.storages {
            self.reconcile_reported(ctx, &storage.to_service(), &network)?;
        }

        for service in &cfg.services {
            self.reconcile_reported(ctx, service, &network)?;
        }

        self.progress.step("Starting proxy");
        let project_path = self.prepare_project_folder(ctx, &cfg.project.name)?;
        let config_path = proxy::materialize(self.executor, ctx, cfg, &project_path)?;
        let proxy_service = proxy::proxy_service(cfg, &project_path, &config_path);
        match self.reconcile(ctx, &proxy_service, &network) {
            Ok(_) => self.progress.success("Proxy started"),
            Err(err) => {
                self.progress.error(&format!("Failed to start proxy: {err}"));
                return Err(err);
            }
        }

        Ok(())
    }

    fn reconcile_reported(
        &self,
        ctx: &Context,
        service: &Service,
        network: &str,
    ) -> DeployResult<ServiceOutcome> {
        self.progress
            .step(&format!("Deploying service: {}", service.name));

        match self.reconcile(ctx, service, network) {
            Ok(ServiceOutcome::Unchanged) => {
                self.progress
                    .success(&format!("Service unchanged: {}", service.name));
                Ok(ServiceOutcome::Unchanged)
            }
            Ok(outcome) => {
                self.progress
                    .success(&format!("Service deployed: {}", service.name));
                Ok(outcome)
            }
            Err(err) => {
                self.progress
                    .error(&format!("Failed to deploy service {}: {err}", service.name));
                Err(err)
            }
        }
    }

    /// Decide install, update, or no-op for one service and carry
    /// it out.
    pub fn reconcile(
        &self,
        ctx: &Context,
        service: &Service,
        network: &str,
    ) -> DeployResult<ServiceOutcome> {
        let docker = DockerCli::new(self.executor);

        docker.image_pull(ctx, &service.image)?;
        let image_id = docker.image_id(ctx, &service.image)?;

        let Some(live) = docker.find_by_alias(ctx, &service.name, network)? else {
            self.install(ctx, service, network)?;
            return Ok(ServiceOutcome::Installed);
        };

        // Image drift: the container runs an older id than the
        // reference now resolves to.
        if live.image_id != image_id {
            self.update(ctx, service, network)?;
            return Ok(ServiceOutcome::Updated);
        }

        // Config drift: the declaration changed since the
        // container was started.
        if live.label(CONFIG_HASH_LABEL) != Some(fingerprint(service)?.as_str()) {
            self.update(ctx, service, network)?;
            return Ok(ServiceOutcome::Updated);
        }

        Ok(ServiceOutcome::Unchanged)
    }

    /// First start of a service: no live container exists yet. A
    /// container that fails its health wait is left in place for
    /// diagnosis - there is nothing to roll back to.
    pub fn install(&self, ctx: &Context, service: &Service, network: &str) -> DeployResult<()> {
        let docker = DockerCli::new(self.executor);

        docker.image_pull(ctx, &service.image)?;
        self.start_container(ctx, service, network, "")?;

        if let Some(check) = &service.health_check {
            wait_healthy(&docker, ctx, &service.name, check)?;
        }

        Ok(())
    }

    /// Zero-downtime replacement of a live container: start a
    /// shadow under `<name>_new`, wait for its health, then move
    /// the service alias over atomically. An unhealthy shadow is
    /// force-removed and the live container stays untouched.
    pub fn update(&self, ctx: &Context, service: &Service, network: &str) -> DeployResult<()> {
        let docker = DockerCli::new(self.executor);
        let shadow = shadow_name(&service.name);

        docker.image_pull(ctx, &service.image)?;
        self.start_container(ctx, service, network, SHADOW_SUFFIX)?;

        if let Some(check) = &service.health_check {
            if let Err(err) = wait_healthy(&docker, ctx, &shadow, check) {
                if let Err(cleanup) = docker.container_remove_force(ctx, &shadow) {
                    self.progress.warn(&format!(
                        "failed to remove unhealthy container {shadow}: {cleanup}"
                    ));
                }
                return Err(err);
            }
        }

        let old_id = self.switch_traffic(ctx, service, network)?;
        self.finish_swap(ctx, &old_id, &service.name);

        Ok(())
    }

    /// The atomic alias swap. Once the service alias is attached
    /// to the shadow, the swap is committed: later failures are
    /// reported as warnings, never reverted.
    fn switch_traffic(
        &self,
        ctx: &Context,
        service: &Service,
        network: &str,
    ) -> DeployResult<String> {
        let docker = DockerCli::new(self.executor);
        let shadow = shadow_name(&service.name);

        // Finding no live container here is a fatal inconsistency:
        // update only runs when one was observed.
        let old = docker
            .find_by_alias(ctx, &service.name, network)?
            .ok_or_else(|| DeployError::ContainerNotFound {
                alias: service.name.clone(),
                network: network.to_string(),
            })?;

        // Critical section: no cancellation checks until the old
        // container is off the network.
        ctx.check()?;

        docker.network_disconnect(ctx, network, &shadow)?;

        if let Err(err) = docker.network_connect(ctx, network, &shadow, Some(&service.name)) {
            // The shadow is detached and still named *_new; it can
            // never serve traffic, so remove it.
            if let Err(cleanup) = docker.container_remove_force(ctx, &shadow) {
                self.progress.warn(&format!(
                    "failed to remove detached container {shadow}: {cleanup}"
                ));
            }
            return Err(err);
        }

        // Both containers answer to the alias until cached DNS
        // lookups drain.
        thread::sleep(self.settle);

        if let Err(err) = docker.network_disconnect(ctx, network, &old.id) {
            self.progress.warn(&format!(
                "failed to detach old container for {}: {err}",
                service.name
            ));
        }

        Ok(old.id)
    }

    /// Stop and remove the replaced container and give the shadow
    /// its canonical name. Traffic already flows to the shadow, so
    /// failures here are surfaced but do not fail the update; a
    /// mis-named survivor is still found by alias on the next run.
    fn finish_swap(&self, ctx: &Context, old_id: &str, name: &str) {
        let docker = DockerCli::new(self.executor);

        if let Err(err) = docker.container_stop(ctx, old_id) {
            self.progress
                .warn(&format!("failed to stop old container for {name}: {err}"));
        }
        if let Err(err) = docker.container_remove(ctx, old_id) {
            self.progress
                .warn(&format!("failed to remove old container for {name}: {err}"));
        }
        if let Err(err) = docker.container_rename(ctx, &shadow_name(name), name) {
            self.progress
                .warn(&format!("failed to rename new container for {name}: {err}"));
        }
    }

    fn start_container(
        &self,
        ctx: &Context,
        service: &Service,
        network: &str,
        suffix: &str,
    ) -> DeployResult<()> {
        let docker = DockerCli::new(self.executor);
        let name = format!("{}{suffix}", service.name);

        let spec = RunSpec {
            name: name.clone(),
            network: network.to_string(),
            alias: name,
            env: service
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            volumes: service.volumes.clone(),
            forwards: service.forwards.clone(),
            health: service.health_check.as_ref().map(|check| HealthSpec {
                port: service.port,
                path: check.path.clone(),
                interval_secs: check.interval.as_secs(),
                timeout_secs: check.timeout.as_secs(),
                retries: check.retries,
            }),
            labels: vec![(CONFIG_HASH_LABEL.to_string(), fingerprint(service)?)],
            image: service.image.clone(),
        };

        docker.container_run(ctx, &spec)
    }

    fn ensure_network(
        &self,
        docker: &DockerCli<'_>,
        ctx: &Context,
        network: &str,
    ) -> DeployResult<()> {
        if docker.network_exists(ctx, network)? {
            return Ok(());
        }
        docker.network_create(ctx, network)
    }

    fn ensure_volume(
        &self,
        docker: &DockerCli<'_>,
        ctx: &Context,
        volume: &str,
    ) -> DeployResult<()> {
        if docker.volume_exists(ctx, volume)? {
            return Ok(());
        }
        docker.volume_create(ctx, volume)
    }

    /// `~/projects/<name>` on the host: TLS material and the
    /// rendered proxy config live here.
    fn prepare_project_folder(&self, ctx: &Context, project: &str) -> DeployResult<String> {
        let home = run_text(self.executor, ctx, "sh", &["-c", "echo $HOME"])?;
        let path = format!("{}/projects/{project}", home.trim());
        self.executor.run(ctx, "mkdir", &["-p", &path])?;
        Ok(path)
    }
}

#[must_use]
fn shadow_name(name: &str) -> String {
    format!("{name}{SHADOW_SUFFIX}")
}
