use std::collections::HashMap;

use serde::Deserialize;

use crate::context::Context;
use crate::error::{DeployError, DeployResult};
use crate::executor::{Executor, run_text};

/// Thin, typed wrappers over the Docker CLI.
///
/// Each method is one or a few executor calls with strictly parsed
/// output; input validation happens at the call sites in the
/// engine. All invocations funnel through the executor binding, so
/// on a remote host they share its single SSH session.
pub struct DockerCli<'a> {
    executor: &'a dyn Executor,
}

impl<'a> DockerCli<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    fn docker(&self, ctx: &Context, args: &[&str]) -> DeployResult<String> {
        run_text(self.executor, ctx, "docker", args)
    }

    /// Pull an image into the host's local cache. Idempotent.
    pub fn image_pull(&self, ctx: &Context, image: &str) -> DeployResult<()> {
        self.docker(ctx, &["pull", image])?;
        Ok(())
    }

    /// The local image id for a reference, queried after a pull.
    pub fn image_id(&self, ctx: &Context, image: &str) -> DeployResult<String> {
        self.docker(
            ctx,
            &["images", "--no-trunc", "--format={{.ID}}", image],
        )
    }

    /// Start a detached container from a fully assembled spec.
    pub fn container_run(&self, ctx: &Context, spec: &RunSpec) -> DeployResult<()> {
        let args = spec.args();
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(ctx, &refs)?;
        Ok(())
    }

    /// Inspect a container and parse the handful of paths the
    /// engine reads; unknown fields are ignored.
    pub fn container_inspect(&self, ctx: &Context, id_or_name: &str) -> DeployResult<ContainerInfo> {
        let output = self.docker(ctx, &["inspect", id_or_name])?;
        let mut infos: Vec<ContainerInfo> = serde_json::from_str(&output)?;
        infos
            .pop()
            .ok_or_else(|| DeployError::Other(format!("empty inspect output for {id_or_name}")))
    }

    /// Ids of all containers attached to a network.
    pub fn containers_on_network(&self, ctx: &Context, network: &str) -> DeployResult<Vec<String>> {
        let filter = format!("network={network}");
        let output = self.docker(ctx, &["ps", "-aq", "--filter", &filter])?;
        Ok(output.split_whitespace().map(ToString::to_string).collect())
    }

    /// Find the container carrying `alias` on `network`, if any.
    pub fn find_by_alias(
        &self,
        ctx: &Context,
        alias: &str,
        network: &str,
    ) -> DeployResult<Option<ContainerInfo>> {
        for id in self.containers_on_network(ctx, network)? {
            // A container can disappear between ps and inspect.
            let Ok(info) = self.container_inspect(ctx, &id) else {
                continue;
            };
            if info.has_alias(network, alias) {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// The runtime's health status string for a container.
    pub fn container_health(&self, ctx: &Context, name: &str) -> DeployResult<String> {
        self.docker(
            ctx,
            &["inspect", "--format={{.State.Health.Status}}", name],
        )
    }

    pub fn container_stop(&self, ctx: &Context, id: &str) -> DeployResult<()> {
        self.docker(ctx, &["stop", id])?;
        Ok(())
    }

    pub fn container_remove(&self, ctx: &Context, id: &str) -> DeployResult<()> {
        self.docker(ctx, &["rm", id])?;
        Ok(())
    }

    pub fn container_remove_force(&self, ctx: &Context, name: &str) -> DeployResult<()> {
        self.docker(ctx, &["rm", "-f", name])?;
        Ok(())
    }

    pub fn container_rename(&self, ctx: &Context, from: &str, to: &str) -> DeployResult<()> {
        self.docker(ctx, &["rename", from, to])?;
        Ok(())
    }

    pub fn network_exists(&self, ctx: &Context, network: &str) -> DeployResult<bool> {
        let output = self.docker(ctx, &["network", "ls", "--format", "{{.Name}}"])?;
        Ok(output.lines().any(|line| line.trim() == network))
    }

    pub fn network_create(&self, ctx: &Context, network: &str) -> DeployResult<()> {
        self.docker(ctx, &["network", "create", network])?;
        Ok(())
    }

    pub fn network_connect(
        &self,
        ctx: &Context,
        network: &str,
        container: &str,
        alias: Option<&str>,
    ) -> DeployResult<()> {
        match alias {
            Some(alias) => {
                self.docker(ctx, &["network", "connect", "--alias", alias, network, container])?;
            }
            None => {
                self.docker(ctx, &["network", "connect", network, container])?;
            }
        }
        Ok(())
    }

    pub fn network_disconnect(
        &self,
        ctx: &Context,
        network: &str,
        container: &str,
    ) -> DeployResult<()> {
        self.docker(ctx, &["network", "disconnect", network, container])?;
        Ok(())
    }

    pub fn volume_exists(&self, ctx: &Context, volume: &str) -> DeployResult<bool> {
        Ok(self.docker(ctx, &["volume", "inspect", volume]).is_ok())
    }

    pub fn volume_create(&self, ctx: &Context, volume: &str) -> DeployResult<()> {
        self.docker(ctx, &["volume", "create", volume])?;
        Ok(())
    }
}

/// Everything `docker run` needs for one container, assembled by
/// the engine. [`RunSpec::args`] renders the argument list in a
/// fixed order so runs are reproducible and testable.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub network: String,
    pub alias: String,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<String>,
    pub forwards: Vec<String>,
    pub health: Option<HealthSpec>,
    pub labels: Vec<(String, String)>,
    pub image: String,
}

/// Runtime health probe attached at `docker run` time: an HTTP GET
/// against the service port inside the container.
#[derive(Debug, Clone)]
pub struct HealthSpec {
    pub port: u16,
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl RunSpec {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--network".to_string(),
            self.network.clone(),
            "--network-alias".to_string(),
            self.alias.clone(),
        ];

        for (name, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{name}={value}"));
        }

        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }

        if let Some(health) = &self.health {
            args.push("--health-cmd".to_string());
            args.push(format!(
                "curl -f http://localhost:{}{} || exit 1",
                health.port, health.path
            ));
            args.push("--health-interval".to_string());
            args.push(format!("{}s", health.interval_secs));
            args.push("--health-retries".to_string());
            args.push(health.retries.to_string());
            args.push("--health-timeout".to_string());
            args.push(format!("{}s", health.timeout_secs));
        }

        for forward in &self.forwards {
            args.push("-p".to_string());
            args.push(forward.clone());
        }

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args
    }
}

/// The observation the engine reads back from `docker inspect`:
/// only the paths reconciliation decisions depend on.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "Id")]
    pub id: String,
    /// The image id the container was created from.
    #[serde(rename = "Image", default)]
    pub image_id: String,
    #[serde(rename = "Config", default)]
    pub config: ContainerConfig,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
    #[serde(rename = "HostConfig", default)]
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "Networks", default)]
    pub networks: HashMap<String, NetworkAttachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkAttachment {
    #[serde(rename = "Aliases", default)]
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "Binds", default)]
    pub binds: Option<Vec<String>>,
}

impl ContainerInfo {
    #[must_use]
    pub fn has_alias(&self, network: &str, alias: &str) -> bool {
        self.network_settings
            .networks
            .get(network)
            .and_then(|attachment| attachment.aliases.as_ref())
            .is_some_and(|aliases| aliases.iter().any(|a| a == alias))
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}
