use std::thread;

use crate::config::HealthCheck;
use crate::context::Context;
use crate::docker::DockerCli;
use crate::error::{DeployError, DeployResult};

/// Poll a container's health status until the runtime reports
/// `healthy`, consuming at most `retries` observations spaced by
/// `interval`. An inspect error counts as an unhealthy
/// observation: right after `docker run` the health state can be
/// missing entirely.
pub fn wait_healthy(
    docker: &DockerCli<'_>,
    ctx: &Context,
    container: &str,
    check: &HealthCheck,
) -> DeployResult<()> {
    for attempt in 1..=check.retries {
        if let Ok(status) = docker.container_health(ctx, container) {
            if status.trim() == "healthy" {
                return Ok(());
            }
        }

        if attempt < check.retries {
            ctx.check()?;
            thread::sleep(check.interval);
        }
    }

    Err(DeployError::HealthcheckTimeout(
        container.to_string(),
        check.retries,
    ))
}
