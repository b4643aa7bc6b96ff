use crate::context::Context;
use crate::error::DeployResult;
use crate::executor::Executor;
use crate::progress::{Progress, SilentProgress};

static SILENT: SilentProgress = SilentProgress;

/// Builds and publishes service images on the operator machine.
/// Hosts never build anything; they only pull.
pub struct Build<'a> {
    executor: &'a dyn Executor,
    progress: &'a dyn Progress,
}

impl<'a> Build<'a> {
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

    /// `docker build` an image from a service's path, targeting
    /// the hosts' architecture.
    pub fn build(&self, ctx: &Context, image: &str, path: &str) -> DeployResult<()> {
        self.progress.step(&format!("Building image {image}"));

        let result = self.executor.run(
            ctx,
            "docker",
            &["build", "-t", image, "--platform", "linux/amd64", path],
        );

        match result {
            Ok(_) => {
                self.progress.success(&format!("Image {image} built"));
                Ok(())
            }
            Err(err) => {
                self.progress
                    .error(&format!("Failed to build image {image}: {err}"));
                Err(err)
            }
        }
    }

    /// Push an image to its registry.
    pub fn push(&self, ctx: &Context, image: &str) -> DeployResult<()> {
        self.progress.step(&format!("Pushing image {image}"));

        match self.executor.run(ctx, "docker", &["push", image]) {
            Ok(_) => {
                self.progress.success(&format!("Image {image} pushed"));
                Ok(())
            }
            Err(err) => {
                self.progress
                    .error(&format!("Failed to push image {image}: {err}"));
                Err(err)
            }
        }
    }
}
