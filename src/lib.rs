//! Zero-downtime Docker deployments over SSH.
//!
//! Gantry takes one declarative YAML file describing a project -
//! its servers, services, storages, and volumes - and reconciles
//! the containers running on each host to match it. Updates swap
//! traffic between the old and new container through a network
//! alias, so the generated reverse proxy never serves a dropped
//! request.
//!
//! The name comes from the crane that moves shipping containers
//! between ship and dock.
//!
//! # Overview
//!
//! A deployment run wires together:
//!
//! - A [`Config`] parsed from `gantry.yaml` (services, storages,
//!   volumes, servers)
//! - An [`Executor`] binding for each host - local processes or a
//!   persistent SSH session
//! - A [`Deployment`] engine that installs, updates, or skips
//!   each service and reconciles the reverse proxy last
//!
//! # Quick start
//!
//! ```yaml
//! # gantry.yaml
//! project:
//!   name: shop
//!   domain: shop.example.com
//!   email: ops@example.com
//! servers:
//!   - host: shop.example.com
//!     user: deploy
//! services:
//!   - name: web
//!     image: registry.example.com/shop/web:latest
//!     port: 3000
//!     health_check:
//!       path: /
//!       interval: 5s
//!       retries: 10
//!     routes:
//!       - path: /
//! ```
//!
//! ```sh
//! # Provision a fresh server (Docker, firewall, operator user)
//! gantry setup
//!
//! # Build and push images for services with a build path
//! gantry build
//!
//! # Reconcile every server to the declaration
//! gantry deploy
//! ```
//!
//! # Architecture
//!
//! Each host is reconciled independently and sequentially. Per
//! service the engine pulls the image, observes the container
//! currently holding the service alias, and decides install,
//! update, or no-op by comparing image ids and the `config-hash`
//! label against [`fingerprint`]. An update starts a shadow
//! container under `<name>_new`, waits for its health check, and
//! atomically moves the alias before retiring the old container.
//!
//! [`fingerprint`]: fingerprint::fingerprint

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod build;
pub mod cli;
pub mod config;
pub mod context;
pub mod deployment;
pub mod docker;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod health;
pub mod progress;
pub mod provision;
pub mod proxy;

pub use config::{Config, HealthCheck, Route, Service, Storage};
pub use context::Context;
pub use deployment::{Deployment, ServiceOutcome};
pub use error::{DeployError, DeployResult};
pub use executor::Executor;
pub use executor::local::LocalExecutor;
pub use executor::remote::RemoteExecutor;
pub use fingerprint::{CONFIG_HASH_LABEL, fingerprint};
pub use progress::{ConsoleProgress, Progress, SilentProgress};
