use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// The parsed project declaration: one project, the servers it
/// deploys to, and the services, storages, and volumes it runs.
///
/// # Example
///
/// ```
/// use gantry::config::Config;
///
/// let cfg = Config::parse(
///     "
/// project:
///   name: shop
///   domain: shop.example.com
///   email: ops@example.com
/// servers:
///   - host: shop.example.com
///     user: deploy
/// services:
///   - name: web
///     image: shop/web:latest
///     port: 3000
///     routes:
///       - path: /
/// ",
/// )
/// .unwrap();
///
/// assert_eq!(cfg.network_name(), "shop-network");
/// assert_eq!(cfg.services[0].name, "web");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: Project,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub storages: Vec<Storage>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
}

const fn default_ssh_port() -> u16 {
    22
}

/// One deployable unit: the engine's unit of work.
///
/// `name` doubles as the container name and its network alias.
/// Storages and the synthesized reverse proxy flow through the
/// exact same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub forwards: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl Service {
    #[must_use]
    pub fn new(name: &str, image: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            port,
            path: None,
            env: IndexMap::new(),
            volumes: Vec::new(),
            forwards: Vec::new(),
            routes: Vec::new(),
            health_check: None,
        }
    }

    #[must_use]
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a `"<source>:<target>"` mount spec.
    #[must_use]
    pub fn volume(mut self, spec: &str) -> Self {
        self.volumes.push(spec.to_string());
        self
    }

    /// Add a `"<host_port>:<container_port>"` publication.
    #[must_use]
    pub fn forward(mut self, spec: &str) -> Self {
        self.forwards.push(spec.to_string());
        self
    }

    #[must_use]
    pub fn route(mut self, path_prefix: &str, strip_prefix: bool) -> Self {
        self.routes.push(Route {
            path_prefix: path_prefix.to_string(),
            strip_prefix,
        });
        self
    }

    #[must_use]
    pub fn health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }
}

/// A stateful side-service (database, queue). Reconciled through
/// the same engine as a [`Service`], without a routed port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

impl Storage {
    #[must_use]
    pub fn to_service(&self) -> Service {
        Service {
            name: self.name.clone(),
            image: self.image.clone(),
            port: 0,
            path: None,
            env: self.env.clone(),
            volumes: self.volumes.clone(),
            forwards: Vec::new(),
            routes: Vec::new(),
            health_check: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "path")]
    pub path_prefix: String,
    #[serde(default)]
    pub strip_prefix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval", with = "duration_secs")]
    pub interval: Duration,
    #[serde(default = "default_health_interval", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

fn default_health_path() -> String {
    "/".to_string()
}

const fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_health_retries() -> u32 {
    3
}

impl HealthCheck {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            interval: default_health_interval(),
            timeout: default_health_interval(),
            retries: default_health_retries(),
        }
    }

    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Durations in YAML are either bare seconds (`5`) or a suffixed
/// string (`"500ms"`, `"5s"`, `"2m"`). They serialize back to the
/// suffixed form so fingerprints are stable.
mod duration_secs {
    use std::time::Duration;

    use serde::de::{self, Deserializer, Visitor};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a duration like 5, \"5s\", or \"500ms\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v).ok_or_else(|| E::custom(format!("invalid duration '{v}'")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = text.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = text.strip_suffix('m') {
        return mins
            .trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60));
    }
    None
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

impl Config {
    /// Load and validate a project file.
    pub fn load(path: &Path) -> DeployResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|_| DeployError::FileNotFound(path.display().to_string()))?;
        Self::parse(&data)
    }

    /// Parse and validate raw YAML. `${VAR}` references are
    /// expanded from the process environment before parsing, and
    /// each service's `.env` sidecar (under its `path`) is merged
    /// into its env map, sidecar winning on collision.
    pub fn parse(data: &str) -> DeployResult<Self> {
        let expanded = expand_env(data);

        let mut config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| DeployError::ConfigInvalid(format!("error parsing YAML: {e}")))?;

        for service in &mut config.services {
            let dir = service.path.clone().unwrap_or_else(|| "./".to_string());
            let env_path = Path::new(&dir).join(".env");
            if !env_path.exists() {
                continue;
            }
            let sidecar = std::fs::read_to_string(&env_path)?;
            for (key, value) in parse_env_file(&sidecar) {
                service.env.insert(key, value);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// The shared bridge network for this project.
    #[must_use]
    pub fn network_name(&self) -> String {
        format!("{}-network", self.project.name)
    }

    fn validate(&self) -> DeployResult<()> {
        if self.project.name.is_empty() {
            return invalid("project.name is required");
        }
        if !self.project.domain.is_empty() && !is_fqdn(&self.project.domain) {
            return invalid(&format!(
                "project.domain '{}' is not a fully qualified domain name",
                self.project.domain
            ));
        }
        if !self.project.email.is_empty() && !is_email(&self.project.email) {
            return invalid(&format!(
                "project.email '{}' is not a valid email address",
                self.project.email
            ));
        }

        for server in &self.servers {
            if server.host.is_empty() {
                return invalid("server.host is required");
            }
            if server.port == 0 {
                return invalid(&format!("server {}: port must be in 1..=65535", server.host));
            }
            if server.user.is_empty() {
                return invalid(&format!("server {}: user is required", server.host));
            }
        }

        for service in &self.services {
            validate_service(service)?;
            if service.port == 0 {
                return invalid(&format!(
                    "service {}: port must be in 1..=65535",
                    service.name
                ));
            }
        }

        for storage in &self.storages {
            validate_service(&storage.to_service())?;
        }

        Ok(())
    }
}

fn validate_service(service: &Service) -> DeployResult<()> {
    if service.name.is_empty() {
        return invalid("service name is required");
    }
    if service.image.is_empty() {
        return invalid(&format!("service {}: image is required", service.name));
    }

    for volume in &service.volumes {
        let Some((source, target)) = volume.split_once(':') else {
            return invalid(&format!(
                "service {}: volume '{volume}' must be <source>:<target>",
                service.name
            ));
        };
        if source.is_empty() || target.is_empty() {
            return invalid(&format!(
                "service {}: volume '{volume}' must be <source>:<target>",
                service.name
            ));
        }
        if !target.starts_with('/') {
            return invalid(&format!(
                "service {}: volume target '{target}' must be an absolute path",
                service.name
            ));
        }
    }

    for forward in &service.forwards {
        let valid = forward
            .split_once(':')
            .is_some_and(|(h, c)| h.parse::<u16>().is_ok() && c.parse::<u16>().is_ok());
        if !valid {
            return invalid(&format!(
                "service {}: forward '{forward}' must be <host_port>:<container_port>",
                service.name
            ));
        }
    }

    for route in &service.routes {
        if !route.path_prefix.starts_with('/') {
            return invalid(&format!(
                "service {}: route path '{}' must start with /",
                service.name, route.path_prefix
            ));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> DeployResult<()> {
    Err(DeployError::ConfigInvalid(message.to_string()))
}

fn is_fqdn(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && is_fqdn(domain)
}

/// Expand `${VAR}` references from the process environment.
/// Unset variables expand to the empty string.
fn expand_env(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut rest = data;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse `.env` sidecar content: `KEY=VALUE` lines, `#` comments,
/// optional surrounding quotes on the value.
fn parse_env_file(data: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
            })
            .unwrap_or(value);
        entries.push((key.to_string(), value.to_string()));
    }

    entries
}
