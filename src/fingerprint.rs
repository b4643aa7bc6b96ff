use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::Service;
use crate::error::DeployResult;

/// The container label carrying the fingerprint of the declaration
/// the container was started from.
pub const CONFIG_HASH_LABEL: &str = "config-hash";

/// Content hash over a service's declared fields.
///
/// The encoding is canonical: map keys are ordered
/// lexicographically and sequence elements are sorted by their
/// rendered string form, so reordering env vars, volumes, forwards,
/// or routes in the project file does not change the digest, while
/// any change to a declared value does. The hex digest is stored as
/// the [`CONFIG_HASH_LABEL`] label on the live container and
/// compared against the freshly computed value on the next run to
/// detect config drift.
pub fn fingerprint(service: &Service) -> DeployResult<String> {
    let canonical = canonicalize(serde_json::to_value(service)?);
    let encoded = serde_json::to_string(&canonical)?;

    let digest = Sha256::digest(encoded.as_bytes());
    Ok(hex::encode(digest))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(canonicalize).collect();
            items.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            Value::Array(items)
        }
        // serde_json maps iterate in key order, which gives the
        // lexicographic ordering the encoding requires.
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{HealthCheck, Service};

    fn sample() -> Service {
        Service::new("web", "nginx:1.19", 80)
            .env("A", "1")
            .env("B", "2")
            .volume("web-data:/data")
            .volume("/host/logs:/logs")
            .forward("8080:80")
            .route("/", false)
            .health_check(
                HealthCheck::new("/")
                    .interval(Duration::from_secs(1))
                    .retries(5),
            )
    }

    #[test]
    fn stable_across_runs() {
        assert_eq!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&sample()).unwrap()
        );
    }

    #[test]
    fn env_order_does_not_matter() {
        let reordered = Service::new("web", "nginx:1.19", 80)
            .env("B", "2")
            .env("A", "1")
            .volume("web-data:/data")
            .volume("/host/logs:/logs")
            .forward("8080:80")
            .route("/", false)
            .health_check(
                HealthCheck::new("/")
                    .interval(Duration::from_secs(1))
                    .retries(5),
            );

        assert_eq!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&reordered).unwrap()
        );
    }

    #[test]
    fn volume_order_does_not_matter() {
        let mut reordered = sample();
        reordered.volumes.reverse();

        assert_eq!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&reordered).unwrap()
        );
    }

    #[test]
    fn image_change_changes_hash() {
        let mut changed = sample();
        changed.image = "nginx:1.20".to_string();

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn env_value_change_changes_hash() {
        let changed = sample().env("A", "other");

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn added_forward_changes_hash() {
        let changed = sample().forward("9090:90");

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn route_change_changes_hash() {
        let mut changed = sample();
        changed.routes[0].strip_prefix = true;

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn health_check_presence_changes_hash() {
        let mut changed = sample();
        changed.health_check = None;

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn health_check_field_change_changes_hash() {
        let mut changed = sample();
        changed.health_check = Some(
            HealthCheck::new("/")
                .interval(Duration::from_secs(2))
                .retries(5),
        );

        assert_ne!(
            fingerprint(&sample()).unwrap(),
            fingerprint(&changed).unwrap()
        );
    }

    #[test]
    fn digest_is_hex_sha256() {
        let digest = fingerprint(&sample()).unwrap();

        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
