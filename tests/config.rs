use gantry::{Config, DeployError};

fn base_yaml(services: &str) -> String {
    format!(
        "
project:
  name: shop
  domain: shop.example.com
  email: ops@example.com
servers:
  - host: shop.example.com
    user: deploy
services:
{services}
"
    )
}

#[test]
fn parses_a_full_project() {
    let yaml = "
project:
  name: shop
  domain: shop.example.com
  email: ops@example.com
servers:
  - host: shop.example.com
    port: 2222
    user: deploy
    ssh_key: /home/op/.ssh/id_ed25519
services:
  - name: web
    image: shop/web:latest
    port: 3000
    env:
      RUST_LOG: info
    volumes:
      - web-data:/data
    forwards:
      - 8080:3000
    health_check:
      path: /healthz
      interval: 2s
      timeout: 1s
      retries: 10
    routes:
      - path: /
      - path: /admin
        strip_prefix: true
storages:
  - name: db
    image: postgres:16
    env:
      POSTGRES_DB: shop
    volumes:
      - db-data:/var/lib/postgresql/data
volumes:
  - web-data
  - db-data
";

    let cfg = Config::parse(yaml).unwrap();

    assert_eq!(cfg.project.name, "shop");
    assert_eq!(cfg.network_name(), "shop-network");
    assert_eq!(cfg.servers[0].port, 2222);
    assert_eq!(
        cfg.servers[0].ssh_key.as_deref(),
        Some("/home/op/.ssh/id_ed25519")
    );

    let web = &cfg.services[0];
    assert_eq!(web.name, "web");
    assert_eq!(web.port, 3000);
    assert_eq!(web.env.get("RUST_LOG").map(String::as_str), Some("info"));
    assert_eq!(web.forwards, vec!["8080:3000"]);
    assert_eq!(web.routes.len(), 2);
    assert!(web.routes[1].strip_prefix);

    let health = web.health_check.as_ref().unwrap();
    assert_eq!(health.path, "/healthz");
    assert_eq!(health.interval, std::time::Duration::from_secs(2));
    assert_eq!(health.retries, 10);

    assert_eq!(cfg.storages[0].name, "db");
    assert_eq!(cfg.volumes, vec!["web-data", "db-data"]);
}

#[test]
fn server_port_defaults_to_22() {
    let yaml = base_yaml(
        "  - name: web
    image: shop/web:latest
    port: 3000
",
    );

    let cfg = Config::parse(&yaml).unwrap();

    assert_eq!(cfg.servers[0].port, 22);
}

#[test]
fn expands_env_references_before_parsing() {
    std::env::set_var("GANTRY_TEST_TAG", "v1.2.3");

    let yaml = base_yaml(
        "  - name: web
    image: shop/web:${GANTRY_TEST_TAG}
    port: 3000
",
    );

    let cfg = Config::parse(&yaml).unwrap();

    assert_eq!(cfg.services[0].image, "shop/web:v1.2.3");
}

#[test]
fn merges_env_sidecar_with_sidecar_winning() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "FROM_SIDECAR=yes\nSHARED=sidecar\n",
    )
    .unwrap();

    let yaml = base_yaml(&format!(
        "  - name: web
    image: shop/web:latest
    port: 3000
    path: {}
    env:
      SHARED: yaml
      ONLY_YAML: kept
",
        dir.path().display()
    ));

    let cfg = Config::parse(&yaml).unwrap();
    let env = &cfg.services[0].env;

    assert_eq!(env.get("FROM_SIDECAR").map(String::as_str), Some("yes"));
    assert_eq!(env.get("SHARED").map(String::as_str), Some("sidecar"));
    assert_eq!(env.get("ONLY_YAML").map(String::as_str), Some("kept"));
}

#[test]
fn rejects_malformed_yaml() {
    let err = Config::parse("project: [not, a, mapping").unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("error parsing YAML")));
}

#[test]
fn rejects_invalid_email() {
    let yaml = "
project:
  name: shop
  domain: shop.example.com
  email: not-an-email
services:
  - name: web
    image: shop/web:latest
    port: 3000
";

    let err = Config::parse(yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("email")));
}

#[test]
fn rejects_invalid_domain() {
    let yaml = "
project:
  name: shop
  domain: not_a_domain
  email: ops@example.com
services:
  - name: web
    image: shop/web:latest
    port: 3000
";

    let err = Config::parse(yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("domain")));
}

#[test]
fn rejects_missing_service_port() {
    let yaml = base_yaml(
        "  - name: web
    image: shop/web:latest
",
    );

    let err = Config::parse(&yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("port")));
}

#[test]
fn rejects_malformed_volume_spec() {
    let yaml = base_yaml(
        "  - name: web
    image: shop/web:latest
    port: 3000
    volumes:
      - just-a-name
",
    );

    let err = Config::parse(&yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("volume")));
}

#[test]
fn rejects_relative_volume_target() {
    let yaml = base_yaml(
        "  - name: web
    image: shop/web:latest
    port: 3000
    volumes:
      - web-data:relative/path
",
    );

    let err = Config::parse(&yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("absolute")));
}

#[test]
fn rejects_malformed_forward() {
    let yaml = base_yaml(
        "  - name: web
    image: shop/web:latest
    port: 3000
    forwards:
      - eighty:80
",
    );

    let err = Config::parse(&yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("forward")));
}

#[test]
fn validates_storage_volumes_too() {
    let yaml = "
project:
  name: shop
  domain: shop.example.com
  email: ops@example.com
storages:
  - name: db
    image: postgres:16
    volumes:
      - broken
";

    let err = Config::parse(yaml).unwrap_err();

    assert!(matches!(err, DeployError::ConfigInvalid(message)
        if message.contains("volume")));
}
