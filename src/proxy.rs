use std::io::Write;
use std::time::Duration;

use crate::config::{Config, HealthCheck, Service};
use crate::context::Context;
use crate::error::{DeployError, DeployResult};
use crate::executor::Executor;

/// Image the synthesized reverse proxy runs. TLS material is
/// mounted from the project folder, not issued by the engine.
pub const PROXY_IMAGE: &str = "nginx:1.27-alpine";
pub const PROXY_HTTP_PORT: u16 = 80;
pub const PROXY_HTTPS_PORT: u16 = 443;

/// Name the proxy container carries; reserved, services cannot
/// use it.
pub const PROXY_SERVICE_NAME: &str = "proxy";

/// Render the nginx config for every routed service: an upstream
/// per service resolved through the runtime's embedded DNS with a
/// short TTL, a plaintext redirect on 80, and TLS termination on
/// 443 with certificates keyed by domain.
#[must_use]
pub fn render_config(cfg: &Config) -> String {
    let domain = if cfg.project.domain.is_empty() {
        "localhost"
    } else {
        &cfg.project.domain
    };

    let routed: Vec<&Service> = cfg
        .services
        .iter()
        .filter(|service| !service.routes.is_empty())
        .collect();

    let mut out = String::new();

    for service in &routed {
        out.push_str(&format!(
            "upstream {name} {{\n    server {name}:{port};\n}}\n\n",
            name = service.name,
            port = service.port
        ));
    }

    out.push_str(&format!(
        "server {{\n\
         \x20   listen 80;\n\
         \x20   server_name {domain};\n\
         \x20   return 301 https://$server_name$request_uri;\n\
         }}\n\n"
    ));

    out.push_str(&format!(
        "server {{\n\
         \x20   listen 443 ssl;\n\
         \x20   http2 on;\n\
         \x20   server_name {domain};\n\
         \n\
         \x20   ssl_certificate /etc/nginx/ssl/{domain}.crt;\n\
         \x20   ssl_certificate_key /etc/nginx/ssl/{domain}.key;\n\
         \x20   ssl_protocols TLSv1.2 TLSv1.3;\n\
         \x20   ssl_prefer_server_ciphers on;\n"
    ));

    for service in &routed {
        for route in &service.routes {
            out.push('\n');
            out.push_str(&format!("    location {} {{\n", route.path_prefix));
            if route.strip_prefix {
                out.push_str(&format!(
                    "        rewrite ^{}(.*)$ /$1 break;\n",
                    route.path_prefix
                ));
            }
            out.push_str("        resolver 127.0.0.11 valid=1s;\n");
            out.push_str(&format!("        set $service {};\n", service.name));
            out.push_str("        proxy_pass http://$service;\n");
            out.push_str("    }\n");
        }
    }

    out.push_str("}\n");
    out
}

/// The proxy rendered as a service so it flows through the same
/// reconciliation as everything it fronts: fixed image, host ports
/// 80/443, the project folder (certs) and rendered config mounted
/// in, domain and contact email in the environment, health probe
/// on `/`.
#[must_use]
pub fn proxy_service(cfg: &Config, project_path: &str, config_path: &str) -> Service {
    Service::new(PROXY_SERVICE_NAME, PROXY_IMAGE, PROXY_HTTP_PORT)
        .env("DOMAIN", &cfg.project.domain)
        .env("EMAIL", &cfg.project.email)
        .volume(&format!("{project_path}/:/etc/nginx/ssl"))
        .volume(&format!("{config_path}:/etc/nginx/conf.d"))
        .forward(&format!("{PROXY_HTTP_PORT}:{PROXY_HTTP_PORT}"))
        .forward(&format!("{PROXY_HTTPS_PORT}:{PROXY_HTTPS_PORT}"))
        .health_check(
            HealthCheck::new("/")
                .interval(Duration::from_secs(1))
                .timeout(Duration::from_secs(1))
                .retries(30),
        )
}

/// Write the rendered config to a local temp file and copy it to
/// `<project_path>/nginx/default.conf` on the host. Returns the
/// config directory path.
pub fn materialize(
    executor: &dyn Executor,
    ctx: &Context,
    cfg: &Config,
    project_path: &str,
) -> DeployResult<String> {
    let rendered = render_config(cfg);
    let rendered = rendered.trim();

    let config_path = format!("{project_path}/nginx");
    executor.run(ctx, "mkdir", &["-p", &config_path])?;

    let mut tmp = tempfile::Builder::new()
        .prefix("nginx-config-")
        .suffix(".conf")
        .tempfile()?;
    tmp.write_all(rendered.as_bytes())?;
    tmp.flush()?;

    let local_path = tmp
        .path()
        .to_str()
        .ok_or_else(|| DeployError::Other("temp file path is not valid UTF-8".to_string()))?
        .to_string();

    executor.copy_file(ctx, &local_path, &format!("{config_path}/default.conf"))?;
    Ok(config_path)
}
