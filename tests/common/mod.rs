use std::collections::VecDeque;
use std::sync::Mutex;

use gantry::{Context, DeployError, DeployResult, Executor};

/// Scripted executor for driving the engine against a fake host.
///
/// Every command is recorded as one line (`program arg arg ...`);
/// file copies are recorded both in the log (as `copy <from>
/// <to>`) and separately. Responses are looked up by command
/// prefix - the longest matching prefix wins, latest registration
/// breaking ties - and unmatched commands succeed with empty
/// output.
pub struct MockExecutor {
    log: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
    copies: Mutex<Vec<(String, String)>>,
}

struct Rule {
    prefix: String,
    queued: VecDeque<Response>,
    fallback: Response,
}

#[derive(Clone)]
enum Response {
    Ok(String),
    Fail(String),
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
        }
    }

    /// Commands starting with `prefix` succeed with `output`.
    pub fn stub(&self, prefix: &str, output: &str) {
        self.push_rule(Rule {
            prefix: prefix.to_string(),
            queued: VecDeque::new(),
            fallback: Response::Ok(output.to_string()),
        });
    }

    /// Successive matching commands get successive outputs; once
    /// exhausted, the last output repeats.
    pub fn stub_seq(&self, prefix: &str, outputs: &[&str]) {
        let mut queued: VecDeque<Response> = outputs
            .iter()
            .map(|o| Response::Ok((*o).to_string()))
            .collect();
        let fallback = queued.back().cloned().unwrap_or(Response::Ok(String::new()));
        queued.pop_back();
        self.push_rule(Rule {
            prefix: prefix.to_string(),
            queued,
            fallback,
        });
    }

    /// Commands starting with `prefix` fail with `message` as
    /// their output.
    pub fn fail(&self, prefix: &str, message: &str) {
        self.push_rule(Rule {
            prefix: prefix.to_string(),
            queued: VecDeque::new(),
            fallback: Response::Fail(message.to_string()),
        });
    }

    fn push_rule(&self, rule: Rule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }

    /// Indices of logged commands containing `needle`.
    pub fn positions_of(&self, needle: &str) -> Vec<usize> {
        self.commands()
            .iter()
            .enumerate()
            .filter(|(_, line)| line.contains(needle))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count_of(&self, needle: &str) -> usize {
        self.positions_of(needle).len()
    }

    fn respond(&self, command: &str) -> Response {
        let mut rules = self.rules.lock().unwrap();

        let best = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| command.starts_with(&rule.prefix))
            .max_by_key(|(i, rule)| (rule.prefix.len(), *i))
            .map(|(i, _)| i);

        match best {
            Some(i) => {
                let rule = &mut rules[i];
                rule.queued.pop_front().unwrap_or_else(|| rule.fallback.clone())
            }
            None => Response::Ok(String::new()),
        }
    }
}

impl Executor for MockExecutor {
    fn run(&self, ctx: &Context, program: &str, args: &[&str]) -> DeployResult<Vec<u8>> {
        ctx.check()?;

        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.log.lock().unwrap().push(line.clone());

        match self.respond(&line) {
            Response::Ok(output) => Ok(output.into_bytes()),
            Response::Fail(message) => Err(DeployError::CommandFailed {
                command: line,
                output: message,
            }),
        }
    }

    fn copy_file(&self, ctx: &Context, local_path: &str, remote_path: &str) -> DeployResult<()> {
        ctx.check()?;

        self.log
            .lock()
            .unwrap()
            .push(format!("copy {local_path} {remote_path}"));
        self.copies
            .lock()
            .unwrap()
            .push((local_path.to_string(), remote_path.to_string()));
        Ok(())
    }
}

/// Render a `docker inspect` response for one container.
pub fn container_json(
    id: &str,
    image_id: &str,
    image_ref: &str,
    config_hash: Option<&str>,
    network: &str,
    aliases: &[&str],
) -> String {
    let labels = match config_hash {
        Some(hash) => format!(r#"{{"config-hash": "{hash}"}}"#),
        None => "{}".to_string(),
    };
    let aliases = aliases
        .iter()
        .map(|a| format!("\"{a}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"[{{
            "Id": "{id}",
            "Image": "{image_id}",
            "Config": {{
                "Image": "{image_ref}",
                "Env": ["PATH=/usr/bin"],
                "Labels": {labels}
            }},
            "NetworkSettings": {{
                "Networks": {{
                    "{network}": {{"Aliases": [{aliases}]}}
                }}
            }},
            "HostConfig": {{"Binds": []}}
        }}]"#
    )
}
