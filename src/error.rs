pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("command failed: {command}\n{output}")]
    CommandFailed { command: String, output: String },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no container with alias '{alias}' on network '{network}'")]
    ContainerNotFound { alias: String, network: String },

    #[error(
        "container '{0}' did not become healthy after {1} attempts"
    )]
    HealthcheckTimeout(String, u32),

    #[error("cancelled")]
    Cancelled,

    #[error("environment variable missing: {0}")]
    EnvMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Build a command failure from the command string and its
    /// combined output, keeping only the tail of long output.
    #[must_use]
    pub fn command_failed(command: String, output: &[u8]) -> Self {
        const TAIL: usize = 2048;

        let text = String::from_utf8_lossy(output);
        let text = text.trim();
        let tail = if text.len() > TAIL {
            let cut = text.len() - TAIL;
            // Don't split a UTF-8 sequence.
            let cut = (cut..text.len())
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(text.len());
            &text[cut..]
        } else {
            text
        };

        Self::CommandFailed {
            command,
            output: tail.to_string(),
        }
    }
}
