use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress reporting for a deployment run.
///
/// The engine emits one `step` when it starts working on a
/// service and one terminal message (`success`, `skipped` via
/// `success`, or `error`) when it finishes; `warn` carries
/// non-fatal cleanup problems. Injected as a trait object so the
/// engine stays a pure function of its inputs - there is no
/// global logger.
pub trait Progress {
    fn step(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Console reporter: a spinner while a step runs, one status line
/// per finished step.
pub struct ConsoleProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn clear_spinner(&self) {
        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(spinner) = guard.take() {
                spinner.finish_and_clear();
            }
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for ConsoleProgress {
    fn step(&self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(message.to_string());

        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(old) = guard.replace(spinner) {
                old.finish_and_clear();
            }
        }
    }

    fn success(&self, message: &str) {
        self.clear_spinner();
        eprintln!("\u{221a} {message}");
    }

    fn warn(&self, message: &str) {
        self.clear_spinner();
        eprintln!("! {message}");
    }

    fn error(&self, message: &str) {
        self.clear_spinner();
        eprintln!("\u{2717} {message}");
    }
}

/// Discards every message. Useful in tests and as the engine
/// default.
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn step(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
