// UI layer: the interactive bits of a run, using `dialoguer` for questions
// and `indicatif` for the upload spinner. The pipeline only sees the
// `Prompt` trait so tests can script the answers.

use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::time::Duration;

pub trait Prompt {
    /// Yes/no question, defaulting to "no".
    fn confirm(&self, message: &str) -> io::Result<bool>;

    /// Asks for the service access token of `app_id`. `None` when the user
    /// answers with nothing.
    fn access_token(&self, app_id: &str) -> io::Result<Option<String>>;
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> io::Result<bool> {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
    }

    fn access_token(&self, app_id: &str) -> io::Result<Option<String>> {
        let token: String = Password::new()
            .with_prompt(format!(
                "Service access key (https://vk.com/editapp?id={app_id}&section=options)"
            ))
            .allow_empty_password(true)
            .interact()?;
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

/// Spinner shown while a long step runs. Cleared on drop.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(100));
        Spinner { bar }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}
