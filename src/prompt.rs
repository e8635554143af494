//! Prompt module.
//!
//! This module contains the interactive prompt service consulted when
//! opening a missing mailbox and when editing tags.

use log::debug;
use std::result;
use thiserror::Error;

use crate::process;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot run prompt command")]
    RunPromptCmdError(#[source] process::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub trait Prompt {
    /// Asks a yes/no question.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Asks for a line of text, starting from the given initial
    /// value. `None` means the user cancelled.
    fn input(&mut self, question: &str, initial: &str) -> Result<Option<String>>;
}

/// Non-interactive prompt giving fixed answers.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AutoPrompt {
    /// Answer to every confirmation.
    pub confirm: bool,
    /// Answer to every text input. The initial value is kept when
    /// unset.
    pub input: Option<String>,
}

impl AutoPrompt {
    pub fn yes() -> Self {
        Self {
            confirm: true,
            input: None,
        }
    }

    pub fn no() -> Self {
        Self::default()
    }
}

impl Prompt for AutoPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        debug!("auto answering {:?}: {}", question, self.confirm);
        Ok(self.confirm)
    }

    fn input(&mut self, question: &str, initial: &str) -> Result<Option<String>> {
        debug!("auto answering {:?}", question);
        Ok(Some(self.input.clone().unwrap_or_else(|| initial.to_owned())))
    }
}

/// Prompt delegating to shell commands. The question is exported as
/// `$PROMPT`, the initial value is written to the command standard
/// input and the answer is read from its standard output.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CmdPrompt {
    /// Command answering confirmations. It succeeds when its output
    /// starts with `y`.
    pub confirm_cmd: String,
    /// Command answering text inputs. An empty output cancels.
    pub input_cmd: String,
}

impl CmdPrompt {
    fn run(cmd: &str, question: &str, input: &str) -> Result<String> {
        let cmd = format!("PROMPT='{}' {}", question.replace('\'', r"'\''"), cmd);
        let output = process::run(&cmd, input.as_bytes()).map_err(Error::RunPromptCmdError)?;
        Ok(String::from_utf8_lossy(&output).trim().to_owned())
    }
}

impl Prompt for CmdPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = Self::run(&self.confirm_cmd, question, "")?;
        Ok(answer.to_lowercase().starts_with('y'))
    }

    fn input(&mut self, question: &str, initial: &str) -> Result<Option<String>> {
        let answer = Self::run(&self.input_cmd, question, initial)?;
        Ok(if answer.is_empty() { None } else { Some(answer) })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn cmd_prompt_reads_answers() {
        let mut prompt = CmdPrompt {
            confirm_cmd: "echo yes".into(),
            input_cmd: "sed 's/$/ work/'".into(),
        };
        assert!(prompt.confirm("create?").unwrap());
        assert_eq!(
            Some("inbox work".into()),
            prompt.input("tags:", "inbox").unwrap()
        );
    }

    #[test]
    fn cmd_prompt_empty_input_cancels() {
        let mut prompt = CmdPrompt {
            confirm_cmd: "echo $PROMPT".into(),
            input_cmd: "true".into(),
        };
        assert!(!prompt.confirm("no thanks").unwrap());
        assert_eq!(None, prompt.input("tags:", "").unwrap());
    }
}
