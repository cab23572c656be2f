//! Scripted in-memory session for tests.

use crate::error::RemoteError;
use crate::session::{CommandResult, Session};
use std::collections::VecDeque;
use std::sync::Mutex;

struct Rule {
    needle: String,
    replies: VecDeque<CommandResult>,
}

/// A [`Session`] that answers from canned responses and records every
/// command it receives.
///
/// Rules match when the command contains their needle; the first matching
/// rule wins. A rule's replies are consumed in order and the last one
/// repeats. Commands with no matching rule succeed with empty output.
#[derive(Default)]
pub struct FakeSession {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with `stdout` (exit 0).
    pub fn respond(&self, needle: &str, stdout: &str) -> &Self {
        self.respond_seq(needle, vec![CommandResult::new(stdout, "", 0)])
    }

    /// Answer commands containing `needle` with a failure.
    pub fn fail(&self, needle: &str, exit_code: i32, stderr: &str) -> &Self {
        self.respond_seq(needle, vec![CommandResult::new("", stderr, exit_code)])
    }

    /// Answer successive matching commands with `replies`, repeating the last.
    pub fn respond_seq(&self, needle: &str, replies: Vec<CommandResult>) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                replies: replies.into(),
            });
        }
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Commands run so far that contain `needle`.
    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    fn reply(&self, command: &str) -> CommandResult {
        let Ok(mut rules) = self.rules.lock() else {
            return CommandResult::new("", "", 0);
        };
        for rule in rules.iter_mut() {
            if !command.contains(&rule.needle) {
                continue;
            }
            let reply = if rule.replies.len() > 1 {
                rule.replies.pop_front()
            } else {
                rule.replies.front().cloned()
            };
            if let Some(reply) = reply {
                return reply;
            }
        }
        CommandResult::new("", "", 0)
    }
}

impl Session for FakeSession {
    fn endpoint(&self) -> String {
        "fake".to_string()
    }

    async fn run(
        &self,
        command: &str,
        tolerate_failure: bool,
    ) -> Result<CommandResult, RemoteError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        self.reply(command).check(command, tolerate_failure)
    }
}
