//! Interactive hidden-input credential prompt.
//!
//! Input is read in raw mode so nothing is echoed. Enter submits, Esc or an
//! empty line skips the volume, Ctrl-C aborts the whole run.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use crate::backend::Credential;
use crate::core::abort::AbortSignal;
use crate::core::errors::{LhError, Result};
use crate::pathspec::PathSpec;
use crate::scanner::unlock::CredentialSource;

/// Attempts per locked layer before the prompt gives up on it.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// What a key press did to the line being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Submit(String),
    Skip,
    Abort,
}

/// Hidden single-line editor.
#[derive(Debug, Default)]
pub struct HiddenLine {
    buffer: String,
}

impl HiddenLine {
    pub fn apply(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.kind == KeyEventKind::Release {
            return KeyOutcome::Continue;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyOutcome::Abort,
            KeyCode::Esc => KeyOutcome::Skip,
            KeyCode::Enter if self.buffer.is_empty() => KeyOutcome::Skip,
            KeyCode::Enter => KeyOutcome::Submit(std::mem::take(&mut self.buffer)),
            KeyCode::Backspace => {
                self.buffer.pop();
                KeyOutcome::Continue
            }
            KeyCode::Char(c) => {
                self.buffer.push(c);
                KeyOutcome::Continue
            }
            _ => KeyOutcome::Continue,
        }
    }
}

/// [`CredentialSource`] that asks the operator on the terminal.
///
/// Each typed secret is offered both as a password and as a recovery
/// password. Without a terminal on stdin nothing is asked.
pub struct PromptCredentials {
    abort: AbortSignal,
    max_attempts: usize,
    attempts: HashMap<PathSpec, usize>,
    interactive: bool,
}

impl PromptCredentials {
    pub fn new(abort: AbortSignal) -> Self {
        Self {
            abort,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempts: HashMap::new(),
            interactive: io::stdin().is_terminal(),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn ask(&self, path_spec: &PathSpec, attempt: usize) -> Result<KeyOutcome> {
        let terminal_error = |err: io::Error| LhError::io("<terminal>", err);
        let mut stderr = io::stderr();
        if attempt == 1 {
            writeln!(stderr, "Found a locked volume: {path_spec}").map_err(terminal_error)?;
        } else {
            writeln!(stderr, "Unable to unlock the volume, try again.").map_err(terminal_error)?;
        }
        write!(stderr, "Enter password or recovery password (Esc to skip): ").map_err(terminal_error)?;
        stderr.flush().map_err(terminal_error)?;

        terminal::enable_raw_mode().map_err(terminal_error)?;
        let outcome = read_hidden_line();
        let _ = terminal::disable_raw_mode();
        let _ = writeln!(stderr);
        outcome.map_err(terminal_error)
    }
}

fn read_hidden_line() -> io::Result<KeyOutcome> {
    let mut line = HiddenLine::default();
    loop {
        if let Event::Key(key) = event::read()? {
            match line.apply(key) {
                KeyOutcome::Continue => {}
                outcome => return Ok(outcome),
            }
        }
    }
}

impl CredentialSource for PromptCredentials {
    fn candidate_credentials(&mut self, path_spec: &PathSpec) -> Result<Vec<Credential>> {
        if !self.interactive || self.abort.is_raised() {
            return Ok(Vec::new());
        }
        let attempt = self.attempts.entry(path_spec.clone()).or_insert(0);
        if *attempt >= self.max_attempts {
            return Ok(Vec::new());
        }
        *attempt += 1;
        let attempt = *attempt;

        match self.ask(path_spec, attempt)? {
            KeyOutcome::Submit(secret) => Ok(vec![
                Credential::Password(secret.clone()),
                Credential::RecoveryPassword(secret),
            ]),
            KeyOutcome::Abort => {
                self.abort.raise();
                Err(LhError::UserAbort)
            }
            KeyOutcome::Skip | KeyOutcome::Continue => {
                self.attempts.insert(path_spec.clone(), self.max_attempts);
                Ok(Vec::new())
            }
        }
    }
}
