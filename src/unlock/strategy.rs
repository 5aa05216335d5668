//! Ordered password trial shared by every format handler

use anyhow::Result;
use tracing::debug;

/// Outcome of a single password attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The password worked; carries whatever the format needs to write output
    Unlocked(T),
    /// The password was wrong
    Rejected,
}

/// Outcome of trying the whole list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome<T> {
    /// `attempt` is the 1-based position of the winning password
    Unlocked { value: T, attempt: usize },
    Exhausted { attempts: usize },
}

/// Tries candidate passwords in configuration order and stops at the first
/// one that is accepted.
#[derive(Debug, Clone, Copy)]
pub struct PasswordTrial<'a> {
    passwords: &'a [String],
}

impl<'a> PasswordTrial<'a> {
    pub fn new(passwords: &'a [String]) -> Self {
        Self { passwords }
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    /// Run `try_once` for each password until one is accepted.
    ///
    /// An `Err` from `try_once` is a format failure, not a wrong password,
    /// and ends the trial immediately.
    pub fn run<T, F>(&self, mut try_once: F) -> Result<TrialOutcome<T>>
    where
        F: FnMut(&str) -> Result<Attempt<T>>,
    {
        let total = self.passwords.len();
        for (index, password) in self.passwords.iter().enumerate() {
            debug!("Trying password {}/{}", index + 1, total);
            if let Attempt::Unlocked(value) = try_once(password)? {
                return Ok(TrialOutcome::Unlocked {
                    value,
                    attempt: index + 1,
                });
            }
        }
        Ok(TrialOutcome::Exhausted { attempts: total })
    }
}
