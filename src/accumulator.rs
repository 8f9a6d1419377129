//! Per-connection accumulator state machine.
//!
//! Each server session owns one `Accumulator`. Mutating commands update the
//! running value in place; `compute` reads it and produces the session's
//! only output. Arithmetic wraps on overflow so applying a command never
//! fails.

use crate::protocol::{Answer, Command};

/// Running integer state for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    value: i32,
}

impl Accumulator {
    /// Create an accumulator starting at `value`.
    pub fn new(value: i32) -> Self {
        Self { value }
    }

    /// Current accumulated value.
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Apply a command.
    ///
    /// Returns `Some(answer)` only for [`Command::Query`], which is terminal:
    /// the caller must not feed further commands after it.
    pub fn apply(&mut self, command: &Command) -> Option<Answer> {
        match *command {
            Command::Init(v) => self.value = v,
            Command::Add(v) => self.value = self.value.wrapping_add(v),
            Command::Mul(v) => self.value = self.value.wrapping_mul(v),
            // Rust integer division truncates toward zero
            Command::Div(v) => self.value = self.value.wrapping_div(v.get()),
            Command::Query => return Some(Answer::new(self.value)),
        }
        None
    }

    /// Apply a sequence of commands, stopping at the first output.
    pub fn replay<'a>(
        &mut self,
        commands: impl IntoIterator<Item = &'a Command>,
    ) -> Option<Answer> {
        commands.into_iter().find_map(|c| self.apply(c))
    }
}
