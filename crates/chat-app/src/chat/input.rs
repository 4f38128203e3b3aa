use snafu::{Snafu, ensure};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValidationError {
    #[snafu(display("query is empty"))]
    EmptyQuery { stage: &'static str },
    #[snafu(display("a query is already being answered"))]
    InputLocked { stage: &'static str },
}

/// Text entry for the next query.
///
/// Locked while a submission is in flight so it cannot be resubmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInput {
    text: String,
    locked: bool,
}

impl QueryInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Takes the current text for submission, leaving the input empty.
    ///
    /// Blank text is rejected and the input is left untouched.
    pub fn take_submission(&mut self) -> Result<String, ValidationError> {
        ensure!(!self.locked, InputLockedSnafu { stage: "take-submission" });
        ensure!(
            !self.text.trim().is_empty(),
            EmptyQuerySnafu {
                stage: "take-submission"
            }
        );
        Ok(std::mem::take(&mut self.text))
    }

    /// Puts previously submitted text back so it can be sent again.
    pub fn restore(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }
}
