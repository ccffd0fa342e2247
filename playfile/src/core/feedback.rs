//! Retry feedback carried from one attempt into the next attempt's prompt.

use crate::core::types::ValidationFailure;

/// Validation failures observed by the previous attempt.
///
/// Passed by value into each attempt; an attempt never mutates the feedback
/// it was given, it returns the feedback for its successor instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryFeedback {
    failures: Vec<ValidationFailure>,
}

impl RetryFeedback {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_failures(failures: Vec<ValidationFailure>) -> Self {
        Self { failures }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Render the failures as a prompt block, keeping at most
    /// `output_limit_chars` trailing characters of each command's output.
    pub fn render(&self, output_limit_chars: usize) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let mut buf = String::from(
            "The previous attempt did not pass validation. Fix the problems below; \
             the same checks run again after this attempt.\n",
        );
        for (idx, failure) in self.failures.iter().enumerate() {
            buf.push_str(&format!("\n{}. {}\n", idx + 1, failure.description));
            buf.push_str(&format!("Command: `{}`\n", failure.command));
            buf.push_str("Output:\n```\n");
            buf.push_str(&truncate_tail(failure.output.trim(), output_limit_chars));
            buf.push_str("\n```\n");
        }
        Some(buf)
    }
}

/// Keep the last `limit` characters of `text`; failures usually report at the end.
pub fn truncate_tail(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let skipped = total - limit;
    let tail: String = text.chars().skip(skipped).collect();
    format!("[... {skipped} earlier characters truncated]\n{tail}")
}
