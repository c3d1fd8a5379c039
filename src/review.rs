use crate::devman::{Attempt, PollOutcome};

/// Origin that relative `lesson_url` paths resolve against.
pub const DVMN_ORIGIN: &str = "https://dvmn.org";

/// Normalized verdict of the most recent review attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResult {
    pub negative: bool,
    pub title: String,
    /// Absolute lesson URL (origin + relative path from the API).
    pub url: String,
}

impl ReviewResult {
    /// Chat message for one verdict. The wording matches what users of the
    /// original bot see.
    pub fn render(&self) -> String {
        let verdict = if self.negative { "Не принято" } else { "Принято" };
        format!(
            "Статус: {verdict}\nРабота: {}\nСсылка: {}",
            self.title, self.url
        )
    }
}

/// Extract the most recent review verdict from a poll outcome.
///
/// Returns `None` for `NothingNew` and for a `Found` with an empty attempt
/// list (absence, not an error). Pure and deterministic — calling it twice
/// on the same outcome yields the same result.
pub fn latest_review(outcome: &PollOutcome) -> Option<ReviewResult> {
    let attempts = match outcome {
        PollOutcome::Found(attempts) => attempts,
        PollOutcome::NothingNew => return None,
    };
    attempts.last().map(from_attempt)
}

fn from_attempt(attempt: &Attempt) -> ReviewResult {
    ReviewResult {
        negative: attempt.is_negative,
        title: attempt.lesson_title.clone(),
        url: format!("{DVMN_ORIGIN}{}", attempt.lesson_url),
    }
}
