use thiserror::Error;

/// Fixed text shown in chat when a poll cycle fails. The original bot never
/// exposed upstream details to the user, only this line.
pub const POLL_FAILED_MESSAGE: &str = "Ошибка 404, либо неверны параметры запроса.";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("devman API returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("telegram API error: {0}")]
    Telegram(String),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

impl NotifyError {
    /// True for transport-level failures the poll loop recovers from by
    /// retrying: read timeouts, connection failures, resets mid-response.
    /// Protocol-level failures (non-2xx status, unparsable body) and caller
    /// bugs (builder, redirect policy) are fatal for the current call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => {
                !(e.is_builder() || e.is_redirect() || e.is_status() || e.is_decode())
            }
            _ => false,
        }
    }

    /// Message safe for sending to a chat user. Does not leak URLs, tokens,
    /// or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingEnv(name) => format!("missing environment variable {name}"),
            _ => POLL_FAILED_MESSAGE.to_string(),
        }
    }
}
