use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::NotifyError;

/// Max response body size for poll replies (256KB — attempt lists are small).
const MAX_POLL_RESPONSE_BYTES: usize = 256 * 1024;

/// One submitted work with its review verdict, as the API reports it.
/// Fields are lenient: the server occasionally omits them, and a missing
/// field defaults rather than failing the whole reply.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Attempt {
    #[serde(default)]
    pub is_negative: bool,
    #[serde(default)]
    pub lesson_title: String,
    /// Path relative to the dvmn.org origin, e.g. "/modules/1/lesson/2/".
    #[serde(default)]
    pub lesson_url: String,
}

/// One decoded reply from the long-poll endpoint, tagged by its `status` field.
#[derive(Debug)]
pub enum PollReply {
    /// The server-side long-poll window elapsed with nothing new; re-poll
    /// from the supplied timestamp. Absent timestamps leave the params as-is.
    Timeout {
        timestamp_to_request: Option<serde_json::Number>,
    },
    /// New review verdicts arrived. Ordered oldest first; never empty in
    /// practice, the last entry is the most recent.
    Found { new_attempts: Vec<Attempt> },
    /// Unrecognized or absent status — the caller treats this as no result.
    Other,
}

/// Terminal result of one `poll` invocation. `Timeout` replies never escape
/// the loop, so only two outcomes remain.
#[derive(Debug)]
pub enum PollOutcome {
    Found(Vec<Attempt>),
    NothingNew,
}

/// Pause applied between retries of a transient transport failure.
/// The original behavior is immediate re-request (the server's long-poll
/// window already bounds each attempt); `Fixed` exists for operators who
/// want to be gentler on the API, and keeps the policy testable without
/// patching the loop.
#[derive(Debug, Clone, Copy, Default)]
pub enum RetryPause {
    #[default]
    Immediate,
    Fixed(Duration),
}

impl RetryPause {
    pub async fn wait(&self) {
        match self {
            Self::Immediate => {}
            Self::Fixed(d) => tokio::time::sleep(*d).await,
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(d) => *d,
        }
    }
}

/// Parse one poll reply body. Split out of the loop so the protocol
/// dispatch is testable without a server.
pub fn parse_poll_reply(body: &[u8]) -> Result<PollReply, NotifyError> {
    let v: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| NotifyError::SchemaParse(format!("poll reply: {e}")))?;

    match v["status"].as_str() {
        Some("timeout") => Ok(PollReply::Timeout {
            timestamp_to_request: v["timestamp_to_request"].as_number().cloned(),
        }),
        Some("found") => {
            let new_attempts: Vec<Attempt> = v["new_attempts"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| serde_json::from_value(a.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            Ok(PollReply::Found { new_attempts })
        }
        _ => Ok(PollReply::Other),
    }
}

/// Long-poll client for the Devman review API.
///
/// One instance per poll invocation is cheap (the `reqwest::Client` is shared
/// and pools connections); the `timestamp` parameter lives only inside one
/// `poll` call and is written exclusively from server-supplied values.
pub struct PollClient {
    client: Client,
    url: String,
    token: String,
    timeout: Duration,
    pause: RetryPause,
}

impl PollClient {
    pub fn new(client: Client, url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            token: token.into(),
            timeout,
            pause: RetryPause::default(),
        }
    }

    pub fn with_retry_pause(mut self, pause: RetryPause) -> Self {
        self.pause = pause;
        self
    }

    /// Poll until the server reports a terminal status.
    ///
    /// Blocks for up to the server's long-poll window per attempt (the read
    /// timeout is the hard ceiling) — run this off any interactive task.
    /// Transport failures retry forever; a `timeout` status carries the
    /// server's resume timestamp into the next request. Non-2xx statuses and
    /// unparsable bodies fail the whole call.
    pub async fn poll(&self) -> Result<PollOutcome, NotifyError> {
        let mut params: HashMap<&'static str, String> = HashMap::new();
        let mut retries: u64 = 0;

        loop {
            let attempt = async {
                let response = self
                    .client
                    .get(&self.url)
                    .header("Authorization", format!("token {}", self.token))
                    .query(&params)
                    .timeout(self.timeout)
                    .send()
                    .await?;
                let status = response.status();
                let bytes = response.bytes().await?;
                Ok::<_, reqwest::Error>((status, bytes))
            };

            let (status, bytes) = match attempt.await {
                Ok(v) => v,
                Err(e) => {
                    let err = NotifyError::from(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    retries += 1;
                    tracing::debug!(retries, "transient poll error, retrying: {err}");
                    self.pause.wait().await;
                    continue;
                }
            };

            if !status.is_success() {
                let truncated = &bytes[..bytes.len().min(MAX_POLL_RESPONSE_BYTES)];
                return Err(NotifyError::Upstream {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(truncated).into_owned(),
                });
            }

            if bytes.len() > MAX_POLL_RESPONSE_BYTES {
                return Err(NotifyError::SchemaParse(format!(
                    "poll reply too large: {} bytes",
                    bytes.len()
                )));
            }

            match parse_poll_reply(&bytes)? {
                PollReply::Timeout { timestamp_to_request } => {
                    if let Some(ts) = timestamp_to_request {
                        tracing::debug!(timestamp = %ts, "server long-poll window elapsed, re-polling");
                        params.insert("timestamp", ts.to_string());
                    } else {
                        tracing::debug!("timeout reply without timestamp_to_request, re-polling as-is");
                    }
                    continue;
                }
                PollReply::Found { new_attempts } => {
                    tracing::debug!(attempts = new_attempts.len(), "server found submitted works");
                    return Ok(PollOutcome::Found(new_attempts));
                }
                PollReply::Other => {
                    tracing::debug!("poll reply with unrecognized status");
                    return Ok(PollOutcome::NothingNew);
                }
            }
        }
    }
}
