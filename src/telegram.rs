use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::NotifyError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Headroom over the getUpdates window so the HTTP read outlives the
/// server-side timeout.
const READ_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// One incoming update from getUpdates, reduced to what the router needs.
#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: u64,
    pub chat_id: i64,
    pub username: String,
    pub text: String,
}

/// Thin client for the Telegram Bot API over the shared `reqwest::Client`.
/// The base URL is injectable so tests can point it at a mock server.
pub struct TelegramApi {
    client: Client,
    base: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiReply<T> {
    #[serde(default)]
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct WireUpdate {
    update_id: u64,
    message: Option<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
    chat: WireChat,
    from: Option<WireUser>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireChat {
    id: i64,
}

#[derive(Deserialize)]
struct WireUser {
    username: Option<String>,
    #[serde(default)]
    first_name: String,
}

impl TelegramApi {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self::with_base(client, TELEGRAM_API_BASE, token)
    }

    pub fn with_base(client: Client, base: impl Into<String>, token: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base, self.token)
    }

    /// Verify the token and return the bot's username.
    pub async fn get_me(&self) -> Result<String, NotifyError> {
        #[derive(Deserialize)]
        struct Me {
            username: Option<String>,
        }

        let reply: ApiReply<Me> = self
            .call(self.client.get(self.method_url("getMe")))
            .await?;
        Ok(reply
            .result
            .and_then(|me| me.username)
            .unwrap_or_else(|| "?".to_string()))
    }

    /// Long-poll for updates past `offset`. Holds the request open for up to
    /// `timeout_secs` server-side; non-message updates are skipped.
    pub async fn get_updates(&self, offset: u64, timeout_secs: u64) -> Result<Vec<Update>, NotifyError> {
        let request = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            .timeout(Duration::from_secs(timeout_secs) + READ_TIMEOUT_SLACK);

        let reply: ApiReply<Vec<WireUpdate>> = self.call(request).await?;
        let updates = reply
            .result
            .unwrap_or_default()
            .into_iter()
            .filter_map(|u| {
                let msg = u.message?;
                let username = msg
                    .from
                    .as_ref()
                    .and_then(|f| f.username.clone())
                    .or_else(|| {
                        msg.from
                            .as_ref()
                            .map(|f| f.first_name.clone())
                            .filter(|n| !n.is_empty())
                    })
                    .unwrap_or_else(|| "?".to_string());
                Some(Update {
                    update_id: u.update_id,
                    chat_id: msg.chat.id,
                    username,
                    text: msg.text,
                })
            })
            .collect();
        Ok(updates)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let request = self.client.post(self.method_url("sendMessage")).json(&body);
        let _: ApiReply<serde_json::Value> = self.call(request).await?;
        Ok(())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<ApiReply<T>, NotifyError> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let reply: ApiReply<T> = serde_json::from_slice(&bytes).map_err(|e| {
            NotifyError::SchemaParse(format!("telegram reply (HTTP {status}): {e}"))
        })?;
        if !reply.ok {
            return Err(NotifyError::Telegram(if reply.description.is_empty() {
                format!("HTTP {status}")
            } else {
                reply.description
            }));
        }
        Ok(reply)
    }
}
