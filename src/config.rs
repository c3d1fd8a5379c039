use std::env;
use std::time::Duration;

use crate::error::NotifyError;

const DEFAULT_POLL_URL: &str = "https://dvmn.org/api/long_polling/";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 100;

pub struct Config {
    pub devman_token: String,
    pub telegram_token: String,
    pub poll_url: String,
    pub poll_timeout: Duration,
    /// Override for the Telegram API base (tests point this at a mock).
    pub telegram_api_base: Option<String>,
}

impl Config {
    /// Read configuration from the environment. Missing tokens are a startup
    /// error — the bot is useless without either of them.
    pub fn from_env() -> Result<Self, NotifyError> {
        let devman_token = require("DEVMAN_TOKEN")?;
        let telegram_token = require("TELEGRAM_TOKEN")?;

        let poll_url = env::var("DVMN_POLL_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_POLL_URL.to_string());

        let poll_timeout = env::var("DVMN_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS));

        let telegram_api_base = env::var("TELEGRAM_API_BASE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Config {
            devman_token,
            telegram_token,
            poll_url,
            poll_timeout,
            telegram_api_base,
        })
    }
}

fn require(name: &'static str) -> Result<String, NotifyError> {
    env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or(NotifyError::MissingEnv(name))
}
