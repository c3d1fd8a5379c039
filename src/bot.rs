use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::devman::PollClient;
use crate::review::latest_review;
use crate::telegram::{TelegramApi, Update};

/// Server-side window for each getUpdates long poll.
const UPDATE_TIMEOUT_SECS: u64 = 25;

/// Pause before re-entering the update loop after a failed cycle, so a dead
/// Telegram API does not spin the loop hot.
const CYCLE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Routes incoming chat commands to handlers.
///
/// Every command first records its chat as the current log-relay destination
/// (most recent command wins), then dispatches. `/check` runs the review poll
/// on its own task — the poll holds a request open for the full long-poll
/// window and must not stall the router.
pub struct CommandRouter {
    api: Arc<TelegramApi>,
    poller: Arc<PollClient>,
    destination: watch::Sender<Option<i64>>,
}

impl CommandRouter {
    pub fn new(
        api: Arc<TelegramApi>,
        poller: Arc<PollClient>,
        destination: watch::Sender<Option<i64>>,
    ) -> Self {
        Self {
            api,
            poller,
            destination,
        }
    }

    /// Serve commands until the process stops. A failed cycle (network,
    /// malformed reply) is logged and the loop continues — one bad cycle
    /// never takes the bot down.
    pub async fn run(&self) {
        let mut offset: u64 = 0;

        loop {
            match self.api.get_updates(offset, UPDATE_TIMEOUT_SECS).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.dispatch(update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("getUpdates cycle failed: {e}");
                    tokio::time::sleep(CYCLE_RETRY_PAUSE).await;
                }
            }
        }
    }

    async fn dispatch(&self, update: Update) {
        let command = update.text.trim();
        if !command.starts_with('/') {
            tracing::debug!(chat_id = update.chat_id, "ignoring non-command message");
            return;
        }

        // Destination capture middleware: any command makes its chat the
        // log-relay target. Last writer wins.
        self.destination.send_replace(Some(update.chat_id));

        match command.split_whitespace().next().unwrap_or_default() {
            "/start" => self.handle_start(&update).await,
            "/check" => self.spawn_check(update.chat_id),
            other => {
                tracing::debug!(chat_id = update.chat_id, command = other, "unknown command");
            }
        }
    }

    async fn handle_start(&self, update: &Update) {
        let message = format!("Hello, {}!", update.username);
        if let Err(e) = self.api.send_message(update.chat_id, &message).await {
            tracing::warn!(chat_id = update.chat_id, "failed to send greeting: {e}");
        }
    }

    fn spawn_check(&self, chat_id: i64) {
        let api = self.api.clone();
        let poller = self.poller.clone();

        tokio::spawn(async move {
            tracing::info!("Стартую... пщщщ... пип-пип!");

            let text = match poller.poll().await {
                Ok(outcome) => match latest_review(&outcome) {
                    Some(result) => result.render(),
                    None => crate::error::POLL_FAILED_MESSAGE.to_string(),
                },
                Err(e) => {
                    tracing::debug!("poll failed: {e}");
                    e.user_message()
                }
            };

            if let Err(e) = api.send_message(chat_id, &text).await {
                tracing::warn!(chat_id, "failed to deliver check result: {e}");
            }
        });
    }
}
