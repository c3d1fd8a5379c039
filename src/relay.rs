//! Mirrors application log records into the active chat.
//!
//! A `tracing` layer captures records at debug level and above and hands the
//! formatted lines to a forwarder task. The forwarder only delivers once a
//! destination chat is known (the most recent `/check` wins); before that,
//! records are dropped rather than buffered — replaying stale records at the
//! first command would be worse than losing them.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::telegram::TelegramApi;

/// Targets whose records never enter the relay. Forwarding the transport's
/// own records (or http internals) would turn every delivery into more
/// deliveries.
const EXCLUDED_TARGET_PREFIXES: &[&str] = &[
    "dvmn_notify::telegram",
    "dvmn_notify::relay",
    "hyper",
    "reqwest",
    "h2",
    "rustls",
];

pub fn is_excluded_target(target: &str) -> bool {
    EXCLUDED_TARGET_PREFIXES
        .iter()
        .any(|p| target.starts_with(p))
}

/// Create the relay layer and the receiving end for the forwarder task.
pub fn channel() -> (ChatRelayLayer, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChatRelayLayer { tx }, rx)
}

/// Layer that formats matching records and queues them for chat delivery.
/// Sending never blocks; if the forwarder is gone the record is dropped.
pub struct ChatRelayLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl<S: Subscriber> Layer<S> for ChatRelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::DEBUG || is_excluded_target(meta.target()) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let mut line = format!("{} {}: {}", meta.level(), meta.target(), visitor.message);
        if !visitor.fields.is_empty() {
            let _ = write!(line, " [{}]", visitor.fields.join(" "));
        }
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}

/// Deliver queued records to the current destination chat. Runs until the
/// relay layer (and with it the sender) is dropped.
pub async fn run_forwarder(
    mut rx: mpsc::UnboundedReceiver<String>,
    destination: watch::Receiver<Option<i64>>,
    api: Arc<TelegramApi>,
) {
    while let Some(line) = rx.recv().await {
        let Some(chat_id) = *destination.borrow() else {
            continue;
        };
        if let Err(e) = api.send_message(chat_id, &line).await {
            // Target is excluded from the relay, so this cannot loop back.
            tracing::debug!(chat_id, "log relay delivery failed: {e}");
        }
    }
}
