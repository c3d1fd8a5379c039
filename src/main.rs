use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dvmn_notify::bot::CommandRouter;
use dvmn_notify::config::Config;
use dvmn_notify::devman::PollClient;
use dvmn_notify::relay;
use dvmn_notify::telegram::TelegramApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let (relay_layer, relay_rx) = relay::channel();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(relay_layer)
        .init();

    tracing::info!("dvmn-notify starting");

    let config = Config::from_env()?;

    // Default read timeout covers the short calls (sendMessage, getMe); the
    // long-poll requests override it per request.
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30))
        .build()?;

    let api = match config.telegram_api_base.as_deref() {
        Some(base) => TelegramApi::with_base(http.clone(), base, config.telegram_token.clone()),
        None => TelegramApi::new(http.clone(), config.telegram_token.clone()),
    };
    let api = Arc::new(api);

    let bot_name = api.get_me().await?;
    tracing::info!(bot = %bot_name, "telegram token verified");

    let poller = Arc::new(PollClient::new(
        http,
        config.poll_url.clone(),
        config.devman_token.clone(),
        config.poll_timeout,
    ));

    let (destination_tx, destination_rx) = watch::channel(None);
    tokio::spawn(relay::run_forwarder(relay_rx, destination_rx, api.clone()));

    let router = CommandRouter::new(api, poller, destination_tx);
    router.run().await;

    Ok(())
}
