use std::future::Future;
use std::sync::Arc;

use ledger_module::LedgerStore;
use serenity::all::{GatewayIntents, Http};
use serenity::Client;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::adapters::DiscordRenderer;
use crate::discord_gateway::OrderEventHandler;
use crate::mailbox::ImapMailbox;
use crate::poller::NotificationPoller;
use crate::workflow::OrderEngine;

use super::config::ServiceConfig;
use super::ingestion::spawn_poll_loop;
use super::BoxError;

/// Wires the ledger, renderer, engine, poll loop and Discord gateway, then
/// runs until `shutdown` resolves or the gateway connection ends.
pub async fn run_service<F>(config: ServiceConfig, shutdown: F) -> Result<(), BoxError>
where
    F: Future<Output = ()> + Send,
{
    let ledger = Arc::new(LedgerStore::open(&config.ledger_root)?);
    info!("ledger at {}", config.ledger_root.display());
    match ledger.process_state() {
        Ok(state) if state.paused => warn!("order polling starts paused"),
        Ok(_) => {}
        Err(err) => return Err(err.into()),
    }

    let http = Arc::new(Http::new(&config.discord_bot_token));
    let renderer = Arc::new(DiscordRenderer::new(http, config.discord_settings()));
    let engine = Arc::new(OrderEngine::new(
        ledger,
        renderer,
        config.engine_config(),
    ));

    let poller = NotificationPoller::new(
        ImapMailbox::new(config.imap.clone()),
        config.mail_filter.clone(),
        config.recency_window,
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let poll_handle = spawn_poll_loop(poller, engine.clone(), config.poll_interval, stop_rx);

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES;
    let handler = OrderEventHandler::new(engine, config.discord_guild_id);
    let mut client = Client::builder(&config.discord_bot_token, intents)
        .event_handler(handler)
        .await?;
    let shard_manager = client.shard_manager.clone();

    info!("Starting Discord Gateway client...");
    tokio::select! {
        result = client.start() => {
            if let Err(err) = result {
                error!("discord gateway error: {}", err);
            }
        }
        _ = shutdown => {
            info!("shutdown requested");
            shard_manager.shutdown_all().await;
        }
    }

    if stop_tx.send(true).is_err() {
        warn!("poll loop already stopped");
    }
    if let Err(err) = poll_handle.await {
        warn!("poll loop ended abnormally: {}", err);
    }
    Ok(())
}
