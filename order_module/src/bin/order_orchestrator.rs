use order_module::service::{run_service, ServiceConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env()?;
    info!(
        "order orchestrator starting (guild {}, orders channel {}, poll every {}s)",
        config.discord_guild_id,
        config.orders_channel_id,
        config.poll_interval.as_secs()
    );

    run_service(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("order orchestrator stopped");
    Ok(())
}
