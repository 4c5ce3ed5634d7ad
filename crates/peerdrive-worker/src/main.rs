mod config;
mod providers;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerdrive_workflow::definition::catalog;
use peerdrive_workflow::notify::{ChannelKind, DeliveryPolicy, Dispatcher, FallbackDelivery};
use peerdrive_workflow::persistence::{
    ExecutionStore, MemoryExecutionStore, MemoryTokenStore, PostgresExecutionStore,
    PostgresTokenStore, TokenStore,
};
use peerdrive_workflow::provider::ProviderEffects;
use peerdrive_workflow::{EngineConfig, ExpirySweeper, SweeperConfig, WorkflowEngine};

use config::{NotifyMode, WorkerConfig};
use providers::{EnvDirectory, LogChannel, LogPhoneVerifier, LogVerifier, WebhookChannel};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerdrive_worker=debug,peerdrive_workflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("peerdrive-worker starting...");

    let config = WorkerConfig::from_env()?;
    tracing::info!(notify_mode = ?config.notify_mode, "providers configured");

    let effects = build_effects(&config);
    let registry = Arc::new(catalog::standard_registry());
    let engine_config = EngineConfig::default().with_default_token_ttl(config.token_ttl);

    match &config.database_url {
        Some(url) => {
            tracing::info!("using PostgreSQL stores");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;

            let engine = Arc::new(WorkflowEngine::with_config(
                Arc::new(PostgresExecutionStore::new(pool.clone())),
                Arc::new(PostgresTokenStore::new(pool)),
                registry,
                effects,
                engine_config,
            ));
            run_until_shutdown(engine, &config).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores (state is not durable)");
            let engine = Arc::new(WorkflowEngine::with_config(
                Arc::new(MemoryExecutionStore::new()),
                Arc::new(MemoryTokenStore::new()),
                registry,
                effects,
                engine_config,
            ));
            run_until_shutdown(engine, &config).await
        }
    }
}

/// Wire the notification and verification providers chosen by configuration
fn build_effects(config: &WorkerConfig) -> Arc<ProviderEffects> {
    let mut dispatcher = Dispatcher::new();
    for kind in [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Push] {
        match config.notify_mode {
            NotifyMode::Log => {
                dispatcher = dispatcher.register(Arc::new(LogChannel::new(kind)));
            }
            NotifyMode::Webhook => {
                let url = config
                    .webhook_url
                    .clone()
                    .expect("validated by WorkerConfig::from_env");
                dispatcher = dispatcher.register(Arc::new(WebhookChannel::new(kind, url)));
            }
        }
    }

    let delivery = Arc::new(FallbackDelivery::new(
        Arc::new(dispatcher),
        DeliveryPolicy::default(),
    ));

    Arc::new(ProviderEffects::new(
        delivery,
        Arc::new(LogVerifier),
        Arc::new(LogPhoneVerifier),
        Arc::new(EnvDirectory::from_env()),
    ))
}

/// Run the expiry sweeper until ctrl-c, then shut it down cleanly
async fn run_until_shutdown<E, T>(
    engine: Arc<WorkflowEngine<E, T>>,
    config: &WorkerConfig,
) -> Result<()>
where
    E: ExecutionStore,
    T: TokenStore,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        engine,
        SweeperConfig::new().with_interval(config.sweep_interval),
        shutdown_rx,
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    tracing::info!("worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    shutdown_tx.send(true)?;
    sweeper_handle.await?;

    tracing::info!("worker shutdown complete");
    Ok(())
}
