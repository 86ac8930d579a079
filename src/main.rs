use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use cloudretail_api as api;
use api::{
    cart::CartService,
    catalog::{CatalogClient, SqlCatalog},
    handlers::AppServices,
    services::{
        checkout::CheckoutService,
        orders::{OrderStore, SqlOrderStore},
        payment_provider::{DemoPaymentProvider, PaymentProvider},
        payments::{PaymentLedger, SqlPaymentLedger},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let redis_client = Arc::new(
        redis::Client::open(cfg.redis_url.clone()).context("invalid redis url")?,
    );

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));
    let events = Arc::new(event_sender.clone());

    let config = Arc::new(cfg);

    let catalog: Arc<dyn CatalogClient> = Arc::new(SqlCatalog::new(db.clone()));
    let cart_backend = api::cart::connect_backend(&redis_client).await;
    let cart = CartService::new(cart_backend, catalog.clone(), events.clone(), &config);

    let orders: Arc<dyn OrderStore> = Arc::new(SqlOrderStore::new(db.clone(), events.clone()));
    let payments: Arc<dyn PaymentLedger> =
        Arc::new(SqlPaymentLedger::new(db.clone(), events.clone()));
    let provider: Arc<dyn PaymentProvider> = Arc::new(DemoPaymentProvider::new());

    let checkout = CheckoutService::new(
        cart.clone(),
        catalog.clone(),
        provider,
        orders.clone(),
        payments.clone(),
        events.clone(),
        config.clone(),
    );

    let services = AppServices {
        cart,
        checkout,
        orders,
        payments,
        catalog,
    };

    let state = api::AppState {
        db,
        config: config.clone(),
        event_sender,
        services,
        redis: redis_client,
    };

    let app = api::app(state);

    let addr = config.listen_addr();
    info!("CloudRetail API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
