use kuycountry_backend::api::{self, webhooks::WebhookState, AppState};
use kuycountry_backend::config::AppConfig;
use kuycountry_backend::database::{
    self, in_memory::InMemoryStore, ledger_repository::PgLedgerRepository,
    order_repository::PgOrderRepository,
    repository::{IdempotencyLedger, OrderRepository},
};
use kuycountry_backend::health::HealthChecker;
use kuycountry_backend::logging::{init_tracing, mask_database_url, mask_secret};
use kuycountry_backend::payments::provider::PaymentGateway;
use kuycountry_backend::payments::providers::MidtransGateway;
use kuycountry_backend::services::{
    NotificationValidator, OrderReconciler, ReconcilerConfig, StatusQueryClient,
    TransactionService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        production = config.midtrans.is_production,
        server_key = %mask_secret(&config.midtrans.server_key),
        "Starting Kuycountry payment backend"
    );

    let (orders, ledger, db_pool): (
        Arc<dyn OrderRepository>,
        Arc<dyn IdempotencyLedger>,
        Option<sqlx::PgPool>,
    ) = match &config.database {
        Some(db_config) => {
            info!(url = %mask_database_url(&db_config.url), "Initializing database connection pool");
            let pool = database::init_pool_from_config(db_config).await?;
            database::run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            (
                Arc::new(PgOrderRepository::new(pool.clone())),
                Arc::new(PgLedgerRepository::new(pool.clone())),
                Some(pool),
            )
        }
        None => {
            info!("Skipping database initialization (SKIP_EXTERNALS=true), orders are kept in memory");
            let store = InMemoryStore::new();
            (Arc::new(store.clone()), Arc::new(store), None)
        }
    };

    let gateway: Arc<dyn PaymentGateway> = Arc::new(MidtransGateway::new(config.midtrans.clone())?);

    let status_client = StatusQueryClient::new(
        gateway.clone(),
        Duration::from_secs(config.midtrans.timeout_secs),
    );
    let reconciler = Arc::new(OrderReconciler::new(
        orders.clone(),
        ledger,
        status_client,
        ReconcilerConfig {
            create_missing_orders: config.notifications.create_missing_orders,
        },
    ));

    let state = AppState {
        transactions: Arc::new(TransactionService::new(gateway, orders)),
        notifications: Arc::new(WebhookState {
            validator: NotificationValidator::new(
                config.midtrans.server_key.clone(),
                config.notifications.require_signature,
            ),
            reconciler,
            timeout: Duration::from_secs(config.notifications.timeout_secs),
        }),
        health_checker: HealthChecker::new(db_pool),
    };

    let app = api::build_app(state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(
        %addr,
        environment = if config.midtrans.is_production { "production" } else { "development" },
        "Server is running"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}
