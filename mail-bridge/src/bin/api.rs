//! Mail Bridge API - enqueue surface and status recorder.
//!
//! Serves the HTTP endpoints that create email and upload records and
//! publish them on `send_mail` / `send_csv`, and consumes the status
//! reports coming back on `receive_mail` / `receive_csv`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use mailbridge::{
    logging, shutdown_signal, web, AmqpBroker, AppState, Broker, Config, ConsumerSpec,
    ConsumerSupervisor, MemoryRecordStore, RecordStore, StatusUpdateHandler, CSV_RECEIVE_GROUP,
    EMAIL_RECEIVE_GROUP,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_tracing();

    info!("api_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        receive_topic = %config.topics.receive_mail,
        receive_csv_topic = %config.topics.receive_csv,
        from_email = %config.from_email,
        "config_loaded"
    );

    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(
        config.broker_url.clone(),
        config.prefetch_count,
    ));

    let supervisor = ConsumerSupervisor::new(Arc::clone(&broker));
    supervisor
        .start_all(vec![
            ConsumerSpec::new(
                &config.topics.receive_mail,
                EMAIL_RECEIVE_GROUP,
                Arc::new(StatusUpdateHandler::new(Arc::clone(&store), "receive_mail")),
            ),
            ConsumerSpec::new(
                &config.topics.receive_csv,
                CSV_RECEIVE_GROUP,
                Arc::new(StatusUpdateHandler::new(Arc::clone(&store), "receive_csv")),
            ),
        ])
        .await
        .context("Failed to start consumers")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, store, broker);
    let app = web::api_router(state);

    let served: Result<()> = supervisor
        .run_then_stop(async {
            let listener = TcpListener::bind(addr)
                .await
                .context("Failed to bind to address")?;
            info!(address = %addr, "api_listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")
        })
        .await;

    info!("api_shutdown_complete");
    served
}
