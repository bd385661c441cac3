//! Mail Bridge Mailer - consumes send requests and delivers email.
//!
//! Runs two consumers:
//! - `send_mail` as `EmailGroupID` → one status report on `receive_mail`
//! - `send_csv` as `CSVGroupID` → one status report per row on `receive_csv`
//!
//! A `GET /` liveness probe is served alongside.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use mailbridge::mail::{MailSender, SmtpMailer, TemplateRenderer};
use mailbridge::storage::{LocalStorage, Storage};
use mailbridge::{
    logging, shutdown_signal, web, AmqpBroker, Broker, Config, ConsumerSpec, ConsumerSupervisor,
    CsvBatchHandler, EmailSendHandler, Producer, CSV_GROUP, EMAIL_GROUP,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_tracing();

    info!("mailer_starting");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        send_topic = %config.topics.send_mail,
        send_csv_topic = %config.topics.send_csv,
        smtp_mode = ?config.smtp.mode,
        storage_base_path = %config.storage_base_path.display(),
        template_path = ?config.template_path,
        "config_loaded"
    );

    let renderer = Arc::new(match &config.template_path {
        Some(path) => TemplateRenderer::from_file(path, config.header_text.clone()),
        None => TemplateRenderer::with_default_template(config.header_text.clone()),
    }
    .context("Failed to load email template")?);

    let mailer: Arc<dyn MailSender> =
        Arc::new(SmtpMailer::new(&config.smtp).context("Failed to configure SMTP")?);
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(&config.storage_base_path));
    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(
        config.broker_url.clone(),
        config.prefetch_count,
    ));

    let email_handler = EmailSendHandler::new(
        Arc::clone(&renderer),
        Arc::clone(&mailer),
        Producer::new(Arc::clone(&broker), config.topics.receive_mail.clone()),
    );
    let csv_handler = CsvBatchHandler::new(
        storage,
        renderer,
        mailer,
        Producer::new(Arc::clone(&broker), config.topics.receive_csv.clone()),
    );

    let supervisor = ConsumerSupervisor::new(broker);
    supervisor
        .start_all(vec![
            ConsumerSpec::new(&config.topics.send_mail, EMAIL_GROUP, Arc::new(email_handler)),
            ConsumerSpec::new(&config.topics.send_csv, CSV_GROUP, Arc::new(csv_handler)),
        ])
        .await
        .context("Failed to start consumers")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let served: Result<()> = supervisor
        .run_then_stop(async {
            let listener = TcpListener::bind(addr)
                .await
                .context("Failed to bind to address")?;
            info!(address = %addr, "mailer_listening");

            axum::serve(listener, web::health_router())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")
        })
        .await;

    info!("mailer_shutdown_complete");
    served
}
