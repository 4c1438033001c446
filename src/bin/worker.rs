use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
use std::sync::Arc;
use thumbnail_worker::{
    app_state::AppState,
    config::{AppConfig, QueueBackend},
    db::{
        self,
        store::{JobStore, PgJobStore},
    },
    routes,
    services::{
        amqp::{self, AmqpPublisher, AmqpTaskQueue},
        queue::{CompletionPublisher, TaskQueue},
        redis_queue::{RedisPublisher, RedisTaskQueue},
    },
    worker::{self, JobProcessor, ResizeBounds},
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting thumbnail worker");

    match run().await {
        Ok(()) => {
            tracing::info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    routes::metrics::describe();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations");
        db::run_migrations(&db_pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));
    let (queue, publisher) = connect_broker(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let listener = tokio::net::TcpListener::bind(&config.health_addr).await?;
    tracing::info!("Health endpoint listening on {}", config.health_addr);
    let app = routes::router(
        AppState::new(store.clone(), queue.clone()),
        Arc::new(prometheus),
    );
    let server = tokio::spawn(routes::serve(listener, app, stopped(shutdown_rx.clone())));

    let bounds = ResizeBounds {
        max_width: config.thumbnail_max_width,
        max_height: config.thumbnail_max_height,
    };
    let processor = JobProcessor::new(store, publisher, bounds);

    tracing::info!(
        queue = %config.processing_queue,
        backend = %config.queue_backend,
        "Worker ready, waiting for tasks"
    );
    let result = worker::run(queue, &processor, stopped(shutdown_rx), config.poll_interval()).await;

    server.abort();
    result.map_err(Into::into)
}

async fn connect_broker(
    config: &AppConfig,
) -> Result<(Arc<dyn TaskQueue>, Arc<dyn CompletionPublisher>), Box<dyn std::error::Error>> {
    match config.queue_backend {
        QueueBackend::Amqp => {
            tracing::info!("Connecting to RabbitMQ");
            let connection = amqp::connect(&config.rabbitmq_url).await?;
            amqp::declare_queues(
                &connection,
                &[config.processing_queue.as_str(), config.completed_queue.as_str()],
            )
            .await?;

            let queue = AmqpTaskQueue::new(connection.clone(), &config.processing_queue).await?;
            let publisher = AmqpPublisher::new(connection, &config.completed_queue);
            Ok((Arc::new(queue), Arc::new(publisher)))
        }
        QueueBackend::Redis => {
            tracing::info!("Connecting to Redis job queue");
            let queue = RedisTaskQueue::new(
                &config.redis_url,
                &config.processing_queue,
                config.poll_interval(),
            )?;
            queue.health_check().await?;
            let publisher = RedisPublisher::new(&config.redis_url, &config.completed_queue)?;
            Ok((Arc::new(queue), Arc::new(publisher)))
        }
    }
}

/// Resolves once the shutdown flag has been raised.
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
