use crate::{
    config::{Config, Validatable},
    detection_service::DetectionService,
    detector::{Detector, OrtDetector},
    image_ops::Annotator,
    labels::ClassLabels,
    server::{HttpServer, SharedState},
    store::{LastResultSlot, ResultStore},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let labels = match ClassLabels::load(&config.labels.get_path()) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("Failed to load class labels: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Loaded {} class labels", labels.len());

    let detector: Arc<dyn Detector> = match OrtDetector::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detector: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let annotator = Annotator::new(&config.annotation)?;

    let output_path = config.output.result_path.clone();
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let store: Arc<dyn ResultStore> = Arc::new(LastResultSlot::new());
    let detection_service = Arc::new(DetectionService::new(
        detector,
        labels,
        annotator,
        store,
        output_path,
    ));

    let state = SharedState {
        detection_service,
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
