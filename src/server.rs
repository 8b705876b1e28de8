use crate::{
    config::{Config, CorsConfig, ServerConfig},
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
    state::{ClassLabels, ServiceState, State},
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use ndarray::Array4;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Read-only state shared by every request handler.
#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub model_service: M,
    pub service_state: Arc<ServiceState>,
    pub metrics: Arc<Metrics>,
    pub max_decoded_bytes: u64,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(
        model_service: M,
        service_state: ServiceState,
        metrics: Metrics,
        max_decoded_bytes: u64,
    ) -> Self {
        Self {
            model_service,
            service_state: Arc::new(service_state),
            metrics: Arc::new(metrics),
            max_decoded_bytes,
        }
    }
}

fn cors_layer(cors: &CorsConfig) -> anyhow::Result<CorsLayer> {
    let origins = cors
        .allowed_origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub fn build_router<M: ModelService>(
    state: SharedState<M>,
    cors: &CorsConfig,
    max_upload_bytes: usize,
) -> anyhow::Result<Router> {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    let router = Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(cors_layer(cors)?)
        .layer(TraceLayer::new_for_http())
        .layer(metrics_layer);

    Ok(router)
}

/// Runs one forward pass on a blank input and checks the score vector
/// length against the label set.
pub async fn check_label_alignment<M: ModelService>(
    model_service: &M,
    labels: &ClassLabels,
    input_shape: (usize, usize, usize, usize),
) -> anyhow::Result<()> {
    let scores = model_service.infer(Array4::zeros(input_shape)).await?;
    labels.ensure_aligned(scores.ncols())?;
    tracing::info!(
        "Model output has {} classes: {:?}",
        scores.ncols(),
        labels.iter().collect::<Vec<_>>()
    );
    Ok(())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(router: Router, config: &ServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.get_address()).await?;
        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Inference service listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown")
            })
            .await?;

        Ok(())
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let service_state = ServiceState::new(&config.labels)?;
    let ort_model_service = OrtModelService::new(&config.model)?;
    check_label_alignment(
        &ort_model_service,
        service_state.get_labels(),
        config.model.input_shape(),
    )
    .await?;

    let state = SharedState::new(
        ort_model_service,
        service_state,
        Metrics::new()?,
        config.server.max_decoded_bytes,
    );
    let router = build_router(state, &config.cors, config.server.max_upload_bytes)?;

    let server = HttpServer::new(router, &config.server).await?;
    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
