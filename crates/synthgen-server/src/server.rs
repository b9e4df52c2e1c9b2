use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{
    compression::{
        CompressionLayer, DefaultPredicate, Predicate,
        predicate::NotForContentType,
    },
    cors::CorsLayer,
    trace::TraceLayer,
};

use synthgen_core::{ConfigWriter, ExporterConfig, LaunchSpec, OutputCatalog};

use crate::{
    config::AppConfig,
    handlers,
    job::{JobRunner, JobSlot, RunnerSettings},
    middleware as app_middleware, stream,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: OutputCatalog,
    pub config_writer: Arc<ConfigWriter>,
    pub launch: Arc<LaunchSpec>,
    pub runner: JobRunner,
    pub jobs: JobSlot,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let catalog = OutputCatalog::new(config.output.dir.clone());
        let runner = JobRunner::new(catalog.clone(), RunnerSettings::from(&config));
        Self {
            config_writer: Arc::new(ConfigWriter::new(config.generator.properties_file.clone())),
            launch: Arc::new(config.launch_spec()),
            catalog,
            runner,
            jobs: JobSlot::new(),
            config: Arc::new(config),
        }
    }
}

pub struct SynthgenServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    // The default predicate already skips event streams; archives are
    // compressed on their own.
    let compression = DefaultPredicate::new().and(NotForContentType::const_new("application/zip"));

    Router::new()
        // UI and health
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        // Generation
        .route("/generate", post(handlers::generate))
        .route("/stream", get(stream::stream_logs))
        .route("/status", get(handlers::status))
        // Output files
        .route("/list_files", get(handlers::list_files))
        .route("/download/{*path}", get(handlers::download))
        .route("/download_all", get(handlers::download_all))
        .route("/cleanup", post(handlers::cleanup))
        .with_state(state)
        // Layers wrap outward: cors, compression, trace, then request id
        // outermost so the span sees the assigned id.
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new().compress_when(compression))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .headers()
                        .get(app_middleware::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Prepare the output tree and write the all-disabled baseline
    /// properties before accepting requests.
    pub async fn build(self) -> anyhow::Result<SynthgenServer> {
        let state = AppState::new(self.config);

        let catalog = state.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.ensure_layout()).await??;
        tracing::info!(dir = %state.catalog.root().display(), "output directory ready");

        state
            .config_writer
            .write(&ExporterConfig::baseline(state.catalog.root()))
            .await?;

        Ok(SynthgenServer {
            addr: self.addr,
            app: build_app(state),
        })
    }
}

impl SynthgenServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
