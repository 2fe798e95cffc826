//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy and credit check handlers
//! - Wire up middleware (tracing, request ID, body limit, response headers)
//! - Own the shared proxy state
//! - Run background tasks: expiry sweeper, config reloader, admin listener
//! - Serve plain or TLS until shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    http::{header, HeaderName, HeaderValue},
    routing::{any, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::affinity::{AffinityStore, InMemoryAffinity};
use crate::config::{ConfigError, FieldConfig, ProxyConfig, QuotaConfig, StreamConfig};
use crate::http::credit::credit_handler;
use crate::http::proxy::proxy_handler;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::load_balancer::BackendPool;
use crate::locator::ArtifactLocator;
use crate::observability::metrics;
use crate::quota::{InMemoryLedger, QuotaLedger, QuotaPolicy};
use crate::resilience::timeouts::Deadlines;
use crate::routing::{Router as ProxyRouter, TargetResolver};
use crate::security::TrustGate;

/// Shared state behind every handler.
pub struct ProxyState {
    pub router: ProxyRouter,
    pub resolver: TargetResolver,
    pub locator: ArtifactLocator,
    pub ledger: Arc<dyn QuotaLedger>,
    /// Reloadable quota settings.
    pub quota: ArcSwap<QuotaConfig>,
    /// Reloadable trust policy.
    pub trust: ArcSwap<TrustGate>,
    pub fields: FieldConfig,
    pub stream: StreamConfig,
    pub deadlines: Deadlines,
    pub affinity_ttl: Duration,
    pub client: reqwest::Client,
    pub max_body_size: usize,
    /// Scheme announced in `X-Forwarded-Proto`.
    pub scheme: &'static str,
    pub started_at: Instant,
}

impl ProxyState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let pool = BackendPool::new(&config.backends, config.balancing.strategy)
            .map_err(|e| ConfigError::Startup(e.to_string()))?;
        let pool = Arc::new(pool);
        let locator = ArtifactLocator::for_pool(&pool);

        let affinity_ttl = Duration::from_secs(config.affinity.ttl_secs);
        let affinity: Arc<dyn AffinityStore> = Arc::new(InMemoryAffinity::new(affinity_ttl));
        let ledger: Arc<dyn QuotaLedger> =
            Arc::new(InMemoryLedger::new(QuotaPolicy::from(&config.quota)));

        let deadlines = Deadlines::from(&config.timeouts);
        let client = reqwest::Client::builder()
            .connect_timeout(deadlines.connect)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::Startup(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            router: ProxyRouter::from_config(config.effective_routes()),
            resolver: TargetResolver::new(pool, affinity),
            locator,
            ledger,
            quota: ArcSwap::from_pointee(config.quota.clone()),
            trust: ArcSwap::from_pointee(TrustGate::from_config(&config.trust)),
            fields: config.fields.clone(),
            stream: config.stream.clone(),
            deadlines,
            affinity_ttl,
            client,
            max_body_size: config.security.max_body_size,
            scheme: if config.listener.tls.is_some() {
                "https"
            } else {
                "http"
            },
            started_at: Instant::now(),
        })
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        self.resolver.pool()
    }

    pub fn affinity(&self) -> &Arc<dyn AffinityStore> {
        self.resolver.affinity()
    }

    /// Apply the reloadable subset of a new configuration.
    pub fn apply_reload(&self, config: &ProxyConfig) {
        self.ledger.update_policy(QuotaPolicy::from(&config.quota));
        self.quota.store(Arc::new(config.quota.clone()));
        self.trust.store(Arc::new(TrustGate::from_config(&config.trust)));

        let pool_changed = config.backends.len() != self.pool().len()
            || config
                .backends
                .iter()
                .zip(self.pool().all())
                .any(|(cfg, backend)| {
                    cfg.name != backend.id
                        || crate::load_balancer::backend::parse_backend_url(&cfg.address)
                            .map_or(true, |url| url != backend.base_url)
                });
        if pool_changed {
            tracing::warn!("Backend pool changes require a restart; keeping the current pool");
        }

        tracing::info!(
            daily_limit = config.quota.daily_limit,
            trust_mode = ?config.trust.mode,
            "Configuration reloaded"
        );
    }

    /// Drop expired affinity and idempotency entries.
    pub fn sweep(&self) {
        let affinity = self.affinity().expire_sweep();
        let job_ids = self.ledger.purge_expired();
        metrics::record_sweep("affinity", affinity);
        metrics::record_sweep("idempotency", job_ids);
        if affinity + job_ids > 0 {
            tracing::debug!(affinity, job_ids, "Expired entries swept");
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ProxyState>,
}

impl std::ops::Deref for AppState {
    type Target = ProxyState;

    fn deref(&self) -> &ProxyState {
        &self.inner
    }
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given (validated) configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let state = AppState {
            inner: Arc::new(ProxyState::from_config(&config)?),
        };
        let router = Self::build_router(&config, state.clone());

        tracing::info!(
            backends = state.pool().len(),
            strategy = ?state.pool().strategy(),
            routes = state.router.routes().len(),
            "Proxy initialized"
        );

        Ok(Self {
            router,
            state,
            config,
        })
    }

    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);

        let router = Router::new()
            .route(&config.quota.credit_check_path, post(credit_handler))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size));

        let router = if config.security.enable_headers {
            router.layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
        } else {
            router
        };

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// After shutdown is signalled, open streams get `drain_timeout_secs`
    /// to finish before the server returns anyway.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        self.spawn_background(config_updates, &shutdown).await?;

        let drain_timeout = self.drain_timeout();
        let mut drain_deadline = shutdown.resubscribe();
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .into_future();

        tokio::select! {
            result = serve => result?,
            _ = async {
                let _ = drain_deadline.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                tracing::warn!(
                    timeout_secs = drain_timeout.as_secs(),
                    "Drain deadline reached, closing open streams"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS termination.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        self.spawn_background(config_updates, &shutdown).await?;

        let drain_timeout = self.drain_timeout();
        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server draining");
            drain.graceful_shutdown(Some(drain_timeout));
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.config.listener.drain_timeout_secs)
    }

    async fn spawn_background(
        &self,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: &broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        spawn_sweeper(
            self.state.clone(),
            Duration::from_secs(self.config.affinity.sweep_interval_secs),
            shutdown.resubscribe(),
        );
        spawn_reloader(self.state.clone(), config_updates, shutdown.resubscribe());

        if self.config.admin.enabled {
            let listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let router = admin::setup_admin_router(self.state.clone(), &self.config.admin);
            let mut shutdown = shutdown.resubscribe();
            tracing::info!(address = %self.config.admin.bind_address, "Admin API listening");
            tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }
        Ok(())
    }
}

fn spawn_sweeper(state: AppState, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => state.sweep(),
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Sweeper stopped");
    });
}

fn spawn_reloader(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => state.apply_reload(&config),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    });
}
