//! Shared application state (spec §5, §9 "move singletons to an explicit
//! `CoreServices` configuration passed at startup"). One `AppState` is built
//! once in `main.rs` and cloned into every Axum handler; every field is
//! `Arc`-backed so the clone is cheap, mirroring
//! `ferrex_server::infra::app_state::AppState`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use healarr_config::Config;
use healarr_core::arr_client::{ArrClient, ArrKind};
use healarr_core::capabilities::CredentialStore;
use healarr_core::crypto::AesGcmCredentialStore;
use healarr_core::database::postgres::PostgresPool;
use healarr_core::database::{ArrInstanceRepository, ArrInstanceRow, ScanPathRepository};
use healarr_core::events::bus::InProcessEventBus;
use healarr_core::events::store::{EventStore, PostgresEventStore};
use healarr_core::path_mapper::{MappingSource, PathMapper, PathMapping};
use healarr_core::rate_limit::KeyedRateLimiter;
use healarr_core::scanner::engine::{ScanEngine, ScanEngineConfig, ScanRepository};
use healarr_core::types::InstanceId;
use healarr_core::ws_hub::WsHub;
use healarr_core::Result;

/// Loads `PathMapper`'s reload source from `scan_paths`: one mapping pair per
/// enabled path, local/external prefixes exactly as configured.
struct ScanPathMappingSource {
    repo: Arc<PostgresPool>,
}

#[async_trait::async_trait]
impl MappingSource for ScanPathMappingSource {
    async fn load_mappings(&self) -> Result<Vec<PathMapping>> {
        let paths = self.repo.list_enabled().await?;
        Ok(paths
            .into_iter()
            .map(|p| PathMapping {
                local_prefix: p.local_path,
                external_prefix: p.external_path,
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub event_store: Arc<PostgresEventStore>,
    pub scan_repo: Arc<PostgresPool>,
    pub scan_engine: Arc<ScanEngine>,
    pub bus: InProcessEventBus,
    pub ws_hub: Arc<WsHub>,
    pub path_mapper: Arc<PathMapper>,
    pub credential_store: Arc<AesGcmCredentialStore>,
    pub config: Arc<Config>,
    arr_clients: Arc<RwLock<HashMap<InstanceId, Arc<ArrClient>>>>,
    pub arr_rate_limiter: Arc<KeyedRateLimiter>,
    pub login_rate_limiter: Arc<KeyedRateLimiter>,
    pub setup_rate_limiter: Arc<KeyedRateLimiter>,
    pub webhook_rate_limiter: Arc<KeyedRateLimiter>,
    pub api_rate_limiter: Arc<KeyedRateLimiter>,
    pub started_at: DateTime<Utc>,
    /// Cancelled once from `main` alongside `axum::serve`'s graceful
    /// shutdown; every background task spawned off this `AppState` selects
    /// on it instead of looping forever past process shutdown (spec §5).
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub async fn new(config: Config, pool: PgPool) -> Result<Self> {
        let event_store = Arc::new(PostgresEventStore::new(pool.clone()));
        let scan_repo = Arc::new(PostgresPool::new(pool));

        let scan_engine_config = ScanEngineConfig {
            worker_concurrency: config.scanner.worker_concurrency,
            max_files: config.scanner.max_files_per_scan.map(|v| v as usize),
            ..ScanEngineConfig::default()
        };
        let bus = InProcessEventBus::new();
        let scan_engine = Arc::new(ScanEngine::new(
            scan_repo.clone() as Arc<dyn ScanRepository>,
            event_store.clone() as Arc<dyn EventStore>,
            bus.clone(),
            scan_engine_config,
        ));

        let path_mapper = Arc::new(PathMapper::new(Arc::new(ScanPathMappingSource {
            repo: scan_repo.clone(),
        })));
        // Best-effort initial load; an empty `scan_paths` table is not an
        // error, and a later write still triggers a fresh `reload()`.
        let _ = path_mapper.reload().await;

        let credential_store = Arc::new(AesGcmCredentialStore::new(config.credential_key));

        let arr_rate_limiter = Arc::new(KeyedRateLimiter::new(
            config.rate_limits.arr.rps,
            config.rate_limits.arr.burst,
        ));
        let login_rate_limiter = Arc::new(KeyedRateLimiter::new(
            config.rate_limits.login.rps,
            config.rate_limits.login.burst,
        ));
        let setup_rate_limiter = Arc::new(KeyedRateLimiter::new(
            config.rate_limits.setup.rps,
            config.rate_limits.setup.burst,
        ));
        let webhook_rate_limiter = Arc::new(KeyedRateLimiter::new(
            config.rate_limits.webhook.rps,
            config.rate_limits.webhook.burst,
        ));
        let api_rate_limiter = Arc::new(KeyedRateLimiter::new(
            config.rate_limits.api.rps,
            config.rate_limits.api.burst,
        ));

        Ok(Self {
            event_store,
            scan_repo,
            scan_engine,
            bus,
            ws_hub: Arc::new(WsHub::new()),
            path_mapper,
            credential_store,
            config: Arc::new(config),
            arr_clients: Arc::new(RwLock::new(HashMap::new())),
            arr_rate_limiter,
            login_rate_limiter,
            setup_rate_limiter,
            webhook_rate_limiter,
            api_rate_limiter,
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the cached `ArrClient` for `instance`, building and caching
    /// one on first use. The decrypted API key never leaves this call.
    pub async fn arr_client_for(&self, instance: &ArrInstanceRow) -> Result<Arc<ArrClient>> {
        if let Some(client) = self.arr_clients.read().await.get(&instance.id) {
            return Ok(client.clone());
        }

        let api_key = self.credential_store.decrypt(&instance.api_key_encrypted)?;
        let kind = parse_arr_kind(&instance.kind);
        let client = Arc::new(ArrClient::new(
            kind,
            instance.base_url.clone(),
            api_key,
            self.arr_rate_limiter.clone(),
            instance.id,
        ));

        self.arr_clients
            .write()
            .await
            .insert(instance.id, client.clone());
        Ok(client)
    }

    /// Drops a cached client, forcing the next `arr_client_for` call to
    /// rebuild it (used after an instance's base URL or key changes).
    pub async fn invalidate_arr_client(&self, instance_id: InstanceId) {
        self.arr_clients.write().await.remove(&instance_id);
    }

    pub async fn arr_instance(&self, id: InstanceId) -> Result<Option<ArrInstanceRow>> {
        self.scan_repo.get(id).await
    }

    /// Swaps in a differently-configured `ScanEngine` (e.g. `zero_byte`
    /// detection in tests, to avoid depending on `ffprobe` being on PATH).
    /// Exists only because `arr_clients` is private, which blocks the usual
    /// `AppState { scan_engine, ..state }` struct-update syntax from test
    /// code in `healarr-server/tests/*.rs` (a separate crate).
    #[doc(hidden)]
    pub fn with_scan_engine(self, scan_engine: Arc<ScanEngine>) -> Self {
        Self { scan_engine, ..self }
    }
}

fn parse_arr_kind(raw: &str) -> ArrKind {
    match raw {
        "radarr" => ArrKind::Radarr,
        "whisparr" => ArrKind::Whisparr,
        "lidarr" => ArrKind::Lidarr,
        _ => ArrKind::Sonarr,
    }
}
