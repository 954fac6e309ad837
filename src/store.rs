use crate::models::{
    CandidateProduct, CandidateStatus, DashboardStats, HistoryPage, ImportConfiguration,
    ImportLogEntry, LogStatus,
};
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const CONFIG_KEY: &str = "woopl:config";
const CANDIDATES_KEY: &str = "woopl:candidates";
const LOG_KEY: &str = "woopl:import_log";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("stored record is unreadable: {0}")]
    Corrupt(String),
    #[error("candidate {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyImported,
    LimitReached,
}

/// Configuration, candidates and the import log. In-memory state is
/// authoritative; Redis, when configured, receives every write and seeds the
/// state on startup.
#[derive(Clone, Default)]
pub struct ImportStore {
    state: Arc<Mutex<StoreState>>,
    redis: Option<redis::Client>,
}

#[derive(Default)]
struct StoreState {
    config: Option<ImportConfiguration>,
    candidates: HashMap<Uuid, CandidateProduct>,
    by_source: HashMap<String, Uuid>,
    log: Vec<ImportLogEntry>,
}

impl StoreState {
    fn index(&mut self, candidate: CandidateProduct) {
        self.by_source
            .insert(candidate.source.source_key(), candidate.id);
        self.candidates.insert(candidate.id, candidate);
    }
}

impl ImportStore {
    pub fn new(redis: Option<redis::Client>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            redis,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok());
        Self::new(redis)
    }

    /// Loads persisted state from Redis into memory.
    pub async fn hydrate(&self) -> Result<(), StoreError> {
        let Some(client) = &self.redis else {
            return Ok(());
        };
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)?;
        let config: Option<String> = conn.get(CONFIG_KEY).await.map_err(redis_error)?;
        let candidates: HashMap<String, String> =
            conn.hgetall(CANDIDATES_KEY).await.map_err(redis_error)?;
        let log: Vec<String> = conn.lrange(LOG_KEY, 0, -1).await.map_err(redis_error)?;

        let mut state = self.state.lock().await;
        if let Some(raw) = config {
            state.config = Some(decode(&raw)?);
        }
        for raw in candidates.values() {
            match decode::<CandidateProduct>(raw) {
                Ok(candidate) => state.index(candidate),
                Err(err) => warn!(target = "woopl.store", error = %err, "candidate_skipped"),
            }
        }
        state.log = log
            .iter()
            .filter_map(|raw| decode::<ImportLogEntry>(raw).ok())
            .collect();
        info!(
            target = "woopl.store",
            candidates = state.candidates.len(),
            log_entries = state.log.len(),
            has_config = state.config.is_some(),
            "store_hydrated"
        );
        Ok(())
    }

    /// The active configuration. With Redis configured the shared copy is
    /// read so that writes from other processes are seen.
    pub async fn load_config(&self) -> Result<Option<ImportConfiguration>, StoreError> {
        if let Some(client) = &self.redis {
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(redis_error)?;
            let raw: Option<String> = conn.get(CONFIG_KEY).await.map_err(redis_error)?;
            if let Some(raw) = raw {
                let config: ImportConfiguration = decode(&raw)?;
                self.state.lock().await.config = Some(config.clone());
                return Ok(Some(config));
            }
        }
        Ok(self.state.lock().await.config.clone())
    }

    pub async fn save_config(&self, config: ImportConfiguration) {
        self.state.lock().await.config = Some(config.clone());
        self.persist(CONFIG_KEY, None, &config).await;
    }

    /// Updates the enabled flag, creating the default configuration if none
    /// exists yet.
    pub async fn set_enabled(&self, enabled: bool) -> ImportConfiguration {
        let config = {
            let mut state = self.state.lock().await;
            let config = state.config.get_or_insert_with(ImportConfiguration::default);
            config.enabled = enabled;
            config.clone()
        };
        self.persist(CONFIG_KEY, None, &config).await;
        config
    }

    pub async fn contains_source(&self, source_key: &str) -> bool {
        self.state.lock().await.by_source.contains_key(source_key)
    }

    /// Inserts a new candidate unless its source was already imported or the
    /// day's quota (candidates created today) is used up. Check and insert
    /// happen under one lock.
    pub async fn insert_candidate(
        &self,
        candidate: CandidateProduct,
        daily_limit: u32,
        entry: ImportLogEntry,
    ) -> InsertOutcome {
        {
            let mut state = self.state.lock().await;
            if state.by_source.contains_key(&candidate.source.source_key()) {
                return InsertOutcome::AlreadyImported;
            }
            let today = candidate.created_at.date_naive();
            let created_today = state
                .candidates
                .values()
                .filter(|c| c.created_at.date_naive() == today)
                .count();
            if created_today >= daily_limit as usize {
                return InsertOutcome::LimitReached;
            }
            state.index(candidate.clone());
            state.log.push(entry.clone());
        }
        self.persist_candidate(&candidate).await;
        self.persist_log(&entry).await;
        InsertOutcome::Inserted
    }

    pub async fn get(&self, id: Uuid) -> Option<CandidateProduct> {
        self.state.lock().await.candidates.get(&id).cloned()
    }

    /// Applies `apply` to a candidate under the store lock. On success the
    /// updated candidate and its log entry are recorded.
    pub async fn update<T, E, F>(&self, id: Uuid, apply: F) -> Result<(T, CandidateProduct), E>
    where
        F: FnOnce(&mut CandidateProduct) -> Result<(T, ImportLogEntry), E>,
        E: From<StoreError>,
    {
        let (value, updated, entry) = {
            let mut state = self.state.lock().await;
            let Some(current) = state.candidates.get(&id) else {
                return Err(StoreError::NotFound(id).into());
            };
            let mut working = current.clone();
            let (value, entry) = apply(&mut working)?;
            state.candidates.insert(id, working.clone());
            state.log.push(entry.clone());
            (value, working, entry)
        };
        self.persist_candidate(&updated).await;
        self.persist_log(&entry).await;
        Ok((value, updated))
    }

    pub async fn append_log(&self, entry: ImportLogEntry) {
        self.state.lock().await.log.push(entry.clone());
        self.persist_log(&entry).await;
    }

    pub async fn by_status(&self, status: CandidateStatus) -> Vec<CandidateProduct> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state
            .candidates
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        out
    }

    /// Newest entries first; `page` is 1-based.
    pub async fn history(&self, page: usize, limit: usize) -> HistoryPage {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let state = self.state.lock().await;
        let total = state.log.len();
        let imports = state
            .log
            .iter()
            .rev()
            .skip((page - 1) * limit)
            .take(limit)
            .cloned()
            .collect();
        HistoryPage {
            imports,
            total,
            total_pages: total.div_ceil(limit),
            current_page: page,
        }
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> DashboardStats {
        let today = now.date_naive();
        let state = self.state.lock().await;
        let mut stats = DashboardStats::default();
        for entry in &state.log {
            let is_today = entry.created_at.date_naive() == today;
            match entry.status {
                LogStatus::Success => {
                    stats.total_imported += 1;
                    stats.imported_today += usize::from(is_today);
                }
                LogStatus::Failed => {
                    stats.failed_imports += 1;
                    stats.failed_today += usize::from(is_today);
                }
                _ => {}
            }
        }
        for candidate in state.candidates.values() {
            match candidate.status {
                CandidateStatus::Pending => stats.pending += 1,
                CandidateStatus::Approved => stats.approved += 1,
                CandidateStatus::Rejected => stats.rejected += 1,
                _ => {}
            }
        }
        stats
    }

    async fn persist_candidate(&self, candidate: &CandidateProduct) {
        let field = candidate.id.to_string();
        self.persist(CANDIDATES_KEY, Some(&field), candidate).await;
    }

    async fn persist_log(&self, entry: &ImportLogEntry) {
        let Some(client) = &self.redis else {
            return;
        };
        let Ok(json) = serde_json::to_string(entry) else {
            return;
        };
        let result = match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => conn.rpush::<_, _, ()>(LOG_KEY, json).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(target = "woopl.store", error = %err, "log_write_failed");
        }
    }

    async fn persist<T: serde::Serialize>(&self, key: &'static str, field: Option<&str>, value: &T) {
        let Some(client) = &self.redis else {
            return;
        };
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        let result = match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => match field {
                Some(field) => conn.hset::<_, _, _, ()>(key, field, json).await,
                None => conn.set::<_, _, ()>(key, json).await,
            },
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(target = "woopl.store", key, error = %err, "write_through_failed");
        }
    }
}

fn redis_error(err: redis::RedisError) -> StoreError {
    StoreError::Redis(err.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt(err.to_string()))
}

#[cfg(test)]
impl ImportStore {
    /// Blocks every store operation until the returned guard is dropped.
    pub(crate) async fn hold_state(&self) -> impl Sized + Send {
        self.state.clone().lock_owned().await
    }
}
