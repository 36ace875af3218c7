use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::config::EngineSettings;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Correction, Essay};
use crate::db::types::{CorrectionStatus, CorrectionType, EssayStatus};
use crate::dispatch::{DispatchError, TaskDispatcher, TaskStatus};
use crate::services::correction::CorrectionEngine;
use crate::services::locks::{CorrectionLock, LockError, LockManager};
use crate::services::reconcile::ReconciliationService;
use crate::services::scoring::{EssayScorer, NormalizedResult, ScoreRequest, ScoringError};
use crate::store::{
    CorrectionResultUpdate, CorrectionStore, EssayFilter, EssayPair, NewEssay, StoreError,
};

const CONFIG_ENV_VARS: &[&str] = &[
    "REDINK_HOST",
    "REDINK_PORT",
    "REDINK_ENV",
    "ENVIRONMENT",
    "REDINK_STRICT_CONFIG",
    "PROJECT_NAME",
    "VERSION",
    "API_V1_STR",
    "BACKEND_CORS_ORIGINS",
    "POSTGRES_SERVER",
    "POSTGRES_PORT",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "DATABASE_URL",
    "REDIS_HOST",
    "REDIS_PORT",
    "REDIS_DB",
    "REDIS_PASSWORD",
    "SCORING_API_KEY",
    "SCORING_BASE_URL",
    "SCORING_MODEL",
    "SCORING_MAX_TOKENS",
    "SCORING_REQUEST_TIMEOUT",
    "ESSAY_MIN_CONTENT_CHARS",
    "ESSAY_MAX_CONTENT_CHARS",
    "CORRECTION_LOCK_TTL_SECONDS",
    "CORRECTION_MAX_RETRIES",
    "CORRECTION_RETRY_BACKOFF_SECONDS",
    "CORRECTION_WORKER_CONCURRENCY",
    "JOB_MAX_ATTEMPTS",
    "JOB_TIMEOUT_SECONDS",
    "QUEUE_POLL_INTERVAL_SECONDS",
    "RECONCILE_INTERVAL_SECONDS",
    "STALE_CORRECTION_SECONDS",
    "REDINK_LOG_LEVEL",
    "REDINK_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

/// Serializes tests that read or write process environment variables.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn clear_config_env() {
    for var in CONFIG_ENV_VARS {
        std::env::remove_var(var);
    }
}

pub(crate) fn engine_settings() -> EngineSettings {
    EngineSettings {
        min_content_chars: 20,
        max_content_chars: 65000,
        lock_ttl_seconds: 600,
        max_retries: 2,
        // Keep tests fast; the schedule shape is covered by config tests.
        retry_backoff_seconds: vec![0],
    }
}

pub(crate) fn sample_content() -> String {
    "Last summer I travelled to the coast with my family and kept a diary.".to_string()
}

pub(crate) fn scored_result(total_score: f64) -> NormalizedResult {
    NormalizedResult {
        total_score,
        dimension_scores: [("content".to_string(), total_score)].into_iter().collect(),
        error_list: vec![json!({"sentence": "I goes home.", "correction": "I go home."})],
        narrative_comments: Some("Clear structure, watch verb agreement.".to_string()),
        improvement_suggestions: vec!["Review subject-verb agreement.".to_string()],
        normalized_content: Some("I go home.".to_string()),
        raw: json!({"total_score": total_score, "normalized_content": "I go home."}),
    }
}

/// Everything an engine test needs, with the doubles kept reachable for
/// assertions.
pub(crate) struct EngineHarness {
    pub(crate) engine: CorrectionEngine,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) locks: Arc<MemoryLockManager>,
    pub(crate) dispatcher: Arc<MemoryDispatcher>,
    pub(crate) scorer: Arc<ScriptedScorer>,
}

pub(crate) fn engine_harness(scorer: ScriptedScorer) -> EngineHarness {
    engine_harness_with(scorer, engine_settings(), Duration::from_secs(5))
}

pub(crate) fn engine_harness_with(
    scorer: ScriptedScorer,
    settings: EngineSettings,
    scoring_timeout: Duration,
) -> EngineHarness {
    build_harness(scorer, MemoryDispatcher::new(), None, settings, scoring_timeout)
}

pub(crate) fn engine_harness_with_dispatcher(
    scorer: ScriptedScorer,
    dispatcher: MemoryDispatcher,
) -> EngineHarness {
    build_harness(scorer, dispatcher, None, engine_settings(), Duration::from_secs(5))
}

/// Harness whose store loses one scripted version race, so CAS-miss paths
/// can be driven deterministically.
pub(crate) fn engine_harness_racing(scorer: ScriptedScorer, race: RaceOn) -> EngineHarness {
    build_harness(
        scorer,
        MemoryDispatcher::new(),
        Some(race),
        engine_settings(),
        Duration::from_secs(5),
    )
}

fn build_harness(
    scorer: ScriptedScorer,
    dispatcher: MemoryDispatcher,
    race: Option<RaceOn>,
    settings: EngineSettings,
    scoring_timeout: Duration,
) -> EngineHarness {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(MemoryLockManager::new());
    let dispatcher = Arc::new(dispatcher);
    let scorer = Arc::new(scorer);

    let engine_store: Arc<dyn CorrectionStore> = match race {
        Some(race) => Arc::new(RacingStore::new(store.clone(), race)),
        None => store.clone(),
    };

    let engine = CorrectionEngine::new(
        engine_store,
        locks.clone(),
        dispatcher.clone(),
        scorer.clone(),
        settings,
        scoring_timeout,
    );

    EngineHarness { engine, store, locks, dispatcher, scorer }
}

pub(crate) fn reconciler(harness: &EngineHarness, stale_after: Duration) -> ReconciliationService {
    ReconciliationService::new(harness.store.clone(), harness.dispatcher.clone(), stale_after)
}

/// In-memory `CorrectionStore` mirroring the Postgres implementation's
/// version-predicate semantics.
#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<HashMap<i64, EssayPair>>,
    next_id: AtomicI64,
}

/// Seed description for pairs that need to start mid-lifecycle.
pub(crate) struct SeedPair {
    pub(crate) essay_status: EssayStatus,
    pub(crate) correction_status: CorrectionStatus,
    pub(crate) task_handle: Option<String>,
    pub(crate) score: Option<f64>,
    pub(crate) results: Option<serde_json::Value>,
}

impl Default for SeedPair {
    fn default() -> Self {
        Self {
            essay_status: EssayStatus::Pending,
            correction_status: CorrectionStatus::Pending,
            task_handle: None,
            score: None,
            results: None,
        }
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()), next_id: AtomicI64::new(1) }
    }

    pub(crate) fn seed(&self, seed: SeedPair) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = primitive_now_utc();
        let pair = EssayPair {
            essay: Essay {
                id,
                user_id: "user-1".to_string(),
                title: "Seeded essay".to_string(),
                content: sample_content(),
                word_count: 14,
                grade: None,
                status: seed.essay_status,
                score: seed.score,
                corrected_content: None,
                comments: None,
                error_analysis: None,
                improvement_suggestions: None,
                error_message: None,
                version: 0,
                created_at: now,
                updated_at: now,
            },
            correction: Correction {
                id,
                essay_id: id,
                status: seed.correction_status,
                correction_type: CorrectionType::Automated,
                task_handle: seed.task_handle,
                results: seed.results.map(sqlx::types::Json),
                score: seed.score,
                comments: None,
                error_analysis: None,
                improvement_suggestions: None,
                retry_count: 0,
                error_message: None,
                version: 0,
                is_deleted: false,
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
        };
        self.guard().insert(id, pair);
        id
    }

    /// Simulate a concurrent writer winning a race against a held witness.
    pub(crate) fn bump_versions(&self, essay_id: i64) {
        let mut inner = self.guard();
        if let Some(pair) = inner.get_mut(&essay_id) {
            pair.essay.version += 1;
            pair.correction.version += 1;
        }
    }

    pub(crate) fn snapshot(&self, essay_id: i64) -> EssayPair {
        self.guard().get(&essay_id).cloned().expect("pair exists")
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<i64, EssayPair>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn witness_matches(stored: &EssayPair, witness: &EssayPair) -> bool {
        stored.essay.version == witness.essay.version
            && stored.correction.version == witness.correction.version
    }
}

#[async_trait]
impl CorrectionStore for MemoryStore {
    async fn create_pair(&self, new_essay: NewEssay) -> Result<EssayPair, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = primitive_now_utc();
        let pair = EssayPair {
            essay: Essay {
                id,
                user_id: new_essay.user_id,
                title: new_essay.title,
                content: new_essay.content,
                word_count: new_essay.word_count,
                grade: new_essay.grade,
                status: EssayStatus::Pending,
                score: None,
                corrected_content: None,
                comments: None,
                error_analysis: None,
                improvement_suggestions: None,
                error_message: None,
                version: 0,
                created_at: now,
                updated_at: now,
            },
            correction: Correction {
                id,
                essay_id: id,
                status: CorrectionStatus::Pending,
                correction_type: CorrectionType::Automated,
                task_handle: None,
                results: None,
                score: None,
                comments: None,
                error_analysis: None,
                improvement_suggestions: None,
                retry_count: 0,
                error_message: None,
                version: 0,
                is_deleted: false,
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
        };
        self.guard().insert(id, pair.clone());
        Ok(pair)
    }

    async fn fetch_pair(&self, essay_id: i64) -> Result<Option<EssayPair>, StoreError> {
        Ok(self.guard().get(&essay_id).cloned())
    }

    async fn fetch_essay(&self, essay_id: i64) -> Result<Option<Essay>, StoreError> {
        Ok(self.guard().get(&essay_id).map(|pair| pair.essay.clone()))
    }

    async fn list_essays(&self, filter: EssayFilter) -> Result<Vec<Essay>, StoreError> {
        let mut essays: Vec<Essay> = self
            .guard()
            .values()
            .map(|pair| pair.essay.clone())
            .filter(|essay| {
                filter.user_id.as_deref().map_or(true, |user_id| essay.user_id == user_id)
                    && filter.status.map_or(true, |status| essay.status == status)
            })
            .collect();
        essays.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(essays
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.clamp(1, 100) as usize)
            .collect())
    }

    async fn attach_task_handle(
        &self,
        witness: &EssayPair,
        task_handle: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.guard();
        let Some(pair) = inner.get_mut(&witness.essay.id) else { return Ok(false) };
        if pair.correction.version != witness.correction.version {
            return Ok(false);
        }
        pair.correction.task_handle = Some(task_handle.to_string());
        pair.correction.version += 1;
        pair.correction.updated_at = primitive_now_utc();
        Ok(true)
    }

    async fn transition_pair(
        &self,
        witness: &EssayPair,
        to: EssayStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.guard();
        let Some(pair) = inner.get_mut(&witness.essay.id) else { return Ok(false) };
        if !Self::witness_matches(pair, witness) {
            return Ok(false);
        }
        let now = primitive_now_utc();
        pair.essay.status = to;
        pair.correction.status = to.correction_counterpart();
        if let Some(message) = error_message {
            pair.essay.error_message = Some(message.to_string());
            pair.correction.error_message = Some(message.to_string());
        }
        pair.essay.version += 1;
        pair.correction.version += 1;
        pair.essay.updated_at = now;
        pair.correction.updated_at = now;
        Ok(true)
    }

    async fn complete_pair(
        &self,
        witness: &EssayPair,
        outcome: &CorrectionResultUpdate,
    ) -> Result<bool, StoreError> {
        let mut inner = self.guard();
        let Some(pair) = inner.get_mut(&witness.essay.id) else { return Ok(false) };
        if !Self::witness_matches(pair, witness) {
            return Ok(false);
        }
        let now = primitive_now_utc();

        pair.essay.status = EssayStatus::Completed;
        pair.essay.score = Some(outcome.score);
        pair.essay.corrected_content = outcome.corrected_content.clone();
        pair.essay.comments = outcome.comments.clone();
        pair.essay.error_analysis = outcome.error_analysis.clone().map(sqlx::types::Json);
        pair.essay.improvement_suggestions =
            outcome.improvement_suggestions.clone().map(sqlx::types::Json);
        pair.essay.error_message = None;
        pair.essay.version += 1;
        pair.essay.updated_at = now;

        pair.correction.status = CorrectionStatus::Completed;
        pair.correction.score = Some(outcome.score);
        pair.correction.comments = outcome.comments.clone();
        pair.correction.error_analysis = outcome.error_analysis.clone().map(sqlx::types::Json);
        pair.correction.improvement_suggestions =
            outcome.improvement_suggestions.clone().map(sqlx::types::Json);
        pair.correction.results = Some(sqlx::types::Json(outcome.results.clone()));
        pair.correction.retry_count = outcome.retry_count;
        pair.correction.error_message = None;
        pair.correction.completed_at = Some(outcome.completed_at);
        pair.correction.version += 1;
        pair.correction.updated_at = now;

        Ok(true)
    }

    async fn fail_pair(
        &self,
        witness: &EssayPair,
        error_message: &str,
        retry_count: i32,
    ) -> Result<bool, StoreError> {
        let mut inner = self.guard();
        let Some(pair) = inner.get_mut(&witness.essay.id) else { return Ok(false) };
        if !Self::witness_matches(pair, witness) {
            return Ok(false);
        }
        let now = primitive_now_utc();
        pair.essay.status = EssayStatus::Failed;
        pair.essay.error_message = Some(error_message.to_string());
        pair.essay.version += 1;
        pair.essay.updated_at = now;
        pair.correction.status = CorrectionStatus::Failed;
        pair.correction.error_message = Some(error_message.to_string());
        pair.correction.retry_count = retry_count;
        pair.correction.version += 1;
        pair.correction.updated_at = now;
        Ok(true)
    }

    async fn reset_pair(&self, witness: &EssayPair, to: EssayStatus) -> Result<bool, StoreError> {
        let mut inner = self.guard();
        let Some(pair) = inner.get_mut(&witness.essay.id) else { return Ok(false) };
        if !Self::witness_matches(pair, witness) {
            return Ok(false);
        }
        let now = primitive_now_utc();
        pair.essay.status = to;
        pair.essay.error_message = None;
        pair.essay.version += 1;
        pair.essay.updated_at = now;
        pair.correction.status = to.correction_counterpart();
        pair.correction.task_handle = None;
        pair.correction.error_message = None;
        pair.correction.version += 1;
        pair.correction.updated_at = now;
        Ok(true)
    }

    async fn list_phase_mismatched(&self, limit: i64) -> Result<Vec<EssayPair>, StoreError> {
        let mut pairs: Vec<EssayPair> = self
            .guard()
            .values()
            .filter(|pair| pair.essay.status.phase() != pair.correction.status.phase())
            .cloned()
            .collect();
        pairs.sort_by(|a, b| a.essay.updated_at.cmp(&b.essay.updated_at));
        pairs.truncate(limit.max(0) as usize);
        Ok(pairs)
    }

    async fn list_stale_correcting(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<EssayPair>, StoreError> {
        let mut pairs: Vec<EssayPair> = self
            .guard()
            .values()
            .filter(|pair| {
                pair.correction.status == CorrectionStatus::Correcting
                    && pair.correction.updated_at < cutoff
            })
            .cloned()
            .collect();
        pairs.sort_by(|a, b| a.correction.updated_at.cmp(&b.correction.updated_at));
        pairs.truncate(limit.max(0) as usize);
        Ok(pairs)
    }
}

/// Which store write a `RacingStore` should lose exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaceOn {
    Transition,
    Complete,
    Reset,
}

/// Store wrapper that lets a simulated concurrent writer win one version
/// race, then behaves like the wrapped store.
pub(crate) struct RacingStore {
    inner: Arc<MemoryStore>,
    race: RaceOn,
    armed: std::sync::atomic::AtomicBool,
}

impl RacingStore {
    pub(crate) fn new(inner: Arc<MemoryStore>, race: RaceOn) -> Self {
        Self { inner, race, armed: std::sync::atomic::AtomicBool::new(true) }
    }

    fn steal_race(&self, race: RaceOn, essay_id: i64) {
        if self.race == race && self.armed.swap(false, Ordering::SeqCst) {
            self.inner.bump_versions(essay_id);
        }
    }
}

#[async_trait]
impl CorrectionStore for RacingStore {
    async fn create_pair(&self, new_essay: NewEssay) -> Result<EssayPair, StoreError> {
        self.inner.create_pair(new_essay).await
    }

    async fn fetch_pair(&self, essay_id: i64) -> Result<Option<EssayPair>, StoreError> {
        self.inner.fetch_pair(essay_id).await
    }

    async fn fetch_essay(&self, essay_id: i64) -> Result<Option<Essay>, StoreError> {
        self.inner.fetch_essay(essay_id).await
    }

    async fn list_essays(&self, filter: EssayFilter) -> Result<Vec<Essay>, StoreError> {
        self.inner.list_essays(filter).await
    }

    async fn attach_task_handle(
        &self,
        witness: &EssayPair,
        task_handle: &str,
    ) -> Result<bool, StoreError> {
        self.inner.attach_task_handle(witness, task_handle).await
    }

    async fn transition_pair(
        &self,
        witness: &EssayPair,
        to: EssayStatus,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.steal_race(RaceOn::Transition, witness.essay.id);
        self.inner.transition_pair(witness, to, error_message).await
    }

    async fn complete_pair(
        &self,
        witness: &EssayPair,
        outcome: &CorrectionResultUpdate,
    ) -> Result<bool, StoreError> {
        self.steal_race(RaceOn::Complete, witness.essay.id);
        self.inner.complete_pair(witness, outcome).await
    }

    async fn fail_pair(
        &self,
        witness: &EssayPair,
        error_message: &str,
        retry_count: i32,
    ) -> Result<bool, StoreError> {
        self.inner.fail_pair(witness, error_message, retry_count).await
    }

    async fn reset_pair(&self, witness: &EssayPair, to: EssayStatus) -> Result<bool, StoreError> {
        self.steal_race(RaceOn::Reset, witness.essay.id);
        self.inner.reset_pair(witness, to).await
    }

    async fn list_phase_mismatched(&self, limit: i64) -> Result<Vec<EssayPair>, StoreError> {
        self.inner.list_phase_mismatched(limit).await
    }

    async fn list_stale_correcting(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<EssayPair>, StoreError> {
        self.inner.list_stale_correcting(cutoff, limit).await
    }
}

/// In-memory lock table with the same acquire/release semantics as the Redis
/// manager.
#[derive(Default)]
pub(crate) struct MemoryLockManager {
    held: Mutex<HashMap<String, String>>,
}

impl MemoryLockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pre-hold an essay's lock, as if another worker owned it.
    pub(crate) fn hold(&self, essay_id: i64) -> CorrectionLock {
        let key = format!("essay-correction:{essay_id}");
        let token = Uuid::new_v4().to_string();
        self.guard().insert(key.clone(), token.clone());
        CorrectionLock { key, token }
    }

    pub(crate) fn held_count(&self) -> usize {
        self.guard().len()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(
        &self,
        essay_id: i64,
        _ttl: Duration,
    ) -> Result<Option<CorrectionLock>, LockError> {
        let key = format!("essay-correction:{essay_id}");
        let mut held = self.guard();
        if held.contains_key(&key) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.clone(), token.clone());
        Ok(Some(CorrectionLock { key, token }))
    }

    async fn release(&self, lock: &CorrectionLock) -> Result<bool, LockError> {
        let mut held = self.guard();
        if held.get(&lock.key) == Some(&lock.token) {
            held.remove(&lock.key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Default)]
struct DispatcherInner {
    enqueued: Vec<(String, i64)>,
    statuses: HashMap<String, TaskStatus>,
    cancelled: Vec<String>,
    fail_enqueue: bool,
}

/// In-memory dispatcher double. Status answers are scripted by tests.
#[derive(Default)]
pub(crate) struct MemoryDispatcher {
    inner: Mutex<DispatcherInner>,
}

impl MemoryDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let dispatcher = Self::default();
        dispatcher.guard().fail_enqueue = true;
        dispatcher
    }

    pub(crate) fn set_status(&self, task_handle: &str, status: TaskStatus) {
        self.guard().statuses.insert(task_handle.to_string(), status);
    }

    pub(crate) fn set_fail_enqueue(&self, fail: bool) {
        self.guard().fail_enqueue = fail;
    }

    pub(crate) fn enqueued_essays(&self) -> Vec<i64> {
        self.guard().enqueued.iter().map(|(_, essay_id)| *essay_id).collect()
    }

    pub(crate) fn cancelled_handles(&self) -> Vec<String> {
        self.guard().cancelled.clone()
    }

    fn guard(&self) -> MutexGuard<'_, DispatcherInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskDispatcher for MemoryDispatcher {
    async fn enqueue(&self, essay_id: i64) -> Result<String, DispatchError> {
        let mut inner = self.guard();
        if inner.fail_enqueue {
            return Err(DispatchError::Queue(sqlx::Error::PoolClosed));
        }
        let task_handle = Uuid::new_v4().to_string();
        inner.enqueued.push((task_handle.clone(), essay_id));
        inner.statuses.insert(task_handle.clone(), TaskStatus::Pending);
        Ok(task_handle)
    }

    async fn status(&self, task_handle: &str) -> Result<TaskStatus, DispatchError> {
        Ok(self.guard().statuses.get(task_handle).copied().unwrap_or(TaskStatus::Unknown))
    }

    async fn cancel(&self, task_handle: &str) -> Result<bool, DispatchError> {
        let mut inner = self.guard();
        inner.cancelled.push(task_handle.to_string());
        match inner.statuses.get(task_handle) {
            Some(TaskStatus::Pending) => {
                inner.statuses.insert(task_handle.to_string(), TaskStatus::Cancelled);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub(crate) struct ScriptedCall {
    pub(crate) delay: Duration,
    pub(crate) response: Result<NormalizedResult, ScoringError>,
}

impl ScriptedCall {
    pub(crate) fn ok(result: NormalizedResult) -> Self {
        Self { delay: Duration::ZERO, response: Ok(result) }
    }

    pub(crate) fn err(err: ScoringError) -> Self {
        Self { delay: Duration::ZERO, response: Err(err) }
    }

    pub(crate) fn slow(delay: Duration, result: NormalizedResult) -> Self {
        Self { delay, response: Ok(result) }
    }
}

/// Scorer double that replays a script one call at a time and counts calls.
/// Calling past the end of the script is a test failure.
#[derive(Default)]
pub(crate) struct ScriptedScorer {
    script: Mutex<VecDeque<ScriptedCall>>,
    calls: AtomicUsize,
}

impl ScriptedScorer {
    pub(crate) fn new(script: Vec<ScriptedCall>) -> Self {
        Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) }
    }

    pub(crate) fn completing_with(total_score: f64) -> Self {
        Self::new(vec![ScriptedCall::ok(scored_result(total_score))])
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EssayScorer for ScriptedScorer {
    async fn score(&self, _request: &ScoreRequest) -> Result<NormalizedResult, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let call = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .expect("scorer called more times than scripted");
        if !call.delay.is_zero() {
            tokio::time::sleep(call.delay).await;
        }
        call.response
    }
}
