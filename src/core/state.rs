use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::dispatch::PgJobQueue;
use crate::services::correction::CorrectionEngine;
use crate::services::locks::RedisLockManager;
use crate::services::reconcile::ReconciliationService;
use crate::services::scoring::ScoringClient;
use crate::store::{CorrectionStore, PgStore};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    store: Arc<dyn CorrectionStore>,
    queue: Arc<PgJobQueue>,
    engine: CorrectionEngine,
    reconciler: ReconciliationService,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        scorer: ScoringClient,
    ) -> Self {
        let store: Arc<dyn CorrectionStore> = Arc::new(PgStore::new(db.clone()));
        let locks = Arc::new(RedisLockManager::new(redis.clone()));
        let queue = Arc::new(PgJobQueue::new(db.clone(), settings.queue().job_max_attempts));

        let engine = CorrectionEngine::new(
            store.clone(),
            locks,
            queue.clone(),
            Arc::new(scorer),
            settings.engine().clone(),
            settings.scoring().request_timeout(),
        );
        let reconciler = ReconciliationService::new(
            store.clone(),
            queue.clone(),
            settings.reconcile().stale_after(),
        );

        Self {
            inner: Arc::new(InnerState { settings, db, redis, store, queue, engine, reconciler }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn store(&self) -> &Arc<dyn CorrectionStore> {
        &self.inner.store
    }

    pub(crate) fn queue(&self) -> &Arc<PgJobQueue> {
        &self.inner.queue
    }

    pub(crate) fn engine(&self) -> &CorrectionEngine {
        &self.inner.engine
    }

    pub(crate) fn reconciler(&self) -> &ReconciliationService {
        &self.inner.reconciler
    }
}
