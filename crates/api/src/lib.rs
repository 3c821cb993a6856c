//! Filmlist access coordinator (in-process).
//!
//! [`Coordinator`] owns the one dataset handle and mediates every access to it: blocking
//! store calls run on a single worker thread, the handle and the query cache sit behind one
//! async lock, and loading/refreshing are single-flight. The serving layer holds an
//! `Arc<Coordinator<_>>` and calls [`Coordinator::query`], [`Coordinator::status`] and
//! [`Coordinator::trigger_refresh`].

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use filmlist_core::{
    BusyReason, DataStore, FilmlistError, FilmlistResult, QueryOutcome, QueryParams, QueryRequest,
    RefreshOutcome, RunOutcome, Status,
};
use filmlist_store::{FilterKey, Flag, Lifecycle, QueryCache, QueryKey, Worker, WorkerError};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod config;

pub use config::CoordinatorConfig;
pub use filmlist_core::prelude;

/// The handle plus every answer computed against it. Only touched under the access lock.
struct Dataset<H> {
    handle: Option<Arc<H>>,
    cache: QueryCache,
}

impl<H> Dataset<H> {
    fn install(&mut self, handle: H) {
        self.handle = Some(Arc::new(handle));
        self.cache.invalidate();
    }
}

/// Counters exposed for status pages and tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub status: Status,
    pub lock_attempts: u64,
    pub cached_pages: usize,
    pub cached_filters: usize,
    pub invalidations: u64,
    pub loaded: bool,
}

pub struct Coordinator<S: DataStore> {
    store: Arc<S>,
    config: CoordinatorConfig,
    lifecycle: Lifecycle,
    dataset: Mutex<Dataset<S::Handle>>,
    worker: Worker,
    lock_attempts: AtomicU64,
}

impl<S: DataStore> Coordinator<S> {
    pub fn new(store: Arc<S>, config: CoordinatorConfig) -> FilmlistResult<Self> {
        let worker = Worker::spawn("filmlist-store", config.worker_queue_capacity)
            .map_err(|e| FilmlistError::Internal(e.to_string()))?;
        let cache = QueryCache::new(config.filter_cache_capacity, config.page_cache_capacity);
        Ok(Self {
            store,
            config,
            lifecycle: Lifecycle::new(),
            dataset: Mutex::new(Dataset { handle: None, cache }),
            worker,
            lock_attempts: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig { &self.config }

    /// Non-blocking lifecycle probe.
    pub fn status(&self) -> Status { self.lifecycle.status() }

    /// How many times anything tried to take the access lock.
    pub fn lock_attempts(&self) -> u64 { self.lock_attempts.load(Ordering::Relaxed) }

    async fn lock(&self) -> MutexGuard<'_, Dataset<S::Handle>> {
        self.lock_attempts.fetch_add(1, Ordering::Relaxed);
        self.dataset.lock().await
    }

    async fn lock_within(&self, wait: Duration) -> Option<MutexGuard<'_, Dataset<S::Handle>>> {
        self.lock_attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::timeout(wait, self.dataset.lock()).await.ok()
    }

    /// Run a blocking store call on the worker. Store errors and panics become
    /// `StoreFailure`; a dead worker is `Internal`.
    async fn run_blocking<T, F>(&self, op: &'static str, f: F) -> FilmlistResult<T>
    where
        F: FnOnce(&S) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match self.worker.submit(move || f(&store)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                counter!("coordinator_store_failures_total", 1u64, "op" => op);
                warn!(op, error = %format!("{e:#}"), "coordinator: store call failed");
                Err(FilmlistError::StoreFailure(format!("{op}: {e:#}")))
            }
            Err(WorkerError::Panicked) => {
                counter!("coordinator_store_failures_total", 1u64, "op" => op);
                warn!(op, "coordinator: store call panicked");
                Err(FilmlistError::StoreFailure(format!("{op}: store panicked")))
            }
            Err(e) => Err(FilmlistError::Internal(e.to_string())),
        }
    }

    /// Build the dataset and install it, dropping every cached answer. On failure the
    /// previous handle stays installed.
    async fn run_load(&self) -> FilmlistResult<RunOutcome> {
        let Some(_loading) = self.lifecycle.guard(Flag::Loading) else {
            debug!("coordinator: load already in progress");
            return Ok(RunOutcome::AlreadyRunning);
        };
        let t0 = Instant::now();
        info!("coordinator: load start");
        let mut dataset = self.lock().await;
        let handle = self.run_blocking("build", |store| store.build()).await?;
        dataset.install(handle);
        histogram!("coordinator_build_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(took_ms = %t0.elapsed().as_millis(), "coordinator: load ok");
        Ok(RunOutcome::Completed)
    }

    /// Let the store refresh a stale dataset. The cache is kept only when the store reports
    /// that nothing changed.
    async fn run_refresh(&self) -> FilmlistResult<RunOutcome> {
        let Some(_refreshing) = self.lifecycle.guard(Flag::Refreshing) else {
            debug!("coordinator: refresh already in progress");
            return Ok(RunOutcome::AlreadyRunning);
        };
        let t0 = Instant::now();
        info!(max_age_hours = self.config.refresh_max_age_hours, "coordinator: refresh start");
        let mut dataset = self.lock().await;
        let Some(handle) = dataset.handle.clone() else {
            info!("coordinator: refresh skipped; no dataset loaded");
            return Ok(RunOutcome::Skipped);
        };
        let max_age = self.config.refresh_max_age_hours;
        let outcome = match self.run_blocking("refresh", move |store| store.refresh_if_stale(&handle, max_age)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The store may have touched the handle before failing.
                dataset.cache.invalidate();
                return Err(e);
            }
        };
        let changed = outcome.changed();
        match outcome {
            RefreshOutcome::Unchanged => {}
            RefreshOutcome::Updated => dataset.cache.invalidate(),
            RefreshOutcome::Replaced(fresh) => dataset.install(fresh),
        }
        histogram!("coordinator_refresh_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(changed, took_ms = %t0.elapsed().as_millis(), "coordinator: refresh ok");
        Ok(RunOutcome::Completed)
    }

    /// Validate and run a query from the serving layer's request body.
    pub async fn query(&self, params: QueryParams) -> FilmlistResult<QueryOutcome> {
        let request = QueryRequest::try_from(params)?;
        self.query_request(request).await
    }

    /// Answer from the cache, or filter, sort and paginate on the worker.
    ///
    /// Never waits for maintenance: while loading or refreshing, or when the access lock is
    /// not free within the configured timeout, the answer is `Busy`.
    pub async fn query_request(&self, request: QueryRequest) -> FilmlistResult<QueryOutcome> {
        let t0 = Instant::now();
        counter!("coordinator_query_total", 1u64);
        match self.status() {
            Status::Loading => return Ok(busy(BusyReason::Loading)),
            Status::Refreshing => return Ok(busy(BusyReason::Refreshing)),
            Status::Ready => {}
        }
        let Some(mut dataset) = self.lock_within(self.config.lock_timeout).await else {
            return Ok(busy(BusyReason::Contended));
        };

        let key = QueryKey::from(&request);
        if let Some(page) = dataset.cache.page(&key) {
            debug!(page = page.page, "coordinator: page cache hit");
            return Ok(QueryOutcome::Page(page));
        }
        let handle = dataset
            .handle
            .clone()
            .ok_or_else(|| FilmlistError::StoreFailure("no dataset loaded".to_string()))?;
        let filter_key = FilterKey::new(&request, self.config.filter_cap);
        let cached_rows = dataset.cache.filtered(&filter_key);
        let filter_hit = cached_rows.is_some();
        let cap = self.config.filter_cap;
        let (rows, page) = self
            .run_blocking("filter", move |store| {
                let rows = match cached_rows {
                    Some(rows) => rows,
                    None => Arc::new(store.filter(&handle, request.rules(), cap)?),
                };
                let page = Arc::new(request.view(&rows));
                Ok((rows, page))
            })
            .await?;
        dataset.cache.store(filter_key, rows, key, Arc::clone(&page));
        histogram!("coordinator_query_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(
            filter_hit,
            item_count = page.item_count,
            page = page.page,
            took_ms = %t0.elapsed().as_millis(),
            "coordinator: query computed"
        );
        Ok(QueryOutcome::Page(page))
    }

    /// Snapshot of counters and cache sizes. Waits for the access lock.
    pub async fn stats(&self) -> Stats {
        let dataset = self.dataset.lock().await;
        Stats {
            status: self.status(),
            lock_attempts: self.lock_attempts(),
            cached_pages: dataset.cache.pages_len(),
            cached_filters: dataset.cache.filtered_len(),
            invalidations: dataset.cache.invalidations(),
            loaded: dataset.handle.is_some(),
        }
    }

    /// Drain the worker and join its thread. Queries issued afterwards fail with `Internal`.
    pub async fn shutdown(&self) {
        info!("coordinator: shutting down worker");
        self.worker.shutdown().await;
    }
}

impl<S: DataStore> Coordinator<S> {
    /// Single-flight load. While a load runs, further calls return `AlreadyRunning` at once.
    ///
    /// The load runs on its own task and holds the access lock until the store answers, so
    /// dropping the returned future never leaves a half-applied handle change behind.
    pub async fn ensure_loaded(self: &Arc<Self>) -> FilmlistResult<RunOutcome> {
        let me = Arc::clone(self);
        join_maintenance(tokio::spawn(async move { me.run_load().await })).await
    }

    /// Single-flight refresh; `Skipped` when nothing is loaded. Detached from the caller
    /// like [`ensure_loaded`](Self::ensure_loaded).
    pub async fn request_refresh(self: &Arc<Self>) -> FilmlistResult<RunOutcome> {
        let me = Arc::clone(self);
        join_maintenance(tokio::spawn(async move { me.run_refresh().await })).await
    }

    /// Load, then refresh, in the background. Failures are logged.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = me.ensure_loaded().await {
                warn!(error = %e, "coordinator: startup load failed");
            }
            if let Err(e) = me.request_refresh().await {
                warn!(error = %e, "coordinator: startup refresh failed");
            }
        })
    }

    /// Start a refresh in the background and return without waiting for it. Aborting the
    /// returned handle stops the waiting, not the refresh.
    pub fn trigger_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            match me.request_refresh().await {
                Ok(outcome) => debug!(?outcome, "coordinator: triggered refresh done"),
                Err(e) => warn!(error = %e, "coordinator: triggered refresh failed"),
            }
        })
    }
}

async fn join_maintenance(task: JoinHandle<FilmlistResult<RunOutcome>>) -> FilmlistResult<RunOutcome> {
    task.await.map_err(|e| FilmlistError::Internal(format!("maintenance task failed: {e}")))?
}

fn busy(reason: BusyReason) -> QueryOutcome {
    counter!("coordinator_busy_total", 1u64, "reason" => reason.as_str());
    debug!(reason = %reason, "coordinator: busy");
    QueryOutcome::busy(reason)
}
