//! 🎬 *[a batch of 500 rows walks into a tokio task. the task does not walk out until it's committed.]*
//!
//! 🧵 The Worker Dispatcher: spawns worker units as independent tokio tasks,
//! keeps track of them, and kills them all on request.
//!
//! 🧠 Knowledge graph:
//! - `create_worker(scope, worker)` spawns, tracks, awaits, untracks, and reports.
//!   When the last worker of a scope finishes, that scope's end hook runs.
//! - Scopes are import-history ids. Two imports running side by side each keep
//!   their own end hook.
//! - `remove_workers()` is the big red button. Once it returns, no worker spawned
//!   before the call will touch history again. How: every worker captures the
//!   current cancellation token at spawn, and does its store + history writes
//!   inside a [`CommitGuard`] (a read lock on the gate). The button cancels the
//!   token, takes the write lock (so in-flight commits finish whole), then
//!   aborts everything. Workers that had not committed yet see a cancelled
//!   token and bail with [`ImportError::Cancelled`].
//!
//! ⚠️ The hooks are `Fn`, not `FnOnce`: a sequential import drains its scope after
//! every single batch, and the hook decides whether that drain was the last one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ImportError;
use crate::history::{HistoryStore, HistoryUpdate, ImportHistory};
use crate::store::EntityStore;

/// 🪝 Runs after the last tracked worker of a scope finishes.
pub type EndHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 👷 One isolated unit of work: a task payload plus the code that runs it.
#[async_trait]
pub trait Worker: Send + 'static {
    /// 🏷️ For logs.
    fn name(&self) -> &'static str;

    async fn run(self, ctx: WorkerContext) -> Result<()>;
}

/// 🎫 Proof that a worker is inside the commit gate and was not cancelled on the way in.
#[derive(Debug)]
pub struct CommitGuard {
    _read: OwnedRwLockReadGuard<()>,
}

/// 🧰 What a worker gets to work with.
#[derive(Clone)]
pub struct WorkerContext {
    store: Arc<dyn EntityStore>,
    history: Arc<dyn HistoryStore>,
    cancel: CancellationToken,
    gate: Arc<RwLock<()>>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl WorkerContext {
    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 🚪 Enter the commit gate. Fails with `Cancelled` if the workers were removed.
    pub async fn enter(&self) -> Result<CommitGuard> {
        let the_read = Arc::clone(&self.gate).read_owned().await;
        if self.cancel.is_cancelled() {
            return Err(ImportError::Cancelled.into());
        }
        Ok(CommitGuard { _read: the_read })
    }

    /// ✏️ Apply a history update. Only callable from inside the gate.
    pub async fn commit(
        &self,
        _guard: &CommitGuard,
        import_history_id: &str,
        update: HistoryUpdate,
    ) -> Result<ImportHistory> {
        self.history.update(import_history_id, update).await
    }
}

struct TrackedWorker {
    scope: String,
    abort: AbortHandle,
}

/// 🧵 Spawns, tracks, and on request cancels worker tasks.
pub struct WorkerDispatcher {
    store: Arc<dyn EntityStore>,
    history: Arc<dyn HistoryStore>,
    workers: Mutex<HashMap<u64, TrackedWorker>>,
    hooks: Mutex<HashMap<String, EndHook>>,
    cancel: Mutex<CancellationToken>,
    gate: Arc<RwLock<()>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDispatcher")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            history,
            workers: Mutex::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancellationToken::new()),
            gate: Arc::new(RwLock::new(())),
            next_id: AtomicU64::new(0),
        }
    }

    /// 🧰 A context bound to the current cancellation generation.
    pub async fn context(&self) -> WorkerContext {
        WorkerContext {
            store: Arc::clone(&self.store),
            history: Arc::clone(&self.history),
            cancel: self.cancel.lock().await.clone(),
            gate: Arc::clone(&self.gate),
        }
    }

    /// 🪝 Register (or replace) the end hook of `scope`.
    pub async fn set_handle_end<F, Fut>(&self, scope: impl Into<String>, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let the_hook: EndHook = Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(hook()) });
        self.hooks.lock().await.insert(scope.into(), the_hook);
    }

    /// 🧹 Forget the end hook of `scope`.
    pub async fn clear_handle_end(&self, scope: &str) {
        self.hooks.lock().await.remove(scope);
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// 🚀 Spawn a worker under the current context, wait for it, report how it went.
    ///
    /// Errors: [`ImportError::Worker`] when the worker failed or panicked,
    /// [`ImportError::Cancelled`] when `remove_workers` got to it first.
    pub async fn create_worker<W: Worker>(&self, scope: &str, worker: W) -> Result<()> {
        let the_ctx = self.context().await;
        self.create_worker_in(the_ctx, scope, worker).await
    }

    /// 🚀 Same as `create_worker`, but the worker runs under a context the caller
    /// captured earlier. An import pins its context at start, so a cancel that
    /// lands between two batches also stops the next batch's worker.
    pub async fn create_worker_in<W: Worker>(
        &self,
        ctx: WorkerContext,
        scope: &str,
        worker: W,
    ) -> Result<()> {
        let the_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let the_name = worker.name();

        let the_handle = tokio::spawn(worker.run(ctx));
        self.workers.lock().await.insert(
            the_id,
            TrackedWorker {
                scope: scope.to_string(),
                abort: the_handle.abort_handle(),
            },
        );
        debug!("🧵 {} worker #{} spawned for {}", the_name, the_id, scope);

        let the_joined = the_handle.await;

        let the_remaining = {
            let mut the_workers = self.workers.lock().await;
            the_workers.remove(&the_id);
            the_workers.values().filter(|w| w.scope == scope).count()
        };

        let the_outcome = match the_joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if matches!(e.downcast_ref::<ImportError>(), Some(ImportError::Cancelled)) => {
                Err(ImportError::Cancelled)
            }
            Ok(Err(e)) => {
                error!("💀 {} worker #{} failed: {:#}", the_name, the_id, e);
                Err(ImportError::worker(&e))
            }
            Err(join) if join.is_cancelled() => Err(ImportError::Cancelled),
            Err(join) => {
                error!("💀 {} worker #{} panicked: {}", the_name, the_id, join);
                Err(ImportError::Worker(format!("{the_name} worker panicked: {join}")))
            }
        };

        if let Err(ImportError::Cancelled) = the_outcome {
            info!("🛑 {} worker #{} was cancelled", the_name, the_id);
        } else if the_remaining == 0 {
            self.run_end_hook(scope).await;
        }

        the_outcome.map_err(Into::into)
    }

    async fn run_end_hook(&self, scope: &str) {
        // clone out so the hook runs without the map locked
        let the_hook = self.hooks.lock().await.get(scope).cloned();
        if let Some(hook) = the_hook {
            if let Err(e) = hook().await {
                warn!("⚠️ end hook for {} failed: {:#}", scope, e);
            }
        }
    }

    /// 🛑 Abort every tracked worker. Returns how many were tracked.
    pub async fn remove_workers(&self) -> usize {
        let the_old_token = {
            let mut the_token = self.cancel.lock().await;
            std::mem::replace(&mut *the_token, CancellationToken::new())
        };
        the_old_token.cancel();

        // ⏳ wait out anyone mid-commit, then nobody gets in with the old token
        let _the_write = self.gate.write().await;

        let the_tracked: Vec<TrackedWorker> = self
            .workers
            .lock()
            .await
            .drain()
            .map(|(_, w)| w)
            .collect();
        for worker in &the_tracked {
            worker.abort.abort();
        }
        info!("🛑 removed {} workers", the_tracked.len());
        the_tracked.len()
    }
}
