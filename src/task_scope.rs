//! Structured-concurrency helper used by the retrier, the cache actor, and the
//! supervisor to spawn a group of tasks that share a lifetime and a failure domain.
//!
//! The teacher's own `cf_utilities::task_scope` module is used pervasively in
//! `engine/src/retrier.rs`, `engine/src/caching_request.rs`, and the witnessing code
//! under `api/bin/chainflip-ingress-egress-tracker`, but its source was not present in
//! the retrieval pack (only `utilities/Cargo.toml` and call sites were). This module is
//! a from-scratch reimplementation of the observed API surface (`task_scope`, a
//! `Scope` with `spawn`/`spawn_weak`), not a copy of the original.
//!
//! Semantics: `task_scope(f)` runs `f(&scope)` to completion, then waits for every task
//! spawned on the scope to finish. If any spawned task (or the body itself) returns an
//! error or panics, the remaining tasks are aborted and the first error is returned.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;

pub struct Scope {
    tasks: tokio::sync::Mutex<JoinSet<Result<()>>>,
}

impl Scope {
    fn new() -> Arc<Self> {
        Arc::new(Self { tasks: tokio::sync::Mutex::new(JoinSet::new()) })
    }

    /// Spawns a task tied to this scope. The future must be `'static` + `Send`: the
    /// scope does not attempt unsafe lifetime extension, so callers `Arc`/`clone` any
    /// borrowed state they need inside the spawned future, matching how the teacher's
    /// call sites already pass owned handles into `scope.spawn`.
    pub async fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.lock().await.spawn(fut);
    }

    /// Fire-and-forget variant: errors are logged but do not abort the scope. Mirrors
    /// the `spawn_weak` naming seen at retrier.rs call sites for best-effort helpers
    /// (e.g. metrics emission) that should never take down the submission pool.
    pub async fn spawn_weak<F>(&self, fut: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.lock().await.spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!(error = %e, "task spawned via spawn_weak failed");
            }
            Ok(())
        });
    }
}

/// Runs `f` with a fresh `Scope`, then drains every task spawned on it. Returns the
/// first error encountered, whether from `f` itself or from a spawned task; remaining
/// tasks are aborted once an error is observed.
pub async fn task_scope<T, F, Fut>(f: F) -> Result<T>
where
    F: FnOnce(Arc<Scope>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let scope = Scope::new();
    let body_result = f(scope.clone()).await;

    let mut tasks = scope.tasks.lock().await;
    let mut first_err = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
                tasks.abort_all();
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!("scoped task panicked: {join_err}"));
                }
                tasks.abort_all();
            }
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }
    body_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_spawned_tasks_to_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = task_scope(|scope| {
            let counter = counter.clone();
            async move {
                for _ in 0..5 {
                    let counter = counter.clone();
                    scope
                        .spawn(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await;
                }
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn propagates_first_error() {
        let result: Result<()> = task_scope(|scope| async move {
            scope
                .spawn(async move { Err(anyhow::anyhow!("boom")) })
                .await;
            Ok(())
        })
        .await;

        assert!(result.is_err());
    }
}
