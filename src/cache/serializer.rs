//! Single-lane mutation queue
//!
//! Read-modify-write sequences against the directory and ledger must not
//! interleave, or two writers would race on the same revision and one would
//! be rejected by the store. Each cache instance owns one queue; a background
//! worker drains it one unit at a time, in submission order.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{CacheError, Result};

type Unit = BoxFuture<'static, ()>;

/// Per-instance FIFO executor for mutating operations
pub struct MutationSerializer {
    sender: mpsc::UnboundedSender<Unit>,
}

impl MutationSerializer {
    /// Start the worker on the current Tokio runtime
    pub fn start() -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CacheError::InvalidArgument("cache must be created inside a Tokio runtime".to_string())
        })?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<Unit>();
        runtime.spawn(async move {
            debug!("Mutation worker started");
            let mut completed = 0u64;
            while let Some(unit) = receiver.recv().await {
                unit.await;
                completed += 1;
            }
            debug!(completed, "Mutation worker finished");
        });

        Ok(Self { sender })
    }

    /// Enqueue a unit of work
    ///
    /// The unit is queued immediately, before the returned future is polled,
    /// so the order of `submit` calls is the order of execution. A unit's
    /// failure (or panic) is reported only to its own caller; later units run
    /// regardless.
    pub fn submit<T, F>(
        &self,
        op: &'static str,
        unit: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();

        let job = async move {
            let result = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!(op = op, "Queued operation panicked");
                    Err(CacheError::Inconsistent(format!("{} panicked mid-operation", op)))
                }
            };
            if let Err(e) = &result {
                debug!(op = op, error = %e, "Queued operation failed");
            }
            // The caller may have stopped waiting; the unit still ran to completion
            let _ = reply.send(result);
        }
        .boxed();

        let queued = self.sender.send(job).is_ok();

        async move {
            if !queued {
                return Err(CacheError::SerializerClosed);
            }
            outcome
                .await
                .unwrap_or_else(|_| Err(CacheError::SerializerClosed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    fn recorder() -> Arc<Mutex<Vec<u32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_units_run_in_submission_order() {
        let serializer = MutationSerializer::start().unwrap();
        let log = recorder();

        let mut pending = Vec::new();
        for (i, delay) in [(1u32, 30u64), (2, 10), (3, 0)] {
            let log = Arc::clone(&log);
            pending.push(serializer.submit("test", async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().push(i);
                Ok(i)
            }));
        }

        // Await in reverse; execution order is fixed at submission
        let mut results = Vec::new();
        while let Some(fut) = pending.pop() {
            results.push(fut.await.unwrap());
        }

        assert_eq!(results, vec![3, 2, 1]);
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let serializer = MutationSerializer::start().unwrap();

        let failing = serializer.submit("fail", async {
            Err::<(), _>(CacheError::Conflict("stale".to_string()))
        });
        let following = serializer.submit("ok", async { Ok(7) });

        assert!(failing.await.unwrap_err().is_conflict());
        assert_eq!(following.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let serializer = MutationSerializer::start().unwrap();

        let panicking = serializer.submit("panic", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let following = serializer.submit("ok", async { Ok("still running") });

        assert!(matches!(
            panicking.await.unwrap_err(),
            CacheError::Inconsistent(_)
        ));
        assert_eq!(following.await.unwrap(), "still running");
    }

    #[tokio::test]
    async fn test_unit_completes_when_caller_stops_waiting() {
        let serializer = MutationSerializer::start().unwrap();
        let log = recorder();

        let dropped = {
            let log = Arc::clone(&log);
            serializer.submit("dropped", async move {
                log.lock().push(1);
                Ok(())
            })
        };
        drop(dropped);

        serializer.submit("barrier", async { Ok(()) }).await.unwrap();
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(MutationSerializer::start().is_err());
    }
}
