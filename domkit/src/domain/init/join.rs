//! Join-all, fail-on-first-error combinator for spawned sub-operations.

use domkit_shared::errors::{DomainError, DomainResult};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;

/// Await every task; return their outputs in input order, or the first error.
///
/// On the first failure the remaining handles are dropped: those tasks keep
/// running detached and their results are discarded. A panicked task is
/// reported as [`DomainError::Internal`].
pub(crate) async fn join_first_error<T>(tasks: Vec<JoinHandle<DomainResult<T>>>) -> DomainResult<Vec<T>>
where
    T: Send + 'static,
{
    let total = tasks.len();
    let mut pending: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(i, task)| async move { (i, task.await) })
        .collect();

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some((i, joined)) = pending.next().await {
        match joined {
            Ok(Ok(value)) => results[i] = Some(value),
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(DomainError::Internal(format!("sub-operation {} failed: {}", i, e)));
            }
        }
    }

    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty() {
        let out: Vec<u32> = join_first_error(Vec::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let tasks = vec![
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(0)
            }),
            tokio::spawn(async { Ok(1) }),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(2)
            }),
        ];
        assert_eq!(join_first_error(tasks).await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_first_error_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let tasks = vec![
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
            tokio::spawn(async { Err(DomainError::Resource("boom".into())) }),
        ];

        let err = join_first_error(tasks).await.unwrap_err();
        assert!(matches!(err, DomainError::Resource(_)));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_internal_error() {
        let tasks: Vec<JoinHandle<DomainResult<()>>> = vec![tokio::spawn(async {
            panic!("handler bug");
        })];
        let err = join_first_error(tasks).await.unwrap_err();
        assert!(matches!(err, DomainError::Internal(_)));
    }
}
