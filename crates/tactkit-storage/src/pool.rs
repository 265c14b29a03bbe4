//! Bounded async worker pool

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Run `job` over every item with at most `workers` in flight
///
/// Workers pull from a shared queue until it is empty. Results come back
/// in input order. An item whose worker panicked yields `None`.
pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, workers: usize, job: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let count = items.len();
    let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
        Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
    let job = Arc::new(job);

    let handles: Vec<_> = (0..workers.clamp(1, count.max(1)))
        .map(|_| {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);
            tokio::spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().pop_front();
                    let Some((index, item)) = next else { break };
                    done.push((index, job(item).await));
                }
                done
            })
        })
        .collect();

    let mut results: Vec<Option<R>> = (0..count).map(|_| None).collect();
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(done) => {
                for (index, result) in done {
                    results[index] = Some(result);
                }
            }
            Err(e) => warn!(error = %e, "download worker failed"),
        }
    }
    results
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = run_pool(items, 4, |n| async move {
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            n * 2
        })
        .await;

        let results: Vec<u64> = results.into_iter().map(Option::unwrap).collect();
        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        run_pool((0..16).collect::<Vec<u32>>(), 3, move |_| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = run_pool(Vec::<u8>::new(), 8, |n| async move { n }).await;
        assert!(results.is_empty());
    }
}
