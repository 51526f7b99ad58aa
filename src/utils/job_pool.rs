use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use futures::future::join_all;

/// Runs `jobs` with at most `max_concurrent` of them in flight at once.
///
/// `min(max_concurrent, jobs.len())` workers are started inside the calling
/// task. Each worker claims the next unclaimed job from a shared backlog until
/// the backlog is empty, so jobs start in submission order. Outputs are returned
/// in submission order, whatever order the jobs finish in.
///
/// A job's output is its settlement: fallible jobs return a `Result` and the
/// pool never short-circuits on an `Err`, every job runs to completion.
pub async fn run<F, Fut>(jobs: Vec<F>, max_concurrent: NonZeroUsize) -> Vec<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }

    let backlog = Mutex::new(jobs.into_iter().enumerate().collect::<VecDeque<_>>());
    let workers = max_concurrent.get().min(total);

    let settled = join_all((0..workers).map(|_| {
        let backlog = &backlog;
        async move {
            let mut outputs = Vec::new();
            loop {
                // the guard must not live across the job's await
                let next = backlog
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some((index, job)) = next else {
                    break;
                };
                outputs.push((index, job().await));
            }
            outputs
        }
    }))
    .await;

    let mut outputs = settled.into_iter().flatten().collect::<Vec<_>>();
    outputs.sort_by_key(|(index, _)| *index);
    outputs.into_iter().map(|(_, output)| output).collect()
}
