use std::future::Future;

use futures::StreamExt as _;
use tracing::debug;

/// Runs `tasks` with at most `limit` in flight and returns their outputs in
/// task order.
///
/// Every task owns its output slot, so no locking is involved. A failing task
/// does not cancel the others: all tasks run to completion, the error of the
/// first task to fail is returned and everything else is discarded.
pub async fn run_bounded<T, E, Fut>(
    tasks: impl IntoIterator<Item = Fut>,
    limit: usize,
) -> Result<Vec<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let tasks: Vec<Fut> = tasks.into_iter().collect();
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(tasks.len()).collect();

    let mut completions = futures::stream::iter(
        tasks
            .into_iter()
            .enumerate()
            .map(|(slot, task)| async move { (slot, task.await) }),
    )
    .buffer_unordered(limit.max(1));

    let mut first_error = None;
    let mut discarded = 0usize;
    while let Some((slot, result)) = completions.next().await {
        match result {
            Ok(value) => slots[slot] = Some(value),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => discarded += 1,
        }
    }

    if let Some(e) = first_error {
        if discarded > 0 {
            debug!(discarded, "further task errors were discarded");
        }
        return Err(e);
    }
    // Every slot is filled once no task failed.
    Ok(slots.into_iter().flatten().collect())
}
