use std::future::Future;

use futures::{Stream, StreamExt, TryStreamExt};

/// Splits `items` into chunks of `chunk_size` and maps them with at most `concurrency` chunks
/// in flight.
///
/// The output preserves the order of the input. The first error aborts the whole operation.
pub async fn split_parallel_work<T, U, E, F, Fut>(
    items: Vec<T>,
    chunk_size: usize,
    concurrency: usize,
    f: F,
) -> Result<Vec<U>, E>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<U>, E>>,
{
    let chunk_size = chunk_size.max(1);

    if items.len() <= chunk_size {
        return f(items).await;
    }

    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        chunks.push(items.by_ref().take(chunk_size).collect::<Vec<_>>());
    }

    let results = futures::stream::iter(chunks)
        .map(f)
        .buffered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    Ok(results.into_iter().flatten().collect())
}

/// Maps the items of a fallible stream with at most `concurrency` futures in flight,
/// preserving order.
pub fn concurrent_map<S, T, U, E, F, Fut>(
    stream: S,
    concurrency: usize,
    f: F,
) -> impl Stream<Item = Result<U, E>>
where
    S: Stream<Item = Result<T, E>>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
{
    stream.map_ok(f).try_buffered(concurrency.max(1))
}
