//! Chunk batcher for batched backend submissions.
//!
//! Items are split into chunks of at most `per_request_limit` elements, and
//! consecutive chunks are grouped into waves of at most `max_concurrent_requests`
//! chunks. Chunks within a wave run concurrently; waves run one after another, which
//! bounds the number of backend calls in flight.

use futures::future::try_join_all;
use std::future::Future;

use crate::error::{ConsumerError, ConsumerResult};

/// Chunks submitted concurrently
pub type Wave<T> = Vec<Vec<T>>;

/// Build the ordered wave/chunk partition of `items`.
///
/// Order-preserving and deterministic. Empty input yields zero waves.
pub fn plan<T: Clone>(
    items: &[T],
    per_request_limit: usize,
    max_concurrent_requests: usize,
) -> ConsumerResult<Vec<Wave<T>>> {
    if per_request_limit == 0 {
        return Err(ConsumerError::invalid_argument(
            "per-request limit must be greater than zero",
        ));
    }
    if max_concurrent_requests == 0 {
        return Err(ConsumerError::invalid_argument(
            "max concurrent requests must be greater than zero",
        ));
    }

    let chunks: Vec<Vec<T>> = items
        .chunks(per_request_limit)
        .map(|chunk| chunk.to_vec())
        .collect();

    let mut waves = Vec::with_capacity(chunks.len().div_ceil(max_concurrent_requests));
    let mut chunks = chunks.into_iter().peekable();
    while chunks.peek().is_some() {
        waves.push(chunks.by_ref().take(max_concurrent_requests).collect());
    }

    Ok(waves)
}

/// Run `op` for every chunk, one wave at a time.
///
/// The first failing chunk fails the call. Chunks of earlier waves stay submitted;
/// there is no rollback.
pub async fn execute_waves<T, F, Fut>(waves: Vec<Wave<T>>, mut op: F) -> ConsumerResult<()>
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = ConsumerResult<()>>,
{
    for wave in waves {
        try_join_all(wave.into_iter().map(&mut op)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn flatten(waves: &[Wave<u32>]) -> Vec<u32> {
        waves.iter().flatten().flatten().copied().collect()
    }

    #[test]
    fn chunks_and_waves_follow_limits() {
        let items: Vec<u32> = (0..23).collect();
        let waves = plan(&items, 10, 5).unwrap();
        assert_eq!(waves.len(), 1);
        let sizes: Vec<usize> = waves[0].iter().map(Vec::len).collect();
        assert_eq!(sizes, [10, 10, 3]);
        assert_eq!(flatten(&waves), items);
    }

    #[test]
    fn partition_properties_hold_across_sizes() {
        for m in 0..60u32 {
            for k in 1..12usize {
                for c in 1..6usize {
                    let items: Vec<u32> = (0..m).collect();
                    let waves = plan(&items, k, c).unwrap();
                    let chunks: Vec<&Vec<u32>> = waves.iter().flatten().collect();

                    assert_eq!(chunks.len(), (m as usize).div_ceil(k));
                    if let Some((last, rest)) = chunks.split_last() {
                        assert!(rest.iter().all(|chunk| chunk.len() == k));
                        assert!(!last.is_empty() && last.len() <= k);
                    }
                    assert!(waves.iter().all(|wave| !wave.is_empty() && wave.len() <= c));
                    assert_eq!(flatten(&waves), items);
                }
            }
        }
    }

    #[test]
    fn many_chunks_span_multiple_waves() {
        let items: Vec<u32> = (0..120).collect();
        let waves = plan(&items, 10, 5).unwrap();
        let wave_sizes: Vec<usize> = waves.iter().map(Vec::len).collect();
        assert_eq!(wave_sizes, [5, 5, 2]);
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let waves = plan::<u32>(&[], 10, 5).unwrap();
        assert!(waves.is_empty());
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(matches!(
            plan(&[1u32], 0, 5),
            Err(ConsumerError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan(&[1u32], 10, 0),
            Err(ConsumerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn execute_waves_submits_every_chunk_in_order() {
        let items: Vec<u32> = (0..25).collect();
        let waves = plan(&items, 4, 2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        execute_waves(waves, |chunk| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(chunk);
                Ok(())
            }
        })
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 7);
        let all: Vec<u32> = seen.iter().flatten().copied().collect();
        assert_eq!(all, items);
    }

    #[tokio::test]
    async fn execute_waves_stops_after_failing_wave() {
        let items: Vec<u32> = (0..30).collect();
        let waves = plan(&items, 10, 1).unwrap();
        let calls = Arc::new(Mutex::new(0usize));

        let result = execute_waves(waves, |chunk| {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                if chunk[0] == 10 {
                    Err(ConsumerError::backend("acknowledge", anyhow::anyhow!("throttled")))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
