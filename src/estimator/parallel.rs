//! Multi-chain dispatch.
//!
//! Runs independent chains on scoped threads, at most `max_threads` at a
//! time (0 = one per available core). Results are collected over a channel
//! in completion order and then sorted by chain id, so the caller sees a
//! deterministic ordering regardless of scheduling.

use crossbeam_channel::bounded;

/// Run `job(chain_id)` for every chain id and return the results ordered by
/// chain id.
pub(crate) fn run_chains<T, F>(n_chains: usize, max_threads: usize, job: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let threads = if max_threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        max_threads
    }
    .max(1);

    let ids: Vec<usize> = (0..n_chains).collect();
    let (tx, rx) = bounded::<(usize, T)>(n_chains.max(1));
    let mut collected: Vec<(usize, T)> = Vec::with_capacity(n_chains);

    std::thread::scope(|s| {
        for wave in ids.chunks(threads) {
            let mut handles = Vec::with_capacity(wave.len());
            for &id in wave {
                let tx = tx.clone();
                let job = &job;
                handles.push(s.spawn(move || {
                    let result = job(id);
                    let _ = tx.send((id, result));
                }));
            }
            for h in handles {
                let _ = h.join();
            }
            while let Ok(item) = rx.try_recv() {
                collected.push(item);
            }
        }
    });

    collected.sort_by_key(|(id, _)| *id);
    collected.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_ordered_by_chain_id() {
        let out = run_chains(16, 4, |id| id * id);
        let expected: Vec<usize> = (0..16).map(|id| id * id).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_single_thread_cap() {
        let out = run_chains(5, 1, |id| id);
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_chains() {
        let out: Vec<usize> = run_chains(0, 0, |id| id);
        assert!(out.is_empty());
    }
}
