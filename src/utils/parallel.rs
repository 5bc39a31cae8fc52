use log::{debug, error};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Invalid thread count: {0}")]
    InvalidThreadCount(usize),
}

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of threads to use
    pub threads: usize,

    /// Whether to keep starting items after one failed
    pub continue_on_error: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            continue_on_error: false,
        }
    }
}

/// Execute a function over a batch of items on a dedicated thread pool
pub struct ParallelExecutor {
    /// Thread pool
    pool: rayon::ThreadPool,

    /// Configuration
    config: ParallelConfig,
}

impl ParallelExecutor {
    /// Create a new parallel executor
    pub fn new(config: Option<ParallelConfig>) -> Result<Self, ParallelError> {
        let config = config.unwrap_or_default();
        if config.threads == 0 {
            return Err(ParallelError::InvalidThreadCount(0));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| {
                ParallelError::ThreadError(format!("Failed to build thread pool: {}", e))
            })?;

        Ok(ParallelExecutor { pool, config })
    }

    /// Run `processor` on every item, returning results in item order.
    ///
    /// Unless `continue_on_error` is set, items that have not started when the
    /// first failure is observed are not run at all and come back as `None`.
    pub fn execute<T, U, F, E>(&self, items: &[T], processor: F) -> Vec<Option<Result<U, E>>>
    where
        T: Sync,
        U: Send,
        E: Send + std::fmt::Display,
        F: Fn(&T) -> Result<U, E> + Send + Sync,
    {
        let failed = AtomicBool::new(false);
        debug!(
            "Executing {} items on {} threads",
            items.len(),
            self.config.threads
        );
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    if !self.config.continue_on_error && failed.load(Ordering::SeqCst) {
                        return None;
                    }
                    let result = processor(item);
                    if let Err(e) = &result {
                        error!("Processing error: {}", e);
                        failed.store(true, Ordering::SeqCst);
                    }
                    Some(result)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_results_keep_item_order() {
        let executor = ParallelExecutor::new(Some(ParallelConfig {
            threads: 4,
            continue_on_error: false,
        }))
        .unwrap();
        let items: Vec<usize> = (0..32).collect();
        let results = executor.execute(&items, |&i| Ok::<usize, String>(i * 2));
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        assert_eq!(values, (0..32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_stops_new_items_on_single_thread() {
        let executor = ParallelExecutor::new(Some(ParallelConfig {
            threads: 1,
            continue_on_error: false,
        }))
        .unwrap();
        let started = AtomicUsize::new(0);
        let items: Vec<usize> = (0..10).collect();
        let results = executor.execute(&items, |&i| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err("boom".to_string())
            } else {
                Ok(i)
            }
        });
        assert!(matches!(results[0], Some(Err(_))));
        assert!(started.load(Ordering::SeqCst) < items.len());
        assert!(results.iter().skip(1).any(Option::is_none));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = ParallelExecutor::new(Some(ParallelConfig {
            threads: 0,
            continue_on_error: false,
        }));
        assert!(matches!(result, Err(ParallelError::InvalidThreadCount(0))));
    }
}
