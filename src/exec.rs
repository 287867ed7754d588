//! Sequential and parallel row processing.

use std::ops::Range;

use rayon::prelude::*;

use crate::error::Result;
use crate::histogram::Histogram;

/// Default number of rows handed to a worker at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// Runs a row-filling function over `0..n_rows`, either inline or on a fixed thread pool.
pub enum Executor {
    Sequential,
    Parallel {
        pool: rayon::ThreadPool,
        chunk_size: usize,
    },
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Sequential => write!(f, "Sequential"),
            Executor::Parallel { pool, chunk_size } => f
                .debug_struct("Parallel")
                .field("threads", &pool.current_num_threads())
                .field("chunk_size", chunk_size)
                .finish(),
        }
    }
}

impl Executor {
    pub fn sequential() -> Self {
        Executor::Sequential
    }

    /// A pool of `threads` workers; `chunk_size` rows per task.
    pub fn parallel(threads: usize, chunk_size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("reweight-{i}"))
            .build()?;
        Ok(Executor::Parallel {
            pool,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn threads(&self) -> usize {
        match self {
            Executor::Sequential => 1,
            Executor::Parallel { pool, .. } => pool.current_num_threads(),
        }
    }

    /// Fill a histogram shaped like `template` from every row.
    ///
    /// In parallel mode every chunk fills its own histogram and the partials are merged in
    /// chunk order once all workers have finished, so the result for a given chunk size does
    /// not depend on scheduling.
    pub fn fill<F>(&self, n_rows: usize, template: &Histogram, fill: F) -> Result<Histogram>
    where
        F: Fn(Range<usize>, &mut Histogram) + Sync,
    {
        match self {
            Executor::Sequential => {
                let mut hist = template.empty_like();
                fill(0..n_rows, &mut hist);
                Ok(hist)
            }
            Executor::Parallel { pool, chunk_size } => {
                let chunk = *chunk_size;
                let n_chunks = n_rows.div_ceil(chunk);
                let partials: Vec<Histogram> = pool.install(|| {
                    (0..n_chunks)
                        .into_par_iter()
                        .map(|c| {
                            let start = c * chunk;
                            let end = (start + chunk).min(n_rows);
                            let mut partial = template.empty_like();
                            fill(start..end, &mut partial);
                            partial
                        })
                        .collect()
                });
                let mut total = template.empty_like();
                for partial in &partials {
                    total.merge(partial)?;
                }
                Ok(total)
            }
        }
    }
}
