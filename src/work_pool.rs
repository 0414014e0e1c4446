// Fixed-size worker pool. Per-worker scratch state (the alignment engines)
// travels through `map_init`, so workers never look themselves up by thread
// identity; results come back in item order regardless of completion order.

use std::io;

use rayon::prelude::*;

pub struct WorkPool {
    pool: rayon::ThreadPool,
}

impl WorkPool {
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(WorkPool { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Parallel mutation of every item.
    pub fn for_each<T, F>(&self, items: &mut [T], work: F)
    where
        T: Send,
        F: Fn(&mut T) + Sync + Send,
    {
        self.pool
            .install(|| items.par_iter_mut().for_each(|item| work(item)));
    }

    /// Parallel mutation with the item index available to the closure.
    pub fn for_each_indexed<T, F>(&self, items: &mut [T], work: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, item)| work(i, item))
        });
    }

    /// Parallel map with per-worker scratch state; the result vector is in
    /// item order.
    pub fn map_with<T, S, R, I, F>(&self, items: &mut [T], init: I, work: F) -> Vec<R>
    where
        T: Send,
        S: Send,
        R: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, &mut T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter_mut()
                .map_init(&init, |scratch, item| work(scratch, item))
                .collect()
        })
    }
}
