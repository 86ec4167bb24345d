//! A [`LoadSaver`] wrapper that adds configurable random IO latency.
//!
//! `SlowStore` wraps any `Arc<dyn LoadSaver>` and sleeps for a random
//! duration before each load or save. The RNG is seeded for
//! deterministic, reproducible behaviour across test runs.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::StoreError;
use crate::traits::{LoadSaver, Loader, Saver};

/// A [`LoadSaver`] wrapper that injects random latency before IO.
///
/// Useful for surfacing races in parallel traversals and for exercising
/// cancellation at suspension points, which an instant in-memory store
/// never reaches.
pub struct SlowStore {
    inner: Arc<dyn LoadSaver>,
    load_latency_ms: (u64, u64),
    save_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
}

impl SlowStore {
    /// Wrap an existing store with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn LoadSaver>) -> Self {
        Self {
            inner,
            load_latency_ms: (0, 0),
            save_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Set the load latency range in milliseconds (uniform random).
    pub fn load_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.load_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the save latency range in milliseconds (uniform random).
    pub fn save_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.save_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;

        if max == 0 {
            return;
        }

        let ms = if min == max {
            min
        } else {
            self.rng.lock().unwrap().random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl Loader for SlowStore {
    async fn load(&self, reference: &[u8]) -> Result<Bytes, StoreError> {
        self.delay(self.load_latency_ms).await;
        self.inner.load(reference).await
    }
}

#[async_trait::async_trait]
impl Saver for SlowStore {
    async fn save(&self, data: Bytes) -> Result<Vec<u8>, StoreError> {
        self.delay(self.save_latency_ms).await;
        self.inner.save(data).await
    }
}
