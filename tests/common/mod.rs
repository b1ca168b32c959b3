//! Shared test doubles.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::Semaphore;

use lazy_asset_cache::{FetchError, Fetcher, Locator};

/// Decoded form of [`payload_for`] bytes.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Doc {
    pub locator: String,
}

/// JSON body the test fetcher serves for a locator.
pub fn payload_for(locator: &Locator) -> Bytes {
    Bytes::from(format!(r#"{{"locator":"{}"}}"#, locator.as_str()))
}

/// Fetcher whose completions are released explicitly by the test.
pub struct GatedFetcher {
    calls: AtomicUsize,
    gate: Semaphore,
    fail: AtomicBool,
}

impl GatedFetcher {
    /// Every fetch blocks until [`Self::release`].
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            fail: AtomicBool::new(false),
        })
    }

    /// Fetches complete immediately.
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            fail: AtomicBool::new(false),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        permit.forget();

        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection reset".into()));
        }
        Ok(payload_for(locator))
    }
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
        panic!("condition not reached in time");
    }
}

/// Await a future with the same deadline as [`eventually`].
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("future did not complete in time")
}
