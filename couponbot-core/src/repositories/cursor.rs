// File: src/repositories/cursor.rs

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::repositories::{KeyValueStore, RotationCursorStore};
use crate::Error;

pub const LAST_INDEX_KEY: &str = "coupon-last-index";

/// Rotation cursor kept as a single integer under one key of a
/// `KeyValueStore`. `-1` (or a missing key) means nothing was handed out yet.
///
/// The read-modify-write is serialized inside this process only, which is
/// enough for the local variant's single writer.
pub struct KeyValueCursor {
    store: Arc<dyn KeyValueStore>,
    key: String,
    lock: Mutex<()>,
}

impl KeyValueCursor {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, LAST_INDEX_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            lock: Mutex::new(()),
        }
    }

    async fn raw(&self) -> Result<i64, Error> {
        match self.store.get_value(&self.key).await? {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .map_err(|e| Error::Parse(format!("bad value for {}: {e}", self.key))),
            None => Ok(-1),
        }
    }
}

#[async_trait]
impl RotationCursorStore for KeyValueCursor {
    async fn position(&self) -> Result<Option<usize>, Error> {
        let raw = self.raw().await?;
        Ok(usize::try_from(raw).ok())
    }

    async fn advance(&self, len: usize) -> Result<usize, Error> {
        if len == 0 {
            return Err(Error::NoCouponsAvailable);
        }
        let _guard = self.lock.lock().await;
        let current = self.raw().await?;
        let next = (current + 1).rem_euclid(len as i64);
        self.store.set_value(&self.key, &next.to_string()).await?;
        Ok(next as usize)
    }

    async fn rewind(&self, expected: usize) -> Result<bool, Error> {
        let _guard = self.lock.lock().await;
        if self.raw().await? != expected as i64 {
            return Ok(false);
        }
        let previous = expected as i64 - 1;
        self.store.set_value(&self.key, &previous.to_string()).await?;
        Ok(true)
    }
}
