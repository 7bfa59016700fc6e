//! Remote point balance store
//!
//! The store offers only plain reads and writes. There is no compare-and-swap,
//! so a read-modify-write from this process can interleave with another
//! writer of the same record (another device, a purchase) and lose an update.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::RemoteError;

#[async_trait]
pub trait RemoteBalanceStore: Send + Sync {
    async fn get_balance(&self, user_id: &str) -> Result<i64, RemoteError>;

    async fn set_balance(&self, user_id: &str, balance: i64) -> Result<(), RemoteError>;
}

/// Balance store held in process memory, with switchable failures
#[derive(Debug, Default)]
pub struct InMemoryBalanceStore {
    balances: RwLock<HashMap<String, i64>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(user_id: &str, balance: i64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(user_id.to_string(), balance);
        Self {
            balances: RwLock::new(balances),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBalanceStore for InMemoryBalanceStore {
    async fn get_balance(&self, user_id: &str) -> Result<i64, RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable {
                reason: "read failure injected".to_string(),
            });
        }
        self.balances
            .read()
            .await
            .get(user_id)
            .copied()
            .ok_or_else(|| RemoteError::UnknownUser {
                user_id: user_id.to_string(),
            })
    }

    async fn set_balance(&self, user_id: &str, balance: i64) -> Result<(), RemoteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::WriteRejected {
                user_id: user_id.to_string(),
                reason: "write failure injected".to_string(),
            });
        }
        self.balances
            .write()
            .await
            .insert(user_id.to_string(), balance);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
