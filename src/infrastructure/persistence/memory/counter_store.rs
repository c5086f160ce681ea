use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::billing::{BillingError, CounterKey, ports::CounterStore};

/// Process-local counters. The mutex makes read-raise-increment a single step.
#[derive(Default)]
pub struct InMemoryCounterStore {
  counters: Mutex<HashMap<CounterKey, u64>>,
}

impl InMemoryCounterStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
  async fn increment_and_get(&self, key: CounterKey, floor: u64) -> Result<u64, BillingError> {
    let mut counters = self.counters.lock().await;
    let counter = counters.entry(key).or_insert(0);
    let next = (*counter)
      .max(floor)
      .checked_add(1)
      .ok_or_else(|| BillingError::Storage(format!("Counter {} is exhausted", key)))?;
    *counter = next;
    Ok(next)
  }

  async fn current(&self, key: CounterKey) -> Result<u64, BillingError> {
    Ok(self.counters.lock().await.get(&key).copied().unwrap_or(0))
  }

  async fn reset(&self, key: CounterKey) -> Result<(), BillingError> {
    self.counters.lock().await.remove(&key);
    Ok(())
  }
}
