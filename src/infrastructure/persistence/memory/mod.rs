mod billing_store;
mod counter_store;

pub use billing_store::InMemoryBillingStore;
pub use counter_store::InMemoryCounterStore;
