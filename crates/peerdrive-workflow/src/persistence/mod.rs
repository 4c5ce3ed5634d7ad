//! Persistence for execution records and callback tokens

mod memory;
mod postgres;
mod store;

pub use memory::{MemoryExecutionStore, MemoryTokenStore};
pub use postgres::{PostgresExecutionStore, PostgresTokenStore};
pub use store::{ExecutionStore, StoreError, TokenStore};
