//! Transactions: per-key locking, buffered changes and atomic commit.

pub mod change;
pub mod coordinator;
pub mod lock;
pub mod state;

pub use change::Change;
pub use coordinator::Transaction;
pub use lock::{LockHandle, LockKey, LockManager, LockMode};
pub use state::{TransactionId, TransactionState};
