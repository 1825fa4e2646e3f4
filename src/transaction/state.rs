//! Transaction identity and lifecycle.
//!
//! A transaction starts `Active` and ends exactly once, either `Committed`
//! or `Aborted` (explicit abort, a failed operation, a missed deadline, or
//! being dropped while still open). Ids are process-local: a transaction
//! never outlives the process that began it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_TX_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique, increasing transaction number. Also used as the lock owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn next() -> Self {
        TransactionId(LAST_TX_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Locks may be taken and changes buffered
    Active,
    /// Changes are visible; locks released
    Committed,
    /// Nothing was applied; locks released
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let first = TransactionId::next();
        let second = TransactionId::next();
        assert!(second > first);
        assert_eq!(second.to_string(), format!("tx#{}", second.as_u64()));
    }

    #[test]
    fn test_only_active_accepts_work() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Committed.is_active());
        assert!(!TransactionState::Aborted.is_active());
        assert_eq!(TransactionState::Aborted.to_string(), "aborted");
    }
}
