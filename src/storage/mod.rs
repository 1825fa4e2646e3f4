pub mod collection;
pub mod entry;
pub mod partition;
pub mod persistence;

pub use collection::KeyValueStore;
pub use entry::StoredEntry;
pub use partition::{Partition, PartitionOptions};
pub use persistence::DurabilityMode;
