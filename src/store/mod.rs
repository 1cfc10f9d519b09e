pub mod file;
pub mod memory;
pub mod spi;

pub use file::FileEntityStore;
pub use memory::MemoryEntityStore;
pub use spi::{CommitReceipt, EntityStore, StateBatch, StoreCommit};
