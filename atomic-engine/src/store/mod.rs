//! 操作存储层
//!
//! 提供操作的统一读写接口

pub mod memory;
pub mod redb_store;
pub mod traits;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;
pub use traits::{decode_operation, encode_operation, OperationStore, StoreError};
