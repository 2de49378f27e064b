// Conveyor storage
//
// The substrate client: everything the coordinator shares across
// processes lives behind the KeyValueStore trait. The Redis
// implementation is the production backend; the in-memory one backs
// tests.

pub mod memory;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use store::{KeyValueStore, StoreError};

pub use self::redis::RedisStore;
