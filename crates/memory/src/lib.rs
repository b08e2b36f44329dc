//! Session store implementations for Colloquy.
//!
//! - [`InMemorySessionStore`]: the reference store, optionally swept by TTL
//! - [`FileSessionStore`]: one JSON document per session on disk

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileSessionStore;
pub use in_memory::InMemorySessionStore;
