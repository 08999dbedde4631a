//! Scheme store implementations
//!
//! - [`InMemorySchemeStore`]: process-local map, used by tests and embedders
//! - [`FileSchemeStore`]: one TOML file per scheme in a directory

pub mod file;
pub mod memory;

pub use file::FileSchemeStore;
pub use memory::InMemorySchemeStore;
