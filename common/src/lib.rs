//! Shared identifiers, canonical encoding and small filesystem helpers used
//! by the activation and hare crates.

pub mod atomic_file;
pub mod codec;
pub mod collab;
pub mod signing;
pub mod types;

pub use atomic_file::{load_optional, write_atomic};
pub use collab::{AtxHeader, AtxProvider, Syncer};
pub use types::*;
