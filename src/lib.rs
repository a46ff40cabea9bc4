//! Datastore key-space migration between CID-addressed and
//! multihash-addressed keys.
//!
//! The engine ([`swap::CidSwapper`]) streams every key under a prefix from a
//! [`store::Datastore`], decides per key whether it holds a version 1+
//! content identifier, and moves its value to the key of the identifier's raw
//! multihash. Moves are batched: each worker syncs before deleting the keys it
//! replaced. [`migration::KeyspaceMigration`] sequences a logged dry run, the
//! real run and the repository version bump, and can replay the log to
//! revert.

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod migration;
pub mod offline;
pub mod store;
pub mod swap;

pub use crate::codec::{BinaryKeyCodec, ContentId, KeyCodec};
pub use crate::config::SwapConfig;
pub use crate::error::{SwapError, SwapErrorCode};
pub use crate::key::Key;
pub use crate::migration::{ApplyReport, KeyspaceMigration, RevertReport};
pub use crate::store::{Datastore, StoreError};
pub use crate::swap::{CidSwapper, Classification, SkipReason, Swap};
