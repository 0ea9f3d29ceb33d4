//! # meridian-core
//!
//! Core abstractions for the Meridian versioned-dataset client.
//!
//! This crate provides the foundational types used across all Meridian
//! components:
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Storage Facade**: Read-only, path-based object access with bounded
//!   concurrency
//! - **Wire Serialization**: Canonical JSON form for equality checks and
//!   content hashing
//! - **Events**: Synchronous publish/subscribe for working-copy mutations
//!
//! ## Crate Boundary
//!
//! `meridian-core` is the **only** crate allowed to define shared
//! primitives. The dataset engine (`meridian-dataset`) builds on the
//! contracts defined here and never redefines them.
//!
//! ## Example
//!
//! ```rust
//! use meridian_core::prelude::*;
//!
//! let source = MemorySource::new();
//! let hash = content_hash(b"some legend bytes");
//! assert_eq!(hash.len(), 40);
//! # let _ = source;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod events;
pub mod observability;
pub mod storage;
pub mod wire;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use meridian_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, IssueCode, Result, ValueIssue};
    pub use crate::events::{EventBus, FeatureEvent, FeatureEventKind, FEATURE_EVENT};
    pub use crate::storage::{
        DirEntry, EntryKind, LocalSource, MemorySource, ObjectMeta, ObjectSource,
    };
    pub use crate::wire::{canonical_string, content_hash, values_equal};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, IssueCode, Result, ValueIssue};
pub use events::{EventBus, FeatureEvent, FeatureEventKind, FEATURE_EVENT};
pub use observability::{init_logging, LogFormat};
pub use storage::{DirEntry, EntryKind, LocalSource, MemorySource, ObjectMeta, ObjectSource};
pub use wire::{canonical_string, content_hash, values_equal};
