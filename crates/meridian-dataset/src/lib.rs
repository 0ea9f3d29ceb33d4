//! # meridian-dataset
//!
//! Client engine for versioned geospatial table datasets stored in the
//! "Table Dataset V3" layout: immutable per-row binary blobs addressed by a
//! deterministic path derived from their primary keys, plus metadata
//! describing the schema, historical column orderings (legends), the path
//! sharding scheme, and per-dataset coordinate reference systems.
//!
//! The engine:
//!
//! - decodes on-disk raw rows into schema-correct domain values,
//! - tracks in-memory edits against the committed baseline without
//!   mutating it, and
//! - emits a canonical diff describing the edit set.
//!
//! There is no write-back to the on-disk format, no commit/merge, and no
//! network access; editing is purely in-memory with a diff at the boundary.
//!
//! ## Reading a dataset
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meridian_core::LocalSource;
//! use meridian_dataset::{DatasetOptions, TableDatasetV3};
//!
//! # async fn demo() -> meridian_core::Result<()> {
//! let source = Arc::new(LocalSource::new("/data/my-repo"));
//! let dataset = TableDatasetV3::open(source, "roads", DatasetOptions::default()).await?;
//! let mut rows = dataset.features();
//! while let Some(feature) = rows.next().await {
//!     let feature = feature?;
//!     println!("{}", feature.eid());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod crs;
pub mod dataset;
pub mod feature;
pub mod geometry;
pub mod layout;
pub mod legend;
pub mod path_structure;
pub mod raw_feature;
pub mod repo;
pub mod schema;
pub mod value;
pub mod working_copy;

pub use crs::{Crs, CrsRegistry, IdentityReprojector, Reprojector};
pub use dataset::{DatasetOptions, FeatureIter, TableDatasetV3};
pub use feature::Feature;
pub use layout::DatasetLayout;
pub use legend::Legend;
pub use path_structure::{Encoding, PathScheme, PathStructure};
pub use raw_feature::{FeatureRecord, RawFeature};
pub use repo::{Repository, RepositoryOptions};
pub use schema::{DataType, Schema, SchemaEntry};
pub use value::{Checked, IsoDuration, RowValue};
pub use working_copy::{TrackedChange, WorkingFeatureCollection};
