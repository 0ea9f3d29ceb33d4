//! Canonical repo-relative paths for the Table Dataset V3 layout.
//!
//! This module is the **single source of truth** for dataset paths. All
//! readers construct paths through [`DatasetLayout`]; no hardcoded path
//! strings exist outside this module.
//!
//! # Path Layout
//!
//! ```text
//! <repo>/
//!   <dataset-id>/
//!     .table-dataset/
//!       meta/
//!         title                         # UTF-8, trimmed
//!         description                   # optional, UTF-8
//!         schema.json                   # JSON array of column descriptors
//!         path-structure.json           # JSON {scheme, branches, levels, encoding}
//!         legend/
//!           <20-byte-sha256-prefix-hex> # binary-packed [[pkIds], [nonPkIds]]
//!         crs/
//!           <identifier>.wkt            # optional; WKT text
//!       feature/
//!         <eid>                         # <folder-tree>/<base64(pack([pk,...]))>
//! ```

use meridian_core::storage;

/// The marker directory that makes a directory a dataset.
pub const DATASET_DIRNAME: &str = ".table-dataset";

/// Canonical path generator for one dataset under a repo root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    id: String,
}

impl DatasetLayout {
    /// Creates the layout for the dataset named `id` (repo-relative).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The dataset's repo-relative name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `<id>/.table-dataset`
    #[must_use]
    pub fn dataset_dir(&self) -> String {
        storage::join(&[&self.id, DATASET_DIRNAME])
    }

    /// `<id>/.table-dataset/meta`
    #[must_use]
    pub fn meta_dir(&self) -> String {
        storage::join(&[&self.dataset_dir(), "meta"])
    }

    /// `<id>/.table-dataset/meta/title`
    #[must_use]
    pub fn title(&self) -> String {
        storage::join(&[&self.meta_dir(), "title"])
    }

    /// `<id>/.table-dataset/meta/description`
    #[must_use]
    pub fn description(&self) -> String {
        storage::join(&[&self.meta_dir(), "description"])
    }

    /// `<id>/.table-dataset/meta/schema.json`
    #[must_use]
    pub fn schema(&self) -> String {
        storage::join(&[&self.meta_dir(), "schema.json"])
    }

    /// `<id>/.table-dataset/meta/path-structure.json`
    #[must_use]
    pub fn path_structure(&self) -> String {
        storage::join(&[&self.meta_dir(), "path-structure.json"])
    }

    /// `<id>/.table-dataset/meta/legend`
    #[must_use]
    pub fn legend_dir(&self) -> String {
        storage::join(&[&self.meta_dir(), "legend"])
    }

    /// `<id>/.table-dataset/meta/legend/<legend-id>`
    #[must_use]
    pub fn legend(&self, legend_id: &str) -> String {
        storage::join(&[&self.legend_dir(), legend_id])
    }

    /// `<id>/.table-dataset/meta/crs`
    #[must_use]
    pub fn crs_dir(&self) -> String {
        storage::join(&[&self.meta_dir(), "crs"])
    }

    /// `<id>/.table-dataset/feature`
    #[must_use]
    pub fn feature_dir(&self) -> String {
        storage::join(&[&self.dataset_dir(), "feature"])
    }

    /// `<id>/.table-dataset/feature/<eid>`
    #[must_use]
    pub fn feature(&self, eid: &str) -> String {
        storage::join(&[&self.feature_dir(), eid])
    }
}
