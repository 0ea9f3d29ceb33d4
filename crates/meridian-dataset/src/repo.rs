//! Repository binding: datasets by name under a working-tree root.
//!
//! A [`Repository`] wraps an already-materialized working tree (the clone
//! itself is someone else's job) and gates dataset construction through the
//! layout check, so callers only ever see structurally valid datasets.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use meridian_core::{Error, ObjectSource, Result};

use crate::crs::{IdentityReprojector, Reprojector};
use crate::dataset::{DatasetOptions, TableDatasetV3};
use crate::layout::DATASET_DIRNAME;
use crate::working_copy::WorkingFeatureCollection;

/// Options shared by every dataset a repository opens.
pub struct RepositoryOptions {
    /// The commit the working tree was materialized from, carried into the
    /// `kart.patch/v1` header (`base`).
    pub base_commit: Option<String>,
    /// Reprojection collaborator handed to each dataset.
    pub reprojector: Arc<dyn Reprojector>,
    /// Root for dataset-local caches; each dataset gets a subdirectory.
    pub cache_root: Option<PathBuf>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            base_commit: None,
            reprojector: Arc::new(IdentityReprojector),
            cache_root: None,
        }
    }
}

impl std::fmt::Debug for RepositoryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryOptions")
            .field("base_commit", &self.base_commit)
            .field("cache_root", &self.cache_root)
            .finish_non_exhaustive()
    }
}

/// A working tree with its datasets and their working copies.
pub struct Repository {
    source: Arc<dyn ObjectSource>,
    options: RepositoryOptions,
    datasets: BTreeMap<String, WorkingFeatureCollection>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("loaded", &self.datasets.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Binds a repository to a working-tree root.
    #[must_use]
    pub fn new(source: Arc<dyn ObjectSource>, options: RepositoryOptions) -> Self {
        Self {
            source,
            options,
            datasets: BTreeMap::new(),
        }
    }

    /// The commit the working tree was materialized from, if known.
    #[must_use]
    pub fn base_commit(&self) -> Option<&str> {
        self.options.base_commit.as_deref()
    }

    /// Returns true when `name` is a structurally valid dataset.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures other than absence.
    pub async fn has(&self, name: &str) -> Result<bool> {
        TableDatasetV3::is_valid_dataset(self.source.as_ref(), name).await
    }

    /// Loads (or returns the already-loaded) working copy for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when `name` is not a valid dataset, and
    /// metadata errors from dataset construction.
    pub async fn get(&mut self, name: &str) -> Result<&mut WorkingFeatureCollection> {
        if !self.datasets.contains_key(name) {
            if !self.has(name).await? {
                return Err(Error::NotFound(format!("dataset {name}")));
            }
            let dataset_options = DatasetOptions {
                reprojector: self.options.reprojector.clone(),
                cache_dir: self
                    .options
                    .cache_root
                    .as_ref()
                    .map(|root| root.join(name.replace('/', "_"))),
            };
            let dataset = TableDatasetV3::open(self.source.clone(), name, dataset_options).await?;
            self.datasets
                .insert(name.to_string(), WorkingFeatureCollection::new(dataset));
        }
        self.datasets
            .get_mut(name)
            .ok_or_else(|| Error::Internal {
                message: format!("dataset {name} vanished after load"),
            })
    }

    /// The already-loaded working copy for `name`, if any.
    #[must_use]
    pub fn get_loaded(&self, name: &str) -> Option<&WorkingFeatureCollection> {
        self.datasets.get(name)
    }

    /// Names of every valid dataset under the root, sorted.
    ///
    /// # Errors
    ///
    /// Propagates listing failures.
    pub async fn dataset_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pending: Vec<String> = vec![String::new()];
        while let Some(dir) = pending.pop() {
            let entries = match self.source.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let mut subdirs = Vec::new();
            let mut is_dataset = false;
            for entry in &entries {
                if !entry.is_dir() {
                    continue;
                }
                if entry.name == DATASET_DIRNAME {
                    is_dataset = true;
                } else if !entry.name.starts_with('.') {
                    subdirs.push(meridian_core::storage::join(&[&dir, &entry.name]));
                }
            }
            if is_dataset && !dir.is_empty() {
                if TableDatasetV3::is_valid_dataset(self.source.as_ref(), &dir).await? {
                    names.push(dir);
                }
                // Datasets do not nest.
                continue;
            }
            pending.extend(subdirs);
        }
        names.sort();
        Ok(names)
    }

    /// Merges every loaded dataset's working-copy diff into one canonical
    /// patch document.
    ///
    /// # Errors
    ///
    /// Propagates diff synthesis failures.
    pub async fn to_diff(&self) -> Result<Value> {
        let mut merged = Map::new();
        for (name, working) in &self.datasets {
            merged.insert(name.clone(), working.dataset_diff().await?);
        }
        Ok(json!({
            "kart.patch/v1": {"base": self.options.base_commit, "crs": "EPSG:4326"},
            "kart.diff/v1+hexwkb": Value::Object(merged),
        }))
    }
}
