//! The Table Dataset V3 engine: metadata loading, lazy row enumeration,
//! random access, and spatial selection.

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use meridian_core::storage::{self, EntryKind};
use meridian_core::{Error, ObjectSource, Result};

use crate::crs::{CrsRegistry, IdentityReprojector, Reprojector};
use crate::feature::Feature;
use crate::geometry;
use crate::layout::DatasetLayout;
use crate::legend::Legend;
use crate::path_structure::PathStructure;
use crate::raw_feature::RawFeature;
use crate::schema::Schema;

/// Filename of the persisted spatial index inside the cache directory.
const SPATIAL_CACHE_FILE: &str = "spatial-index.json";

/// Options controlling how a dataset is opened.
pub struct DatasetOptions {
    /// Reprojection collaborator used when materializing GeoJSON.
    pub reprojector: Arc<dyn Reprojector>,
    /// Directory for dataset-local caches (spatial index). `None` disables
    /// persistence; the index is still built in memory on demand.
    pub cache_dir: Option<PathBuf>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            reprojector: Arc::new(IdentityReprojector),
            cache_dir: None,
        }
    }
}

impl std::fmt::Debug for DatasetOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetOptions")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

/// One indexed bounding box, tagged with its position in the eid array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedBox {
    min: [f64; 2],
    max: [f64; 2],
    index: usize,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// A static RTree over feature bounding boxes plus the parallel eid array.
#[derive(Serialize, Deserialize)]
struct SpatialIndex {
    tree: RTree<IndexedBox>,
    eids: Vec<String>,
}

/// A loaded, immutable baseline dataset.
///
/// All metadata is parsed at open time; rows are decoded lazily on demand.
/// Editing happens in a [`crate::WorkingFeatureCollection`] layered on top,
/// never here.
pub struct TableDatasetV3 {
    source: Arc<dyn ObjectSource>,
    layout: DatasetLayout,
    title: String,
    description: Option<String>,
    schema: Arc<Schema>,
    legends: BTreeMap<String, Legend>,
    path_structure: PathStructure,
    crss: CrsRegistry,
    feature_count: u64,
    options: DatasetOptions,
    spatial: Mutex<Option<Arc<SpatialIndex>>>,
    geojson_cache: OnceCell<Arc<geojson::FeatureCollection>>,
}

impl std::fmt::Debug for TableDatasetV3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDatasetV3")
            .field("id", &self.layout.id())
            .field("title", &self.title)
            .field("feature_count", &self.feature_count)
            .finish_non_exhaustive()
    }
}

impl TableDatasetV3 {
    /// Checks whether `id` names a structurally valid dataset under `source`.
    ///
    /// The layout contract: `.table-dataset/meta/` holds `title`,
    /// `schema.json`, `path-structure.json`, and a non-empty `legend/`.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures other than absence.
    pub async fn is_valid_dataset(source: &dyn ObjectSource, id: &str) -> Result<bool> {
        let layout = DatasetLayout::new(id);
        let dataset_dir = source.head(&layout.dataset_dir()).await?;
        if dataset_dir.map(|m| m.kind) != Some(EntryKind::Dir) {
            return Ok(false);
        }
        for required in [layout.title(), layout.schema(), layout.path_structure()] {
            if source.head(&required).await?.map(|m| m.kind) != Some(EntryKind::File) {
                return Ok(false);
            }
        }
        match source.list_dir(&layout.legend_dir()).await {
            Ok(entries) => Ok(entries.iter().any(storage::DirEntry::is_file)),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Loads a dataset's metadata and binds it to `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] / [`Error::InvalidFileContents`] /
    /// [`Error::SchemaValidation`] when any metadata file is missing or
    /// malformed. Metadata failures abort construction.
    pub async fn open(
        source: Arc<dyn ObjectSource>,
        id: &str,
        options: DatasetOptions,
    ) -> Result<Arc<Self>> {
        let layout = DatasetLayout::new(id);

        let title_bytes = source.get(&layout.title()).await?;
        let title = String::from_utf8(title_bytes.to_vec())
            .map_err(|_| Error::invalid_contents(layout.title(), "title is not UTF-8"))?
            .trim()
            .to_string();

        let description = match source.get(&layout.description()).await {
            Ok(bytes) => Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| {
                        Error::invalid_contents(layout.description(), "description is not UTF-8")
                    })?
                    .trim()
                    .to_string(),
            ),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let ps_path = layout.path_structure();
        let path_structure = PathStructure::from_json(&ps_path, &source.get(&ps_path).await?)?;

        let schema_path = layout.schema();
        let schema = Arc::new(Schema::from_json(
            &schema_path,
            &source.get(&schema_path).await?,
        )?);

        let mut legends = BTreeMap::new();
        for entry in source.list_dir(&layout.legend_dir()).await? {
            if !entry.is_file() {
                continue;
            }
            let path = layout.legend(&entry.name);
            let legend = Legend::from_bytes(&path, &entry.name, &source.get(&path).await?)?;
            legends.insert(legend.id().to_string(), legend);
        }
        if legends.is_empty() {
            return Err(Error::invalid_contents(
                layout.legend_dir(),
                "dataset has no legends",
            ));
        }

        let mut crss = CrsRegistry::new();
        match source.list_dir(&layout.crs_dir()).await {
            Ok(entries) => {
                for entry in entries {
                    let Some(identifier) = entry.name.strip_suffix(".wkt") else {
                        continue;
                    };
                    let path = storage::join(&[&layout.crs_dir(), &entry.name]);
                    let wkt = String::from_utf8(source.get(&path).await?.to_vec())
                        .map_err(|_| Error::invalid_contents(path.clone(), "WKT is not UTF-8"))?;
                    crss.insert(identifier, wkt.trim().to_string());
                }
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let feature_count = count_files(source.as_ref(), &layout.feature_dir()).await?;
        tracing::debug!(
            dataset = id,
            features = feature_count,
            legends = legends.len(),
            "dataset opened"
        );

        Ok(Arc::new(Self {
            source,
            layout,
            title,
            description,
            schema,
            legends,
            path_structure,
            crss,
            feature_count,
            options,
            spatial: Mutex::new(None),
            geojson_cache: OnceCell::new(),
        }))
    }

    /// The dataset's repo-relative name.
    #[must_use]
    pub fn id(&self) -> &str {
        self.layout.id()
    }

    /// The dataset title (trimmed).
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The optional dataset description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The current schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// All legends, keyed by content hash.
    #[must_use]
    pub fn legends(&self) -> &BTreeMap<String, Legend> {
        &self.legends
    }

    /// Looks up a legend by id.
    #[must_use]
    pub fn legend(&self, id: &str) -> Option<&Legend> {
        self.legends.get(id)
    }

    /// The dataset's path structure.
    #[must_use]
    pub fn path_structure(&self) -> &PathStructure {
        &self.path_structure
    }

    /// The per-dataset CRS registry.
    #[must_use]
    pub fn crss(&self) -> &CrsRegistry {
        &self.crss
    }

    /// Looks up a CRS definition by identifier.
    #[must_use]
    pub fn crs(&self, identifier: &str) -> Option<&crate::crs::Crs> {
        self.crss.get(identifier)
    }

    /// The reprojection collaborator this dataset renders GeoJSON with.
    #[must_use]
    pub fn reprojector(&self) -> &dyn Reprojector {
        self.options.reprojector.as_ref()
    }

    /// Number of feature files counted at open time.
    ///
    /// This is a baseline statistic; in-memory edits never update it.
    #[must_use]
    pub fn feature_count(&self) -> u64 {
        self.feature_count
    }

    /// Returns a lazy iterator over all features.
    ///
    /// Rows are decoded one file at a time; dropping the iterator is the
    /// cancellation signal. Iteration order is filesystem order and not
    /// part of the contract.
    #[must_use]
    pub fn features(&self) -> FeatureIter<'_> {
        FeatureIter {
            dataset: self,
            walk: FeatureWalk::new(
                self.source.as_ref(),
                self.layout.feature_dir(),
                self.path_structure.levels,
            ),
        }
    }

    /// Returns true when a feature exists at the given encoded ID.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures other than absence.
    pub async fn has(&self, eid: &str) -> Result<bool> {
        let meta = self.source.head(&self.layout.feature(eid)).await?;
        Ok(meta.map(|m| m.kind) == Some(EntryKind::File))
    }

    /// Loads a single feature by encoded ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when absent, and decode errors for a
    /// corrupt row.
    pub async fn get(&self, eid: &str) -> Result<Feature> {
        let path = self.layout.feature(eid);
        let body = self.source.get(&path).await?;
        let filename = storage::file_name(eid);
        let raw = RawFeature::from_file(&path, filename, &body)?;
        let record = raw.to_record(
            &self.legends,
            &self.schema,
            &self.path_structure,
            &self.crss,
        )?;
        Ok(Feature::from_record(record, self.schema.clone()))
    }

    /// Returns the features whose bounding boxes intersect the query box
    /// `[min_x, min_y, max_x, max_y]`.
    ///
    /// The spatial index is built on demand from all features (and
    /// persisted to the cache directory when one is configured), then
    /// reused for subsequent queries.
    ///
    /// # Errors
    ///
    /// Propagates row decode and I/O failures encountered while building
    /// the index or loading matched features.
    pub async fn select_intersection(&self, bbox: [f64; 4]) -> Result<Vec<Feature>> {
        let index = self.spatial_index().await?;
        let envelope = AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]);

        let mut eids: Vec<&str> = index
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|rect| index.eids[rect.index].as_str())
            .collect();
        eids.sort_unstable();

        let mut features = Vec::with_capacity(eids.len());
        for eid in eids {
            features.push(self.get(eid).await?);
        }
        Ok(features)
    }

    /// Materializes the whole dataset as a GeoJSON feature collection.
    ///
    /// The result is cached after the first call and shared; it holds every
    /// feature in memory at once, which is expensive for large datasets.
    /// Features without a geometry are omitted.
    ///
    /// # Errors
    ///
    /// Propagates row decode and rendering failures.
    pub async fn to_geojson(&self) -> Result<Arc<geojson::FeatureCollection>> {
        self.geojson_cache
            .get_or_try_init(|| async {
                let mut features = Vec::new();
                let mut rows = self.features();
                while let Some(row) = rows.next().await {
                    let feature = row?;
                    if let Some(rendered) =
                        feature.to_geojson(&self.crss, self.options.reprojector.as_ref())?
                    {
                        features.push(rendered);
                    }
                }
                Ok(Arc::new(geojson::FeatureCollection {
                    bbox: None,
                    features,
                    foreign_members: None,
                }))
            })
            .await
            .cloned()
    }

    async fn spatial_index(&self) -> Result<Arc<SpatialIndex>> {
        let mut slot = self.spatial.lock().await;
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }

        if let Some(cached) = self.load_spatial_cache().await {
            let index = Arc::new(cached);
            *slot = Some(index.clone());
            return Ok(index);
        }

        tracing::debug!(dataset = self.layout.id(), "building spatial index");
        let mut rects = Vec::new();
        let mut eids = Vec::new();
        let mut rows = self.features();
        while let Some(row) = rows.next().await {
            let feature = row?;
            let Some(bbox) = feature.geometry().and_then(geometry::bounding_box) else {
                continue;
            };
            rects.push(IndexedBox {
                min: [bbox[0], bbox[1]],
                max: [bbox[2], bbox[3]],
                index: eids.len(),
            });
            eids.push(feature.eid().to_string());
        }

        let index = Arc::new(SpatialIndex {
            tree: RTree::bulk_load(rects),
            eids,
        });
        self.persist_spatial_cache(&index).await;
        *slot = Some(index.clone());
        Ok(index)
    }

    async fn load_spatial_cache(&self) -> Option<SpatialIndex> {
        let dir = self.options.cache_dir.as_ref()?;
        let path = dir.join(SPATIAL_CACHE_FILE);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(
                    dataset = self.layout.id(),
                    error = %e,
                    "discarding unreadable spatial index cache"
                );
                None
            }
        }
    }

    /// Writes the serialized index atomically (temp file, then rename) so a
    /// concurrent reader never observes a torn file.
    async fn persist_spatial_cache(&self, index: &SpatialIndex) {
        let Some(dir) = self.options.cache_dir.as_ref() else {
            return;
        };
        let result: std::io::Result<()> = async {
            tokio::fs::create_dir_all(dir).await?;
            let bytes = serde_json::to_vec(index)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let tmp = dir.join(format!("{SPATIAL_CACHE_FILE}.tmp"));
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, dir.join(SPATIAL_CACHE_FILE)).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(
                dataset = self.layout.id(),
                error = %e,
                "failed to persist spatial index cache"
            );
        }
    }
}

/// Recursively counts regular files under `dir`. Missing directory counts
/// as zero.
async fn count_files(source: &dyn ObjectSource, dir: &str) -> Result<u64> {
    let mut pending = vec![dir.to_string()];
    let mut count = 0u64;
    while let Some(current) = pending.pop() {
        let entries = match source.list_dir(&current).await {
            Ok(entries) => entries,
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = storage::join(&[&current, &entry.name]);
            match entry.kind {
                EntryKind::File => count += 1,
                EntryKind::Dir => pending.push(path),
            }
        }
    }
    Ok(count)
}

/// Lazy terminal-branch walk over the feature tree.
///
/// Feature files live exactly `levels` directory hops below `feature/`;
/// the walk descends through directories up to that depth and yields file
/// paths, holding one directory listing per depth and reading nothing
/// ahead of the caller.
struct FeatureWalk<'a> {
    source: &'a dyn ObjectSource,
    feature_dir: String,
    levels: u32,
    started: bool,
    stack: Vec<(String, VecDeque<storage::DirEntry>)>,
}

impl<'a> FeatureWalk<'a> {
    fn new(source: &'a dyn ObjectSource, feature_dir: String, levels: u32) -> Self {
        Self {
            source,
            feature_dir,
            levels,
            started: false,
            stack: Vec::new(),
        }
    }

    /// Yields the next feature file path relative to the repo root, along
    /// with its eid (path relative to the feature dir).
    async fn next_path(&mut self) -> Result<Option<(String, String)>> {
        if !self.started {
            self.started = true;
            match self.source.list_dir(&self.feature_dir).await {
                Ok(entries) => self
                    .stack
                    .push((self.feature_dir.clone(), VecDeque::from(entries))),
                Err(Error::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        loop {
            let depth = self.stack.len().saturating_sub(1);
            let Some((dir, queue)) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = queue.pop_front() else {
                self.stack.pop();
                continue;
            };
            let path = storage::join(&[dir, &entry.name]);
            match entry.kind {
                EntryKind::Dir if (depth as u32) < self.levels => {
                    let entries = self.source.list_dir(&path).await?;
                    self.stack.push((path, VecDeque::from(entries)));
                }
                EntryKind::File => {
                    let eid = path
                        .strip_prefix(&format!("{}/", self.feature_dir))
                        .unwrap_or(&path)
                        .to_string();
                    return Ok(Some((path, eid)));
                }
                EntryKind::Dir => {
                    // Deeper than the declared levels; not part of the tree.
                    tracing::warn!(path = %path, "directory below terminal branch depth, skipping");
                }
            }
        }
    }
}

/// Pull-based iterator over a dataset's features.
///
/// Each `next` call reads and decodes at most one feature file. Per-row
/// decode failures are yielded as `Err` so the caller decides whether to
/// continue.
pub struct FeatureIter<'a> {
    dataset: &'a TableDatasetV3,
    walk: FeatureWalk<'a>,
}

impl FeatureIter<'_> {
    /// Advances to the next feature. Returns `None` when exhausted.
    pub async fn next(&mut self) -> Option<Result<Feature>> {
        let (path, eid) = match self.walk.next_path().await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(self.load(&path, &eid).await)
    }

    async fn load(&self, path: &str, eid: &str) -> Result<Feature> {
        let body = self.dataset.source.get(path).await?;
        let filename = storage::file_name(eid);
        let raw = RawFeature::from_file(path, filename, &body)?;
        let record = raw.to_record(
            &self.dataset.legends,
            &self.dataset.schema,
            &self.dataset.path_structure,
            &self.dataset.crss,
        )?;
        Ok(Feature::from_record(record, self.dataset.schema.clone()))
    }
}
