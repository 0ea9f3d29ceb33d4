//! Per-dataset coordinate reference systems.
//!
//! Each dataset carries its own registry of CRS definitions, loaded once
//! from `meta/crs/*.wkt` and read-only thereafter. Reprojection itself is
//! an external collaborator: the engine hands coordinates, a source CRS and
//! a target identifier to a [`Reprojector`] and uses whatever comes back.

use std::collections::BTreeMap;

use meridian_core::Result;

/// A coordinate reference system: identifier plus WKT definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs {
    /// The identifier the dataset refers to this CRS by, e.g. `"EPSG:4326"`.
    pub identifier: String,
    /// The WKT definition text.
    pub wkt: String,
}

/// The identifier every GeoJSON output is reprojected to.
pub const WGS84: &str = "EPSG:4326";

/// Read-only map from identifier to CRS definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrsRegistry {
    entries: BTreeMap<String, Crs>,
}

impl CrsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a CRS definition. Later registrations win.
    pub fn insert(&mut self, identifier: impl Into<String>, wkt: impl Into<String>) {
        let identifier = identifier.into();
        self.entries.insert(
            identifier.clone(),
            Crs {
                identifier,
                wkt: wkt.into(),
            },
        );
    }

    /// Looks up a CRS by identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Crs> {
        self.entries.get(identifier)
    }

    /// Returns true when the identifier is registered.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no CRS is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// External reprojection collaborator.
///
/// Implementations transform a geometry's coordinates in place from the
/// given source CRS to the target identifier. The engine calls this once
/// per materialized GeoJSON feature whose CRS differs from [`WGS84`].
pub trait Reprojector: Send + Sync {
    /// Reprojects `geometry` from `from` to the CRS named by `to`.
    ///
    /// # Errors
    ///
    /// Implementations should surface transformation failures; the engine
    /// propagates them to the caller unchanged.
    fn reproject(&self, geometry: &mut geojson::Geometry, from: &Crs, to: &str) -> Result<()>;
}

/// A reprojector that leaves coordinates untouched.
///
/// Suitable for datasets already stored in [`WGS84`] and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReprojector;

impl Reprojector for IdentityReprojector {
    fn reproject(&self, _geometry: &mut geojson::Geometry, _from: &Crs, _to: &str) -> Result<()> {
        Ok(())
    }
}
