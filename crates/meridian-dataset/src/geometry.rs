//! Geometry blob codec: GeoPackage-binary envelope around standard WKB.
//!
//! Feature rows carry geometries as MessagePack extension payloads in the
//! GeoPackage binary form: a small header (magic, version, flags, SRS id,
//! optional xy envelope) followed by standard WKB. This module converts
//! those blobs to and from GeoJSON geometry values and extracts bounding
//! boxes for the spatial index.
//!
//! Written blobs use little-endian byte order, SRS id 0, and attach an xy
//! envelope for everything except points.

use geozero::geojson::GeoJson;
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToJson, ToWkb};

use meridian_core::{Error, Result};

/// GeoPackage binary magic, "GP".
const MAGIC: [u8; 2] = [0x47, 0x50];

/// Header length before the envelope.
const HEADER_LEN: usize = 8;

/// An xy bounding box: `[min_x, min_y, max_x, max_y]`.
pub type BoundingBox = [f64; 4];

/// Decodes a GeoPackage-binary blob into a GeoJSON geometry.
///
/// # Errors
///
/// Returns [`Error::InvalidFileContents`] when the header or the WKB body
/// is malformed.
pub fn decode_gpkg(context: &str, bytes: &[u8]) -> Result<geojson::Geometry> {
    let body = wkb_body(context, bytes)?;
    let json = Wkb(body.to_vec())
        .to_json()
        .map_err(|e| Error::invalid_contents(context, format!("WKB decode failed: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| Error::invalid_contents(context, format!("WKB produced invalid GeoJSON: {e}")))
}

/// Encodes a GeoJSON geometry as a GeoPackage-binary blob.
///
/// # Errors
///
/// Returns [`Error::Serialization`] when the geometry cannot be expressed
/// as WKB.
pub fn encode_gpkg(geometry: &geojson::Geometry) -> Result<Vec<u8>> {
    let wkb = to_wkb(geometry)?;
    let envelope = match geometry.value {
        geojson::Value::Point(_) => None,
        _ => bounding_box(geometry),
    };

    // flags: bit 0 = little-endian, bits 1-3 = envelope indicator.
    let flags: u8 = if envelope.is_some() { 0x03 } else { 0x01 };
    let mut out = Vec::with_capacity(HEADER_LEN + 32 + wkb.len());
    out.extend_from_slice(&MAGIC);
    out.push(0); // version
    out.push(flags);
    out.extend_from_slice(&0i32.to_le_bytes()); // SRS id
    if let Some([min_x, min_y, max_x, max_y]) = envelope {
        // GeoPackage envelope order is minx, maxx, miny, maxy.
        for v in [min_x, max_x, min_y, max_y] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out.extend_from_slice(&wkb);
    Ok(out)
}

/// Renders a geometry as lowercase hex of its standard WKB (no envelope).
///
/// This is the representation geometry values take in the diff document.
///
/// # Errors
///
/// Returns [`Error::Serialization`] when the geometry cannot be expressed
/// as WKB.
pub fn wkb_hex(geometry: &geojson::Geometry) -> Result<String> {
    Ok(hex::encode(to_wkb(geometry)?))
}

/// Reads the envelope from a GeoPackage-binary blob without decoding WKB.
///
/// Returns `None` when the blob carries no envelope.
///
/// # Errors
///
/// Returns [`Error::InvalidFileContents`] for a malformed header.
pub fn gpkg_envelope(context: &str, bytes: &[u8]) -> Result<Option<BoundingBox>> {
    let (flags, little_endian) = header_flags(context, bytes)?;
    let indicator = (flags >> 1) & 0x07;
    if indicator == 0 {
        return Ok(None);
    }
    let count = envelope_len(context, indicator)?;
    let end = HEADER_LEN + count * 8;
    if bytes.len() < end {
        return Err(Error::invalid_contents(
            context,
            "geometry blob truncated inside envelope",
        ));
    }
    let mut doubles = [0f64; 8];
    for (i, chunk) in bytes[HEADER_LEN..end].chunks_exact(8).enumerate() {
        let raw: [u8; 8] = chunk.try_into().unwrap_or_default();
        doubles[i] = if little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        };
    }
    // Envelope order is minx, maxx, miny, maxy (then z/m ranges, ignored).
    Ok(Some([doubles[0], doubles[2], doubles[1], doubles[3]]))
}

/// Computes the xy bounding box of a GeoJSON geometry.
///
/// Returns `None` for geometries with no coordinates.
#[must_use]
pub fn bounding_box(geometry: &geojson::Geometry) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    visit_positions(&geometry.value, &mut |pos| {
        if pos.len() < 2 {
            return;
        }
        let (x, y) = (pos[0], pos[1]);
        bbox = Some(match bbox {
            None => [x, y, x, y],
            Some([min_x, min_y, max_x, max_y]) => {
                [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
            }
        });
    });
    bbox
}

fn to_wkb(geometry: &geojson::Geometry) -> Result<Vec<u8>> {
    let json = serde_json::to_string(geometry).map_err(|e| Error::Serialization {
        message: format!("geometry to JSON failed: {e}"),
    })?;
    GeoJson(&json)
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| Error::Serialization {
            message: format!("WKB encode failed: {e}"),
        })
}

fn header_flags(context: &str, bytes: &[u8]) -> Result<(u8, bool)> {
    if bytes.len() < HEADER_LEN || bytes[0..2] != MAGIC {
        return Err(Error::invalid_contents(
            context,
            "not a GeoPackage geometry blob",
        ));
    }
    let flags = bytes[3];
    Ok((flags, flags & 0x01 == 0x01))
}

fn envelope_len(context: &str, indicator: u8) -> Result<usize> {
    match indicator {
        0 => Ok(0),
        1 => Ok(4),
        2 | 3 => Ok(6),
        4 => Ok(8),
        other => Err(Error::invalid_contents(
            context,
            format!("invalid envelope indicator {other}"),
        )),
    }
}

fn wkb_body<'a>(context: &str, bytes: &'a [u8]) -> Result<&'a [u8]> {
    let (flags, _) = header_flags(context, bytes)?;
    let indicator = (flags >> 1) & 0x07;
    let count = envelope_len(context, indicator)?;
    let offset = HEADER_LEN + count * 8;
    if bytes.len() <= offset {
        return Err(Error::invalid_contents(
            context,
            "geometry blob has no WKB body",
        ));
    }
    Ok(&bytes[offset..])
}

fn visit_positions(value: &geojson::Value, f: &mut impl FnMut(&[f64])) {
    match value {
        geojson::Value::Point(pos) => f(pos),
        geojson::Value::MultiPoint(list) | geojson::Value::LineString(list) => {
            for pos in list {
                f(pos);
            }
        }
        geojson::Value::MultiLineString(lists) | geojson::Value::Polygon(lists) => {
            for list in lists {
                for pos in list {
                    f(pos);
                }
            }
        }
        geojson::Value::MultiPolygon(polys) => {
            for lists in polys {
                for list in lists {
                    for pos in list {
                        f(pos);
                    }
                }
            }
        }
        geojson::Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                visit_positions(&geometry.value, f);
            }
        }
    }
}
