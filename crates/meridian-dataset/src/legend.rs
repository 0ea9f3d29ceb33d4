//! Legends: immutable snapshots of a past schema's column ordering.
//!
//! A legend records which column ids were primary keys and which were not,
//! in the order their values appear on the wire. Rows authored under an
//! older schema name their legend, so the engine can map raw value tuples
//! back to column identities no matter how the schema has evolved since.
//!
//! A legend's identity is its content hash: the filename stem of every
//! legend file MUST equal the truncated SHA-256 of its packed bytes, and
//! reading verifies this.

use meridian_core::{content_hash, Error, Result};

/// A reference to one on-wire column slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot<'a> {
    /// Stable column id.
    pub column_id: &'a str,
    /// Whether the slot lives in the primary-key tuple.
    pub is_primary: bool,
    /// Index within its tuple (primary keys and values count separately).
    pub data_index: usize,
}

/// An immutable column-ordering snapshot, identified by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Legend {
    id: String,
    primary_key_ids: Vec<String>,
    non_primary_key_ids: Vec<String>,
}

impl Legend {
    /// Builds a legend from column-id lists, deriving its content-hash id.
    #[must_use]
    pub fn from_parts(primary_key_ids: Vec<String>, non_primary_key_ids: Vec<String>) -> Self {
        let bytes = pack(&primary_key_ids, &non_primary_key_ids);
        Self {
            id: content_hash(&bytes),
            primary_key_ids,
            non_primary_key_ids,
        }
    }

    /// Parses a legend file and verifies its hash identity.
    ///
    /// `stem` is the filename (no directory, no extension) the bytes were
    /// read from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] when the bytes are not a
    /// packed pair of id arrays, or when their content hash does not match
    /// `stem`.
    pub fn from_bytes(path: &str, stem: &str, bytes: &[u8]) -> Result<Self> {
        let actual = content_hash(bytes);
        if actual != stem {
            return Err(Error::invalid_contents(
                path,
                format!("legend hash mismatch: contents hash to {actual}, filename says {stem}"),
            ));
        }

        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| Error::invalid_contents(path, format!("legend is not MessagePack: {e}")))?;

        let rmpv::Value::Array(pair) = value else {
            return Err(Error::invalid_contents(path, "legend must be a 2-tuple"));
        };
        if pair.len() != 2 {
            return Err(Error::invalid_contents(
                path,
                format!("legend must be a 2-tuple, got {} elements", pair.len()),
            ));
        }
        let mut pair = pair.into_iter();
        let primary_key_ids = id_list(path, pair.next().unwrap_or(rmpv::Value::Nil))?;
        let non_primary_key_ids = id_list(path, pair.next().unwrap_or(rmpv::Value::Nil))?;

        Ok(Self {
            id: stem.to_string(),
            primary_key_ids,
            non_primary_key_ids,
        })
    }

    /// The legend's content-hash identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Primary-key column ids in on-wire order.
    #[must_use]
    pub fn primary_key_ids(&self) -> &[String] {
        &self.primary_key_ids
    }

    /// Non-primary-key column ids in on-wire order.
    #[must_use]
    pub fn non_primary_key_ids(&self) -> &[String] {
        &self.non_primary_key_ids
    }

    /// Yields every column slot in on-wire order: primary keys first, then
    /// values, each carrying its index within its own tuple.
    pub fn column_slots(&self) -> impl Iterator<Item = ColumnSlot<'_>> {
        let pks = self
            .primary_key_ids
            .iter()
            .enumerate()
            .map(|(data_index, id)| ColumnSlot {
                column_id: id,
                is_primary: true,
                data_index,
            });
        let values = self
            .non_primary_key_ids
            .iter()
            .enumerate()
            .map(|(data_index, id)| ColumnSlot {
                column_id: id,
                is_primary: false,
                data_index,
            });
        pks.chain(values)
    }

    /// Returns true when the legend knows a column id.
    #[must_use]
    pub fn contains(&self, column_id: &str) -> bool {
        self.primary_key_ids.iter().any(|id| id == column_id)
            || self.non_primary_key_ids.iter().any(|id| id == column_id)
    }

    /// The packed binary form of this legend.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        pack(&self.primary_key_ids, &self.non_primary_key_ids)
    }
}

fn pack(primary_key_ids: &[String], non_primary_key_ids: &[String]) -> Vec<u8> {
    let to_values = |ids: &[String]| {
        rmpv::Value::Array(
            ids.iter()
                .map(|id| rmpv::Value::String(id.clone().into()))
                .collect(),
        )
    };
    let tuple = rmpv::Value::Array(vec![to_values(primary_key_ids), to_values(non_primary_key_ids)]);
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &tuple)
        .unwrap_or_else(|e| unreachable!("packing to a Vec cannot fail: {e}"));
    out
}

fn id_list(path: &str, value: rmpv::Value) -> Result<Vec<String>> {
    let rmpv::Value::Array(items) = value else {
        return Err(Error::invalid_contents(
            path,
            "legend tuple element must be an array of column ids",
        ));
    };
    items
        .into_iter()
        .map(|item| match item {
            rmpv::Value::String(s) => s
                .into_str()
                .ok_or_else(|| Error::invalid_contents(path, "column id is not valid UTF-8")),
            other => Err(Error::invalid_contents(
                path,
                format!("column id must be a string, got {other}"),
            )),
        })
        .collect()
}
