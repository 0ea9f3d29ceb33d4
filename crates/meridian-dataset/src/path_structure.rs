//! Path structure: deterministic encoding of primary keys to feature paths.
//!
//! Every feature file lives at `<folder-tree>/<filename>` under the
//! dataset's `feature/` directory. The folder tree shards rows across a
//! fixed number of directory levels so no single directory grows unbounded;
//! the filename is the base64 of the MessagePack-packed primary-key tuple.
//! The concatenation of both is the feature's **encoded ID** (eid).
//!
//! Two sharding schemes exist:
//!
//! - `int`: a single integer primary key, sharded by the key's own digits
//!   in the target alphabet. The final digit is deliberately excluded from
//!   the folder tree so sequential keys don't open a new folder per row.
//! - `msgpack/hash`: any primary-key tuple, sharded by the SHA-256 of the
//!   packed tuple.
//!
//! The mapping is one-way: nothing ever parses an eid back into keys.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use meridian_core::{Error, Result};

use crate::value::RowValue;

/// Hex folder alphabet, big-endian digit order.
const HEX_ALPHABET: &[u8; 16] = b"0123456789abcdef";

/// Base64 folder alphabet, big-endian digit order.
const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// The sharding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathScheme {
    /// Single integer primary key, sharded by its own digits.
    #[serde(rename = "int")]
    Int,
    /// Arbitrary key tuple, sharded by hash of the packed tuple.
    #[serde(rename = "msgpack/hash")]
    MsgpackHash,
}

/// The folder-character alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// `0-9a-f`; valid with 16 or 256 branches.
    Hex,
    /// The classic base64 alphabet; valid with 64 branches.
    Base64,
}

/// Parsed `path-structure.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStructure {
    /// Sharding scheme.
    pub scheme: PathScheme,
    /// Fan-out per folder level: 16, 64 or 256.
    pub branches: u32,
    /// Number of folder levels between `feature/` and the file.
    pub levels: u32,
    /// Folder-character alphabet.
    pub encoding: Encoding,
}

impl PathStructure {
    /// Parses and validates a `path-structure.json` document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileContents`] for malformed JSON and
    /// [`Error::SchemaValidation`] for invalid combinations.
    pub fn from_json(path: &str, bytes: &[u8]) -> Result<Self> {
        let parsed: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_contents(path, format!("path-structure.json: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validates branch/level/encoding combinations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaValidation`] when the combination is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 {
            return Err(Error::schema("path structure must have at least one level"));
        }
        match (self.encoding, self.branches) {
            (Encoding::Base64, 64) | (Encoding::Hex, 16 | 256) => Ok(()),
            (encoding, branches) => Err(Error::schema(format!(
                "invalid path structure: encoding {encoding:?} with {branches} branches"
            ))),
        }
    }

    /// Folder characters consumed per level.
    fn chars_per_level(&self) -> usize {
        match (self.encoding, self.branches) {
            (Encoding::Hex, 256) => 2,
            _ => 1,
        }
    }

    /// Derives the encoded ID for a primary-key tuple.
    ///
    /// The result is `levels` folder segments followed by the base64-packed
    /// filename, `/`-separated, never starting with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the tuple does not fit the
    /// scheme (wrong arity, or a non-integer key under the `int` scheme).
    pub fn eid(&self, primary_keys: &[RowValue]) -> Result<String> {
        let filename = Self::filename(primary_keys)?;
        let folders = match self.scheme {
            PathScheme::Int => {
                let key = match primary_keys {
                    [RowValue::Int(i)] => u128::from(*i as u64),
                    [RowValue::UInt(u)] => u128::from(*u),
                    [other] => {
                        return Err(Error::InvalidInput(format!(
                            "int path scheme needs an integer primary key, got {}",
                            other.type_name()
                        )))
                    }
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "int path scheme needs exactly one primary key, got {}",
                            primary_keys.len()
                        )))
                    }
                };
                self.int_folders(key)
            }
            PathScheme::MsgpackHash => {
                let packed = pack_tuple(primary_keys)?;
                self.hash_folders(&packed)
            }
        };
        Ok(format!("{folders}{filename}"))
    }

    /// The base64-packed filename for a primary-key tuple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a key value cannot appear in a
    /// primary key (e.g. a geometry).
    pub fn filename(primary_keys: &[RowValue]) -> Result<String> {
        let packed = pack_tuple(primary_keys)?;
        Ok(STANDARD.encode(packed))
    }

    /// Folder tree for the `int` scheme.
    ///
    /// The key is written big-endian in the folder alphabet, left-padded
    /// with the alphabet's zero character to one more character than the
    /// tree consumes; the trailing character is dropped so consecutive
    /// keys land in the same folder.
    fn int_folders(&self, key: u128) -> String {
        let alphabet: &[u8] = match self.encoding {
            Encoding::Hex => HEX_ALPHABET,
            Encoding::Base64 => BASE64_ALPHABET,
        };
        let base = alphabet.len() as u128;
        let width = self.levels as usize * self.chars_per_level() + 1;

        let mut digits = Vec::new();
        let mut rest = key;
        while rest > 0 {
            digits.push(alphabet[(rest % base) as usize]);
            rest /= base;
        }
        while digits.len() < width {
            digits.push(alphabet[0]);
        }
        digits.reverse();
        digits.truncate(width);

        self.join_segments(&digits[..width - 1])
    }

    /// Folder tree for the `msgpack/hash` scheme.
    fn hash_folders(&self, packed: &[u8]) -> String {
        let digest = Sha256::digest(packed);
        let needed = self.levels as usize * self.chars_per_level();
        let mut chars: Vec<u8> = match self.encoding {
            Encoding::Hex => hex::encode(digest).into_bytes(),
            Encoding::Base64 => STANDARD
                .encode(digest)
                .trim_end_matches('=')
                .bytes()
                .collect(),
        };
        while chars.len() < needed {
            chars.insert(0, match self.encoding {
                Encoding::Hex => b'0',
                Encoding::Base64 => b'A',
            });
        }
        chars.truncate(needed);
        self.join_segments(&chars)
    }

    /// Joins folder characters into `/`-terminated segments.
    fn join_segments(&self, chars: &[u8]) -> String {
        let cpl = self.chars_per_level();
        let mut out = String::with_capacity(chars.len() + chars.len() / cpl);
        for segment in chars.chunks(cpl) {
            out.push_str(std::str::from_utf8(segment).unwrap_or_default());
            out.push('/');
        }
        out
    }
}

/// Packs a primary-key tuple as a MessagePack array.
fn pack_tuple(primary_keys: &[RowValue]) -> Result<Vec<u8>> {
    let values: Vec<rmpv::Value> = primary_keys
        .iter()
        .map(RowValue::to_msgpack)
        .collect::<Result<_>>()?;
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &rmpv::Value::Array(values)).map_err(|e| {
        Error::Serialization {
            message: format!("packing primary keys failed: {e}"),
        }
    })?;
    Ok(out)
}
