//! Fixed-size index keys and their comparator.
//!
//! A key is the concatenated serialization of the index columns (a null
//! bitmap followed by the non-null fields), zero-padded to the tree's
//! `key_size`. Sizes are bucketed so a tree's node geometry is stable.

use common::{DbError, DbResult};
use record::{decode_field, encode_field, field_serialized_size, Schema};
use std::cmp::Ordering;
use std::sync::Arc;
use types::{Field, TypeId};

/// Key buffer widths a tree may use.
pub const KEY_SIZE_BUCKETS: [usize; 6] = [8, 16, 32, 64, 128, 256];

/// A key value sized to its tree's fixed key width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexKey {
    bytes: Vec<u8>,
}

impl IndexKey {
    pub fn from_bytes(bytes: &[u8]) -> IndexKey {
        IndexKey {
            bytes: bytes.to_vec(),
        }
    }

    /// Serialize key fields into a `key_size`-wide buffer.
    pub fn encode(fields: &[Field], key_size: usize) -> DbResult<IndexKey> {
        let bitmap_len = fields.len().div_ceil(8);
        let payload: usize =
            bitmap_len + fields.iter().map(field_serialized_size).sum::<usize>();
        if payload > key_size {
            return Err(DbError::KeyTooLarge {
                size: payload,
                max: key_size,
            });
        }

        let mut bytes = vec![0u8; key_size];
        for (i, field) in fields.iter().enumerate() {
            if field.is_null() {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        let mut cur = &mut bytes[bitmap_len..];
        for field in fields {
            if !field.is_null() {
                encode_field(field, &mut cur);
            }
        }
        Ok(IndexKey { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Pick the smallest key bucket that fits every value of the key schema.
pub fn key_size_for(key_schema: &Schema) -> DbResult<usize> {
    let mut needed = key_schema.column_count().div_ceil(8);
    for column in key_schema.columns() {
        needed += match column.type_id() {
            TypeId::Int32 | TypeId::Float32 => 4,
            TypeId::Char => 4 + column.length() as usize,
        };
    }
    KEY_SIZE_BUCKETS
        .iter()
        .copied()
        .find(|bucket| *bucket >= needed)
        .ok_or(DbError::KeyTooLarge {
            size: needed,
            max: *KEY_SIZE_BUCKETS.last().unwrap(),
        })
}

/// Field-wise ordering of serialized keys.
///
/// The order is total: a NULL field sorts before every value of its type,
/// which keeps tree structure well defined even when nullable columns are
/// indexed. `NULL = x` being false is enforced at the field-comparison
/// layer, not here.
#[derive(Clone)]
pub struct KeyComparator {
    key_schema: Arc<Schema>,
}

impl KeyComparator {
    pub fn new(key_schema: Arc<Schema>) -> KeyComparator {
        KeyComparator { key_schema }
    }

    pub fn key_schema(&self) -> &Arc<Schema> {
        &self.key_schema
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let count = self.key_schema.column_count();
        let bitmap_len = count.div_ceil(8);
        let mut a_cur = &a[bitmap_len..];
        let mut b_cur = &b[bitmap_len..];

        for (i, column) in self.key_schema.columns().iter().enumerate() {
            let a_null = a[i / 8] & (0x80 >> (i % 8)) != 0;
            let b_null = b[i / 8] & (0x80 >> (i % 8)) != 0;
            match (a_null, b_null) {
                (true, true) => continue,
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                (false, false) => {
                    let fa = decode_field(column.type_id(), &mut a_cur);
                    let fb = decode_field(column.type_id(), &mut b_cur);
                    match fa.cmp_same_type(&fb) {
                        Some(Ordering::Equal) | None => continue,
                        Some(ord) => return ord,
                    }
                }
            }
        }
        Ordering::Equal
    }
}
