//! Row and schema codecs.
//!
//! Every serialized record is an explicit binary layout in host byte order:
//! metadata records lead with a 32-bit magic tag, rows carry a null bitmap
//! with one bit per field (MSB first within each byte, set = NULL).


use bytes::{Buf, BufMut};
use common::{DbError, DbResult, PageId, RowId};
use types::{Field, TypeId};

pub const COLUMN_MAGIC: u32 = 0x434F_4C4D;
pub const SCHEMA_MAGIC: u32 = 0x5343_4845;

/// Width in bytes of a serialized non-null field. NULL fields occupy only
/// their bitmap bit.
pub fn field_serialized_size(field: &Field) -> usize {
    match field {
        Field::Int32(Some(_)) | Field::Float32(Some(_)) => 4,
        Field::Char(Some(s)) => 4 + s.len(),
        _ => 0,
    }
}

/// Encode a non-null field.
pub fn encode_field(field: &Field, buf: &mut impl BufMut) {
    match field {
        Field::Int32(Some(v)) => buf.put_i32_ne(*v),
        Field::Float32(Some(v)) => buf.put_f32_ne(*v),
        Field::Char(Some(s)) => {
            buf.put_u32_ne(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        _ => debug_assert!(false, "null fields are encoded via the bitmap"),
    }
}

/// Decode a non-null field of the given type.
pub fn decode_field(type_id: TypeId, buf: &mut impl Buf) -> Field {
    match type_id {
        TypeId::Int32 => Field::Int32(Some(buf.get_i32_ne())),
        TypeId::Float32 => Field::Float32(Some(buf.get_f32_ne())),
        TypeId::Char => {
            let len = buf.get_u32_ne() as usize;
            let mut bytes = vec![0u8; len];
            buf.copy_to_slice(&mut bytes);
            Field::Char(Some(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

/// One column of a table schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    /// Byte capacity for Char columns, fixed width otherwise.
    length: u32,
    /// Position of the column within its schema.
    table_ind: u32,
    nullable: bool,
    unique: bool,
}

impl Column {
    /// A fixed-width column (Int32 or Float32).
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool, unique: bool) -> Column {
        debug_assert!(type_id != TypeId::Char, "Char columns carry an explicit length");
        Column {
            name: name.into(),
            type_id,
            length: 4,
            table_ind: 0,
            nullable,
            unique,
        }
    }

    /// A Char column with an explicit byte capacity.
    pub fn char(name: impl Into<String>, length: u32, nullable: bool, unique: bool) -> Column {
        Column {
            name: name.into(),
            type_id: TypeId::Char,
            length,
            table_ind: 0,
            nullable,
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn table_ind(&self) -> u32 {
        self.table_ind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.name.len() + 4 + 4 + 4 + 1 + 1
    }

    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_ne(COLUMN_MAGIC);
        buf.put_u32_ne(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32_ne(self.type_id.to_u32());
        buf.put_u32_ne(self.length);
        buf.put_u32_ne(self.table_ind);
        buf.put_u8(self.nullable as u8);
        buf.put_u8(self.unique as u8);
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> DbResult<Column> {
        if buf.get_u32_ne() != COLUMN_MAGIC {
            return Err(DbError::CorruptMagic("column"));
        }
        let name_len = buf.get_u32_ne() as usize;
        let mut name = vec![0u8; name_len];
        buf.copy_to_slice(&mut name);
        let type_id = TypeId::from_u32(buf.get_u32_ne())
            .ok_or(DbError::CorruptMagic("column type tag"))?;
        let length = buf.get_u32_ne();
        let table_ind = buf.get_u32_ne();
        let nullable = buf.get_u8() != 0;
        let unique = buf.get_u8() != 0;
        Ok(Column {
            name: String::from_utf8_lossy(&name).into_owned(),
            type_id,
            length,
            table_ind,
            nullable,
            unique,
        })
    }
}

/// Ordered column layout of a table. Column indexes are dense `0..n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema from columns, assigning dense positions in order.
    pub fn new(mut columns: Vec<Column>) -> Schema {
        for (i, column) in columns.iter_mut().enumerate() {
            column.table_ind = i as u32;
        }
        Schema { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Project a key schema out of this one by column positions.
    pub fn project(&self, ordinals: &[u32]) -> DbResult<Schema> {
        let mut columns = Vec::with_capacity(ordinals.len());
        for &ord in ordinals {
            let column = self
                .columns
                .get(ord as usize)
                .ok_or_else(|| DbError::ColumnNotExists(format!("#{ord}")))?;
            columns.push(column.clone());
        }
        Ok(Schema::new(columns))
    }

    pub fn serialized_size(&self) -> usize {
        8 + self.columns.iter().map(Column::serialized_size).sum::<usize>()
    }

    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_ne(SCHEMA_MAGIC);
        buf.put_u32_ne(self.columns.len() as u32);
        for column in &self.columns {
            column.serialize_to(buf);
        }
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> DbResult<Schema> {
        if buf.get_u32_ne() != SCHEMA_MAGIC {
            return Err(DbError::CorruptMagic("schema"));
        }
        let count = buf.get_u32_ne() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Column::deserialize_from(buf)?);
        }
        Ok(Schema { columns })
    }
}

/// A tuple plus its stable address.
///
/// Layout: `[row_id | field_count | null bitmap | non-null fields in order]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    row_id: RowId,
    fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Row {
        Row {
            row_id: RowId::INVALID,
            fields,
        }
    }

    pub fn with_row_id(row_id: RowId, fields: Vec<Field>) -> Row {
        Row { row_id, fields }
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn set_row_id(&mut self, row_id: RowId) {
        self.row_id = row_id;
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn serialized_size(&self) -> usize {
        let bitmap = self.fields.len().div_ceil(8);
        8 + 4 + bitmap + self.fields.iter().map(field_serialized_size).sum::<usize>()
    }

    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_i32_ne(self.row_id.page_id.0);
        buf.put_u32_ne(self.row_id.slot);
        buf.put_u32_ne(self.fields.len() as u32);

        let mut bitmap = vec![0u8; self.fields.len().div_ceil(8)];
        for (i, field) in self.fields.iter().enumerate() {
            if field.is_null() {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        buf.put_slice(&bitmap);

        for field in &self.fields {
            if !field.is_null() {
                encode_field(field, buf);
            }
        }
    }

    pub fn deserialize_from(buf: &mut impl Buf, schema: &Schema) -> DbResult<Row> {
        let page_id = PageId(buf.get_i32_ne());
        let slot = buf.get_u32_ne();
        let count = buf.get_u32_ne() as usize;
        if count != schema.column_count() {
            return Err(DbError::Storage(format!(
                "row has {count} fields but the schema has {}",
                schema.column_count()
            )));
        }

        let mut bitmap = vec![0u8; count.div_ceil(8)];
        buf.copy_to_slice(&mut bitmap);

        let mut fields = Vec::with_capacity(count);
        for (i, column) in schema.columns().iter().enumerate() {
            let is_null = bitmap[i / 8] & (0x80 >> (i % 8)) != 0;
            if is_null {
                fields.push(Field::null(column.type_id()));
            } else {
                fields.push(decode_field(column.type_id(), buf));
            }
        }
        Ok(Row {
            row_id: RowId::new(page_id, slot),
            fields,
        })
    }
}
