//! Table metadata: schemas, field descriptors, the table list and its
//! on-disk catalog file.
//!
//! The catalog file (`db.db`) is plain text. For each table it carries one
//! line `name num_fields`, then one line `field_name type_code len offset`
//! per field (0 = int, 1 = str), then one line with the record count. Saving
//! first rotates any existing catalog to a backup.

use common::{DbError, DbResult};
use pager::MAX_RECORD_LEN;
use std::path::Path;
use types::FieldType;

/// Name of the catalog file inside the system directory.
pub const CATALOG_FILE: &str = "db.db";

/// The previous catalog is rotated to this name on every save.
pub const CATALOG_BACKUP: &str = "__backup_db.db";

/// A field's name, type and byte offset within a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: String,
    pub ty: FieldType,
    /// Offset from the beginning of the record, assigned by
    /// [`Schema::add_field`].
    pub offset: usize,
}

impl FieldDesc {
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Int,
            offset: 0,
        }
    }

    pub fn str(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::Str { len },
            offset: 0,
        }
    }

    /// Number of bytes the field occupies inside a record.
    pub fn len(&self) -> usize {
        self.ty.byte_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered field descriptors defining a record's on-disk layout.
///
/// All records of a table have the same length; a record never crosses a
/// block boundary, so the total length is capped at what fits a block next
/// to the page header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    fields: Vec<FieldDesc>,
    len: usize,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            len: 0,
        }
    }

    /// Append a field, assigning its offset at the current record length.
    pub fn add_field(&mut self, mut field: FieldDesc) -> DbResult<()> {
        let field_len = field.len();
        if self.len + field_len > MAX_RECORD_LEN {
            return Err(DbError::Catalog(format!(
                "schema \"{}\" already has {} bytes, adding {} would exceed the limit of {} bytes",
                self.name, self.len, field_len, MAX_RECORD_LEN
            )));
        }
        field.offset = self.len;
        self.len += field_len;
        self.fields.push(field);
        Ok(())
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Total record length in bytes.
    pub fn record_len(&self) -> usize {
        self.len
    }

    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Same fields under a new name, offsets recomputed.
    pub fn copy_as(&self, name: impl Into<String>) -> DbResult<Schema> {
        let mut dest = Schema::new(name);
        for field in &self.fields {
            dest.add_field(field.clone())?;
        }
        Ok(dest)
    }

    /// A sub-schema holding the named fields in the requested order.
    pub fn sub_schema(&self, name: impl Into<String>, names: &[String]) -> DbResult<Schema> {
        let mut dest = Schema::new(name);
        for field_name in names {
            let field = self.field(field_name).ok_or_else(|| {
                DbError::Catalog(format!(
                    "\"{}\" has no \"{}\" field",
                    self.name, field_name
                ))
            })?;
            dest.add_field(field.clone())?;
        }
        Ok(dest)
    }

    /// All fields of `self` followed by the fields of `other` whose names do
    /// not already appear.
    pub fn join_with(&self, other: &Schema, name: impl Into<String>) -> DbResult<Schema> {
        let mut dest = self.copy_as(name)?;
        for field in other.fields() {
            if dest.field(&field.name).is_none() {
                dest.add_field(field.clone())?;
            }
        }
        Ok(dest)
    }
}

/// A table: its schema plus run-time information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableMeta {
    pub schema: Schema,
    pub num_records: u64,
}

impl TableMeta {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            num_records: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

/// The list of tables known to the database.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: Vec<TableMeta>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table for `schema`. The newest table sits at the front of
    /// the list.
    pub fn create(&mut self, schema: Schema) -> DbResult<()> {
        if self.table(&schema.name).is_some() {
            return Err(DbError::Catalog(format!(
                "table \"{}\" already exists",
                schema.name
            )));
        }
        self.tables.insert(0, TableMeta::new(schema));
        Ok(())
    }

    /// Look a table up by name.
    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableMeta> {
        self.tables.iter_mut().find(|t| t.name() == name)
    }

    /// Unlink a table from the list, returning its metadata.
    pub fn remove(&mut self, name: &str) -> Option<TableMeta> {
        let idx = self.tables.iter().position(|t| t.name() == name)?;
        Some(self.tables.remove(idx))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// First unused name of the form `op__base_<n>`.
    pub fn temp_name(&self, op: &str, base: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = format!("{}__{}_{}", op, base, n);
            if self.table(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Load a catalog from disk; a missing file yields an empty catalog.
    /// Tables appear in file order.
    pub fn load(path: &Path) -> DbResult<Catalog> {
        if !path.exists() {
            return Ok(Catalog::new());
        }
        let content = std::fs::read_to_string(path)?;
        let mut tokens = content.split_whitespace();
        let mut catalog = Catalog::new();

        while let Some(name) = tokens.next() {
            let num_fields: usize = parse_token(tokens.next(), "field count")?;
            let mut schema = Schema::new(name);
            for _ in 0..num_fields {
                let field_name = tokens
                    .next()
                    .ok_or_else(|| invalid_catalog("missing field name"))?;
                let type_code: u8 = parse_token(tokens.next(), "field type")?;
                let len: usize = parse_token(tokens.next(), "field length")?;
                // Offsets are reassigned by add_field; the stored value is
                // only consumed.
                let _offset: usize = parse_token(tokens.next(), "field offset")?;
                let ty = FieldType::from_type_code(type_code, len).ok_or_else(|| {
                    invalid_catalog(&format!("unknown field type code {}", type_code))
                })?;
                schema.add_field(FieldDesc {
                    name: field_name.to_string(),
                    ty,
                    offset: 0,
                })?;
            }
            let num_records: u64 = parse_token(tokens.next(), "record count")?;
            catalog.tables.push(TableMeta {
                schema,
                num_records,
            });
        }
        Ok(catalog)
    }

    /// Write the catalog, rotating any previous file to
    /// [`CATALOG_BACKUP`] first.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        if path.exists() {
            let backup = path.with_file_name(CATALOG_BACKUP);
            std::fs::rename(path, backup)?;
        }
        let mut out = String::new();
        for table in &self.tables {
            let schema = &table.schema;
            out.push_str(&format!("{} {}\n", schema.name, schema.num_fields()));
            for field in schema.fields() {
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    field.name,
                    field.ty.type_code(),
                    field.len(),
                    field.offset
                ));
            }
            out.push_str(&format!("{}\n", table.num_records));
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

fn invalid_catalog(detail: &str) -> DbError {
    DbError::Catalog(format!("invalid catalog file: {}", detail))
}

fn parse_token<T: std::str::FromStr>(token: Option<&str>, what: &str) -> DbResult<T> {
    let token = token.ok_or_else(|| invalid_catalog(&format!("missing {}", what)))?;
    token
        .parse()
        .map_err(|_| invalid_catalog(&format!("bad {} \"{}\"", what, token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn people_schema() -> Schema {
        let mut schema = Schema::new("people");
        schema.add_field(FieldDesc::int("id")).unwrap();
        schema.add_field(FieldDesc::str("name", 8)).unwrap();
        schema.add_field(FieldDesc::int("age")).unwrap();
        schema
    }

    #[test]
    fn offsets_accumulate_field_lengths() {
        let schema = people_schema();
        assert_eq!(schema.record_len(), 16);
        let offsets: Vec<usize> = schema.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 12]);
    }

    #[test]
    fn oversized_schema_is_rejected() {
        let mut schema = Schema::new("wide");
        schema.add_field(FieldDesc::str("a", 488)).unwrap();
        // 488 + 4 = 492 still fits...
        schema.add_field(FieldDesc::int("b")).unwrap();
        // ...one more byte does not.
        let err = schema.add_field(FieldDesc::str("c", 1)).unwrap_err();
        assert!(err.to_string().contains("exceed"));
        assert_eq!(schema.record_len(), MAX_RECORD_LEN);
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let mut catalog = Catalog::new();
        catalog.create(people_schema()).unwrap();
        let err = catalog.create(people_schema()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn newest_table_sits_at_the_front() {
        let mut catalog = Catalog::new();
        catalog.create(Schema::new("a")).unwrap();
        catalog.create(Schema::new("b")).unwrap();
        let names: Vec<&str> = catalog.tables().map(|t| t.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn sub_schema_requires_known_fields() {
        let schema = people_schema();
        let sub = schema
            .sub_schema("p", &["age".to_string(), "name".to_string()])
            .unwrap();
        assert_eq!(sub.fields()[0].name, "age");
        assert_eq!(sub.fields()[0].offset, 0);
        assert_eq!(sub.fields()[1].offset, 4);

        let err = schema
            .sub_schema("p", &["nope".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("no \"nope\" field"));
    }

    #[test]
    fn join_schema_skips_duplicate_names() {
        let left = people_schema();
        let mut right = Schema::new("jobs");
        right.add_field(FieldDesc::int("id")).unwrap();
        right.add_field(FieldDesc::str("title", 12)).unwrap();

        let joined = left.join_with(&right, "tmp_sch").unwrap();
        let names: Vec<&str> = joined.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "age", "title"]);
        assert_eq!(joined.record_len(), 16 + 12);
    }

    #[test]
    fn temp_names_skip_taken_ones() {
        let mut catalog = Catalog::new();
        assert_eq!(catalog.temp_name("project", "t"), "project__t_0");
        catalog.create(Schema::new("project__t_0")).unwrap();
        assert_eq!(catalog.temp_name("project", "t"), "project__t_1");
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE);

        let mut catalog = Catalog::new();
        catalog.create(people_schema()).unwrap();
        catalog.table_mut("people").unwrap().num_records = 17;
        catalog.save(&path).unwrap();

        let loaded = Catalog::load(&path).unwrap();
        let table = loaded.table("people").unwrap();
        assert_eq!(table.num_records, 17);
        assert_eq!(table.schema, people_schema());
    }

    #[test]
    fn save_rotates_the_previous_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE);

        let mut catalog = Catalog::new();
        catalog.create(Schema::new("first")).unwrap();
        catalog.save(&path).unwrap();

        let mut catalog = Catalog::new();
        catalog.create(Schema::new("second")).unwrap();
        catalog.save(&path).unwrap();

        let backup = std::fs::read_to_string(dir.path().join(CATALOG_BACKUP)).unwrap();
        assert!(backup.starts_with("first"));
        let current = std::fs::read_to_string(&path).unwrap();
        assert!(current.starts_with("second"));
    }

    #[test]
    fn loading_a_missing_catalog_yields_an_empty_one() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::load(&dir.path().join(CATALOG_FILE)).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn garbage_catalogs_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE);
        std::fs::write(&path, "people pear\n").unwrap();
        let err = Catalog::load(&path).unwrap_err();
        assert!(err.to_string().contains("invalid catalog file"));
    }

    proptest! {
        // Every field offset equals the sum of the lengths before it, and the
        // record length is the sum of all of them.
        #[test]
        fn offsets_are_prefix_sums(lens in proptest::collection::vec(1usize..40, 1..8)) {
            let mut schema = Schema::new("t");
            for (i, len) in lens.iter().enumerate() {
                schema.add_field(FieldDesc::str(format!("f{}", i), *len)).unwrap();
            }
            let mut expected = 0;
            for (field, len) in schema.fields().iter().zip(&lens) {
                prop_assert_eq!(field.offset, expected);
                expected += len;
            }
            prop_assert_eq!(schema.record_len(), expected);
        }
    }
}
