//! The database aggregate: one value owning the system directory, the
//! pager and the catalog, with the statement-level operations on top.
//!
//! Opening a database initializes the pager for the directory and loads the
//! catalog file; closing it saves the catalog back (rotating the previous
//! file to a backup) and shuts the pager down. Only one `Database` should
//! exist per directory at a time.

use catalog::{Catalog, FieldDesc, Schema, CATALOG_FILE};
use common::{DbError, DbResult, RecordBatch};
use executor::{ExecutionContext, JoinStrategy};
use log::debug;
use pager::{Pager, MAX_OPEN_FILES, POOL_PAGES};
use parser::{Projection, SelectQuery};
use std::path::{Path, PathBuf};
use storage::TableScan;
use types::{FieldType, Value};

/// Engine knobs with their stock defaults.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub pool_pages: usize,
    pub max_open_files: usize,
    pub join_strategy: JoinStrategy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_pages: POOL_PAGES,
            max_open_files: MAX_OPEN_FILES,
            join_strategy: JoinStrategy::default(),
        }
    }
}

/// Summary of one table, as listed by `show database`.
#[derive(Clone, Debug)]
pub struct TableSummary {
    pub name: String,
    pub fields: Vec<(String, FieldType, usize)>,
    pub record_len: usize,
    pub num_blocks: u32,
    pub num_records: u64,
}

/// A single open database instance.
pub struct Database {
    dir: PathBuf,
    pager: Pager,
    catalog: Catalog,
    join_strategy: JoinStrategy,
}

impl Database {
    /// Open the database in `dir` (creating the directory if missing) with
    /// default configuration.
    pub fn open(dir: impl Into<PathBuf>) -> DbResult<Database> {
        Self::open_with(dir, DatabaseConfig::default())
    }

    pub fn open_with(dir: impl Into<PathBuf>, config: DatabaseConfig) -> DbResult<Database> {
        let dir = dir.into();
        let pager = Pager::with_capacity(&dir, config.pool_pages, config.max_open_files)?;
        let catalog = Catalog::load(&dir.join(CATALOG_FILE))?;
        debug!(
            "opened database at {} with {} table(s)",
            dir.display(),
            catalog.len()
        );
        Ok(Database {
            dir,
            pager,
            catalog,
            join_strategy: config.join_strategy,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save the catalog and shut the pager down, flushing everything.
    pub fn close(mut self) -> DbResult<()> {
        self.catalog.save(&self.dir.join(CATALOG_FILE))?;
        self.pager.terminate()
    }

    /// Create a table. Field offsets are assigned in declaration order; the
    /// record must fit a block.
    pub fn create_table(&mut self, name: &str, fields: &[(String, FieldType)]) -> DbResult<()> {
        if self.catalog.table(name).is_some() {
            return Err(DbError::Catalog(format!(
                "table \"{}\" already exists",
                name
            )));
        }
        if fields.is_empty() {
            return Err(DbError::Catalog(format!(
                "create table {}: no fields given",
                name
            )));
        }
        let mut schema = Schema::new(name);
        for (field_name, ty) in fields {
            schema.add_field(FieldDesc {
                name: field_name.clone(),
                ty: *ty,
                offset: 0,
            })?;
        }
        self.catalog.create(schema)
    }

    /// Drop a table: unlink it from the catalog, close its file and move the
    /// data out of the way as `_<name>`.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.catalog.remove(name).ok_or_else(|| {
            DbError::Catalog(format!("table \"{}\" does not exist", name))
        })?;
        self.pager.close_file(name)?;
        let data = self.dir.join(name);
        if data.exists() {
            std::fs::rename(&data, self.dir.join(format!("_{}", name)))?;
        }
        Ok(())
    }

    /// Append one row to a table.
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> DbResult<()> {
        let meta = self.catalog.table_mut(table).ok_or_else(|| {
            DbError::Catalog(format!("schema \"{}\" does not exist", table))
        })?;
        let record = storage::build_record(&meta.schema, values)?;
        storage::append_record(&mut self.pager, meta, &record)
    }

    /// Run a select statement: optional natural join, optional where clause,
    /// then projection or a full display. The temporary result tables the
    /// operators materialize are removed before returning.
    pub fn select(&mut self, query: &SelectQuery) -> DbResult<RecordBatch> {
        if self.catalog.table(&query.from).is_none() {
            return Err(DbError::Catalog(format!(
                "table \"{}\" does not exist",
                query.from
            )));
        }
        let mut temps = Vec::new();
        let result = self.run_select(query, &mut temps);
        let cleanup: DbResult<()> = temps.iter().try_for_each(|name| self.drop_table(name));
        let batch = result?;
        cleanup?;
        Ok(batch)
    }

    fn run_select(
        &mut self,
        query: &SelectQuery,
        temps: &mut Vec<String>,
    ) -> DbResult<RecordBatch> {
        let mut current = query.from.clone();

        if let Some(right) = &query.join {
            if *right == query.from {
                return Err(DbError::Executor(
                    "natural join on the same table is not supported".into(),
                ));
            }
            if self.catalog.table(right).is_none() {
                return Err(DbError::Catalog(format!(
                    "table \"{}\" does not exist",
                    right
                )));
            }
            let strategy = self.join_strategy;
            let joined = executor::natural_join(self.ctx(), &current, right, strategy)?;
            temps.push(joined.clone());
            current = joined;
        }

        if let Some(filter) = &query.filter {
            let searched =
                executor::search(self.ctx(), &current, &filter.attr, filter.op, filter.value)?;
            temps.push(searched.clone());
            current = searched;
        }

        match &query.columns {
            Projection::All => self.scan_batch(&current),
            Projection::Columns(names) => {
                let projected = executor::project(self.ctx(), &current, names)?;
                temps.push(projected.clone());
                self.scan_batch(&projected)
            }
        }
    }

    /// Materialize a table into a displayable batch.
    fn scan_batch(&mut self, table: &str) -> DbResult<RecordBatch> {
        let schema = self
            .catalog
            .table(table)
            .ok_or_else(|| DbError::Catalog(format!("table \"{}\" does not exist", table)))?
            .schema
            .clone();
        let scan = TableScan::begin(&mut self.pager, &schema)?;
        let rows = scan.collect_records(&mut self.pager)?;
        Ok(RecordBatch::new(schema.field_names(), rows))
    }

    /// One summary per table, newest first.
    pub fn table_summaries(&mut self) -> DbResult<Vec<TableSummary>> {
        let metas: Vec<(String, Schema, u64)> = self
            .catalog
            .tables()
            .map(|t| (t.name().to_string(), t.schema.clone(), t.num_records))
            .collect();
        let mut summaries = Vec::with_capacity(metas.len());
        for (name, schema, num_records) in metas {
            let num_blocks = self.pager.file_num_blocks(&name)?;
            summaries.push(TableSummary {
                fields: schema
                    .fields()
                    .iter()
                    .map(|f| (f.name.clone(), f.ty, f.offset))
                    .collect(),
                record_len: schema.record_len(),
                name,
                num_blocks,
                num_records,
            });
        }
        Ok(summaries)
    }

    /// Read-only view of the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn ctx(&mut self) -> ExecutionContext<'_> {
        ExecutionContext::new(&mut self.catalog, &mut self.pager)
    }
}
