//! The record layer: marshalling records to and from page bytes, sequential
//! table scans and appends.
//!
//! Records are fixed-length and tightly packed after the page header; a
//! record never crosses a block boundary. A valid record position therefore
//! lies in the used part of the page at a multiple of the record length.

#[cfg(test)]
mod tests;

use catalog::{Schema, TableMeta};
use common::{DbError, DbResult, Record};
use pager::{PageHandle, Pager, BLOCK_SIZE, PAGE_HEADER_SIZE};
use types::{FieldType, Value};

/// Bytes per block actually usable for records of length `len`: the space
/// after the header, truncated to a whole number of records.
pub fn records_area(len: usize) -> usize {
    let avail = BLOCK_SIZE - PAGE_HEADER_SIZE;
    avail - avail % len
}

/// Number of record slots per block for records of length `len`.
pub fn records_per_block(len: usize) -> usize {
    records_area(len) / len
}

/// Build a record for `schema` from positional values, checking arity and
/// types. String values must leave room for the terminator.
pub fn build_record(schema: &Schema, values: Vec<Value>) -> DbResult<Record> {
    if values.len() != schema.num_fields() {
        return Err(DbError::Storage(format!(
            "\"{}\" takes {} values, got {}",
            schema.name,
            schema.num_fields(),
            values.len()
        )));
    }
    for (field, value) in schema.fields().iter().zip(&values) {
        if !value.matches_type(&field.ty) {
            return Err(DbError::Storage(format!(
                "\"{}\" is not a valid {} value for field \"{}\"",
                value, field.ty, field.name
            )));
        }
        if let (Value::Str(s), FieldType::Str { len }) = (value, &field.ty) {
            if s.len() >= *len {
                return Err(DbError::Storage(format!(
                    "\"{}\" does not fit field \"{}\" of {} bytes",
                    s, field.name, len
                )));
            }
        }
    }
    Ok(Record::new(values))
}

fn valid_record_pos(pos: usize, len: usize) -> bool {
    (pos - PAGE_HEADER_SIZE) % len == 0
}

/// Read the record at the page cursor, leaving the cursor right after it.
/// The cursor must sit at a record boundary inside the used area.
pub fn read_record_here(pager: &mut Pager, handle: PageHandle, schema: &Schema) -> DbResult<Record> {
    let page = pager.page(handle)?;
    let pos = page.current_pos();
    if !page.valid_pos_for_get(pos) || !valid_record_pos(pos, schema.record_len()) {
        return Err(DbError::Storage(format!(
            "record read at invalid position {} in \"{}\"",
            pos, schema.name
        )));
    }
    let mut values = Vec::with_capacity(schema.num_fields());
    for field in schema.fields() {
        let value = match field.ty {
            FieldType::Int => Value::Int(page.get_int()?),
            FieldType::Str { len } => Value::Str(page.get_str(len)?),
        };
        values.push(value);
    }
    Ok(Record::new(values))
}

/// Write a record at the page cursor if it fits there; returns whether it
/// did. The caller moves on to the next block when it does not.
pub fn write_record_here(
    pager: &mut Pager,
    handle: PageHandle,
    schema: &Schema,
    record: &Record,
) -> DbResult<bool> {
    let page = pager.page(handle)?;
    let pos = page.current_pos();
    if !page.valid_pos_for_put(pos, schema.record_len()) || !valid_record_pos(pos, schema.record_len())
    {
        return Ok(false);
    }
    for (field, value) in schema.fields().iter().zip(&record.values) {
        match (&field.ty, value) {
            (FieldType::Int, Value::Int(v)) => page.put_int(*v)?,
            (FieldType::Str { len }, Value::Str(s)) => page.put_str(s, *len)?,
            _ => {
                return Err(DbError::Storage(format!(
                    "value \"{}\" does not match field \"{}\" of \"{}\"",
                    value, field.name, schema.name
                )))
            }
        }
    }
    Ok(true)
}

/// Append a record at the end of the table's file, spilling into a fresh
/// block when the last one is full, and bump the record count.
pub fn append_record(pager: &mut Pager, table: &mut TableMeta, record: &Record) -> DbResult<()> {
    let name = table.schema.name.clone();
    let mut handle = pager.get_page_for_append(&name)?;
    if !write_record_here(pager, handle, &table.schema, record)? {
        pager.unpin(handle)?;
        handle = pager.get_next_page(handle)?;
        if !write_record_here(pager, handle, &table.schema, record)? {
            return Err(DbError::Storage(format!(
                "record does not fit an empty block of \"{}\"",
                name
            )));
        }
    }
    table.num_records += 1;
    Ok(())
}

/// Sequential scan over a table, in physical (insertion) order.
///
/// The scan keeps the current page pinned and unpins it when it crosses into
/// the next block.
pub struct TableScan {
    schema: Schema,
    page: PageHandle,
}

impl TableScan {
    /// Prime a scan at the beginning of the table (block 0, cursor right
    /// after the header).
    pub fn begin(pager: &mut Pager, schema: &Schema) -> DbResult<TableScan> {
        let page = pager.get_page(&schema.name, 0)?;
        pager.page(page)?.set_pos_begin();
        Ok(TableScan {
            schema: schema.clone(),
            page,
        })
    }

    /// The page the scan currently sits on.
    pub fn page(&self) -> PageHandle {
        self.page
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Make sure the cursor points at a readable record, crossing into the
    /// next block if the current one is exhausted. Returns the page and
    /// position of that record, or `None` at the end of the table.
    pub fn position(&mut self, pager: &mut Pager) -> DbResult<Option<(PageHandle, usize)>> {
        loop {
            if pager.peof(self.page)? {
                return Ok(None);
            }
            if !pager.page(self.page)?.eop() {
                break;
            }
            pager.unpin(self.page)?;
            let next = pager.get_next_page(self.page)?;
            pager.page(next)?.set_pos_begin();
            self.page = next;
        }
        let pos = pager.page(self.page)?.current_pos();
        Ok(Some((self.page, pos)))
    }

    /// Read the next record, or `None` at the end of the table.
    pub fn next_record(&mut self, pager: &mut Pager) -> DbResult<Option<Record>> {
        match self.position(pager)? {
            Some((page, _)) => Ok(Some(read_record_here(pager, page, &self.schema)?)),
            None => Ok(None),
        }
    }

    /// Skip over the record at the current position without decoding it.
    pub fn skip_record(&mut self, pager: &mut Pager) -> DbResult<()> {
        let len = self.schema.record_len();
        let page = pager.page(self.page)?;
        let pos = page.current_pos();
        page.set_current_pos(pos + len);
        Ok(())
    }

    /// Collect every remaining record.
    pub fn collect_records(mut self, pager: &mut Pager) -> DbResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record(pager)? {
            records.push(record);
        }
        Ok(records)
    }
}
