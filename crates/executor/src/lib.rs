//! Relational operators: selection, projection and natural join.
//!
//! Every operator materializes its result as a fresh on-disk table built
//! through the ordinary append path. The caller owns the result table and
//! removes it once it is done (the interpreter does so after display).

#[cfg(test)]
mod tests;

use catalog::{Catalog, Schema};
use common::{DbError, DbResult, Record};
use log::info;
use pager::{Pager, PAGE_HEADER_SIZE};
use storage::TableScan;
use types::CompareOp;

/// Mutable view of the engine state an operator runs against.
pub struct ExecutionContext<'a> {
    pub catalog: &'a mut Catalog,
    pub pager: &'a mut Pager,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(catalog: &'a mut Catalog, pager: &'a mut Pager) -> Self {
        Self { catalog, pager }
    }
}

/// Which join algorithm [`natural_join`] runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinStrategy {
    #[default]
    NestedLoop,
    BlockNestedLoop,
}

/// Select the records of `table` where `attr` compares against `val`.
///
/// `attr` must name an integer field. The relational operators keep the
/// query constant on the left (`<` selects `val > rec` and so on); `==`
/// switches to a binary search over the file, which only finds the key when
/// the file is sorted by `attr`. The matches are appended to a fresh table
/// named `tmp_tbl__<table>`, whose name is returned.
pub fn search(
    ctx: ExecutionContext<'_>,
    table: &str,
    attr: &str,
    op: CompareOp,
    val: i32,
) -> DbResult<String> {
    let ExecutionContext { catalog, pager } = ctx;

    let source = catalog
        .table(table)
        .ok_or_else(|| DbError::Executor(format!("table \"{}\" does not exist", table)))?;
    let schema = source.schema.clone();
    let num_records = source.num_records;

    let field = schema
        .field(attr)
        .ok_or_else(|| DbError::Executor(format!("\"{}\" has no \"{}\" field", table, attr)))?;
    if !field.ty.is_int() {
        return Err(DbError::Executor(format!(
            "\"{}\" is not an integer field",
            attr
        )));
    }
    let offset = field.offset;

    let res_name = format!("tmp_tbl__{}", table);
    catalog.create(schema.copy_as(res_name.as_str())?)?;

    if op.is_sorted_eq() {
        if let Some(record) = binary_search(pager, &schema, num_records, offset, val)? {
            append_to(pager, catalog, &res_name, &record)?;
        }
    } else {
        let mut scan = TableScan::begin(pager, &schema)?;
        while let Some((page, pos)) = scan.position(pager)? {
            let rec_val = pager.page(page)?.get_int_at(pos + offset)?;
            if op.matches(val, rec_val) {
                pager.page(page)?.set_current_pos(pos);
                let record = storage::read_record_here(pager, page, &schema)?;
                append_to(pager, catalog, &res_name, &record)?;
            } else {
                pager.page(page)?.set_current_pos(pos + schema.record_len());
            }
        }
    }

    info!("{}", pager.profiler());
    pager.profiler_reset();
    Ok(res_name)
}

/// Binary search by logical record index over an assumed-sorted file.
///
/// `min`, `max` and `mid` walk record byte offsets; a byte cursor maps to
/// `(block, offset)` through the number of whole records a block holds. The
/// page is fetched fresh each round rather than kept pinned across the
/// narrowing.
fn binary_search(
    pager: &mut Pager,
    schema: &Schema,
    num_records: u64,
    offset: usize,
    val: i32,
) -> DbResult<Option<Record>> {
    if num_records == 0 {
        return Ok(None);
    }
    let len = schema.record_len() as i64;
    let area = storage::records_area(schema.record_len()) as i64;

    let mut min: i64 = 0;
    let mut max: i64 = (num_records as i64 - 1) * len;
    let mut mid = (min + max) / 2;
    mid -= mid % len;

    while min <= max {
        let blk_nr = mid / area;
        let pos = (mid % area) as usize + PAGE_HEADER_SIZE;
        let page = pager.get_page(&schema.name, blk_nr)?;
        let rec_val = pager.page(page)?.get_int_at(pos + offset)?;
        if rec_val < val {
            min = mid + len;
        } else if rec_val > val {
            max = mid - len;
        } else {
            pager.page(page)?.set_current_pos(pos);
            return Ok(Some(storage::read_record_here(pager, page, schema)?));
        }
        mid = (min + max) / 2;
        mid -= mid % len;
    }
    Ok(None)
}

/// Project `table` onto the named fields, materializing the result as
/// `project__<table>_<n>`. Every name must exist in the source schema.
pub fn project(ctx: ExecutionContext<'_>, table: &str, names: &[String]) -> DbResult<String> {
    let ExecutionContext { catalog, pager } = ctx;

    let schema = catalog
        .table(table)
        .ok_or_else(|| DbError::Executor(format!("table \"{}\" does not exist", table)))?
        .schema
        .clone();

    let dest_name = catalog.temp_name("project", table);
    let dest_schema = schema.sub_schema(dest_name.as_str(), names)?;
    catalog.create(dest_schema.clone())?;

    let mut scan = TableScan::begin(pager, &schema)?;
    while let Some(record) = scan.next_record(pager)? {
        let mut values = Vec::with_capacity(dest_schema.num_fields());
        for field in dest_schema.fields() {
            let idx = source_index(&schema, &field.name)?;
            values.push(record.values[idx].clone());
        }
        append_to(pager, catalog, &dest_name, &Record::new(values))?;
    }
    Ok(dest_name)
}

/// Natural join of `left` and `right` on the first field name they share.
///
/// The join schema is all of `left`'s fields followed by `right`'s fields
/// whose names do not already appear; matches are emitted in outer-then-inner
/// order into a table named `tmp_sch`, whose name is returned.
pub fn natural_join(
    ctx: ExecutionContext<'_>,
    left: &str,
    right: &str,
    strategy: JoinStrategy,
) -> DbResult<String> {
    let ExecutionContext { catalog, pager } = ctx;

    let left_meta = catalog
        .table(left)
        .ok_or_else(|| DbError::Executor(format!("table \"{}\" does not exist", left)))?;
    let left_schema = left_meta.schema.clone();
    let left_records = left_meta.num_records;
    let right_meta = catalog
        .table(right)
        .ok_or_else(|| DbError::Executor(format!("table \"{}\" does not exist", right)))?;
    let right_schema = right_meta.schema.clone();
    let right_records = right_meta.num_records;

    let join_field = left_schema
        .fields()
        .iter()
        .find(|f| right_schema.field(&f.name).is_some())
        .ok_or_else(|| {
            DbError::Executor(format!(
                "\"{}\" and \"{}\" have no common field",
                left, right
            ))
        })?;
    let right_field = right_schema
        .field(&join_field.name)
        .ok_or_else(|| DbError::Executor("join field vanished".into()))?;
    if !join_field.ty.is_int() || !right_field.ty.is_int() {
        return Err(DbError::Executor(format!(
            "join field \"{}\" must be an integer field",
            join_field.name
        )));
    }
    let l_idx = source_index(&left_schema, &join_field.name)?;
    let r_idx = source_index(&right_schema, &join_field.name)?;

    let res_name = "tmp_sch".to_string();
    let dest_schema = left_schema.join_with(&right_schema, res_name.as_str())?;
    catalog.create(dest_schema.clone())?;

    match strategy {
        JoinStrategy::NestedLoop => nested_loop_join(
            pager,
            catalog,
            &left_schema,
            &right_schema,
            &dest_schema,
            &res_name,
            l_idx,
            r_idx,
        )?,
        JoinStrategy::BlockNestedLoop => block_nested_loop_join(
            pager,
            catalog,
            &left_schema,
            &right_schema,
            &dest_schema,
            &res_name,
            l_idx,
            r_idx,
            left_records,
            right_records,
        )?,
    }

    info!("{}", pager.profiler());
    Ok(res_name)
}

/// Record-at-a-time nested loop: the inner table is rescanned from the
/// beginning for every outer record.
#[allow(clippy::too_many_arguments)]
fn nested_loop_join(
    pager: &mut Pager,
    catalog: &mut Catalog,
    left: &Schema,
    right: &Schema,
    dest: &Schema,
    res_name: &str,
    l_idx: usize,
    r_idx: usize,
) -> DbResult<()> {
    let mut outer = TableScan::begin(pager, left)?;
    while let Some(left_rec) = outer.next_record(pager)? {
        let left_val = int_value(&left_rec, l_idx, left)?;
        let mut inner = TableScan::begin(pager, right)?;
        while let Some(right_rec) = inner.next_record(pager)? {
            if int_value(&right_rec, r_idx, right)? == left_val {
                let joined = join_records(dest, &left_rec, left, &right_rec, right)?;
                append_to(pager, catalog, res_name, &joined)?;
            }
        }
    }
    Ok(())
}

/// Block-at-a-time nested loop: blocks are addressed directly and record
/// slots probed by offset arithmetic, re-fetching the pages inside the
/// loops.
#[allow(clippy::too_many_arguments)]
fn block_nested_loop_join(
    pager: &mut Pager,
    catalog: &mut Catalog,
    left: &Schema,
    right: &Schema,
    dest: &Schema,
    res_name: &str,
    l_idx: usize,
    r_idx: usize,
    left_records: u64,
    right_records: u64,
) -> DbResult<()> {
    let len_l = left.record_len();
    let len_r = right.record_len();
    let rpb_l = storage::records_per_block(len_l);
    let rpb_r = storage::records_per_block(len_r);
    let n_blocks_l = left_records / rpb_l as u64;
    let n_blocks_r = right_records / rpb_r as u64;

    for i in 0..=n_blocks_l {
        for j in 0..=n_blocks_r {
            for x in 0..rpb_l {
                let outer_page = pager.get_page(&left.name, i as i64)?;
                let pos = PAGE_HEADER_SIZE + x * len_l;
                if pos >= pager.page(outer_page)?.free_pos() {
                    break;
                }
                pager.page(outer_page)?.set_current_pos(pos);
                let left_rec = storage::read_record_here(pager, outer_page, left)?;
                let left_val = int_value(&left_rec, l_idx, left)?;

                for y in 0..rpb_r {
                    let inner_page = pager.get_page(&right.name, j as i64)?;
                    let pos = PAGE_HEADER_SIZE + y * len_r;
                    if pos >= pager.page(inner_page)?.free_pos() {
                        break;
                    }
                    pager.page(inner_page)?.set_current_pos(pos);
                    let right_rec = storage::read_record_here(pager, inner_page, right)?;
                    if int_value(&right_rec, r_idx, right)? == left_val {
                        let joined = join_records(dest, &left_rec, left, &right_rec, right)?;
                        append_to(pager, catalog, res_name, &joined)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Assemble a joined record: the first fields come from the left record, the
/// remainder from the right one, matched by name.
fn join_records(
    dest: &Schema,
    left_rec: &Record,
    left: &Schema,
    right_rec: &Record,
    right: &Schema,
) -> DbResult<Record> {
    let mut values = Vec::with_capacity(dest.num_fields());
    for (i, field) in dest.fields().iter().enumerate() {
        let value = if i < left.num_fields() {
            left_rec.values[source_index(left, &field.name)?].clone()
        } else {
            right_rec.values[source_index(right, &field.name)?].clone()
        };
        values.push(value);
    }
    Ok(Record::new(values))
}

fn int_value(record: &Record, idx: usize, schema: &Schema) -> DbResult<i32> {
    record
        .values
        .get(idx)
        .and_then(|v| v.as_int())
        .ok_or_else(|| {
            DbError::Executor(format!(
                "record of \"{}\" has no integer at field {}",
                schema.name, idx
            ))
        })
}

fn source_index(schema: &Schema, field_name: &str) -> DbResult<usize> {
    schema.field_index(field_name).ok_or_else(|| {
        DbError::Executor(format!(
            "\"{}\" has no \"{}\" field",
            schema.name, field_name
        ))
    })
}

fn append_to(
    pager: &mut Pager,
    catalog: &mut Catalog,
    table: &str,
    record: &Record,
) -> DbResult<()> {
    let dest = catalog
        .table_mut(table)
        .ok_or_else(|| DbError::Executor(format!("result table \"{}\" vanished", table)))?;
    storage::append_record(pager, dest, record)
}
