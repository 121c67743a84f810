use super::*;
use catalog::FieldDesc;
use pager::MAX_OPEN_FILES;
use tempfile::tempdir;

fn people_schema() -> Schema {
    let mut schema = Schema::new("people");
    schema.add_field(FieldDesc::int("id")).unwrap();
    schema.add_field(FieldDesc::str("name", 8)).unwrap();
    schema
}

fn person(id: i32, name: &str) -> Record {
    Record::new(vec![Value::Int(id), Value::Str(name.into())])
}

#[test]
fn build_record_checks_arity_and_types() {
    let schema = people_schema();

    assert!(build_record(&schema, vec![Value::Int(1), Value::Str("ann".into())]).is_ok());

    let err = build_record(&schema, vec![Value::Int(1)]).unwrap_err();
    assert!(err.to_string().contains("takes 2 values"));

    let err = build_record(&schema, vec![Value::Str("x".into()), Value::Str("y".into())])
        .unwrap_err();
    assert!(err.to_string().contains("not a valid"));

    // "typhoeus" is 8 bytes: no room left for the terminator.
    let err = build_record(
        &schema,
        vec![Value::Int(1), Value::Str("typhoeus".into())],
    )
    .unwrap_err();
    assert!(err.to_string().contains("does not fit"));
}

#[test]
fn append_then_scan_preserves_order() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();
    let mut table = TableMeta::new(people_schema());

    let people = vec![person(1, "ann"), person(2, "bob"), person(3, "carol")];
    for record in &people {
        append_record(&mut pager, &mut table, record).unwrap();
    }
    assert_eq!(table.num_records, 3);

    let scan = TableScan::begin(&mut pager, &table.schema).unwrap();
    let records = scan.collect_records(&mut pager).unwrap();
    assert_eq!(records, people);
}

#[test]
fn scans_cross_block_boundaries() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();
    let mut table = TableMeta::new(people_schema());

    // 12-byte records, 41 per block: 100 records span three blocks.
    let rpb = records_per_block(table.schema.record_len());
    assert_eq!(rpb, 41);
    for i in 0..100 {
        append_record(&mut pager, &mut table, &person(i, "p")).unwrap();
    }
    assert_eq!(pager.file_num_blocks("people").unwrap(), 3);

    let scan = TableScan::begin(&mut pager, &table.schema).unwrap();
    let records = scan.collect_records(&mut pager).unwrap();
    assert_eq!(records.len(), 100);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.values[0], Value::Int(i as i32));
    }
}

#[test]
fn exactly_fitting_records_leave_no_residue() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();

    // 492 / 4 = 123 slots, no padding left over.
    let mut schema = Schema::new("ints");
    schema.add_field(FieldDesc::int("k")).unwrap();
    assert_eq!(records_area(schema.record_len()), 492);
    let mut table = TableMeta::new(schema);

    let rpb = records_per_block(table.schema.record_len());
    for i in 0..rpb as i32 {
        append_record(&mut pager, &mut table, &Record::new(vec![Value::Int(i)])).unwrap();
    }
    assert_eq!(pager.file_num_blocks("ints").unwrap(), 1);

    // The next record starts a new block.
    append_record(
        &mut pager,
        &mut table,
        &Record::new(vec![Value::Int(999)]),
    )
    .unwrap();
    assert_eq!(pager.file_num_blocks("ints").unwrap(), 2);
}

#[test]
fn block_counts_follow_the_record_arithmetic() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();
    let mut table = TableMeta::new(people_schema());

    let len = table.schema.record_len() as u64;
    let area = records_area(table.schema.record_len()) as u64;
    for i in 0..90 {
        append_record(&mut pager, &mut table, &person(i, "x")).unwrap();

        let expected = (table.num_records * len).div_ceil(area).max(1);
        assert_eq!(
            pager.file_num_blocks("people").unwrap() as u64,
            expected,
            "after {} records",
            table.num_records
        );
    }
}

#[test]
fn records_survive_a_pager_restart() {
    let dir = tempdir().unwrap();
    {
        let mut pager = Pager::new(dir.path()).unwrap();
        let mut table = TableMeta::new(people_schema());
        for i in 0..50 {
            append_record(&mut pager, &mut table, &person(i, "keep")).unwrap();
        }
        pager.terminate().unwrap();
    }

    let mut pager = Pager::new(dir.path()).unwrap();
    let schema = people_schema();
    let scan = TableScan::begin(&mut pager, &schema).unwrap();
    let records = scan.collect_records(&mut pager).unwrap();
    assert_eq!(records.len(), 50);
    assert_eq!(records[49], person(49, "keep"));
}

#[test]
fn scan_of_an_empty_table_yields_nothing() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();
    let schema = people_schema();

    let mut scan = TableScan::begin(&mut pager, &schema).unwrap();
    assert_eq!(scan.next_record(&mut pager).unwrap(), None);
}

#[test]
fn position_and_skip_walk_record_boundaries() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::new(dir.path()).unwrap();
    let mut table = TableMeta::new(people_schema());
    let len = table.schema.record_len();

    for i in 0..3 {
        append_record(&mut pager, &mut table, &person(i, "s")).unwrap();
    }

    let mut scan = TableScan::begin(&mut pager, &table.schema).unwrap();
    let (_, pos0) = scan.position(&mut pager).unwrap().unwrap();
    assert_eq!(pos0, pager::PAGE_HEADER_SIZE);
    scan.skip_record(&mut pager).unwrap();

    let (page, pos1) = scan.position(&mut pager).unwrap().unwrap();
    assert_eq!(pos1, pager::PAGE_HEADER_SIZE + len);
    let record = read_record_here(&mut pager, page, &table.schema).unwrap();
    assert_eq!(record, person(1, "s"));
}

#[test]
fn many_tables_at_once() {
    let dir = tempdir().unwrap();
    let mut pager = Pager::with_capacity(dir.path(), 4, MAX_OPEN_FILES).unwrap();

    let mut tables: Vec<TableMeta> = (0..4)
        .map(|i| {
            let mut schema = Schema::new(format!("t{}", i));
            schema.add_field(FieldDesc::int("v")).unwrap();
            TableMeta::new(schema)
        })
        .collect();

    for round in 0..30 {
        for table in tables.iter_mut() {
            append_record(
                &mut pager,
                table,
                &Record::new(vec![Value::Int(round)]),
            )
            .unwrap();
        }
    }

    for table in &tables {
        let scan = TableScan::begin(&mut pager, &table.schema).unwrap();
        let records = scan.collect_records(&mut pager).unwrap();
        assert_eq!(records.len(), 30);
    }
}
