use super::*;
use catalog::FieldDesc;
use tempfile::{tempdir, TempDir};
use types::Value;

struct TestDb {
    _dir: TempDir,
    catalog: Catalog,
    pager: Pager,
}

impl TestDb {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let pager = Pager::new(dir.path()).unwrap();
        Self {
            _dir: dir,
            catalog: Catalog::new(),
            pager,
        }
    }

    fn ctx(&mut self) -> ExecutionContext<'_> {
        ExecutionContext::new(&mut self.catalog, &mut self.pager)
    }

    fn create(&mut self, schema: Schema) {
        self.catalog.create(schema).unwrap();
    }

    fn insert(&mut self, table: &str, values: Vec<Value>) {
        let meta = self.catalog.table_mut(table).unwrap();
        let record = storage::build_record(&meta.schema, values).unwrap();
        storage::append_record(&mut self.pager, meta, &record).unwrap();
    }

    fn records(&mut self, table: &str) -> Vec<Record> {
        let schema = self.catalog.table(table).unwrap().schema.clone();
        let scan = TableScan::begin(&mut self.pager, &schema).unwrap();
        scan.collect_records(&mut self.pager).unwrap()
    }

    /// Drop a result table the way the interpreter would: unlink the
    /// metadata, close the file and get its data out of the way.
    fn drop_table(&mut self, name: &str) {
        self.catalog.remove(name).unwrap();
        self.pager.close_file(name).unwrap();
        let _ = std::fs::remove_file(self._dir.path().join(name));
    }
}

fn people_schema() -> Schema {
    let mut schema = Schema::new("t");
    schema.add_field(FieldDesc::int("id")).unwrap();
    schema.add_field(FieldDesc::str("name", 8)).unwrap();
    schema
}

fn people_db() -> TestDb {
    let mut db = TestDb::new();
    db.create(people_schema());
    db.insert("t", vec![Value::Int(1), Value::Str("ann".into())]);
    db.insert("t", vec![Value::Int(2), Value::Str("bob".into())]);
    db
}

#[test]
fn search_eq_selects_matching_records() {
    let mut db = people_db();

    let res = search(db.ctx(), "t", "id", CompareOp::Eq, 2).unwrap();
    assert_eq!(res, "tmp_tbl__t");
    let records = db.records(&res);
    assert_eq!(
        records,
        vec![Record::new(vec![Value::Int(2), Value::Str("bob".into())])]
    );
}

#[test]
fn relational_ops_keep_the_constant_on_the_left() {
    let mut db = people_db();

    // `id > 1`: matches records where 1 < rec.
    let res = search(db.ctx(), "t", "id", CompareOp::Gt, 1).unwrap();
    assert_eq!(db.records(&res).len(), 1);
    assert_eq!(db.records(&res)[0].values[0], Value::Int(2));
    db.drop_table(&res);

    // `id < 2`: matches records where 2 > rec.
    let res = search(db.ctx(), "t", "id", CompareOp::Lt, 2).unwrap();
    assert_eq!(db.records(&res).len(), 1);
    assert_eq!(db.records(&res)[0].values[0], Value::Int(1));
    db.drop_table(&res);

    let res = search(db.ctx(), "t", "id", CompareOp::Ne, 1).unwrap();
    assert_eq!(db.records(&res).len(), 1);
    db.drop_table(&res);

    let res = search(db.ctx(), "t", "id", CompareOp::Ge, 1).unwrap();
    assert_eq!(db.records(&res).len(), 2);
}

#[test]
fn search_requires_an_integer_field() {
    let mut db = people_db();

    let err = search(db.ctx(), "t", "name", CompareOp::Eq, 1).unwrap_err();
    assert!(err.to_string().contains("not an integer field"));

    let err = search(db.ctx(), "t", "salary", CompareOp::Eq, 1).unwrap_err();
    assert!(err.to_string().contains("no \"salary\" field"));

    let err = search(db.ctx(), "missing", "id", CompareOp::Eq, 1).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn sorted_search_finds_keys_across_blocks() {
    let mut db = TestDb::new();
    let mut schema = Schema::new("s");
    schema.add_field(FieldDesc::int("k")).unwrap();
    db.create(schema);
    // 123 records per block: 1000 records span 9 blocks.
    for k in 0..1000 {
        db.insert("s", vec![Value::Int(k)]);
    }

    for probe in [0, 122, 123, 499, 999] {
        let res = search(db.ctx(), "s", "k", CompareOp::SortedEq, probe).unwrap();
        let records = db.records(&res);
        assert_eq!(records, vec![Record::new(vec![Value::Int(probe)])]);
        db.drop_table(&res);
    }

    // A key that is not there comes back empty.
    let res = search(db.ctx(), "s", "k", CompareOp::SortedEq, 5000).unwrap();
    assert!(db.records(&res).is_empty());
}

#[test]
fn sorted_search_reads_logarithmically_many_blocks() {
    let mut db = TestDb::new();
    let mut schema = Schema::new("s");
    schema.add_field(FieldDesc::int("k")).unwrap();
    db.create(schema.clone());
    // 82 blocks of sorted integers.
    for k in 0..10_000 {
        db.insert("s", vec![Value::Int(k)]);
    }
    db.pager.terminate().unwrap();

    db.pager.profiler_reset();
    let record = binary_search(&mut db.pager, &schema, 10_000, 0, 4242)
        .unwrap()
        .unwrap();
    assert_eq!(record.values[0], Value::Int(4242));

    let reads = db.pager.profiler().disk_reads();
    assert!(
        reads <= 20,
        "expected O(log n) disk reads over 82 blocks, got {}",
        reads
    );
}

#[test]
fn sorted_search_may_miss_on_unsorted_files() {
    let mut db = TestDb::new();
    let mut schema = Schema::new("u");
    schema.add_field(FieldDesc::int("k")).unwrap();
    db.create(schema);
    for k in [1, 5, 0] {
        db.insert("u", vec![Value::Int(k)]);
    }

    // 0 is present, but the probe halves away from it.
    let res = search(db.ctx(), "u", "k", CompareOp::SortedEq, 0).unwrap();
    assert!(db.records(&res).is_empty());
}

#[test]
fn project_reorders_and_drops_fields() {
    let mut db = people_db();

    let res = project(db.ctx(), "t", &["name".to_string(), "id".to_string()]).unwrap();
    assert_eq!(res, "project__t_0");
    let records = db.records(&res);
    assert_eq!(
        records,
        vec![
            Record::new(vec![Value::Str("ann".into()), Value::Int(1)]),
            Record::new(vec![Value::Str("bob".into()), Value::Int(2)]),
        ]
    );
}

#[test]
fn projecting_every_field_reproduces_the_table() {
    let mut db = people_db();

    let names = db.catalog.table("t").unwrap().schema.field_names();
    let res = project(db.ctx(), "t", &names).unwrap();
    assert_eq!(db.records(&res), db.records("t"));
}

#[test]
fn project_rejects_unknown_fields() {
    let mut db = people_db();
    let err = project(db.ctx(), "t", &["nope".to_string()]).unwrap_err();
    assert!(err.to_string().contains("no \"nope\" field"));
    // The failed projection left no result table behind.
    assert!(db.catalog.table("project__t_0").is_none());
}

#[test]
fn repeated_projections_get_fresh_names() {
    let mut db = people_db();
    let first = project(db.ctx(), "t", &["id".to_string()]).unwrap();
    let second = project(db.ctx(), "t", &["id".to_string()]).unwrap();
    assert_eq!(first, "project__t_0");
    assert_eq!(second, "project__t_1");
}

fn ages_schema() -> Schema {
    let mut schema = Schema::new("u");
    schema.add_field(FieldDesc::int("id")).unwrap();
    schema.add_field(FieldDesc::int("age")).unwrap();
    schema
}

#[test]
fn natural_join_matches_on_the_first_common_field() {
    let mut db = people_db();
    db.create(ages_schema());
    db.insert("u", vec![Value::Int(1), Value::Int(30)]);
    db.insert("u", vec![Value::Int(2), Value::Int(40)]);

    let res = natural_join(db.ctx(), "t", "u", JoinStrategy::NestedLoop).unwrap();
    assert_eq!(res, "tmp_sch");

    let schema = db.catalog.table(&res).unwrap().schema.clone();
    assert_eq!(schema.field_names(), vec!["id", "name", "age"]);

    let records = db.records(&res);
    assert_eq!(
        records,
        vec![
            Record::new(vec![
                Value::Int(1),
                Value::Str("ann".into()),
                Value::Int(30)
            ]),
            Record::new(vec![
                Value::Int(2),
                Value::Str("bob".into()),
                Value::Int(40)
            ]),
        ]
    );
}

#[test]
fn block_nested_loop_join_agrees_with_nested_loop() {
    let mut build = || {
        let mut db = TestDb::new();
        db.create(people_schema());
        db.create(ages_schema());
        // Three blocks on the left, two on the right.
        for i in 0..100 {
            db.insert("t", vec![Value::Int(i % 60), Value::Str("p".into())]);
        }
        for i in 0..120 {
            db.insert("u", vec![Value::Int(i % 70), Value::Int(i)]);
        }
        db
    };

    let mut nl_db = build();
    let nl_res = natural_join(nl_db.ctx(), "t", "u", JoinStrategy::NestedLoop).unwrap();
    let mut nl_records = nl_db.records(&nl_res);

    let mut bnl_db = build();
    let bnl_res = natural_join(bnl_db.ctx(), "t", "u", JoinStrategy::BlockNestedLoop).unwrap();
    let mut bnl_records = bnl_db.records(&bnl_res);

    assert!(!nl_records.is_empty());
    // The two strategies emit the same matches, in their own orders.
    let key = |r: &Record| format!("{:?}", r.values);
    nl_records.sort_by_key(key);
    bnl_records.sort_by_key(key);
    assert_eq!(nl_records, bnl_records);
}

#[test]
fn join_emits_outer_then_inner_order() {
    let mut db = people_db();
    db.create(ages_schema());
    // Two matches for id 1, in insertion order.
    db.insert("u", vec![Value::Int(1), Value::Int(30)]);
    db.insert("u", vec![Value::Int(2), Value::Int(40)]);
    db.insert("u", vec![Value::Int(1), Value::Int(50)]);

    let res = natural_join(db.ctx(), "t", "u", JoinStrategy::NestedLoop).unwrap();
    let records = db.records(&res);
    let ages: Vec<Value> = records.iter().map(|r| r.values[2].clone()).collect();
    assert_eq!(ages, vec![Value::Int(30), Value::Int(50), Value::Int(40)]);
}

#[test]
fn join_requires_a_common_integer_field() {
    let mut db = people_db();

    let mut other = Schema::new("v");
    other.add_field(FieldDesc::int("salary")).unwrap();
    db.create(other);
    let err = natural_join(db.ctx(), "t", "v", JoinStrategy::NestedLoop).unwrap_err();
    assert!(err.to_string().contains("no common field"));

    let mut named = Schema::new("w");
    named.add_field(FieldDesc::str("name", 8)).unwrap();
    db.create(named);
    let err = natural_join(db.ctx(), "t", "w", JoinStrategy::NestedLoop).unwrap_err();
    assert!(err.to_string().contains("must be an integer field"));
}

#[test]
fn join_with_an_empty_side_is_empty() {
    let mut db = people_db();
    db.create(ages_schema());

    let res = natural_join(db.ctx(), "t", "u", JoinStrategy::NestedLoop).unwrap();
    assert!(db.records(&res).is_empty());
}
