use crate::opiterator::{OpIterator, TupleIterator};
use common::datatypes::{f_int, f_str};
use common::{Attribute, DataType, ExecConfig, QueryError, TableSchema, Tuple};
use std::cmp::Ordering;
use tempfile::TempDir;

/// Opens the iterator and drains it, flattening the batches.
pub fn execute_iter(iter: &mut dyn OpIterator, sorted: bool) -> Result<Vec<Tuple>, QueryError> {
    let mut tuples = Vec::new();
    iter.open()?;
    while let Some(batch) = iter.next()? {
        tuples.extend(batch);
    }
    if sorted {
        tuples.sort_by(|a, b| a.field_vals.cmp(&b.field_vals));
    }
    Ok(tuples)
}

/// Configuration whose run files live in a fresh directory. Keep the
/// returned `TempDir` alive for as long as the operators run.
pub fn test_config(page_size: usize, num_buffers: usize) -> (ExecConfig, TempDir) {
    common::testutil::init();
    let dir = tempfile::tempdir().unwrap();
    let config = ExecConfig::new(page_size, num_buffers, dir.path().to_path_buf());
    (config, dir)
}

/// Number of entries left under `dir`, used to check that run files are gone.
pub fn count_dir_entries(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

pub fn tuple_source(tuples: Vec<Tuple>, schema: TableSchema, page_size: usize) -> Box<dyn OpIterator> {
    Box::new(TupleIterator::new(tuples, schema, page_size))
}

/// In-memory stable sort used as an oracle for the external sort.
pub fn sort_oracle(mut tuples: Vec<Tuple>, key: &[usize], descending: bool) -> Vec<Tuple> {
    tuples.sort_by(|a, b| Tuple::compare_directed(a, b, key, key, descending));
    tuples
}

/// Nested-loop equi-join used as an oracle for the sort-merge join.
pub fn join_oracle(
    left: &[Tuple],
    right: &[Tuple],
    left_key: &[usize],
    right_key: &[usize],
) -> Vec<Tuple> {
    let mut out = Vec::new();
    for l in left {
        for r in right {
            if Tuple::compare(l, r, left_key, right_key) == Ordering::Equal {
                out.push(l.merge(r));
            }
        }
    }
    out.sort_by(|a, b| a.field_vals.cmp(&b.field_vals));
    out
}

#[allow(dead_code)]
pub struct TestTuples {
    pub schema: TableSchema,
    pub tuples: Vec<Tuple>,
}

impl TestTuples {
    #[allow(dead_code)]
    pub fn new(table_name: &str) -> Self {
        // Creates a vector of tuples to create the following table:
        //
        // 1 1 3 E
        // 2 1 3 G
        // 3 1 4 A
        // 4 2 4 G
        // 5 2 5 G
        // 6 2 5 G
        let tuples = vec![
            Tuple::new(vec![f_int(1), f_int(1), f_int(3), f_str("E")]),
            Tuple::new(vec![f_int(2), f_int(1), f_int(3), f_str("G")]),
            Tuple::new(vec![f_int(3), f_int(1), f_int(4), f_str("A")]),
            Tuple::new(vec![f_int(4), f_int(2), f_int(4), f_str("G")]),
            Tuple::new(vec![f_int(5), f_int(2), f_int(5), f_str("G")]),
            Tuple::new(vec![f_int(6), f_int(2), f_int(5), f_str("G")]),
        ];

        let schema = TableSchema::new(vec![
            Attribute::new(table_name, "a", DataType::Int),
            Attribute::new(table_name, "b", DataType::Int),
            Attribute::new(table_name, "c", DataType::Int),
            Attribute::new(table_name, "d", DataType::String(4)),
        ]);

        Self { schema, tuples }
    }
}
