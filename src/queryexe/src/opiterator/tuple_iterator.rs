use super::{not_open_err, OpIterator};
use common::{Batch, QueryError, TableSchema, Tuple};

/// Iterator over a Vec of tuples, emitting them a page at a time. Stands in
/// for a table scan in pipelines and tests.
pub struct TupleIterator {
    // Parameters (No need to reset on close)
    /// Schema of the output.
    schema: TableSchema,
    /// Tuples to iterate over.
    tuples: Vec<Tuple>,
    page_size: usize,

    // States (Need to reset on close)
    open: bool,
    /// Tuples per output page, set on open.
    batch_size: usize,
    /// Next tuple to emit.
    index: usize,
}

impl TupleIterator {
    /// Create a new tuple iterator over a set of results.
    ///
    /// # Arguments
    ///
    /// * `tuples` - Tuples to iterate over.
    /// * `schema` - Schema of the output results.
    /// * `page_size` - Page size in bytes, which bounds every output batch.
    pub fn new(tuples: Vec<Tuple>, schema: TableSchema, page_size: usize) -> Self {
        Self {
            schema,
            tuples,
            page_size,
            open: false,
            batch_size: 0,
            index: 0,
        }
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> Result<(), QueryError> {
        if !self.open {
            self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
            self.index = 0;
            self.open = true;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Batch>, QueryError> {
        if !self.open {
            return Err(not_open_err());
        }
        if self.index >= self.tuples.len() {
            return Ok(None);
        }
        let end = (self.index + self.batch_size).min(self.tuples.len());
        let batch = Batch::from_tuples(self.batch_size, self.tuples[self.index..end].to_vec())?;
        self.index = end;
        Ok(Some(batch))
    }

    fn close(&mut self) -> Result<(), QueryError> {
        self.index = 0;
        self.open = false;
        Ok(())
    }

    /// Returns the schema of the tuples.
    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{execute_iter, TestTuples};

    fn get_iter(page_size: usize) -> Box<dyn OpIterator> {
        let setup = TestTuples::new("");
        Box::new(TupleIterator::new(setup.tuples, setup.schema, page_size))
    }

    mod tuple_iterator_test {
        use super::*;

        #[test]
        fn test_tuple_iterator() {
            let mut iter = get_iter(64);
            let tuples = execute_iter(&mut *iter, false).unwrap();
            let expected = TestTuples::new("");
            assert_eq!(tuples, expected.tuples);
        }

        #[test]
        fn test_batches_are_page_bounded() {
            // 4 + 4 + 4 + 4 bytes per tuple, 2 tuples per 40 byte page.
            let mut iter = get_iter(40);
            iter.open().unwrap();
            let mut sizes = Vec::new();
            while let Some(batch) = iter.next().unwrap() {
                assert_eq!(batch.capacity(), 2);
                sizes.push(batch.len());
            }
            assert_eq!(sizes, vec![2, 2, 2]);
        }

        #[test]
        fn test_tuple_wider_than_page() {
            let mut iter = get_iter(8);
            assert!(matches!(iter.open(), Err(QueryError::ConfigError(_))));
        }
    }

    mod opiterator_test {
        use super::*;

        #[test]
        fn test_next_not_open() {
            let mut iter = get_iter(64);
            assert!(iter.next().is_err());
        }

        #[test]
        fn test_open() {
            let mut iter = get_iter(64);
            iter.open().unwrap();
        }

        #[test]
        fn test_close() {
            let mut iter = get_iter(64);
            iter.open().unwrap();
            iter.close().unwrap();
            iter.close().unwrap();
        }

        #[test]
        fn test_next_after_end() {
            let mut iter = get_iter(64);
            execute_iter(&mut *iter, false).unwrap();
            assert_eq!(iter.next().unwrap(), None);
            assert_eq!(iter.next().unwrap(), None);
        }

        #[test]
        fn test_reopen_after_close() {
            let mut iter = get_iter(64);
            let t_before = execute_iter(&mut *iter, false).unwrap();
            iter.close().unwrap();
            let t_after = execute_iter(&mut *iter, false).unwrap();
            assert_eq!(t_before, t_after);
        }
    }
}
