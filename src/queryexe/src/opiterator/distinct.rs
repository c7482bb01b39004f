use super::{not_open_err, ExternalSort, OpIterator};
use common::error::c_err;
use common::{Attribute, Batch, ExecConfig, QueryError, TableSchema, Tuple};

/// Duplicate elimination.
///
/// The child is sorted on every column by an [`ExternalSort`], which brings
/// equal tuples next to each other; `next` then drops each tuple equal to the
/// one emitted before it. Output is ordered ascending on all columns.
pub struct Distinct {
    // Parameters (No need to reset on close)
    schema: TableSchema,
    page_size: usize,
    sort: ExternalSort,

    // States (Need to reset on close)
    open: bool,
    batch_size: usize,
    /// Last tuple emitted, carried across pages.
    last: Option<Tuple>,
    pending: std::vec::IntoIter<Tuple>,
}

impl Distinct {
    pub fn new(config: &ExecConfig, child: Box<dyn OpIterator>) -> Self {
        let schema = child.get_schema().clone();
        let key: Vec<usize> = (0..schema.size()).collect();
        Self {
            schema,
            page_size: config.page_size,
            sort: ExternalSort::new(config, "distinct", child, key, false),
            open: false,
            batch_size: 0,
            last: None,
            pending: Vec::new().into_iter(),
        }
    }
}

impl OpIterator for Distinct {
    fn open(&mut self) -> Result<(), QueryError> {
        if !self.open {
            self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
            self.sort.open()?;
            self.last = None;
            self.pending = Vec::new().into_iter();
            self.open = true;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Batch>, QueryError> {
        if !self.open {
            return Err(not_open_err());
        }
        let mut out = Batch::new(self.batch_size);
        while !out.is_full() {
            let tuple = match self.pending.next() {
                Some(t) => t,
                None => match self.sort.next()? {
                    Some(batch) => {
                        self.pending = batch.into_tuples().into_iter();
                        continue;
                    }
                    None => break,
                },
            };
            if self.last.as_ref() == Some(&tuple) {
                continue;
            }
            self.last = Some(tuple.clone());
            out.push(tuple)
                .map_err(|_| c_err("Distinct output page overflow"))?;
        }
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn close(&mut self) -> Result<(), QueryError> {
        self.last = None;
        self.pending = Vec::new().into_iter();
        self.open = false;
        self.sort.close()
    }

    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }

    fn is_distinct(&self) -> bool {
        true
    }

    fn order_by_list(&self) -> Vec<Attribute> {
        self.sort.order_by_list()
    }
}
