use super::{not_open_err, OpIterator};
use common::error::c_err;
use common::{Batch, QueryError, TableSchema, Tuple};

/// Projection operator.
pub struct Project {
    // Parameters (No need to reset on close)
    schema: TableSchema,
    /// Positions of the kept columns in the child schema, in output order.
    fields: Vec<usize>,
    page_size: usize,
    child: Box<dyn OpIterator>,

    // States (Need to reset on close)
    open: bool,
    batch_size: usize,
    /// Projected tuples of the last child page not yet emitted.
    pending: std::vec::IntoIter<Tuple>,
}

impl Project {
    /// Keep `fields` of every child tuple. Output pages are sized for the
    /// projected schema, so they may hold more tuples than the child's.
    pub fn new(
        fields: Vec<usize>,
        page_size: usize,
        child: Box<dyn OpIterator>,
    ) -> Result<Self, QueryError> {
        let child_schema = child.get_schema();
        if fields.is_empty() {
            return Err(QueryError::ValidationError(
                "Projection needs at least one column".to_string(),
            ));
        }
        if let Some(i) = fields.iter().find(|i| **i >= child_schema.size()) {
            return Err(QueryError::ValidationError(format!(
                "Projected column {} out of range for {}",
                i, child_schema
            )));
        }
        let schema = child_schema.sub_schema(&fields);
        Ok(Self {
            schema,
            fields,
            page_size,
            child,
            open: false,
            batch_size: 0,
            pending: Vec::new().into_iter(),
        })
    }
}

impl OpIterator for Project {
    fn open(&mut self) -> Result<(), QueryError> {
        if !self.open {
            self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
            self.child.open()?;
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
            match self.pending.next() {
                Some(t) => out
                    .push(t)
                    .map_err(|_| c_err("Projection output page overflow"))?,
                None => match self.child.next()? {
                    Some(batch) => {
                        let projected: Vec<Tuple> =
                            batch.iter().map(|t| t.project(&self.fields)).collect();
                        self.pending = projected.into_iter();
                    }
                    None => break,
                },
            }
        }
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn close(&mut self) -> Result<(), QueryError> {
        self.pending = Vec::new().into_iter();
        self.open = false;
        self.child.close()
    }

    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }
}
