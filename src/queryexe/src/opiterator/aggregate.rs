use super::{not_open_err, OpIterator};
use crate::run_file::{RunReader, RunWriter};
use common::error::c_err;
use common::{AggOp, Attribute, Batch, DataType, ExecConfig, Field, QueryError, TableSchema, Tuple};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tempfile::TempDir;

/// One output column of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggColumn {
    /// Column of the child passed through unchanged.
    Plain(usize),
    /// Aggregate over a column of the child.
    Agg(AggOp, usize),
}

/// Running value of one aggregate column.
#[derive(Debug, Clone)]
struct AggState {
    op: AggOp,
    col: usize,
    /// Non-null values seen.
    count: i64,
    /// Current MIN, MAX or SUM.
    value: Option<Field>,
    /// Running sum for AVG.
    total: f64,
}

impl AggState {
    fn new(op: AggOp, col: usize) -> Self {
        Self {
            op,
            col,
            count: 0,
            value: None,
            total: 0.0,
        }
    }

    fn merge_field(&mut self, field: &Field) -> Result<(), QueryError> {
        if field.is_null() {
            return Ok(());
        }
        self.count += 1;
        match self.op {
            AggOp::Count => {}
            // Strict comparisons keep the first value seen among equals.
            AggOp::Min => {
                if self.value.as_ref().map_or(true, |v| field < v) {
                    self.value = Some(field.clone());
                }
            }
            AggOp::Max => {
                if self.value.as_ref().map_or(true, |v| field > v) {
                    self.value = Some(field.clone());
                }
            }
            AggOp::Sum => {
                self.value = Some(match self.value.take() {
                    None => field.clone(),
                    Some(v) => (v + field.clone())?,
                });
            }
            AggOp::Avg => {
                self.total += field
                    .as_f64()
                    .ok_or_else(|| c_err(&format!("Cannot average {}", field)))?;
            }
        }
        Ok(())
    }

    fn finish(&self) -> Field {
        match self.op {
            AggOp::Count => Field::Int(self.count),
            AggOp::Avg if self.count == 0 => Field::Null,
            AggOp::Avg => Field::Float(self.total / self.count as f64),
            _ => self.value.clone().unwrap_or(Field::Null),
        }
    }
}

/// Aggregate operator without grouping.
///
/// A query made only of aggregates yields a single row. When plain columns
/// are mixed in, every input tuple yields a row made of its plain columns and
/// the aggregates over the whole input. The input is spooled to a run file
/// while the aggregates are computed and replayed by `next`, so memory holds
/// one page at a time. An empty input yields no rows.
pub struct Aggregate {
    // Parameters (No need to reset on close)
    /// Output schema, one attribute per column in order.
    schema: TableSchema,
    columns: Vec<AggColumn>,
    child: Box<dyn OpIterator>,
    page_size: usize,
    temp_root: PathBuf,

    // States (Need to reset on close)
    open: bool,
    batch_size: usize,
    /// Tuples per page of the spooled input.
    spool_capacity: usize,
    workdir: Option<TempDir>,
    spool: Option<RunReader>,
    /// Input tuples of the spool page being replayed.
    pending: std::vec::IntoIter<Tuple>,
    /// Final aggregate values, in the order of the `Agg` columns.
    results: Vec<Field>,
    /// Input tuples consumed by the last open.
    input_count: usize,
    /// Whether the single row of a pure aggregate was emitted.
    emitted: bool,
}

impl Aggregate {
    pub fn new(
        config: &ExecConfig,
        columns: Vec<AggColumn>,
        child: Box<dyn OpIterator>,
    ) -> Result<Self, QueryError> {
        if columns.is_empty() {
            return Err(QueryError::ValidationError(
                "Aggregate needs at least one output column".to_string(),
            ));
        }
        let child_schema = child.get_schema();
        let mut attrs = Vec::with_capacity(columns.len());
        for column in &columns {
            let i = match column {
                AggColumn::Plain(i) | AggColumn::Agg(_, i) => *i,
            };
            let attr = child_schema.get_attribute(i).ok_or_else(|| {
                QueryError::ValidationError(format!(
                    "Aggregate column {} out of range for {}",
                    i, child_schema
                ))
            })?;
            attrs.push(match column {
                AggColumn::Plain(_) => attr.clone(),
                AggColumn::Agg(op, _) => {
                    let dtype = match op {
                        AggOp::Count => DataType::Int,
                        AggOp::Avg => DataType::Float,
                        _ => attr.dtype().clone(),
                    };
                    Attribute::new_agg(&attr.table, &attr.column, dtype, *op)
                }
            });
        }
        Ok(Self {
            schema: TableSchema::new(attrs),
            columns,
            child,
            page_size: config.page_size,
            temp_root: config.temp_dir.clone(),
            open: false,
            batch_size: 0,
            spool_capacity: 0,
            workdir: None,
            spool: None,
            pending: Vec::new().into_iter(),
            results: Vec::new(),
            input_count: 0,
            emitted: false,
        })
    }

    /// Whether every output column is an aggregate.
    pub fn is_pure(&self) -> bool {
        self.columns
            .iter()
            .all(|c| matches!(c, AggColumn::Agg(_, _)))
    }

    fn check_types(&self) -> Result<(), QueryError> {
        let child_schema = self.child.get_schema();
        for column in &self.columns {
            if let AggColumn::Agg(op @ (AggOp::Sum | AggOp::Avg), i) = column {
                let attr = child_schema
                    .get_attribute(*i)
                    .ok_or_else(|| c_err("Aggregate column vanished from child schema"))?;
                if !attr.dtype().is_numeric() {
                    return Err(QueryError::ValidationError(format!(
                        "{} is not defined over {} of type {}",
                        op,
                        attr.name(),
                        attr.dtype()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drain the child into the aggregate states, spooling its tuples when
    /// the output needs them again.
    fn consume_input(&mut self) -> Result<(), QueryError> {
        let mut states: Vec<AggState> = self
            .columns
            .iter()
            .filter_map(|c| match c {
                AggColumn::Agg(op, i) => Some(AggState::new(*op, *i)),
                AggColumn::Plain(_) => None,
            })
            .collect();
        let mut writer = if self.is_pure() {
            None
        } else {
            let dir = tempfile::Builder::new()
                .prefix("aggregate-")
                .tempdir_in(&self.temp_root)?;
            let writer = RunWriter::create(&dir.path().join("aggregate-spool"))?;
            self.workdir = Some(dir);
            Some(writer)
        };
        let mut page = Batch::new(self.spool_capacity);

        self.input_count = 0;
        while let Some(batch) = self.child.next()? {
            for tuple in batch {
                for state in states.iter_mut() {
                    let field = tuple
                        .get_field(state.col)
                        .ok_or_else(|| c_err("Tuple shorter than child schema"))?;
                    state.merge_field(field)?;
                }
                self.input_count += 1;
                if let Some(writer) = writer.as_mut() {
                    page.push(tuple)
                        .map_err(|_| c_err("Aggregate spool page overflow"))?;
                    if page.is_full() {
                        writer.write_batch(&page)?;
                        page.clear();
                    }
                }
            }
        }
        if let Some(mut writer) = writer {
            writer.write_batch(&page)?;
            let path = writer.finish()?;
            self.spool = Some(RunReader::open(&path, self.spool_capacity)?);
        }
        self.results = states.iter().map(AggState::finish).collect();
        Ok(())
    }

    fn output_row(&self, tuple: Option<&Tuple>) -> Result<Tuple, QueryError> {
        let mut aggs = self.results.iter();
        let mut fields = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let field = match column {
                AggColumn::Plain(i) => tuple
                    .and_then(|t| t.get_field(*i))
                    .cloned()
                    .ok_or_else(|| c_err("Missing plain column for aggregate row"))?,
                AggColumn::Agg(_, _) => aggs
                    .next()
                    .cloned()
                    .ok_or_else(|| c_err("Missing aggregate value"))?,
            };
            fields.push(field);
        }
        Ok(Tuple::new(fields))
    }

    fn release(&mut self) -> Result<(), QueryError> {
        self.spool = None;
        self.pending = Vec::new().into_iter();
        self.results.clear();
        if let Some(dir) = self.workdir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl OpIterator for Aggregate {
    fn open(&mut self) -> Result<(), QueryError> {
        if self.open {
            return Ok(());
        }
        self.check_types()?;
        self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
        self.spool_capacity =
            Batch::capacity_for(self.page_size, self.child.get_schema().tuple_size())?;
        self.child.open()?;
        if let Err(e) = self.consume_input() {
            error!("aggregate failed while reading its input: {}", e);
            let _ = self.release();
            return Err(e);
        }
        debug!(
            "aggregate consumed {} tuples: {:?}",
            self.input_count, self.results
        );
        self.emitted = false;
        self.open = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Batch>, QueryError> {
        if !self.open {
            return Err(not_open_err());
        }
        if self.input_count == 0 {
            return Ok(None);
        }
        let mut out = Batch::new(self.batch_size);
        if self.is_pure() {
            if !self.emitted {
                self.emitted = true;
                out.push(self.output_row(None)?)
                    .map_err(|_| c_err("Aggregate output page overflow"))?;
            }
        } else {
            while !out.is_full() {
                match self.pending.next() {
                    Some(tuple) => {
                        let row = self.output_row(Some(&tuple))?;
                        out.push(row)
                            .map_err(|_| c_err("Aggregate output page overflow"))?;
                    }
                    None => {
                        let batch = match self.spool.as_mut() {
                            Some(reader) => reader.next_batch()?,
                            None => None,
                        };
                        match batch {
                            Some(batch) => self.pending = batch.into_tuples().into_iter(),
                            None => break,
                        }
                    }
                }
            }
        }
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn close(&mut self) -> Result<(), QueryError> {
        let released = self.release();
        self.input_count = 0;
        self.emitted = false;
        self.open = false;
        self.child.close()?;
        released
    }

    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }
}
