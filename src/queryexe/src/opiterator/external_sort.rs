use super::{not_open_err, OpIterator};
use crate::run_file::{write_run, RunReader, RunWriter};
use common::config::validate_buffers;
use common::error::c_err;
use common::{Attribute, Batch, Block, ExecConfig, Field, QueryError, TableSchema, Tuple};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Counters describing how a sort used its buffers.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortStats {
    /// Sorted runs written by run generation.
    pub initial_runs: usize,
    /// Merge passes needed to reduce them to one run.
    pub merge_passes: usize,
    /// Largest number of runs merged at once.
    pub max_fan_in: usize,
    /// Largest block held in memory during run generation, in pages.
    pub max_block_pages: usize,
    /// Runs written by merge passes.
    pub merged_runs: usize,
}

/// External merge sort.
///
/// `open` reads the whole child, writes sorted runs of at most `num_buffers`
/// pages and merges them, `num_buffers - 1` at a time, until a single run is
/// left. `next` then streams that run back one page at a time.
///
/// Keys are compared with [`Tuple::compare`], so each key position must hold
/// a single type across the input.
pub struct ExternalSort {
    // Parameters (No need to reset on close)
    schema: TableSchema,
    child: Box<dyn OpIterator>,
    /// Positions of the sort key, outermost first.
    key: Vec<usize>,
    descending: bool,
    num_buffers: usize,
    page_size: usize,
    temp_root: PathBuf,
    /// Prefix of every file this sort creates.
    label: String,

    // States (Need to reset on close)
    open: bool,
    batch_size: usize,
    /// Private directory holding the runs of this instance.
    workdir: Option<TempDir>,
    /// Runs that exist on disk and are owned by this sort.
    runs: Vec<PathBuf>,
    /// Reader over the final run.
    reader: Option<RunReader>,
    stats: SortStats,
}

impl ExternalSort {
    /// Create a new external sort.
    ///
    /// # Arguments
    ///
    /// * `config` - Page size, buffer budget and temp directory to use.
    /// * `label` - Prefix of the run files, e.g. "left" or "right".
    /// * `child` - Operator producing the tuples to sort.
    /// * `key` - Positions of the sort key in the child schema.
    /// * `descending` - Sort in descending order.
    pub fn new(
        config: &ExecConfig,
        label: &str,
        child: Box<dyn OpIterator>,
        key: Vec<usize>,
        descending: bool,
    ) -> Self {
        Self {
            schema: child.get_schema().clone(),
            child,
            key,
            descending,
            num_buffers: config.num_buffers,
            page_size: config.page_size,
            temp_root: config.temp_dir.clone(),
            label: label.to_string(),
            open: false,
            batch_size: 0,
            workdir: None,
            runs: Vec::new(),
            reader: None,
            stats: SortStats::default(),
        }
    }

    /// Statistics of the last `open`.
    pub fn stats(&self) -> &SortStats {
        &self.stats
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        Tuple::compare_directed(a, b, &self.key, &self.key, self.descending)
    }

    fn run_path(&self, name: &str) -> Result<PathBuf, QueryError> {
        self.workdir
            .as_ref()
            .map(|dir| dir.path().join(name))
            .ok_or_else(|| c_err("Sort working directory is not set up"))
    }

    /// Fill blocks of `num_buffers` pages from the child and write each one
    /// as a sorted run.
    fn generate_runs(&mut self) -> Result<(), QueryError> {
        let mut block = Block::new(self.num_buffers, self.batch_size);
        let mut page = Batch::new(self.batch_size);
        while let Some(batch) = self.child.next()? {
            if batch.is_empty() {
                break;
            }
            for tuple in batch {
                page.push(tuple).map_err(|_| c_err("Sort page overflow"))?;
                if page.is_full() {
                    let full = std::mem::replace(&mut page, Batch::new(self.batch_size));
                    block
                        .add_batch(full)
                        .map_err(|_| c_err("Sort block overflow"))?;
                    if block.is_full() {
                        let full = std::mem::replace(
                            &mut block,
                            Block::new(self.num_buffers, self.batch_size),
                        );
                        self.write_sorted_run(full)?;
                    }
                }
            }
        }
        if !page.is_empty() {
            block
                .add_batch(page)
                .map_err(|_| c_err("Sort block overflow"))?;
        }
        if !block.is_empty() {
            self.write_sorted_run(block)?;
        }
        if self.runs.is_empty() {
            // Empty input still ends with exactly one (empty) run.
            let path = self.run_path(&format!("{}-run-0", self.label))?;
            write_run(&path, &Vec::<Batch>::new())?;
            self.runs.push(path);
        }
        Ok(())
    }

    fn write_sorted_run(&mut self, block: Block) -> Result<(), QueryError> {
        self.stats.max_block_pages = self.stats.max_block_pages.max(block.num_batches());
        let mut tuples = block.into_tuples();
        tuples.sort_by(|a, b| self.compare(a, b));
        let sorted = Block::from_sorted(self.num_buffers, self.batch_size, tuples)?;

        let path = self.run_path(&format!("{}-run-{}", self.label, self.runs.len() + 1))?;
        write_run(&path, sorted.batches())?;
        debug!(
            "{}: wrote run {} with {} tuples in {} pages",
            self.label,
            path.display(),
            sorted.tuple_count(),
            sorted.num_batches()
        );
        self.runs.push(path);
        self.stats.initial_runs += 1;
        Ok(())
    }

    /// Merge runs in groups of `num_buffers - 1` until one run is left.
    fn merge_runs(&mut self) -> Result<(), QueryError> {
        let fan_in = self.num_buffers - 1;
        let mut pass = 0;
        while self.runs.len() > 1 {
            pass += 1;
            let inputs = std::mem::take(&mut self.runs);
            trace!(
                "{}: merge pass {} over {} runs",
                self.label,
                pass,
                inputs.len()
            );
            let groups: Vec<&[PathBuf]> = inputs.chunks(fan_in).collect();
            for (group_no, group) in groups.iter().enumerate() {
                if group.len() == 1 {
                    // A lone run is already sorted; it moves to the next pass as is.
                    self.runs.extend(group.iter().cloned());
                    continue;
                }
                let res = self
                    .run_path(&format!("{}-merge-{}-{}", self.label, pass, group_no))
                    .and_then(|path| self.merge_group(group, &path).map(|_| path));
                match res {
                    Ok(path) => {
                        self.runs.push(path);
                        self.stats.merged_runs += 1;
                        for run in group.iter() {
                            discard_run(run);
                        }
                    }
                    Err(e) => {
                        // Keep tracking the inputs that still exist so close removes them.
                        for rest in &groups[group_no..] {
                            self.runs.extend(rest.iter().cloned());
                        }
                        return Err(e);
                    }
                }
            }
            self.stats.merge_passes = pass;
        }
        Ok(())
    }

    /// k-way merge of `group` into a new run at `path`, holding one page per
    /// input run and one output page.
    fn merge_group(&mut self, group: &[PathBuf], path: &Path) -> Result<(), QueryError> {
        if group.is_empty() {
            return Err(c_err("There are no runs to merge"));
        }
        if group.len() > self.num_buffers - 1 {
            return Err(QueryError::ExecutionError(format!(
                "Merging {} runs exceeds the available buffers (B-1 = {})",
                group.len(),
                self.num_buffers - 1
            )));
        }
        self.stats.max_fan_in = self.stats.max_fan_in.max(group.len());

        let mut cursors = Vec::with_capacity(group.len());
        for run in group {
            cursors.push(RunCursor::new(RunReader::open(run, self.batch_size)?));
        }
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (run, cursor) in cursors.iter_mut().enumerate() {
            if let Some(tuple) = cursor.next_tuple()? {
                heap.push(self.heap_entry(tuple, run));
            }
        }

        let res = RunWriter::create(path).and_then(|mut writer| {
            let mut out = Batch::new(self.batch_size);
            while let Some(entry) = heap.pop() {
                let run = entry.run;
                out.push(entry.tuple)
                    .map_err(|_| c_err("Merge output page overflow"))?;
                if out.is_full() {
                    writer.write_batch(&out)?;
                    out.clear();
                }
                if let Some(tuple) = cursors[run].next_tuple()? {
                    heap.push(self.heap_entry(tuple, run));
                }
            }
            if !out.is_empty() {
                writer.write_batch(&out)?;
            }
            writer.finish()
        });
        if let Err(e) = res {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(())
    }

    fn heap_entry(&self, tuple: Tuple, run: usize) -> HeapEntry {
        HeapEntry {
            sort_key: self.key.iter().map(|i| tuple.field_vals[*i].clone()).collect(),
            descending: self.descending,
            run,
            tuple,
        }
    }

    fn open_final_run(&mut self) -> Result<(), QueryError> {
        if self.runs.len() != 1 {
            return Err(QueryError::ExecutionError(format!(
                "Expected a single sorted run, found {}",
                self.runs.len()
            )));
        }
        self.reader = Some(RunReader::open(&self.runs[0], self.batch_size)?);
        Ok(())
    }

    fn sort_input(&mut self) -> Result<(), QueryError> {
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}-sort-", self.label))
            .tempdir_in(&self.temp_root)?;
        self.workdir = Some(workdir);
        self.stats = SortStats::default();
        self.generate_runs()?;
        self.merge_runs()?;
        self.open_final_run()
    }

    /// Delete the runs and the working directory of this instance.
    fn release_runs(&mut self) -> Result<(), QueryError> {
        self.reader = None;
        for run in self.runs.drain(..) {
            discard_run(&run);
        }
        if let Some(dir) = self.workdir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl OpIterator for ExternalSort {
    fn open(&mut self) -> Result<(), QueryError> {
        if self.open {
            return Ok(());
        }
        validate_buffers(self.num_buffers)?;
        self.batch_size = Batch::capacity_for(self.page_size, self.schema.tuple_size())?;
        if let Some(i) = self.key.iter().find(|i| **i >= self.schema.size()) {
            return Err(QueryError::ValidationError(format!(
                "Sort key position {} out of range for schema of {} attributes",
                i,
                self.schema.size()
            )));
        }
        self.child.open()?;
        if let Err(e) = self.sort_input() {
            error!("{}: external sort failed: {}", self.label, e);
            let _ = self.release_runs();
            return Err(e);
        }
        info!(
            "{}: sorted input into {} runs with {} merge passes",
            self.label, self.stats.initial_runs, self.stats.merge_passes
        );
        self.open = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Batch>, QueryError> {
        if !self.open {
            return Err(not_open_err());
        }
        match self.reader.as_mut() {
            Some(reader) => reader.next_batch(),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), QueryError> {
        let released = self.release_runs();
        self.child.close()?;
        self.open = false;
        released
    }

    fn get_schema(&self) -> &TableSchema {
        &self.schema
    }

    fn order_by_list(&self) -> Vec<Attribute> {
        self.key
            .iter()
            .filter_map(|i| self.schema.get_attribute(*i).cloned())
            .collect()
    }

    fn is_descending(&self) -> bool {
        self.descending
    }
}

/// Delete a run file that is no longer tracked. Failures are logged; the
/// working directory removal on close catches anything left behind.
fn discard_run(run: &Path) {
    if let Err(e) = fs::remove_file(run) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Unable to delete run file {}: {}", run.display(), e);
        }
    }
}

/// Reads one run a page at a time during a merge.
struct RunCursor {
    reader: RunReader,
    batch: Option<std::vec::IntoIter<Tuple>>,
}

impl RunCursor {
    fn new(reader: RunReader) -> Self {
        Self {
            reader,
            batch: None,
        }
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>, QueryError> {
        loop {
            if let Some(tuple) = self.batch.as_mut().and_then(|it| it.next()) {
                return Ok(Some(tuple));
            }
            match self.reader.next_batch()? {
                Some(batch) => self.batch = Some(batch.into_iter()),
                None => return Ok(None),
            }
        }
    }
}

/// Priority queue entry of a merge. The smallest key pops first, ties go to
/// the earlier run so equal keys keep their run order.
struct HeapEntry {
    sort_key: Vec<Field>,
    descending: bool,
    run: usize,
    tuple: Tuple,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self.sort_key.cmp(&other.sort_key);
        let ord = if self.descending { ord.reverse() } else { ord };
        // BinaryHeap pops the greatest entry.
        ord.then_with(|| self.run.cmp(&other.run)).reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}
