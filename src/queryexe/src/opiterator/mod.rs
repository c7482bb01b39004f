pub use self::aggregate::{AggColumn, Aggregate};
pub use self::distinct::Distinct;
pub use self::external_sort::{ExternalSort, SortStats};
pub use self::project::Project;
pub use self::sort_merge_join::{JoinCondition, JoinDescriptor, SortMergeJoin};
pub use self::tuple_iterator::TupleIterator;
use common::{Attribute, Batch, QueryError, TableSchema};

mod aggregate;
mod distinct;
mod external_sort;
mod project;
mod sort_merge_join;
mod tuple_iterator;

/// Pull-based, page-at-a-time operator.
///
/// Operators are composed by ownership: a parent owns its children as
/// `Box<dyn OpIterator>` and forwards `open` and `close` to them.
pub trait OpIterator {
    /// Opens the iterator. This must be called before `next`.
    ///
    /// This acquires the resources of the operator and opens its children.
    /// For example, an external sort generates and merges its runs here.
    /// Invalid configurations (a tuple wider than a page, too few buffers)
    /// are reported as an error instead of surfacing later.
    /// If the operator is already open, this function should do nothing.
    /// Therefore a typical implementation of open would be:
    /// ```ignore
    /// fn open(&mut self) -> Result<(), QueryError> {
    ///    if !self.open {
    ///       // initialize the states
    ///       self.open = true;
    ///   }
    ///   Ok(())
    /// }
    /// ```
    fn open(&mut self) -> Result<(), QueryError>;

    /// Returns the next page of result tuples.
    ///
    /// Returns None when iteration is finished, and keeps returning None on
    /// later calls. Calling next on an operator that is not open is an
    /// `ExecutionError`.
    fn next(&mut self) -> Result<Option<Batch>, QueryError>;

    /// Releases the resources of the operator and of its children.
    ///
    /// The call to close() must be idempotent and must work whether or not
    /// next() was driven to the end, or open() failed half way. Temporary
    /// files created by the operator are deleted here.
    fn close(&mut self) -> Result<(), QueryError>;

    /// Returns the schema associated with this OpIterator.
    fn get_schema(&self) -> &TableSchema;

    /// Whether the output holds no duplicate tuples.
    fn is_distinct(&self) -> bool {
        false
    }

    /// Attributes the output is ordered by, outermost first.
    fn order_by_list(&self) -> Vec<Attribute> {
        Vec::new()
    }

    /// Whether the order of `order_by_list` is descending.
    fn is_descending(&self) -> bool {
        false
    }
}

pub(crate) fn not_open_err() -> QueryError {
    QueryError::ExecutionError("Operator has not been opened".to_string())
}
