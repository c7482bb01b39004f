#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

use std::cmp::Ordering;

pub mod batch;
pub mod block;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod operation;
pub mod testutil;

/// Page size in bytes
pub const PAGE_SIZE: usize = 4096;
// How many pages an operator may hold unless configured otherwise
pub const PAGE_SLOTS: usize = 50;

pub mod prelude {
    pub use crate::batch::Batch;
    pub use crate::block::Block;
    pub use crate::config::ExecConfig;
    pub use crate::datatypes::{DataType, Field};
    pub use crate::error::QueryError;
    pub use crate::operation::AggOp;
    pub use crate::{Attribute, TableSchema, Tuple};
}
pub use crate::batch::Batch;
pub use crate::block::Block;
pub use crate::config::ExecConfig;
pub use crate::datatypes::{DataType, Field};
pub use crate::error::QueryError;
pub use crate::operation::AggOp;

/// Handle schemas.
///
/// A schema only describes how to interpret the fields of the tuples an
/// operator produces; it never owns tuple data.
#[derive(Default, PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct TableSchema {
    /// Attributes of the schema.
    pub attributes: Vec<Attribute>,
}

impl TableSchema {
    /// Create a new schema.
    ///
    /// # Arguments
    ///
    /// * `attributes` - Attributes of the schema in the order that they are in the schema.
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Create a new schema for one table with the given column names and dtypes.
    ///
    /// # Arguments
    ///
    /// * `table` - Table the columns belong to.
    /// * `names` - Column names of the new schema.
    /// * `dtypes` - Dtypes of the new schema.
    pub fn from_vecs(table: &str, names: Vec<&str>, dtypes: Vec<DataType>) -> Self {
        let mut attrs = Vec::new();
        for (name, dtype) in names.iter().zip(dtypes.iter()) {
            attrs.push(Attribute::new(table, name, dtype.clone()));
        }
        TableSchema::new(attrs)
    }

    /// Get the attribute from the given index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the attribute to look for.
    pub fn get_attribute(&self, i: usize) -> Option<&Attribute> {
        self.attributes.get(i)
    }

    /// Get the index of the attribute.
    ///
    /// The name is either qualified (`table.column`) or a bare column name.
    /// A bare name resolves to the first attribute with that column.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the attribute to get the index for.
    pub fn get_field_index(&self, name: &str) -> Option<usize> {
        match name.split_once('.') {
            Some((table, column)) => self
                .attributes
                .iter()
                .position(|attr| attr.table == table && attr.column == column),
            None => self.attributes.iter().position(|attr| attr.column == name),
        }
    }

    /// Get an iterator of the attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Merge two schemas into one.
    ///
    /// The other schema is appended to the current schema.
    ///
    /// # Arguments
    ///
    /// * `other` - Other schema to add to current schema.
    pub fn merge(&self, other: &Self) -> Self {
        let mut attrs = self.attributes.clone();
        attrs.append(&mut other.attributes.clone());
        Self::new(attrs)
    }

    /// Schema made of the attributes at the given positions, in that order.
    ///
    /// # Panics
    ///
    /// Panics if a position is out-of-bounds.
    pub fn sub_schema(&self, indices: &[usize]) -> Self {
        Self::new(indices.iter().map(|i| self.attributes[*i].clone()).collect())
    }

    /// Returns the length of the schema.
    pub fn size(&self) -> usize {
        self.attributes.len()
    }

    /// Width in bytes of one fixed-width record of this schema.
    pub fn tuple_size(&self) -> usize {
        self.attributes.iter().map(|attr| attr.dtype.size()).sum()
    }
}

impl std::fmt::Display for TableSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut res = String::new();
        for attr in &self.attributes {
            res.push_str(&attr.to_string());
            res.push('\t');
        }
        write!(f, "{}", res)
    }
}

/// Handle attributes. Pairs the qualified name with the dtype.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Attribute {
    /// Table the attribute comes from.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Attribute dtype.
    pub dtype: DataType,
    /// Aggregate applied to the column, if any.
    pub agg: Option<AggOp>,
}

impl Attribute {
    /// Create a new attribute with the given table, column and dtype.
    pub fn new(table: &str, column: &str, dtype: DataType) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            dtype,
            agg: None,
        }
    }

    /// Create an attribute describing `op(table.column)`.
    pub fn new_agg(table: &str, column: &str, dtype: DataType, op: AggOp) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            dtype,
            agg: Some(op),
        }
    }

    /// Returns the qualified name of the attribute.
    pub fn name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    /// Returns the dtype of the attribute.
    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.agg {
            Some(op) => write!(f, "{}({})", op, self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// Tuple type.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Hash)]
pub struct Tuple {
    /// Tuple data.
    pub field_vals: Vec<Field>,
}

impl Tuple {
    /// Create a new tuple with the given data.
    ///
    /// # Arguments
    ///
    /// * `field_vals` - Field values of the tuple.
    pub fn new(field_vals: Vec<Field>) -> Self {
        Self { field_vals }
    }

    /// Get the field at index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the field.
    pub fn get_field(&self, i: usize) -> Option<&Field> {
        self.field_vals.get(i)
    }

    /// Returns an iterator over the field values.
    pub fn field_vals(&self) -> impl Iterator<Item = &Field> {
        self.field_vals.iter()
    }

    /// Return the length of the tuple.
    pub fn len(&self) -> usize {
        self.field_vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_vals.is_empty()
    }

    /// Append another tuple with self.
    ///
    /// # Arguments
    ///
    /// * `other` - Other tuple to append.
    pub fn merge(&self, other: &Self) -> Self {
        let mut fields = self.field_vals.clone();
        fields.extend(other.field_vals.iter().cloned());
        Self::new(fields)
    }

    /// Tuple made of the fields at the given positions.
    ///
    /// # Panics
    ///
    /// Panics if a position is out-of-bounds.
    pub fn project(&self, indices: &[usize]) -> Self {
        Self::new(indices.iter().map(|i| self.field_vals[*i].clone()).collect())
    }

    /// Three-way comparison of `left` and `right` over pairs of positions.
    ///
    /// `left_idx[k]` of `left` is compared with `right_idx[k]` of `right`, in
    /// order, and the first non-equal pair decides. Both lists must have the
    /// same length and each pair must hold values of the same type: mixing
    /// types (or nulls) at a key position yields the fallback order of
    /// [`Field`], which is not meaningful for queries.
    ///
    /// # Panics
    ///
    /// Panics if a position is out-of-bounds for its tuple.
    pub fn compare(left: &Tuple, right: &Tuple, left_idx: &[usize], right_idx: &[usize]) -> Ordering {
        debug_assert_eq!(left_idx.len(), right_idx.len());
        for (l, r) in left_idx.iter().zip(right_idx.iter()) {
            match left.field_vals[*l].cmp(&right.field_vals[*r]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Same as [`Tuple::compare`] with the result inverted when `descending`.
    pub fn compare_directed(
        left: &Tuple,
        right: &Tuple,
        left_idx: &[usize],
        right_idx: &[usize],
        descending: bool,
    ) -> Ordering {
        let ord = Tuple::compare(left, right, left_idx, right_idx);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut res = String::new();
        for field in &self.field_vals {
            res.push_str(&field.to_string());
            res.push('\t');
        }
        write!(f, "{}", res)
    }
}
