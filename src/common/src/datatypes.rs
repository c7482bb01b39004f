use crate::error::QueryError;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::ops::Add;

fn null_string() -> String {
    String::from("NULL")
}

/// Utilities
pub fn f_int(i: i64) -> Field {
    Field::Int(i)
}

pub fn f_str(s: &str) -> Field {
    Field::String(s.to_string())
}

pub fn f_float(f: f64) -> Field {
    Field::Float(f)
}

/// Enumerate the supported dtypes.
/// When adding a new dtype, make sure to add a corresponding field type.
#[derive(PartialEq, Eq, Serialize, Deserialize, Clone, Debug)]
pub enum DataType {
    Int,
    Float,
    /// Fixed-width string, the width is the number of bytes reserved per record.
    String(usize),
    Null,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Int => write!(f, "int"),
            DataType::Float => write!(f, "float"),
            DataType::String(n) => write!(f, "string({})", n),
            DataType::Null => write!(f, "null"),
        }
    }
}

impl DataType {
    /// Returns the number of bytes a value of this type occupies in a
    /// fixed-width record. Batch capacities are derived from these widths.
    pub fn size(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::Float => 4,
            DataType::String(n) => *n,
            DataType::Null => 1,
        }
    }

    /// Whether SUM and AVG are defined over values of this type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }
}

/// For each of the dtypes, make sure that there is a corresponding field type.
///
/// Ordering is total so that fields can key sorts and merges. Values of the
/// same variant compare naturally (floats through `f64::total_cmp`), ints and
/// floats compare numerically, and anything else falls back to the variant
/// rank `Null < Int/Float < String`. Sort keys are expected to hold a single
/// type per position; the fallback only keeps the order total.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Field {
    Int(i64),
    Float(f64),
    String(String),
    Null,
}

impl Field {
    fn rank(&self) -> u8 {
        match self {
            Field::Null => 0,
            Field::Int(_) | Field::Float(_) => 1,
            Field::String(_) => 2,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Numeric value of an int or float field.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Int(i) => Some(*i as f64),
            Field::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Float(a), Field::Float(b)) => a.total_cmp(b),
            (Field::Int(a), Field::Float(b)) => (*a as f64).total_cmp(b),
            (Field::Float(a), Field::Int(b)) => a.total_cmp(&(*b as f64)),
            (Field::String(a), Field::String(b)) => a.cmp(b),
            (Field::Null, Field::Null) => Ordering::Equal,
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            // Ints and integral floats compare equal, so they must hash alike.
            Field::Int(i) => (*i as f64).to_bits().hash(state),
            Field::Float(f) => f.to_bits().hash(state),
            Field::String(s) => s.hash(state),
            Field::Null => 0u8.hash(state),
        }
    }
}

impl Add for Field {
    type Output = Result<Self, QueryError>;

    fn add(self, other: Self) -> Self::Output {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.checked_add(b).map(Field::Int).ok_or_else(|| {
                QueryError::ExecutionError(format!("Integer overflow adding {} and {}", a, b))
            }),
            (Field::Float(a), Field::Float(b)) => Ok(Field::Float(a + b)),
            (Field::Int(a), Field::Float(b)) => Ok(Field::Float(a as f64 + b)),
            (Field::Float(a), Field::Int(b)) => Ok(Field::Float(a + b as f64)),
            (a, b) => Err(QueryError::ExecutionError(format!(
                "Cannot add {} and {}",
                a, b
            ))),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Field::Int(i) => i.to_string(),
            Field::Float(x) => x.to_string(),
            Field::String(s) => s.to_string(),
            Field::Null => null_string(),
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_field_ordering() {
        assert!(f_int(1) < f_int(2));
        assert!(f_float(1.5) > f_int(1));
        assert_eq!(f_float(2.0), f_int(2));
        assert!(f_str("a") < f_str("b"));
        assert!(Field::Null < f_int(i64::MIN));
        assert!(f_float(f64::NAN) > f_float(f64::INFINITY));
    }

    #[test]
    fn test_field_add() {
        assert_eq!((f_int(2) + f_int(3)).unwrap(), f_int(5));
        assert_eq!((f_int(2) + f_float(0.5)).unwrap(), f_float(2.5));
        assert!((f_str("a") + f_int(1)).is_err());
        assert!(matches!(
            f_int(i64::MAX) + f_int(1),
            Err(QueryError::ExecutionError(_))
        ));
        assert_eq!((f_int(i64::MAX) + f_float(1.0)).unwrap(), f_float(i64::MAX as f64 + 1.0));
    }
}
