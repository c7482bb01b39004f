use crate::error::QueryError;
use crate::Tuple;

/// One page of tuples, the unit of data passed between operators.
///
/// The capacity is fixed when the batch is created and `len() <= capacity()`
/// always holds: [`Batch::push`] refuses tuples once the page is full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    capacity: usize,
    tuples: Vec<Tuple>,
}

impl Batch {
    /// Create an empty batch holding at most `capacity` tuples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tuples: Vec::with_capacity(capacity),
        }
    }

    /// Number of fixed-width tuples of `tuple_size` bytes that fit in a page
    /// of `page_size` bytes.
    ///
    /// Fails when not even one tuple fits, so that no operator ever works with
    /// a zero-capacity batch.
    pub fn capacity_for(page_size: usize, tuple_size: usize) -> Result<usize, QueryError> {
        if tuple_size == 0 {
            return Err(QueryError::ConfigError(
                "Tuple size must be greater than zero".to_string(),
            ));
        }
        let capacity = page_size / tuple_size;
        if capacity == 0 {
            return Err(QueryError::ConfigError(format!(
                "Tuple size {} exceeds page size {}",
                tuple_size, page_size
            )));
        }
        Ok(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.capacity
    }

    /// Append a tuple to the page.
    ///
    /// Returns the tuple back if the page is already full.
    pub fn push(&mut self, tuple: Tuple) -> Result<(), Tuple> {
        if self.is_full() {
            return Err(tuple);
        }
        self.tuples.push(tuple);
        Ok(())
    }

    pub fn get(&self, i: usize) -> Option<&Tuple> {
        self.tuples.get(i)
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }

    /// Build a batch from tuples that are known to fit.
    ///
    /// Fails when more tuples are given than `capacity` allows.
    pub fn from_tuples(capacity: usize, tuples: Vec<Tuple>) -> Result<Self, QueryError> {
        if tuples.len() > capacity {
            return Err(QueryError::ExecutionError(format!(
                "{} tuples do not fit in a page of {}",
                tuples.len(),
                capacity
            )));
        }
        Ok(Self { capacity, tuples })
    }
}

impl IntoIterator for Batch {
    type Item = Tuple;
    type IntoIter = std::vec::IntoIter<Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::int_vec_to_tuple;

    #[test]
    fn test_capacity_for() {
        assert_eq!(Batch::capacity_for(100, 12).unwrap(), 8);
        assert_eq!(Batch::capacity_for(12, 12).unwrap(), 1);
        assert!(matches!(
            Batch::capacity_for(11, 12),
            Err(QueryError::ConfigError(_))
        ));
        assert!(Batch::capacity_for(100, 0).is_err());
    }

    #[test]
    fn test_push_until_full() {
        let mut batch = Batch::new(2);
        assert!(batch.is_empty());
        batch.push(int_vec_to_tuple(vec![1])).unwrap();
        batch.push(int_vec_to_tuple(vec![2])).unwrap();
        assert!(batch.is_full());
        let rejected = batch.push(int_vec_to_tuple(vec![3])).unwrap_err();
        assert_eq!(rejected, int_vec_to_tuple(vec![3]));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(1), Some(&int_vec_to_tuple(vec![2])));
    }

    #[test]
    fn test_from_tuples_respects_capacity() {
        let tuples = vec![int_vec_to_tuple(vec![1]), int_vec_to_tuple(vec![2])];
        assert!(Batch::from_tuples(1, tuples.clone()).is_err());
        let batch = Batch::from_tuples(2, tuples.clone()).unwrap();
        assert_eq!(batch.into_tuples(), tuples);
    }
}
