use crate::batch::Batch;
use crate::error::QueryError;
use crate::Tuple;

/// A bounded group of batches held in memory during run generation.
///
/// The flattened tuple view is computed from the batches, so every tuple in
/// the block lives in exactly one batch and both views agree on the order.
#[derive(Debug, Clone)]
pub struct Block {
    /// Maximum number of pages.
    max_pages: usize,
    /// Tuples per page.
    page_capacity: usize,
    batches: Vec<Batch>,
}

impl Block {
    pub fn new(max_pages: usize, page_capacity: usize) -> Self {
        Self {
            max_pages,
            page_capacity,
            batches: Vec::with_capacity(max_pages),
        }
    }

    /// Add a page to the block.
    ///
    /// Returns the batch back if the block already holds `max_pages` pages.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), Batch> {
        if self.is_full() {
            return Err(batch);
        }
        self.batches.push(batch);
        Ok(())
    }

    /// Repack an ordered tuple sequence into full pages.
    ///
    /// Fails if the tuples need more than `max_pages` pages.
    pub fn from_sorted(
        max_pages: usize,
        page_capacity: usize,
        tuples: Vec<Tuple>,
    ) -> Result<Self, QueryError> {
        let mut block = Block::new(max_pages, page_capacity);
        let mut batch = Batch::new(page_capacity);
        for tuple in tuples {
            if batch.is_full() {
                let full = std::mem::replace(&mut batch, Batch::new(page_capacity));
                block.add_batch(full).map_err(|_| overflow(max_pages))?;
            }
            // The page was just emptied if it was full.
            let _ = batch.push(tuple);
        }
        if !batch.is_empty() {
            block.add_batch(batch).map_err(|_| overflow(max_pages))?;
        }
        Ok(block)
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Flattened view of the tuples, page by page.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.batches.iter().flat_map(|b| b.iter())
    }

    /// Consume the block into its flattened tuple sequence.
    pub fn into_tuples(self) -> Vec<Tuple> {
        let mut tuples = Vec::with_capacity(self.tuple_count());
        for batch in self.batches {
            tuples.extend(batch);
        }
        tuples
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn tuple_count(&self) -> usize {
        self.batches.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.batches.len() >= self.max_pages
    }
}

fn overflow(max_pages: usize) -> QueryError {
    QueryError::ExecutionError(format!("Block overflow: more than {} pages", max_pages))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{create_tuple_list, int_vec_to_tuple};

    #[test]
    fn test_block_fills_up() {
        let mut block = Block::new(2, 3);
        block.add_batch(Batch::new(3)).unwrap();
        assert!(!block.is_full());
        block.add_batch(Batch::new(3)).unwrap();
        assert!(block.is_full());
        assert!(block.add_batch(Batch::new(3)).is_err());
        assert_eq!(block.num_batches(), 2);
    }

    #[test]
    fn test_views_agree() {
        let mut block = Block::new(3, 2);
        let mut first = Batch::new(2);
        first.push(int_vec_to_tuple(vec![3])).unwrap();
        first.push(int_vec_to_tuple(vec![1])).unwrap();
        let mut second = Batch::new(2);
        second.push(int_vec_to_tuple(vec![2])).unwrap();
        block.add_batch(first).unwrap();
        block.add_batch(second).unwrap();

        let flat: Vec<Tuple> = block.tuples().cloned().collect();
        assert_eq!(flat, create_tuple_list(vec![vec![3], vec![1], vec![2]]));
        assert_eq!(block.tuple_count(), 3);
        assert_eq!(block.into_tuples(), flat);
    }

    #[test]
    fn test_from_sorted_repacks_pages() {
        let tuples = create_tuple_list((0..5).map(|i| vec![i]).collect());
        let block = Block::from_sorted(3, 2, tuples.clone()).unwrap();
        let sizes: Vec<usize> = block.batches().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(block.into_tuples(), tuples);

        let too_many = create_tuple_list((0..7).map(|i| vec![i]).collect());
        assert!(Block::from_sorted(3, 2, too_many).is_err());
    }
}
