//! Training dataloader adapter
//!
//! Wraps the epoch's batch iterator so each batch arrives with its index and
//! a flag telling whether it is the last one. The flag needs one batch of
//! look-ahead.

use std::iter::Peekable;

/// `(batch_idx, (batch, is_last))` iterator over one epoch
pub struct TrainDataloader<B> {
    inner: Peekable<Box<dyn Iterator<Item = B>>>,
    next_idx: usize,
}

impl<B> TrainDataloader<B> {
    pub fn new(batches: Box<dyn Iterator<Item = B>>) -> Self {
        Self {
            inner: batches.peekable(),
            next_idx: 0,
        }
    }

    /// Batches handed out so far
    pub fn fetched(&self) -> usize {
        self.next_idx
    }
}

impl<B> Iterator for TrainDataloader<B> {
    type Item = (usize, (B, bool));

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.inner.next()?;
        let is_last = self.inner.peek().is_none();
        let idx = self.next_idx;
        self.next_idx += 1;
        Some((idx, (batch, is_last)))
    }
}

/// Exact length of an iterator if its size hint pins it down
pub fn known_len<I: Iterator>(batches: &I) -> Option<usize> {
    match batches.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(lower),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_last_batch() {
        let dl = TrainDataloader::new(Box::new(vec!['a', 'b', 'c'].into_iter()));
        let items: Vec<_> = dl.collect();
        assert_eq!(
            items,
            vec![(0, ('a', false)), (1, ('b', false)), (2, ('c', true))]
        );
    }

    #[test]
    fn test_empty_dataloader() {
        let mut dl = TrainDataloader::<u8>::new(Box::new(std::iter::empty()));
        assert!(dl.next().is_none());
        assert_eq!(dl.fetched(), 0);
    }

    #[test]
    fn test_known_len() {
        assert_eq!(known_len(&vec![1, 2, 3].into_iter()), Some(3));
        assert_eq!(known_len(&(0..).map(|x: u32| x)), None);
        assert_eq!(known_len(&(0..10).filter(|x| x % 2 == 0)), None);
    }
}
