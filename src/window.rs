//! Fixed-capacity rolling window of observations.
//!
//! [`SampleWindow`] is the leaf data structure under every chart: an
//! append-only ring buffer that evicts its oldest entry once full. It is not
//! internally synchronized; the owning chart serializes access.

use std::collections::VecDeque;

use crate::error::SpcError;

/// Window capacity for charts fed raw observations (p, CUSUM, EWMA).
pub const RAW_WINDOW_CAPACITY: usize = 1000;

/// Window capacity for subgroup-derived series (X-bar-R).
pub const SUBGROUP_WINDOW_CAPACITY: usize = 200;

/// Bounded, chronologically ordered buffer.
///
/// # Invariants
///
/// - `len() <= capacity()`
/// - Iteration order is insertion order (oldest first)
///
/// # Examples
///
/// ```
/// use u_spc::window::SampleWindow;
///
/// let mut window = SampleWindow::new(3).unwrap();
/// assert_eq!(window.push(1.0), None);
/// assert_eq!(window.push(2.0), None);
/// assert_eq!(window.push(3.0), None);
/// assert_eq!(window.push(4.0), Some(1.0));
///
/// let recent: Vec<f64> = window.iter_last(2).copied().collect();
/// assert_eq!(recent, vec![3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> SampleWindow<T> {
    /// Create an empty window holding at most `capacity` items.
    ///
    /// The backing storage is allocated up front, so pushes never allocate.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] if `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self, SpcError> {
        if capacity == 0 {
            return Err(SpcError::Config(
                "window capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append an item, returning the evicted oldest item if the window was full.
    ///
    /// # Complexity
    ///
    /// O(1)
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(item);
        evicted
    }

    /// Iterate over the most recent `n` items (fewer if the window is shorter),
    /// oldest first.
    pub fn iter_last(&self, n: usize) -> std::collections::vec_deque::Iter<'_, T> {
        let start = self.buf.len().saturating_sub(n);
        self.buf.range(start..)
    }

    /// Iterate over all items, oldest first.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.buf.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::collections::vec_deque::IterMut<'_, T> {
        self.buf.iter_mut()
    }

    /// The most recently pushed item.
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut T> {
        self.buf.back_mut()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every item, keeping the capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Remove and return every item, oldest first.
    pub fn take_all(&mut self) -> Vec<T> {
        self.buf.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            SampleWindow::<f64>::new(0),
            Err(SpcError::Config(_))
        ));
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut window = SampleWindow::new(2).expect("valid capacity");
        assert_eq!(window.push(10), None);
        assert_eq!(window.push(20), None);
        assert!(window.is_full());
        assert_eq!(window.push(30), Some(10));
        assert_eq!(window.push(40), Some(20));
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![30, 40]);
    }

    #[test]
    fn test_iter_last_shorter_than_request() {
        let mut window = SampleWindow::new(10).expect("valid capacity");
        window.push(1);
        window.push(2);
        assert_eq!(window.iter_last(50).copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(window.iter_last(1).copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(window.iter_last(0).count(), 0);
    }

    #[test]
    fn test_take_all_and_clear() {
        let mut window = SampleWindow::new(4).expect("valid capacity");
        for i in 0..6 {
            window.push(i);
        }
        assert_eq!(window.take_all(), vec![2, 3, 4, 5]);
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 4);

        window.push(7);
        window.clear();
        assert!(window.is_empty());
        assert!(window.last().is_none());
    }

    #[test]
    fn test_last() {
        let mut window = SampleWindow::new(3).expect("valid capacity");
        assert!(window.last().is_none());
        window.push(1.5);
        window.push(2.5);
        assert_eq!(window.last(), Some(&2.5));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn window_never_exceeds_capacity(
                capacity in 1_usize..64,
                items in proptest::collection::vec(any::<i32>(), 0..300),
            ) {
                let mut window = SampleWindow::new(capacity).expect("valid capacity");
                for &item in &items {
                    window.push(item);
                    prop_assert!(window.len() <= capacity);
                }
            }

            #[test]
            fn window_keeps_most_recent_in_order(
                capacity in 1_usize..64,
                items in proptest::collection::vec(any::<i32>(), 0..300),
            ) {
                let mut window = SampleWindow::new(capacity).expect("valid capacity");
                let mut evicted = Vec::new();
                for &item in &items {
                    if let Some(old) = window.push(item) {
                        evicted.push(old);
                    }
                }
                let kept: Vec<i32> = window.iter().copied().collect();
                let start = items.len().saturating_sub(capacity);
                prop_assert_eq!(&kept[..], &items[start..]);
                prop_assert_eq!(&evicted[..], &items[..start]);
            }
        }
    }
}
