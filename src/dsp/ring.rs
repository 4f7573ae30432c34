//! Fixed-capacity history ring that overwrites its oldest entry.
//!
//! Used for feature, pitch, tempo and onset histories. Storage is inline so a
//! ring lives inside its owner without a separate allocation.

/// Ring buffer of `T` with capacity `N`.
///
/// Invariant: `write < N` and `len <= N`. `write` is the slot the next push
/// lands in, so the newest entry is at `write - 1` (mod `N`).
#[derive(Clone, Debug)]
pub struct HistoryRing<T: Copy + Default, const N: usize> {
    items: [T; N],
    write: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> HistoryRing<T, N> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            write: 0,
            len: 0,
        }
    }

    /// Appends a value, dropping the oldest one when full.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.items[self.write] = value;
        self.write = (self.write + 1) % N;
        if self.len < N {
            self.len += 1;
        }
    }

    /// Entry `age` pushes ago; `get(0)` is the newest.
    #[inline]
    pub fn get(&self, age: usize) -> Option<&T> {
        if age >= self.len {
            return None;
        }
        let index = (self.write + N - 1 - age) % N;
        Some(&self.items[index])
    }

    #[inline]
    pub fn latest(&self) -> Option<&T> {
        self.get(0)
    }

    /// Overwrites the newest entry in place. No-op when empty.
    pub fn replace_latest(&mut self, value: T) {
        if self.len > 0 {
            let index = (self.write + N - 1) % N;
            self.items[index] = value;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.write = 0;
        self.len = 0;
    }

    /// Iterates from newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |age| self.get(age))
    }

    /// Iterates from oldest to newest.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).rev().filter_map(move |age| self.get(age))
    }
}

impl<T: Copy + Default, const N: usize> Default for HistoryRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HistoryRing<f32, N> {
    /// Mean of the stored values, 0 when empty.
    pub fn mean(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter_newest_first().sum::<f32>() / self.len as f32
    }

    /// Population standard deviation of the stored values.
    pub fn std_dev(&self) -> f32 {
        if self.len < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .iter_newest_first()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f32>()
            / self.len as f32;
        var.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get_newest_first() {
        let mut ring: HistoryRing<u32, 4> = HistoryRing::new();
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());

        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(0), Some(&3));
        assert_eq!(ring.get(2), Some(&1));
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut ring: HistoryRing<u32, 3> = HistoryRing::new();
        for v in 0..10 {
            ring.push(v);
        }
        assert!(ring.is_full());
        assert_eq!(ring.len(), 3, "len never exceeds capacity");
        let newest: Vec<u32> = ring.iter_newest_first().copied().collect();
        assert_eq!(newest, vec![9, 8, 7]);
        let oldest: Vec<u32> = ring.iter_oldest_first().copied().collect();
        assert_eq!(oldest, vec![7, 8, 9]);
    }

    #[test]
    fn test_replace_latest_and_clear() {
        let mut ring: HistoryRing<f32, 2> = HistoryRing::new();
        ring.replace_latest(5.0);
        assert!(ring.is_empty(), "replace on empty ring is a no-op");
        ring.push(1.0);
        ring.replace_latest(2.0);
        assert_eq!(ring.latest(), Some(&2.0));
        ring.clear();
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_mean_and_std_dev() {
        let mut ring: HistoryRing<f32, 8> = HistoryRing::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            ring.push(v);
        }
        assert!((ring.mean() - 5.0).abs() < 1e-6);
        assert!((ring.std_dev() - 2.0).abs() < 1e-6);
    }
}
