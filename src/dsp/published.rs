//! Single-slot atomic cells for values shared between the control plane and
//! the audio thread.
//!
//! A [`Published`] cell has exactly one writer. Control-thread writers use
//! [`Published::publish`] (release store) and the audio thread reads with
//! [`Published::get`] (acquire load). Statistics written by the audio thread
//! use [`Published::store_relaxed`]; pollers still read with acquire ordering.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Types that can be stored bit-for-bit inside a [`Published`] cell.
pub trait AtomicBits: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

impl AtomicBits for f32 {
    #[inline]
    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl AtomicBits for f64 {
    #[inline]
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

impl AtomicBits for u32 {
    #[inline]
    fn to_bits(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits as u32
    }
}

impl AtomicBits for u64 {
    #[inline]
    fn to_bits(self) -> u64 {
        self
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits
    }
}

impl AtomicBits for usize {
    #[inline]
    fn to_bits(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits as usize
    }
}

impl AtomicBits for bool {
    #[inline]
    fn to_bits(self) -> u64 {
        self as u64
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

/// A published value: one writer, any number of readers, no locks.
pub struct Published<T: AtomicBits> {
    bits: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T: AtomicBits> Published<T> {
    pub fn new(value: T) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
            _marker: PhantomData,
        }
    }

    /// Release store. Everything written before this call is visible to a
    /// reader that observes the new value.
    #[inline]
    pub fn publish(&self, value: T) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Relaxed store, for high-rate statistics written from the audio thread.
    #[inline]
    pub fn store_relaxed(&self, value: T) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Acquire load.
    #[inline]
    pub fn get(&self) -> T {
        T::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl<T: AtomicBits + Default> Default for Published<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicBits + std::fmt::Debug> std::fmt::Debug for Published<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Published").field(&self.get()).finish()
    }
}

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_published_float_roundtrip() {
        let cell = Published::new(0.25f32);
        assert_eq!(cell.get(), 0.25);
        cell.publish(-3.5);
        assert_eq!(cell.get(), -3.5);
        cell.store_relaxed(f32::MAX);
        assert_eq!(cell.get(), f32::MAX);
    }

    #[test]
    fn test_published_bool_and_u64() {
        let flag = Published::new(false);
        flag.publish(true);
        assert!(flag.get());

        let big = Published::new(0u64);
        big.publish(u64::MAX - 1);
        assert_eq!(big.get(), u64::MAX - 1);
    }

    #[test]
    fn test_published_visible_across_threads() {
        let cell = Arc::new(Published::new(0.0f64));
        let writer = Arc::clone(&cell);
        std::thread::spawn(move || writer.publish(48000.0))
            .join()
            .unwrap();
        assert_eq!(cell.get(), 48000.0);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.increment();
        counter.add(4);
        assert_eq!(counter.get(), 5);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }
}
