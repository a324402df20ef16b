//! Lock-free byte FIFO and fixed-element frame ring.
//!
//! [`ByteFifo`] moves raw octets from interrupt context to the protocol
//! task: single producer, single consumer, no locks, no blocking. The
//! producer owns `head`, the consumer owns `tail`, each index is
//! published with release ordering and observed with acquire ordering,
//! and one slot stays empty so `head == tail` unambiguously means empty.
//!
//! [`FrameRing`] applies the same index discipline to whole elements on
//! the task side, where no cross-thread ordering is needed.
//!
//! Capacities are powers of two so the wrap is a bit mask.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// The FIFO is full; the octet was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoFull;

/// Single-producer/single-consumer byte queue.
///
/// # Safety contract
///
/// At most one context may call [`ByteFifo::put`]/[`ByteFifo::put_slice`]
/// and at most one (other) context may call
/// [`ByteFifo::get`]/[`ByteFifo::peek`] concurrently. The usual shape is
/// a receive ISR producing and the protocol task consuming.
#[derive(Debug)]
pub struct ByteFifo<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    /// Next write position; advanced only by the producer
    head: AtomicUsize,
    /// Next read position; advanced only by the consumer
    tail: AtomicUsize,
}

// The SPSC discipline above is what makes this sound.
unsafe impl<const N: usize> Sync for ByteFifo<N> {}

impl<const N: usize> Default for ByteFifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteFifo<N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two() && N >= 2);

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Usable capacity (one slot is sacrificed to distinguish full from
    /// empty).
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Octets currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & (N - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + 1) & (N - 1) == tail
    }

    /// Producer side: append one octet, failing fast when full.
    pub fn put(&self, octet: u8) -> Result<(), FifoFull> {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & (N - 1);
        if next == self.tail.load(Ordering::Acquire) {
            return Err(FifoFull);
        }
        unsafe {
            (*self.buffer.get())[head] = octet;
        }
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Producer side: append as much of `octets` as fits; returns the
    /// count stored.
    pub fn put_slice(&self, octets: &[u8]) -> usize {
        let mut stored = 0;
        for &octet in octets {
            if self.put(octet).is_err() {
                break;
            }
            stored += 1;
        }
        stored
    }

    /// Consumer side: remove and return the oldest octet.
    pub fn get(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let octet = unsafe { (*self.buffer.get())[tail] };
        self.tail.store((tail + 1) & (N - 1), Ordering::Release);
        Some(octet)
    }

    /// Consumer side: read the oldest octet without removing it.
    pub fn peek(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        Some(unsafe { (*self.buffer.get())[tail] })
    }
}

/// The ring is full; the rejected element is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFull<T>(pub T);

/// Fixed-element ring buffer for decoded frames, task-side only.
#[derive(Debug)]
pub struct FrameRing<T, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    tail: usize,
}

impl<T, const N: usize> Default for FrameRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> FrameRing<T, N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two() && N >= 2);

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            slots: core::array::from_fn(|_| None),
            head: 0,
            tail: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & (N - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) & (N - 1) == self.tail
    }

    /// Append an element, failing fast (and returning it) when full.
    pub fn push(&mut self, element: T) -> Result<(), RingFull<T>> {
        if self.is_full() {
            return Err(RingFull(element));
        }
        self.slots[self.head] = Some(element);
        self.head = (self.head + 1) & (N - 1);
        Ok(())
    }

    /// Remove and return the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let element = self.slots[self.tail].take();
        self.tail = (self.tail + 1) & (N - 1);
        element
    }

    /// Read the oldest element without removing it.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.tail].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_fill_and_drain() {
        let fifo: ByteFifo<8> = ByteFifo::new();
        assert!(fifo.is_empty());
        assert_eq!(fifo.capacity(), 7);

        for octet in 0..7u8 {
            fifo.put(octet).unwrap();
        }
        assert!(fifo.is_full());
        assert_eq!(fifo.put(0xFF), Err(FifoFull));
        assert_eq!(fifo.len(), 7);

        for expected in 0..7u8 {
            assert_eq!(fifo.get(), Some(expected));
        }
        assert!(fifo.is_empty());
        assert_eq!(fifo.get(), None);
    }

    #[test]
    fn fifo_wraps_around() {
        let fifo: ByteFifo<4> = ByteFifo::new();
        // Push/pop more than the capacity to force index wrap
        for round in 0..20u8 {
            fifo.put(round).unwrap();
            fifo.put(round.wrapping_add(100)).unwrap();
            assert_eq!(fifo.get(), Some(round));
            assert_eq!(fifo.get(), Some(round.wrapping_add(100)));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn fifo_peek_does_not_consume() {
        let fifo: ByteFifo<8> = ByteFifo::new();
        fifo.put(0x42).unwrap();
        assert_eq!(fifo.peek(), Some(0x42));
        assert_eq!(fifo.peek(), Some(0x42));
        assert_eq!(fifo.get(), Some(0x42));
        assert_eq!(fifo.peek(), None);
    }

    #[test]
    fn fifo_put_slice_partial() {
        let fifo: ByteFifo<4> = ByteFifo::new();
        assert_eq!(fifo.put_slice(&[1, 2, 3, 4, 5]), 3);
        assert_eq!(fifo.get(), Some(1));
        assert_eq!(fifo.put_slice(&[6]), 1);
        assert_eq!(fifo.len(), 3);
    }

    #[cfg(feature = "std")]
    #[test]
    fn fifo_cross_thread_order_preserved() {
        use std::sync::Arc;

        let fifo: Arc<ByteFifo<64>> = Arc::new(ByteFifo::new());
        let producer = Arc::clone(&fifo);
        let handle = std::thread::spawn(move || {
            for value in 0..=255u8 {
                loop {
                    if producer.put(value).is_ok() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        });

        let mut received = std::vec::Vec::with_capacity(256);
        while received.len() < 256 {
            if let Some(octet) = fifo.get() {
                received.push(octet);
            } else {
                std::thread::yield_now();
            }
        }
        handle.join().unwrap();
        let expected: std::vec::Vec<u8> = (0..=255u8).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn ring_fill_and_drain() {
        let mut ring: FrameRing<u32, 4> = FrameRing::new();
        assert_eq!(ring.capacity(), 3);
        ring.push(10).unwrap();
        ring.push(20).unwrap();
        ring.push(30).unwrap();
        assert!(ring.is_full());
        assert_eq!(ring.push(40), Err(RingFull(40)));
        assert_eq!(ring.peek(), Some(&10));
        assert_eq!(ring.pop(), Some(10));
        ring.push(40).unwrap();
        assert_eq!(ring.pop(), Some(20));
        assert_eq!(ring.pop(), Some(30));
        assert_eq!(ring.pop(), Some(40));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn ring_wraps_around() {
        let mut ring: FrameRing<u8, 2> = FrameRing::new();
        for value in 0..10u8 {
            ring.push(value).unwrap();
            assert_eq!(ring.pop(), Some(value));
        }
        assert!(ring.is_empty());
    }
}
