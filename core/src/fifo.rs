//! Lock-free single-producer / single-consumer sample queue.
//!
//! The only state shared between the capture context (timer or ADC
//! interrupt) and the decoding context. Indices are monotonically
//! increasing 32-bit counters wrapped with a power-of-two mask; the
//! producer publishes with a release store on the write index and the
//! consumer publishes with a release store on the read index, each side
//! acquiring the other's index before touching the buffer. No further
//! synchronization exists anywhere in the pipeline.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Cache-line aligned counter so head and tail never share a line.
#[repr(align(64))]
struct PaddedAtomicU32 {
    value: AtomicU32,
}

impl PaddedAtomicU32 {
    fn new(v: u32) -> Self {
        Self {
            value: AtomicU32::new(v),
        }
    }
}

pub struct SampleFifo {
    buffer: Box<[UnsafeCell<f32>]>,
    /// Read index, owned by the consumer.
    head: PaddedAtomicU32,
    /// Write index, owned by the producer.
    tail: PaddedAtomicU32,
    mask: u32,
}

// The queue is safe for exactly one producer and one consumer; the atomic
// index handshake orders every buffer access.
unsafe impl Send for SampleFifo {}
unsafe impl Sync for SampleFifo {}

impl SampleFifo {
    /// `capacity` must be a power of two (checked by `ModemConfig::validate`).
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let buffer: Vec<UnsafeCell<f32>> = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();
        Self {
            buffer: buffer.into_boxed_slice(),
            head: PaddedAtomicU32::new(0),
            tail: PaddedAtomicU32::new(0),
            mask: capacity as u32 - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Snapshot of the number of queued samples.
    pub fn available(&self) -> usize {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() >= self.capacity()
    }

    /// Producer side. Returns false, writing nothing, when the queue is full.
    pub fn push(&self, sample: f32) -> bool {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= self.capacity() as u32 {
            return false;
        }

        unsafe {
            *self.buffer[(tail & self.mask) as usize].get() = sample;
        }
        self.tail.value.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Producer side, all-or-nothing: either every sample is queued under a
    /// single index publish, or none is and false is returned.
    pub fn push_slice(&self, samples: &[f32]) -> bool {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Acquire);

        let free = self.capacity() as u32 - tail.wrapping_sub(head);
        if samples.len() > free as usize {
            return false;
        }

        for (i, &sample) in samples.iter().enumerate() {
            let index = (tail.wrapping_add(i as u32) & self.mask) as usize;
            unsafe {
                *self.buffer[index].get() = sample;
            }
        }
        self.tail
            .value
            .store(tail.wrapping_add(samples.len() as u32), Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<f32> {
        let head = self.head.value.load(Ordering::Relaxed);
        let tail = self.tail.value.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let sample = unsafe { *self.buffer[(head & self.mask) as usize].get() };
        self.head.value.store(head.wrapping_add(1), Ordering::Release);
        Some(sample)
    }

    /// Consumer side: discard everything queued so far.
    pub fn flush(&self) {
        let tail = self.tail.value.load(Ordering::Acquire);
        self.head.value.store(tail, Ordering::Release);
    }
}

/// State shared between the decoder and its producer handles.
pub(crate) struct SharedInput {
    pub(crate) fifo: SampleFifo,
    /// Latched when a push finds the queue full; observed by the consumer
    /// on its next `process` tick.
    pub(crate) overflow: AtomicBool,
    pub(crate) abort: AtomicBool,
}

impl SharedInput {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            fifo: SampleFifo::new(capacity),
            overflow: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, sample: f32) -> bool {
        if self.fifo.push(sample) {
            true
        } else {
            self.overflow.store(true, Ordering::Release);
            false
        }
    }

    pub(crate) fn push_slice(&self, samples: &[f32]) -> bool {
        if self.fifo.push_slice(samples) {
            true
        } else {
            self.overflow.store(true, Ordering::Release);
            false
        }
    }
}

/// Producer-side handle onto a decoder's sample queue.
///
/// Cloneable, sendable to the capture context; only `push`, `push_slice`
/// and `abort` may be called from there. A failed push latches an overflow
/// that surfaces as `ErrorKind::Overflow` on the consumer's next `process`.
#[derive(Clone)]
pub struct InputHandle {
    pub(crate) shared: Arc<SharedInput>,
}

impl InputHandle {
    /// Queue one sample. Returns false (and latches overflow) when full.
    pub fn push(&self, sample: f32) -> bool {
        self.shared.push(sample)
    }

    /// Queue a burst, all-or-nothing. Returns false (and latches overflow)
    /// when the burst does not fit.
    pub fn push_slice(&self, samples: &[f32]) -> bool {
        self.shared.push_slice(samples)
    }

    /// True when a push would currently fail. Producers that can throttle
    /// check this instead of eating the overflow latch.
    pub fn is_full(&self) -> bool {
        self.shared.fifo.is_full()
    }

    /// Request cancellation; the decoder reports `ErrorKind::Abort` on its
    /// next `process` tick.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_push_pop_order() {
        let fifo = SampleFifo::new(8);
        assert!(fifo.is_empty());
        for v in 0..5 {
            assert!(fifo.push(v as f32));
        }
        assert_eq!(fifo.available(), 5);
        for v in 0..5 {
            assert_eq!(fifo.pop(), Some(v as f32));
        }
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_rejects_push_when_full() {
        let fifo = SampleFifo::new(4);
        for v in 0..4 {
            assert!(fifo.push(v as f32));
        }
        assert!(fifo.is_full());
        assert!(!fifo.push(99.0));
        assert_eq!(fifo.pop(), Some(0.0));
        assert!(fifo.push(99.0));
    }

    #[test]
    fn test_bulk_push_is_all_or_nothing() {
        let fifo = SampleFifo::new(8);
        assert!(fifo.push_slice(&[1.0; 6]));
        assert!(!fifo.push_slice(&[2.0; 3]));
        assert_eq!(fifo.available(), 6);
        assert!(fifo.push_slice(&[2.0; 2]));
        assert!(fifo.is_full());
    }

    #[test]
    fn test_flush_empties_queue() {
        let fifo = SampleFifo::new(8);
        fifo.push_slice(&[1.0; 5]);
        fifo.flush();
        assert!(fifo.is_empty());
        assert_eq!(fifo.pop(), None);
        // indices stay consistent after a flush
        assert!(fifo.push(7.0));
        assert_eq!(fifo.pop(), Some(7.0));
    }

    #[test]
    fn test_wraparound_many_times() {
        let fifo = SampleFifo::new(4);
        for round in 0..10_000 {
            for k in 0..3 {
                assert!(fifo.push((round * 3 + k) as f32));
            }
            for k in 0..3 {
                assert_eq!(fifo.pop(), Some((round * 3 + k) as f32));
            }
        }
    }

    #[test]
    fn test_spsc_two_threads_preserve_order() {
        let fifo = Arc::new(SampleFifo::new(256));
        let producer_fifo = Arc::clone(&fifo);

        const COUNT: u32 = 100_000;

        let producer = thread::spawn(move || {
            for v in 0..COUNT {
                while !producer_fifo.push(v as f32) {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u32;
        while expected < COUNT {
            if let Some(v) = fifo.pop() {
                assert_eq!(v, expected as f32);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_overflow_latches_on_handle() {
        let shared = Arc::new(SharedInput::new(4));
        let handle = InputHandle {
            shared: Arc::clone(&shared),
        };
        assert!(handle.push_slice(&[0.0; 4]));
        assert!(!handle.push(1.0));
        assert!(shared.overflow.load(Ordering::Acquire));
    }
}
