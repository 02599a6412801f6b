use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Error returned by a non-blocking queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    Empty,
}

struct Slot<T> {
    turn: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

/// Fixed-capacity MPMC ring buffer. Each slot carries a turn counter: a
/// producer may claim slot `i` when `turn == 2 * (i / cap)`, a consumer when
/// `turn == 2 * (i / cap) + 1`. Capacity must be a power of two so slot
/// lookup is a mask instead of a modulo.
pub struct Queue<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// `capacity` is rounded up to the next power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots: Vec<CachePadded<Slot<T>>> = (0..capacity)
            .map(|i| CachePadded::new(Slot { turn: AtomicUsize::new(i), value: UnsafeCell::new(None) }))
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// On `Full`, returns `value` back to the caller so it can be retried or
    /// run inline instead of being dropped.
    pub fn try_enqueue(&self, value: T) -> Result<(), (QueueError, T)> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.turn.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        unsafe { *slot.value.get() = Some(value) };
                        slot.turn.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return Err((QueueError::Full, value));
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    pub fn try_dequeue(&self) -> Result<T, QueueError> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.turn.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).take() }.expect("slot marked ready but empty");
                        slot.turn.store(pos + self.mask + 1, Ordering::Release);
                        return Ok(value);
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return Err(QueueError::Empty);
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_thread_fifo_order() {
        let q: Queue<u32> = Queue::with_capacity(4);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert_eq!(q.try_dequeue().unwrap(), 1);
        assert_eq!(q.try_dequeue().unwrap(), 2);
        assert_eq!(q.try_dequeue().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn reports_full_at_capacity() {
        let q: Queue<u32> = Queue::with_capacity(2);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert_eq!(q.try_enqueue(3).unwrap_err(), (QueueError::Full, 3));
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        let q = Arc::new(Queue::<u32>::with_capacity(64));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        let v = t * 1000 + i;
                        while q.try_enqueue(v).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                let consumed = consumed.clone();
                thread::spawn(move || {
                    loop {
                        match q.try_dequeue() {
                            Ok(_) => {
                                consumed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(QueueError::Empty) => {
                                if consumed.load(Ordering::Relaxed) >= 4000 {
                                    break;
                                }
                                thread::yield_now();
                            }
                            Err(QueueError::Full) => unreachable!(),
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(consumed.load(Ordering::Relaxed), 4000);
    }
}
