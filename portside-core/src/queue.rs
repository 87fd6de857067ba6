//! Lock-free double-buffered batch queue
//!
//! Outbound items are collected by many producers and drained by one
//! consumer at a time. Producers claim a contiguous slot range with a single
//! compare-and-swap on the active entity's claim counter, then publish into
//! their slots; the consumer swaps the active entity for a parked standby
//! entity and drains the retired one in claim order. No blocking locks
//! anywhere on either path.

use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

// High bit of the claim word marks an entity sealed: claims against it fail
// and the low bits are frozen at the number of slots to drain.
const SEALED: usize = 1 << (usize::BITS - 1);
const COUNT_MASK: usize = SEALED - 1;

// Spins on a slot's "not yet written" sentinel before yielding the thread.
const SPIN_LIMIT: u32 = 64;

struct Slot<T> {
    written: AtomicBool,
    value: UnsafeCell<Option<T>>,
}

// A slot is written by exactly one producer (the claim winner) and read by
// exactly one consumer (the swap winner), with the written flag as the
// release/acquire hand-off between them.
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot {
            written: AtomicBool::new(false),
            value: UnsafeCell::new(None),
        }
    }
}

struct Entity<T> {
    claim: AtomicUsize,
    slots: Box<[Slot<T>]>,
}

impl<T> Entity<T> {
    fn new(capacity: usize, claim: usize) -> Self {
        Entity {
            claim: AtomicUsize::new(claim),
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
        }
    }

    fn publish(&self, index: usize, item: T) {
        let slot = &self.slots[index];
        // The claim made this slot ours; the written flag hands it over.
        unsafe {
            *slot.value.get() = Some(item);
        }
        slot.written.store(true, Ordering::Release);
    }
}

/// Many-producer, single-drainer queue buffering outbound items.
///
/// Two fixed-size slot arrays alternate between an *active* role (producers
/// claim and publish) and a *standby* role (parked, sealed and empty). A
/// drain atomically swaps the roles and reads the retired array, so
/// producers never contend with the consumer for the same memory.
///
/// Capacity is fixed at construction. A full queue rejects the enqueue and
/// returns the item to the caller; nothing is ever silently dropped.
pub struct BatchQueue<T> {
    entities: [Entity<T>; 2],
    active: AtomicUsize,
}

impl<T> BatchQueue<T> {
    /// Create a queue holding at most `capacity` items per drain cycle.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "batch queue capacity must be non-zero");
        BatchQueue {
            entities: [Entity::new(capacity, 0), Entity::new(capacity, SEALED)],
            active: AtomicUsize::new(0),
        }
    }

    /// Maximum number of items one entity can hold.
    pub fn capacity(&self) -> usize {
        self.entities[0].slots.len()
    }

    /// Number of items currently claimed in the active entity.
    ///
    /// Approximate under concurrency; exact when producers are quiescent.
    pub fn len(&self) -> usize {
        let entity = &self.entities[self.active.load(Ordering::Acquire)];
        entity.claim.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Whether the active entity holds no claimed items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one item, returning it if the queue is full.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        match self.claim(1) {
            Some((entity, start)) => {
                entity.publish(start, item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Append a pre-formed batch as one contiguous claim.
    ///
    /// Either the whole batch is queued adjacently (no other producer's
    /// items interleave it) or the batch is returned untouched. A batch
    /// larger than the queue capacity can never fit and is always returned.
    pub fn enqueue_many(&self, items: Vec<T>) -> Result<(), Vec<T>> {
        if items.is_empty() {
            return Ok(());
        }
        match self.claim(items.len()) {
            Some((entity, start)) => {
                for (offset, item) in items.into_iter().enumerate() {
                    entity.publish(start + offset, item);
                }
                Ok(())
            }
            None => Err(items),
        }
    }

    /// Drain every claimed item into `out`, in claim order.
    ///
    /// Swaps the active entity for the standby, seals the retired claim
    /// counter so racing producers retry against the fresh entity, then
    /// reads the retired slots. Returns `false` without touching `out` when
    /// there was nothing to drain or another drain is still in progress.
    pub fn try_dequeue(&self, out: &mut Vec<T>) -> bool {
        let index = self.active.load(Ordering::Acquire);
        let retired = &self.entities[index];
        if retired.claim.load(Ordering::Acquire) & COUNT_MASK == 0 {
            return false;
        }

        // The standby entity is parked sealed-and-empty; anything else means
        // the previous drain is still resetting it.
        let standby = &self.entities[1 - index];
        if standby.claim.load(Ordering::Acquire) != SEALED {
            return false;
        }
        if self
            .active
            .compare_exchange(index, 1 - index, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Open the fresh entity for claims, then seal the retired one so a
        // straggler that loaded it before the swap fails its claim and
        // retries. The sealed word's low bits freeze the drain count.
        standby.claim.store(0, Ordering::Release);
        let count = retired.claim.fetch_or(SEALED, Ordering::AcqRel) & COUNT_MASK;

        out.reserve(count);
        for slot in &retired.slots[..count] {
            // A producer that claimed just before the swap may still be
            // publishing; wait out the sentinel with a bounded spin.
            let mut spins = 0u32;
            while !slot.written.load(Ordering::Acquire) {
                spins += 1;
                if spins < SPIN_LIMIT {
                    hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            let item = unsafe { (*slot.value.get()).take() };
            debug_assert!(item.is_some());
            if let Some(item) = item {
                out.push(item);
            }
            slot.written.store(false, Ordering::Relaxed);
        }

        // Park the drained entity as the new standby.
        retired.claim.store(SEALED, Ordering::Release);

        #[cfg(feature = "metrics")]
        metrics::counter!("portside_queue_drained_items_total").increment(count as u64);

        true
    }

    fn claim(&self, n: usize) -> Option<(&Entity<T>, usize)> {
        loop {
            let entity = &self.entities[self.active.load(Ordering::Acquire)];
            let claim = entity.claim.load(Ordering::Acquire);
            if claim & SEALED != 0 {
                // Raced a drain swap; reload the fresh active entity.
                hint::spin_loop();
                continue;
            }
            if claim + n > entity.slots.len() {
                return None;
            }
            if entity
                .claim
                .compare_exchange(claim, claim + n, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((entity, claim));
            }
        }
    }
}

impl<T> fmt::Debug for BatchQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
