//! Wait-free single-writer/single-reader exchange between real-time threads.
//!
//! Three slots rotate between the writer, the reader and a shared "back"
//! position. The writer fills its own slot and swaps it into the back
//! position on [`Publisher::publish`]; the reader swaps the back slot out on
//! [`Subscriber::read`] only when something new was committed. Because every
//! slot is owned by exactly one side at a time, the per-slot locks are never
//! contended and neither side ever waits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const INDEX_MASK: u8 = 0b11;
const DIRTY: u8 = 0b100;

struct Shared<T> {
    slots: [Mutex<T>; 3],
    /// Index of the back slot, with [`DIRTY`] set when it holds an unread commit.
    back: AtomicU8,
}

impl<T> Shared<T> {
    fn slot(&self, index: u8) -> MutexGuard<'_, T> {
        self.slots[usize::from(index & INDEX_MASK)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Constructor namespace for a publisher/subscriber pair.
pub struct DoubleBuffer;

impl DoubleBuffer {
    /// Create a linked pair, every slot starting as a clone of `initial`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Clone>(initial: T) -> (Publisher<T>, Subscriber<T>) {
        let shared = Arc::new(Shared {
            slots: [
                Mutex::new(initial.clone()),
                Mutex::new(initial.clone()),
                Mutex::new(initial),
            ],
            back: AtomicU8::new(1),
        });
        (
            Publisher {
                shared: Arc::clone(&shared),
                write: 0,
            },
            Subscriber { shared, read: 2 },
        )
    }
}

/// Writing half. Owned by the producing thread.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
    write: u8,
}

impl<T> Publisher<T> {
    /// Fill the private write slot in place, then commit it.
    pub fn publish_with(&mut self, fill: impl FnOnce(&mut T)) {
        {
            let mut slot = self.shared.slot(self.write);
            fill(&mut slot);
        }
        self.commit();
    }

    /// Commit a fully-populated value.
    pub fn publish(&mut self, value: T) {
        self.publish_with(|slot| *slot = value);
    }

    fn commit(&mut self) {
        let previous = self.shared.back.swap(self.write | DIRTY, Ordering::AcqRel);
        self.write = previous & INDEX_MASK;
    }
}

/// Reading half. Owned by the consuming thread.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    read: u8,
}

impl<T> Subscriber<T> {
    /// Whether a commit is waiting that [`Self::read`] has not picked up yet.
    pub fn has_update(&self) -> bool {
        self.shared.back.load(Ordering::Acquire) & DIRTY != 0
    }

    /// Swap to the newest committed value if there is one.
    ///
    /// Returns whether the value changed since the previous read. When it did
    /// not, the guard still gives access to the stale value.
    pub fn read(&mut self) -> (bool, MutexGuard<'_, T>) {
        let fresh = self.has_update();
        if fresh {
            let previous = self.shared.back.swap(self.read, Ordering::AcqRel);
            self.read = previous & INDEX_MASK;
        }
        (fresh, self.shared.slot(self.read))
    }

    /// Newest committed value, cloned out.
    pub fn latest(&mut self) -> T
    where
        T: Clone,
    {
        let (_, guard) = self.read();
        guard.clone()
    }
}
