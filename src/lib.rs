pub mod buffer;
pub mod lock;
pub mod mq;
pub mod sequential;

mod rng;

use std::cell::Cell;
use std::cmp::Ordering;
use std::marker::PhantomData;

pub use mq::BufferedMq;
pub use mq::DeletionBufferMq;
pub use sequential::DAryHeap;
pub use sequential::NodeHeap;
pub use sequential::SiftStrategy;

// Key comparator, injected at construction and held by value. `lt` induces
// the priority order: `extract_top` prefers values whose key is `lt` all
// others.
pub trait Comparator<K>: Clone {
    fn lt(&self, a: &K, b: &K) -> bool;
}

// Natural `<` order, the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct Less;

impl<K: Ord> Comparator<K> for Less {
    #[inline]
    fn lt(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

// Reversed order, turning the queues into max-queues.
#[derive(Clone, Copy, Debug, Default)]
pub struct Greater;

impl<K: Ord> Comparator<K> for Greater {
    #[inline]
    fn lt(&self, a: &K, b: &K) -> bool {
        a > b
    }
}

impl<K, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> bool + Clone,
{
    #[inline]
    fn lt(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}

// Total order induced by a comparator, for sorting value slices by key.
#[inline]
pub(crate) fn key_ordering<K, C: Comparator<K>>(comp: &C, a: &K, b: &K) -> Ordering {
    if comp.lt(a, b) {
        Ordering::Less
    } else if comp.lt(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

// Per-thread access token. A handle carries the thread id that selects the
// home block for locality-biased extraction. Handles are Send but not Sync;
// distinct threads must hold distinct handles.
#[derive(Debug)]
pub struct Handle {
    id: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl Handle {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            _not_sync: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

// Common interface for the relaxed concurrent priority queues.
//
// `push` may be called without locality information; `extract_top` takes the
// caller's handle and returns an element of approximately minimal key, or
// `Err` when both sampled queues were empty. An `Err` does not imply the
// whole queue is empty.
pub trait RelaxedPQueue<K: Send, V: Send>: Send + Sync {
    type PopError;

    fn push(&self, item: (K, V));
    fn extract_top(&self, handle: &Handle) -> Result<(K, V), Self::PopError>;
}

// Capacity and shape parameters for the multiqueue variants, validated at
// construction. The capacities are interrelated: the deletion buffer must be
// able to absorb a full insertion buffer plus one heap node in a single
// refill.
#[derive(Clone, Copy, Debug)]
pub struct MqConfig {
    // Queues per thread; the array holds `c * num_threads` guarded queues.
    pub c: usize,
    // Values per heap node; power of two.
    pub node_size: usize,
    // Insertion buffer capacity; non-zero multiple of `node_size`.
    pub insertion_buffer_size: usize,
    // Deletion buffer capacity; power of two,
    // >= insertion_buffer_size + node_size.
    pub deletion_buffer_size: usize,
    // Arity of the sequential heaps.
    pub heap_degree: usize,
    // Sift variant used by value-granular heaps.
    pub sift: SiftStrategy,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            c: 4,
            node_size: 8,
            insertion_buffer_size: 8,
            deletion_buffer_size: 16,
            heap_degree: 4,
            sift: SiftStrategy::FullDown,
        }
    }
}

impl MqConfig {
    pub(crate) fn validate(&self) {
        assert!(self.c >= 2, "over-provisioning factor must be at least 2");
        assert!(
            self.node_size.is_power_of_two(),
            "node size must be a power of two"
        );
        assert!(
            self.insertion_buffer_size != 0
                && self.insertion_buffer_size % self.node_size == 0,
            "insertion buffer size must be a non-zero multiple of the node size"
        );
        assert!(
            self.deletion_buffer_size.is_power_of_two(),
            "deletion buffer size must be a power of two"
        );
        assert!(
            self.deletion_buffer_size >= self.insertion_buffer_size + self.node_size,
            "deletion buffer must hold the insertion buffer plus one node"
        );
        assert!(self.heap_degree >= 1, "heap degree must be at least 1");
    }
}
