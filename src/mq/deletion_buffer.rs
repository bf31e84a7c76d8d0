use crossbeam_utils::CachePadded;

use crate::buffer::RingBuffer;
use crate::lock::{TryLock, TryLockGuard};
use crate::rng;
use crate::sequential::DAryHeap;
use crate::{Comparator, Handle, Less, MqConfig, RelaxedPQueue};

// The simpler multiqueue variant: per queue, one value-granular heap and a
// single FIFO refill buffer, no insertion staging, no locality bias. Pushes
// go straight into the heap under the lock; the buffer caches the heap's
// smallest values so most extractions never sift.
struct DbQueue<K, V> {
    heap: DAryHeap<K, V>,
    buffer: RingBuffer<(K, V)>,
}

impl<K, V> DbQueue<K, V> {
    fn new(config: &MqConfig) -> Self {
        Self {
            heap: DAryHeap::new(config.heap_degree, config.sift),
            buffer: RingBuffer::new(config.deletion_buffer_size),
        }
    }

    fn refill_buffer<C: Comparator<K>>(&mut self, comp: &C) {
        debug_assert!(self.buffer.is_empty());
        while !self.buffer.is_full() && !self.heap.is_empty() {
            let item = self.heap.pop(comp).unwrap();
            self.buffer.push_back(item);
        }
    }

    // The buffer caches an already-extracted prefix; a pushed value smaller
    // than the buffered ones is only found by the next refill, which is the
    // relaxation this variant trades for a trivial push path.
    fn pop_buffered<C: Comparator<K>>(&mut self, comp: &C) -> (K, V) {
        let item = self.buffer.pop_front();
        if self.buffer.is_empty() {
            self.refill_buffer(comp);
        }
        item
    }
}

pub struct DeletionBufferMq<K, V, C = Less> {
    queues: Box<[CachePadded<TryLock<DbQueue<K, V>>>]>,
    num_queues: usize,
    num_threads: usize,
    comp: C,
}

impl<K: Ord, V> DeletionBufferMq<K, V, Less> {
    pub fn new(num_threads: usize) -> Self {
        Self::with_config(num_threads, MqConfig::default(), Less)
    }
}

impl<K, V, C: Comparator<K>> DeletionBufferMq<K, V, C> {
    pub fn with_config(num_threads: usize, config: MqConfig, comp: C) -> Self {
        assert!(num_threads >= 1);
        assert!(config.c >= 2, "over-provisioning factor must be at least 2");
        assert!(config.heap_degree >= 1, "heap degree must be at least 1");
        assert!(
            config.deletion_buffer_size.is_power_of_two(),
            "refill buffer size must be a power of two"
        );
        let num_queues = num_threads * config.c;
        let queues = (0..num_queues)
            .map(|_| CachePadded::new(TryLock::new(DbQueue::new(&config))))
            .collect();
        Self {
            queues,
            num_queues,
            num_threads,
            comp,
        }
    }

    pub fn get_handle(&self, id: usize) -> Handle {
        assert!(id < self.num_threads);
        Handle::new(id)
    }

    #[inline]
    pub fn num_queues(&self) -> usize {
        self.num_queues
    }

    fn lock_random(&self) -> TryLockGuard<'_, DbQueue<K, V>> {
        loop {
            let index = rng::random_index(self.num_queues);
            if let Some(guard) = self.queues[index].try_lock() {
                return guard;
            }
        }
    }

    pub fn push(&self, item: (K, V)) {
        let mut guard = self.lock_random();
        guard.heap.push(&self.comp, item);
    }

    // Two-choice extraction with a bounded first probe: an empty first
    // sample is retried once before the whole call gives up.
    pub fn extract_top(&self) -> Result<(K, V), ()> {
        let mut first = None;
        for attempt in 0..2 {
            let mut guard = self.lock_random();
            if guard.buffer.is_empty() {
                guard.refill_buffer(&self.comp);
            }
            if !guard.buffer.is_empty() {
                if attempt == 1 {
                    return Ok(guard.pop_buffered(&self.comp));
                }
                first = Some(guard);
                break;
            }
            if attempt == 1 {
                return Err(());
            }
        }
        let mut first = first.unwrap();

        let mut second = self.lock_random();
        if second.buffer.is_empty() {
            second.refill_buffer(&self.comp);
        }
        if !second.buffer.is_empty()
            && self
                .comp
                .lt(&second.buffer.front().0, &first.buffer.front().0)
        {
            drop(first);
            Ok(second.pop_buffered(&self.comp))
        } else {
            drop(second);
            Ok(first.pop_buffered(&self.comp))
        }
    }
}

impl<K, V, C> RelaxedPQueue<K, V> for DeletionBufferMq<K, V, C>
where
    K: Send,
    V: Send,
    C: Comparator<K> + Send + Sync,
{
    type PopError = ();

    fn push(&self, item: (K, V)) {
        DeletionBufferMq::push(self, item);
    }

    fn extract_top(&self, _handle: &Handle) -> Result<(K, V), ()> {
        DeletionBufferMq::extract_top(self)
    }
}
