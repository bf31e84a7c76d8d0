use crate::buffer::{Buffer, RingBuffer};
use crate::lock::{TryLock, TryLockGuard};
use crate::rng;
use crate::sequential::NodeHeap;
use crate::{key_ordering, Comparator, Handle, Less, MqConfig, RelaxedPQueue};

// One guarded queue per page so that no two queues share a cache line and
// each queue's hot state stays on a single page of its home socket.
#[repr(align(4096))]
struct PageAligned<T>(T);

// The state machine behind one try-lock: a small sorted prefix ready for
// extraction (deletion buffer), an unsorted staging area for recent pushes
// (insertion buffer), and the node heap holding everything else. All three
// are touched only while the lock is held.
struct LocalQueue<K, V> {
    insertion: Buffer<(K, V)>,
    deletion: RingBuffer<(K, V)>,
    heap: NodeHeap<K, V>,
}

impl<K, V> LocalQueue<K, V> {
    fn new(config: &MqConfig) -> Self {
        Self {
            insertion: Buffer::new(config.insertion_buffer_size),
            deletion: RingBuffer::new(config.deletion_buffer_size),
            heap: NodeHeap::new(config.node_size, config.heap_degree),
        }
    }

    // Sorts the full insertion buffer and bulk-inserts it into the heap as
    // whole nodes.
    fn flush_insertion_buffer<C: Comparator<K>>(&mut self, comp: &C) {
        debug_assert!(self.insertion.is_full());
        let node_size = self.heap.node_size();
        let items = self.insertion.as_mut_vec();
        items.sort_unstable_by(|a, b| key_ordering(comp, &a.0, &b.0));
        while !items.is_empty() {
            let block = items.split_off(items.len() - node_size);
            self.heap.insert_node(comp, block);
        }
    }

    // We try to insert the new value into the deletion buffer if it is
    // smaller than the largest buffered element, evicting that element into
    // the insertion buffer when the deletion buffer is full. Values that are
    // not smaller than the buffered prefix go to the insertion buffer, which
    // may get flushed in the process.
    fn push<C: Comparator<K>>(&mut self, comp: &C, item: (K, V)) {
        if !self.deletion.is_empty() {
            let mut pos = self.deletion.len();
            while pos > 0 && comp.lt(&item.0, &self.deletion.get(pos - 1).0) {
                pos -= 1;
            }
            if pos < self.deletion.len() {
                if self.deletion.is_full() {
                    if self.insertion.is_full() {
                        self.flush_insertion_buffer(comp);
                    }
                    let evicted = self.deletion.pop_back();
                    self.insertion.push(evicted);
                }
                self.deletion.insert_at(pos, item);
                return;
            }
        }
        if self.insertion.is_full() {
            self.flush_insertion_buffer(comp);
        }
        self.insertion.push(item);
    }

    // Postcondition: the deletion buffer holds the smallest available values
    // of heap and insertion buffer, sorted, or the queue is entirely empty.
    fn refill_deletion_buffer<C: Comparator<K>>(&mut self, comp: &C) {
        debug_assert!(self.deletion.is_empty());
        if self.insertion.is_full() {
            self.flush_insertion_buffer(comp);
            while !self.deletion.is_full() && !self.heap.is_empty() {
                for item in self.heap.pop_top_node(comp) {
                    self.deletion.push_back(item);
                }
            }
        } else if self.heap.is_empty() {
            let items = self.insertion.as_mut_vec();
            items.sort_unstable_by(|a, b| key_ordering(comp, &a.0, &b.0));
            for item in items.drain(..) {
                self.deletion.push_back(item);
            }
        } else {
            // Merge the top node with the staged values that are no larger
            // than its last key; everything left in the insertion buffer is
            // then strictly larger than the refilled prefix.
            let top = self.heap.pop_top_node(comp);
            let mut small = Vec::new();
            {
                let bound = &top.last().unwrap().0;
                let items = self.insertion.as_mut_vec();
                let mut i = 0;
                while i < items.len() {
                    if comp.lt(bound, &items[i].0) {
                        i += 1;
                    } else {
                        small.push(items.swap_remove(i));
                    }
                }
            }
            small.sort_unstable_by(|a, b| key_ordering(comp, &a.0, &b.0));

            let mut x = top.into_iter().peekable();
            let mut y = small.into_iter().peekable();
            loop {
                match (x.peek(), y.peek()) {
                    (Some(a), Some(b)) => {
                        if comp.lt(&b.0, &a.0) {
                            self.deletion.push_back(y.next().unwrap());
                        } else {
                            self.deletion.push_back(x.next().unwrap());
                        }
                    }
                    (Some(_), None) => self.deletion.push_back(x.next().unwrap()),
                    (None, Some(_)) => self.deletion.push_back(y.next().unwrap()),
                    (None, None) => break,
                }
            }
        }
    }
}

// Buffered multiqueue: `c * num_threads` guarded local queues, randomized
// two-choice extraction with a locality-biased first probe over the caller's
// home block.
pub struct BufferedMq<K, V, C = Less> {
    queues: Box<[PageAligned<TryLock<LocalQueue<K, V>>>]>,
    num_queues: usize,
    c: usize,
    num_threads: usize,
    comp: C,
}

impl<K: Ord, V> BufferedMq<K, V, Less> {
    pub fn new(num_threads: usize) -> Self {
        Self::with_config(num_threads, MqConfig::default(), Less)
    }
}

impl<K, V, C: Comparator<K>> BufferedMq<K, V, C> {
    pub fn with_config(num_threads: usize, config: MqConfig, comp: C) -> Self {
        assert!(num_threads >= 1);
        config.validate();
        let num_queues = num_threads * config.c;
        let queues = (0..num_queues)
            .map(|_| PageAligned(TryLock::new(LocalQueue::new(&config))))
            .collect();
        Self {
            queues,
            num_queues,
            c: config.c,
            num_threads,
            comp,
        }
    }

    // Handles carry the thread id used for locality-biased extraction.
    // Distinct threads must use distinct ids below `num_threads`.
    pub fn get_handle(&self, id: usize) -> Handle {
        assert!(id < self.num_threads);
        Handle::new(id)
    }

    #[inline]
    pub fn num_queues(&self) -> usize {
        self.num_queues
    }

    // Pre-faults the heap storage of the handle's home block from the
    // calling thread, for first-touch placement. `hint` is in values per
    // queue. No semantic effect.
    pub fn init_touch(&self, handle: &Handle, hint: usize) {
        let base = self.c * handle.id();
        for i in 0..self.c {
            loop {
                if let Some(mut guard) = self.queues[base + i].0.try_lock() {
                    guard.heap.init_touch(hint);
                    break;
                }
            }
        }
    }

    fn lock_random(&self) -> TryLockGuard<'_, LocalQueue<K, V>> {
        loop {
            let index = rng::random_index(self.num_queues);
            if let Some(guard) = self.queues[index].0.try_lock() {
                return guard;
            }
        }
    }

    // Walks the caller's home block from a random offset; if every local
    // attempt fails, escalates to uniform global probing on the last one.
    fn lock_first(&self, handle: &Handle) -> TryLockGuard<'_, LocalQueue<K, V>> {
        let base = self.c * handle.id();
        let offset = rng::random_index(self.c);
        for i in 0..self.c {
            let index = base + ((offset + i) % self.c);
            if let Some(guard) = self.queues[index].0.try_lock() {
                return guard;
            }
            if i == self.c - 1 {
                return self.lock_random();
            }
        }
        unreachable!()
    }

    pub fn push(&self, item: (K, V)) {
        let mut guard = self.lock_random();
        guard.push(&self.comp, item);
    }

    // Two-choice extraction. Fails only when both sampled queues turn out
    // empty, which does not imply the whole multiqueue is empty.
    pub fn extract_top(&self, handle: &Handle) -> Result<(K, V), ()> {
        let mut guard = self.lock_first(handle);
        if guard.deletion.is_empty() {
            guard.refill_deletion_buffer(&self.comp);
        }
        let first = if guard.deletion.is_empty() {
            drop(guard);
            None
        } else {
            Some(guard)
        };

        // The second queue is sampled globally. A probe that lands on the
        // queue locked above simply fails its CAS and resamples.
        let mut second = self.lock_random();
        if second.deletion.is_empty() {
            second.refill_deletion_buffer(&self.comp);
        }
        if second.deletion.is_empty() {
            drop(second);
            return match first {
                Some(mut guard) => Ok(guard.deletion.pop_front()),
                None => Err(()),
            };
        }
        match first {
            Some(mut guard) => {
                if self
                    .comp
                    .lt(&second.deletion.front().0, &guard.deletion.front().0)
                {
                    drop(guard);
                    Ok(second.deletion.pop_front())
                } else {
                    drop(second);
                    Ok(guard.deletion.pop_front())
                }
            }
            None => Ok(second.deletion.pop_front()),
        }
    }
}

impl<K, V, C> RelaxedPQueue<K, V> for BufferedMq<K, V, C>
where
    K: Send,
    V: Send,
    C: Comparator<K> + Send + Sync,
{
    type PopError = ();

    fn push(&self, item: (K, V)) {
        BufferedMq::push(self, item);
    }

    fn extract_top(&self, handle: &Handle) -> Result<(K, V), ()> {
        BufferedMq::extract_top(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    fn local(config: &MqConfig) -> LocalQueue<i64, i64> {
        LocalQueue::new(config)
    }

    fn extract(queue: &mut LocalQueue<i64, i64>) -> Option<(i64, i64)> {
        if queue.deletion.is_empty() {
            queue.refill_deletion_buffer(&Less);
        }
        if queue.deletion.is_empty() {
            None
        } else {
            Some(queue.deletion.pop_front())
        }
    }

    // A guarded queue in isolation is an exact priority queue: the deletion
    // buffer is always a sorted prefix of everything it holds.
    #[test]
    fn isolated_queue_extracts_in_order() {
        let config = MqConfig::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut keys: Vec<i64> = (0..1000).collect();
        keys.shuffle(&mut rng);

        let mut queue = local(&config);
        for &key in &keys {
            queue.push(&Less, (key, key));
        }

        let mut drained = Vec::new();
        while let Some((key, _)) = extract(&mut queue) {
            drained.push(key);
        }
        assert_eq!(drained, (0..1000).collect::<Vec<_>>());
        assert!(extract(&mut queue).is_none());
    }

    #[test]
    fn interleaved_against_reference() {
        let config = MqConfig::default();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut queue = local(&config);
        let mut reference = BinaryHeap::new();

        for _ in 0..1000 {
            for _ in 0..rng.random_range(0..=10usize) {
                let key = rng.random_range(-100..=100i64);
                queue.push(&Less, (key, 0));
                reference.push(Reverse(key));
            }
            for _ in 0..rng.random_range(0..=10usize) {
                match extract(&mut queue) {
                    Some((key, _)) => assert_eq!(key, reference.pop().unwrap().0),
                    None => assert!(reference.is_empty()),
                }
            }
        }
        while let Some((key, _)) = extract(&mut queue) {
            assert_eq!(key, reference.pop().unwrap().0);
        }
        assert!(reference.is_empty());
    }

    #[test]
    fn dijkstra_pattern_against_reference() {
        let config = MqConfig::default();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut queue = local(&config);
        let mut reference = BinaryHeap::new();

        queue.push(&Less, (0, 0));
        reference.push(Reverse(0i64));
        for _ in 0..1000 {
            let (top, _) = extract(&mut queue).unwrap();
            assert_eq!(top, reference.pop().unwrap().0);
            for _ in 0..rng.random_range(1..=10usize) {
                let key = top + rng.random_range(-100..=100i64);
                queue.push(&Less, (key, 0));
                reference.push(Reverse(key));
            }
        }
        while let Some((key, _)) = extract(&mut queue) {
            assert_eq!(key, reference.pop().unwrap().0);
        }
        assert!(reference.is_empty());
    }

    // Refill postcondition: after a refill the deletion buffer holds the
    // smallest remaining values.
    #[test]
    fn refill_yields_global_prefix() {
        let config = MqConfig::default();
        let mut rng = SmallRng::seed_from_u64(4);
        let mut queue = local(&config);
        let mut remaining: Vec<i64> = Vec::new();

        for round in 0..50 {
            for _ in 0..rng.random_range(0..30usize) {
                let key = rng.random_range(0..1000i64);
                queue.push(&Less, (key, round));
                remaining.push(key);
            }
            if queue.deletion.is_empty() {
                queue.refill_deletion_buffer(&Less);
                let mut sorted = remaining.clone();
                sorted.sort_unstable();
                let buffered: Vec<i64> =
                    (0..queue.deletion.len()).map(|i| queue.deletion.get(i).0).collect();
                assert_eq!(buffered, sorted[..buffered.len()]);
            }
            for _ in 0..rng.random_range(0..20usize) {
                if let Some((key, _)) = extract(&mut queue) {
                    let at = remaining.iter().position(|&k| k == key).unwrap();
                    remaining.swap_remove(at);
                } else {
                    assert!(remaining.is_empty());
                }
            }
        }
    }

    // Pushes that fit in the insertion buffer never touch the heap.
    #[test]
    fn staged_pushes_leave_heap_empty() {
        let config = MqConfig::default();
        let mut queue = local(&config);
        for key in 0..config.insertion_buffer_size as i64 {
            queue.push(&Less, (key, 0));
        }
        assert!(queue.heap.is_empty());
        assert_eq!(queue.insertion.len(), config.insertion_buffer_size);

        // One more push forces the flush.
        queue.push(&Less, (-1, 0));
        assert_eq!(queue.heap.len(), 1);
    }

    // Flushing a full insertion buffer and popping it back from the heap is
    // the identity on the multiset.
    #[test]
    fn flush_then_pop_roundtrip() {
        let config = MqConfig::default();
        let mut queue = local(&config);
        let keys = [5i64, 3, 9, 1, 7, 3, 8, 2];
        for &key in &keys {
            queue.push(&Less, (key, 0));
        }
        queue.flush_insertion_buffer(&Less);
        assert!(queue.insertion.is_empty());

        let node = queue.heap.pop_top_node(&Less);
        let mut expected = keys.to_vec();
        expected.sort_unstable();
        assert_eq!(node.iter().map(|v| v.0).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn greater_comparator_reverses_order() {
        let config = MqConfig::default();
        let mut queue: LocalQueue<i64, i64> = LocalQueue::new(&config);
        for key in 0..100 {
            queue.push(&crate::Greater, (key, 0));
        }
        let mut drained = Vec::new();
        loop {
            if queue.deletion.is_empty() {
                queue.refill_deletion_buffer(&crate::Greater);
            }
            if queue.deletion.is_empty() {
                break;
            }
            drained.push(queue.deletion.pop_front().0);
        }
        assert_eq!(drained, (0..100).rev().collect::<Vec<_>>());
    }
}
