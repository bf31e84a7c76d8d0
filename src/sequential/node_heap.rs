use std::mem;

use crate::Comparator;

// Sequential d-ary min-heap whose elements are nodes: sorted blocks of
// exactly `node_size` values. Heap order holds between nodes (a parent's
// largest key is never greater than any child's smallest key), so the root
// node always contains the smallest `node_size` values in the heap.
//
// Sifting is merge-based. Swapping whole nodes cannot restore the
// between-node order once key ranges overlap, so an out-of-order
// parent/child pair is repaired by two-way merging the blocks and leaving
// the smaller half in the parent slot. The downward sift re-examines the
// children after every merge and recurses into the child it merged with,
// which is what keeps the invariant exact when sibling ranges interleave.
pub struct NodeHeap<K, V> {
    nodes: Vec<Vec<(K, V)>>,
    node_size: usize,
    degree: usize,
    scratch: Vec<(K, V)>,
}

impl<K, V> NodeHeap<K, V> {
    pub fn new(node_size: usize, degree: usize) -> Self {
        assert!(node_size >= 1);
        assert!(degree >= 1);
        Self {
            nodes: Vec::new(),
            node_size,
            degree,
            scratch: Vec::with_capacity(2 * node_size),
        }
    }

    #[inline]
    pub fn node_size(&self) -> usize {
        self.node_size
    }

    // Size in nodes, not values.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // View of the root node: the smallest `node_size` values, sorted.
    #[inline]
    pub fn top_node(&self) -> &[(K, V)] {
        &self.nodes[0]
    }

    // Pre-allocates node bookkeeping for roughly `hint` further values from
    // the calling thread. No semantic effect.
    pub fn init_touch(&mut self, hint: usize) {
        self.nodes.reserve(hint / self.node_size);
        self.scratch.reserve(2 * self.node_size);
    }

    // Appends a full sorted block at the next heap slot and sifts it up.
    pub fn insert_node<C: Comparator<K>>(&mut self, comp: &C, block: Vec<(K, V)>) {
        assert_eq!(block.len(), self.node_size);
        debug_assert!(block.windows(2).all(|w| !comp.lt(&w[1].0, &w[0].0)));
        self.nodes.push(block);
        self.sift_up(comp, self.nodes.len() - 1);
    }

    // Removes and returns the root node; the last node takes its place and
    // is sifted down.
    pub fn pop_top_node<C: Comparator<K>>(&mut self, comp: &C) -> Vec<(K, V)> {
        assert!(!self.is_empty());
        let top = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(comp, 0);
        }
        top
    }

    // Index of the child whose smallest key is smallest, if any.
    fn min_child<C: Comparator<K>>(&self, comp: &C, index: usize) -> Option<usize> {
        let first = index * self.degree + 1;
        if first >= self.nodes.len() {
            return None;
        }
        let last = usize::min(first + self.degree, self.nodes.len());
        let mut min = first;
        for child in first + 1..last {
            if comp.lt(&self.nodes[child][0].0, &self.nodes[min][0].0) {
                min = child;
            }
        }
        Some(min)
    }

    fn sift_up<C: Comparator<K>>(&mut self, comp: &C, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / self.degree;
            let ordered = {
                let parent_max = &self.nodes[parent].last().unwrap().0;
                let child_min = &self.nodes[index][0].0;
                !comp.lt(child_min, parent_max)
            };
            if ordered {
                break;
            }
            self.merge_nodes(comp, parent, index);
            index = parent;
        }
    }

    fn sift_down<C: Comparator<K>>(&mut self, comp: &C, index: usize) {
        loop {
            let Some(child) = self.min_child(comp, index) else {
                return;
            };
            let ordered = {
                let parent_max = &self.nodes[index].last().unwrap().0;
                let child_min = &self.nodes[child][0].0;
                !comp.lt(child_min, parent_max)
            };
            if ordered {
                return;
            }
            self.merge_nodes(comp, index, child);
            // The child received the larger half and may now be out of
            // order with its own subtree.
            self.sift_down(comp, child);
        }
    }

    // Two-way merge of a parent/child pair: the smaller half ends up in the
    // parent slot, the larger half in the child slot. Node capacities are
    // reused; `scratch` holds the merged run transiently.
    fn merge_nodes<C: Comparator<K>>(&mut self, comp: &C, parent: usize, child: usize) {
        let node_size = self.node_size;
        let mut upper = mem::take(&mut self.nodes[parent]);
        let mut lower = mem::take(&mut self.nodes[child]);
        self.scratch.clear();
        {
            let mut x = upper.drain(..).peekable();
            let mut y = lower.drain(..).peekable();
            loop {
                match (x.peek(), y.peek()) {
                    (Some(a), Some(b)) => {
                        if comp.lt(&b.0, &a.0) {
                            self.scratch.push(y.next().unwrap());
                        } else {
                            self.scratch.push(x.next().unwrap());
                        }
                    }
                    (Some(_), None) => self.scratch.push(x.next().unwrap()),
                    (None, Some(_)) => self.scratch.push(y.next().unwrap()),
                    (None, None) => break,
                }
            }
        }
        upper.extend(self.scratch.drain(..node_size));
        lower.extend(self.scratch.drain(..));
        self.nodes[parent] = upper;
        self.nodes[child] = lower;
    }

    #[cfg(test)]
    fn assert_invariant<C: Comparator<K>>(&self, comp: &C) {
        for (index, node) in self.nodes.iter().enumerate() {
            assert_eq!(node.len(), self.node_size);
            assert!(node.windows(2).all(|w| !comp.lt(&w[1].0, &w[0].0)));
            if index > 0 {
                let parent = (index - 1) / self.degree;
                let parent_max = &self.nodes[parent].last().unwrap().0;
                assert!(
                    !comp.lt(&node[0].0, parent_max),
                    "between-node order violated at {index}"
                );
            }
        }
    }
}
