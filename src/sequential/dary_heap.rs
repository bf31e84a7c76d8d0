use crate::sequential::SiftStrategy;
use crate::Comparator;

// Sequential d-ary min-heap over `(key, payload)` values, array-backed with
// 0-based child/parent arithmetic. The comparator is passed into every
// mutating call so the heap itself stays a plain container.
pub struct DAryHeap<K, V> {
    data: Vec<(K, V)>,
    degree: usize,
    strategy: SiftStrategy,
}

impl<K, V> DAryHeap<K, V> {
    pub fn new(degree: usize, strategy: SiftStrategy) -> Self {
        assert!(degree >= 1);
        Self {
            data: Vec::new(),
            degree,
            strategy,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn top(&self) -> Option<&(K, V)> {
        self.data.first()
    }

    // Pre-allocates backing storage for `hint` further values. Called from
    // the owning thread before the workload starts so the pages are
    // first-touched locally; no semantic effect.
    pub fn init_touch(&mut self, hint: usize) {
        self.data.reserve(hint);
    }

    #[inline]
    fn parent(&self, index: usize) -> usize {
        (index - 1) / self.degree
    }

    #[inline]
    fn first_child(&self, index: usize) -> usize {
        index * self.degree + 1
    }

    // Index of the child with the smallest key, if any.
    fn min_child<C: Comparator<K>>(&self, comp: &C, index: usize) -> Option<usize> {
        let first = self.first_child(index);
        if first >= self.data.len() {
            return None;
        }
        let last = usize::min(first + self.degree, self.data.len());
        let mut min = first;
        for child in first + 1..last {
            if comp.lt(&self.data[child].0, &self.data[min].0) {
                min = child;
            }
        }
        Some(min)
    }

    fn sift_up<C: Comparator<K>>(&mut self, comp: &C, mut index: usize) {
        while index > 0 {
            let parent = self.parent(index);
            if !comp.lt(&self.data[index].0, &self.data[parent].0) {
                break;
            }
            self.data.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down<C: Comparator<K>>(&mut self, comp: &C, mut index: usize) {
        while let Some(child) = self.min_child(comp, index) {
            if !comp.lt(&self.data[child].0, &self.data[index].0) {
                break;
            }
            self.data.swap(index, child);
            index = child;
        }
    }

    pub fn push<C: Comparator<K>>(&mut self, comp: &C, item: (K, V)) {
        self.data.push(item);
        self.sift_up(comp, self.data.len() - 1);
    }

    pub fn pop<C: Comparator<K>>(&mut self, comp: &C) -> Option<(K, V)> {
        if self.data.len() <= 1 {
            return self.data.pop();
        }
        match self.strategy {
            SiftStrategy::FullUp => {
                let last = self.data.len() - 1;
                self.data.swap(0, last);
                let top = self.data.pop();
                self.sift_down(comp, 0);
                top
            }
            SiftStrategy::FullDown => {
                // Walk the hole to the bottom along the smallest-child path;
                // the root value rides down with it. The final slot then
                // trades places with the last element, which sifts back up.
                let mut hole = 0;
                while let Some(child) = self.min_child(comp, hole) {
                    self.data.swap(hole, child);
                    hole = child;
                }
                let last = self.data.len() - 1;
                if hole != last {
                    self.data.swap(hole, last);
                }
                let top = self.data.pop();
                if hole < self.data.len() {
                    self.sift_up(comp, hole);
                }
                top
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Less;

    fn drain(heap: &mut DAryHeap<u32, ()>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some((key, ())) = heap.pop(&Less) {
            out.push(key);
        }
        out
    }

    #[test]
    fn both_strategies_sort() {
        for strategy in [SiftStrategy::FullDown, SiftStrategy::FullUp] {
            for degree in [1, 2, 3, 4, 8] {
                let mut heap = DAryHeap::new(degree, strategy);
                for key in (0..200u32).rev() {
                    heap.push(&Less, (key, ()));
                }
                assert_eq!(heap.top().unwrap().0, 0);
                let drained = drain(&mut heap);
                assert!(drained.windows(2).all(|w| w[0] <= w[1]));
                assert_eq!(drained.len(), 200);
            }
        }
    }

    #[test]
    fn duplicates_are_kept() {
        let mut heap = DAryHeap::new(4, SiftStrategy::FullDown);
        for _ in 0..10 {
            heap.push(&Less, (7u32, ()));
        }
        assert_eq!(drain(&mut heap), vec![7; 10]);
    }
}
