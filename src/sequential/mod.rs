pub mod dary_heap;
pub mod node_heap;

pub use dary_heap::DAryHeap;
pub use node_heap::NodeHeap;

// How a heap restores order after removing the root.
//
// `FullDown` walks the hole from the root to a leaf along the smallest-child
// path and sifts the element that fills the final slot back up; `FullUp` is
// the classical variant that moves the last element to the root and sifts it
// down. Both preserve the heap-order invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiftStrategy {
    FullDown,
    FullUp,
}
