use std::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// One PRNG per thread, lazily seeded on first use and never shared. Queue
// selection is the only consumer; the generator does not need to be
// cryptographic, only fast and uncorrelated between threads.
thread_local! {
    static QUEUE_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

#[inline]
pub(crate) fn random_index(bound: usize) -> usize {
    debug_assert!(bound > 0);
    QUEUE_RNG.with(|rng| rng.borrow_mut().random_range(0..bound))
}
