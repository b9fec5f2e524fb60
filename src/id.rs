//! Transaction id generation
//!
//! Transaction ids are the primary key for matching responses to
//! queries, so they must be unpredictable to an off-path attacker. A
//! counter or a time seed will not do; each resolver context owns a PRNG
//! seeded from the operating system's entropy source.
//!
//! Sixteen bits collide fast under load. The caller retries a bounded
//! number of times against its set of live ids and then accepts a
//! duplicate, because response matching also verifies the question.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How often a caller should retry on collision before giving up and
/// accepting a duplicate id.
pub const MAX_COLLISION_RETRIES: usize = 8;

/// Per-context transaction id generator
///
/// # Example
///
/// ```
/// use lazyresolv::id::IdGenerator;
///
/// let mut ids = IdGenerator::new();
/// let a = ids.generate();
/// let b = ids.generate();
/// // a and b are probably distinct, never predictable
/// # let _ = (a, b);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
}

impl IdGenerator {
    /// Create a generator seeded from the OS entropy source
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Produce one 16-bit transaction id
    pub fn generate(&mut self) -> u16 {
        self.rng.gen()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
