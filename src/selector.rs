use rand::{Rng, SeedableRng, rngs::StdRng};

/// Uniform random pick with replacement.
///
/// Every call draws an index in `0..len` independently, so the same item can
/// come up twice in a row. There is no shuffle-without-replacement cycle.
pub struct Selector {
    rng: StdRng,
}

impl Selector {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.rng.random_range(0..items.len());
        items.get(idx)
    }
}
