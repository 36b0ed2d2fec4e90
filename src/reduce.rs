//! The value pair passed into `reduce` functions.

/// Carries the running accumulator (`last_value`) and the freshly accepted
/// item (`next_value`) into a `reduce` step function.
#[derive(Debug, Clone)]
pub struct Reduce<T, V> {
    /// The accumulator from the previous step (or the seed on the first).
    pub last_value: V,
    /// The item just accepted by the parent composable.
    pub next_value: T,
}

impl<T, V> Reduce<T, V> {
    /// Pair an accumulator with the next item.
    pub fn new(last_value: V, next_value: T) -> Self {
        Self {
            last_value,
            next_value,
        }
    }
}
