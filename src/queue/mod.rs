//! Bounded FIFO and infinite multi-strategy queues (spec.md §4.6).

pub mod fifo;
pub mod infinite;

pub use fifo::Fifo;
pub use infinite::InfiniteQueue;

/// One stored item plus the time it was stored, the unit `Queue<SM,SO,T>`
/// store containers carry (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct QueueItem<T> {
    pub value: T,
    pub stored_at: f64,
}
