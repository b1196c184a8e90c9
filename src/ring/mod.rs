//! Ring-based record supply: a fixed pool of reusable record slots
//! coordinating one producer, K compressor workers, and one writer.

pub mod item;
pub mod supply;

pub use item::RingItem;
pub use supply::RecordSupply;
