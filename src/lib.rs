//! hipo6 — HIPO/EVIO-6 record-oriented event file writer.
//!
//! Accepts an unbounded stream of opaque event payloads, packs them into
//! fixed-capacity records with a 56-byte binary header, optionally
//! compresses each record's payload (LZ4 fast, LZ4 high, GZIP), and appends
//! records to a file in order.  The multi-threaded writer runs compression
//! on parallel workers over a ring of reusable record slots while keeping
//! on-disk record numbering identical to the order events were added.
//!
//! ```no_run
//! use hipo6::{ByteOrder, Writer};
//!
//! let mut writer = Writer::new(ByteOrder::LittleEndian);
//! writer.open("run.evio")?;
//! writer.add_event(b"first event payload")?;
//! writer.add_event(b"second event payload")?;
//! writer.close()?;
//! # Ok::<(), hipo6::HipoError>(())
//! ```

pub mod codec;
pub mod error;
pub mod header;
pub mod record;
pub mod ring;
pub mod writer;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level re-exports for the common API entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Payload compression selection (wire codes 0..=3).
pub use codec::CompressionType;
/// Crate error enum.
pub use error::HipoError;
/// Crate result alias.
pub use error::Result;
/// Byte order of headers, indexes, and registers.
pub use header::ByteOrder;
/// Structural role of a 56-byte header.
pub use header::HeaderType;
/// The 56-byte record/file/trailer header.
pub use header::RecordHeader;
/// Event accumulation and record materialization.
pub use record::RecordBuilder;
/// The producer/compressor/writer ring.
pub use ring::{RecordSupply, RingItem};
/// Final accounting of a multi-threaded write run.
pub use writer::multi::WriteSummary;
/// Single-threaded and multi-threaded writers plus their options.
pub use writer::{Writer, WriterMT, WriterOptions};
