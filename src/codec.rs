//! Stateless compression primitives for record payloads.
//!
//! Three algorithms are supported on the wire: LZ4 in its fast and
//! high-compression modes (raw block format, no frame header, no prepended
//! size) and GZIP.  The integer codes stored in the record header's
//! compression word are fixed by the file format:
//!
//! | code | algorithm  |
//! |-----:|------------|
//! | 0    | none       |
//! | 1    | LZ4 fast   |
//! | 2    | LZ4 best   |
//! | 3    | GZIP       |
//!
//! Codes outside 0..=3 are rejected everywhere they can enter.

use std::io::{Cursor, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lz4::block::CompressionMode;

use crate::error::{HipoError, Result};

/// LZ4 high-compression level used for [`CompressionType::Lz4Best`].
const LZ4_BEST_LEVEL: i32 = 9;

/// LZ4 acceleration factor used for [`CompressionType::Lz4`] (1 = no skip).
const LZ4_FAST_ACCELERATION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// CompressionType
// ─────────────────────────────────────────────────────────────────────────────

/// Record payload compression algorithm, as encoded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// Data region stored verbatim.
    #[default]
    None = 0,
    /// LZ4 fast mode.
    Lz4 = 1,
    /// LZ4 high-compression mode.
    Lz4Best = 2,
    /// GZIP (RFC 1952).
    Gzip = 3,
}

impl CompressionType {
    /// Decodes a wire code.  Codes above 3 are invalid and rejected; the
    /// value 4 in particular is *not* a legal boundary.
    pub fn from_code(code: u32) -> Result<CompressionType> {
        match code {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            2 => Ok(CompressionType::Lz4Best),
            3 => Ok(CompressionType::Gzip),
            other => Err(HipoError::UnsupportedCompression(other)),
        }
    }

    /// The wire code for this algorithm.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// True when payloads pass through uncompressed.
    #[inline]
    pub fn is_none(self) -> bool {
        self == CompressionType::None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sizing
// ─────────────────────────────────────────────────────────────────────────────

/// Worst-case compressed size for `len` input bytes under `kind`.
///
/// Callers size destination buffers with this before calling [`compress`].
/// For GZIP the bound is the classic deflate estimate plus header/trailer
/// slack; for LZ4 it is the exact bound of the block format.
pub fn max_compressed_len(kind: CompressionType, len: usize) -> usize {
    match kind {
        CompressionType::None => len,
        CompressionType::Lz4 | CompressionType::Lz4Best => {
            lz4::block::compress_bound(len).unwrap_or(len + (len / 255) + 16)
        }
        CompressionType::Gzip => len + len / 1000 + 64,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compression
// ─────────────────────────────────────────────────────────────────────────────

/// Compresses `src` into `dst`, returning the number of bytes produced.
///
/// LZ4 modes pre-check that `dst` can hold [`max_compressed_len`] and fail
/// with [`HipoError::BufferTooSmall`] otherwise.  GZIP streams into `dst`
/// and reports the same error if the sink fills.  `CompressionType::None`
/// is a plain copy.
pub fn compress(kind: CompressionType, src: &[u8], dst: &mut [u8]) -> Result<usize> {
    match kind {
        CompressionType::None => {
            if dst.len() < src.len() {
                return Err(HipoError::BufferTooSmall {
                    needed: src.len(),
                    available: dst.len(),
                });
            }
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
        CompressionType::Lz4 => {
            lz4_compress(src, dst, CompressionMode::FAST(LZ4_FAST_ACCELERATION))
        }
        CompressionType::Lz4Best => {
            lz4_compress(src, dst, CompressionMode::HIGHCOMPRESSION(LZ4_BEST_LEVEL))
        }
        CompressionType::Gzip => gzip_compress(src, dst),
    }
}

fn lz4_compress(src: &[u8], dst: &mut [u8], mode: CompressionMode) -> Result<usize> {
    let bound = max_compressed_len(CompressionType::Lz4, src.len());
    if dst.len() < bound {
        return Err(HipoError::BufferTooSmall {
            needed: bound,
            available: dst.len(),
        });
    }
    lz4::block::compress_to_buffer(src, Some(mode), false, dst)
        .map_err(|e| HipoError::Codec(format!("lz4 compression failed: {e}")))
}

fn gzip_compress(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let capacity = dst.len();
    let mut encoder = GzEncoder::new(Cursor::new(dst), Compression::default());
    let write_result = encoder.write_all(src).and_then(|_| encoder.try_finish());
    if let Err(e) = write_result {
        // A full cursor surfaces as WriteZero; anything else is a codec fault.
        return if e.kind() == std::io::ErrorKind::WriteZero {
            Err(HipoError::BufferTooSmall {
                needed: max_compressed_len(CompressionType::Gzip, src.len()),
                available: capacity,
            })
        } else {
            Err(HipoError::Codec(format!("gzip compression failed: {e}")))
        };
    }
    let sink = encoder
        .finish()
        .map_err(|e| HipoError::Codec(format!("gzip compression failed: {e}")))?;
    Ok(sink.position() as usize)
}

// ─────────────────────────────────────────────────────────────────────────────
// Decompression
// ─────────────────────────────────────────────────────────────────────────────

/// Decompresses `src` into `dst`, returning the original length.
///
/// Fails with [`HipoError::Codec`] on malformed input and
/// [`HipoError::BufferTooSmall`] when `dst` cannot hold the output.
pub fn decompress(kind: CompressionType, src: &[u8], dst: &mut [u8]) -> Result<usize> {
    match kind {
        CompressionType::None => {
            if dst.len() < src.len() {
                return Err(HipoError::BufferTooSmall {
                    needed: src.len(),
                    available: dst.len(),
                });
            }
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
        CompressionType::Lz4 | CompressionType::Lz4Best => {
            lz4::block::decompress_to_buffer(src, Some(dst.len() as i32), dst)
                .map_err(|e| HipoError::Codec(format!("lz4 decompression failed: {e}")))
        }
        CompressionType::Gzip => {
            let mut decoder = GzDecoder::new(src);
            let mut total = 0;
            loop {
                if total == dst.len() {
                    // Probe one byte to distinguish "exactly full" from overflow.
                    let mut probe = [0u8; 1];
                    match decoder.read(&mut probe) {
                        Ok(0) => break,
                        Ok(_) => {
                            return Err(HipoError::BufferTooSmall {
                                needed: total + 1,
                                available: dst.len(),
                            })
                        }
                        Err(e) => {
                            return Err(HipoError::Codec(format!(
                                "gzip decompression failed: {e}"
                            )))
                        }
                    }
                }
                match decoder.read(&mut dst[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(HipoError::Codec(format!("gzip decompression failed: {e}")))
                    }
                }
            }
            Ok(total)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────
