//! Streaming SHA-256 over a reusable read buffer.

use std::fmt::Write as _;
use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Digest algorithm name shown in reports.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Hashes readers chunk by chunk through one buffer allocated up front.
#[derive(Debug)]
pub struct StreamDigester {
    buffer: Vec<u8>,
}

impl StreamDigester {
    /// `buffer_size` of zero is treated as one byte.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0; buffer_size.max(1)],
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Hex digest of everything `reader` yields, plus the byte count.
    ///
    /// Any read error aborts the digest; no partial value is returned.
    pub fn digest(&mut self, reader: &mut dyn Read) -> io::Result<(String, u64)> {
        let mut hasher = Sha256::new();
        let mut total = 0u64;
        loop {
            let read = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            hasher.update(&self.buffer[..read]);
            total += read as u64;
        }
        Ok((hash_hex(&hasher.finalize()), total))
    }
}

/// One-shot SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    hash_hex(&Sha256::digest(data))
}

/// Lowercase hex rendering of digest bytes.
pub fn hash_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}
