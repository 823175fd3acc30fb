//! Snapshot files
//!
//! A snapshot is a fixed header followed by a bincode payload:
//!
//! ```text
//! magic "KVEC" | version u32 | crc32 u32 | payload length u64 | payload
//! ```
//!
//! All integers are little-endian. Files are written to a temporary sibling
//! and renamed into place, so a crash mid-write leaves the previous snapshot.

use crate::error::{Result, VecError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Magic bytes for KeraVec snapshot files: "KVEC"
const MAGIC_BYTES: &[u8; 4] = b"KVEC";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;

/// Encode `value` as a complete snapshot image
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let checksum = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(MAGIC_BYTES);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a snapshot image, validating magic, version, length and checksum
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_SIZE {
        return Err(VecError::InvalidFormat(format!(
            "snapshot is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(VecError::InvalidFormat("Invalid magic bytes".to_string()));
    }

    let version = u32::from_le_bytes(word(&bytes[4..8]));
    if version != VERSION {
        return Err(VecError::VersionMismatch {
            expected: VERSION,
            actual: version,
        });
    }

    let checksum = u32::from_le_bytes(word(&bytes[8..12]));
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..20]);
    let len = u64::from_le_bytes(len_bytes) as usize;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != len {
        return Err(VecError::InvalidFormat(format!(
            "payload length {} does not match header ({})",
            payload.len(),
            len
        )));
    }
    if crc32fast::hash(payload) != checksum {
        return Err(VecError::ChecksumMismatch);
    }

    Ok(bincode::deserialize(payload)?)
}

fn word(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

/// Write a snapshot file, replacing any existing one
pub fn save<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let image = encode(value)?;

    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&image)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    debug!("Wrote snapshot {} ({} bytes)", path.display(), image.len());
    Ok(())
}

/// Read a snapshot file
pub fn load<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let value = decode(&bytes)?;
    info!("Loaded snapshot {} ({} bytes)", path.display(), bytes.len());
    Ok(value)
}
