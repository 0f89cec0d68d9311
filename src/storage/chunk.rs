//! Container framing: the self-delimiting envelope wrapped around both
//! change bodies and document bodies.
//!
//! Covers the two chunk types this core actually needs; no bundle or
//! compressed variants.

use sha2::{Digest, Sha256};

use crate::columnar::encoding::{ulebsize, Decoder};
use crate::error::AutomergeError;
use crate::types::ChangeHash;

pub(crate) const MAGIC_BYTES: [u8; 4] = [0x85, 0x6f, 0x4a, 0x83];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkType {
    Document,
    Change,
}

impl From<ChunkType> for u8 {
    fn from(ct: ChunkType) -> Self {
        match ct {
            ChunkType::Document => 0,
            ChunkType::Change => 1,
        }
    }
}

impl ChunkType {
    fn from_byte(b: u8) -> Result<Self, AutomergeError> {
        match b {
            0 => Ok(ChunkType::Document),
            1 => Ok(ChunkType::Change),
            other => Err(AutomergeError::MalformedData(format!(
                "unknown chunk type {other}"
            ))),
        }
    }
}

/// `sha256(type || varint(body.len()) || body)`. The full 32-byte change hash
/// doubles as the chunk's content hash.
pub(crate) fn hash(chunk_type: ChunkType, body: &[u8]) -> ChangeHash {
    let mut prefix = Vec::with_capacity(1 + ulebsize(body.len() as u64) as usize);
    prefix.push(u8::from(chunk_type));
    leb128::write::unsigned(&mut prefix, body.len() as u64).expect("write to Vec cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(&prefix);
    hasher.update(body);
    let digest: [u8; 32] = hasher.finalize().into();
    ChangeHash(digest)
}

/// The 4-byte checksum prefix of a hash, used both for on-wire integrity and
/// as a cheap duplicate-detector.
pub(crate) fn checksum(hash: &ChangeHash) -> [u8; 4] {
    [hash.0[0], hash.0[1], hash.0[2], hash.0[3]]
}

/// Reads the checksum straight out of a chunk's framing, without hashing the
/// body — cheaper than `parse_chunk` for callers (e.g. sync-message dedup)
/// that only need to compare checksums, not validate them.
pub(crate) fn checksum_from_wire(wire: &[u8]) -> Result<[u8; 4], AutomergeError> {
    if wire.len() < 8 || &wire[0..4] != &MAGIC_BYTES[..] {
        return Err(AutomergeError::MalformedData(
            "chunk too short or bad magic bytes".to_string(),
        ));
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(&wire[4..8]);
    Ok(out)
}

/// Wraps `body` in the container framing for `chunk_type`.
pub(crate) fn write_chunk(chunk_type: ChunkType, body: &[u8]) -> Vec<u8> {
    let hash = hash(chunk_type, body);
    let mut out = Vec::with_capacity(4 + 4 + 1 + 5 + body.len());
    out.extend(MAGIC_BYTES);
    out.extend(checksum(&hash));
    out.push(u8::from(chunk_type));
    leb128::write::unsigned(&mut out, body.len() as u64).expect("write to Vec cannot fail");
    out.extend_from_slice(body);
    out
}

pub(crate) struct ParsedChunk<'a> {
    pub(crate) chunk_type: ChunkType,
    pub(crate) hash: ChangeHash,
    pub(crate) body: &'a [u8],
}

/// Parses and validates one container chunk, rejecting bad magic, a mismatched
/// checksum, an unknown chunk type, or trailing bytes with `MalformedData`.
pub(crate) fn parse_chunk(input: &[u8]) -> Result<ParsedChunk<'_>, AutomergeError> {
    let mut dec = Decoder::new(input);
    let magic = dec.read_bytes(4).map_err(|_| {
        AutomergeError::MalformedData("chunk too short for magic bytes".to_string())
    })?;
    if magic != MAGIC_BYTES {
        return Err(AutomergeError::MalformedData(
            "bad magic bytes".to_string(),
        ));
    }
    let checksum_bytes = dec
        .read_bytes(4)
        .map_err(|_| AutomergeError::MalformedData("chunk too short for checksum".to_string()))?;
    let raw_type: u8 = dec
        .read()
        .map_err(|_| AutomergeError::MalformedData("chunk too short for type byte".to_string()))?;
    let chunk_type = ChunkType::from_byte(raw_type)?;
    let body_len: u64 = dec
        .read()
        .map_err(|_| AutomergeError::MalformedData("invalid body length varint".to_string()))?;
    let body = dec
        .read_bytes(body_len as usize)
        .map_err(|_| AutomergeError::MalformedData("chunk body truncated".to_string()))?;
    if !dec.done() {
        return Err(AutomergeError::MalformedData(
            "trailing bytes after chunk body".to_string(),
        ));
    }
    let hash = hash(chunk_type, body);
    if checksum(&hash) != checksum_bytes {
        return Err(AutomergeError::MalformedData(
            "checksum mismatch".to_string(),
        ));
    }
    Ok(ParsedChunk {
        chunk_type,
        hash,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_chunk() {
        let body = b"hello world".to_vec();
        let wire = write_chunk(ChunkType::Change, &body);
        let parsed = parse_chunk(&wire).unwrap();
        assert_eq!(parsed.chunk_type, ChunkType::Change);
        assert_eq!(parsed.body, body.as_slice());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut wire = write_chunk(ChunkType::Document, b"x");
        wire[0] ^= 0xff;
        assert!(parse_chunk(&wire).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut wire = write_chunk(ChunkType::Change, b"some body bytes");
        wire[4] ^= 0xff;
        assert!(parse_chunk(&wire).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut wire = write_chunk(ChunkType::Change, b"abc");
        wire.push(0);
        assert!(parse_chunk(&wire).is_err());
    }
}
