//! Binary encoding of embedding vectors for the `embeddings.vector` column.
//!
//! Blob layout:
//!
//! - version: u8 (1)
//! - dimensions: u32 (little-endian)
//! - checksum: u32 (CRC32 of the payload, little-endian)
//! - payload: [f32; dimensions] (little-endian)

/// Current blob format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + dimensions(4) + checksum(4)
const HEADER_SIZE: usize = 9;

/// Errors that can occur while decoding a stored vector.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VectorCodecError {
    #[error("Invalid blob: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: blob version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Dimension mismatch: header says {expected}, payload has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Checksum mismatch: blob may be corrupted")]
    ChecksumMismatch,
}

/// Encode a vector into its stored blob form.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(vector.len() * 4);
    for &value in vector {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let mut blob = Vec::with_capacity(HEADER_SIZE + payload.len());
    blob.push(FORMAT_VERSION);
    blob.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    blob.extend_from_slice(&checksum(&payload).to_le_bytes());
    blob.extend_from_slice(&payload);
    blob
}

/// Decode a blob written by [`encode_vector`].
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, VectorCodecError> {
    if blob.len() < HEADER_SIZE {
        return Err(VectorCodecError::InvalidFormat(format!(
            "{} bytes is shorter than the header",
            blob.len()
        )));
    }

    let version = blob[0];
    if version != FORMAT_VERSION {
        return Err(VectorCodecError::VersionMismatch(version, FORMAT_VERSION));
    }

    let dimensions = u32::from_le_bytes([blob[1], blob[2], blob[3], blob[4]]) as usize;
    let stored_checksum = u32::from_le_bytes([blob[5], blob[6], blob[7], blob[8]]);
    let payload = &blob[HEADER_SIZE..];

    if payload.len() % 4 != 0 || payload.len() / 4 != dimensions {
        return Err(VectorCodecError::DimensionMismatch {
            expected: dimensions,
            got: payload.len() / 4,
        });
    }

    if checksum(payload) != stored_checksum {
        return Err(VectorCodecError::ChecksumMismatch);
    }

    Ok(payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let vector = vec![1.0, -0.5, 0.25, f32::MIN_POSITIVE];
        let blob = encode_vector(&vector);
        assert_eq!(blob.len(), HEADER_SIZE + 16);
        assert_eq!(decode_vector(&blob).unwrap(), vector);
    }

    #[test]
    fn test_empty_vector() {
        let blob = encode_vector(&[]);
        assert_eq!(decode_vector(&blob).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_truncated_blob() {
        let mut blob = encode_vector(&[1.0, 2.0]);
        blob.truncate(HEADER_SIZE + 6);
        assert!(matches!(
            decode_vector(&blob),
            Err(VectorCodecError::DimensionMismatch { expected: 2, .. })
        ));
        assert!(matches!(
            decode_vector(&[1, 0]),
            Err(VectorCodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut blob = encode_vector(&[1.0]);
        blob[0] = 9;
        assert_eq!(
            decode_vector(&blob),
            Err(VectorCodecError::VersionMismatch(9, FORMAT_VERSION))
        );
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut blob = encode_vector(&[1.0, 0.0, 0.0]);
        blob[HEADER_SIZE + 1] ^= 0xFF;
        assert_eq!(decode_vector(&blob), Err(VectorCodecError::ChecksumMismatch));
    }

    #[test]
    fn test_header_carries_crc32_of_payload() {
        let blob = encode_vector(&[0.5, -2.0]);
        let stored = u32::from_le_bytes([blob[5], blob[6], blob[7], blob[8]]);
        assert_eq!(stored, crc32fast::hash(&blob[HEADER_SIZE..]));
    }
}
