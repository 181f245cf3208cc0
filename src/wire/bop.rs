// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BOP (Begin-Of-Product) payload — the metadata carried immediately after
//! the 16-byte header on a BOP packet.

/// Maximum length of the UTF-8 product-identifier metadata string.
pub const MAX_METADATA_LEN: usize = 1024;

/// Product signature: a 16-byte content hash (MD5-width), content-addressing
/// the product in the external product queue.
pub type Signature = [u8; 16];

/// Parsed BOP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BopPayload {
    pub total_size: u64,
    pub signature: Signature,
    pub payload_len: u16,
    pub metadata: Vec<u8>,
}

impl BopPayload {
    /// Decode a BOP payload from the bytes following the 16-byte header.
    ///
    /// Layout: `total_size: u64`, `signature: [u8; 16]`, `payload_len: u16`,
    /// `metadata_length: u16`, then `metadata` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, &'static str> {
        const FIXED_LEN: usize = 8 + 16 + 2 + 2;
        if bytes.len() < FIXED_LEN {
            return Err("BOP payload shorter than fixed fields");
        }
        let total_size = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&bytes[8..24]);
        let payload_len = u16::from_be_bytes(bytes[24..26].try_into().unwrap());
        let metadata_length = u16::from_be_bytes(bytes[26..28].try_into().unwrap()) as usize;
        if metadata_length > MAX_METADATA_LEN {
            return Err("BOP metadata exceeds maximum length");
        }
        let rest = &bytes[28..];
        if rest.len() < metadata_length {
            return Err("BOP payload truncated before end of metadata");
        }
        Ok(Self {
            total_size,
            signature,
            payload_len,
            metadata: rest[..metadata_length].to_vec(),
        })
    }

    /// Encode this payload for inclusion after a BOP header (used by tests
    /// and by anything constructing synthetic multicast traffic).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28 + self.metadata.len());
        out.extend_from_slice(&self.total_size.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.payload_len.to_be_bytes());
        out.extend_from_slice(&(self.metadata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.metadata);
        out
    }

    /// Number of data blocks this product is expected to be split into.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        if self.payload_len == 0 {
            return 0;
        }
        let payload_len = u64::from(self.payload_len);
        ((self.total_size + payload_len - 1) / payload_len) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bop_round_trip() {
        let bop = BopPayload {
            total_size: 3000,
            signature: [0xAB; 16],
            payload_len: 1200,
            metadata: b"grib2/product-7".to_vec(),
        };
        let bytes = bop.encode();
        assert_eq!(BopPayload::decode(&bytes).unwrap(), bop);
    }

    #[test]
    fn block_count_accounts_for_short_last_block() {
        let bop = BopPayload {
            total_size: 3000,
            signature: [0; 16],
            payload_len: 1200,
            metadata: vec![],
        };
        assert_eq!(bop.block_count(), 3);
    }

    #[test]
    fn rejects_oversized_metadata_length() {
        let mut bytes = vec![0u8; 28];
        bytes[26..28].copy_from_slice(&(2000u16).to_be_bytes());
        assert!(BopPayload::decode(&bytes).is_err());
    }
}
