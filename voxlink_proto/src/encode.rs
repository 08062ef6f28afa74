//! Outbound (client role) frame encoding.
//!
//! All frames produced here are final (`FIN` set) and masked.

use super::*;

use alloc::vec::Vec;
use arrayvec::ArrayVec;

/// Errors that can occur while encoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The destination buffer cannot hold the header and the payload.
    #[error("frame buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Encodes the header of a final, masked frame.
///
/// The smallest length class able to represent `payload_len` is always chosen.
#[inline]
pub fn encode_header(opcode: Opcode, payload_len: u64, key: MaskKey) -> ArrayVec<u8, MAX_HEADER_LEN> {
    let mut header = ArrayVec::new_const();

    header.push(FIN_BIT | opcode.bits());

    if payload_len <= MAX_LITERAL_LEN {
        // fits in 7 bits
        header.push(MASK_BIT | payload_len as u8);
    } else if let Ok(len) = u16::try_from(payload_len) {
        header.push(MASK_BIT | LENGTH_CLASS_16);
        header.extend(len.to_be_bytes());
    } else {
        header.push(MASK_BIT | LENGTH_CLASS_64);
        header.extend(payload_len.to_be_bytes());
    }

    header.extend(key);

    debug_assert_eq!(header.len(), header_len(payload_len, true));

    header
}

/// Encodes a complete masked frame into `dest`, returning the number of bytes written.
///
/// Fails, leaving `dest` untouched, if it is smaller than header + payload.
#[inline]
pub fn encode_frame(
    opcode: Opcode,
    payload: &[u8],
    key: MaskKey,
    dest: &mut [u8],
) -> Result<usize, EncodeError> {
    let payload_len = payload.len() as u64;
    let needed = header_len(payload_len, true) + payload.len();
    let available = dest.len();

    let Some(dest) = dest.get_mut(..needed) else {
        return Err(EncodeError::BufferTooSmall { needed, available });
    };

    let header = encode_header(opcode, payload_len, key);
    let (header_dest, payload_dest) = dest.split_at_mut(header.len());

    header_dest.copy_from_slice(&header);
    payload_dest.copy_from_slice(payload);
    apply_mask(key, payload_dest);

    Ok(needed)
}

/// Frame encoder drawing a fresh mask key from `M` for every frame.
#[derive(Debug, Clone, Default)]
pub struct Encoder<M> {
    keys: M,
}

impl<M: MaskKeySource> Encoder<M> {
    #[inline(always)]
    pub const fn new(keys: M) -> Self {
        Self { keys }
    }

    /// Encodes a frame into `dest`. See [`encode_frame`].
    #[inline]
    pub fn encode(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        dest: &mut [u8],
    ) -> Result<usize, EncodeError> {
        encode_frame(opcode, payload, self.keys.next_key(), dest)
    }

    /// Encodes a frame into a newly allocated buffer of exactly the right size.
    #[inline]
    pub fn encode_to_vec(&mut self, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let payload_len = payload.len() as u64;
        let mut buf = alloc::vec![0; header_len(payload_len, true) + payload.len()];

        // the buffer is sized for this exact frame
        let _ = encode_frame(opcode, payload, self.keys.next_key(), &mut buf);

        buf
    }
}
