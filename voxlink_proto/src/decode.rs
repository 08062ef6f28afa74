//! Inbound frame decoding.
//!
//! Decoding is split in two steps, matching how frames arrive on a stream: the fixed
//! 2-byte [`HeaderPrefix`] tells the reader how many extended length bytes follow, and
//! those in turn give the payload length. Payloads are never unmasked here.
//!
//! [`Frame::parse`] handles complete, in-memory frames of either role, and is mostly
//! useful on the server side of the connection (and in tests).

use super::*;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// More bytes are needed to decode the frame.
    #[error("incomplete frame: {needed} more bytes needed")]
    Incomplete { needed: usize },
    /// The frame advertises a payload larger than the receiver accepts. The payload must
    /// still be drained from the stream to keep framing intact.
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: u64, max: usize },
    /// A server-to-client frame had its mask bit set.
    #[error("unexpected masked frame from server")]
    MaskedFrame,
    /// The 64-bit extended length had its most significant bit set.
    #[error("invalid 64-bit payload length")]
    InvalidLength,
}

/// How a frame's payload length is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LengthClass {
    /// The length (0..=125) is stored in the header prefix itself.
    Literal(u8),
    /// A 2-byte big endian length follows the prefix.
    Extended16,
    /// An 8-byte big endian length follows the prefix.
    Extended64,
}

impl LengthClass {
    #[inline(always)]
    const fn from_bits(bits: u8) -> Self {
        match bits & LENGTH_MASK {
            LENGTH_CLASS_16 => Self::Extended16,
            LENGTH_CLASS_64 => Self::Extended64,
            literal => Self::Literal(literal),
        }
    }

    /// Number of extended length bytes following the header prefix.
    #[inline(always)]
    pub const fn extended_len_bytes(self) -> usize {
        match self {
            Self::Literal(_) => 0,
            Self::Extended16 => 2,
            Self::Extended64 => 8,
        }
    }
}

/// The fixed first two bytes of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderPrefix {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub length: LengthClass,
}

impl HeaderPrefix {
    pub const LEN: usize = 2;

    /// Parses the 2-byte header prefix. This never fails, all bit patterns are valid
    /// at this stage.
    #[inline(always)]
    pub const fn parse(bytes: [u8; Self::LEN]) -> Self {
        let [b0, b1] = bytes;

        Self {
            fin: b0 & FIN_BIT != 0,
            opcode: Opcode::from_bits(b0),
            masked: b1 & MASK_BIT != 0,
            length: LengthClass::from_bits(b1),
        }
    }

    /// Number of extended length bytes the reader must fetch next.
    #[inline(always)]
    pub const fn extended_len_bytes(&self) -> usize {
        self.length.extended_len_bytes()
    }

    /// Computes the payload length, given the extended length bytes.
    ///
    /// `extended` must contain at least [`extended_len_bytes`](Self::extended_len_bytes)
    /// bytes, any extra bytes are ignored.
    #[inline]
    pub fn payload_len(&self, extended: &[u8]) -> Result<u64, DecodeError> {
        let missing = |needed: usize| DecodeError::Incomplete {
            needed: needed - extended.len(),
        };

        match self.length {
            LengthClass::Literal(len) => Ok(u64::from(len)),
            LengthClass::Extended16 => extended
                .first_chunk()
                .map(|&bytes| u64::from(u16::from_be_bytes(bytes)))
                .ok_or_else(|| missing(2)),
            LengthClass::Extended64 => {
                let &bytes = extended.first_chunk().ok_or_else(|| missing(8))?;
                let len = u64::from_be_bytes(bytes);

                if len >> 63 != 0 {
                    Err(DecodeError::InvalidLength)
                } else {
                    Ok(len)
                }
            }
        }
    }

    /// Rejects frames a client must never receive from a server.
    #[inline(always)]
    pub const fn check_server_role(&self) -> Result<(), DecodeError> {
        if self.masked {
            Err(DecodeError::MaskedFrame)
        } else {
            Ok(())
        }
    }
}

/// Checks an advertised payload length against the receiver's capacity.
#[inline(always)]
pub fn check_capacity(len: u64, max: usize) -> Result<usize, DecodeError> {
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= max)
        .ok_or(DecodeError::PayloadTooLarge { len, max })
}

/// A complete frame, borrowed from an input buffer.
///
/// If [`mask`](Self::mask) is set, [`payload`](Self::payload) is still masked, use
/// [`apply_mask`] on a copy to recover the original bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<MaskKey>,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parses one complete frame from the start of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupies in `buf`.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, usize), DecodeError> {
        let (&prefix, rem) = buf
            .split_first_chunk()
            .ok_or_else(|| DecodeError::Incomplete {
                needed: HeaderPrefix::LEN - buf.len(),
            })?;

        let prefix = HeaderPrefix::parse(prefix);

        let ext_len = prefix.extended_len_bytes();
        let payload_len = prefix.payload_len(rem)?;
        let rem = &rem[ext_len..];

        let (mask, rem) = if prefix.masked {
            let (&key, rem) = rem
                .split_first_chunk()
                .ok_or_else(|| DecodeError::Incomplete {
                    needed: MASK_KEY_LEN - rem.len(),
                })?;
            (Some(key), rem)
        } else {
            (None, rem)
        };

        let payload_len = check_capacity(payload_len, rem.len()).map_err(|_| {
            DecodeError::Incomplete {
                needed: usize::try_from(payload_len)
                    .unwrap_or(usize::MAX)
                    .saturating_sub(rem.len()),
            }
        })?;

        let consumed = buf.len() - rem.len() + payload_len;

        Ok((
            Self {
                fin: prefix.fin,
                opcode: prefix.opcode,
                mask,
                payload: &rem[..payload_len],
            },
            consumed,
        ))
    }
}
