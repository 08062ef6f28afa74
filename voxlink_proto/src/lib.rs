#![no_std]
//! Wire framing for real-time audio streaming over a single persistent socket.
//!
//! This crate implements the client side of the WebSocket framing layer, as used
//! between an audio endpoint (the client) and a remote audio server. It performs no
//! I/O: everything here is pure byte manipulation, so it can be used from blocking,
//! non-blocking or embedded transports alike.
//!
//! ## Roles
//!
//! - **Clients** mask every frame they send, using a fresh 4-byte key per frame.
//! - **Servers** never mask. Inbound frames are therefore decoded as-is, and a
//!   masked inbound frame is reported as a protocol violation.
//!
//! ## Frame layout
//!
//! ```text
//! byte 0: bit7=FIN, bits3-0=opcode {0x1 text, 0x2 binary, 0x8 close}
//! byte 1: bit7=MASK, bits6-0=length class {0-125 literal, 126, 127}
//! [if 126]: 2 bytes extended length (big endian)
//! [if 127]: 8 bytes extended length (big endian)
//! [if masked]: 4 bytes mask key
//! payload: length bytes, XORed with the mask key when masked
//! ```
//!
//! See [`encode`] for the outbound path and [`decode`] for the inbound path.

extern crate alloc;

pub mod decode;
pub mod encode;

pub use decode::{DecodeError, Frame, HeaderPrefix, LengthClass};
pub use encode::{EncodeError, Encoder};

/// Largest possible header: 2 fixed bytes, 8 extended length bytes and a mask key.
pub const MAX_HEADER_LEN: usize = 2 + 8 + MASK_KEY_LEN;

/// Length of a frame's mask key.
pub const MASK_KEY_LEN: usize = 4;

/// Largest payload length encoded directly in the second header byte.
pub const MAX_LITERAL_LEN: u64 = 125;

/// Largest payload length encoded using a 16-bit extended length field.
pub const MAX_EXTENDED_16_LEN: u64 = u16::MAX as u64;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LENGTH_MASK: u8 = 0x7F;

const LENGTH_CLASS_16: u8 = 126;
const LENGTH_CLASS_64: u8 = 127;

/// The kind of message a frame carries.
///
/// Only the opcodes this system acts upon get their own variant, everything else is
/// carried verbatim in [`Opcode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    /// UTF-8 text, delivered to the application's message handler.
    Text,
    /// Raw bytes, audio in our case.
    Binary,
    /// The peer is closing the connection.
    Close,
    /// Any other opcode (continuation, ping, pong, reserved). Holds the low 4 bits.
    Other(u8),
}

impl Opcode {
    pub const TEXT: u8 = 0x1;
    pub const BINARY: u8 = 0x2;
    pub const CLOSE: u8 = 0x8;

    /// Interprets the low 4 bits of `bits` as an opcode.
    #[inline(always)]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & OPCODE_MASK {
            Self::TEXT => Self::Text,
            Self::BINARY => Self::Binary,
            Self::CLOSE => Self::Close,
            other => Self::Other(other),
        }
    }

    /// Returns the 4-bit wire representation of this opcode.
    #[inline(always)]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Text => Self::TEXT,
            Self::Binary => Self::BINARY,
            Self::Close => Self::CLOSE,
            Self::Other(bits) => bits & OPCODE_MASK,
        }
    }
}

/// A frame's 4-byte mask key.
pub type MaskKey = [u8; MASK_KEY_LEN];

/// A source of mask keys.
///
/// Clients must use a fresh, unpredictable key for every frame they send. Abstracting
/// over the source allows tests to produce deterministic output.
pub trait MaskKeySource {
    /// Returns the key used to mask the next frame.
    fn next_key(&mut self) -> MaskKey;
}

/// A [`MaskKeySource`] that always yields the same key.
///
/// Not suitable for talking to real servers, intended for tests and reproducible
/// captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedMask(pub MaskKey);

impl MaskKeySource for FixedMask {
    #[inline(always)]
    fn next_key(&mut self) -> MaskKey {
        self.0
    }
}

impl<F: FnMut() -> MaskKey> MaskKeySource for F {
    #[inline(always)]
    fn next_key(&mut self) -> MaskKey {
        self()
    }
}

/// XORs every byte of `payload` with `key[i % 4]`, in place.
///
/// Masking is an involution: applying the same key twice yields the original bytes,
/// which is how a peer recovers a masked payload.
#[inline]
pub fn apply_mask(key: MaskKey, payload: &mut [u8]) {
    for (byte, &k) in core::iter::zip(payload, key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Returns the header length (mask key included, if any) needed for a payload of
/// `payload_len` bytes.
#[inline(always)]
pub const fn header_len(payload_len: u64, masked: bool) -> usize {
    let len = if payload_len <= MAX_LITERAL_LEN {
        2
    } else if payload_len <= MAX_EXTENDED_16_LEN {
        2 + 2
    } else {
        2 + 8
    };

    if masked { len + MASK_KEY_LEN } else { len }
}
