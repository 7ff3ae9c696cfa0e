//! Byte-exact packet framing.
//!
//! Every packet on the wire starts with a 4-byte header: `u16 size`
//! (little-endian, total bytes including the header) followed by `u16 id`
//! (little-endian message-type code). The payload encoding is owned by the
//! message layer; this module only frames.

use bytes::{Buf, BufMut};

/// Message-type code carried in the packet header.
pub type PacketId = u16;
/// Total packet size carried in the packet header.
pub type PacketSize = u16;

/// Size of the framing header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Decoded framing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet size, header included.
    pub size: PacketSize,
    /// Message-type code.
    pub id: PacketId,
}

impl PacketHeader {
    /// Decode a header from the front of `buf`; `None` if fewer than
    /// `HEADER_SIZE` bytes are available.
    #[must_use]
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: buf.get_u16_le(),
            id: buf.get_u16_le(),
        })
    }

    /// Encode this header into the first `HEADER_SIZE` bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than `HEADER_SIZE`.
    pub fn encode(&self, mut out: &mut [u8]) {
        assert!(out.len() >= HEADER_SIZE, "output too small for header");
        out.put_u16_le(self.size);
        out.put_u16_le(self.id);
    }
}

/// A borrowed view of one complete packet inside a receive buffer.
///
/// Valid only until the buffer is popped or compacted.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

/// Borrow the first complete packet from `unread`, if one is fully buffered.
///
/// Returns `None` while the header or the declared `size` bytes are still
/// incomplete. Size validation against the configured ceiling happens at the
/// session level; a declared size below `HEADER_SIZE` is reported as
/// incomplete here and rejected there.
#[must_use]
pub fn front_packet(unread: &[u8]) -> Option<PacketView<'_>> {
    let header = PacketHeader::decode(unread)?;
    let total = header.size as usize;
    if total < HEADER_SIZE || unread.len() < total {
        return None;
    }
    Some(PacketView {
        header,
        payload: &unread[HEADER_SIZE..total],
    })
}
