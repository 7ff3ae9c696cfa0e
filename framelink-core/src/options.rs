//! Transport tunables shared by sessions, services and serializers.

use crate::packet::HEADER_SIZE;

/// Tunables for sessions and send buffers.
///
/// The defaults match the reference deployment: 4 KiB logical receive window
/// with 4x physical capacity, 4 KiB send slabs, and the full `u16` range for
/// packet sizes.
#[derive(Debug, Clone)]
pub struct NetOptions {
    /// Logical receive-buffer size S; compaction keeps at least this much
    /// tail space available.
    pub recv_buffer_size: usize,
    /// Physical capacity multiplier F; capacity is `S * F`.
    pub recv_capacity_factor: usize,
    /// Size of one send-buffer slab. Reservations larger than this get a
    /// dedicated slab.
    pub send_slab_size: usize,
    /// Upper bound on a framed packet, header included.
    pub max_packet_size: usize,
    /// Enable TCP_NODELAY on session sockets.
    pub nodelay: bool,
}

impl NetOptions {
    pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;
    pub const DEFAULT_RECV_CAPACITY_FACTOR: usize = 4;
    pub const DEFAULT_SEND_SLAB_SIZE: usize = 4096;
    pub const DEFAULT_MAX_PACKET_SIZE: usize = u16::MAX as usize;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "receive buffer size must be non-zero");
        self.recv_buffer_size = size;
        self
    }

    #[must_use]
    pub fn recv_capacity_factor(mut self, factor: usize) -> Self {
        assert!(factor >= 2, "capacity factor must be at least 2");
        self.recv_capacity_factor = factor;
        self
    }

    #[must_use]
    pub fn send_slab_size(mut self, size: usize) -> Self {
        assert!(size > 0, "send slab size must be non-zero");
        self.send_slab_size = size;
        self
    }

    #[must_use]
    pub fn max_packet_size(mut self, size: usize) -> Self {
        assert!(
            (HEADER_SIZE..=u16::MAX as usize).contains(&size),
            "max packet size must fit the header and the u16 size field"
        );
        self.max_packet_size = size;
        self
    }

    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            recv_buffer_size: Self::DEFAULT_RECV_BUFFER_SIZE,
            recv_capacity_factor: Self::DEFAULT_RECV_CAPACITY_FACTOR,
            send_slab_size: Self::DEFAULT_SEND_SLAB_SIZE,
            max_packet_size: Self::DEFAULT_MAX_PACKET_SIZE,
            nodelay: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let options = NetOptions::default();
        assert_eq!(options.recv_buffer_size, 4096);
        assert_eq!(options.recv_capacity_factor, 4);
        assert_eq!(options.max_packet_size, 65_535);
        assert!(options.nodelay);
    }

    #[test]
    fn builder_overrides() {
        let options = NetOptions::new()
            .recv_buffer_size(16)
            .recv_capacity_factor(2)
            .max_packet_size(512)
            .nodelay(false);
        assert_eq!(options.recv_buffer_size, 16);
        assert_eq!(options.recv_capacity_factor, 2);
        assert_eq!(options.max_packet_size, 512);
        assert!(!options.nodelay);
    }

    #[test]
    #[should_panic(expected = "capacity factor")]
    fn rejects_degenerate_factor() {
        let _ = NetOptions::new().recv_capacity_factor(1);
    }
}
