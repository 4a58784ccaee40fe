//! Sensor frame validation, channel decoding and stream resynchronisation.
//!
//! The device streams 19-byte frames with no delimiter. A candidate window is a
//! frame iff its first byte is zero and its bytes sum to 0xFF (mod 256). Finding
//! frame boundaries is a brute-force search: a window that fails the check is
//! shifted by one byte and tried again, which also recovers from dropped bytes.

use super::{Port, FRAME_CHECKSUM, FRAME_LEN, NUM_PORTS};
use std::collections::VecDeque;

/// Byte offsets `(b1, b2)` of each port's channel pair inside a frame, indexed by
/// port. Fixed by the interface's internal wiring.
pub const WIRING: [(usize, usize); NUM_PORTS] = [
    (14, 15), // A
    (10, 11), // B
    (6, 7),   // C
    (2, 3),   // D
    (16, 17), // E
    (12, 13), // F
    (8, 9),   // G
    (4, 5),   // H
];

/// Offset of the spare byte used by [`Frame::from_channels`] to balance the checksum.
const BALANCE_OFFSET: usize = FRAME_LEN - 1;

/// One decoded channel pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelReading {
    /// 10-bit analog reading, 0..=1023.
    pub value: u16,
    /// 6-bit status field, 0..=63.
    pub status: u8,
    /// Signed rotation increment, -3..=3.
    pub delta: i8,
}

/// Unpack the bitfields of a channel pair.
///
/// `value` is `b1` shifted up by two with the top two bits of `b2` below it;
/// `status` is the low six bits of `b2`. The rotation increment is `status & 3`,
/// negative unless bit 2 of `status` is set.
pub fn decode_channel(b1: u8, b2: u8) -> ChannelReading {
    let value = ((b1 as u16) << 2) | ((b2 >> 6) & 0x03) as u16;
    let status = b2 & 0x3F;
    let magnitude = (status & 0x03) as i8;
    let delta = if status & 0x04 == 0 {
        -magnitude
    } else {
        magnitude
    };
    ChannelReading {
        value,
        status,
        delta,
    }
}

/// A validated 19-byte sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Accept `window` iff it is exactly 19 bytes, starts with zero and its
    /// wrapping byte sum is 0xFF.
    pub fn validate(window: &[u8]) -> Option<Frame> {
        let bytes: [u8; FRAME_LEN] = window.try_into().ok()?;
        if bytes[0] != 0 || checksum(&bytes) != FRAME_CHECKSUM {
            return None;
        }
        Some(Frame(bytes))
    }

    /// Build a valid frame carrying the given `(value, status)` per port.
    /// Values are truncated to 10 bits and statuses to 6 bits.
    pub fn from_channels(channels: [(u16, u8); NUM_PORTS]) -> Frame {
        let mut bytes = [0u8; FRAME_LEN];
        for (port, &(value, status)) in channels.iter().enumerate() {
            let (hi, lo) = WIRING[port];
            let value = value & 0x3FF;
            bytes[hi] = (value >> 2) as u8;
            bytes[lo] = (((value & 0x03) as u8) << 6) | (status & 0x3F);
        }
        let partial = checksum(&bytes[..BALANCE_OFFSET]);
        bytes[BALANCE_OFFSET] = FRAME_CHECKSUM.wrapping_sub(partial);
        Frame(bytes)
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Decoded reading of one port.
    pub fn channel(&self, port: Port) -> ChannelReading {
        let (hi, lo) = WIRING[port.index()];
        decode_channel(self.0[hi], self.0[lo])
    }

    /// Decoded readings of all ports, in port order.
    pub fn channels(&self) -> [ChannelReading; NUM_PORTS] {
        Port::ALL.map(|port| self.channel(port))
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Counters kept by [`FrameSync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames that passed validation.
    pub frames_accepted: u64,
    /// Full windows that failed validation.
    pub windows_rejected: u64,
    /// Rejections since the last accepted frame.
    pub consecutive_rejections: u64,
    /// Rejections that preceded the most recent accepted frame.
    pub rejections_before_last_frame: u64,
    /// Longest run of consecutive rejections seen so far.
    pub longest_rejection_run: u64,
}

/// Sliding-window frame synchroniser.
///
/// Bytes are pushed one at a time. Once 19 bytes are buffered the window is
/// checked: an accepted frame empties the window, so the next candidate is the
/// 19 bytes that follow it; a rejected window drops its oldest byte.
#[derive(Debug)]
pub struct FrameSync {
    window: VecDeque<u8>,
    stats: SyncStats,
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync {
    /// Empty synchroniser.
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(FRAME_LEN),
            stats: SyncStats::default(),
        }
    }

    /// Feed one byte; returns a frame when this byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        self.window.push_back(byte);
        if self.window.len() < FRAME_LEN {
            return None;
        }

        match Frame::validate(self.window.make_contiguous()) {
            Some(frame) => {
                self.window.clear();
                self.stats.frames_accepted += 1;
                self.stats.rejections_before_last_frame = self.stats.consecutive_rejections;
                self.stats.consecutive_rejections = 0;
                Some(frame)
            }
            None => {
                self.window.pop_front();
                self.stats.windows_rejected += 1;
                self.stats.consecutive_rejections += 1;
                self.stats.longest_rejection_run = self
                    .stats
                    .longest_rejection_run
                    .max(self.stats.consecutive_rejections);
                None
            }
        }
    }

    /// Feed a chunk, yielding every frame it completes.
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = Frame> + 'a {
        bytes.iter().filter_map(move |&b| self.push(b))
    }

    /// Counters so far.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Bytes buffered towards the next candidate window.
    pub fn pending(&self) -> usize {
        self.window.len()
    }
}
