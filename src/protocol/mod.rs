//! Wire protocol of the eight-port command module.
//!
//! Protocol Overview:
//! - Link: 9600 baud, 8N1, no higher-layer delimiters
//! - Host -> device: single command bytes, high nibble = operation, low 3 bits = port
//! - Power: `POWER_PARAM | level` followed by a one-hot port mask
//! - Device -> host: 19-byte sensor frames, byte 0 = 0, byte sum mod 256 = 0xFF
//! - Link-up: power-on bytes, challenge string, confirmation string
//!
//! Everything in here is pure; the tasks that move bytes live in [`crate::link`].

mod command;
mod frame;

pub use command::{encode_port_cmd, encode_power, Command, Port};
pub use frame::{decode_channel, ChannelReading, Frame, FrameSync, SyncStats, WIRING};

/// Number of motor/sensor ports on the interface.
pub const NUM_PORTS: usize = 8;

/// Mask applied to every raw port index and power level.
pub const PORT_MASK: u8 = 0x07;

/// Length of a sensor frame in bytes.
pub const FRAME_LEN: usize = 19;

/// Required value of the wrapping byte sum of a frame.
pub const FRAME_CHECKSUM: u8 = 0xFF;

/// Command byte announcing a power level; the level sits in the low 3 bits.
pub const POWER_PARAM: u8 = 0xB0;

/// Bytes that switch the interface on.
pub const POWER_ON: &[u8] = b"p\0";

/// Challenge sent once at link-up.
pub const CHALLENGE: &[u8] = b"###Do you byte, when I knock?$$$";

/// Reply expected from the interface after the challenge.
pub const CONFIRMATION: &[u8] = b"###Just a bit off the block!$$$";

/// Serial speed of the interface.
pub const DEFAULT_BAUD_RATE: u32 = 9600;
