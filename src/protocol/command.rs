use super::{POWER_PARAM, PORT_MASK};
use std::fmt;
use std::str::FromStr;

/// Operation nibble of a host command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Keepalive, ignored by the device.
    Nop = 0x02,
    /// Turn the port on, turning "left".
    PortOnLeft = 0x10,
    /// Turn the port on, turning "right".
    PortOnRight = 0x18,
    /// Reverse output direction.
    Reverse = 0x20,
    /// Turn the port on in its last direction.
    PortOnSame = 0x28,
    /// Switch the port off.
    PortOff = 0x30,
    /// Set direction to "left" without switching on.
    DriveLeft = 0x40,
    /// Set direction to "right" without switching on.
    DriveRight = 0x48,
    /// Disconnects the whole interface. Sent by `close()`.
    KillAll = 0x70,
}

impl Command {
    /// All commands, in wire order.
    pub const ALL: [Command; 9] = [
        Command::Nop,
        Command::PortOnLeft,
        Command::PortOnRight,
        Command::Reverse,
        Command::PortOnSame,
        Command::PortOff,
        Command::DriveLeft,
        Command::DriveRight,
        Command::KillAll,
    ];

    /// Raw command byte with a zero port field.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Short name used by the CLI and in logs.
    pub fn name(self) -> &'static str {
        match self {
            Command::Nop => "nop",
            Command::PortOnLeft => "on-left",
            Command::PortOnRight => "on-right",
            Command::Reverse => "reverse",
            Command::PortOnSame => "on",
            Command::PortOff => "off",
            Command::DriveLeft => "left",
            Command::DriveRight => "right",
            Command::KillAll => "kill-all",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|cmd| cmd.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Command::ALL.iter().map(|c| c.name()).collect();
                format!("unknown command '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Port identity. Letters follow the labels on the interface; the numbered
/// labels of the other housing are available as `Port::P1`..`Port::P8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Port {
    /// Port A / 1
    A = 0,
    /// Port B / 2
    B = 1,
    /// Port C / 3
    C = 2,
    /// Port D / 4
    D = 3,
    /// Port E / 5
    E = 4,
    /// Port F / 6
    F = 5,
    /// Port G / 7
    G = 6,
    /// Port H / 8
    H = 7,
}

#[allow(missing_docs)]
impl Port {
    pub const P1: Port = Port::A;
    pub const P2: Port = Port::B;
    pub const P3: Port = Port::C;
    pub const P4: Port = Port::D;
    pub const P5: Port = Port::E;
    pub const P6: Port = Port::F;
    pub const P7: Port = Port::G;
    pub const P8: Port = Port::H;

    pub const ALL: [Port; 8] = [
        Port::A,
        Port::B,
        Port::C,
        Port::D,
        Port::E,
        Port::F,
        Port::G,
        Port::H,
    ];
}

impl Port {
    /// Map any raw index onto a port by masking to 3 bits (15 -> H).
    pub fn from_index(index: u8) -> Port {
        Port::ALL[(index & PORT_MASK) as usize]
    }

    /// Zero-based index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Ports E-H carry rotation sensors; A-D are buttons/analog inputs only.
    pub fn is_rotational(self) -> bool {
        self >= Port::E
    }

    /// One-hot selection mask used by the power command.
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

impl From<Port> for u8 {
    fn from(port: Port) -> u8 {
        port as u8
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (b'A' + *self as u8) as char)
    }
}

impl FromStr for Port {
    type Err = String;

    /// Accepts `A`-`H` (any case) or `1`-`8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [c @ b'a'..=b'h'] => Ok(Port::from_index(c - b'a')),
            [c @ b'A'..=b'H'] => Ok(Port::from_index(c - b'A')),
            [c @ b'1'..=b'8'] => Ok(Port::from_index(c - b'1')),
            _ => Err(format!("invalid port '{}', expected A-H or 1-8", s)),
        }
    }
}

/// Encode a port command: `cmd | (port & 7)`. Out-of-range ports wrap silently,
/// matching the device's 3-bit addressing.
pub fn encode_port_cmd(cmd: u8, port: u8) -> u8 {
    cmd | (port & PORT_MASK)
}

/// Encode a power change: the power parameter byte carrying `power & 7`,
/// followed by the one-hot mask of `port & 7`.
pub fn encode_power(port: u8, power: u8) -> [u8; 2] {
    [
        encode_port_cmd(POWER_PARAM, power),
        Port::from_index(port).mask(),
    ]
}
