//! Shared sensor state.
//!
//! One block per driver instance, written only by the reader task and read by
//! everyone else through [`SensorSnapshot`] copies. Every frame is applied under a
//! single lock acquisition, so a snapshot never mixes two frames.

use crate::protocol::{Frame, Port, NUM_PORTS, PORT_MASK};
use parking_lot::Mutex;

/// Raw values below this read as a pressed button.
pub const PRESSED_THRESHOLD: u16 = 1000;

/// Rotation sensor counts per full revolution.
pub const ROTATION_COUNTS_PER_REV: i64 = 16;

/// Copy of the sensor block at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorSnapshot {
    /// Latest 10-bit analog value per port.
    pub values: [u16; NUM_PORTS],
    /// Latest 6-bit status per port.
    pub statuses: [u8; NUM_PORTS],
    /// Accumulated rotation counts per port; always 0 for A-D.
    pub rotations: [i64; NUM_PORTS],
}

impl SensorSnapshot {
    /// Raw value of `port & 7`.
    pub fn value(&self, port: u8) -> u16 {
        self.values[index(port)]
    }

    /// Status bits of `port & 7`.
    pub fn status(&self, port: u8) -> u8 {
        self.statuses[index(port)]
    }

    /// Rotation counter of `port & 7`.
    pub fn rotation(&self, port: u8) -> i64 {
        self.rotations[index(port)]
    }

    /// Rotation of `port & 7` in full revolutions.
    pub fn turns(&self, port: u8) -> f64 {
        self.rotation(port) as f64 / ROTATION_COUNTS_PER_REV as f64
    }

    /// Whether the button on `port` is held.
    pub fn is_pressed(&self, port: u8) -> bool {
        self.value(port) < PRESSED_THRESHOLD
    }

    /// Temperature in degrees Fahrenheit, assuming the analog temperature sensor.
    pub fn temp_f(&self, port: u8) -> f64 {
        temperature_offset_f(self.value(port)) + 32.0
    }

    /// Temperature in degrees Celsius, assuming the analog temperature sensor.
    pub fn temp_c(&self, port: u8) -> f64 {
        temperature_offset_f(self.value(port)) * 5.0 / 9.0
    }
}

/// Degrees Fahrenheit above freezing for a raw temperature sensor value.
fn temperature_offset_f(value: u16) -> f64 {
    (760.0 - value as f64) / 4.4
}

fn index(port: u8) -> usize {
    (port & PORT_MASK) as usize
}

/// Mutex-guarded sensor block.
#[derive(Debug, Default)]
pub struct SensorState {
    inner: Mutex<SensorSnapshot>,
}

impl SensorState {
    /// All-zero state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite values and statuses from `frame` and add rotation deltas for the
    /// rotational ports.
    pub fn apply_frame(&self, frame: &Frame) {
        let channels = frame.channels();
        let mut state = self.inner.lock();
        for port in Port::ALL {
            let reading = channels[port.index()];
            state.values[port.index()] = reading.value;
            state.statuses[port.index()] = reading.status;
            if port.is_rotational() {
                state.rotations[port.index()] += reading.delta as i64;
            }
        }
    }

    /// Copy of the whole block.
    pub fn snapshot(&self) -> SensorSnapshot {
        *self.inner.lock()
    }

    /// Zero the rotation counter of `port & 7` only.
    pub fn clear_rotation(&self, port: u8) {
        self.inner.lock().rotations[index(port)] = 0;
    }
}
