//! Wire codec for the stage microcontroller link.
//!
//! Command frame (7 bytes): velX (3 bytes) + velY (3 bytes) + checksum, where
//! the checksum is the low byte of the sum of the first six bytes. Each
//! velocity is a big-endian magnitude scaled so that full scale equals
//! `MAX_SPEED`, with the top bit carrying the sign (set = positive).
//!
//! Status frame (6 bytes): flags byte, posX (i16 BE), posY (i16 BE),
//! checksum. Flag bit 0 reports a checksum error seen by the firmware; bits
//! 1-4 are the N/S/E/W limit switches, active low. Positions are counts of
//! `METERS_PER_COUNT`.

use crate::error::HwError;
use flyrig_traits::{StageStatus, VelocityCommand};

/// Full-scale stage speed in m/s; firmware saturates here.
pub const MAX_SPEED: f64 = 0.75;
/// Bytes used to encode one axis velocity.
pub const BYTES_PER_VEL: usize = 3;
/// Stage position resolution: 25 um per count.
pub const METERS_PER_COUNT: f64 = 25e-6;

/// Length of an encoded command frame including checksum.
pub const COMMAND_LEN: usize = 2 * BYTES_PER_VEL + 1;
/// Length of a status frame including checksum.
pub const STATUS_LEN: usize = 6;

const SIGN_BIT: u32 = 1 << (8 * BYTES_PER_VEL as u32 - 1);
const MAX_MAGNITUDE: u32 = SIGN_BIT - 1;

fn vel_bytes(v: f64) -> Result<[u8; BYTES_PER_VEL], HwError> {
    if !v.is_finite() {
        return Err(HwError::Protocol(format!("non-finite velocity {v}")));
    }
    let magnitude = (v.abs() * f64::from(MAX_MAGNITUDE) / MAX_SPEED).round();
    if magnitude > f64::from(MAX_MAGNITUDE) {
        return Err(HwError::Protocol(format!(
            "requested speed {v} m/s exceeds {MAX_SPEED} m/s"
        )));
    }
    let mut int_val = magnitude as u32;
    if v > 0.0 {
        int_val |= SIGN_BIT;
    }
    let be = int_val.to_be_bytes();
    Ok([be[1], be[2], be[3]])
}

/// Encode one velocity command as a checksummed frame.
pub fn encode_velocity(cmd: VelocityCommand) -> Result<[u8; COMMAND_LEN], HwError> {
    let x = vel_bytes(cmd.vel_x)?;
    let y = vel_bytes(cmd.vel_y)?;
    let mut frame = [0u8; COMMAND_LEN];
    frame[..BYTES_PER_VEL].copy_from_slice(&x);
    frame[BYTES_PER_VEL..2 * BYTES_PER_VEL].copy_from_slice(&y);
    frame[COMMAND_LEN - 1] = checksum(&frame[..COMMAND_LEN - 1]);
    Ok(frame)
}

/// Decode a status frame, verifying the checksum and the firmware error flag.
pub fn decode_status(frame: &[u8; STATUS_LEN]) -> Result<StageStatus, HwError> {
    if checksum(&frame[..STATUS_LEN - 1]) != frame[STATUS_LEN - 1] {
        return Err(HwError::Protocol("status checksum mismatch".to_string()));
    }
    if frame[0] & 1 == 1 {
        return Err(HwError::Protocol(
            "checksum error reported by firmware".to_string(),
        ));
    }
    Ok(StageStatus {
        pos_x: pos_from_bytes([frame[1], frame[2]]),
        pos_y: pos_from_bytes([frame[3], frame[4]]),
        lim_n: (frame[0] >> 1) & 1 == 0,
        lim_s: (frame[0] >> 2) & 1 == 0,
        lim_e: (frame[0] >> 3) & 1 == 0,
        lim_w: (frame[0] >> 4) & 1 == 0,
    })
}

fn pos_from_bytes(bytes: [u8; 2]) -> f64 {
    f64::from(i16::from_be_bytes(bytes)) * METERS_PER_COUNT
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u32, |acc, &b| acc + u32::from(b)) as u8
}

/// Encode a status frame. Used by the simulator and by tests; the real
/// firmware produces the same layout.
pub fn encode_status(status: &StageStatus) -> [u8; STATUS_LEN] {
    let mut flags = 0u8;
    // bit 0 clear: no firmware checksum error
    if !status.lim_n {
        flags |= 1 << 1;
    }
    if !status.lim_s {
        flags |= 1 << 2;
    }
    if !status.lim_e {
        flags |= 1 << 3;
    }
    if !status.lim_w {
        flags |= 1 << 4;
    }
    // unused switch inputs read high
    flags |= 0b1110_0000;
    let x = ((status.pos_x / METERS_PER_COUNT).round() as i16).to_be_bytes();
    let y = ((status.pos_y / METERS_PER_COUNT).round() as i16).to_be_bytes();
    let mut frame = [flags, x[0], x[1], y[0], y[1], 0];
    frame[STATUS_LEN - 1] = checksum(&frame[..STATUS_LEN - 1]);
    frame
}
