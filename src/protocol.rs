use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

pub const START_BYTE: u8 = 0xdd;
pub const STOP_BYTE: u8 = 0x77;
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERROR: u8 = 0x80;

/// Maximum payload a single frame can declare.
pub const MAX_FRAME_PAYLOAD: usize = u8::MAX as usize;

/// Direction marker placed after the start byte of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Read = 0xa5,
    Write = 0x5a,
}

/// Registers (command codes) used by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    BasicInfo = 0x03,
    CellVoltages = 0x04,
    Name = 0x05,
    MosfetControl = 0xe1,
}

impl Register {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::BasicInfo),
            0x04 => Some(Self::CellVoltages),
            0x05 => Some(Self::Name),
            0xe1 => Some(Self::MosfetControl),
            _ => None,
        }
    }
}

/// Two's complement of the 16 bit sum of `bytes`.
///
/// For every input `checksum(bytes) + sum(bytes) == 0 (mod 65536)`.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    0u16.wrapping_sub(sum)
}

/// Builds a request frame for `command` with the given payload.
///
/// The checksum covers command, length and payload. Payloads longer than
/// [`MAX_FRAME_PAYLOAD`] are a caller bug; only the representable prefix is sent.
pub fn request(direction: Direction, command: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.len() <= MAX_FRAME_PAYLOAD,
        "request payload of {} bytes does not fit a frame",
        payload.len()
    );
    let payload = &payload[..payload.len().min(MAX_FRAME_PAYLOAD)];
    let length = payload.len() as u8;

    let mut tx_buffer = Vec::with_capacity(payload.len() + 7);
    tx_buffer.push(START_BYTE);
    tx_buffer.push(direction as u8);
    tx_buffer.push(command);
    tx_buffer.push(length);
    tx_buffer.extend_from_slice(payload);

    let checksum = checksum(&tx_buffer[2..]);
    tx_buffer.extend_from_slice(&checksum.to_be_bytes());
    tx_buffer.push(STOP_BYTE);
    tx_buffer
}

/// Checks a received frame envelope.
///
/// The reply checksum covers status, length and payload. A frame is only
/// accepted with a matching checksum and an OK status.
pub fn verify(status: u8, payload: &[u8], received: u16) -> Result<()> {
    let sum = payload
        .iter()
        .fold(u16::from(status).wrapping_add(payload.len() as u16), |acc, b| {
            acc.wrapping_add(u16::from(*b))
        });
    let calculated = 0u16.wrapping_sub(sum);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} payload={payload:02X?}"
        );
        return Err(Error::CheckSumError {
            calculated,
            received,
        });
    }
    if status != STATUS_OK {
        log::warn!("Invalid status - received=0x{status:02X}");
        return Err(Error::StatusError(status));
    }
    Ok(())
}

/// A complete, verified frame received from the BMS.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub status: u8,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame {{ command: 0x{:02X}, status: 0x{:02X}, payload: {:02X?} }}",
            self.command, self.status, self.payload
        )
    }
}

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

fn validate_len(payload: &[u8], reply_size: usize) -> Result<()> {
    if payload.len() < reply_size {
        log::warn!(
            "Invalid payload size - required={} received={}",
            reply_size,
            payload.len()
        );
        return Err(Error::ReplySizeError {
            required: reply_size,
            received: payload.len(),
        });
    }
    Ok(())
}

fn be_u16(payload: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([payload[index], payload[index + 1]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct ProductionDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl From<u16> for ProductionDate {
    //         1111110000000000
    // Field   5432109876543210
    // Day:               xxxxx
    // Month:         xxxx
    // Year:   xxxxxxx
    fn from(raw: u16) -> Self {
        Self {
            year: 2000 + ((raw >> 9) & 0x7f),
            month: ((raw >> 5) & 0x0f) as u8,
            day: (raw & 0x1f) as u8,
        }
    }
}

impl fmt::Display for ProductionDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct SoftwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl From<u8> for SoftwareVersion {
    fn from(raw: u8) -> Self {
        Self {
            major: (raw >> 4) & 0x0f,
            minor: raw & 0x0f,
        }
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Protection conditions reported in the basic info register, by bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ProtectionFlag {
    SingleCellOvervoltage = 0,
    SingleCellUndervoltage = 1,
    WholePackOvervoltage = 2,
    WholePackUndervoltage = 3,
    ChargingOverTemperature = 4,
    ChargingLowTemperature = 5,
    DischargeOverTemperature = 6,
    DischargeLowTemperature = 7,
    ChargingOvercurrent = 8,
    DischargeOvercurrent = 9,
    ShortCircuit = 10,
    FrontEndDetectionIcError = 11,
    SoftwareLockMos = 12,
}

impl ProtectionFlag {
    pub const COUNT: usize = 13;

    pub const ALL: [ProtectionFlag; Self::COUNT] = [
        ProtectionFlag::SingleCellOvervoltage,
        ProtectionFlag::SingleCellUndervoltage,
        ProtectionFlag::WholePackOvervoltage,
        ProtectionFlag::WholePackUndervoltage,
        ProtectionFlag::ChargingOverTemperature,
        ProtectionFlag::ChargingLowTemperature,
        ProtectionFlag::DischargeOverTemperature,
        ProtectionFlag::DischargeLowTemperature,
        ProtectionFlag::ChargingOvercurrent,
        ProtectionFlag::DischargeOvercurrent,
        ProtectionFlag::ShortCircuit,
        ProtectionFlag::FrontEndDetectionIcError,
        ProtectionFlag::SoftwareLockMos,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ProtectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtectionFlag::SingleCellOvervoltage => write!(f, "Single cell overvoltage protection"),
            ProtectionFlag::SingleCellUndervoltage => {
                write!(f, "Single cell undervoltage protection")
            }
            ProtectionFlag::WholePackOvervoltage => write!(f, "Whole pack overvoltage protection"),
            ProtectionFlag::WholePackUndervoltage => {
                write!(f, "Whole pack undervoltage protection")
            }
            ProtectionFlag::ChargingOverTemperature => {
                write!(f, "Charging over temperature protection")
            }
            ProtectionFlag::ChargingLowTemperature => {
                write!(f, "Charging low temperature protection")
            }
            ProtectionFlag::DischargeOverTemperature => {
                write!(f, "Discharge over temperature protection")
            }
            ProtectionFlag::DischargeLowTemperature => {
                write!(f, "Discharge low temperature protection")
            }
            ProtectionFlag::ChargingOvercurrent => write!(f, "Charging overcurrent protection"),
            ProtectionFlag::DischargeOvercurrent => write!(f, "Discharge overcurrent protection"),
            ProtectionFlag::ShortCircuit => write!(f, "Short circuit protection"),
            ProtectionFlag::FrontEndDetectionIcError => {
                write!(f, "Front-end detection IC error")
            }
            ProtectionFlag::SoftwareLockMos => write!(f, "Software MOSFET lock"),
        }
    }
}

/// Raw protection bitmap; bits 13..15 are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct ProtectionStatus(pub u16);

impl ProtectionStatus {
    const DEFINED_BITS: u16 = 0x1fff;

    pub fn is_active(&self, flag: ProtectionFlag) -> bool {
        read_bit!(self.0, flag.bit())
    }

    pub fn active(&self) -> Vec<ProtectionFlag> {
        ProtectionFlag::ALL
            .into_iter()
            .filter(|flag| self.is_active(*flag))
            .collect()
    }

    /// True if any defined protection bit is set.
    pub fn any(&self) -> bool {
        self.0 & Self::DEFINED_BITS != 0
    }

    /// Bits that are set now but were clear in `previous`.
    pub fn rising_edges(&self, previous: ProtectionStatus) -> ProtectionStatus {
        ProtectionStatus((previous.0 ^ self.0) & self.0 & Self::DEFINED_BITS)
    }
}

/// Number of times each protection condition became active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct FaultCounts([u32; ProtectionFlag::COUNT]);

impl FaultCounts {
    pub fn get(&self, flag: ProtectionFlag) -> u32 {
        self.0[flag.bit() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProtectionFlag, u32)> + '_ {
        ProtectionFlag::ALL.into_iter().zip(self.0.iter().copied())
    }

    /// Counts every 0->1 transition between `previous` and `current`.
    pub fn record(&mut self, previous: ProtectionStatus, current: ProtectionStatus) {
        let new_faults = current.rising_edges(previous);
        for flag in new_faults.active() {
            log::debug!("New fault: {flag}");
            let count = &mut self.0[flag.bit() as usize];
            *count = count.saturating_add(1);
        }
    }

    pub fn clear(&mut self) {
        self.0 = [0; ProtectionFlag::COUNT];
    }
}

/// Decoded payload of the basic info register, still in raw units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicInfo {
    pub voltage: u16,
    pub current: i16,
    pub balance_capacity: u16,
    pub rate_capacity: u16,
    pub cycle_count: u16,
    pub production_date: u16,
    pub balance_status: u32,
    pub protection_status: ProtectionStatus,
    pub software_version: u8,
    pub remaining_soc: u8,
    pub mosfet_status: u8,
    pub num_cells: u8,
    pub num_ntcs: u8,
    pub ntc_temps: Vec<u16>,
}

impl BasicInfo {
    /// Fixed part of the payload before the temperature block.
    pub const FIXED_SIZE: usize = 23;

    pub fn request() -> Vec<u8> {
        request(Direction::Read, Register::BasicInfo as u8, &[])
    }

    /// Decodes at most `max_ntcs` temperatures, even if more are reported.
    pub fn decode(payload: &[u8], max_ntcs: usize) -> Result<Self> {
        validate_len(payload, Self::FIXED_SIZE)?;
        let num_ntcs = payload[22];
        let decoded_ntcs = max_ntcs.min(num_ntcs as usize);
        validate_len(payload, Self::FIXED_SIZE + 2 * decoded_ntcs)?;

        let ntc_temps = (0..decoded_ntcs)
            .map(|i| be_u16(payload, Self::FIXED_SIZE + 2 * i))
            .collect();

        Ok(Self {
            voltage: be_u16(payload, 0),
            current: i16::from_be_bytes([payload[2], payload[3]]),
            balance_capacity: be_u16(payload, 4),
            rate_capacity: be_u16(payload, 6),
            cycle_count: be_u16(payload, 8),
            production_date: be_u16(payload, 10),
            // low word holds cells 1..16, high word cells 17..32
            balance_status: u32::from(be_u16(payload, 12)) | (u32::from(be_u16(payload, 14)) << 16),
            protection_status: ProtectionStatus(be_u16(payload, 16)),
            software_version: payload[18],
            remaining_soc: payload[19],
            mosfet_status: payload[20],
            num_cells: payload[21],
            num_ntcs,
            ntc_temps,
        })
    }
}

pub struct CellVoltages;

impl CellVoltages {
    pub fn request() -> Vec<u8> {
        request(Direction::Read, Register::CellVoltages as u8, &[])
    }

    pub fn reply_size(n_cells: usize) -> usize {
        n_cells * 2
    }

    /// Returns the raw millivolt readings of the first `n_cells` cells.
    pub fn decode(payload: &[u8], n_cells: usize) -> Result<Vec<u16>> {
        validate_len(payload, Self::reply_size(n_cells))?;
        Ok((0..n_cells)
            .map(|i| {
                let millivolt = be_u16(payload, 2 * i);
                log::trace!("cell #{} mV={}", i + 1, millivolt);
                millivolt
            })
            .collect())
    }
}

pub struct DeviceName;

impl DeviceName {
    pub fn request() -> Vec<u8> {
        request(Direction::Read, Register::Name as u8, &[])
    }

    pub fn decode(payload: &[u8]) -> String {
        payload.iter().map(|b| char::from(*b)).collect()
    }
}

pub struct MosfetControl;

impl MosfetControl {
    /// Control byte pair as sent by the reference firmware: bit0 of the first
    /// byte disables the charge FET, bit1 the discharge FET.
    pub fn payload(charge: bool, discharge: bool) -> [u8; 2] {
        let mut control = 0b11;
        if charge {
            control &= 0b10;
        }
        if discharge {
            control &= 0b01;
        }
        [control, 0x00]
    }

    pub fn request(charge: bool, discharge: bool) -> Vec<u8> {
        request(
            Direction::Write,
            Register::MosfetControl as u8,
            &Self::payload(charge, discharge),
        )
    }
}
