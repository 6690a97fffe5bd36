//! GATT UUIDs, measurement/feature enumerations and control-point wire formats
//! for the Polar Measurement Data (PMD) service.
//!
//! All UUIDs belong to the PMD vendor namespace
//! `fb005cXX-02e7-f387-1cad-8acd2d8df0c8`.

use std::fmt;

use uuid::Uuid;

use crate::error::DecodeError;

// ── Service ──────────────────────────────────────────────────────────────────

/// PMD GATT service UUID advertised by Polar sensors that stream raw data.
pub const PMD_SERVICE_UUID: Uuid = Uuid::from_u128(0xfb005c80_02e7_f387_1cad_8acd2d8df0c8);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Control point: written with `[op_code, parameters…]`, notifies responses.
///
/// Reading it (or the first notification after subscribing) yields the
/// feature bitmap prefixed with [`FEATURE_READ_MARKER`].
pub const PMD_CONTROL_POINT: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);

/// Data characteristic — every notification is one [`crate::parse::DataFrame`].
pub const PMD_DATA: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);

// ── Framing constants ─────────────────────────────────────────────────────────

/// First byte of a control-point read/notification carrying the feature bitmap.
pub const FEATURE_READ_MARKER: u8 = 0x0F;

/// First byte of every control-point response packet.
pub const CONTROL_POINT_RESPONSE_CODE: u8 = 0xF0;

/// `[response_code, op_code, measurement_type, status]`
pub const CONTROL_POINT_HEADER_LEN: usize = 4;

// ── MeasurementType ───────────────────────────────────────────────────────────

/// Measurement kinds addressable through the PMD service.
///
/// Wire values outside the known set decode to [`MeasurementType::Unknown`];
/// they are never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeasurementType {
    Ecg,
    Ppg,
    Acc,
    Ppi,
    Bioz,
    Gyro,
    Magnetometer,
    Barometer,
    Ambient,
    SdkMode,
    Unknown,
}

impl MeasurementType {
    /// Every type that has a wire value, in wire order.
    pub const ALL: [MeasurementType; 10] = [
        MeasurementType::Ecg,
        MeasurementType::Ppg,
        MeasurementType::Acc,
        MeasurementType::Ppi,
        MeasurementType::Bioz,
        MeasurementType::Gyro,
        MeasurementType::Magnetometer,
        MeasurementType::Barometer,
        MeasurementType::Ambient,
        MeasurementType::SdkMode,
    ];

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Ecg,
            1 => Self::Ppg,
            2 => Self::Acc,
            3 => Self::Ppi,
            4 => Self::Bioz,
            5 => Self::Gyro,
            6 => Self::Magnetometer,
            7 => Self::Barometer,
            8 => Self::Ambient,
            9 => Self::SdkMode,
            _ => Self::Unknown,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Ecg => 0,
            Self::Ppg => 1,
            Self::Acc => 2,
            Self::Ppi => 3,
            Self::Bioz => 4,
            Self::Gyro => 5,
            Self::Magnetometer => 6,
            Self::Barometer => 7,
            Self::Ambient => 8,
            Self::SdkMode => 9,
            Self::Unknown => 0xFF,
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ecg => "ECG",
            Self::Ppg => "PPG",
            Self::Acc => "ACC",
            Self::Ppi => "PPI",
            Self::Bioz => "BIOZ",
            Self::Gyro => "GYRO",
            Self::Magnetometer => "MAGNETOMETER",
            Self::Barometer => "BAROMETER",
            Self::Ambient => "AMBIENT",
            Self::SdkMode => "SDK_MODE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

// ── FeatureSet ────────────────────────────────────────────────────────────────

/// Which measurement types the connected sensor offers.
///
/// Decoded from the two bitmap bytes of a feature read:
///
/// | Byte | Bit 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 |
/// |---|---|---|---|---|---|---|---|---|
/// | 0 | ecg | ppg | acc | ppi | bioz | gyro | magnetometer | barometer |
/// | 1 | ambient | sdk mode | – | – | – | – | – | – |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub ecg: bool,
    pub ppg: bool,
    pub acc: bool,
    pub ppi: bool,
    pub bioz: bool,
    pub gyro: bool,
    pub magnetometer: bool,
    pub barometer: bool,
    pub ambient: bool,
    pub sdk_mode: bool,
}

impl FeatureSet {
    pub fn from_bitmap(byte0: u8, byte1: u8) -> Self {
        let bit = |b: u8, n: u8| (b >> n) & 0x01 != 0;
        Self {
            ecg: bit(byte0, 0),
            ppg: bit(byte0, 1),
            acc: bit(byte0, 2),
            ppi: bit(byte0, 3),
            bioz: bit(byte0, 4),
            gyro: bit(byte0, 5),
            magnetometer: bit(byte0, 6),
            barometer: bit(byte0, 7),
            ambient: bit(byte1, 0),
            sdk_mode: bit(byte1, 1),
        }
    }

    /// Decode a control-point read or feature notification.
    ///
    /// Accepts `[0x0F, byte0, byte1, …]` as sent by the sensor, or the bare
    /// two bitmap bytes.  Returns `None` for anything else.
    pub fn from_read(data: &[u8]) -> Option<Self> {
        match data {
            [FEATURE_READ_MARKER, b0, b1, ..] => Some(Self::from_bitmap(*b0, *b1)),
            [b0, b1] => Some(Self::from_bitmap(*b0, *b1)),
            _ => None,
        }
    }

    pub fn supports(&self, measurement: MeasurementType) -> bool {
        match measurement {
            MeasurementType::Ecg => self.ecg,
            MeasurementType::Ppg => self.ppg,
            MeasurementType::Acc => self.acc,
            MeasurementType::Ppi => self.ppi,
            MeasurementType::Bioz => self.bioz,
            MeasurementType::Gyro => self.gyro,
            MeasurementType::Magnetometer => self.magnetometer,
            MeasurementType::Barometer => self.barometer,
            MeasurementType::Ambient => self.ambient,
            MeasurementType::SdkMode => self.sdk_mode,
            MeasurementType::Unknown => false,
        }
    }

    /// Supported measurement types (SDK mode excluded) in wire order.
    pub fn measurements(&self) -> Vec<MeasurementType> {
        MeasurementType::ALL
            .into_iter()
            .filter(|&m| m != MeasurementType::SdkMode && self.supports(m))
            .collect()
    }
}

// ── Control point commands ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPointCommand {
    GetMeasurementSettings,
    RequestMeasurementStart,
    StopMeasurement,
    GetSdkModeMeasurementSettings,
}

impl ControlPointCommand {
    pub fn op_code(self) -> u8 {
        match self {
            Self::GetMeasurementSettings => 0x01,
            Self::RequestMeasurementStart => 0x02,
            Self::StopMeasurement => 0x03,
            Self::GetSdkModeMeasurementSettings => 0x04,
        }
    }

    pub fn from_op_code(op_code: u8) -> Option<Self> {
        match op_code {
            0x01 => Some(Self::GetMeasurementSettings),
            0x02 => Some(Self::RequestMeasurementStart),
            0x03 => Some(Self::StopMeasurement),
            0x04 => Some(Self::GetSdkModeMeasurementSettings),
            _ => None,
        }
    }
}

/// Encode a control-point write: `[op_code, parameters…]`.
///
/// ```
/// # use polar_pmd::protocol::{encode_command, ControlPointCommand};
/// assert_eq!(encode_command(ControlPointCommand::StopMeasurement, &[0x00]), &[0x03, 0x00]);
/// ```
pub fn encode_command(command: ControlPointCommand, parameters: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + parameters.len());
    packet.push(command.op_code());
    packet.extend_from_slice(parameters);
    packet
}

// ── Response status ───────────────────────────────────────────────────────────

/// Status byte of a control-point response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmdStatus {
    Success,
    InvalidOpCode,
    InvalidMeasurementType,
    NotSupported,
    InvalidLength,
    InvalidParameter,
    AlreadyInState,
    InvalidResolution,
    InvalidSampleRate,
    InvalidRange,
    InvalidMtu,
    InvalidNumberOfChannels,
    InvalidState,
    DeviceInCharger,
}

impl PmdStatus {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0 => Self::Success,
            1 => Self::InvalidOpCode,
            2 => Self::InvalidMeasurementType,
            3 => Self::NotSupported,
            4 => Self::InvalidLength,
            5 => Self::InvalidParameter,
            6 => Self::AlreadyInState,
            7 => Self::InvalidResolution,
            8 => Self::InvalidSampleRate,
            9 => Self::InvalidRange,
            10 => Self::InvalidMtu,
            11 => Self::InvalidNumberOfChannels,
            12 => Self::InvalidState,
            13 => Self::DeviceInCharger,
            other => return Err(DecodeError::UnknownStatus(other)),
        })
    }
}

impl fmt::Display for PmdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::InvalidOpCode => "invalid op code",
            Self::InvalidMeasurementType => "invalid measurement type",
            Self::NotSupported => "not supported",
            Self::InvalidLength => "invalid length",
            Self::InvalidParameter => "invalid parameter",
            Self::AlreadyInState => "already in state",
            Self::InvalidResolution => "invalid resolution",
            Self::InvalidSampleRate => "invalid sample rate",
            Self::InvalidRange => "invalid range",
            Self::InvalidMtu => "invalid MTU",
            Self::InvalidNumberOfChannels => "invalid number of channels",
            Self::InvalidState => "invalid state",
            Self::DeviceInCharger => "device in charger",
        };
        f.write_str(text)
    }
}

// ── Control point response ────────────────────────────────────────────────────

/// One logical control-point response, possibly assembled from several packets.
///
/// First packet:
/// ```text
/// [0xF0][op_code][measurement_type][status]{ status == 0: [more][parameters…] }
/// ```
/// Continuation packets: `[more][parameters…]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPointResponse {
    pub response_code: u8,
    pub op_code: u8,
    pub measurement_type: MeasurementType,
    pub status: PmdStatus,
    pub more: bool,
    pub parameters: Vec<u8>,
}

impl ControlPointResponse {
    /// Parse the first packet of a response.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < CONTROL_POINT_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: CONTROL_POINT_HEADER_LEN,
                available: data.len(),
            });
        }
        if data[0] != CONTROL_POINT_RESPONSE_CODE {
            return Err(DecodeError::UnexpectedResponse("missing 0xF0 response code"));
        }
        let status = PmdStatus::from_byte(data[3])?;

        let (more, parameters) = match (status, data.get(CONTROL_POINT_HEADER_LEN)) {
            (PmdStatus::Success, Some(&more)) => {
                (more != 0, data[CONTROL_POINT_HEADER_LEN + 1..].to_vec())
            }
            _ => (false, Vec::new()),
        };

        Ok(Self {
            response_code: data[0],
            op_code: data[1],
            measurement_type: MeasurementType::from_byte(data[2]),
            status,
            more,
            parameters,
        })
    }

    /// Append a continuation packet, stripping its leading `more` flag.
    pub fn append_continuation(&mut self, packet: &[u8]) -> Result<(), DecodeError> {
        let (&more, rest) = packet.split_first().ok_or(DecodeError::Truncated {
            needed: 1,
            available: 0,
        })?;
        self.more = more != 0;
        self.parameters.extend_from_slice(rest);
        Ok(())
    }
}
