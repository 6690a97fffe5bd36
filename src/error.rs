//! Error taxonomy for the PMD client.
//!
//! Command-level failures ([`PmdError`]) always reach the caller that issued
//! the command.  Decode failures ([`DecodeError`]) are fatal to a single
//! parse call; on the data path the dispatcher logs them and drops the frame.

use thiserror::Error;

use crate::protocol::{ControlPointCommand, MeasurementType, PmdStatus};
use crate::settings::SettingType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PmdError {
    /// The BLE link was down when the operation started or dropped while it
    /// was pending.
    #[error("device disconnected")]
    Disconnected,

    #[error("no control point response to {command:?} within {timeout_secs} s")]
    Timeout {
        command: ControlPointCommand,
        timeout_secs: u64,
    },

    #[error("{command:?} for {measurement:?} rejected by device: {status}")]
    Command {
        command: ControlPointCommand,
        measurement: MeasurementType,
        status: PmdStatus,
    },

    #[error("{0:?} is not supported by the connected device")]
    Unsupported(MeasurementType),

    #[error("feature bitmap has not been read yet")]
    FeaturesUnavailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PmdError {
    /// `true` for a device rejection with `ERROR_ALREADY_IN_STATE`.
    pub fn is_already_in_state(&self) -> bool {
        matches!(
            self,
            PmdError::Command {
                status: PmdStatus::AlreadyInState,
                ..
            }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown setting tag 0x{0:02x}")]
    UnknownSetting(u8),

    #[error("{setting:?} value {value} does not fit in {width} byte(s)")]
    SettingOutOfRange {
        setting: SettingType,
        value: u32,
        width: usize,
    },

    #[error("delta block decoded {decoded} values, expected a multiple of {channels} channels")]
    ChannelMismatch { channels: usize, decoded: usize },

    #[error("invalid delta bit width {0}")]
    InvalidDeltaWidth(u8),

    #[error("invalid reference resolution {0} bits")]
    InvalidResolution(u8),

    #[error("{0:?} has not been negotiated for this measurement")]
    MissingSetting(SettingType),

    #[error("frame type 0x{frame_type:02x} is not supported for {measurement:?}")]
    UnsupportedFrameType {
        measurement: MeasurementType,
        frame_type: u8,
    },

    #[error("unknown control point status 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("unexpected control point packet: {0}")]
    UnexpectedResponse(&'static str),
}

pub type Result<T, E = PmdError> = std::result::Result<T, E>;
