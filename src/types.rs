use crate::protocol::MeasurementType;

/// Extra per-sample fields carried by the legacy ECG wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcgFlags {
    /// Frame type 0 carries microvolts only.
    None,
    /// "BS01" (frame type 1).
    Bs01 {
        oversampling: bool,
        skin_contact: u8,
        contact_impedance: u8,
    },
    /// "MAX3000" (frame type 2).
    Max3000 { ecg_data_tag: u8, pace_data_tag: u8 },
}

/// One ECG sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcgSample {
    /// Nanoseconds, sensor clock.  See [`SampleBatch`] for how batch
    /// timestamps are distributed across samples.
    pub timestamp: u64,
    pub microvolts: i32,
    pub flags: EcgFlags,
}

/// One accelerometer sample in milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccSample {
    pub timestamp: u64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// A 3-axis floating-point sample.
///
/// Gyroscope values are in °/s, magnetometer values in gauss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyzSample {
    pub timestamp: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One pulse-to-pulse interval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpiSample {
    pub timestamp: u64,
    /// Heart rate in bpm, `0` when the sensor has no estimate yet.
    pub hr: u8,
    /// Pulse-to-pulse interval in milliseconds.
    pub pp_ms: u16,
    /// Error estimate of `pp_ms` in milliseconds.
    pub pp_error_estimate: u16,
    pub blocker: bool,
    pub skin_contact: bool,
    pub skin_contact_supported: bool,
}

/// One PPG sample: optical channel values plus, on the 18-channel variant,
/// the sensor status word.
#[derive(Debug, Clone, PartialEq)]
pub struct PpgSample {
    pub timestamp: u64,
    pub channels: Vec<i32>,
    pub status: Option<u32>,
}

/// Optical analog front-ends that report auto-gain diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpgFrontEnd {
    Afe4410,
    Afe4404,
    Max86161,
}

/// One auto-gain diagnostic record.
///
/// Vectors are per optical channel; `led_currents` is empty for front-ends
/// that do not report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpgAutoGain {
    pub timestamp: u64,
    pub front_end: PpgFrontEnd,
    pub gains: Vec<u8>,
    pub integration_counts: Vec<u8>,
    pub led_currents: Vec<u16>,
}

/// Decoded content of one PPG notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PpgData {
    Samples(Vec<PpgSample>),
    AutoGain(Vec<PpgAutoGain>),
    /// AFE operation mode word.
    OperationMode { timestamp: u64, mode: u32 },
    /// Sport profile the sensor is currently tuned for.
    SportId { timestamp: u64, sport_id: u64 },
}

/// One bio-impedance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiozSample {
    pub timestamp: u64,
    pub primary: i32,
    /// Present on frame type 1 only.
    pub secondary: Option<i32>,
    pub status: Option<u8>,
}

/// One barometer reading in hPa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSample {
    pub timestamp: u64,
    pub pressure: f32,
}

/// Payload of a notification the client cannot decode.
///
/// Delivered verbatim for forward compatibility with firmware features not
/// modelled here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub measurement_byte: u8,
    pub timestamp: u64,
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

/// The samples decoded from one data notification.
///
/// The notification timestamp belongs to the last sample of the batch.
/// When the sample rate is known, earlier samples are back-dated by one
/// sample period each; otherwise every sample carries the notification
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBatch {
    Ecg(Vec<EcgSample>),
    Acc(Vec<AccSample>),
    Gyro(Vec<XyzSample>),
    Magnetometer(Vec<XyzSample>),
    Ppg(PpgData),
    Ppi(Vec<PpiSample>),
    Bioz(Vec<BiozSample>),
    Barometer(Vec<PressureSample>),
    Raw(RawFrame),
}

impl SampleBatch {
    /// Number of records in the batch (`1` for single-value PPG frames).
    pub fn len(&self) -> usize {
        match self {
            SampleBatch::Ecg(v) => v.len(),
            SampleBatch::Acc(v) => v.len(),
            SampleBatch::Gyro(v) | SampleBatch::Magnetometer(v) => v.len(),
            SampleBatch::Ppg(PpgData::Samples(v)) => v.len(),
            SampleBatch::Ppg(PpgData::AutoGain(v)) => v.len(),
            SampleBatch::Ppg(_) => 1,
            SampleBatch::Ppi(v) => v.len(),
            SampleBatch::Bioz(v) => v.len(),
            SampleBatch::Barometer(v) => v.len(),
            SampleBatch::Raw(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded batch as handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementEvent {
    pub measurement: MeasurementType,
    /// Notification timestamp in nanoseconds.
    pub timestamp: u64,
    pub frame_type: u8,
    pub batch: SampleBatch,
}
