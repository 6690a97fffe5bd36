//! Binary decoders for PMD data notifications.
//!
//! All functions in this module are pure (no I/O, no blocking) and are safe
//! to call from any async or sync context.
//!
//! # Notification layout
//!
//! ```text
//! [measurement_type: 1][timestamp_ns: 8 LE][frame_type: 1][payload…]
//! ```
//!
//! # Frame types
//!
//! | Measurement | Frame type | Payload |
//! |---|---|---|
//! | ECG | `0x00` | 3 B signed µV per sample |
//! | ECG | `0x01` | "BS01": 14-bit µV + oversampling/contact/impedance bits, 3 B |
//! | ECG | `0x02` | "MAX3000": 18-bit µV + data/pace tags, 3 B |
//! | ACC | `0x00`–`0x02` | x/y/z signed mG, 1/2/3 B per axis |
//! | ACC | `0x80` | delta frame, C=3, × FACTOR × 1000 → mG |
//! | GYRO / MAG | `0x00`–`0x02` | x/y/z signed, 1/2/3 B per axis, × FACTOR |
//! | GYRO / MAG | `0x80` | delta frame, C=3, × FACTOR |
//! | PPG | `0x00` | 4 channels × 3 B signed |
//! | PPG | `0x01` | 18 channels × 3 B signed + 4 B status |
//! | PPG | `0x04` | AFE4410 auto-gain: 12 B ch1 gain, 12 B ch2 gain, 12 B integration counts |
//! | PPG | `0x05` | AFE operation mode, u32 LE |
//! | PPG | `0x06` | sport id, u64 LE |
//! | PPG | `0x09` | AFE4404 auto-gain: 8 × (gain u8, LED current u16 LE) |
//! | PPG | `0x0A` | MAX86161 auto-gain: 8 × (gain u8, integration count u8) |
//! | PPG | `0x80` | delta frame, C = CHANNELS setting |
//! | PPI | `0x00` | 6 B records: hr, pp ms, pp error, flags |
//! | BIOZ | `0x00` | 3 B signed |
//! | BIOZ | `0x01` | 2 × 3 B signed + 1 B status |
//! | BAROMETER | `0x00` | f32 LE hPa |
//! | BAROMETER | `0x80` | delta frame, C=1, × FACTOR |
//!
//! Any other measurement type is passed through as a [`RawFrame`].

use crate::delta::{decode_delta_frame, sign_extend};
use crate::error::DecodeError;
use crate::protocol::MeasurementType;
use crate::settings::{SelectedSettings, SettingType};
use crate::types::{
    AccSample, BiozSample, EcgFlags, EcgSample, PpgAutoGain, PpgData, PpgFrontEnd, PpgSample,
    PpiSample, PressureSample, RawFrame, SampleBatch, XyzSample,
};

/// Header length of a data notification.
pub const DATA_HEADER_LEN: usize = 10;

/// Frame type of a delta-compressed frame.
pub const COMPRESSED_FRAME: u8 = 0x80;

// ── DataFrame ────────────────────────────────────────────────────────────────

/// One data notification split into header fields and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub measurement_byte: u8,
    pub measurement: MeasurementType,
    pub timestamp: u64,
    pub frame_type: u8,
    pub payload: &'a [u8],
}

impl<'a> DataFrame<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < DATA_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: DATA_HEADER_LEN,
                available: data.len(),
            });
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[1..9]);
        Ok(Self {
            measurement_byte: data[0],
            measurement: MeasurementType::from_byte(data[0]),
            timestamp: u64::from_le_bytes(ts),
            frame_type: data[9],
            payload: &data[DATA_HEADER_LEN..],
        })
    }

    fn unsupported(&self) -> DecodeError {
        DecodeError::UnsupportedFrameType {
            measurement: self.measurement,
            frame_type: self.frame_type,
        }
    }

    fn to_raw(self) -> RawFrame {
        RawFrame {
            measurement_byte: self.measurement_byte,
            timestamp: self.timestamp,
            frame_type: self.frame_type,
            payload: self.payload.to_vec(),
        }
    }
}

// ── DecodeContext ────────────────────────────────────────────────────────────

/// Negotiated settings a decoder needs, taken from the measurement's
/// [`SelectedSettings`] at the time the notification arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodeContext {
    pub factor: Option<f32>,
    pub resolution: Option<u8>,
    pub channels: Option<u8>,
    pub sample_rate: Option<u32>,
}

impl DecodeContext {
    pub fn from_settings(settings: &SelectedSettings) -> Self {
        Self {
            factor: settings.factor(),
            resolution: settings
                .get(SettingType::Resolution)
                .and_then(|r| u8::try_from(r).ok()),
            channels: settings
                .get(SettingType::Channels)
                .and_then(|c| u8::try_from(c).ok()),
            sample_rate: settings.get(SettingType::SampleRate),
        }
    }

    fn resolution(&self) -> Result<u8, DecodeError> {
        self.resolution
            .ok_or(DecodeError::MissingSetting(SettingType::Resolution))
    }

    fn scale(&self) -> f32 {
        self.factor.unwrap_or(1.0)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Timestamp of sample `index` in a batch of `count`, where the frame
/// timestamp belongs to the last sample.
fn sample_timestamp(frame_ts: u64, index: usize, count: usize, sample_rate: Option<u32>) -> u64 {
    match sample_rate {
        Some(rate) if rate > 0 => {
            let behind = (count - 1 - index) as u64;
            frame_ts.saturating_sub(behind * 1_000_000_000 / rate as u64)
        }
        _ => frame_ts,
    }
}

/// Little-endian signed integer of 1–4 bytes.
fn read_signed(bytes: &[u8]) -> i32 {
    let raw = bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    sign_extend(raw, (bytes.len() * 8) as u32)
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn require(payload: &[u8], needed: usize) -> Result<(), DecodeError> {
    if payload.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

/// Split an uncompressed 3-axis payload; frame type 0/1/2 selects 1/2/3 bytes per axis.
fn raw_axes(payload: &[u8], frame_type: u8) -> Vec<[i32; 3]> {
    let width = frame_type as usize + 1;
    payload
        .chunks_exact(width * 3)
        .map(|c| {
            [
                read_signed(&c[..width]),
                read_signed(&c[width..2 * width]),
                read_signed(&c[2 * width..]),
            ]
        })
        .collect()
}

fn compressed_axes(payload: &[u8], ctx: &DecodeContext) -> Result<Vec<[i32; 3]>, DecodeError> {
    Ok(decode_delta_frame(payload, 3, ctx.resolution()?)?
        .into_iter()
        .map(|s| [s[0], s[1], s[2]])
        .collect())
}

// ── ECG ──────────────────────────────────────────────────────────────────────

fn ecg_plain(c: &[u8]) -> (i32, EcgFlags) {
    (read_signed(c), EcgFlags::None)
}

fn ecg_bs01(c: &[u8]) -> (i32, EcgFlags) {
    let raw = c[0] as u32 | ((c[1] as u32 & 0x3F) << 8);
    let flags = EcgFlags::Bs01 {
        oversampling: c[2] & 0x01 != 0,
        skin_contact: (c[2] & 0x06) >> 1,
        contact_impedance: (c[2] & 0x18) >> 3,
    };
    (sign_extend(raw, 14), flags)
}

fn ecg_max3000(c: &[u8]) -> (i32, EcgFlags) {
    let raw = (c[0] as u32 | (c[1] as u32) << 8 | (c[2] as u32 & 0x03) << 16) & 0x3F_FFFF;
    let flags = EcgFlags::Max3000 {
        ecg_data_tag: (c[2] & 0x1C) >> 2,
        pace_data_tag: (c[2] & 0xE0) >> 5,
    };
    (sign_extend(raw, 18), flags)
}

pub fn decode_ecg(frame: &DataFrame, ctx: &DecodeContext) -> Result<Vec<EcgSample>, DecodeError> {
    let decode: fn(&[u8]) -> (i32, EcgFlags) = match frame.frame_type {
        0x00 => ecg_plain,
        0x01 => ecg_bs01,
        0x02 => ecg_max3000,
        _ => return Err(frame.unsupported()),
    };
    let records = frame.payload.chunks_exact(3);
    let count = records.len();
    Ok(records
        .enumerate()
        .map(|(i, c)| {
            let (microvolts, flags) = decode(c);
            EcgSample {
                timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
                microvolts,
                flags,
            }
        })
        .collect())
}

// ── ACC / GYRO / MAGNETOMETER ────────────────────────────────────────────────

pub fn decode_acc(frame: &DataFrame, ctx: &DecodeContext) -> Result<Vec<AccSample>, DecodeError> {
    let axes = match frame.frame_type {
        0x00..=0x02 => raw_axes(frame.payload, frame.frame_type),
        COMPRESSED_FRAME => {
            let samples = compressed_axes(frame.payload, ctx)?;
            match ctx.factor {
                // factor is in g; report mG like the uncompressed frames
                Some(factor) => samples
                    .into_iter()
                    .map(|s| s.map(|v| (v as f32 * factor * 1000.0).round() as i32))
                    .collect(),
                None => samples,
            }
        }
        _ => return Err(frame.unsupported()),
    };
    let count = axes.len();
    Ok(axes
        .into_iter()
        .enumerate()
        .map(|(i, [x, y, z])| AccSample {
            timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
            x,
            y,
            z,
        })
        .collect())
}

/// Gyroscope (°/s) and magnetometer (gauss) share one layout.
pub fn decode_xyz(frame: &DataFrame, ctx: &DecodeContext) -> Result<Vec<XyzSample>, DecodeError> {
    let axes = match frame.frame_type {
        0x00..=0x02 => raw_axes(frame.payload, frame.frame_type),
        COMPRESSED_FRAME => compressed_axes(frame.payload, ctx)?,
        _ => return Err(frame.unsupported()),
    };
    let scale = ctx.scale();
    let count = axes.len();
    Ok(axes
        .into_iter()
        .enumerate()
        .map(|(i, [x, y, z])| XyzSample {
            timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
            x: x as f32 * scale,
            y: y as f32 * scale,
            z: z as f32 * scale,
        })
        .collect())
}

// ── PPG ──────────────────────────────────────────────────────────────────────

const PPG_CHANNELS: usize = 4;
const PPG_EXTENDED_CHANNELS: usize = 18;

fn ppg_samples(
    frame: &DataFrame,
    ctx: &DecodeContext,
    values: Vec<(Vec<i32>, Option<u32>)>,
) -> PpgData {
    let count = values.len();
    PpgData::Samples(
        values
            .into_iter()
            .enumerate()
            .map(|(i, (channels, status))| PpgSample {
                timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
                channels,
                status,
            })
            .collect(),
    )
}

pub fn decode_ppg(frame: &DataFrame, ctx: &DecodeContext) -> Result<PpgData, DecodeError> {
    let payload = frame.payload;
    let ts = frame.timestamp;
    match frame.frame_type {
        0x00 => {
            let values = payload
                .chunks_exact(PPG_CHANNELS * 3)
                .map(|c| (c.chunks_exact(3).map(read_signed).collect(), None))
                .collect();
            Ok(ppg_samples(frame, ctx, values))
        }
        0x01 => {
            const RECORD: usize = PPG_EXTENDED_CHANNELS * 3 + 4;
            let values = payload
                .chunks_exact(RECORD)
                .map(|c| {
                    let (channels, status) = c.split_at(PPG_EXTENDED_CHANNELS * 3);
                    let status = u32::from_le_bytes([status[0], status[1], status[2], status[3]]);
                    (channels.chunks_exact(3).map(read_signed).collect(), Some(status))
                })
                .collect();
            Ok(ppg_samples(frame, ctx, values))
        }
        0x04 => {
            require(payload, 36)?;
            Ok(PpgData::AutoGain(
                payload
                    .chunks_exact(36)
                    .map(|c| PpgAutoGain {
                        timestamp: ts,
                        front_end: PpgFrontEnd::Afe4410,
                        gains: c[..24].iter().map(|g| g & 0x07).collect(),
                        integration_counts: c[24..].to_vec(),
                        led_currents: Vec::new(),
                    })
                    .collect(),
            ))
        }
        0x05 => {
            require(payload, 4)?;
            Ok(PpgData::OperationMode {
                timestamp: ts,
                mode: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            })
        }
        0x06 => {
            require(payload, 8)?;
            let mut id = [0u8; 8];
            id.copy_from_slice(&payload[..8]);
            Ok(PpgData::SportId {
                timestamp: ts,
                sport_id: u64::from_le_bytes(id),
            })
        }
        0x09 => {
            require(payload, 24)?;
            Ok(PpgData::AutoGain(
                payload
                    .chunks_exact(24)
                    .map(|c| PpgAutoGain {
                        timestamp: ts,
                        front_end: PpgFrontEnd::Afe4404,
                        gains: c.chunks_exact(3).map(|ch| ch[0] & 0x0F).collect(),
                        integration_counts: Vec::new(),
                        led_currents: c.chunks_exact(3).map(|ch| read_u16(&ch[1..])).collect(),
                    })
                    .collect(),
            ))
        }
        0x0A => {
            require(payload, 16)?;
            Ok(PpgData::AutoGain(
                payload
                    .chunks_exact(16)
                    .map(|c| PpgAutoGain {
                        timestamp: ts,
                        front_end: PpgFrontEnd::Max86161,
                        gains: c.chunks_exact(2).map(|ch| ch[0] & 0x03).collect(),
                        integration_counts: c.chunks_exact(2).map(|ch| ch[1]).collect(),
                        led_currents: Vec::new(),
                    })
                    .collect(),
            ))
        }
        COMPRESSED_FRAME => {
            let channels = ctx
                .channels
                .ok_or(DecodeError::MissingSetting(SettingType::Channels))?;
            let samples = decode_delta_frame(payload, channels as usize, ctx.resolution()?)?;
            let values = samples
                .into_iter()
                .map(|s| {
                    let scaled = match ctx.factor {
                        Some(f) => s.iter().map(|&v| (v as f32 * f).round() as i32).collect(),
                        None => s,
                    };
                    (scaled, None)
                })
                .collect();
            Ok(ppg_samples(frame, ctx, values))
        }
        _ => Err(frame.unsupported()),
    }
}

// ── PPI ──────────────────────────────────────────────────────────────────────

pub fn decode_ppi(frame: &DataFrame) -> Result<Vec<PpiSample>, DecodeError> {
    if frame.frame_type != 0x00 {
        return Err(frame.unsupported());
    }
    Ok(frame
        .payload
        .chunks_exact(6)
        .map(|c| PpiSample {
            timestamp: frame.timestamp,
            hr: c[0],
            pp_ms: read_u16(&c[1..3]),
            pp_error_estimate: read_u16(&c[3..5]),
            blocker: c[5] & 0x01 != 0,
            skin_contact: c[5] & 0x02 != 0,
            skin_contact_supported: c[5] & 0x04 != 0,
        })
        .collect())
}

// ── BIOZ ─────────────────────────────────────────────────────────────────────

pub fn decode_bioz(frame: &DataFrame, ctx: &DecodeContext) -> Result<Vec<BiozSample>, DecodeError> {
    let records: Vec<(i32, Option<i32>, Option<u8>)> = match frame.frame_type {
        0x00 => frame
            .payload
            .chunks_exact(3)
            .map(|c| (read_signed(c), None, None))
            .collect(),
        0x01 => frame
            .payload
            .chunks_exact(7)
            .map(|c| (read_signed(&c[..3]), Some(read_signed(&c[3..6])), Some(c[6])))
            .collect(),
        _ => return Err(frame.unsupported()),
    };
    let count = records.len();
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, (primary, secondary, status))| BiozSample {
            timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
            primary,
            secondary,
            status,
        })
        .collect())
}

// ── BAROMETER ────────────────────────────────────────────────────────────────

pub fn decode_barometer(
    frame: &DataFrame,
    ctx: &DecodeContext,
) -> Result<Vec<PressureSample>, DecodeError> {
    let values: Vec<f32> = match frame.frame_type {
        0x00 => frame
            .payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        COMPRESSED_FRAME => {
            let scale = ctx.scale();
            decode_delta_frame(frame.payload, 1, ctx.resolution()?)?
                .into_iter()
                .map(|s| s[0] as f32 * scale)
                .collect()
        }
        _ => return Err(frame.unsupported()),
    };
    let count = values.len();
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(i, pressure)| PressureSample {
            timestamp: sample_timestamp(frame.timestamp, i, count, ctx.sample_rate),
            pressure,
        })
        .collect())
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Decode one data frame with the decoder selected by its measurement and
/// frame type.
pub fn decode_frame(frame: &DataFrame, ctx: &DecodeContext) -> Result<SampleBatch, DecodeError> {
    Ok(match frame.measurement {
        MeasurementType::Ecg => SampleBatch::Ecg(decode_ecg(frame, ctx)?),
        MeasurementType::Acc => SampleBatch::Acc(decode_acc(frame, ctx)?),
        MeasurementType::Gyro => SampleBatch::Gyro(decode_xyz(frame, ctx)?),
        MeasurementType::Magnetometer => SampleBatch::Magnetometer(decode_xyz(frame, ctx)?),
        MeasurementType::Ppg => SampleBatch::Ppg(decode_ppg(frame, ctx)?),
        MeasurementType::Ppi => SampleBatch::Ppi(decode_ppi(frame)?),
        MeasurementType::Bioz => SampleBatch::Bioz(decode_bioz(frame, ctx)?),
        MeasurementType::Barometer => SampleBatch::Barometer(decode_barometer(frame, ctx)?),
        MeasurementType::Ambient | MeasurementType::SdkMode | MeasurementType::Unknown => {
            SampleBatch::Raw(frame.to_raw())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(measurement: u8, timestamp: u64, frame_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![measurement];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.push(frame_type);
        out.extend_from_slice(payload);
        out
    }

    fn decode(data: &[u8], ctx: &DecodeContext) -> Result<SampleBatch, DecodeError> {
        decode_frame(&DataFrame::parse(data).unwrap(), ctx)
    }

    #[test]
    fn header_fields() {
        let data = notification(0x02, 0x0102_0304_0506_0708, 0x80, &[0xAA]);
        let frame = DataFrame::parse(&data).unwrap();
        assert_eq!(frame.measurement, MeasurementType::Acc);
        assert_eq!(frame.timestamp, 0x0102_0304_0506_0708);
        assert_eq!(frame.frame_type, 0x80);
        assert_eq!(frame.payload, &[0xAA]);
        assert!(DataFrame::parse(&data[..9]).is_err());
    }

    #[test]
    fn ecg_microvolts_are_signed_24_bit() {
        let data = notification(0x00, 1_000, 0x00, &[0x10, 0x00, 0x00, 0xF6, 0xFF, 0xFF]);
        let Ok(SampleBatch::Ecg(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected ECG batch");
        };
        let uv: Vec<i32> = samples.iter().map(|s| s.microvolts).collect();
        assert_eq!(uv, vec![16, -10]);
        assert!(samples.iter().all(|s| s.timestamp == 1_000));
    }

    #[test]
    fn ecg_timestamps_back_dated_by_sample_rate() {
        let data = notification(0x00, 1_000_000_000, 0x00, &[0u8; 9]);
        let ctx = DecodeContext {
            sample_rate: Some(100),
            ..Default::default()
        };
        let Ok(SampleBatch::Ecg(samples)) = decode(&data, &ctx) else {
            panic!("expected ECG batch");
        };
        let ts: Vec<u64> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![980_000_000, 990_000_000, 1_000_000_000]);
    }

    #[test]
    fn ecg_bs01_flags() {
        // raw 14-bit 0x3FFE (−2), oversampling, skin contact 2, impedance 3
        let data = notification(0x00, 0, 0x01, &[0xFE, 0x3F, 0b0001_1101]);
        let Ok(SampleBatch::Ecg(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected ECG batch");
        };
        assert_eq!(samples[0].microvolts, -2);
        assert_eq!(
            samples[0].flags,
            EcgFlags::Bs01 {
                oversampling: true,
                skin_contact: 2,
                contact_impedance: 3
            }
        );
    }

    #[test]
    fn ecg_max3000_tags() {
        let data = notification(0x00, 0, 0x02, &[0x34, 0x12, 0b1010_1000]);
        let Ok(SampleBatch::Ecg(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected ECG batch");
        };
        assert_eq!(samples[0].microvolts, 0x1234);
        assert_eq!(
            samples[0].flags,
            EcgFlags::Max3000 {
                ecg_data_tag: 2,
                pace_data_tag: 5
            }
        );
    }

    #[test]
    fn unknown_ecg_frame_type_is_rejected() {
        let data = notification(0x00, 0, 0x09, &[0x00, 0x00, 0x00]);
        assert_eq!(
            decode(&data, &DecodeContext::default()),
            Err(DecodeError::UnsupportedFrameType {
                measurement: MeasurementType::Ecg,
                frame_type: 0x09
            })
        );
    }

    #[test]
    fn acc_uncompressed_widths() {
        let ctx = DecodeContext::default();
        let d8 = notification(0x02, 0, 0x00, &[0x01, 0xFF, 0x7F]);
        let d16 = notification(0x02, 0, 0x01, &[0xE8, 0x03, 0x18, 0xFC, 0x00, 0x00]);
        let d24 = notification(
            0x02,
            0,
            0x02,
            &[0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x80],
        );
        let xyz = |data: &[u8]| match decode(data, &ctx) {
            Ok(SampleBatch::Acc(s)) => (s[0].x, s[0].y, s[0].z),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(xyz(&d8), (1, -1, 127));
        assert_eq!(xyz(&d16), (1000, -1000, 0));
        assert_eq!(xyz(&d24), (1, -1, -8_388_608));
    }

    #[test]
    fn acc_compressed_applies_factor_in_milli_g() {
        // 16-bit reference (4096, 0, −4096), one 8-bit delta group (+1, 0, −1)
        let payload = [0x00, 0x10, 0x00, 0x00, 0x00, 0xF0, 0x08, 0x01, 0x01, 0x00, 0xFF];
        let data = notification(0x02, 0, 0x80, &payload);
        let ctx = DecodeContext {
            factor: Some(0.000244140625), // 1/4096 g
            resolution: Some(16),
            ..Default::default()
        };
        let Ok(SampleBatch::Acc(samples)) = decode(&data, &ctx) else {
            panic!("expected ACC batch");
        };
        assert_eq!(samples.len(), 2);
        assert_eq!((samples[0].x, samples[0].y, samples[0].z), (1000, 0, -1000));
        assert_eq!((samples[1].x, samples[1].y, samples[1].z), (1000, 0, -1000));
    }

    #[test]
    fn compressed_frame_needs_resolution() {
        let data = notification(0x05, 0, 0x80, &[0x00; 6]);
        assert_eq!(
            decode(&data, &DecodeContext::default()),
            Err(DecodeError::MissingSetting(SettingType::Resolution))
        );
    }

    #[test]
    fn gyro_compressed_scaled_by_factor() {
        let payload = [0x0A, 0x00, 0xF6, 0xFF, 0x00, 0x00];
        let data = notification(0x05, 0, 0x80, &payload);
        let ctx = DecodeContext {
            factor: Some(0.5),
            resolution: Some(16),
            ..Default::default()
        };
        let Ok(SampleBatch::Gyro(samples)) = decode(&data, &ctx) else {
            panic!("expected GYRO batch");
        };
        assert_eq!((samples[0].x, samples[0].y, samples[0].z), (5.0, -5.0, 0.0));
    }

    #[test]
    fn ppi_records() {
        let data = notification(0x03, 7, 0x00, &[60, 0xE8, 0x03, 0x0A, 0x00, 0b110]);
        let Ok(SampleBatch::Ppi(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected PPI batch");
        };
        assert_eq!(
            samples,
            vec![PpiSample {
                timestamp: 7,
                hr: 60,
                pp_ms: 1000,
                pp_error_estimate: 10,
                blocker: false,
                skin_contact: true,
                skin_contact_supported: true,
            }]
        );
    }

    #[test]
    fn bioz_paired_samples_with_status() {
        let payload = [
            0x01, 0x00, 0x00, 0xFE, 0xFF, 0xFF, 0x05, 0x02, 0x00, 0x00, 0x03, 0x00, 0x00, 0x06,
        ];
        let data = notification(0x04, 0, 0x01, &payload);
        let Ok(SampleBatch::Bioz(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected BIOZ batch");
        };
        assert_eq!(samples.len(), 2);
        let fields: Vec<_> = samples
            .iter()
            .map(|s| (s.primary, s.secondary, s.status))
            .collect();
        assert_eq!(fields, vec![(1, Some(-2), Some(5)), (2, Some(3), Some(6))]);
    }

    #[test]
    fn ppg_four_channel_frame() {
        let payload = [
            0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x03, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
        ];
        let data = notification(0x01, 0, 0x00, &payload);
        let Ok(SampleBatch::Ppg(PpgData::Samples(samples))) =
            decode(&data, &DecodeContext::default())
        else {
            panic!("expected PPG samples");
        };
        assert_eq!(samples[0].channels, vec![1, 2, 3, -1]);
        assert_eq!(samples[0].status, None);
    }

    #[test]
    fn ppg_extended_frame_carries_status() {
        let mut payload = vec![0u8; 18 * 3];
        payload[0] = 0x07;
        payload.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let data = notification(0x01, 0, 0x01, &payload);
        let Ok(SampleBatch::Ppg(PpgData::Samples(samples))) =
            decode(&data, &DecodeContext::default())
        else {
            panic!("expected PPG samples");
        };
        assert_eq!(samples[0].channels.len(), 18);
        assert_eq!(samples[0].channels[0], 7);
        assert_eq!(samples[0].status, Some(0xDEAD_BEEF));
    }

    #[test]
    fn ppg_diagnostic_frames() {
        let ctx = DecodeContext::default();
        let mode = notification(0x01, 3, 0x05, &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(
            decode(&mode, &ctx),
            Ok(SampleBatch::Ppg(PpgData::OperationMode { timestamp: 3, mode: 2 }))
        );
        let sport = notification(0x01, 3, 0x06, &[0x01, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode(&sport, &ctx),
            Ok(SampleBatch::Ppg(PpgData::SportId { timestamp: 3, sport_id: 1 }))
        );
        let mut gain_payload = [0u8; 16];
        gain_payload[..4].copy_from_slice(&[0x07, 0x10, 0x01, 0x20]);
        let gain = notification(0x01, 3, 0x0A, &gain_payload);
        let Ok(SampleBatch::Ppg(PpgData::AutoGain(records))) = decode(&gain, &ctx) else {
            panic!("expected auto-gain");
        };
        assert_eq!(records[0].front_end, PpgFrontEnd::Max86161);
        assert_eq!(&records[0].gains[..2], &[0x03, 0x01]);
        assert_eq!(&records[0].integration_counts[..2], &[0x10, 0x20]);
        assert!(decode(&notification(0x01, 0, 0x05, &[0x01]), &ctx).is_err());
    }

    #[test]
    fn ppg_compressed_uses_channel_setting() {
        let payload = [0x01, 0x02, 0x03, 0x04, 0x08, 0x01, 0x01, 0x01, 0x01, 0x01];
        let data = notification(0x01, 0, 0x80, &payload);
        let ctx = DecodeContext {
            resolution: Some(8),
            channels: Some(4),
            ..Default::default()
        };
        let Ok(SampleBatch::Ppg(PpgData::Samples(samples))) = decode(&data, &ctx) else {
            panic!("expected PPG samples");
        };
        assert_eq!(samples[1].channels, vec![2, 3, 4, 5]);

        let no_channels = DecodeContext {
            resolution: Some(8),
            ..Default::default()
        };
        assert_eq!(
            decode(&data, &no_channels),
            Err(DecodeError::MissingSetting(SettingType::Channels))
        );
    }

    #[test]
    fn barometer_float_frame() {
        let data = notification(0x07, 0, 0x00, &1013.25f32.to_le_bytes());
        let Ok(SampleBatch::Barometer(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected barometer batch");
        };
        assert_eq!(samples[0].pressure, 1013.25);
    }

    #[test]
    fn ecg_max3000_negative_sample() {
        // 18-bit 0x20000 is the most negative value; byte 2 carries both tags
        let payload = [0x00, 0x00, 0b0110_0110, 0xFE, 0xFF, 0x03];
        let data = notification(0x00, 0, 0x02, &payload);
        let Ok(SampleBatch::Ecg(samples)) = decode(&data, &DecodeContext::default()) else {
            panic!("expected ECG batch");
        };
        let uv: Vec<i32> = samples.iter().map(|s| s.microvolts).collect();
        assert_eq!(uv, vec![-131_072, -2]);
        assert_eq!(
            samples[0].flags,
            EcgFlags::Max3000 {
                ecg_data_tag: 1,
                pace_data_tag: 3
            }
        );
        assert_eq!(
            samples[1].flags,
            EcgFlags::Max3000 {
                ecg_data_tag: 0,
                pace_data_tag: 0
            }
        );
    }

    #[test]
    fn magnetometer_frames_route_to_magnetometer_batch() {
        let data = notification(0x06, 5, 0x01, &[0x64, 0x00, 0x9C, 0xFF, 0x00, 0x00]);
        let ctx = DecodeContext {
            factor: Some(0.5),
            ..Default::default()
        };
        let Ok(SampleBatch::Magnetometer(samples)) = decode(&data, &ctx) else {
            panic!("expected magnetometer batch");
        };
        assert_eq!(
            samples,
            vec![XyzSample {
                timestamp: 5,
                x: 50.0,
                y: -50.0,
                z: 0.0,
            }]
        );
    }

    #[test]
    fn bioz_single_samples() {
        let payload = [0x10, 0x27, 0x00, 0x00, 0x00, 0x80];
        let data = notification(0x04, 2_000_000, 0x00, &payload);
        let ctx = DecodeContext {
            sample_rate: Some(1_000),
            ..Default::default()
        };
        let Ok(SampleBatch::Bioz(samples)) = decode(&data, &ctx) else {
            panic!("expected BIOZ batch");
        };
        assert_eq!(
            samples,
            vec![
                BiozSample {
                    timestamp: 1_000_000,
                    primary: 10_000,
                    secondary: None,
                    status: None,
                },
                BiozSample {
                    timestamp: 2_000_000,
                    primary: -8_388_608,
                    secondary: None,
                    status: None,
                },
            ]
        );
    }

    #[test]
    fn ppg_afe4410_auto_gain_records() {
        let mut payload = vec![0u8; 36];
        payload[0] = 0x0D;
        payload[12] = 0xFA;
        payload[23] = 0x08;
        payload[24] = 0x21;
        payload[35] = 0x44;
        payload.extend_from_slice(&[0xFF; 36]);
        // a partial third record is ignored
        payload.extend_from_slice(&[0x01; 5]);
        let data = notification(0x01, 11, 0x04, &payload);
        let Ok(SampleBatch::Ppg(PpgData::AutoGain(records))) =
            decode(&data, &DecodeContext::default())
        else {
            panic!("expected auto-gain");
        };

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.timestamp, 11);
        assert_eq!(first.front_end, PpgFrontEnd::Afe4410);
        assert_eq!(first.gains.len(), 24);
        assert_eq!(first.integration_counts.len(), 12);
        assert!(first.led_currents.is_empty());
        assert_eq!((first.gains[0], first.gains[12], first.gains[23]), (5, 2, 0));
        assert_eq!(first.integration_counts[0], 0x21);
        assert_eq!(first.integration_counts[11], 0x44);
        assert!(records[1].gains.iter().all(|&g| g == 7));
        assert!(records[1].integration_counts.iter().all(|&c| c == 0xFF));

        let short = notification(0x01, 0, 0x04, &[0u8; 35]);
        assert_eq!(
            decode(&short, &DecodeContext::default()),
            Err(DecodeError::Truncated {
                needed: 36,
                available: 35
            })
        );
    }

    #[test]
    fn ppg_afe4404_auto_gain_records() {
        let mut payload = vec![0u8; 24];
        payload[..3].copy_from_slice(&[0xF3, 0x34, 0x12]);
        payload[21..].copy_from_slice(&[0x1F, 0xFF, 0xFF]);
        let data = notification(0x01, 4, 0x09, &payload);
        let Ok(SampleBatch::Ppg(PpgData::AutoGain(records))) =
            decode(&data, &DecodeContext::default())
        else {
            panic!("expected auto-gain");
        };

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.front_end, PpgFrontEnd::Afe4404);
        assert_eq!(record.gains, vec![3, 0, 0, 0, 0, 0, 0, 0x0F]);
        assert_eq!(record.led_currents, vec![0x1234, 0, 0, 0, 0, 0, 0, 0xFFFF]);
        assert!(record.integration_counts.is_empty());

        let short = notification(0x01, 0, 0x09, &[0u8; 23]);
        assert_eq!(
            decode(&short, &DecodeContext::default()),
            Err(DecodeError::Truncated {
                needed: 24,
                available: 23
            })
        );
    }

    #[test]
    fn barometer_compressed_scaled_by_factor() {
        // 24-bit reference 129_664, then 8-bit deltas +32 and -64
        let payload = [0x80, 0xFA, 0x01, 0x08, 0x02, 0x20, 0xC0];
        let data = notification(0x07, 10_000_000_000, 0x80, &payload);
        let ctx = DecodeContext {
            factor: Some(0.0078125), // 1/128 hPa
            resolution: Some(24),
            sample_rate: Some(1),
            ..Default::default()
        };
        let Ok(SampleBatch::Barometer(samples)) = decode(&data, &ctx) else {
            panic!("expected barometer batch");
        };
        assert_eq!(
            samples,
            vec![
                PressureSample {
                    timestamp: 8_000_000_000,
                    pressure: 1013.0,
                },
                PressureSample {
                    timestamp: 9_000_000_000,
                    pressure: 1013.25,
                },
                PressureSample {
                    timestamp: 10_000_000_000,
                    pressure: 1012.75,
                },
            ]
        );
    }

    #[test]
    fn unknown_measurement_passes_through_raw() {
        let data = notification(0x2A, 9, 0x03, &[0xDE, 0xAD]);
        assert_eq!(
            decode(&data, &DecodeContext::default()),
            Ok(SampleBatch::Raw(RawFrame {
                measurement_byte: 0x2A,
                timestamp: 9,
                frame_type: 0x03,
                payload: vec![0xDE, 0xAD],
            }))
        );
    }
}
