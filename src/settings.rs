//! Type-length-value codec for PMD measurement settings.
//!
//! The same TLV layout is used by the device to advertise what it offers
//! ([`AvailableSettings`]) and by the host to pick one value per field when
//! starting a measurement ([`SelectedSettings`]):
//!
//! ```text
//! repeated: [setting_tag: 1][count: 1]{ count × value (little-endian, width = table[tag]) }
//! ```
//!
//! | Tag | Setting | Width |
//! |---|---|---|
//! | 0 | sample rate (Hz) | 2 |
//! | 1 | resolution (bits) | 2 |
//! | 2 | range | 2 |
//! | 3 | range (milli-unit) | 4 |
//! | 4 | channels | 1 |
//! | 5 | factor (`f32` bit pattern, inbound only) | 4 |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    RangeMilliunit,
    Channels,
    Factor,
}

impl SettingType {
    /// Map a TLV tag byte to its setting.  Unknown tags are
    /// [`DecodeError::UnknownSetting`].
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        Ok(match tag {
            0 => Self::SampleRate,
            1 => Self::Resolution,
            2 => Self::Range,
            3 => Self::RangeMilliunit,
            4 => Self::Channels,
            5 => Self::Factor,
            other => return Err(DecodeError::UnknownSetting(other)),
        })
    }

    /// The TLV tag byte written for this setting.
    pub fn tag(self) -> u8 {
        match self {
            Self::SampleRate => 0,
            Self::Resolution => 1,
            Self::Range => 2,
            Self::RangeMilliunit => 3,
            Self::Channels => 4,
            Self::Factor => 5,
        }
    }

    /// Wire width of one value in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::SampleRate | Self::Resolution | Self::Range => 2,
            Self::RangeMilliunit | Self::Factor => 4,
            Self::Channels => 1,
        }
    }

    fn check(self, value: u32) -> Result<u32, DecodeError> {
        let width = self.width();
        if width < 4 && value >> (width * 8) != 0 {
            return Err(DecodeError::SettingOutOfRange {
                setting: self,
                value,
                width,
            });
        }
        Ok(value)
    }
}

fn read_le(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

// ── AvailableSettings ─────────────────────────────────────────────────────────

/// Values the device offers per setting, as returned by a settings query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableSettings {
    values: BTreeMap<SettingType, BTreeSet<u32>>,
}

impl AvailableSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TLV payload.
    ///
    /// An empty or single-byte payload means the measurement has no
    /// configurable settings.  A trailing byte that cannot hold a tag/count
    /// pair ends the parse; a declared count that overruns the payload is an
    /// error.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut settings = Self::new();
        let mut offset = 0;

        while offset + 2 <= data.len() {
            let setting = SettingType::from_tag(data[offset])?;
            let count = data[offset + 1] as usize;
            offset += 2;

            let width = setting.width();
            let needed = count * width;
            if offset + needed > data.len() {
                return Err(DecodeError::Truncated {
                    needed,
                    available: data.len() - offset,
                });
            }
            for chunk in data[offset..offset + needed].chunks_exact(width) {
                settings.insert(setting, read_le(chunk))?;
            }
            offset += needed;
        }
        Ok(settings)
    }

    /// Add one offered value.  Values too wide for the setting's wire width
    /// are rejected.
    pub fn insert(&mut self, setting: SettingType, value: u32) -> Result<(), DecodeError> {
        let value = setting.check(value)?;
        self.values.entry(setting).or_default().insert(value);
        Ok(())
    }

    /// Offered values of `setting` in ascending order.
    pub fn get(&self, setting: SettingType) -> Option<&BTreeSet<u32>> {
        self.values.get(&setting)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingType, &BTreeSet<u32>)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pick the largest offered value of every setting.
    pub fn max_of(&self) -> SelectedSettings {
        let values = self
            .values
            .iter()
            .filter_map(|(setting, set)| set.last().map(|&v| (*setting, v)))
            .collect();
        SelectedSettings { values }
    }
}

impl fmt::Display for AvailableSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (setting, set) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{setting:?}: {set:?}")?;
        }
        Ok(())
    }
}

// ── SelectedSettings ──────────────────────────────────────────────────────────

/// One chosen value per setting, sent with a start request.
///
/// After a successful start the session stores the device-negotiated
/// [`SettingType::Factor`] here as well; it is never written back to the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedSettings {
    values: BTreeMap<SettingType, u32>,
}

impl SelectedSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, e.g. `SelectedSettings::new().with(SampleRate, 130)?`.
    pub fn with(mut self, setting: SettingType, value: u32) -> Result<Self, DecodeError> {
        self.insert(setting, value)?;
        Ok(self)
    }

    /// Choose `value` for `setting`, replacing any earlier choice.
    pub fn insert(&mut self, setting: SettingType, value: u32) -> Result<(), DecodeError> {
        let value = setting.check(value)?;
        self.values.insert(setting, value);
        Ok(())
    }

    /// The chosen value of `setting`.  For [`SettingType::Factor`] this is
    /// the raw `f32` bit pattern; see [`Self::factor`].
    pub fn get(&self, setting: SettingType) -> Option<u32> {
        self.values.get(&setting).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingType, u32)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The negotiated scale factor, if the device returned one.
    pub fn factor(&self) -> Option<f32> {
        self.get(SettingType::Factor).map(f32::from_bits)
    }

    /// Encode for a start request.  [`SettingType::Factor`] is never emitted.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (&setting, &value) in &self.values {
            if setting == SettingType::Factor {
                continue;
            }
            out.push(setting.tag());
            out.push(1);
            out.extend_from_slice(&value.to_le_bytes()[..setting.width()]);
        }
        out
    }

    /// Adopt the scale factor carried in a start response.
    ///
    /// The firmware only reports the final factor after the measurement has
    /// started; settings other than FACTOR in the response are ignored.
    pub fn apply_start_response(&mut self, parameters: &[u8]) -> Result<(), DecodeError> {
        let returned = AvailableSettings::parse(parameters)?;
        if let Some(&factor) = returned
            .get(SettingType::Factor)
            .and_then(|set| set.iter().next())
        {
            self.values.insert(SettingType::Factor, factor);
        }
        Ok(())
    }
}

impl fmt::Display for SelectedSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (&setting, &value) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            if setting == SettingType::Factor {
                write!(f, "{setting:?}={}", f32::from_bits(value))?;
            } else {
                write!(f, "{setting:?}={value}")?;
            }
        }
        Ok(())
    }
}
