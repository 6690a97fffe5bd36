//! # polar-pmd
//!
//! Async Rust client for the Polar Measurement Data (PMD) service exposed by
//! Polar heart-rate sensors, watches and straps over Bluetooth Low Energy.
//!
//! The crate negotiates measurement settings over the PMD control point,
//! starts and stops measurements, and decodes the data notifications into
//! typed samples (ECG, PPG, accelerometer, PPI, bio-impedance, gyroscope,
//! magnetometer and barometer).
//!
//! ## Quick start
//!
//! ```no_run
//! use polar_pmd::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PolarClient::new(PolarClientConfig::default());
//!     let (session, _handle) = client.connect().await?;
//!     session.read_features(true).await?;
//!
//!     let available = session.query_settings(MeasurementType::Ecg).await?;
//!     let mut ecg = session.stream(MeasurementType::Ecg, available.max_of()).await?;
//!     while let Some(event) = ecg.next().await {
//!         if let SampleBatch::Ecg(samples) = event?.batch {
//!             println!("{} samples", samples.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`polar_client`] | BLE scanning and connecting; the btleplug [`transport::Transport`] |
//! | [`session`] | [`session::MeasurementSession`]: features, settings, start/stop, subscriptions |
//! | [`control_point`] | Single-flight command/response exchange with continuation packets |
//! | [`dispatch`] | Fan-out of decoded data notifications to subscribers |
//! | [`protocol`] | GATT UUIDs, op codes, status codes and the feature bitmap |
//! | [`settings`] | TLV settings encoding |
//! | [`parse`] | Byte-to-sample decoders for every measurement type |
//! | [`delta`] | Reference + delta frame decompression |
//! | [`types`] | Decoded sample and event types |
//! | [`error`] | [`error::PmdError`] and [`error::DecodeError`] |

pub mod control_point;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod parse;
pub mod polar_client;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::polar_client::{PolarClient, PolarClientConfig, PolarDevice, PolarHandle};
    pub use crate::session::{
        MeasurementPhase, MeasurementSession, MeasurementState, MeasurementStream, SessionConfig,
    };
    pub use crate::dispatch::Subscription;
    pub use crate::transport::Transport;

    // ── Protocol and settings ─────────────────────────────────────────────────
    pub use crate::error::{DecodeError, PmdError};
    pub use crate::protocol::{FeatureSet, MeasurementType, PmdStatus};
    pub use crate::settings::{AvailableSettings, SelectedSettings, SettingType};

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::types::{
        AccSample, BiozSample, EcgFlags, EcgSample, MeasurementEvent, PpgAutoGain, PpgData,
        PpgSample, PpiSample, PressureSample, RawFrame, SampleBatch, XyzSample,
    };
}
