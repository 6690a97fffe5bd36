//! BLE scanning and connection to Polar sensors over btleplug.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{future, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::PmdError;
use crate::protocol::{PMD_CONTROL_POINT, PMD_DATA, PMD_SERVICE_UUID};
use crate::session::{MeasurementSession, SessionConfig};
use crate::transport::{NotificationStream, Transport};

// ── PolarDevice ───────────────────────────────────────────────────────────────

/// A Polar sensor discovered during a BLE scan.
///
/// Returned by [`PolarClient::scan_all`]; pass to [`PolarClient::connect_to`].
#[derive(Clone, Debug)]
pub struct PolarDevice {
    /// Advertised device name (e.g. `"Polar H10 A1B2C3D4"`).
    pub name: String,
    /// Platform BLE identifier: a UUID string on macOS / Windows, a MAC
    /// address on Linux.
    pub id: String,
    pub(crate) peripheral: Peripheral,
    pub(crate) adapter: Adapter,
}

// ── PolarClientConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PolarClientConfig {
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Match devices whose advertised name starts with this string.
    /// Default: `"Polar"`.
    pub name_prefix: String,
    /// Hard limit on the link-layer connect. Default: `10`.
    pub connect_timeout_secs: u64,
    pub session: SessionConfig,
}

impl Default for PolarClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 15,
            name_prefix: "Polar".into(),
            connect_timeout_secs: 10,
            session: SessionConfig::default(),
        }
    }
}

// ── PolarClient ───────────────────────────────────────────────────────────────

/// Finds Polar sensors and opens a [`MeasurementSession`] on them.
pub struct PolarClient {
    config: PolarClientConfig,
}

/// Return the first adapter, waiting on macOS until CoreBluetooth reports
/// PoweredOn (scans issued before that are silently ignored).
async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => {
                    info!("macOS: adapter is PoweredOn");
                    break;
                }
                Ok(state) if tokio::time::Instant::now() >= deadline => {
                    warn!("macOS: adapter still in state {state:?} after 3 s, proceeding");
                    break;
                }
                Ok(state) => debug!("macOS: adapter state = {state:?}, waiting"),
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(adapter)
}

impl PolarClient {
    pub fn new(config: PolarClientConfig) -> Self {
        Self { config }
    }

    /// Scan for `config.scan_timeout_secs` and return every matching sensor.
    pub async fn scan_all(&self) -> Result<Vec<PolarDevice>> {
        let adapter = first_adapter().await?;

        info!("scan_all: scanning for {} s", self.config.scan_timeout_secs);
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let mut found = vec![];
        for p in adapter.peripherals().await? {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if name.starts_with(&self.config.name_prefix) {
                let id = p.id().to_string();
                info!("scan_all: found {name}  id={id}");
                found.push(PolarDevice {
                    name,
                    id,
                    peripheral: p,
                    adapter: adapter.clone(),
                });
            }
        }
        info!("scan_all: {} device(s) found", found.len());
        Ok(found)
    }

    /// Connect to a device returned by [`PolarClient::scan_all`].
    pub async fn connect_to(
        &self,
        device: PolarDevice,
    ) -> Result<(MeasurementSession, PolarHandle)> {
        self.setup_peripheral(device.peripheral, device.name, device.adapter)
            .await
    }

    /// Connect to the first sensor whose name matches `config.name_prefix`.
    pub async fn connect(&self) -> Result<(MeasurementSession, PolarHandle)> {
        let adapter = first_adapter().await?;

        info!(
            "Scanning for Polar devices (timeout: {} s)",
            self.config.scan_timeout_secs
        );
        adapter.start_scan(ScanFilter::default()).await?;
        let peripheral = self
            .find_first(&adapter, &self.config.name_prefix, self.config.scan_timeout_secs)
            .await?;
        adapter.stop_scan().await.ok();

        let props = peripheral.properties().await?.unwrap_or_default();
        let device_name = props.local_name.unwrap_or_else(|| "Unknown".into());
        info!("Found device: {device_name}");

        self.setup_peripheral(peripheral, device_name, adapter).await
    }

    async fn setup_peripheral(
        &self,
        peripheral: Peripheral,
        device_name: String,
        adapter: Adapter,
    ) -> Result<(MeasurementSession, PolarHandle)> {
        let connect_timeout = self.config.connect_timeout_secs;
        tokio::time::timeout(Duration::from_secs(connect_timeout), peripheral.connect())
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after {connect_timeout} s"))??;

        // BlueZ reports the connection before its GATT cache is populated.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(Duration::from_secs(15), peripheral.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after 15 s"))??;

        if !peripheral.services().iter().any(|s| s.uuid == PMD_SERVICE_UUID) {
            return Err(anyhow!("{device_name} does not expose the PMD service"));
        }
        info!("Connected and services discovered: {device_name}");

        let transport = Arc::new(BtleTransport {
            characteristics: peripheral.characteristics(),
            peripheral: peripheral.clone(),
        });
        for uuid in [PMD_CONTROL_POINT, PMD_DATA] {
            transport.characteristic(uuid)?;
        }

        let session = MeasurementSession::new(transport, self.config.session.clone());
        session.attach().await?;

        // Adapter events usually report a dropped link before the
        // notification streams end.
        let watched = session.clone();
        let peripheral_id = peripheral.id();
        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Disconnect watcher: could not subscribe to adapter events: {e}");
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("Disconnect watcher: device {id:?} disconnected.");
                        watched.handle_disconnect();
                        break;
                    }
                }
            }
        });

        Ok((
            session,
            PolarHandle {
                name: device_name,
                peripheral,
            },
        ))
    }

    /// Poll until the first matching peripheral appears or the timeout expires.
    async fn find_first(
        &self,
        adapter: &Adapter,
        prefix: &str,
        timeout_secs: u64,
    ) -> Result<Peripheral> {
        use tokio::time::{sleep, timeout};

        let result = timeout(Duration::from_secs(timeout_secs), async {
            loop {
                for p in adapter.peripherals().await.unwrap_or_default() {
                    if let Ok(Some(props)) = p.properties().await {
                        if props.local_name.as_deref().is_some_and(|n| n.starts_with(prefix)) {
                            return p;
                        }
                    }
                }
                sleep(Duration::from_millis(250)).await;
            }
        })
        .await;

        result.map_err(|_| anyhow!("Timed out scanning for a Polar device after {timeout_secs} s"))
    }
}

// ── PolarHandle ───────────────────────────────────────────────────────────────

/// Link-level handle to a connected sensor.
pub struct PolarHandle {
    pub name: String,
    peripheral: Peripheral,
}

impl PolarHandle {
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

// ── BtleTransport ─────────────────────────────────────────────────────────────

/// [`Transport`] over a connected btleplug peripheral.
pub struct BtleTransport {
    peripheral: Peripheral,
    characteristics: BTreeSet<Characteristic>,
}

fn link_error(e: btleplug::Error) -> PmdError {
    match e {
        btleplug::Error::NotConnected => PmdError::Disconnected,
        other => PmdError::Transport(other.to_string()),
    }
}

impl BtleTransport {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, PmdError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| PmdError::Transport(format!("characteristic {uuid} not found")))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn send(&self, uuid: Uuid, data: &[u8], with_response: bool) -> Result<(), PmdError> {
        let characteristic = self.characteristic(uuid)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(link_error)
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, PmdError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.read(&characteristic).await.map_err(link_error)
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<NotificationStream, PmdError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(link_error)?;
        let notifications = self.peripheral.notifications().await.map_err(link_error)?;
        debug!("subscribed to {uuid}");
        Ok(notifications
            .filter(move |n| future::ready(n.uuid == uuid))
            .map(|n| Ok(n.value))
            .boxed())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}
