//! The per-connection PMD session.
//!
//! A [`MeasurementSession`] owns the control-point exchange, the feature
//! bitmap, the per-measurement negotiation state and the subscriber
//! registry.  It is cheap to clone; every clone drives the same connection.
//!
//! Notifications reach the session either through the pump tasks started by
//! [`MeasurementSession::attach`] or by calling
//! [`MeasurementSession::handle_control_point_notification`] and
//! [`MeasurementSession::handle_data_notification`] directly.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::control_point::{ControlPoint, DEFAULT_COMMAND_TIMEOUT};
use crate::dispatch::{StreamDispatcher, Subscription};
use crate::error::{PmdError, Result};
use crate::parse::DecodeContext;
use crate::protocol::{
    ControlPointCommand, FeatureSet, MeasurementType, FEATURE_READ_MARKER, PMD_CONTROL_POINT,
    PMD_DATA,
};
use crate::settings::{AvailableSettings, SelectedSettings};
use crate::transport::{NotificationStream, Transport};
use crate::types::MeasurementEvent;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables for a [`MeasurementSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a control-point command waits for its response.
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

// ── Per-measurement state ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeasurementPhase {
    #[default]
    NotStarted,
    Starting,
    Running,
    Stopping,
}

/// What the session knows about one measurement type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementState {
    pub phase: MeasurementPhase,
    /// Last answer to a settings query.
    pub available: Option<AvailableSettings>,
    /// Settings the running measurement was started with, including the
    /// FACTOR reported by the device.
    pub selected: Option<SelectedSettings>,
}

impl MeasurementState {
    pub fn factor(&self) -> Option<f32> {
        self.selected.as_ref().and_then(SelectedSettings::factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FeatureState {
    Unknown,
    Known(FeatureSet),
    LinkLost,
}

// ── Session ───────────────────────────────────────────────────────────────────

struct SessionInner {
    transport: Arc<dyn Transport>,
    control_point: ControlPoint,
    dispatcher: StreamDispatcher,
    states: RwLock<HashMap<MeasurementType, MeasurementState>>,
    features: watch::Sender<FeatureState>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionInner {
    fn store_features(&self, features: FeatureSet) {
        info!("PMD features: {:?}", features.measurements());
        self.features.send_replace(FeatureState::Known(features));
    }

    fn on_control_point(&self, data: &[u8]) {
        if data.first() == Some(&FEATURE_READ_MARKER) {
            match FeatureSet::from_read(data) {
                Some(features) => self.store_features(features),
                None => warn!("short feature notification {data:02x?}"),
            }
            return;
        }
        self.control_point.handle_notification(data);
    }

    fn on_data(&self, data: &[u8]) {
        self.dispatcher.dispatch(data, |m| self.decode_context(m));
    }

    /// Runs once per pump and once per reported disconnect; every call
    /// clears state.
    fn on_disconnect(&self) {
        if self.features.send_replace(FeatureState::LinkLost) != FeatureState::LinkLost {
            info!("PMD link lost; clearing measurement state");
        } else {
            debug!("PMD link lost again; clearing measurement state");
        }
        self.write_states().clear();
        self.control_point.fail_pending(PmdError::Disconnected);
        self.dispatcher.close_all(PmdError::Disconnected);
    }

    fn decode_context(&self, measurement: MeasurementType) -> DecodeContext {
        self.read_states()
            .get(&measurement)
            .and_then(|s| s.selected.as_ref())
            .map(DecodeContext::from_settings)
            .unwrap_or_default()
    }

    fn read_states(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<MeasurementType, MeasurementState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_states(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<MeasurementType, MeasurementState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the phase of `measurement`, returning the previous one.
    fn set_phase(
        &self,
        measurement: MeasurementType,
        phase: MeasurementPhase,
    ) -> MeasurementPhase {
        let mut states = self.write_states();
        let state = states.entry(measurement).or_default();
        std::mem::replace(&mut state.phase, phase)
    }

    /// Undo a phase change after a failed command.  After link loss the
    /// measurement is forgotten rather than restored.
    fn abandon(&self, measurement: MeasurementType, previous: MeasurementPhase, error: &PmdError) {
        if *error == PmdError::Disconnected {
            self.write_states().remove(&measurement);
        } else {
            self.set_phase(measurement, previous);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for pump in self.pumps.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            pump.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Route {
    ControlPoint,
    Data,
}

async fn pump(session: Weak<SessionInner>, mut stream: NotificationStream, route: Route) {
    while let Some(item) = stream.next().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        match item {
            Ok(data) => match route {
                Route::ControlPoint => inner.on_control_point(&data),
                Route::Data => inner.on_data(&data),
            },
            Err(e) => {
                warn!("{route:?} notifications failed: {e}");
                inner.on_disconnect();
                return;
            }
        }
    }
    debug!("{route:?} notification stream ended");
    if let Some(inner) = session.upgrade() {
        inner.on_disconnect();
    }
}

/// Client side of the Polar Measurement Data service on one connection.
#[derive(Clone)]
pub struct MeasurementSession {
    inner: Arc<SessionInner>,
}

impl MeasurementSession {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (features, _) = watch::channel(FeatureState::Unknown);
        Self {
            inner: Arc::new(SessionInner {
                control_point: ControlPoint::new(transport.clone(), config.command_timeout),
                transport,
                dispatcher: StreamDispatcher::new(),
                states: RwLock::new(HashMap::new()),
                features,
                pumps: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enable notifications on both PMD characteristics and start routing
    /// them into this session.
    ///
    /// Must be called from within a Tokio runtime.  Calling it again after a
    /// reconnect replaces the previous pump tasks.
    pub async fn attach(&self) -> Result<()> {
        let control = self.inner.transport.subscribe(PMD_CONTROL_POINT).await?;
        let data = self.inner.transport.subscribe(PMD_DATA).await?;

        self.inner.features.send_replace(FeatureState::Unknown);
        let weak = Arc::downgrade(&self.inner);
        let tasks = [
            tokio::spawn(pump(weak.clone(), control, Route::ControlPoint)),
            tokio::spawn(pump(weak, data, Route::Data)),
        ];

        let mut pumps = self.inner.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        for old in pumps.drain(..) {
            old.abort();
        }
        pumps.extend(tasks);
        debug!("PMD notifications attached");
        Ok(())
    }

    // ── Features ─────────────────────────────────────────────────────────────

    /// The cached feature bitmap, if one has been read.
    pub fn features(&self) -> Option<FeatureSet> {
        match *self.inner.features.borrow() {
            FeatureState::Known(features) => Some(features),
            _ => None,
        }
    }

    /// Return the feature bitmap, reading the control point if it is not
    /// cached yet.
    ///
    /// With `wait_if_unavailable`, a failed read waits for the bitmap to be
    /// delivered as a control-point notification instead of failing with
    /// [`PmdError::FeaturesUnavailable`].  Waiting ends with
    /// [`PmdError::Disconnected`] if the link drops.
    pub async fn read_features(&self, wait_if_unavailable: bool) -> Result<FeatureSet> {
        let mut updates = self.inner.features.subscribe();
        if let FeatureState::Known(features) = *updates.borrow_and_update() {
            return Ok(features);
        }
        if !self.inner.transport.is_connected().await {
            return Err(PmdError::Disconnected);
        }

        match self.inner.transport.read(PMD_CONTROL_POINT).await {
            Ok(data) => match FeatureSet::from_read(&data) {
                Some(features) => {
                    self.inner.store_features(features);
                    return Ok(features);
                }
                None => debug!("control point read {data:02x?} is not a feature bitmap"),
            },
            Err(PmdError::Disconnected) => return Err(PmdError::Disconnected),
            Err(e) => debug!("feature read failed: {e}"),
        }

        if !wait_if_unavailable {
            return Err(PmdError::FeaturesUnavailable);
        }
        loop {
            if updates.changed().await.is_err() {
                return Err(PmdError::Disconnected);
            }
            match *updates.borrow_and_update() {
                FeatureState::Known(features) => return Ok(features),
                FeatureState::LinkLost => return Err(PmdError::Disconnected),
                FeatureState::Unknown => {}
            }
        }
    }

    fn ensure_supported(&self, measurement: MeasurementType) -> Result<()> {
        match self.features() {
            Some(features) if !features.supports(measurement) => {
                Err(PmdError::Unsupported(measurement))
            }
            _ => Ok(()),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Ask the device which settings `measurement` can be started with.
    pub async fn query_settings(&self, measurement: MeasurementType) -> Result<AvailableSettings> {
        self.ensure_supported(measurement)?;
        let response = self
            .inner
            .control_point
            .execute(ControlPointCommand::GetMeasurementSettings, &[measurement.as_byte()])
            .await?;
        let available = AvailableSettings::parse(&response.parameters)?;
        debug!("{measurement} settings: {available}");
        self.inner
            .write_states()
            .entry(measurement)
            .or_default()
            .available = Some(available.clone());
        Ok(available)
    }

    /// Ask for the wider settings range available while SDK mode is on.
    pub async fn query_full_settings(
        &self,
        measurement: MeasurementType,
    ) -> Result<AvailableSettings> {
        self.ensure_supported(measurement)?;
        let response = self
            .inner
            .control_point
            .execute(
                ControlPointCommand::GetSdkModeMeasurementSettings,
                &[measurement.as_byte()],
            )
            .await?;
        Ok(AvailableSettings::parse(&response.parameters)?)
    }

    /// Start `measurement` with `settings`.
    ///
    /// Starting a measurement the device reports as already running
    /// succeeds.  Returns the effective settings, including the FACTOR the
    /// device reported.  If the start response itself cannot be decoded the
    /// measurement is still recorded as running and the decode error is
    /// returned.
    pub async fn start(
        &self,
        measurement: MeasurementType,
        settings: SelectedSettings,
    ) -> Result<SelectedSettings> {
        self.ensure_supported(measurement)?;
        let previous = self.inner.set_phase(measurement, MeasurementPhase::Starting);

        let mut parameters = vec![measurement.as_byte()];
        parameters.extend(settings.serialize());
        let outcome = self
            .inner
            .control_point
            .execute(ControlPointCommand::RequestMeasurementStart, &parameters)
            .await;

        let mut selected = settings;
        let result = match outcome {
            Ok(response) => selected
                .apply_start_response(&response.parameters)
                .map_err(PmdError::from),
            Err(e) if e.is_already_in_state() => {
                info!("{measurement} is already running");
                if let Some(existing) = self.measurement_state(measurement).selected {
                    selected = existing;
                }
                Ok(())
            }
            Err(e) => {
                self.inner.abandon(measurement, previous, &e);
                return Err(e);
            }
        };

        info!("{measurement} running: {selected}");
        {
            let mut states = self.inner.write_states();
            let state = states.entry(measurement).or_default();
            state.phase = MeasurementPhase::Running;
            state.selected = Some(selected.clone());
        }
        result.map(|()| selected)
    }

    /// Stop `measurement`.  Stopping one that is not running succeeds.
    pub async fn stop(&self, measurement: MeasurementType) -> Result<()> {
        let previous = self.inner.set_phase(measurement, MeasurementPhase::Stopping);
        match self
            .inner
            .control_point
            .execute(ControlPointCommand::StopMeasurement, &[measurement.as_byte()])
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_already_in_state() => debug!("{measurement} was not running"),
            Err(e) => {
                self.inner.abandon(measurement, previous, &e);
                return Err(e);
            }
        }

        info!("{measurement} stopped");
        let mut states = self.inner.write_states();
        let state = states.entry(measurement).or_default();
        state.phase = MeasurementPhase::NotStarted;
        state.selected = None;
        Ok(())
    }

    /// Put the sensor into SDK mode, which unlocks the full settings ranges.
    pub async fn enable_sdk_mode(&self) -> Result<()> {
        self.start(MeasurementType::SdkMode, SelectedSettings::new())
            .await
            .map(|_| ())
    }

    /// Leave SDK mode.  Succeeds when SDK mode was not on.
    pub async fn disable_sdk_mode(&self) -> Result<()> {
        self.stop(MeasurementType::SdkMode).await
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    /// Receive every decoded batch of `measurement`.
    ///
    /// Subscribing does not start the measurement; see [`Self::stream`].
    pub fn subscribe(&self, measurement: MeasurementType) -> Subscription {
        self.inner.dispatcher.subscribe(measurement)
    }

    /// Subscribe to `measurement`, starting it with `settings` unless it is
    /// already running.
    ///
    /// The measurement is stopped when the last subscriber goes away through
    /// [`MeasurementStream::close`] or by dropping the stream.
    pub async fn stream(
        &self,
        measurement: MeasurementType,
        settings: SelectedSettings,
    ) -> Result<MeasurementStream> {
        let subscription = self.subscribe(measurement);
        if self.measurement_state(measurement).phase != MeasurementPhase::Running {
            self.start(measurement, settings).await?;
        }
        Ok(MeasurementStream {
            session: self.clone(),
            measurement,
            subscription: Some(subscription),
            phase: StreamPhase::Delivering,
        })
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Snapshot of what the session knows about `measurement`.  Types never
    /// queried or started report the default state.
    pub fn measurement_state(&self, measurement: MeasurementType) -> MeasurementState {
        self.inner
            .read_states()
            .get(&measurement)
            .cloned()
            .unwrap_or_default()
    }

    /// Measurements currently in [`MeasurementPhase::Running`], ordered by
    /// type byte.
    pub fn running_measurements(&self) -> Vec<MeasurementType> {
        let states = self.inner.read_states();
        let mut running: Vec<MeasurementType> = states
            .iter()
            .filter(|(_, s)| s.phase == MeasurementPhase::Running)
            .map(|(m, _)| *m)
            .collect();
        running.sort_by_key(|m| m.as_byte());
        running
    }

    /// Live subscriptions for `measurement`.
    pub fn subscriber_count(&self, measurement: MeasurementType) -> usize {
        self.inner.dispatcher.subscriber_count(measurement)
    }

    /// Data frames dropped because they could not be decoded.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dispatcher.dropped_frames()
    }

    /// Decoded batches discarded because a subscriber fell behind.
    pub fn overflowed_batches(&self) -> u64 {
        self.inner.dispatcher.overflowed_batches()
    }

    // ── Notification entry points ────────────────────────────────────────────

    pub fn handle_control_point_notification(&self, data: &[u8]) {
        self.inner.on_control_point(data);
    }

    pub fn handle_data_notification(&self, data: &[u8]) {
        self.inner.on_data(data);
    }

    /// Clear all per-connection state after the link drops.
    ///
    /// Pending commands fail and every subscriber receives
    /// [`PmdError::Disconnected`] before being deregistered.
    pub fn handle_disconnect(&self) {
        self.inner.on_disconnect();
    }

    fn should_stop_after_close(&self, measurement: MeasurementType) -> bool {
        self.subscriber_count(measurement) == 0
            && self.measurement_state(measurement).phase == MeasurementPhase::Running
    }
}

// ── MeasurementStream ─────────────────────────────────────────────────────────

/// Lifecycle of a [`MeasurementStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Batches are being delivered.
    Delivering,
    /// The last subscriber left and the stop command is in flight.
    Stopping,
    /// No further batches will arrive.
    Closed,
}

/// A subscription that owns the running measurement's lifetime.
///
/// Dropping the stream without calling [`close`](Self::close) still stops
/// the measurement when this was the last subscriber, on a background task
/// if a Tokio runtime is available.
pub struct MeasurementStream {
    session: MeasurementSession,
    measurement: MeasurementType,
    subscription: Option<Subscription>,
    phase: StreamPhase,
}

impl MeasurementStream {
    /// The measurement type this stream delivers.
    pub fn measurement(&self) -> MeasurementType {
        self.measurement
    }

    /// Where the stream is in its lifecycle.  Turns [`StreamPhase::Closed`]
    /// after `recv` yields an error or the end of the stream.
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// The next decoded batch.  `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Result<MeasurementEvent>> {
        let item = self.subscription.as_mut()?.recv().await;
        if matches!(item, None | Some(Err(_))) {
            self.phase = StreamPhase::Closed;
        }
        item
    }

    /// Deregister and stop the measurement if no other subscriber remains.
    pub async fn close(mut self) -> Result<()> {
        let Some(subscription) = self.subscription.take() else {
            return Ok(());
        };
        drop(subscription);
        let result = if self.session.should_stop_after_close(self.measurement) {
            self.phase = StreamPhase::Stopping;
            self.session.stop(self.measurement).await
        } else {
            Ok(())
        };
        self.phase = StreamPhase::Closed;
        result
    }
}

impl Stream for MeasurementStream {
    type Item = Result<MeasurementEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(subscription) = this.subscription.as_mut() else {
            return Poll::Ready(None);
        };
        let poll = Pin::new(subscription).poll_next(cx);
        if matches!(poll, Poll::Ready(None | Some(Err(_)))) {
            this.phase = StreamPhase::Closed;
        }
        poll
    }
}

impl Drop for MeasurementStream {
    fn drop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        drop(subscription);
        if !self.session.should_stop_after_close(self.measurement) {
            return;
        }
        let session = self.session.clone();
        let measurement = self.measurement;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.stop(measurement).await {
                        warn!("stopping {measurement} after its last subscriber left: {e}");
                    }
                });
            }
            Err(_) => warn!("{measurement} left running: no runtime to stop it from"),
        }
    }
}
