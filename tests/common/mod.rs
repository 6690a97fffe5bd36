#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::Notify;
use uuid::Uuid;

use polar_pmd::error::PmdError;
use polar_pmd::protocol::{PMD_CONTROL_POINT, PMD_DATA};
use polar_pmd::session::{MeasurementSession, SessionConfig};
use polar_pmd::transport::{NotificationStream, Transport};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;
type Sink = mpsc::UnboundedSender<Result<Vec<u8>, PmdError>>;

/// A scripted PMD peripheral.
///
/// Every control-point write is recorded and handed to the responder; the
/// packets it returns are delivered as control-point notifications.
pub struct MockTransport {
    connected: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    written: Notify,
    responder: Mutex<Responder>,
    feature_read: Mutex<Option<Vec<u8>>>,
    sinks: Mutex<HashMap<Uuid, Sink>>,
}

/// A control-point response packet; `more` is always 0.
pub fn response(op_code: u8, measurement: u8, status: u8, parameters: &[u8]) -> Vec<u8> {
    let mut out = vec![0xF0, op_code, measurement, status];
    if status == 0 {
        out.push(0x00);
        out.extend_from_slice(parameters);
    }
    out
}

pub fn data_frame(measurement: u8, timestamp: u64, frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![measurement];
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(frame_type);
    out.extend_from_slice(payload);
    out
}

/// Answers every command with SUCCESS and no parameters.
fn acknowledge(packet: &[u8]) -> Vec<Vec<u8>> {
    vec![response(packet[0], packet.get(1).copied().unwrap_or(0), 0, &[])]
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            written: Notify::new(),
            responder: Mutex::new(Box::new(acknowledge)),
            feature_read: Mutex::new(None),
            sinks: Mutex::new(HashMap::new()),
        })
    }

    pub fn respond_with(&self, responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub fn set_feature_read(&self, data: Vec<u8>) {
        *self.feature_read.lock().unwrap() = Some(data);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub async fn wait_for_writes(&self, count: usize) {
        while self.writes.lock().unwrap().len() < count {
            self.written.notified().await;
        }
    }

    pub fn notify(&self, characteristic: Uuid, data: Vec<u8>) {
        if let Some(sink) = self.sinks.lock().unwrap().get(&characteristic) {
            let _ = sink.unbounded_send(Ok(data));
        }
    }

    /// Drop the link: notification streams end and further writes fail.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sinks.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, characteristic: Uuid, data: &[u8], _: bool) -> Result<(), PmdError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PmdError::Disconnected);
        }
        assert_eq!(characteristic, PMD_CONTROL_POINT);
        self.writes.lock().unwrap().push(data.to_vec());
        let replies = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(data)
        };
        for reply in replies {
            self.notify(PMD_CONTROL_POINT, reply);
        }
        self.written.notify_one();
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, PmdError> {
        assert_eq!(characteristic, PMD_CONTROL_POINT);
        self.feature_read
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PmdError::Transport("read not permitted".into()))
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, PmdError> {
        assert!(characteristic == PMD_CONTROL_POINT || characteristic == PMD_DATA);
        let (sink, stream) = mpsc::unbounded();
        self.sinks.lock().unwrap().insert(characteristic, sink);
        Ok(stream.boxed())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub async fn attached(mock: &Arc<MockTransport>) -> anyhow::Result<MeasurementSession> {
    attached_with(mock, SessionConfig::default()).await
}

pub async fn attached_with(
    mock: &Arc<MockTransport>,
    config: SessionConfig,
) -> anyhow::Result<MeasurementSession> {
    let session = MeasurementSession::new(mock.clone(), config);
    session.attach().await?;
    Ok(session)
}
