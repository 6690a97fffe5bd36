//! Request/response exchanges over the PMD control point.
//!
//! Only one exchange is in flight at a time: the firmware does not multiplex
//! control-point commands.  Each exchange owns a `oneshot` that the
//! notification task completes once the last continuation packet arrives.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::error::{PmdError, Result};
use crate::protocol::{
    encode_command, ControlPointCommand, ControlPointResponse, PmdStatus, PMD_CONTROL_POINT,
};
use crate::transport::Transport;

/// How long a command waits for its response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

struct Exchange {
    command: ControlPointCommand,
    /// Response assembled so far; `None` until the first packet arrives.
    partial: Option<ControlPointResponse>,
    reply: oneshot::Sender<Result<ControlPointResponse>>,
}

pub struct ControlPoint {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    in_flight: AsyncMutex<()>,
    pending: Mutex<Option<Exchange>>,
}

impl ControlPoint {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            in_flight: AsyncMutex::new(()),
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<Exchange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `[op_code, parameters…]` and wait for the complete response.
    ///
    /// A response whose status is not SUCCESS is returned as
    /// [`PmdError::Command`].
    pub async fn execute(
        &self,
        command: ControlPointCommand,
        parameters: &[u8],
    ) -> Result<ControlPointResponse> {
        let _exclusive = self.in_flight.lock().await;

        if !self.transport.is_connected().await {
            return Err(PmdError::Disconnected);
        }

        let (reply, response) = oneshot::channel();
        *self.pending() = Some(Exchange {
            command,
            partial: None,
            reply,
        });

        let packet = encode_command(command, parameters);
        debug!("control point → {packet:02x?}");
        if let Err(e) = self.transport.send(PMD_CONTROL_POINT, &packet, true).await {
            self.pending().take();
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(result)) => result?,
            // exchange dropped without an answer
            Ok(Err(_)) => return Err(PmdError::Disconnected),
            Err(_) => {
                self.pending().take();
                return Err(if self.transport.is_connected().await {
                    warn!("{command:?}: no response within {:?}", self.timeout);
                    PmdError::Timeout {
                        command,
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    PmdError::Disconnected
                });
            }
        };

        if response.status != PmdStatus::Success {
            return Err(PmdError::Command {
                command,
                measurement: response.measurement_type,
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Feed one control-point notification into the pending exchange.
    pub fn handle_notification(&self, data: &[u8]) {
        let mut pending = self.pending();
        let Some(exchange) = pending.as_mut() else {
            debug!("control point: unsolicited packet {data:02x?}");
            return;
        };

        let assembled = match exchange.partial.take() {
            None => ControlPointResponse::parse(data).inspect(|r| {
                if ControlPointCommand::from_op_code(r.op_code) != Some(exchange.command) {
                    debug!(
                        "{:?}: response echoes op code 0x{:02x}",
                        exchange.command, r.op_code
                    );
                }
            }),
            Some(mut partial) => partial.append_continuation(data).map(|()| partial),
        };

        match assembled {
            Ok(response) if response.more => {
                debug!(
                    "{:?}: continuation expected ({} parameter bytes so far)",
                    exchange.command,
                    response.parameters.len()
                );
                exchange.partial = Some(response);
            }
            Ok(response) => {
                if let Some(exchange) = pending.take() {
                    let _ = exchange.reply.send(Ok(response));
                }
            }
            Err(e) => {
                warn!("control point: malformed response {data:02x?}: {e}");
                if let Some(exchange) = pending.take() {
                    let _ = exchange.reply.send(Err(e.into()));
                }
            }
        }
    }

    /// Fail the exchange in flight, if any.
    pub fn fail_pending(&self, error: PmdError) {
        if let Some(exchange) = self.pending().take() {
            debug!("{:?}: failing pending exchange: {error}", exchange.command);
            let _ = exchange.reply.send(Err(error));
        }
    }
}
