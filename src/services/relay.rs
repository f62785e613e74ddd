//! The relay loop: upload events in, worker requests out, worker replies back
//! to every connected client.
//!
//! Replies carry nothing that ties them to a request, so they are attributed
//! purely by arrival order on the request channel. With several uploads in
//! flight a result may reach the browser that did not upload the file.

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::models::{ClientResult, OCR_DONE_EVENT, ServerEvent, UploadEvent, UploadOutcome};
use crate::services::broadcast::SessionRegistry;
use crate::services::correlator::RequestCorrelator;
use crate::services::error::RelayError;
use crate::services::result_relay;
use crate::services::worker_channel::{WorkerEvent, WorkerTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    AwaitingReply,
}

/// Shared relay context, built once at startup.
pub struct Relay {
    correlator: RequestCorrelator,
    outbound: mpsc::UnboundedSender<String>,
    sessions: SessionRegistry,
    in_flight: usize,
}

impl Relay {
    pub fn new(
        correlator: RequestCorrelator,
        outbound: mpsc::UnboundedSender<String>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            correlator,
            outbound,
            sessions,
            in_flight: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        if self.in_flight == 0 {
            RelayState::Idle
        } else {
            RelayState::AwaitingReply
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Runs until shutdown or until both inbound channels close. A malformed
    /// reply or a dead request channel ends the loop with an error.
    pub async fn run(
        mut self,
        mut uploads: mpsc::UnboundedReceiver<UploadOutcome>,
        mut replies: mpsc::UnboundedReceiver<WorkerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        info!(pid = self.correlator.process_id(), "🚀 Relay started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("🛑 Relay shutting down");
                    break;
                }
                Some(outcome) = uploads.recv() => {
                    self.on_upload(outcome)?;
                }
                Some(event) = replies.recv() => {
                    self.on_worker_event(event).await?;
                }
                else => break,
            }
        }

        Ok(())
    }

    pub fn on_upload(&mut self, outcome: UploadOutcome) -> Result<(), RelayError> {
        let Some(request) = self.correlator.on_upload(&outcome) else {
            return Ok(());
        };

        info!(
            pid = request.process_id,
            file = %request.file_name,
            "📤 Sending request to worker"
        );

        let payload =
            serde_json::to_string(&request).map_err(|e| RelayError::Encode(e.to_string()))?;
        self.outbound
            .send(payload)
            .map_err(|_| RelayError::ChannelClosed)?;
        self.in_flight += 1;
        Ok(())
    }

    pub async fn on_worker_event(&mut self, event: WorkerEvent) -> Result<(), RelayError> {
        match event {
            WorkerEvent::Reply(raw) => {
                self.on_reply(&raw).await?;
            }
            WorkerEvent::Dropped(reason) => self.on_dropped(&reason),
        }
        Ok(())
    }

    /// A failed exchange never produces a reply; nothing is sent to clients.
    pub fn on_dropped(&mut self, reason: &str) {
        self.in_flight = self.in_flight.saturating_sub(1);
        warn!(in_flight = self.in_flight, "Request dropped: {}", reason);
    }

    /// Returns the number of sessions the result was delivered to.
    pub async fn on_reply(&mut self, raw: &str) -> Result<usize, RelayError> {
        let reply = result_relay::parse_reply(raw)?;
        info!(pid = reply.process_id, "Received response from {}", reply.process_id);

        if self.in_flight == 0 {
            warn!(pid = reply.process_id, "Reply arrived with no request in flight");
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let result = result_relay::to_client_result(&reply);
        let data = result_relay::encode(&result)?;
        let delivered = self
            .sessions
            .broadcast(ServerEvent::new(OCR_DONE_EVENT, data))
            .await;

        info!(sessions = delivered, "✅ {}", result.message);
        Ok(delivered)
    }
}

/// Standalone mode: one request, one reply, no sessions involved.
pub async fn run_once<T: WorkerTransport>(
    transport: &mut T,
    correlator: RequestCorrelator,
    event: UploadEvent,
) -> anyhow::Result<ClientResult> {
    let request = correlator.correlate(&event);
    info!(
        pid = request.process_id,
        file = %request.file_name,
        "📤 Sending single request to worker"
    );

    let raw = transport.round_trip(serde_json::to_string(&request)?).await?;
    let reply = result_relay::parse_reply(&raw)?;
    Ok(result_relay::to_client_result(&reply))
}
