use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// One request/reply exchange with the OCR worker.
#[async_trait]
pub trait WorkerTransport: Send {
    async fn round_trip(&mut self, payload: String) -> Result<String>;
}

/// REQ socket connected to the worker's REP socket.
pub struct ZmqTransport {
    address: String,
    socket: Option<ReqSocket>,
    retry_interval: Duration,
}

impl ZmqTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            socket: None,
            retry_interval: Duration::from_secs(1),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits until the worker accepts the connection.
    async fn connected(&mut self) -> &mut ReqSocket {
        if self.socket.is_none() {
            let mut attempts = 0u32;
            loop {
                let mut socket = ReqSocket::new();
                match socket.connect(&self.address).await {
                    Ok(()) => {
                        info!("🔌 Connected to {}", self.address);
                        self.socket = Some(socket);
                        break;
                    }
                    Err(e) => {
                        if attempts == 0 {
                            warn!("Worker at {} not reachable yet: {}", self.address, e);
                        }
                        attempts += 1;
                        sleep(self.retry_interval).await;
                    }
                }
            }
        }

        self.socket.get_or_insert_with(ReqSocket::new)
    }
}

#[async_trait]
impl WorkerTransport for ZmqTransport {
    async fn round_trip(&mut self, payload: String) -> Result<String> {
        let socket = self.connected().await;

        let exchange = async {
            socket.send(ZmqMessage::from(payload)).await?;
            let reply = socket.recv().await?;
            String::try_from(reply).map_err(|e| anyhow!("Reply is not UTF-8 text: {}", e))
        };

        match exchange.await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // REQ sockets cannot recover from a broken exchange
                self.socket = None;
                Err(e)
            }
        }
    }
}

/// What the channel task reports for each payload it took off the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Raw reply text from the worker
    Reply(String),
    /// The exchange failed and the request was dropped
    Dropped(String),
}

/// Handle to the channel task: payloads go out on `outbound`, and exactly one
/// `WorkerEvent` per payload comes back on `replies` in the order they complete.
pub struct RequestChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub replies: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Spawns the task that owns `transport`. Requests are sent strictly one at a
/// time; later payloads wait in the inbox until the previous reply is in.
pub fn spawn_request_channel<T>(mut transport: T) -> RequestChannel
where
    T: WorkerTransport + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<WorkerEvent>();

    tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            let event = match transport.round_trip(payload).await {
                Ok(reply) => WorkerEvent::Reply(reply),
                Err(e) => {
                    error!("❌ Worker request failed: {:#}", e);
                    WorkerEvent::Dropped(format!("{:#}", e))
                }
            };
            if reply_tx.send(event).is_err() {
                break;
            }
        }
        info!("Request channel closed");
    });

    RequestChannel {
        outbound: outbound_tx,
        replies: reply_rx,
    }
}
