use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{read_message, write_message};
use super::GlspClient;
use crate::error::{BridgeError, Result};
use crate::events::{Emitter, Subscription};
use crate::models::{
    ActionMessage, DisposeClientSessionParameters, InitializeClientSessionParameters,
    InitializeParameters, InitializeResult,
};
use crate::utils::lock;

const METHOD_INITIALIZE: &str = "initialize";
const METHOD_INITIALIZE_CLIENT_SESSION: &str = "initializeClientSession";
const METHOD_DISPOSE_CLIENT_SESSION: &str = "disposeClientSession";
const METHOD_PROCESS: &str = "process";
const METHOD_SHUTDOWN: &str = "shutdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Starting,
    Running,
    Failed(String),
    Stopped,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct RpcNotification<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcIncoming {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// JSON-RPC client for a GLSP server reachable over TCP.
///
/// Everything sent before the connection is up is queued and flushed once it
/// is. If the connection never comes up the queue stays pending; callers that
/// need a bound should time out on [`GlspClient::ready`].
pub struct SocketGlspClient {
    address: String,
    outbound_tx: mpsc::UnboundedSender<Value>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    pending: PendingRequests,
    next_id: AtomicU64,
    state: Arc<watch::Sender<ConnectionState>>,
    action_messages: Emitter<ActionMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketGlspClient {
    pub fn new(address: impl Into<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Starting);
        Self {
            address: address.into(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            state: Arc::new(state),
            action_messages: Emitter::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Run the protocol over an already established stream.
    pub fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut outbound_rx = lock(&self.outbound_rx).take().ok_or_else(|| {
            BridgeError::NotReady("a connection is already attached".to_string())
        })?;
        let (read_half, mut write_half) = tokio::io::split(stream);

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = write_message(&mut write_half, &message).await {
                    error!("Failed to write to GLSP server: {}", e);
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let action_messages = self.action_messages.clone();
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_message(&mut reader).await {
                    Ok(Some(value)) => dispatch_incoming(value, &pending, &action_messages),
                    Ok(None) => {
                        info!("GLSP server closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from GLSP server: {}", e);
                        break;
                    }
                }
            }
            fail_pending(&pending);
            state.send_if_modified(|current| {
                if *current == ConnectionState::Stopped {
                    return false;
                }
                *current = ConnectionState::Failed("connection closed".to_string());
                true
            });
        });

        lock(&self.tasks).extend([writer, reader]);
        self.state.send_replace(ConnectionState::Running);
        Ok(())
    }

    async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_value(RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        if self.outbound_tx.send(payload).is_err() {
            lock(&self.pending).remove(&id);
            return Err(BridgeError::ConnectionClosed);
        }

        debug!("Sent '{}' request #{}", method, id);
        let value = rx.await.map_err(|_| BridgeError::ConnectionClosed)??;
        Ok(serde_json::from_value(value)?)
    }

    fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<()> {
        let payload = serde_json::to_value(RpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        })?;
        self.outbound_tx
            .send(payload)
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

fn dispatch_incoming(value: Value, pending: &PendingRequests, action_messages: &Emitter<ActionMessage>) {
    let incoming: RpcIncoming = match serde_json::from_value(value) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!("Ignoring malformed JSON-RPC message: {}", e);
            return;
        }
    };

    match (incoming.method.as_deref(), incoming.id) {
        (Some(METHOD_PROCESS), _) => {
            let params = incoming.params.unwrap_or(Value::Null);
            match serde_json::from_value::<ActionMessage>(params) {
                Ok(message) => action_messages.fire(&message),
                Err(e) => warn!("Ignoring malformed action message: {}", e),
            }
        }
        (Some(method), _) => debug!("Ignoring server-initiated '{}'", method),
        (None, Some(id)) => {
            let Some(id) = id.as_u64() else {
                warn!("Ignoring response with non-numeric id {}", id);
                return;
            };
            let Some(tx) = lock(pending).remove(&id) else {
                warn!("Ignoring response to unknown request #{}", id);
                return;
            };
            let outcome = match incoming.error {
                Some(error) => Err(BridgeError::Rpc {
                    code: error.code,
                    message: error.message,
                }),
                None => Ok(incoming.result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        }
        (None, None) => warn!("Ignoring JSON-RPC message without method or id"),
    }
}

fn fail_pending(pending: &PendingRequests) {
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(BridgeError::ConnectionClosed));
    }
}

impl GlspClient for SocketGlspClient {
    async fn start(&self) -> Result<()> {
        info!("Connecting to GLSP server at {}", self.address);
        match TcpStream::connect(&self.address).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                self.attach(stream)?;
                info!("Connected to GLSP server at {}", self.address);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to GLSP server at {}: {}", self.address, e);
                self.state.send_replace(ConnectionState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn ready(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        loop {
            let outcome = match &*state.borrow_and_update() {
                ConnectionState::Running => Some(Ok(())),
                ConnectionState::Failed(reason) => Some(Err(BridgeError::NotReady(reason.clone()))),
                ConnectionState::Stopped => Some(Err(BridgeError::ConnectionClosed)),
                ConnectionState::Starting => None,
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            state
                .changed()
                .await
                .map_err(|_| BridgeError::ConnectionClosed)?;
        }
    }

    async fn initialize_server(&self, params: InitializeParameters) -> Result<InitializeResult> {
        self.request(METHOD_INITIALIZE, params).await
    }

    async fn initialize_client_session(&self, params: InitializeClientSessionParameters) -> Result<()> {
        let _: Value = self.request(METHOD_INITIALIZE_CLIENT_SESSION, params).await?;
        Ok(())
    }

    async fn dispose_client_session(&self, params: DisposeClientSessionParameters) -> Result<()> {
        let _: Value = self.request(METHOD_DISPOSE_CLIENT_SESSION, params).await?;
        Ok(())
    }

    fn send_action_message(&self, message: ActionMessage) -> Result<()> {
        self.notify(METHOD_PROCESS, Some(message))
    }

    fn on_action_message(
        &self,
        listener: impl Fn(&ActionMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.action_messages.subscribe(listener)
    }

    fn shutdown_server(&self) {
        if let Err(e) = self.notify::<Value>(METHOD_SHUTDOWN, None) {
            warn!("Failed to send shutdown to GLSP server: {}", e);
        }
    }

    async fn stop(&self) -> Result<()> {
        self.state.send_replace(ConnectionState::Stopped);
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        fail_pending(&self.pending);
        self.action_messages.clear();
        info!("Stopped GLSP client for {}", self.address);
        Ok(())
    }
}
