//! In-memory fakes shared by unit tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::client::GlspClient;
use crate::collab::{CollaborationProvider, CollaborationRole, GuestsChanged, RoleChange, SubclientInfo};
use crate::connector::{
    ClientRegistration, Connector, ConnectorOptions, Diagnostic, EditorHost, OpenerOptions,
    ProgressIndicator, WebviewEndpoint,
};
use crate::error::{BridgeError, Result};
use crate::events::{Emitter, Subscription};
use crate::models::{
    ActionMessage, DisposeClientSessionParameters, InitializeClientSessionParameters,
    InitializeParameters, InitializeResult, SubclientId,
};
use crate::utils::lock;

/// Let spawned tasks on the current-thread test runtime run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Backend client that records every call.
#[derive(Default)]
pub struct RecordingGlspClient {
    pub initialized: Mutex<Vec<InitializeClientSessionParameters>>,
    pub disposed: Mutex<Vec<DisposeClientSessionParameters>>,
    pub sent: Mutex<Vec<ActionMessage>>,
    /// `open <id>` and `close <id>` in call order.
    pub lifecycle: Mutex<Vec<String>>,
    /// Parks the next session initialize until the sender fires.
    pub hold_initialize: Mutex<Option<oneshot::Receiver<()>>>,
    pub fail_initialize: Mutex<bool>,
    messages: Emitter<ActionMessage>,
}

impl RecordingGlspClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate a message from the server.
    pub fn emit(&self, message: &ActionMessage) {
        self.messages.fire(message);
    }

    pub fn sent(&self) -> Vec<ActionMessage> {
        lock(&self.sent).clone()
    }

    pub fn initialized(&self) -> Vec<InitializeClientSessionParameters> {
        lock(&self.initialized).clone()
    }

    pub fn disposed(&self) -> Vec<DisposeClientSessionParameters> {
        lock(&self.disposed).clone()
    }

    pub fn lifecycle(&self) -> Vec<String> {
        lock(&self.lifecycle).clone()
    }
}

impl GlspClient for RecordingGlspClient {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn initialize_server(&self, params: InitializeParameters) -> Result<InitializeResult> {
        Ok(InitializeResult {
            protocol_version: params.protocol_version,
            server_actions: Default::default(),
        })
    }

    async fn initialize_client_session(&self, params: InitializeClientSessionParameters) -> Result<()> {
        let hold = lock(&self.hold_initialize).take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        if *lock(&self.fail_initialize) {
            return Err(BridgeError::Rpc {
                code: -32603,
                message: format!("cannot open {}", params.client_session_id),
            });
        }
        lock(&self.lifecycle).push(format!("open {}", params.client_session_id));
        lock(&self.initialized).push(params);
        Ok(())
    }

    async fn dispose_client_session(&self, params: DisposeClientSessionParameters) -> Result<()> {
        lock(&self.lifecycle).push(format!("close {}", params.client_session_id));
        lock(&self.disposed).push(params);
        Ok(())
    }

    fn send_action_message(&self, message: ActionMessage) -> Result<()> {
        lock(&self.sent).push(message);
        Ok(())
    }

    fn on_action_message(
        &self,
        listener: impl Fn(&ActionMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.messages.subscribe(listener)
    }

    fn shutdown_server(&self) {}

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Collaboration provider with a settable role that records every call.
pub struct RecordingProvider {
    role: Mutex<CollaborationRole>,
    subclient_id: Option<SubclientId>,
    pub host_messages: Mutex<Vec<ActionMessage>>,
    pub host_batches: Mutex<Vec<Vec<ActionMessage>>>,
    pub guest_initialized: Mutex<Vec<InitializeClientSessionParameters>>,
    pub guest_disposed: Mutex<Vec<DisposeClientSessionParameters>>,
    pub guest_sent: Mutex<Vec<ActionMessage>>,
    guests: Emitter<GuestsChanged>,
    roles: Emitter<RoleChange>,
}

impl RecordingProvider {
    pub fn new(role: CollaborationRole, subclient_id: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            role: Mutex::new(role),
            subclient_id: subclient_id.map(str::to_string),
            host_messages: Mutex::new(Vec::new()),
            host_batches: Mutex::new(Vec::new()),
            guest_initialized: Mutex::new(Vec::new()),
            guest_disposed: Mutex::new(Vec::new()),
            guest_sent: Mutex::new(Vec::new()),
            guests: Emitter::new(),
            roles: Emitter::new(),
        })
    }

    pub fn set_role(&self, to: CollaborationRole) {
        let from = std::mem::replace(&mut *lock(&self.role), to);
        self.roles.fire(&RoleChange { from, to });
    }

    pub fn announce_guests(&self, guests: &[&str]) {
        self.guests.fire(&GuestsChanged {
            guests: guests.iter().map(|g| g.to_string()).collect(),
        });
    }
}

impl CollaborationProvider for RecordingProvider {
    fn role(&self) -> CollaborationRole {
        *lock(&self.role)
    }

    fn subclient_id_from_session(&self) -> Option<SubclientId> {
        self.subclient_id.clone()
    }

    fn subclient_info_from_session(&self) -> Option<SubclientInfo> {
        self.subclient_id.clone().map(|subclient_id| SubclientInfo {
            subclient_id,
            name: None,
            color: None,
        })
    }

    fn handle_action_message_for_host(&self, message: ActionMessage) {
        lock(&self.host_messages).push(message);
    }

    fn handle_multiple_action_messages_for_host(&self, messages: Vec<ActionMessage>) {
        lock(&self.host_batches).push(messages);
    }

    fn on_guests_change_for_host(
        &self,
        listener: impl Fn(&GuestsChanged) + Send + Sync + 'static,
    ) -> Subscription {
        self.guests.subscribe(listener)
    }

    fn on_role_change(&self, listener: impl Fn(&RoleChange) + Send + Sync + 'static) -> Subscription {
        self.roles.subscribe(listener)
    }

    async fn initialize_client_session_for_guest(
        &self,
        params: InitializeClientSessionParameters,
    ) -> Result<()> {
        lock(&self.guest_initialized).push(params);
        Ok(())
    }

    async fn dispose_client_session_for_guest(&self, params: DisposeClientSessionParameters) -> Result<()> {
        lock(&self.guest_disposed).push(params);
        Ok(())
    }

    fn send_action_message_for_guest(&self, message: ActionMessage) {
        lock(&self.guest_sent).push(message);
    }
}

/// Webview endpoint that records what it is sent.
#[derive(Default)]
pub struct RecordingEndpoint {
    pub received: Mutex<Vec<ActionMessage>>,
}

impl RecordingEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<ActionMessage> {
        lock(&self.received).clone()
    }
}

impl WebviewEndpoint for RecordingEndpoint {
    fn send_message(&self, message: &ActionMessage) -> Result<()> {
        lock(&self.received).push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started(String),
    Reported {
        message: Option<String>,
        increment: Option<f64>,
    },
}

pub struct RecordingProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressIndicator for RecordingProgress {
    fn report(&self, message: Option<&str>, increment: Option<f64>) {
        lock(&self.events).push(ProgressEvent::Reported {
            message: message.map(str::to_string),
            increment,
        });
    }
}

/// Editor host that records side effects.
#[derive(Default)]
pub struct RecordingHost {
    pub opened: Mutex<Vec<(String, Option<OpenerOptions>)>>,
    pub published: Mutex<Vec<(String, Vec<Diagnostic>)>>,
    pub progress: Arc<Mutex<Vec<ProgressEvent>>>,
    pub completions: Mutex<Vec<oneshot::Receiver<()>>>,
    pub export_path: Mutex<Option<PathBuf>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress_events(&self) -> Vec<ProgressEvent> {
        lock(&self.progress).clone()
    }
}

impl EditorHost for RecordingHost {
    fn open_external(&self, uri: &str, options: Option<&OpenerOptions>) -> Result<()> {
        lock(&self.opened).push((uri.to_string(), options.cloned()));
        Ok(())
    }

    async fn choose_export_path(&self, _document: &str) -> Option<PathBuf> {
        lock(&self.export_path).clone()
    }

    fn create_progress(&self, title: &str, completion: oneshot::Receiver<()>) -> Box<dyn ProgressIndicator> {
        lock(&self.progress).push(ProgressEvent::Started(title.to_string()));
        lock(&self.completions).push(completion);
        Box::new(RecordingProgress {
            events: self.progress.clone(),
        })
    }

    fn diagnostics_changed(&self, document: &str, diagnostics: &[Diagnostic]) {
        lock(&self.published).push((document.to_string(), diagnostics.to_vec()));
    }
}

/// A connector over recording fakes with `panel-1` registered for `a.wf`.
pub async fn connected() -> (
    Arc<RecordingGlspClient>,
    Arc<RecordingHost>,
    Arc<RecordingEndpoint>,
    Arc<Connector<RecordingGlspClient, RecordingHost>>,
) {
    let backend = RecordingGlspClient::new();
    let host = RecordingHost::new();
    let endpoint = RecordingEndpoint::new();
    let connector = Connector::new(backend.clone(), host.clone(), ConnectorOptions::default());
    connector
        .register_client(ClientRegistration {
            client_id: "panel-1".into(),
            document: "a.wf".into(),
            diagram_type: "workflow".into(),
            endpoint: endpoint.clone(),
        })
        .await
        .unwrap();
    (backend, host, endpoint, connector)
}
