//! The connector pipeline between editor panels and the GLSP client.
//!
//! Every message runs through the same stages in both directions:
//! logging, the user `before_receive_*` hook, the built-in handler for its
//! kind, the user `before_propagate_*` hook, then delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::host::{Diagnostic, EditorHost, WebviewEndpoint};
use super::interceptor::{Interception, MessageInterceptor, PassThrough, ProcessingResult};
use super::progress::ProgressReporters;
use crate::client::GlspClient;
use crate::error::{BridgeError, Result};
use crate::events::{Emitter, Subscription};
use crate::models::{
    Action, ActionKind, ActionMessage, DisposeClientSessionParameters,
    InitializeClientSessionParameters,
};
use crate::utils::lock;

/// Which side a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Server,
}

/// One open editor panel.
#[derive(Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub document: String,
    pub diagram_type: String,
    pub endpoint: Arc<dyn WebviewEndpoint>,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("document", &self.document)
            .field("diagram_type", &self.diagram_type)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionUpdate {
    pub client_id: String,
    pub document: String,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSaved {
    pub client_id: String,
    pub document: String,
}

/// An undoable edit reported by the server.
#[derive(Clone)]
pub struct DocumentChange {
    pub client_id: String,
    pub document: String,
    undo: Arc<dyn Fn() + Send + Sync>,
    redo: Arc<dyn Fn() + Send + Sync>,
}

impl DocumentChange {
    pub fn undo(&self) {
        (self.undo)();
    }

    pub fn redo(&self) {
        (self.redo)();
    }
}

impl fmt::Debug for DocumentChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentChange")
            .field("client_id", &self.client_id)
            .field("document", &self.document)
            .finish()
    }
}

pub struct ConnectorOptions {
    /// Log every message entering the pipeline.
    pub message_logging: bool,
    pub interceptor: Option<Box<dyn MessageInterceptor>>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            message_logging: true,
            interceptor: None,
        }
    }
}

pub(super) struct ClientEntry {
    pub registration: ClientRegistration,
    pub dirty: bool,
}

#[derive(Default)]
pub(super) struct ConnectorState {
    pub clients: HashMap<String, ClientEntry>,
    /// document -> client id
    pub documents: HashMap<String, String>,
    pub selections: HashMap<String, Vec<String>>,
    pub diagnostics: HashMap<String, Vec<Diagnostic>>,
    pub active_client: Option<String>,
}

pub struct Connector<C: GlspClient, H: EditorHost> {
    pub(super) this: Weak<Self>,
    pub(super) client: Arc<C>,
    pub(super) host: Arc<H>,
    interceptor: Box<dyn MessageInterceptor>,
    message_logging: bool,
    pub(super) state: Mutex<ConnectorState>,
    pub(super) progress: Mutex<ProgressReporters>,
    pub(super) selection_updates: Emitter<SelectionUpdate>,
    pub(super) documents_saved: Emitter<DocumentSaved>,
    pub(super) documents_changed: Emitter<DocumentChange>,
    server_subscription: Mutex<Option<Subscription>>,
}

impl<C: GlspClient, H: EditorHost> Connector<C, H> {
    pub fn new(client: Arc<C>, host: Arc<H>, options: ConnectorOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_server = weak.clone();
            let subscription = client.on_action_message(move |message| {
                if let Some(this) = on_server.upgrade() {
                    this.receive_from_server(message.clone());
                }
            });
            Self {
                this: weak.clone(),
                client,
                host,
                interceptor: options
                    .interceptor
                    .unwrap_or_else(|| Box::new(PassThrough)),
                message_logging: options.message_logging,
                state: Mutex::new(ConnectorState::default()),
                progress: Mutex::new(ProgressReporters::default()),
                selection_updates: Emitter::new(),
                documents_saved: Emitter::new(),
                documents_changed: Emitter::new(),
                server_subscription: Mutex::new(Some(subscription)),
            }
        })
    }

    /// Register an editor panel and open its session on the server.
    pub async fn register_client(&self, registration: ClientRegistration) -> Result<()> {
        self.client.ready().await?;

        let client_id = registration.client_id.clone();
        let params = InitializeClientSessionParameters::new(&client_id, &registration.diagram_type)
            .with_document(&registration.document);
        {
            let mut state = lock(&self.state);
            if let Some(open_in) = state.documents.get(&registration.document) {
                if state.clients.contains_key(open_in) {
                    warn!(
                        "Rejecting client {}: {} is already open in {}",
                        client_id, registration.document, open_in
                    );
                    return Err(BridgeError::DocumentAlreadyOpen {
                        document: registration.document.clone(),
                        client_id: open_in.clone(),
                    });
                }
            }
            state
                .documents
                .insert(registration.document.clone(), client_id.clone());
            state.active_client.get_or_insert_with(|| client_id.clone());
            state.clients.insert(
                client_id.clone(),
                ClientEntry {
                    registration,
                    dirty: false,
                },
            );
        }

        if let Err(e) = self.client.initialize_client_session(params).await {
            error!("Failed to open session for client {}: {}", client_id, e);
            self.forget_client(&client_id);
            return Err(e);
        }
        info!("Registered client {}", client_id);
        Ok(())
    }

    /// Tear down everything owned by an editor panel and close its session.
    pub async fn dispose_client(&self, client_id: &str) -> Result<()> {
        let registration = self
            .forget_client(client_id)
            .ok_or_else(|| BridgeError::ClientNotRegistered(client_id.to_string()))?;

        let ended = lock(&self.progress).end_client(client_id);
        if ended > 0 {
            debug!("Ended {} open progress reporters of {}", ended, client_id);
        }
        let had_diagnostics = lock(&self.state)
            .diagnostics
            .remove(&registration.document)
            .is_some();
        if had_diagnostics {
            self.host.diagnostics_changed(&registration.document, &[]);
        }

        let params = DisposeClientSessionParameters::new(client_id)
            .with_document(&registration.document);
        self.client.dispose_client_session(params).await?;
        info!("Disposed client {}", client_id);
        Ok(())
    }

    fn forget_client(&self, client_id: &str) -> Option<ClientRegistration> {
        let mut state = lock(&self.state);
        let entry = state.clients.remove(client_id)?;
        let document = &entry.registration.document;
        if state.documents.get(document).map(String::as_str) == Some(client_id) {
            state.documents.remove(document);
        }
        state.selections.remove(client_id);
        if state.active_client.as_deref() == Some(client_id) {
            state.active_client = state.clients.keys().next().cloned();
        }
        Some(entry.registration)
    }

    pub(super) fn registration(&self, client_id: &str) -> Option<ClientRegistration> {
        lock(&self.state)
            .clients
            .get(client_id)
            .map(|entry| entry.registration.clone())
    }

    fn client_for_document(&self, document: &str) -> Result<ClientRegistration> {
        let state = lock(&self.state);
        state
            .documents
            .get(document)
            .and_then(|client_id| state.clients.get(client_id))
            .map(|entry| entry.registration.clone())
            .ok_or_else(|| BridgeError::DocumentNotRegistered(document.to_string()))
    }

    /// Entry point for messages from an editor panel.
    pub fn receive_from_client(&self, message: ActionMessage) -> Result<()> {
        if self.message_logging {
            debug!("Client -> server: {} ({})", message.action.kind, message.client_id);
        }
        let registration = self
            .registration(&message.client_id)
            .ok_or_else(|| BridgeError::ClientNotRegistered(message.client_id.clone()))?;

        let result = match self.interceptor.before_receive_from_client(message) {
            Interception::Process(message) => {
                self.process_message(message, Origin::Client, &registration)?
            }
            Interception::Forward(message) => ProcessingResult::unchanged(message),
            Interception::Drop => return Ok(()),
        };

        let Some(mut message) = self
            .interceptor
            .before_propagate_to_server(result.message, result.changed)
        else {
            return Ok(());
        };
        if message.relative_document_uri().is_none() {
            message.set_relative_document_uri(&registration.document);
        }
        self.client.send_action_message(message)
    }

    /// Entry point for messages from the server, already mapped to a local
    /// client id.
    pub fn receive_from_server(&self, message: ActionMessage) {
        if self.message_logging {
            debug!("Server -> client: {} ({})", message.action.kind, message.client_id);
        }
        let Some(registration) = self.registration(&message.client_id) else {
            warn!(
                "Dropping '{}' for unregistered client {}",
                message.action.kind, message.client_id
            );
            return;
        };

        let result = match self.interceptor.before_receive_from_server(message) {
            Interception::Process(message) => {
                match self.process_message(message, Origin::Server, &registration) {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Failed to process server message: {}", e);
                        return;
                    }
                }
            }
            Interception::Forward(message) => ProcessingResult::unchanged(message),
            Interception::Drop => return,
        };

        if let Some(message) = self
            .interceptor
            .before_propagate_to_client(result.message, result.changed)
        {
            if let Err(e) = registration.endpoint.send_message(&message) {
                warn!("Failed to deliver to client {}: {}", registration.client_id, e);
            }
        }
    }

    /// Built-in handling by action kind.
    fn process_message(
        &self,
        message: ActionMessage,
        origin: Origin,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        match message.action.action_kind() {
            ActionKind::SetDirtyState => self.handle_dirty_state(message, registration),
            ActionKind::StartProgress => self.handle_start_progress(message, registration),
            ActionKind::UpdateProgress => self.handle_update_progress(message, registration),
            ActionKind::EndProgress => self.handle_end_progress(message, registration),
            ActionKind::SetMarkers => self.handle_markers(message, registration),
            ActionKind::NavigateToExternalTarget => self.handle_navigate(message),
            ActionKind::Select => self.handle_select(message, origin, registration),
            ActionKind::ExportSvg => self.handle_export(message, registration),
            _ => Ok(ProcessingResult::unchanged(message)),
        }
    }

    /// Send an action straight to a panel, bypassing the pipeline.
    pub fn send_action_to_client(&self, client_id: &str, action: Action) -> Result<()> {
        let registration = self
            .registration(client_id)
            .ok_or_else(|| BridgeError::ClientNotRegistered(client_id.to_string()))?;
        registration
            .endpoint
            .send_message(&ActionMessage::new(client_id, action))
    }

    pub fn send_action_to_active_client(&self, action: Action) -> Result<()> {
        let active = lock(&self.state)
            .active_client
            .clone()
            .ok_or_else(|| BridgeError::ClientNotRegistered("no active client".to_string()))?;
        self.send_action_to_client(&active, action)
    }

    pub fn set_active_client(&self, client_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.clients.contains_key(client_id) {
            return Err(BridgeError::ClientNotRegistered(client_id.to_string()));
        }
        state.active_client = Some(client_id.to_string());
        Ok(())
    }

    pub fn active_client(&self) -> Option<String> {
        lock(&self.state).active_client.clone()
    }

    /// Save a document and wait until the server reports it saved.
    pub async fn save_document(&self, document: &str, destination: Option<String>) -> Result<()> {
        let registration = self.client_for_document(document)?;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let target = document.to_string();
        let subscription = self.documents_saved.subscribe(move |saved| {
            if saved.document == target {
                if let Some(tx) = lock(&tx).take() {
                    let _ = tx.send(());
                }
            }
        });

        let mut message = ActionMessage::new(&registration.client_id, Action::save_model(destination));
        message.set_relative_document_uri(document);
        self.client.send_action_message(message)?;

        let saved = rx.await;
        subscription.dispose();
        saved.map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Ask the panel of a document to reload the model from the server.
    pub fn revert_document(&self, document: &str) -> Result<()> {
        let registration = self.client_for_document(document)?;
        let action = Action::request_model(document, &registration.diagram_type);
        self.send_action_to_client(&registration.client_id, action)
    }

    pub fn selection(&self, client_id: &str) -> Vec<String> {
        lock(&self.state)
            .selections
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn diagnostics(&self, document: &str) -> Vec<Diagnostic> {
        lock(&self.state)
            .diagnostics
            .get(document)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_dirty(&self, document: &str) -> bool {
        let state = lock(&self.state);
        state
            .documents
            .get(document)
            .and_then(|client_id| state.clients.get(client_id))
            .is_some_and(|entry| entry.dirty)
    }

    pub fn on_selection_update(
        &self,
        listener: impl Fn(&SelectionUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.selection_updates.subscribe(listener)
    }

    pub fn on_document_saved(
        &self,
        listener: impl Fn(&DocumentSaved) + Send + Sync + 'static,
    ) -> Subscription {
        self.documents_saved.subscribe(listener)
    }

    pub fn on_document_changed(
        &self,
        listener: impl Fn(&DocumentChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.documents_changed.subscribe(listener)
    }

    pub(super) fn document_change(&self, registration: &ClientRegistration) -> DocumentChange {
        let undo_target = (self.this.clone(), registration.client_id.clone());
        let redo_target = undo_target.clone();
        DocumentChange {
            client_id: registration.client_id.clone(),
            document: registration.document.clone(),
            undo: Arc::new(move || {
                if let Some(this) = undo_target.0.upgrade() {
                    if let Err(e) = this.send_action_to_client(&undo_target.1, Action::undo()) {
                        warn!("Undo failed: {}", e);
                    }
                }
            }),
            redo: Arc::new(move || {
                if let Some(this) = redo_target.0.upgrade() {
                    if let Err(e) = this.send_action_to_client(&redo_target.1, Action::redo()) {
                        warn!("Redo failed: {}", e);
                    }
                }
            }),
        }
    }

    /// Stop listening to the server and release all listeners.
    pub fn dispose(&self) {
        lock(&self.server_subscription).take();
        let mut progress = lock(&self.progress);
        if progress.len() > 0 {
            debug!("Ending {} open progress reporters", progress.len());
        }
        progress.end_all();
        drop(progress);
        self.selection_updates.clear();
        self.documents_saved.clear();
        self.documents_changed.clear();
        info!("Connector disposed");
    }
}
