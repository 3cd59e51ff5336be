//! Session multiplexing client.
//!
//! Decorates a [`GlspClient`] so that every subclient attached to a document
//! (the local `HOST` plus any collaboration guests) shares one backend
//! session. Outbound messages get their client id rewritten to the server
//! session id; inbound messages are mapped back to local session ids and fanned
//! out to the local listeners or, for guests, to the collaboration provider.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::client::GlspClient;
use crate::collab::{CollaborationProvider, CollaborationRole, GuestsChanged, RoleChange};
use crate::error::{BridgeError, Result};
use crate::events::{Emitter, Subscription};
use crate::models::{
    Action, ActionKind, ActionMessage, DisposeClientSessionParameters,
    InitializeClientSessionParameters, InitializeParameters, InitializeResult, SubclientId,
    HOST_SUBCLIENT_ID,
};
use crate::session::SubclientRegistry;
use crate::utils::lock;

pub struct MultiplexClient<C: GlspClient, P: CollaborationProvider> {
    this: Weak<Self>,
    inner: Arc<C>,
    provider: Arc<P>,
    registry: Mutex<SubclientRegistry>,
    role: Mutex<CollaborationRole>,
    local_messages: Emitter<ActionMessage>,
    workspace_root: PathBuf,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Backend disposals not yet sent, oldest first.
    pending_disposals: Mutex<Vec<DisposeClientSessionParameters>>,
    /// Held while backend sessions are opened or closed.
    lifecycle: AsyncMutex<()>,
}

impl<C: GlspClient, P: CollaborationProvider> MultiplexClient<C, P> {
    pub fn new(inner: Arc<C>, provider: Arc<P>, workspace_root: impl Into<PathBuf>) -> Arc<Self> {
        let workspace_root = workspace_root.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_server = weak.clone();
            let on_guests = weak.clone();
            let on_role = weak.clone();
            let subscriptions = vec![
                inner.on_action_message(move |message| {
                    if let Some(this) = on_server.upgrade() {
                        this.route_server_message(message);
                    }
                }),
                provider.on_guests_change_for_host(move |change| {
                    if let Some(this) = on_guests.upgrade() {
                        this.handle_guests_changed(change);
                    }
                }),
                provider.on_role_change(move |change| {
                    if let Some(this) = on_role.upgrade() {
                        this.handle_role_change(change);
                    }
                }),
            ];

            Self {
                this: weak.clone(),
                role: Mutex::new(provider.role()),
                inner,
                provider,
                registry: Mutex::new(SubclientRegistry::new()),
                local_messages: Emitter::new(),
                workspace_root,
                subscriptions: Mutex::new(subscriptions),
                pending_disposals: Mutex::new(Vec::new()),
                lifecycle: AsyncMutex::new(()),
            }
        })
    }

    pub fn role(&self) -> CollaborationRole {
        *lock(&self.role)
    }

    pub fn server_session_id(&self, document: &str) -> Option<String> {
        lock(&self.registry)
            .server_session_id(document)
            .map(str::to_string)
    }

    pub fn subclients(&self, document: &str) -> Vec<(SubclientId, String)> {
        lock(&self.registry).subclients(document)
    }

    /// Deliver a message the host relayed to this guest.
    pub fn dispatch_from_host(&self, message: ActionMessage) {
        debug!(
            "Received '{}' from collaboration host for {}",
            message.action.kind, message.client_id
        );
        self.local_messages.fire(&message);
    }

    /// Drop all listeners and provider subscriptions.
    pub fn dispose(&self) {
        lock(&self.subscriptions).clear();
        self.local_messages.clear();
    }

    fn is_guest(&self) -> bool {
        self.role() == CollaborationRole::Guest
    }

    fn guest_subclient_id(&self) -> Option<SubclientId> {
        self.provider.subclient_id_from_session()
    }

    /// Remove a subclient and return the backend dispose call to make when it
    /// was the last one on its document.
    fn detach(&self, document: &str, subclient_id: &str) -> Option<DisposeClientSessionParameters> {
        let Some(detached) = lock(&self.registry).detach(document, subclient_id) else {
            debug!("Subclient {} of {} already detached", subclient_id, document);
            return None;
        };
        if !detached.is_last {
            debug!(
                "Subclient {} left {}; backend session {} stays open",
                subclient_id, document, detached.server_session_id
            );
            return None;
        }
        Some(DisposeClientSessionParameters::new(detached.server_session_id).with_document(document))
    }

    /// Send queued backend disposals. The caller holds `lifecycle`.
    async fn flush_disposals(&self) {
        let pending = std::mem::take(&mut *lock(&self.pending_disposals));
        for params in pending {
            let server_session_id = params.client_session_id.clone();
            if let Err(e) = self.inner.dispose_client_session(params).await {
                warn!("Failed to dispose backend session {}: {}", server_session_id, e);
            }
        }
    }

    fn inject_source_uri(&self, action: &mut Action, document: &str) {
        let source_uri = qualified_uri(&self.workspace_root, document);
        let options = action
            .fields
            .entry("options")
            .or_insert_with(|| Value::Object(Map::new()));
        if !options.is_object() {
            *options = Value::Object(Map::new());
        }
        if let Some(options) = options.as_object_mut() {
            options.insert("sourceUri".to_string(), Value::String(source_uri));
            options.insert("disableReload".to_string(), Value::Bool(true));
        }
    }

    fn route_server_message(&self, message: &ActionMessage) {
        let recipients = {
            let registry = lock(&self.registry);
            let Some(document) = registry.document_by_server_session_id(&message.client_id) else {
                warn!(
                    "Dropping '{}' for unknown server session {}",
                    message.action.kind, message.client_id
                );
                return;
            };
            let subclients = registry.subclients(document);
            match message.subclient_id() {
                Some(target) if !message.action.action_kind().is_broadcast() => subclients
                    .into_iter()
                    .filter(|(subclient, _)| subclient == target)
                    .collect(),
                _ => subclients,
            }
        };

        if recipients.is_empty() {
            warn!(
                "Dropping '{}' for detached subclient {:?} of session {}",
                message.action.kind,
                message.subclient_id(),
                message.client_id
            );
            return;
        }

        let mut for_guests = Vec::new();
        for (subclient, local_session_id) in recipients {
            let mut copy = message.clone();
            copy.client_id = local_session_id;
            copy.action.subclient_id = Some(subclient);
            if copy.subclient_id() == Some(HOST_SUBCLIENT_ID) {
                self.local_messages.fire(&copy);
            } else {
                for_guests.push(copy);
            }
        }

        match for_guests.len() {
            0 => {}
            1 => {
                if let Some(copy) = for_guests.pop() {
                    self.provider.handle_action_message_for_host(copy);
                }
            }
            _ => self.provider.handle_multiple_action_messages_for_host(for_guests),
        }
    }

    fn handle_guests_changed(&self, change: &GuestsChanged) {
        let stale = lock(&self.registry).stale_guests(&change.guests);
        for guest in stale {
            info!(
                "Guest {} left the session; disposing its session on {}",
                guest.subclient_id, guest.document
            );
            if let Some(params) = self.detach(&guest.document, &guest.subclient_id) {
                lock(&self.pending_disposals).push(params);
            }
        }
        if lock(&self.pending_disposals).is_empty() {
            return;
        }
        // Session opens flush this queue first.
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let _lifecycle = this.lifecycle.lock().await;
            this.flush_disposals().await;
        });
    }

    fn handle_role_change(&self, change: &RoleChange) {
        *lock(&self.role) = change.to;
        let open_documents = lock(&self.registry).document_count();
        match (change.from, change.to) {
            (from, to) if from == to => {}
            (CollaborationRole::Host, CollaborationRole::Guest) if open_documents > 0 => {
                warn!(
                    "Demoted from host to guest with {} open backend sessions; they stay registered",
                    open_documents
                );
            }
            (_, CollaborationRole::Host) => {
                info!(
                    "Hosting collaboration session with {} open documents",
                    open_documents
                );
            }
            (_, CollaborationRole::Guest) => {
                info!("Joined collaboration session as guest");
            }
            (_, CollaborationRole::Solo) => {
                info!("Left collaboration session");
            }
        }
    }
}

fn qualified_uri(workspace_root: &Path, document: &str) -> String {
    workspace_root.join(document).to_string_lossy().into_owned()
}

impl<C: GlspClient, P: CollaborationProvider> GlspClient for MultiplexClient<C, P> {
    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    async fn ready(&self) -> Result<()> {
        self.inner.ready().await
    }

    async fn initialize_server(&self, params: InitializeParameters) -> Result<InitializeResult> {
        self.inner.initialize_server(params).await
    }

    async fn initialize_client_session(
        &self,
        mut params: InitializeClientSessionParameters,
    ) -> Result<()> {
        if self.is_guest() {
            if params.subclient_id().is_none() {
                if let Some(subclient) = self.guest_subclient_id() {
                    params = params.with_subclient(&subclient);
                }
            }
            return self.provider.initialize_client_session_for_guest(params).await;
        }

        let document = params
            .relative_document_uri()
            .unwrap_or(params.client_session_id.as_str())
            .to_string();
        let subclient = params.subclient_id().unwrap_or(HOST_SUBCLIENT_ID).to_string();

        let attachment =
            lock(&self.registry).attach(&document, &subclient, &params.client_session_id);
        if !attachment.is_first {
            debug!(
                "Subclient {} joined {} on backend session {}",
                subclient, document, attachment.server_session_id
            );
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock().await;
        self.flush_disposals().await;
        info!(
            "Opening backend session {} for {}",
            attachment.server_session_id, document
        );
        params.client_session_id = attachment.server_session_id;
        if let Err(e) = self.inner.initialize_client_session(params).await {
            let dropped = lock(&self.registry).remove_document(&document);
            warn!(
                "Backend session for {} failed to open; dropped {} subclients",
                document,
                dropped.len()
            );
            return Err(e);
        }
        Ok(())
    }

    async fn dispose_client_session(&self, mut params: DisposeClientSessionParameters) -> Result<()> {
        if self.is_guest() {
            if params.subclient_id().is_none() {
                if let Some(subclient) = self.guest_subclient_id() {
                    params = params.with_subclient(&subclient);
                }
            }
            return self.provider.dispose_client_session_for_guest(params).await;
        }

        let document = params
            .relative_document_uri()
            .unwrap_or(params.client_session_id.as_str())
            .to_string();
        let subclient = params.subclient_id().unwrap_or(HOST_SUBCLIENT_ID).to_string();

        let Some(backend) = self.detach(&document, &subclient) else {
            return Ok(());
        };
        info!(
            "Closing backend session {} for {}",
            backend.client_session_id, document
        );
        lock(&self.pending_disposals).push(backend);
        let _lifecycle = self.lifecycle.lock().await;
        self.flush_disposals().await;
        Ok(())
    }

    fn send_action_message(&self, mut message: ActionMessage) -> Result<()> {
        if self.is_guest() {
            if message.action.subclient_id.is_none() {
                message.action.subclient_id = self.guest_subclient_id();
            }
            self.provider.send_action_message_for_guest(message);
            return Ok(());
        }

        let subclient = message
            .subclient_id()
            .unwrap_or(HOST_SUBCLIENT_ID)
            .to_string();
        let (document, server_session_id) = {
            let registry = lock(&self.registry);
            let document = match message.relative_document_uri() {
                Some(document) => document,
                None => registry
                    .document_by_local_session_id(&subclient, &message.client_id)
                    .ok_or_else(|| BridgeError::DocumentNotRegistered(message.client_id.clone()))?,
            };
            let server_session_id = registry
                .server_session_id(document)
                .ok_or_else(|| BridgeError::DocumentNotRegistered(document.to_string()))?;
            (document.to_string(), server_session_id.to_string())
        };

        if subclient != HOST_SUBCLIENT_ID
            && message.action.action_kind() == ActionKind::RequestModel
        {
            self.inject_source_uri(&mut message.action, &document);
        }
        message.client_id = server_session_id;
        self.inner.send_action_message(message)
    }

    fn on_action_message(
        &self,
        listener: impl Fn(&ActionMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.local_messages.subscribe(listener)
    }

    fn shutdown_server(&self) {
        self.inner.shutdown_server();
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }
}
