use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use crate::error::{BridgeError, Result};
use crate::events::Subscription;
use crate::models::{
    ActionMessage, DisposeClientSessionParameters, InitializeClientSessionParameters, SubclientId,
};

/// Where this bridge stands in a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationRole {
    /// No collaboration session; the bridge talks to its backend directly.
    #[default]
    Solo,
    /// Owns the backend connection and relays it to guests.
    Host,
    /// Has no backend of its own; everything goes through the host.
    Guest,
}

impl fmt::Display for CollaborationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaborationRole::Solo => write!(f, "solo"),
            CollaborationRole::Host => write!(f, "host"),
            CollaborationRole::Guest => write!(f, "guest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub from: CollaborationRole,
    pub to: CollaborationRole,
}

/// The set of guests currently connected to the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestsChanged {
    pub guests: Vec<SubclientId>,
}

/// Display information about a collaboration participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubclientInfo {
    pub subclient_id: SubclientId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Contract with the live-collaboration transport.
///
/// The multiplexing client only reaches remote peers through this trait;
/// the transport behind it is swappable.
pub trait CollaborationProvider: Send + Sync + 'static {
    fn role(&self) -> CollaborationRole;

    fn is_in_collaboration_mode(&self) -> bool {
        self.role() != CollaborationRole::Solo
    }

    fn is_host(&self) -> bool {
        self.role() == CollaborationRole::Host
    }

    fn is_guest(&self) -> bool {
        self.role() == CollaborationRole::Guest
    }

    /// Subclient id of the local participant, when in a session.
    fn subclient_id_from_session(&self) -> Option<SubclientId>;

    fn subclient_info_from_session(&self) -> Option<SubclientInfo>;

    // Host side

    /// Deliver a message to the guest named by `message.action.subclient_id`.
    fn handle_action_message_for_host(&self, message: ActionMessage);

    /// Deliver a batch of guest-addressed messages produced by one broadcast.
    fn handle_multiple_action_messages_for_host(&self, messages: Vec<ActionMessage>);

    fn on_guests_change_for_host(
        &self,
        listener: impl Fn(&GuestsChanged) + Send + Sync + 'static,
    ) -> Subscription;

    fn on_role_change(&self, listener: impl Fn(&RoleChange) + Send + Sync + 'static)
        -> Subscription;

    // Guest side

    fn initialize_client_session_for_guest(
        &self,
        params: InitializeClientSessionParameters,
    ) -> impl Future<Output = Result<()>> + Send;

    fn dispose_client_session_for_guest(
        &self,
        params: DisposeClientSessionParameters,
    ) -> impl Future<Output = Result<()>> + Send;

    fn send_action_message_for_guest(&self, message: ActionMessage);
}

/// Provider for a bridge that never joins a collaboration session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloProvider;

impl CollaborationProvider for SoloProvider {
    fn role(&self) -> CollaborationRole {
        CollaborationRole::Solo
    }

    fn subclient_id_from_session(&self) -> Option<SubclientId> {
        None
    }

    fn subclient_info_from_session(&self) -> Option<SubclientInfo> {
        None
    }

    fn handle_action_message_for_host(&self, message: ActionMessage) {
        tracing::warn!(
            "Dropping guest-addressed message '{}' outside a collaboration session",
            message.action.kind
        );
    }

    fn handle_multiple_action_messages_for_host(&self, messages: Vec<ActionMessage>) {
        tracing::warn!(
            "Dropping {} guest-addressed messages outside a collaboration session",
            messages.len()
        );
    }

    fn on_guests_change_for_host(
        &self,
        _listener: impl Fn(&GuestsChanged) + Send + Sync + 'static,
    ) -> Subscription {
        Subscription::noop()
    }

    fn on_role_change(
        &self,
        _listener: impl Fn(&RoleChange) + Send + Sync + 'static,
    ) -> Subscription {
        Subscription::noop()
    }

    async fn initialize_client_session_for_guest(
        &self,
        _params: InitializeClientSessionParameters,
    ) -> Result<()> {
        Err(BridgeError::Collaboration(
            "not part of a collaboration session".to_string(),
        ))
    }

    async fn dispose_client_session_for_guest(
        &self,
        _params: DisposeClientSessionParameters,
    ) -> Result<()> {
        Err(BridgeError::Collaboration(
            "not part of a collaboration session".to_string(),
        ))
    }

    fn send_action_message_for_guest(&self, message: ActionMessage) {
        tracing::warn!(
            "Dropping guest message '{}' outside a collaboration session",
            message.action.kind
        );
    }
}
