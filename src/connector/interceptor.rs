use crate::models::ActionMessage;

/// Decision of a `before_receive_*` hook.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// Run the built-in handlers on the (possibly substituted) message.
    Process(ActionMessage),
    /// Propagate without running the built-in handlers.
    Forward(ActionMessage),
    /// Stop here.
    Drop,
}

/// Outcome of the built-in handler for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// `None` when the message was consumed.
    pub message: Option<ActionMessage>,
    pub changed: bool,
}

impl ProcessingResult {
    pub fn unchanged(message: ActionMessage) -> Self {
        Self {
            message: Some(message),
            changed: false,
        }
    }

    pub fn consumed() -> Self {
        Self {
            message: None,
            changed: true,
        }
    }
}

/// User hooks around the connector pipeline. Every method passes the message
/// through unless overridden.
pub trait MessageInterceptor: Send + Sync {
    fn before_receive_from_client(&self, message: ActionMessage) -> Interception {
        Interception::Process(message)
    }

    fn before_propagate_to_server(
        &self,
        message: Option<ActionMessage>,
        _changed: bool,
    ) -> Option<ActionMessage> {
        message
    }

    fn before_receive_from_server(&self, message: ActionMessage) -> Interception {
        Interception::Process(message)
    }

    fn before_propagate_to_client(
        &self,
        message: Option<ActionMessage>,
        _changed: bool,
    ) -> Option<ActionMessage> {
        message
    }
}

/// Interceptor that changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl MessageInterceptor for PassThrough {}
