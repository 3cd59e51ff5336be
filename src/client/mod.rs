//! Clients of the backend GLSP server.
//!
//! [`GlspClient`] is the session contract; [`SocketGlspClient`] speaks it over
//! a TCP JSON-RPC connection and [`MultiplexClient`] decorates any client to
//! share one backend session per document between collaboration subclients.

pub mod codec;
pub mod multiplex;
pub mod socket;

use std::future::Future;

use crate::error::Result;
use crate::events::Subscription;
use crate::models::{
    ActionMessage, DisposeClientSessionParameters, InitializeClientSessionParameters,
    InitializeParameters, InitializeResult,
};

pub use multiplex::MultiplexClient;
pub use socket::{ConnectionState, SocketGlspClient};

pub trait GlspClient: Send + Sync + 'static {
    /// Establish the backend connection.
    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the connection is up; fails if it could not be made.
    fn ready(&self) -> impl Future<Output = Result<()>> + Send;

    fn initialize_server(
        &self,
        params: InitializeParameters,
    ) -> impl Future<Output = Result<InitializeResult>> + Send;

    fn initialize_client_session(
        &self,
        params: InitializeClientSessionParameters,
    ) -> impl Future<Output = Result<()>> + Send;

    fn dispose_client_session(
        &self,
        params: DisposeClientSessionParameters,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Queue an action message for the server.
    fn send_action_message(&self, message: ActionMessage) -> Result<()>;

    /// Listen to action messages coming from the server.
    fn on_action_message(
        &self,
        listener: impl Fn(&ActionMessage) + Send + Sync + 'static,
    ) -> Subscription;

    fn shutdown_server(&self);

    fn stop(&self) -> impl Future<Output = Result<()>> + Send;
}
