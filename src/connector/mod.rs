//! Connector between editor panels and the GLSP client.

mod handlers;
pub mod host;
pub mod interceptor;
pub mod pipeline;
mod progress;

pub use host::{
    Diagnostic, DiagnosticSeverity, EditorHost, HeadlessHost, OpenerOptions, Position,
    ProgressIndicator, Range, WebviewEndpoint,
};
pub use interceptor::{Interception, MessageInterceptor, PassThrough, ProcessingResult};
pub use pipeline::{
    ClientRegistration, Connector, ConnectorOptions, DocumentChange, DocumentSaved, Origin,
    SelectionUpdate,
};
