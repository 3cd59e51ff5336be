//! WebSocket transport for editor panels.

pub mod handler;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::client::GlspClient;
use crate::connector::{Connector, EditorHost};

pub use handler::{webview_handler, WebviewQuery};

pub fn router<C: GlspClient, H: EditorHost>(connector: Arc<Connector<C, H>>) -> Router {
    Router::new()
        .route("/webview", get(webview_handler::<C, H>))
        .with_state(connector)
}
