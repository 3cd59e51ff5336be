use std::sync::Arc;
use axum::{
    extract::{Query, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::GlspClient;
use crate::connector::{ClientRegistration, Connector, EditorHost, WebviewEndpoint};
use crate::error::{BridgeError, Result};
use crate::models::{ActionMessage, DiagramIdentifier, WebviewMessage};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebviewQuery {
    pub uri: String,
    pub diagram_type: String,
}

/// Outbound half of a webview socket.
struct SocketEndpoint {
    tx: mpsc::UnboundedSender<WebviewMessage>,
}

impl WebviewEndpoint for SocketEndpoint {
    fn send_message(&self, message: &ActionMessage) -> Result<()> {
        self.tx
            .send(WebviewMessage::Action {
                message: message.clone(),
            })
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

/// WebSocket handler for one editor panel
pub async fn webview_handler<C: GlspClient, H: EditorHost>(
    Query(query): Query<WebviewQuery>,
    ws: WebSocketUpgrade,
    State(connector): State<Arc<Connector<C, H>>>,
) -> Response {
    info!("New webview connection for {}", query.uri);
    ws.on_upgrade(move |socket| handle_socket(socket, query, connector))
}

async fn handle_socket<C: GlspClient, H: EditorHost>(
    socket: WebSocket,
    query: WebviewQuery,
    connector: Arc<Connector<C, H>>,
) {
    // The panel id doubles as the client session id
    let client_id = Uuid::new_v4().to_string();
    info!("Webview {} connected for {}", client_id, query.uri);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WebviewMessage>();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode webview message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_connector = connector.clone();
    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let connector = recv_connector;
        let client_id = recv_client_id;
        let mut registered = false;

        while let Some(Ok(frame)) = receiver.next().await {
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let message: WebviewMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(e) => {
                    error!("Failed to parse message from webview {}: {}", client_id, e);
                    continue;
                }
            };

            match message {
                WebviewMessage::Ready => {
                    if registered {
                        debug!("Webview {} reported ready twice", client_id);
                        continue;
                    }
                    let registration = ClientRegistration {
                        client_id: client_id.clone(),
                        document: query.uri.clone(),
                        diagram_type: query.diagram_type.clone(),
                        endpoint: Arc::new(SocketEndpoint { tx: tx.clone() }),
                    };
                    if let Err(e) = connector.register_client(registration).await {
                        error!("Failed to register webview {}: {}", client_id, e);
                        break;
                    }
                    registered = true;
                    let _ = tx.send(WebviewMessage::Initialize(DiagramIdentifier {
                        client_id: client_id.clone(),
                        diagram_type: query.diagram_type.clone(),
                        uri: query.uri.clone(),
                    }));
                }
                WebviewMessage::Action { mut message } => {
                    if !registered {
                        warn!("Dropping '{}' from webview {} before ready", message.action.kind, client_id);
                        continue;
                    }
                    message.client_id = client_id.clone();
                    if let Err(e) = connector.receive_from_client(message) {
                        error!("Failed to handle message from webview {}: {}", client_id, e);
                    }
                }
                WebviewMessage::Initialize(_) => {
                    warn!("Ignoring initialize sent by webview {}", client_id);
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    match connector.dispose_client(&client_id).await {
        Ok(()) => {}
        Err(BridgeError::ClientNotRegistered(_)) => {}
        Err(e) => warn!("Failed to dispose webview {}: {}", client_id, e),
    }
    info!("Webview {} disconnected", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;

    #[test]
    fn test_endpoint_wraps_actions_in_envelope() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let endpoint = SocketEndpoint { tx };
        let message = ActionMessage::new("panel-1", Action::new("setModel"));

        endpoint.send_message(&message).unwrap();

        assert_eq!(rx.try_recv().unwrap(), WebviewMessage::Action { message });
        let encoded = serde_json::to_value(WebviewMessage::Action {
            message: ActionMessage::new("panel-1", Action::new("fit")),
        })
        .unwrap();
        assert_eq!(encoded["type"], "action");
        assert_eq!(encoded["message"]["action"]["kind"], "fit");
    }

    #[test]
    fn test_endpoint_of_closed_socket_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let endpoint = SocketEndpoint { tx };

        let result = endpoint.send_message(&ActionMessage::new("panel-1", Action::new("fit")));

        assert!(matches!(result, Err(BridgeError::ConnectionClosed)));
    }
}
