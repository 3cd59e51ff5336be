use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::action::Action;

/// Argument naming the owning document, independent of filesystem layout.
pub const RELATIVE_DOCUMENT_URI_ARG: &str = "relativeDocumentUri";
/// Argument naming the subclient a session request is made for.
pub const SUBCLIENT_ID_ARG: &str = "subclientId";

pub type Args = Map<String, Value>;

fn string_arg<'a>(args: &'a Option<Args>, key: &str) -> Option<&'a str> {
    args.as_ref()?.get(key)?.as_str()
}

fn set_arg(args: &mut Option<Args>, key: &str, value: &str) {
    args.get_or_insert_with(Map::new)
        .insert(key.to_string(), Value::String(value.to_string()));
}

/// An action addressed to (or from) one client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMessage {
    pub client_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Args>,
}

impl ActionMessage {
    pub fn new(client_id: impl Into<String>, action: Action) -> Self {
        Self {
            client_id: client_id.into(),
            action,
            args: None,
        }
    }

    pub fn relative_document_uri(&self) -> Option<&str> {
        string_arg(&self.args, RELATIVE_DOCUMENT_URI_ARG)
    }

    pub fn set_relative_document_uri(&mut self, document: &str) {
        set_arg(&mut self.args, RELATIVE_DOCUMENT_URI_ARG, document);
    }

    pub fn subclient_id(&self) -> Option<&str> {
        self.action.subclient_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParameters {
    pub application_id: String,
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Args>,
}

impl InitializeParameters {
    pub fn new(application_id: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            protocol_version: protocol_version.into(),
            args: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    /// Action kinds the server handles, per diagram type.
    #[serde(default)]
    pub server_actions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeClientSessionParameters {
    pub client_session_id: String,
    pub diagram_type: String,
    #[serde(default)]
    pub client_action_kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Args>,
}

impl InitializeClientSessionParameters {
    pub fn new(client_session_id: impl Into<String>, diagram_type: impl Into<String>) -> Self {
        Self {
            client_session_id: client_session_id.into(),
            diagram_type: diagram_type.into(),
            client_action_kinds: Vec::new(),
            args: None,
        }
    }

    pub fn with_document(mut self, document: &str) -> Self {
        set_arg(&mut self.args, RELATIVE_DOCUMENT_URI_ARG, document);
        self
    }

    pub fn with_subclient(mut self, subclient_id: &str) -> Self {
        set_arg(&mut self.args, SUBCLIENT_ID_ARG, subclient_id);
        self
    }

    pub fn relative_document_uri(&self) -> Option<&str> {
        string_arg(&self.args, RELATIVE_DOCUMENT_URI_ARG)
    }

    pub fn subclient_id(&self) -> Option<&str> {
        string_arg(&self.args, SUBCLIENT_ID_ARG)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposeClientSessionParameters {
    pub client_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Args>,
}

impl DisposeClientSessionParameters {
    pub fn new(client_session_id: impl Into<String>) -> Self {
        Self {
            client_session_id: client_session_id.into(),
            args: None,
        }
    }

    pub fn with_document(mut self, document: &str) -> Self {
        set_arg(&mut self.args, RELATIVE_DOCUMENT_URI_ARG, document);
        self
    }

    pub fn with_subclient(mut self, subclient_id: &str) -> Self {
        set_arg(&mut self.args, SUBCLIENT_ID_ARG, subclient_id);
        self
    }

    pub fn relative_document_uri(&self) -> Option<&str> {
        string_arg(&self.args, RELATIVE_DOCUMENT_URI_ARG)
    }

    pub fn subclient_id(&self) -> Option<&str> {
        string_arg(&self.args, SUBCLIENT_ID_ARG)
    }
}

/// Sent to a webview once it reports ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramIdentifier {
    pub client_id: String,
    pub diagram_type: String,
    pub uri: String,
}

/// Envelope of the webview transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebviewMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "initialize")]
    Initialize(DiagramIdentifier),
    #[serde(rename = "action")]
    Action { message: ActionMessage },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_message_wire_shape() {
        let raw = json!({
            "clientId": "panel-1",
            "action": { "kind": "requestModel", "options": { "sourceUri": "a.wf" } },
            "args": { "relativeDocumentUri": "diagrams/a.wf" }
        });
        let message: ActionMessage = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(message.client_id, "panel-1");
        assert_eq!(message.relative_document_uri(), Some("diagrams/a.wf"));
        assert_eq!(message.subclient_id(), None);
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_session_parameters_carry_document_and_subclient() {
        let params = InitializeClientSessionParameters::new("panel-1", "workflow")
            .with_document("a.wf")
            .with_subclient("2");

        assert_eq!(params.relative_document_uri(), Some("a.wf"));
        assert_eq!(params.subclient_id(), Some("2"));

        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["clientSessionId"], "panel-1");
        assert_eq!(value["args"]["subclientId"], "2");
    }

    #[test]
    fn test_webview_envelopes() {
        let ready: WebviewMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready, WebviewMessage::Ready);

        let init = WebviewMessage::Initialize(DiagramIdentifier {
            client_id: "c1".into(),
            diagram_type: "workflow".into(),
            uri: "a.wf".into(),
        });
        assert_eq!(
            serde_json::to_value(&init).unwrap(),
            json!({ "type": "initialize", "clientId": "c1", "diagramType": "workflow", "uri": "a.wf" })
        );
    }
}
