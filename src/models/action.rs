use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{BridgeError, Result};

/// Logical user attached to a document session.
pub type SubclientId = String;

/// Subclient id of the local (primary) user.
pub const HOST_SUBCLIENT_ID: &str = "HOST";

/// A protocol action. Only `kind` and `subclientId` are interpreted by the
/// bridge; every other field is carried verbatim so unknown kinds pass
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subclient_id: Option<SubclientId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subclient_id: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn action_kind(&self) -> ActionKind {
        ActionKind::from_kind(&self.kind)
    }

    /// Decode the kind-specific fields into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|source| {
            BridgeError::MalformedAction {
                kind: self.kind.clone(),
                source,
            }
        })
    }

    pub fn undo() -> Self {
        Self::new(ActionKind::Undo.as_str())
    }

    pub fn redo() -> Self {
        Self::new(ActionKind::Redo.as_str())
    }

    pub fn save_model(file_uri: Option<String>) -> Self {
        let action = Self::new(ActionKind::SaveModel.as_str());
        match file_uri {
            Some(uri) => action.with_field("fileUri", uri),
            None => action,
        }
    }

    pub fn request_model(source_uri: &str, diagram_type: &str) -> Self {
        let mut options = Map::new();
        options.insert("sourceUri".to_string(), source_uri.into());
        options.insert("diagramType".to_string(), diagram_type.into());
        Self::new(ActionKind::RequestModel.as_str()).with_field("options", Value::Object(options))
    }
}

/// Action kinds the bridge reacts to. Anything else is [`ActionKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SetDirtyState,
    StartProgress,
    UpdateProgress,
    EndProgress,
    SetMarkers,
    NavigateToExternalTarget,
    Select,
    ExportSvg,
    RequestModel,
    SetModel,
    UpdateModel,
    SaveModel,
    Undo,
    Redo,
    Other,
}

impl ActionKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "setDirtyState" => ActionKind::SetDirtyState,
            "startProgress" => ActionKind::StartProgress,
            "updateProgress" => ActionKind::UpdateProgress,
            "endProgress" => ActionKind::EndProgress,
            "setMarkers" => ActionKind::SetMarkers,
            "navigateToExternalTarget" => ActionKind::NavigateToExternalTarget,
            "elementSelected" => ActionKind::Select,
            "exportSvg" => ActionKind::ExportSvg,
            "requestModel" => ActionKind::RequestModel,
            "setModel" => ActionKind::SetModel,
            "updateModel" => ActionKind::UpdateModel,
            "saveModel" => ActionKind::SaveModel,
            "glspUndo" => ActionKind::Undo,
            "glspRedo" => ActionKind::Redo,
            _ => ActionKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SetDirtyState => "setDirtyState",
            ActionKind::StartProgress => "startProgress",
            ActionKind::UpdateProgress => "updateProgress",
            ActionKind::EndProgress => "endProgress",
            ActionKind::SetMarkers => "setMarkers",
            ActionKind::NavigateToExternalTarget => "navigateToExternalTarget",
            ActionKind::Select => "elementSelected",
            ActionKind::ExportSvg => "exportSvg",
            ActionKind::RequestModel => "requestModel",
            ActionKind::SetModel => "setModel",
            ActionKind::UpdateModel => "updateModel",
            ActionKind::SaveModel => "saveModel",
            ActionKind::Undo => "glspUndo",
            ActionKind::Redo => "glspRedo",
            ActionKind::Other => "other",
        }
    }

    /// Model updates go to every subclient of a document, whatever subclient
    /// the action names.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, ActionKind::SetModel | ActionKind::UpdateModel)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirtyStateReason {
    Operation,
    Undo,
    Redo,
    Save,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDirtyState {
    pub is_dirty: bool,
    #[serde(default)]
    pub reason: Option<DirtyStateReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProgress {
    pub progress_id: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgress {
    pub progress_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndProgress {
    pub progress_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub label: String,
    pub description: String,
    pub element_id: String,
    pub kind: MarkerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMarkers {
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub uri: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateToExternalTarget {
    pub target: NavigationTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Select {
    #[serde(rename = "selectedElementsIDs", default)]
    pub selected_elements_ids: Vec<String>,
    #[serde(rename = "deselectedElementsIDs", default)]
    pub deselected_elements_ids: Vec<String>,
    #[serde(default)]
    pub deselect_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSvg {
    pub svg: String,
    #[serde(default)]
    pub response_id: Option<String>,
}
