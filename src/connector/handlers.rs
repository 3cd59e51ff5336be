//! Built-in handlers for the intercepted action kinds.

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::host::{Diagnostic, EditorHost, OpenerOptions};
use super::interceptor::ProcessingResult;
use super::pipeline::{ClientRegistration, Connector, DocumentSaved, Origin, SelectionUpdate};
use super::progress::ProgressReporters;
use crate::client::GlspClient;
use crate::error::{BridgeError, Result};
use crate::models::{
    ActionMessage, DirtyStateReason, EndProgress, ExportSvg, NavigateToExternalTarget, Select,
    SetDirtyState, SetMarkers, StartProgress, UpdateProgress,
};
use crate::utils::lock;

const JSON_OPENER_OPTIONS_ARG: &str = "jsonOpenerOptions";

impl<C: GlspClient, H: EditorHost> Connector<C, H> {
    fn set_dirty(&self, client_id: &str, dirty: bool) {
        if let Some(entry) = lock(&self.state).clients.get_mut(client_id) {
            entry.dirty = dirty;
        }
    }

    pub(super) fn handle_dirty_state(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: SetDirtyState = message.action.payload()?;
        self.set_dirty(&registration.client_id, payload.is_dirty);

        match payload.reason {
            Some(DirtyStateReason::Save) => {
                info!("Saved {}", registration.document);
                self.documents_saved.fire(&DocumentSaved {
                    client_id: registration.client_id.clone(),
                    document: registration.document.clone(),
                });
                Ok(ProcessingResult::consumed())
            }
            Some(DirtyStateReason::Undo | DirtyStateReason::Redo) => {
                Ok(ProcessingResult::unchanged(message))
            }
            Some(DirtyStateReason::Operation) if payload.is_dirty => {
                self.documents_changed.fire(&self.document_change(registration));
                Ok(ProcessingResult::consumed())
            }
            _ => {
                debug!(
                    "{} dirty state is now {}",
                    registration.document, payload.is_dirty
                );
                Ok(ProcessingResult::consumed())
            }
        }
    }

    pub(super) fn handle_start_progress(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: StartProgress = message.action.payload()?;
        let (completion_tx, completion_rx) = oneshot::channel();
        let indicator = self.host.create_progress(&payload.title, completion_rx);
        lock(&self.progress).start(
            ProgressReporters::key(&registration.client_id, &payload.progress_id),
            indicator,
            completion_tx,
            payload.message.as_deref(),
            payload.percentage,
        );
        Ok(ProcessingResult::consumed())
    }

    pub(super) fn handle_update_progress(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: UpdateProgress = message.action.payload()?;
        let key = ProgressReporters::key(&registration.client_id, &payload.progress_id);
        if !lock(&self.progress).update(&key, payload.message.as_deref(), payload.percentage) {
            debug!("Ignoring update of unknown progress {}", key);
        }
        Ok(ProcessingResult::consumed())
    }

    pub(super) fn handle_end_progress(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: EndProgress = message.action.payload()?;
        let key = ProgressReporters::key(&registration.client_id, &payload.progress_id);
        if !lock(&self.progress).end(&key, payload.message.as_deref()) {
            debug!("Ignoring end of unknown progress {}", key);
        }
        Ok(ProcessingResult::consumed())
    }

    pub(super) fn handle_markers(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: SetMarkers = message.action.payload()?;
        let diagnostics: Vec<Diagnostic> = payload.markers.iter().map(Diagnostic::from).collect();
        lock(&self.state)
            .diagnostics
            .insert(registration.document.clone(), diagnostics.clone());
        self.host
            .diagnostics_changed(&registration.document, &diagnostics);
        Ok(ProcessingResult::unchanged(message))
    }

    pub(super) fn handle_navigate(&self, message: ActionMessage) -> Result<ProcessingResult> {
        let payload: NavigateToExternalTarget = message.action.payload()?;
        let target = payload.target;

        let options = match target.args {
            Some(mut args) => {
                let overrides = match args.remove(JSON_OPENER_OPTIONS_ARG) {
                    Some(serde_json::Value::String(raw)) => Some(
                        serde_json::from_str::<OpenerOptions>(&raw).map_err(|source| {
                            BridgeError::MalformedAction {
                                kind: message.action.kind.clone(),
                                source,
                            }
                        })?,
                    ),
                    _ => None,
                };
                let base = OpenerOptions {
                    extra: args,
                    ..Default::default()
                };
                Some(match overrides {
                    Some(overrides) => base.merge(overrides),
                    None => base,
                })
            }
            None => None,
        };

        if let Err(e) = self.host.open_external(&target.uri, options.as_ref()) {
            warn!("Could not open {}: {}", target.uri, e);
        }
        Ok(ProcessingResult::consumed())
    }

    pub(super) fn handle_select(
        &self,
        message: ActionMessage,
        origin: Origin,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: Select = message.action.payload()?;
        let selected = {
            let mut state = lock(&self.state);
            let selection = state
                .selections
                .entry(registration.client_id.clone())
                .or_default();
            if payload.deselect_all {
                selection.clear();
            }
            selection.retain(|id| !payload.deselected_elements_ids.contains(id));
            for id in payload.selected_elements_ids {
                if !selection.contains(&id) {
                    selection.push(id);
                }
            }
            selection.clone()
        };

        self.selection_updates.fire(&SelectionUpdate {
            client_id: registration.client_id.clone(),
            document: registration.document.clone(),
            selected,
        });

        match origin {
            Origin::Client => Ok(ProcessingResult::consumed()),
            Origin::Server => Ok(ProcessingResult::unchanged(message)),
        }
    }

    pub(super) fn handle_export(
        &self,
        message: ActionMessage,
        registration: &ClientRegistration,
    ) -> Result<ProcessingResult> {
        let payload: ExportSvg = message.action.payload()?;
        let host = self.host.clone();
        let document = registration.document.clone();
        tokio::spawn(async move {
            let Some(path) = host.choose_export_path(&document).await else {
                debug!("Export of {} cancelled", document);
                return;
            };
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create {}: {}", parent.display(), e);
                    return;
                }
            }
            match tokio::fs::write(&path, payload.svg).await {
                Ok(()) => info!("Exported {} to {}", document, path.display()),
                Err(e) => error!("Failed to export {}: {}", document, e),
            }
        });
        Ok(ProcessingResult::consumed())
    }
}

#[cfg(test)]
mod tests {
    use crate::connector::{Diagnostic, DiagnosticSeverity};
    use crate::error::BridgeError;
    use crate::models::{Action, ActionMessage};
    use crate::test_support::{connected, settle, ProgressEvent};
    use crate::utils::lock;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn select(selected: &[&str], deselected: &[&str]) -> Action {
        Action::new("elementSelected")
            .with_field("selectedElementsIDs", json!(selected))
            .with_field("deselectedElementsIDs", json!(deselected))
    }

    #[tokio::test]
    async fn test_client_selection_is_not_echoed_to_server() {
        let (backend, _host, _endpoint, connector) = connected().await;
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let _sub = connector.on_selection_update(move |u| lock(&sink).push(u.selected.clone()));

        connector
            .receive_from_client(ActionMessage::new("panel-1", select(&["a", "b"], &[])))
            .unwrap();
        connector
            .receive_from_client(ActionMessage::new("panel-1", select(&["c"], &["a"])))
            .unwrap();

        assert!(backend.sent().is_empty());
        assert_eq!(connector.selection("panel-1"), vec!["b", "c"]);
        assert_eq!(lock(&updates).len(), 2);
    }

    #[tokio::test]
    async fn test_server_selection_reaches_client() {
        let (backend, _host, endpoint, connector) = connected().await;
        let message = ActionMessage::new(
            "panel-1",
            select(&["x"], &[]).with_field("deselectAll", true),
        );

        backend.emit(&message);

        assert_eq!(endpoint.received(), vec![message]);
        assert_eq!(connector.selection("panel-1"), vec!["x"]);
    }

    #[tokio::test]
    async fn test_operation_dirty_state_raises_undoable_change() {
        let (backend, _host, endpoint, connector) = connected().await;
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        let _sub = connector.on_document_changed(move |c| lock(&sink).push(c.clone()));

        backend.emit(&ActionMessage::new(
            "panel-1",
            Action::new("setDirtyState")
                .with_field("isDirty", true)
                .with_field("reason", "operation"),
        ));

        assert!(connector.is_dirty("a.wf"));
        assert!(endpoint.received().is_empty());
        let change = lock(&changes).remove(0);
        assert_eq!(change.document, "a.wf");

        change.undo();
        change.redo();
        let kinds: Vec<String> = endpoint
            .received()
            .into_iter()
            .map(|m| m.action.kind)
            .collect();
        assert_eq!(kinds, vec!["glspUndo", "glspRedo"]);
    }

    #[tokio::test]
    async fn test_undo_dirty_state_propagates() {
        let (backend, _host, endpoint, _connector) = connected().await;

        backend.emit(&ActionMessage::new(
            "panel-1",
            Action::new("setDirtyState")
                .with_field("isDirty", false)
                .with_field("reason", "undo"),
        ));

        assert_eq!(endpoint.received().len(), 1);
    }

    #[tokio::test]
    async fn test_markers_republish_without_duplicates() {
        let (backend, host, endpoint, connector) = connected().await;
        let message = ActionMessage::new(
            "panel-1",
            Action::new("setMarkers").with_field(
                "markers",
                json!([
                    { "label": "No name", "description": "Task needs a name", "elementId": "t1", "kind": "warning" },
                    { "label": "Cycle", "description": "Flow loops", "elementId": "f2", "kind": "error" }
                ]),
            ),
        );

        backend.emit(&message);
        backend.emit(&message);

        let diagnostics = connector.diagnostics("a.wf");
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(diagnostics[1].severity, DiagnosticSeverity::Error);
        assert_eq!(endpoint.received(), vec![message.clone(), message]);
        let published: Vec<Vec<Diagnostic>> =
            lock(&host.published).iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(published[0], published[1]);
    }

    #[tokio::test]
    async fn test_progress_lifecycle() {
        let (backend, host, endpoint, _connector) = connected().await;
        let progress = |kind: &str, extra: serde_json::Value| {
            let mut action = Action::new(kind).with_field("progressId", "validate");
            if let serde_json::Value::Object(fields) = extra {
                action.fields.extend(fields);
            }
            ActionMessage::new("panel-1", action)
        };

        backend.emit(&progress("startProgress", json!({ "title": "Validating", "percentage": 0 })));
        backend.emit(&progress("updateProgress", json!({ "message": "half", "percentage": 50 })));
        backend.emit(&progress("updateProgress", json!({ "percentage": -1 })));
        backend.emit(&progress("endProgress", json!({})));
        backend.emit(&progress("updateProgress", json!({ "percentage": 90 })));

        assert!(endpoint.received().is_empty());
        assert_eq!(
            host.progress_events(),
            vec![
                ProgressEvent::Started("Validating".into()),
                ProgressEvent::Reported { message: None, increment: Some(0.0) },
                ProgressEvent::Reported { message: Some("half".into()), increment: Some(50.0) },
                ProgressEvent::Reported { message: None, increment: None },
            ]
        );
        let mut completion = lock(&host.completions).remove(0);
        assert_eq!(completion.try_recv(), Ok(()));
    }

    #[tokio::test]
    async fn test_navigation_uses_opener_options() {
        let (backend, host, endpoint, _connector) = connected().await;

        backend.emit(&ActionMessage::new(
            "panel-1",
            Action::new("navigateToExternalTarget").with_field(
                "target",
                json!({
                    "uri": "file:///workspace/src/task.java",
                    "args": {
                        "jsonOpenerOptions": "{\"selection\":{\"start\":{\"line\":4,\"character\":2},\"end\":{\"line\":4,\"character\":9}}}",
                        "origin": "diagram"
                    }
                }),
            ),
        ));

        assert!(endpoint.received().is_empty());
        let opened = lock(&host.opened).clone();
        assert_eq!(opened[0].0, "file:///workspace/src/task.java");
        let options = opened[0].1.clone().unwrap();
        assert_eq!(options.selection.unwrap().start.line, 4);
        assert_eq!(options.extra["origin"], json!("diagram"));
        assert!(options.extra.get("jsonOpenerOptions").is_none());
    }

    #[tokio::test]
    async fn test_malformed_opener_options_fail() {
        let (_backend, host, _endpoint, connector) = connected().await;

        let result = connector.receive_from_client(ActionMessage::new(
            "panel-1",
            Action::new("navigateToExternalTarget").with_field(
                "target",
                json!({ "uri": "file:///a.txt", "args": { "jsonOpenerOptions": "{not json" } }),
            ),
        ));

        assert!(matches!(result, Err(BridgeError::MalformedAction { .. })));
        assert!(lock(&host.opened).is_empty());
    }

    #[tokio::test]
    async fn test_export_writes_svg() {
        let (backend, host, endpoint, _connector) = connected().await;
        let path = std::env::temp_dir()
            .join(format!("glsp-bridge-export-{}", uuid::Uuid::new_v4()))
            .join("a.svg");
        *lock(&host.export_path) = Some(path.clone());

        backend.emit(&ActionMessage::new(
            "panel-1",
            Action::new("exportSvg").with_field("svg", "<svg/>"),
        ));
        for _ in 0..50 {
            if std::fs::read_to_string(&path).is_ok_and(|svg| svg == "<svg/>") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        settle().await;

        assert!(endpoint.received().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<svg/>");
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
