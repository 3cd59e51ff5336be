//! Side effects the connector asks of its editor host.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{ActionMessage, Marker, MarkerKind};

/// Outbound channel to one editor panel.
pub trait WebviewEndpoint: Send + Sync {
    fn send_message(&self, message: &ActionMessage) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl From<MarkerKind> for DiagnosticSeverity {
    fn from(kind: MarkerKind) -> Self {
        match kind {
            MarkerKind::Info => DiagnosticSeverity::Information,
            MarkerKind::Warning => DiagnosticSeverity::Warning,
            MarkerKind::Error => DiagnosticSeverity::Error,
        }
    }
}

/// A marker republished as a host diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub element_id: String,
    pub message: String,
    pub detail: String,
    pub severity: DiagnosticSeverity,
}

impl From<&Marker> for Diagnostic {
    fn from(marker: &Marker) -> Self {
        Self {
            element_id: marker.element_id.clone(),
            message: marker.label.clone(),
            detail: marker.description.clone(),
            severity: marker.kind.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// How to show an external navigation target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_focus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_column: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenerOptions {
    /// Overlay every option `overrides` sets on top of `self`.
    pub fn merge(mut self, overrides: OpenerOptions) -> Self {
        self.selection = overrides.selection.or(self.selection);
        self.preserve_focus = overrides.preserve_focus.or(self.preserve_focus);
        self.preview = overrides.preview.or(self.preview);
        self.view_column = overrides.view_column.or(self.view_column);
        self.extra.extend(overrides.extra);
        self
    }
}

/// Host-visible progress for a long-running server task.
pub trait ProgressIndicator: Send + Sync {
    /// `increment` is `None` for indeterminate progress.
    fn report(&self, message: Option<&str>, increment: Option<f64>);
}

pub trait EditorHost: Send + Sync + 'static {
    fn open_external(&self, uri: &str, options: Option<&OpenerOptions>) -> Result<()>;

    /// Where to write an exported SVG; `None` cancels the export.
    fn choose_export_path(&self, document: &str) -> impl Future<Output = Option<PathBuf>> + Send;

    /// `completion` resolves when the server ends the progress.
    fn create_progress(
        &self,
        title: &str,
        completion: oneshot::Receiver<()>,
    ) -> Box<dyn ProgressIndicator>;

    fn diagnostics_changed(&self, document: &str, diagnostics: &[Diagnostic]);
}

/// Host for the standalone bridge: logs what an editor would display and
/// writes exports below a fixed directory.
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    export_dir: PathBuf,
}

impl HeadlessHost {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    fn export_file_name(document: &str) -> String {
        let stem = Path::new(document)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "diagram".to_string());
        format!("{}-{}.svg", stem, Utc::now().format("%Y%m%d-%H%M%S"))
    }
}

struct LoggedProgress {
    title: String,
}

impl ProgressIndicator for LoggedProgress {
    fn report(&self, message: Option<&str>, increment: Option<f64>) {
        match increment {
            Some(increment) => info!(
                "[{}] {} (+{:.0}%)",
                self.title,
                message.unwrap_or_default(),
                increment
            ),
            None => info!("[{}] {}", self.title, message.unwrap_or_default()),
        }
    }
}

impl EditorHost for HeadlessHost {
    fn open_external(&self, uri: &str, options: Option<&OpenerOptions>) -> Result<()> {
        info!("Open external target {} with {:?}", uri, options);
        Ok(())
    }

    async fn choose_export_path(&self, document: &str) -> Option<PathBuf> {
        Some(self.export_dir.join(Self::export_file_name(document)))
    }

    fn create_progress(
        &self,
        title: &str,
        completion: oneshot::Receiver<()>,
    ) -> Box<dyn ProgressIndicator> {
        info!("[{}] started", title);
        let finished = title.to_string();
        tokio::spawn(async move {
            match completion.await {
                Ok(()) => info!("[{}] finished", finished),
                Err(_) => debug!("[{}] abandoned", finished),
            }
        });
        Box::new(LoggedProgress {
            title: title.to_string(),
        })
    }

    fn diagnostics_changed(&self, document: &str, diagnostics: &[Diagnostic]) {
        let errors = diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .count();
        if errors > 0 {
            warn!("{}: {} diagnostics, {} errors", document, diagnostics.len(), errors);
        } else {
            info!("{}: {} diagnostics", document, diagnostics.len());
        }
    }
}
