//! Progress reporters keyed by `{client_id}_{progress_id}`.

use std::collections::HashMap;
use tokio::sync::oneshot;

use super::host::ProgressIndicator;

struct ProgressReporter {
    indicator: Box<dyn ProgressIndicator>,
    completion: oneshot::Sender<()>,
    percentage: f64,
}

#[derive(Default)]
pub(crate) struct ProgressReporters {
    reporters: HashMap<String, ProgressReporter>,
}

impl ProgressReporters {
    pub fn key(client_id: &str, progress_id: &str) -> String {
        format!("{}_{}", client_id, progress_id)
    }

    pub fn start(
        &mut self,
        key: String,
        indicator: Box<dyn ProgressIndicator>,
        completion: oneshot::Sender<()>,
        message: Option<&str>,
        percentage: Option<f64>,
    ) {
        let mut reporter = ProgressReporter {
            indicator,
            completion,
            percentage: 0.0,
        };
        match percentage.filter(|p| *p >= 0.0) {
            Some(p) => {
                reporter.indicator.report(message, Some(p));
                reporter.percentage = p;
            }
            None if message.is_some() => reporter.indicator.report(message, None),
            None => {}
        }
        // A restarted id replaces the old reporter, which completes it.
        if let Some(previous) = self.reporters.insert(key, reporter) {
            let _ = previous.completion.send(());
        }
    }

    /// Returns `false` for an unknown key.
    pub fn update(&mut self, key: &str, message: Option<&str>, percentage: Option<f64>) -> bool {
        let Some(reporter) = self.reporters.get_mut(key) else {
            return false;
        };
        match percentage.filter(|p| *p >= 0.0) {
            Some(p) => {
                let increment = p - reporter.percentage;
                reporter.percentage = p;
                reporter.indicator.report(message, Some(increment));
            }
            None => reporter.indicator.report(message, None),
        }
        true
    }

    /// Returns `false` for an unknown key.
    pub fn end(&mut self, key: &str, message: Option<&str>) -> bool {
        let Some(reporter) = self.reporters.remove(key) else {
            return false;
        };
        if message.is_some() {
            reporter.indicator.report(message, None);
        }
        let _ = reporter.completion.send(());
        true
    }

    /// Complete every reporter of a client. Returns how many there were.
    pub fn end_client(&mut self, client_id: &str) -> usize {
        let prefix = format!("{}_", client_id);
        let keys: Vec<String> = self
            .reporters
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &keys {
            self.end(key, None);
        }
        keys.len()
    }

    pub fn end_all(&mut self) {
        for (_, reporter) in self.reporters.drain() {
            let _ = reporter.completion.send(());
        }
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }
}
