//! Subclient session registry.
//!
//! Translates between three identity spaces:
//! - the local session id a subclient's editor panel uses,
//! - the logical subclient id (`HOST` or a collaboration guest),
//! - the single server session id the backend knows a document by.
//!
//! A document session exists exactly while at least one subclient is
//! attached. The first attaching subclient names the server session; the
//! others ride on it without the backend noticing.

use std::collections::{BTreeMap, HashMap};

use crate::models::{SubclientId, HOST_SUBCLIENT_ID};

#[derive(Debug, Clone)]
struct DocumentSession {
    subclients: BTreeMap<SubclientId, String>,
    server_session_id: String,
}

/// Outcome of [`SubclientRegistry::attach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The document had no subclients before; the backend session must be
    /// initialized under `server_session_id`.
    pub is_first: bool,
    pub server_session_id: String,
}

/// Outcome of [`SubclientRegistry::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detachment {
    /// The document has no subclients left; the backend session must be
    /// disposed.
    pub is_last: bool,
    pub server_session_id: String,
}

/// A subclient that is still attached although its guest left the
/// collaboration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSubclient {
    pub document: String,
    pub subclient_id: SubclientId,
    pub local_session_id: String,
}

#[derive(Debug, Default)]
pub struct SubclientRegistry {
    documents: HashMap<String, DocumentSession>,
}

impl SubclientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(
        &mut self,
        document: &str,
        subclient_id: &str,
        local_session_id: &str,
    ) -> Attachment {
        if let Some(session) = self.documents.get_mut(document) {
            session
                .subclients
                .insert(subclient_id.to_string(), local_session_id.to_string());
            return Attachment {
                is_first: false,
                server_session_id: session.server_session_id.clone(),
            };
        }

        let server_session_id = format!("{}_{}", local_session_id, subclient_id);
        let mut subclients = BTreeMap::new();
        subclients.insert(subclient_id.to_string(), local_session_id.to_string());
        self.documents.insert(
            document.to_string(),
            DocumentSession {
                subclients,
                server_session_id: server_session_id.clone(),
            },
        );
        Attachment {
            is_first: true,
            server_session_id,
        }
    }

    /// Remove a subclient. Returns `None` when the document or subclient is
    /// unknown, which is expected after a teardown already happened.
    ///
    /// The session outlives whichever subclient named it, the host included.
    pub fn detach(&mut self, document: &str, subclient_id: &str) -> Option<Detachment> {
        let session = self.documents.get_mut(document)?;
        session.subclients.remove(subclient_id)?;

        let is_last = session.subclients.is_empty();
        let server_session_id = session.server_session_id.clone();
        if is_last {
            self.documents.remove(document);
        }
        Some(Detachment {
            is_last,
            server_session_id,
        })
    }

    /// Drop a document with all its subclients, as if it never opened.
    pub fn remove_document(&mut self, document: &str) -> Vec<(SubclientId, String)> {
        self.documents
            .remove(document)
            .map(|session| session.subclients.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn server_session_id(&self, document: &str) -> Option<&str> {
        self.documents
            .get(document)
            .map(|session| session.server_session_id.as_str())
    }

    pub fn local_session_id(&self, document: &str, subclient_id: &str) -> Option<&str> {
        self.documents
            .get(document)?
            .subclients
            .get(subclient_id)
            .map(String::as_str)
    }

    pub fn document_by_server_session_id(&self, server_session_id: &str) -> Option<&str> {
        self.documents
            .iter()
            .find(|(_, session)| session.server_session_id == server_session_id)
            .map(|(document, _)| document.as_str())
    }

    /// Find the document a local session id is attached to, for messages
    /// that arrive without a `relativeDocumentUri` argument.
    pub fn document_by_local_session_id(
        &self,
        subclient_id: &str,
        local_session_id: &str,
    ) -> Option<&str> {
        self.documents
            .iter()
            .find(|(_, session)| {
                session.subclients.get(subclient_id).map(String::as_str) == Some(local_session_id)
            })
            .map(|(document, _)| document.as_str())
    }

    /// Attached subclients of a document with their local session ids.
    pub fn subclients(&self, document: &str) -> Vec<(SubclientId, String)> {
        self.documents
            .get(document)
            .map(|session| {
                session
                    .subclients
                    .iter()
                    .map(|(subclient, local)| (subclient.clone(), local.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Guests attached anywhere that are not in `guests`.
    pub fn stale_guests(&self, guests: &[SubclientId]) -> Vec<StaleSubclient> {
        let mut stale = Vec::new();
        for (document, session) in &self.documents {
            for (subclient, local) in &session.subclients {
                if subclient != HOST_SUBCLIENT_ID && !guests.contains(subclient) {
                    stale.push(StaleSubclient {
                        document: document.clone(),
                        subclient_id: subclient.clone(),
                        local_session_id: local.clone(),
                    });
                }
            }
        }
        stale
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
