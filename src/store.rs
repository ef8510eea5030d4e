//! Session store - one active session per group, plus every group's archive

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::channel::ResponseChannel;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::graph::GraphExport;
use crate::interview::Messenger;
use crate::session::{Session, SessionHandle, SessionSnapshot};
use crate::types::{GroupId, SessionId};

/// Creates, finds and archives sessions.
///
/// Every session shares the store's [`ResponseChannel`] and [`Messenger`], so
/// the transport publishes replies in one place regardless of group.
pub struct SessionStore {
    /// Active sessions
    active: RwLock<HashMap<GroupId, SessionHandle>>,
    /// Finished sessions, oldest first
    archived: RwLock<HashMap<GroupId, Vec<SessionSnapshot>>>,
    responses: Arc<ResponseChannel>,
    messenger: Arc<dyn Messenger>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            archived: RwLock::new(HashMap::new()),
            responses: Arc::new(ResponseChannel::new()),
            messenger,
            config,
        }
    }

    /// Reply channel the transport publishes inbound messages to
    pub fn responses(&self) -> &Arc<ResponseChannel> {
        &self.responses
    }

    /// Open a new session for `group`. Only one may be active per group.
    pub fn create(&self, group: GroupId) -> Result<SessionHandle, SessionError> {
        let mut active = self.active.write();
        if active.contains_key(&group) {
            return Err(SessionError::SessionInProgress(group));
        }

        let session = Session::new(
            group.clone(),
            self.config.clone(),
            Arc::clone(&self.responses),
            Arc::clone(&self.messenger),
        );
        active.insert(group, session.clone());
        Ok(session)
    }

    /// The group's active session, if any
    pub fn find(&self, group: &GroupId) -> Option<SessionHandle> {
        self.active.read().get(group).cloned()
    }

    /// Move the group's active session into its archive
    pub fn archive(&self, group: &GroupId) -> Result<SessionSnapshot, SessionError> {
        let session = self
            .active
            .write()
            .remove(group)
            .ok_or_else(|| SessionError::NoActiveSession(group.clone()))?;

        let snapshot = session.snapshot();
        self.responses.forget_signal(session.end_signal());
        self.archived
            .write()
            .entry(group.clone())
            .or_default()
            .push(snapshot.clone());

        info!(
            session_id = %snapshot.id,
            group_id = %group,
            edges = snapshot.edges.len(),
            "Archived session"
        );
        Ok(snapshot)
    }

    pub fn archived(&self, group: &GroupId, id: SessionId) -> Option<SessionSnapshot> {
        self.archived
            .read()
            .get(group)?
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn latest_archived(&self, group: &GroupId) -> Option<SessionSnapshot> {
        self.archived.read().get(group)?.last().cloned()
    }

    pub fn archived_count(&self, group: &GroupId) -> usize {
        self.archived.read().get(group).map_or(0, Vec::len)
    }

    /// Graph of an archived session
    pub fn graph(&self, group: &GroupId, id: SessionId) -> Option<GraphExport> {
        self.archived(group, id)
            .map(|snapshot| GraphExport::from_snapshot(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Participant, ParticipantId};
    use async_trait::async_trait;

    struct NullMessenger;

    #[async_trait]
    impl Messenger for NullMessenger {
        async fn send_message(&self, _to: &ParticipantId, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn create_test_store() -> SessionStore {
        SessionStore::new(SessionConfig::default(), Arc::new(NullMessenger))
    }

    #[test]
    fn test_store_creation() {
        let store = create_test_store();
        assert!(store.find(&GroupId::from("g")).is_none());
        assert_eq!(store.archived_count(&GroupId::from("g")), 0);
    }

    #[test]
    fn test_one_active_session_per_group() {
        let store = create_test_store();
        let group = GroupId::from("g");

        let session = store.create(group.clone()).unwrap();
        assert_eq!(store.find(&group).map(|s| s.id()), Some(session.id()));

        let second = store.create(group.clone());
        assert!(matches!(second, Err(SessionError::SessionInProgress(_))));

        // Other groups are independent
        assert!(store.create(GroupId::from("other")).is_ok());
    }

    #[test]
    fn test_archive_moves_session() {
        let store = create_test_store();
        let group = GroupId::from("g");

        let session = store.create(group.clone()).unwrap();
        session.add_participant(Participant::new("1", "One"));

        let snapshot = store.archive(&group).unwrap();
        assert_eq!(snapshot.id, session.id());
        assert!(store.find(&group).is_none());
        assert_eq!(store.archived_count(&group), 1);
        assert_eq!(store.latest_archived(&group).map(|s| s.id), Some(session.id()));
        assert!(store.archived(&group, session.id()).is_some());
        assert!(store.archived(&group, SessionId::new()).is_none());

        let graph = store.graph(&group, session.id()).unwrap();
        assert_eq!(graph.nodes.len(), 1);

        // A new session can start once the old one is archived
        assert!(store.create(group.clone()).is_ok());
    }

    #[test]
    fn test_archive_without_session() {
        let store = create_test_store();
        let result = store.archive(&GroupId::from("none"));
        assert!(matches!(result, Err(SessionError::NoActiveSession(_))));
    }
}
