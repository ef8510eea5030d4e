//! Interview session: one attention queue per participant, run concurrently
//!
//! Lifecycle: open for registration → running (registration open or closed)
//! → ended, either naturally once every queue has drained after registration
//! closed, or forcibly by the session's broadcast signal.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::ResponseChannel;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::fixtures::generate_test_participants;
use crate::interview::{Interview, Messenger, COMPLETED_NOTICE, ENDED_EARLY_NOTICE};
use crate::queue::{AttentionQueue, QueueEvent, QueueSnapshot};
use crate::types::{Edge, GroupId, Participant, ParticipantId, SessionId};

/// A participant's queue of people to be asked about
pub type InterviewQueue = AttentionQueue<ParticipantId, Participant, Option<Edge>>;

type InterviewEvent = QueueEvent<ParticipantId, Option<Edge>>;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Registration closed and every queue drained
    Natural,
    /// The broadcast signal was raised
    Forced,
}

/// A participant whose queue stopped on a handler failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueFailure {
    pub participant: ParticipantId,
    pub error: String,
}

/// An edge by participant id, resolvable against the snapshot's `player_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub asker: ParticipantId,
    pub subject: ParticipantId,
    pub strength: f64,
}

/// Serializable copy of a session, for archiving and graph export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub group_id: GroupId,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub registration_open: bool,
    pub running: bool,
    pub was_early_ended: bool,
    /// Registration order
    pub players: Vec<ParticipantId>,
    pub player_data: BTreeMap<ParticipantId, Participant>,
    pub edges: Vec<EdgeRecord>,
    #[serde(default)]
    pub failures: Vec<QueueFailure>,
    /// Each participant's queue, by subject id. After a forced end this holds
    /// the unanswered questions.
    #[serde(default)]
    pub queues: BTreeMap<ParticipantId, QueueSnapshot<ParticipantId>>,
}

impl SessionSnapshot {
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.player_data.get(id)
    }

    pub fn edge(&self, asker: &ParticipantId, subject: &ParticipantId) -> Option<&EdgeRecord> {
        self.edges
            .iter()
            .find(|e| &e.asker == asker && &e.subject == subject)
    }
}

struct SessionState {
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    registration_open: bool,
    running: bool,
    was_early_ended: bool,
    players: Vec<ParticipantId>,
    player_data: HashMap<ParticipantId, Participant>,
    queues: HashMap<ParticipantId, InterviewQueue>,
    /// Queues stopped for good
    finished: HashSet<ParticipantId>,
    edges: Vec<Edge>,
    failures: Vec<QueueFailure>,
}

/// One round of everyone-about-everyone interviews in a group
pub struct Session {
    /// Session ID
    pub id: SessionId,
    /// Group the session is played in
    pub group_id: GroupId,
    config: SessionConfig,
    state: RwLock<SessionState>,
    responses: Arc<ResponseChannel>,
    messenger: Arc<dyn Messenger>,
    end_signal: String,
    /// Broadcast cancellation shared by every interview of this session
    cancel: CancellationToken,
    natural_end: CancellationToken,
    event_tx: mpsc::UnboundedSender<InterviewEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<InterviewEvent>>>,
    /// Completion notices still being sent
    notices: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session open for registration.
    ///
    /// In testing mode the configured number of synthetic participants is
    /// registered straight away.
    pub fn new(
        group_id: GroupId,
        config: SessionConfig,
        responses: Arc<ResponseChannel>,
        messenger: Arc<dyn Messenger>,
    ) -> SessionHandle {
        let id = SessionId::new();
        let end_signal = format!("session:{id}:end");
        let cancel = responses.signal(&end_signal);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(session_id = %id, group_id = %group_id, "Creating new session");

        let test_participants = config.test_participants;
        let session = SessionHandle::new(Self {
            id,
            group_id,
            config,
            state: RwLock::new(SessionState {
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                registration_open: true,
                running: false,
                was_early_ended: false,
                players: Vec::new(),
                player_data: HashMap::new(),
                queues: HashMap::new(),
                finished: HashSet::new(),
                edges: Vec::new(),
                failures: Vec::new(),
            }),
            responses,
            messenger,
            end_signal,
            cancel,
            natural_end: CancellationToken::new(),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            notices: Mutex::new(Vec::new()),
        });

        for participant in generate_test_participants(test_participants) {
            session.add_participant(participant);
        }
        session
    }

    /// Register a participant.
    ///
    /// Returns `false` without doing anything if the session has ended,
    /// registration is closed or the id is already registered. Joining a running session fans out both ways:
    /// the newcomer is asked about everyone present, and everyone present gets
    /// the newcomer appended to their queue.
    pub fn add_participant(&self, participant: Participant) -> bool {
        let mut state = self.state.write();
        if is_ended(&state) {
            debug!(session_id = %self.id, participant = %participant.id, "Session ended, ignoring");
            return false;
        }
        if !state.registration_open {
            debug!(session_id = %self.id, participant = %participant.id, "Registration closed, ignoring");
            return false;
        }
        if state.player_data.contains_key(&participant.id) {
            debug!(session_id = %self.id, participant = %participant.id, "Already registered");
            return false;
        }

        let id = participant.id.clone();
        let queue = self.create_queue(&participant);

        if state.running {
            let present: Vec<Participant> = state
                .players
                .iter()
                .filter_map(|p| state.player_data.get(p).cloned())
                .collect();
            queue.add_all(present);
            queue.start_or_resume();

            for existing in &state.players {
                if let Some(existing_queue) = state.queues.get(existing) {
                    existing_queue.add(participant.clone());
                }
            }
        }

        state.players.push(id.clone());
        state.player_data.insert(id.clone(), participant);
        state.queues.insert(id.clone(), queue);

        info!(
            session_id = %self.id,
            participant = %id,
            late = state.running,
            "Participant joined"
        );
        true
    }

    fn create_queue(&self, asker: &Participant) -> InterviewQueue {
        let interview = Interview::new(
            asker.clone(),
            Arc::clone(&self.responses),
            Arc::clone(&self.messenger),
            self.cancel.clone(),
            self.config.clone(),
        );
        AttentionQueue::new(asker.id.clone(), Arc::new(interview), self.event_tx.clone())
    }

    /// Run the session until it ends naturally or is ended early
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn start(&self) -> Result<EndReason, SessionError> {
        let mut events = {
            let mut state = self.state.write();
            let events = self
                .event_rx
                .lock()
                .take()
                .ok_or(SessionError::AlreadyStarted)?;

            state.running = true;
            state.started_at = Some(Utc::now());

            for asker in &state.players {
                let Some(queue) = state.queues.get(asker) else {
                    continue;
                };
                let subjects = state
                    .players
                    .iter()
                    .filter(|id| *id != asker)
                    .filter_map(|id| state.player_data.get(id).cloned());
                queue.add_all(subjects);
                queue.start_or_resume();
            }

            info!(participants = state.players.len(), "Session started");
            events
        };

        self.check_completion();

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break EndReason::Forced,
                _ = self.natural_end.cancelled() => break EndReason::Natural,
                Some(event) = events.recv() => self.handle_event(event),
            }
        };

        self.finish(reason, events).await;
        Ok(reason)
    }

    fn handle_event(&self, event: InterviewEvent) {
        match event {
            QueueEvent::Result {
                owner,
                result: Some(edge),
            } => {
                debug!(asker = %owner, subject = %edge.subject.id, strength = edge.strength, "Edge recorded");
                self.state.write().edges.push(edge);
            }
            QueueEvent::Result { result: None, .. } => {}
            QueueEvent::Exhausted { owner } => {
                let registration_open = self.state.read().registration_open;
                if !registration_open {
                    self.finish_queue(&owner);
                    self.check_completion();
                }
            }
            QueueEvent::Aborted { owner } => {
                debug!(participant = %owner, "Interview aborted");
            }
            QueueEvent::Failed { owner, error } => {
                error!(session_id = %self.id, participant = %owner, error = %error, "Interview failed, dropping participant's remaining questions");
                {
                    let mut state = self.state.write();
                    state.finished.insert(owner.clone());
                    state.failures.push(QueueFailure {
                        participant: owner,
                        error: error.to_string(),
                    });
                }
                self.check_completion();
            }
        }
    }

    /// Stop a drained queue for good and tell its participant they're done
    fn finish_queue(&self, id: &ParticipantId) {
        let participant = {
            let mut state = self.state.write();
            if state.finished.contains(id) {
                return;
            }
            let Some(queue) = state.queues.get(id).cloned() else {
                return;
            };
            if !queue.is_idle() {
                return;
            }
            queue.stop_or_pause();
            state.finished.insert(id.clone());
            state.player_data.get(id).cloned()
        };

        debug!(session_id = %self.id, participant = %id, "Queue finished");
        if let Some(participant) = participant {
            self.notify_in_background(participant, COMPLETED_NOTICE);
        }
    }

    /// Raise the natural-end signal once registration is closed and every queue has stopped
    fn check_completion(&self) {
        let state = self.state.read();
        if !state.running || state.registration_open {
            return;
        }
        if state.queues.values().all(|q| !q.is_running()) && !self.natural_end.is_cancelled() {
            info!(session_id = %self.id, "All participants finished");
            self.natural_end.cancel();
        }
    }

    async fn finish(&self, reason: EndReason, mut events: mpsc::UnboundedReceiver<InterviewEvent>) {
        let queues: Vec<InterviewQueue> = self.state.read().queues.values().cloned().collect();
        for queue in &queues {
            queue.stop_or_pause();
        }

        // Results produced before the stop still count
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::Result {
                result: Some(edge), ..
            } = event
            {
                self.state.write().edges.push(edge);
            }
        }
        drop(events);

        let to_notify: Vec<Participant> = {
            let mut state = self.state.write();
            state.running = false;
            state.ended_at = Some(Utc::now());
            if reason == EndReason::Forced {
                state.was_early_ended = true;
            }

            info!(
                session_id = %self.id,
                reason = ?reason,
                edges = state.edges.len(),
                "Session ended"
            );

            if reason == EndReason::Forced {
                state
                    .players
                    .iter()
                    .filter_map(|id| state.player_data.get(id).cloned())
                    .collect()
            } else {
                Vec::new()
            }
        };

        let pending: Vec<JoinHandle<()>> = self.notices.lock().drain(..).collect();
        match reason {
            EndReason::Natural => {
                for task in pending {
                    let _ = task.await;
                }
            }
            EndReason::Forced => {
                for task in &pending {
                    task.abort();
                }
            }
        }

        for participant in &to_notify {
            self.notify(participant, ENDED_EARLY_NOTICE).await;
        }
    }

    fn wants_notices(&self, participant: &Participant) -> bool {
        !participant.test && self.config.notify_participants
    }

    async fn notify(&self, participant: &Participant, text: &str) {
        if !self.wants_notices(participant) {
            return;
        }
        send_notice(self.messenger.as_ref(), &participant.id, text).await;
    }

    /// Send a notice on its own task, outside the event loop
    fn notify_in_background(&self, participant: Participant, text: &'static str) {
        if !self.wants_notices(&participant) {
            return;
        }
        let messenger = Arc::clone(&self.messenger);
        let task = tokio::spawn(async move {
            send_notice(messenger.as_ref(), &participant.id, text).await;
        });

        let mut notices = self.notices.lock();
        notices.retain(|t| !t.is_finished());
        notices.push(task);
    }

    /// Stop accepting participants. Queues that have already drained finish now.
    pub async fn close_registration(&self) {
        let players = {
            let mut state = self.state.write();
            if !state.registration_open || is_ended(&state) {
                return;
            }
            state.registration_open = false;
            state.players.clone()
        };
        info!(session_id = %self.id, participants = players.len(), "Registration closed");

        for id in &players {
            self.finish_queue(id);
        }
        self.check_completion();
    }

    /// End a running session now. Every in-flight question is abandoned.
    pub fn end_early(&self) {
        {
            let mut state = self.state.write();
            if !state.running {
                return;
            }
            state.was_early_ended = true;
        }
        info!(session_id = %self.id, "Ending session early");
        self.responses.raise(&self.end_signal);
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Name of the broadcast signal that ends this session
    pub fn end_signal(&self) -> &str {
        &self.end_signal
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn has_started(&self) -> bool {
        self.state.read().started_at.is_some()
    }

    pub fn is_registration_open(&self) -> bool {
        self.state.read().registration_open
    }

    pub fn was_early_ended(&self) -> bool {
        self.state.read().was_early_ended
    }

    pub fn participant_count(&self) -> usize {
        self.state.read().players.len()
    }

    /// Participants in registration order
    pub fn participants(&self) -> Vec<Participant> {
        let state = self.state.read();
        state
            .players
            .iter()
            .filter_map(|id| state.player_data.get(id).cloned())
            .collect()
    }

    /// Recorded edges in completion order
    pub fn edges(&self) -> Vec<Edge> {
        self.state.read().edges.clone()
    }

    pub fn failures(&self) -> Vec<QueueFailure> {
        self.state.read().failures.clone()
    }

    pub fn queue_snapshot(&self, id: &ParticipantId) -> Option<QueueSnapshot<Participant>> {
        self.state.read().queues.get(id).map(|q| q.snapshot())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            id: self.id,
            group_id: self.group_id.clone(),
            created_at: state.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
            registration_open: state.registration_open,
            running: state.running,
            was_early_ended: state.was_early_ended,
            players: state.players.clone(),
            player_data: state
                .player_data
                .iter()
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect(),
            edges: state
                .edges
                .iter()
                .map(|e| EdgeRecord {
                    asker: e.asker.id.clone(),
                    subject: e.subject.id.clone(),
                    strength: e.strength,
                })
                .collect(),
            failures: state.failures.clone(),
            queues: state
                .queues
                .iter()
                .map(|(id, q)| (id.clone(), q.snapshot().map(|p| p.id)))
                .collect(),
        }
    }
}

/// Started and no longer running: nothing but a snapshot is left to take
fn is_ended(state: &SessionState) -> bool {
    state.started_at.is_some() && !state.running
}

async fn send_notice(messenger: &dyn Messenger, to: &ParticipantId, text: &str) {
    if let Err(e) = messenger.send_message(to, text).await {
        warn!(participant = %to, error = %e, "Failed to send notice");
    }
}

/// Shared handle to a session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Session>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
