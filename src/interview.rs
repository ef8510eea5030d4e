//! The one-on-one exchange: ask one participant how well they know another

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::channel::ResponseChannel;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::queue::ItemHandler;
use crate::types::{Edge, Participant, ParticipantId, MAX_RATING};

/// Outbound message delivery, provided by the chat transport
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, to: &ParticipantId, text: &str) -> anyhow::Result<()>;
}

/// Relationship-closeness levels, indexed by rating
pub const RUBRIC: [&str; 10] = [
    "I've never seen / heard of them before online or otherwise",
    "I've seen their name or avatar before, but we've never interacted in any way",
    "We've interacted a little online, but we've never been in each other's presence in any way before",
    "We've been in each other's presence, but have yet to talk",
    "We've met and/or introduced ourselves to each other.",
    "We've had some opportunites to get to know each other better, but not many",
    "We've had a 1on1 conversation together",
    "We've met/interacted many times and gotten to know each other",
    "We're good friends/colleagues",
    "We're partners/spouses",
];

pub const INVALID_REPLY_NOTICE: &str =
    "that wasn't a valid response. try again with a number between 0 and 9";

pub const COMPLETED_NOTICE: &str = "you have completed all of them! the group will be notified when ALL participants have completed and the results will be shared";

pub const ENDED_EARLY_NOTICE: &str =
    "the game was ended early. no more questions will be asked";

/// The question sent for one subject
pub fn question_prompt(subject: &Participant, remaining: usize) -> String {
    let levels = RUBRIC
        .iter()
        .enumerate()
        .map(|(rating, meaning)| format!("{rating} - {meaning}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "How well do you know {} (@{})?\n\n\
         Use the following guide to assign a number to your connection:\n\n\
         Type in the highest number that you would say is true about your connection, \
         and send as a reply to this message\n\n\
         {levels}\n\n\
         ({remaining} remaining)",
        subject.first_name,
        subject.username.as_deref().unwrap_or(""),
    )
}

/// Read a rating off the front of a reply: `"7"`, `"+7"` and `" 3 - we met"`
/// are accepted, anything not starting with an integer in `0..=9` is not.
pub fn parse_rating(reply: &str) -> Option<u8> {
    let trimmed = reply.trim_start();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let digits = &trimmed[..digits_end];
    if digits.is_empty() {
        return None;
    }

    // Long digit runs are out of range anyway
    let value: u32 = digits.parse().ok()?;
    u8::try_from(value).ok().filter(|v| *v <= MAX_RATING)
}

/// Interviews one asker about each subject its queue hands over
pub struct Interview {
    asker: Participant,
    responses: Arc<ResponseChannel>,
    messenger: Arc<dyn Messenger>,
    cancel: CancellationToken,
    config: SessionConfig,
}

impl Interview {
    pub fn new(
        asker: Participant,
        responses: Arc<ResponseChannel>,
        messenger: Arc<dyn Messenger>,
        cancel: CancellationToken,
        config: SessionConfig,
    ) -> Self {
        Self {
            asker,
            responses,
            messenger,
            cancel,
            config,
        }
    }

    async fn send(&self, text: &str) -> Result<(), SessionError> {
        self.messenger
            .send_message(&self.asker.id, text)
            .await
            .map_err(SessionError::Transport)
    }

    /// Keep waiting until the asker sends a usable rating
    async fn read_rating(&self) -> Result<u8, SessionError> {
        let mut invalid = 0u32;
        loop {
            let reply = self
                .responses
                .wait_for_next_timeout(&self.asker.id, &self.cancel, self.config.reply_timeout())
                .await?;

            if let Some(rating) = parse_rating(&reply) {
                return Ok(rating);
            }

            invalid += 1;
            debug!(participant = %self.asker.id, reply = %reply, invalid, "Invalid reply");
            if let Some(max) = self.config.max_invalid_replies {
                if invalid >= max {
                    return Err(SessionError::RetriesExhausted {
                        participant: self.asker.id.clone(),
                        attempts: invalid,
                    });
                }
            }
            self.send(INVALID_REPLY_NOTICE).await?;
        }
    }
}

#[async_trait]
impl ItemHandler<Participant, Option<Edge>> for Interview {
    #[instrument(skip(self, subject), fields(asker = %self.asker.id, subject = %subject.id))]
    async fn handle(
        &self,
        subject: Participant,
        remaining: usize,
    ) -> Result<Option<Edge>, SessionError> {
        if self.asker.test {
            return Ok(None);
        }

        self.send(&question_prompt(&subject, remaining)).await?;
        let rating = self.read_rating().await?;
        debug!(rating, "Recorded rating");

        Ok(Some(Edge::from_rating(self.asker.clone(), subject, rating)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(ParticipantId, String)>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_message(&self, to: &ParticipantId, text: &str) -> anyhow::Result<()> {
            self.sent.lock().push((to.clone(), text.to_string()));
            Ok(())
        }
    }

    struct BrokenMessenger;

    #[async_trait]
    impl Messenger for BrokenMessenger {
        async fn send_message(&self, _to: &ParticipantId, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("chat unreachable")
        }
    }

    fn asker() -> Participant {
        Participant::new("a", "Ann").with_username("ann")
    }

    fn subject() -> Participant {
        Participant::new("b", "Ben").with_username("benny")
    }

    fn create_interview(
        messenger: Arc<dyn Messenger>,
        config: SessionConfig,
    ) -> (Arc<Interview>, Arc<ResponseChannel>, CancellationToken) {
        let responses = Arc::new(ResponseChannel::new());
        let cancel = CancellationToken::new();
        let interview = Interview::new(asker(), responses.clone(), messenger, cancel.clone(), config);
        (Arc::new(interview), responses, cancel)
    }

    async fn reply(responses: &ResponseChannel, text: &str) {
        let id = ParticipantId::from("a");
        while !responses.is_waiting(&id) {
            tokio::task::yield_now().await;
        }
        assert!(responses.publish(&id, text));
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("0"), Some(0));
        assert_eq!(parse_rating("9"), Some(9));
        assert_eq!(parse_rating("  4"), Some(4));
        assert_eq!(parse_rating("3 - we met"), Some(3));
        assert_eq!(parse_rating("10"), None);
        assert_eq!(parse_rating("abc"), None);
        assert_eq!(parse_rating("-1"), None);
        assert_eq!(parse_rating("+5"), Some(5));
        assert_eq!(parse_rating(" +9 out of 9"), Some(9));
        assert_eq!(parse_rating("+"), None);
        assert_eq!(parse_rating("+ 5"), None);
        assert_eq!(parse_rating("++5"), None);
        assert_eq!(parse_rating(""), None);
        assert_eq!(parse_rating("99999999999999999999"), None);
    }

    #[test]
    fn test_question_prompt_contents() {
        let prompt = question_prompt(&subject(), 4);
        assert!(prompt.starts_with("How well do you know Ben (@benny)?"));
        assert!(prompt.contains("0 - I've never seen"));
        assert!(prompt.contains("9 - We're partners/spouses"));
        assert!(prompt.ends_with("(4 remaining)"));
    }

    #[tokio::test]
    async fn test_retries_until_valid_rating() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (interview, responses, _cancel) =
            create_interview(messenger.clone(), SessionConfig::default());

        let task = {
            let interview = interview.clone();
            tokio::spawn(async move { interview.handle(subject(), 2).await })
        };

        reply(&responses, "abc").await;
        reply(&responses, "12").await;
        reply(&responses, "3").await;

        let edge = task.await.unwrap().unwrap().unwrap();
        assert_eq!(edge.asker.id, ParticipantId::from("a"));
        assert_eq!(edge.subject.id, ParticipantId::from("b"));
        assert_eq!(edge.strength, 0.33);

        let sent = messenger.sent.lock();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].1.contains("(2 remaining)"));
        assert_eq!(sent[1].1, INVALID_REPLY_NOTICE);
        assert_eq!(sent[2].1, INVALID_REPLY_NOTICE);
    }

    #[tokio::test]
    async fn test_synthetic_asker_is_skipped() {
        let messenger = Arc::new(RecordingMessenger::default());
        let responses = Arc::new(ResponseChannel::new());
        let interview = Interview::new(
            asker().synthetic(),
            responses,
            messenger.clone(),
            CancellationToken::new(),
            SessionConfig::default(),
        );

        let result = interview.handle(subject(), 0).await.unwrap();
        assert!(result.is_none());
        assert!(messenger.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_as_cancelled() {
        let (interview, responses, cancel) = create_interview(
            Arc::new(RecordingMessenger::default()),
            SessionConfig::default(),
        );

        let task = {
            let interview = interview.clone();
            tokio::spawn(async move { interview.handle(subject(), 0).await })
        };
        while !responses.is_waiting(&ParticipantId::from("a")) {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_retry_limit() {
        let config = SessionConfig {
            max_invalid_replies: Some(2),
            ..Default::default()
        };
        let (interview, responses, _cancel) =
            create_interview(Arc::new(RecordingMessenger::default()), config);

        let task = {
            let interview = interview.clone();
            tokio::spawn(async move { interview.handle(subject(), 0).await })
        };
        reply(&responses, "nope").await;
        reply(&responses, "still no").await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let (interview, _responses, _cancel) =
            create_interview(Arc::new(BrokenMessenger), SessionConfig::default());

        let err = interview.handle(subject(), 0).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!err.is_cancellation());
    }
}
