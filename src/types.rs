//! Identifiers and the core data model: participants and edges

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque participant identity, as assigned by the chat transport
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for ParticipantId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// The group chat a session is played in
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Unique id of one interview session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Someone taking part in a session.
///
/// Synthetic (`test`) participants are only ever asked *about*, never asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub test: bool,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, first_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            first_name: first_name.into(),
            last_name: None,
            username: None,
            test: false,
        }
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Mark as synthetic
    pub fn synthetic(mut self) -> Self {
        self.test = true;
        self
    }

    /// `"First Last (username)"`, with missing parts left empty
    pub fn display_name(&self) -> String {
        format!(
            "{} {} ({})",
            self.first_name,
            self.last_name.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
        )
    }
}

/// Highest rating on the closeness rubric
pub const MAX_RATING: u8 = 9;

/// One recorded relationship data point: how close `asker` says they are to `subject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub asker: Participant,
    pub subject: Participant,
    /// Normalized to `[0, 1]`
    pub strength: f64,
}

impl Edge {
    /// Build an edge from a raw 0-9 rating, scaled to `[0, 1]` at two decimals
    pub fn from_rating(asker: Participant, subject: Participant, rating: u8) -> Self {
        let rating = rating.min(MAX_RATING);
        Self {
            asker,
            subject,
            strength: round_strength(f64::from(rating) / f64::from(MAX_RATING)),
        }
    }

    /// `(asker, subject)` key for order-independent comparisons
    pub fn key(&self) -> (ParticipantId, ParticipantId) {
        (self.asker.id.clone(), self.subject.id.clone())
    }
}

pub(crate) fn round_strength(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let p = Participant::new("1", "Ada").with_last_name("Lovelace").with_username("ada");
        assert_eq!(p.display_name(), "Ada Lovelace (ada)");

        let bare = Participant::new("2", "Bob");
        assert_eq!(bare.display_name(), "Bob  ()");
    }

    #[test]
    fn test_edge_from_rating() {
        let a = Participant::new("a", "A");
        let b = Participant::new("b", "B");

        assert_eq!(Edge::from_rating(a.clone(), b.clone(), 9).strength, 1.0);
        assert_eq!(Edge::from_rating(a.clone(), b.clone(), 3).strength, 0.33);
        assert_eq!(Edge::from_rating(a.clone(), b.clone(), 0).strength, 0.0);
        assert_eq!(Edge::from_rating(a, b, 7).strength, 0.78);
    }

    #[test]
    fn test_participant_id_conversions() {
        assert_eq!(ParticipantId::from(42i64), ParticipantId::from("42"));
        assert_eq!(ParticipantId::new("x").as_str(), "x");
    }

    #[test]
    fn test_participant_serde_defaults() {
        let p: Participant = serde_json::from_str(r#"{"id":"7","first_name":"Kim"}"#).unwrap();
        assert!(!p.test);
        assert!(p.username.is_none());
    }
}
