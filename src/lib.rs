//! # Relate
//!
//! Concurrent relationship-interview sessions: every participant is asked,
//! one question at a time, how well they know every other participant, and
//! the answers become a weighted relationship graph.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                │                SESSION STORE                 │
//!                │   active session per group · archive         │
//!                └───────────────────────┬──────────────────────┘
//!                                        │
//!                ┌───────────────────────▼──────────────────────┐
//!                │                   SESSION                    │
//!                │  registration · fan-out · completion · edges │
//!                └───────┬───────────────┬───────────────┬──────┘
//!                        ▼               ▼               ▼
//!                ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!                │  Queue (A)  │ │  Queue (B)  │ │  Queue (C)  │
//!                │  B → C → …  │ │  A → C → …  │ │  A → B → …  │
//!                └──────┬──────┘ └──────┬──────┘ └──────┬──────┘
//!                       │   Interview (ask, wait, validate)
//!                       ▼               ▼               ▼
//!                ┌──────────────────────────────────────────────┐
//!                │  RESPONSE CHANNEL  ◄── transport publishes   │
//!                │  reply waits · broadcast end signal          │
//!                └──────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Participant**: someone asked, and asked about
//! - **Attention queue**: a participant's backlog, handled strictly in order
//! - **Edge**: one `(asker, subject, strength)` answer
//! - **Natural end**: registration closed and every queue drained
//! - **Forced end**: the session's broadcast signal was raised

pub mod channel;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod graph;
pub mod interview;
pub mod queue;
pub mod session;
pub mod store;
pub mod types;

pub use channel::ResponseChannel;
pub use config::SessionConfig;
pub use error::SessionError;
pub use graph::GraphExport;
pub use interview::{Interview, Messenger};
pub use queue::{AttentionQueue, ItemHandler, QueueEvent, QueueSnapshot};
pub use session::{EndReason, Session, SessionHandle, SessionSnapshot};
pub use store::SessionStore;
pub use types::{Edge, GroupId, Participant, ParticipantId, SessionId};
