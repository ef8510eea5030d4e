//! Synthetic participants and edges for testing mode and demos

use rand::Rng;

use crate::error::SessionError;
use crate::types::{round_strength, Edge, Participant};

/// Synthetic participant number `n`: "Agent n (agentn)"
pub fn test_participant(n: usize) -> Participant {
    Participant::new(n.to_string(), "Agent")
        .with_last_name(n.to_string())
        .with_username(format!("agent{n}"))
        .synthetic()
}

/// Synthetic participants numbered `1..=count`
pub fn generate_test_participants(count: usize) -> Vec<Participant> {
    (1..=count).map(test_participant).collect()
}

/// Random edges between `participants`.
///
/// Every participant gets edges to the first `floor(len * density / 100)`
/// participants other than itself, with random strengths.
pub fn generate_test_edges(
    participants: &[Participant],
    density_percent: u32,
) -> Result<Vec<Edge>, SessionError> {
    if density_percent > 100 {
        return Err(SessionError::InvalidDensity(density_percent));
    }

    let edge_count = participants.len() * density_percent as usize / 100;
    let mut rng = rand::thread_rng();
    let mut edges = Vec::new();

    for (i, asker) in participants.iter().enumerate() {
        for (j, subject) in participants.iter().enumerate().take(edge_count) {
            if i == j {
                continue;
            }
            edges.push(Edge {
                asker: asker.clone(),
                subject: subject.clone(),
                strength: round_strength(rng.gen::<f64>()),
            });
        }
    }

    Ok(edges)
}
