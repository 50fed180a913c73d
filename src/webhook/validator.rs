//! Payload classification and webhook token verification.

use tracing::warn;

use super::event::{EventKind, MergeRequestEvent};

/// Result of inspecting a raw webhook body.
#[derive(Debug)]
pub enum Classification {
    /// Body is not valid JSON or misses required merge request fields.
    Malformed(String),
    /// Valid JSON but some other event kind (push, pipeline, ...).
    NotMergeRequest(String),
    /// A fully parsed merge request event.
    MergeRequest(Box<MergeRequestEvent>),
}

/// Parses a webhook body into a [`Classification`].
///
/// The object kind is read first with a shallow parse so that non merge
/// request events never fail on missing merge request fields.
pub fn classify_payload(body: &str) -> Classification {
    let kind: EventKind = match serde_json::from_str(body) {
        Ok(kind) => kind,
        Err(e) => return Classification::Malformed(format!("invalid JSON: {e}")),
    };

    if kind.object_kind != "merge_request" {
        return Classification::NotMergeRequest(kind.object_kind);
    }

    match serde_json::from_str::<MergeRequestEvent>(body) {
        Ok(event) => Classification::MergeRequest(Box::new(event)),
        Err(e) => Classification::Malformed(format!("malformed merge request event: {e}")),
    }
}

/// Checks the delivered token against the repository secret.
///
/// Returns true when the repository has no secret configured, with a warning,
/// so that repositories can be onboarded before their secret is set.
pub fn verify_token(provided: Option<&str>, secret: Option<&str>) -> bool {
    match secret {
        None | Some("") => {
            warn!("repository has no webhook secret configured, skipping token check");
            true
        }
        Some(secret) => match provided {
            Some(token) => constant_time_eq(token.as_bytes(), secret.as_bytes()),
            None => false,
        },
    }
}

/// Byte comparison that does not short-circuit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
