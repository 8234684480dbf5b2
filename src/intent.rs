use serde::{Deserialize, Serialize};

use crate::error::Rejected;
use crate::model::{Ms, ResourceKind, TimeInterval};

/// A structured booking suggestion extracted from assistant output.
/// It is a proposal only — committing it runs the full validation path
/// like any hand-built request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingProposal {
    pub resource_kind: ResourceKind,
    pub start: Ms,
    pub end: Ms,
    #[serde(default)]
    pub note: Option<String>,
}

impl BookingProposal {
    pub fn interval(&self) -> Result<TimeInterval, Rejected> {
        TimeInterval::checked(self.start, self.end).ok_or(Rejected::InvalidInterval)
    }
}

/// What the client should show, plus an optional proposal to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interpretation {
    pub message: String,
    pub proposal: Option<BookingProposal>,
}

/// Pull a `BookingProposal` out of a free-text assistant reply.
///
/// The reply may wrap a JSON object in prose, so take the slice from
/// the first `{` to the last `}` and try to parse that. Anything
/// malformed degrades to a message-only interpretation; the reply text
/// is never lost.
pub fn interpret(reply: &str) -> Interpretation {
    let candidate = reply
        .find('{')
        .zip(reply.rfind('}'))
        .filter(|(open, close)| open < close)
        .map(|(open, close)| &reply[open..=close]);

    let proposal = candidate.and_then(|json| serde_json::from_str(json).ok());
    let message = match (&proposal, candidate) {
        // Strip the embedded JSON from what the user reads.
        (Some(_), Some(json)) => reply.replace(json, "").trim().to_string(),
        _ => reply.trim().to_string(),
    };
    Interpretation { message, proposal }
}
