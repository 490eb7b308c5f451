//! Session identity used to tag outbound broadcasts.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque per-runtime session id.
///
/// Created once per client runtime (one browser tab in the portal) and kept
/// for its lifetime. Receivers compare it against the origin of a budget
/// broadcast to suppress their own echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true when a message with the given origin was sent by this session.
    ///
    /// A `None` origin is an authoritative broadcast and never matches.
    pub fn is_origin_of(&self, origin: Option<&SessionId>) -> bool {
        origin == Some(self)
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

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_origin_never_matches() {
        let session = SessionId::new();
        assert!(!session.is_origin_of(None));
    }

    #[test]
    fn test_origin_matches_only_same_session() {
        let session = SessionId::new();
        let other = SessionId::new();
        assert!(session.is_origin_of(Some(&session)));
        assert!(!session.is_origin_of(Some(&other)));
    }

    #[test]
    fn test_session_id_serializes_as_plain_uuid() {
        let session = SessionId::new();
        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(json, format!("\"{}\"", session));
        let parsed: SessionId = json.trim_matches('"').parse().unwrap();
        assert_eq!(parsed, session);
    }
}
