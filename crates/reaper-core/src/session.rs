//! Session rewriting: `session:xxx` subjects resolve to `character:xxx`
//! before evaluation ever sees them.

use async_trait::async_trait;

use crate::error::Result;

/// Resolves a session token embedded in a `session:` subject to the
/// backing entity reference it stands in for.
///
/// Implementations classify failures by the error's code, not by type:
/// an error carrying [`crate::error::ERROR_CODE_SESSION_INVALID`] means the
/// session was looked up and found invalid (expired, revoked, never
/// existed) and the caller should deny; any other error means the store
/// itself is unavailable and the caller should treat it as an
/// infrastructure failure, not a policy decision.
#[async_trait]
pub trait SessionResolver: Send + Sync + std::fmt::Debug {
    /// Resolve `session_id` (the text following `session:`) to the entity
    /// reference it authenticates as, e.g. `character:01ABC`.
    ///
    /// # Errors
    ///
    /// Returns an error whose `code()` is
    /// [`crate::error::ERROR_CODE_SESSION_INVALID`] if the session is
    /// invalid; any other error indicates the resolver itself failed.
    async fn resolve(&self, session_id: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReaperError, ERROR_CODE_SESSION_INVALID};

    #[derive(Debug)]
    struct StaticResolver;

    #[async_trait]
    impl SessionResolver for StaticResolver {
        async fn resolve(&self, session_id: &str) -> Result<String> {
            if session_id == "expired" {
                return Err(ReaperError::SessionInvalid);
            }
            Ok(format!("character:{session_id}"))
        }
    }

    #[tokio::test]
    async fn resolves_session_to_character_ref() {
        let resolver = StaticResolver;
        let resolved = resolver.resolve("01ABC").await.unwrap();
        assert_eq!(resolved, "character:01ABC");
    }

    #[tokio::test]
    async fn invalid_session_reports_stable_error_code() {
        let resolver = StaticResolver;
        let err = resolver.resolve("expired").await.unwrap_err();
        assert!(matches!(err, ReaperError::SessionInvalid));
        assert_eq!(ERROR_CODE_SESSION_INVALID, "SESSION_INVALID");
    }
}
