//! Per-call metadata.

use std::time::{Duration, Instant};

/// Metadata travelling with every [`SessionService`](crate::rpc::SessionService) call.
///
/// - **deadline**: absolute instant after which the caller no longer waits;
///   storage calls and forwards must finish before it
/// - **forwarded**: set when the call was re-issued by another cluster node;
///   a node receiving a forwarded call for a token it does not own fails
///   instead of forwarding again
/// - **request id**: correlation id propagated across forwards
/// - **access token**: ambient token used by `Context`
///
/// # Example
///
/// ```
/// use mnemosyne_core::CallContext;
/// use std::time::Duration;
///
/// let ctx = CallContext::new()
///     .with_timeout(Duration::from_secs(1))
///     .with_access_token("abc");
/// assert!(!ctx.is_forwarded());
/// assert!(ctx.remaining().is_some());
/// assert!(ctx.mark_forwarded().is_forwarded());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    forwarded: bool,
    request_id: Option<String>,
    access_token: Option<String>,
}

impl CallContext {
    /// Context without deadline or metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline to `now + timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Absolute deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Mark the call as re-issued by a peer.
    #[must_use]
    pub fn mark_forwarded(mut self) -> Self {
        self.forwarded = true;
        self
    }

    /// Whether the call came from a peer.
    #[must_use]
    pub const fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Correlation id, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Attach the ambient access token. Empty tokens are ignored.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        self.access_token = (!access_token.is_empty()).then_some(access_token);
        self
    }

    /// Ambient access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_never_expires() {
        let ctx = CallContext::new();
        assert_eq!(ctx.remaining(), None);
        assert!(!ctx.is_expired());
    }

    #[test]
    fn past_deadline_is_expired() {
        let ctx = CallContext::new().with_timeout(Duration::ZERO);
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn forwarding_keeps_other_metadata() {
        let ctx = CallContext::new()
            .with_request_id("req-1")
            .with_access_token("tok")
            .mark_forwarded();
        assert!(ctx.is_forwarded());
        assert_eq!(ctx.request_id(), Some("req-1"));
        assert_eq!(ctx.access_token(), Some("tok"));
    }

    #[test]
    fn empty_access_token_is_absent() {
        assert_eq!(CallContext::new().with_access_token("").access_token(), None);
    }
}
