//! Audit logging for entitlement state changes.
//!
//! Every applied snapshot, discarded stale result and issued redirect goes
//! through an [`EntitlementAuditLogger`], so "why does the UI think I'm on the
//! free plan" can be answered from logs.

use std::fmt;

use super::snapshot::Plan;

/// Which hosted billing page a session targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Checkout,
    Portal,
}

impl SessionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Portal => "portal",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event types for the entitlement store and session flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementAuditEvent {
    /// A server snapshot became current.
    SnapshotApplied { generation: u64, plan: Plan },
    /// The fallback snapshot became current after a failed read.
    FallbackApplied { generation: u64, reason: String },
    /// A fetch finished after a newer one had already been applied.
    StaleResultDiscarded { generation: u64, applied: u64 },
    /// A fetch finished after the user signed out or switched accounts.
    DiscardedAfterAuthChange { generation: u64 },
    /// The browsing context was sent to a hosted billing page on `host`.
    RedirectIssued { kind: SessionKind, host: String },
    /// A session request failed; nothing was navigated.
    SessionFailed { kind: SessionKind, reason: String },
}

impl fmt::Display for EntitlementAuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotApplied { generation, plan } => {
                write!(f, "Snapshot applied: generation={}, plan={}", generation, plan.as_str())
            }
            Self::FallbackApplied { generation, reason } => {
                write!(f, "Fallback applied: generation={}, reason={}", generation, reason)
            }
            Self::StaleResultDiscarded { generation, applied } => {
                write!(f, "Stale result discarded: generation={}, applied={}", generation, applied)
            }
            Self::DiscardedAfterAuthChange { generation } => {
                write!(f, "Result discarded after auth change: generation={}", generation)
            }
            Self::RedirectIssued { kind, host } => {
                write!(f, "Redirect issued: kind={}, host={}", kind, host)
            }
            Self::SessionFailed { kind, reason } => {
                write!(f, "Session failed: kind={}, reason={}", kind, reason)
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implementations should handle their own failures (e.g., log to stderr);
/// the store awaits each call inline.
#[allow(async_fn_in_trait)]
pub trait EntitlementAuditLogger: Send + Sync {
    async fn log(&self, event: EntitlementAuditEvent);
}

/// Audit logger that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

impl EntitlementAuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: EntitlementAuditEvent) {}
}

/// Logs audit events with `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl EntitlementAuditLogger for TracingAuditLogger {
    async fn log(&self, event: EntitlementAuditEvent) {
        tracing::info!(
            target: "dealgate::audit",
            event_type = %event_kind(&event),
            "{}", event
        );
    }
}

/// Event kind for structured logging.
pub fn event_kind(event: &EntitlementAuditEvent) -> &'static str {
    match event {
        EntitlementAuditEvent::SnapshotApplied { .. } => "snapshot_applied",
        EntitlementAuditEvent::FallbackApplied { .. } => "fallback_applied",
        EntitlementAuditEvent::StaleResultDiscarded { .. } => "stale_result_discarded",
        EntitlementAuditEvent::DiscardedAfterAuthChange { .. } => "discarded_after_auth_change",
        EntitlementAuditEvent::RedirectIssued { .. } => "redirect_issued",
        EntitlementAuditEvent::SessionFailed { .. } => "session_failed",
    }
}

/// Capturing audit logger for tests.
#[cfg(any(test, feature = "test-entitlements"))]
pub mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct RecordingAuditLogger {
        events: Arc<Mutex<Vec<EntitlementAuditEvent>>>,
    }

    impl RecordingAuditLogger {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn events(&self) -> Vec<EntitlementAuditEvent> {
            self.events.lock().unwrap().clone()
        }

        #[must_use]
        pub fn kinds(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(event_kind).collect()
        }
    }

    impl EntitlementAuditLogger for RecordingAuditLogger {
        async fn log(&self, event: EntitlementAuditEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::RecordingAuditLogger;
    use super::*;

    #[tokio::test]
    async fn test_noop_logger() {
        NoOpAuditLogger
            .log(EntitlementAuditEvent::DiscardedAfterAuthChange { generation: 3 })
            .await;
    }

    #[tokio::test]
    async fn test_tracing_logger() {
        TracingAuditLogger
            .log(EntitlementAuditEvent::SnapshotApplied { generation: 1, plan: Plan::Pro })
            .await;
    }

    #[tokio::test]
    async fn test_recording_logger_captures_in_order() {
        let logger = RecordingAuditLogger::new();
        logger
            .log(EntitlementAuditEvent::StaleResultDiscarded { generation: 1, applied: 2 })
            .await;
        logger
            .log(EntitlementAuditEvent::RedirectIssued {
                kind: SessionKind::Portal,
                host: "billing.stripe.com".to_string(),
            })
            .await;

        assert_eq!(logger.kinds(), vec!["stale_result_discarded", "redirect_issued"]);
    }

    #[test]
    fn test_event_display() {
        let event = EntitlementAuditEvent::FallbackApplied {
            generation: 4,
            reason: "Transport failure: connection refused".to_string(),
        };
        assert_eq!(
            event.to_string(),
            "Fallback applied: generation=4, reason=Transport failure: connection refused"
        );

        let event = EntitlementAuditEvent::SessionFailed {
            kind: SessionKind::Checkout,
            reason: "Card declined".to_string(),
        };
        assert_eq!(event.to_string(), "Session failed: kind=checkout, reason=Card declined");
        assert_eq!(event_kind(&event), "session_failed");
    }
}
