//! Best-effort audit trail for throttle transitions.
//!
//! The decision path only ever calls [`AuditSink::record`], which must not
//! block. [`ChannelAuditSink`] pushes onto a bounded queue and drops the event
//! when the queue is full; [`spawn_audit_worker`] drains it in batches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::ratelimit::{ChannelMode, Features, AUDIT_BATCH_CAPACITY};

/// Kind of admission transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A key entered the throttled state
    RateLimit,
    /// A key left the throttled state
    RateLimitExit,
}

impl AuditKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::RateLimitExit => "rate_limit_exit",
        }
    }
}

/// Structured record of one transition.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub key: String,
    pub channel_mode: ChannelMode,
    pub features: Features,
    pub ab_test_group: String,
    pub at: DateTime<Utc>,
}

/// Receiver of audit events. Implementations must return promptly.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Sink backed by a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    pub const fn new(tx: mpsc::Sender<AuditEvent>) -> Self {
        Self { tx }
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        // Non-blocking send; drop the event if the channel is full or closed
        if let Err(e) = self.tx.try_send(event) {
            debug!(error = %e, "Dropping audit event");
        }
    }
}

/// Create the audit channel (bounded).
pub fn audit_channel(
    capacity: usize,
) -> (mpsc::Sender<AuditEvent>, mpsc::Receiver<AuditEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Spawn the worker that drains audit events into the operation log.
///
/// Events are written as structured `tracing` records with target `audit`.
/// The task ends once every sender is dropped.
pub fn spawn_audit_worker(mut rx: mpsc::Receiver<AuditEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut batch = Vec::with_capacity(AUDIT_BATCH_CAPACITY);
        loop {
            batch.clear();
            let Some(first) = rx.recv().await else {
                break;
            };
            batch.push(first);
            while batch.len() < AUDIT_BATCH_CAPACITY {
                match rx.try_recv() {
                    Ok(event) => batch.push(event),
                    Err(_) => break,
                }
            }
            for event in &batch {
                write_event(event);
            }
        }
        debug!("Audit channel closed, worker exiting");
    })
}

fn write_event(event: &AuditEvent) {
    let details = serde_json::to_string(&event.features).unwrap_or_default();
    info!(
        target: "audit",
        kind = event.kind.as_str(),
        key = %event.key,
        channel_mode = %event.channel_mode,
        ab_test_group = %event.ab_test_group,
        at = %event.at.to_rfc3339(),
        details = %details,
        "Admission transition"
    );
}
