use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// One access-control denial, recorded for audit purposes.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: String,
    pub resource: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn denial(actor: impl Into<String>, resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            resource: resource.into(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Injected sink for security-relevant events. Recording must never block a
/// request; implementations drop on overflow rather than stall.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: AuditEvent);
}

/// Sink that writes each event straight to the tracing pipeline.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        warn!(
            target: "audit",
            actor = %event.actor,
            resource = %event.resource,
            reason = %event.reason,
            at = %event.at.to_rfc3339(),
            "access denied"
        );
    }
}

enum Message {
    Event(AuditEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Bounded buffering sink owned by the process: events are batched and
/// flushed on an interval or when the buffer fills, and drained on shutdown.
pub struct BufferedAuditSink {
    tx: mpsc::Sender<Message>,
}

impl BufferedAuditSink {
    pub fn spawn(capacity: usize, flush_interval: std::time::Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Message>(capacity.max(1));

        tokio::spawn(async move {
            let mut buffer: Vec<AuditEvent> = Vec::new();
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(Message::Event(event)) => {
                            buffer.push(event);
                            if buffer.len() >= capacity.max(1) {
                                flush(&mut buffer);
                            }
                        }
                        Some(Message::Shutdown(ack)) => {
                            flush(&mut buffer);
                            let _ = ack.send(());
                            break;
                        }
                        None => {
                            flush(&mut buffer);
                            break;
                        }
                    },
                    _ = ticker.tick() => flush(&mut buffer),
                }
            }
        });

        Self { tx }
    }

    /// Flushes remaining events and stops the background task.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl AuditSink for BufferedAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.tx.try_send(Message::Event(event)).is_err() {
            warn!(target: "audit", "audit buffer full, event dropped");
        }
    }
}

fn flush(buffer: &mut Vec<AuditEvent>) {
    for event in buffer.drain(..) {
        warn!(
            target: "audit",
            actor = %event.actor,
            resource = %event.resource,
            reason = %event.reason,
            at = %event.at.to_rfc3339(),
            "access denied"
        );
    }
}
