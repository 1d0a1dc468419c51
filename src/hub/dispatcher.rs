//! Outbound invocations with an ordered retry queue for message sends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chathub_shared::{HubMethod, HubName};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::registry::ChannelRegistry;
use crate::error::{HubError, Result};

/// A message send waiting for its hub to come back.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    pub hub: HubName,
    pub method: HubMethod,
    pub arguments: Vec<Value>,
    /// Failed delivery attempts from the queue so far
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
}

/// How an `invoke` left the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Completed on the hub with this result
    Sent(Value),
    /// Buffered for a later drain
    Queued,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct HubQueue {
    entries: VecDeque<QueuedOperation>,
    /// An entry is out for delivery and may still be pushed back
    draining: bool,
    /// A delayed drain is pending
    retry_scheduled: bool,
}

impl HubQueue {
    fn is_idle(&self) -> bool {
        self.entries.is_empty() && !self.draining
    }
}

pub struct OutboundDispatcher {
    registry: Arc<ChannelRegistry>,
    queues: Mutex<HashMap<HubName, HubQueue>>,
    max_retries: u32,
    retry_delay: Duration,
    me: Weak<OutboundDispatcher>,
}

impl OutboundDispatcher {
    /// `retry_delay` is how long a connected hub waits before draining
    /// again after a failed send.
    pub fn new(
        registry: Arc<ChannelRegistry>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry,
            queues: Mutex::new(HashMap::new()),
            max_retries,
            retry_delay,
            me: me.clone(),
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Invoke `method` on `hub`.
    ///
    /// Message sends never fail for connectivity: when the hub is not
    /// connected, earlier sends are still queued, or the direct call fails,
    /// the send is appended to the hub's queue and `Delivery::Queued` is
    /// returned. If the hub is connected, a drain is scheduled so the queue
    /// does not wait for a reconnect. Every other method is sent directly and
    /// its error returned.
    pub async fn invoke(
        &self,
        hub: HubName,
        method: HubMethod,
        arguments: Vec<Value>,
    ) -> Result<Delivery> {
        if !method.is_available_on(hub) {
            return Err(HubError::MethodNotOnHub { method, hub });
        }

        if !method.is_queueable() {
            let connection = self.registry.channel(hub)?;
            return match connection.invoke(method, arguments).await {
                Ok(result) => Ok(Delivery::Sent(result)),
                Err(e) => {
                    tracing::error!(%hub, %method, error = %e, "hub invocation failed");
                    Err(e)
                }
            };
        }

        let connected = self
            .registry
            .channel(hub)
            .ok()
            .filter(|c| c.state().is_connected());
        let direct = connected
            .clone()
            .filter(|_| self.with_queue(hub, |q| q.is_idle()));

        if let Some(connection) = direct {
            match connection.invoke(method, arguments.clone()).await {
                Ok(result) => return Ok(Delivery::Sent(result)),
                Err(e) => {
                    tracing::warn!(%hub, %method, error = %e, "send failed, queued for retry");
                }
            }
        }

        self.enqueue(hub, method, arguments);
        if connected.is_some() {
            self.schedule_retry(hub);
        }
        Ok(Delivery::Queued)
    }

    /// Drain `hub`'s queue oldest first until it is empty or a delivery
    /// fails. A failed entry goes back to the head with its retry count
    /// bumped; once that reaches the maximum it is dropped instead. Does
    /// nothing while the hub is not connected or another drain is running.
    /// A pass that stops on a failure while the hub is still connected
    /// schedules the next one.
    pub async fn process_queue(&self, hub: HubName) -> DrainReport {
        let mut report = DrainReport::default();

        let connection = match self.registry.channel(hub) {
            Ok(c) if c.state().is_connected() => c,
            _ => {
                report.remaining = self.queue_len(hub);
                tracing::debug!(%hub, remaining = report.remaining, "hub offline, queue kept");
                return report;
            }
        };

        let claimed = self.with_queue(hub, |q| {
            if q.draining {
                false
            } else {
                q.draining = true;
                true
            }
        });
        if !claimed {
            report.remaining = self.queue_len(hub);
            return report;
        }
        let _drain = DrainGuard {
            dispatcher: self,
            hub,
        };

        while let Some(mut op) = self.with_queue(hub, |q| q.entries.pop_front()) {
            if op.retry_count >= self.max_retries {
                self.log_drop(&op);
                report.dropped += 1;
                continue;
            }

            match connection.invoke(op.method, op.arguments.clone()).await {
                Ok(_) => {
                    tracing::debug!(%hub, method = %op.method, "queued message delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    op.retry_count += 1;
                    if op.retry_count >= self.max_retries {
                        self.log_drop(&op);
                        report.dropped += 1;
                    } else {
                        tracing::warn!(
                            %hub,
                            method = %op.method,
                            attempt = op.retry_count,
                            error = %e,
                            "queued message failed, will retry"
                        );
                        self.with_queue(hub, |q| q.entries.push_front(op));
                    }
                    break;
                }
            }
        }

        report.remaining = self.queue_len(hub);
        if report.remaining > 0 && connection.state().is_connected() {
            self.schedule_retry(hub);
        }
        report
    }

    pub fn queue_len(&self, hub: HubName) -> usize {
        self.with_queue(hub, |q| q.entries.len())
    }

    /// Snapshot of `hub`'s queue, oldest first.
    pub fn queued(&self, hub: HubName) -> Vec<QueuedOperation> {
        self.with_queue(hub, |q| q.entries.iter().cloned().collect())
    }

    /// Forget every queued send. Returns how many were discarded.
    pub fn discard_all(&self) -> usize {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let discarded = queues.values().map(|q| q.entries.len()).sum();
        for queue in queues.values_mut() {
            queue.entries.clear();
        }
        if discarded > 0 {
            tracing::warn!(discarded, "discarded queued messages");
        }
        discarded
    }

    fn enqueue(&self, hub: HubName, method: HubMethod, arguments: Vec<Value>) {
        let depth = self.with_queue(hub, |q| {
            q.entries.push_back(QueuedOperation {
                hub,
                method,
                arguments,
                retry_count: 0,
                queued_at: Utc::now(),
            });
            q.entries.len()
        });
        tracing::info!(%hub, %method, depth, "message queued while hub is unavailable");
    }

    fn schedule_retry(&self, hub: HubName) {
        let already = self.with_queue(hub, |q| std::mem::replace(&mut q.retry_scheduled, true));
        if already {
            return;
        }
        let me = self.me.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(dispatcher) = me.upgrade() else {
                return;
            };
            dispatcher.with_queue(hub, |q| q.retry_scheduled = false);
            let report = dispatcher.process_queue(hub).await;
            tracing::debug!(
                %hub,
                delivered = report.delivered,
                dropped = report.dropped,
                remaining = report.remaining,
                "retried outbound queue"
            );
        });
    }

    fn log_drop(&self, op: &QueuedOperation) {
        tracing::error!(
            hub = %op.hub,
            method = %op.method,
            retries = op.retry_count,
            queued_at = %op.queued_at,
            "dropping queued message after max retries"
        );
    }

    fn with_queue<R>(&self, hub: HubName, f: impl FnOnce(&mut HubQueue) -> R) -> R {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f(queues.entry(hub).or_default())
    }
}

/// Releases the drain claim even if the drain future is dropped.
struct DrainGuard<'a> {
    dispatcher: &'a OutboundDispatcher,
    hub: HubName,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.with_queue(self.hub, |q| q.draining = false);
    }
}
