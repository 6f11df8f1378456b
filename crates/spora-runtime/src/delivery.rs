//! Outbound delivery and countersign acquisition
//!
//! Both are collaborators outside the pod: a transport that moves encoded
//! envelopes between pods, and a channel to a parent owner's pod that
//! returns their countersignature. Fan-out is best effort: every recipient
//! gets its own attempt with its own timeout, and failures are collected
//! for an external retry scheduler rather than retried here.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};

use spora_core::{Handle, RelayableDraft, Signature, SporaResult};

/// Transport towards other participants' pods
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Deliver an encoded envelope to `recipient`, on behalf of `sender`
    async fn deliver(&self, sender: &Handle, recipient: &Handle, envelope: Bytes) -> SporaResult<()>;
}

/// A draft signed by its author, waiting for the parent owner's signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountersignRequest {
    pub draft: RelayableDraft,
    pub author_signature: Signature,
}

/// Channel to the pod hosting a parent owner
#[async_trait]
pub trait CountersignSource: Send + Sync {
    async fn request_countersign(
        &self,
        owner: &Handle,
        request: &CountersignRequest,
    ) -> SporaResult<Signature>;
}

/// Countersign source for pods that never talk to other pods
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCountersign;

#[async_trait]
impl CountersignSource for NoCountersign {
    async fn request_countersign(
        &self,
        owner: &Handle,
        _request: &CountersignRequest,
    ) -> SporaResult<Signature> {
        Err(spora_core::SporaError::CountersignUnavailable {
            owner: owner.clone(),
            reason: "no route to remote pods".into(),
        })
    }
}

/// One recipient that could not be reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub recipient: Handle,
    pub reason: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.recipient, self.reason)
    }
}

/// Outcome of a fan-out or a forward to the parent owner
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Every recipient an attempt was made for, in attempt order
    pub attempted: Vec<Handle>,
    pub failures: Vec<DeliveryFailure>,
}

impl FanoutReport {
    pub fn delivered(&self) -> usize {
        self.attempted.len() - self.failures.len()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deliver `envelope` to every recipient concurrently. Each attempt is
/// bounded by `timeout`; one slow or failing recipient never affects the
/// others.
pub async fn fan_out(
    deliverer: &dyn Deliverer,
    sender: &Handle,
    recipients: Vec<Handle>,
    envelope: Bytes,
    timeout: Duration,
) -> FanoutReport {
    let attempts = recipients.iter().map(|recipient| {
        let envelope = envelope.clone();
        async move {
            let result =
                tokio::time::timeout(timeout, deliverer.deliver(sender, recipient, envelope)).await;
            match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {}", humantime::format_duration(timeout))),
            }
        }
    });
    let results = join_all(attempts).await;

    let mut report = FanoutReport::default();
    for (recipient, failure) in recipients.into_iter().zip(results) {
        match failure {
            None => debug!(sender = %sender, recipient = %recipient, "delivered"),
            Some(reason) => {
                warn!(sender = %sender, recipient = %recipient, reason = %reason, "delivery failed");
                report.failures.push(DeliveryFailure {
                    recipient: recipient.clone(),
                    reason,
                });
            }
        }
        report.attempted.push(recipient);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use spora_core::SporaError;

    #[derive(Default)]
    struct Scripted {
        seen: Mutex<Vec<Handle>>,
    }

    #[async_trait]
    impl Deliverer for Scripted {
        async fn deliver(&self, _sender: &Handle, recipient: &Handle, _envelope: Bytes) -> SporaResult<()> {
            self.seen.lock().push(recipient.clone());
            match recipient.user() {
                "down" => Err(SporaError::TransportError("connection refused".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_block_others() {
        let deliverer = Scripted::default();
        let recipients = vec![h("c@c.example"), h("down@d.example"), h("slow@s.example"), h("e@e.example")];

        let report = fan_out(
            &deliverer,
            &h("b@b.example"),
            recipients.clone(),
            Bytes::from_static(b"envelope"),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(report.attempted, recipients);
        assert_eq!(report.delivered(), 2);
        let failed: Vec<_> = report.failures.iter().map(|f| f.recipient.user().to_string()).collect();
        assert_eq!(failed, vec!["down", "slow"]);
        assert!(report.failures[1].reason.contains("timed out"));
        assert_eq!(deliverer.seen.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_fanout() {
        let report = fan_out(
            &Scripted::default(),
            &h("b@b.example"),
            Vec::new(),
            Bytes::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(report.is_complete());
        assert_eq!(report.delivered(), 0);
    }

    #[tokio::test]
    async fn test_no_countersign() {
        let request = CountersignRequest {
            draft: RelayableDraft::new(
                h("a@a.example"),
                spora_core::ParentRef::post(spora_core::Guid::generate()),
                spora_core::Payload::Like,
            ),
            author_signature: Signature([0u8; 64]),
        };
        let result = NoCountersign.request_countersign(&h("b@b.example"), &request).await;
        assert!(matches!(result, Err(SporaError::CountersignUnavailable { .. })));
    }
}
