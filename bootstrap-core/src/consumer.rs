//! Consumer interface: who receives the outcome of an attempt.

use tokio::sync::mpsc;

use crate::channel::SignedCertificate;
use crate::error::ErrorKind;

/// Receives the terminal outcome of every attempt, exactly once.
///
/// Called on the attempt's task; implementations must not block. Hand work
/// off (see [`ChannelConsumer`]) rather than doing I/O inline.
pub trait BootstrapConsumer: Send + Sync {
    /// The controller issued `certificate` for the key under `enrollment_alias`.
    fn on_bootstrapped(&self, certificate: SignedCertificate, enrollment_alias: &str);

    fn on_bootstrap_failed(&self, reason: ErrorKind);
}

/// Outcome forwarded by [`ChannelConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Bootstrapped {
        certificate: SignedCertificate,
        enrollment_alias: String,
    },
    Failed(ErrorKind),
}

/// Forwards outcomes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<ConsumerEvent>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConsumerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConsumerEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Bootstrap outcome receiver dropped");
        }
    }
}

impl BootstrapConsumer for ChannelConsumer {
    fn on_bootstrapped(&self, certificate: SignedCertificate, enrollment_alias: &str) {
        self.forward(ConsumerEvent::Bootstrapped {
            certificate,
            enrollment_alias: enrollment_alias.to_string(),
        });
    }

    fn on_bootstrap_failed(&self, reason: ErrorKind) {
        self.forward(ConsumerEvent::Failed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_in_order() {
        let (consumer, mut rx) = ChannelConsumer::new();
        consumer.on_bootstrap_failed(ErrorKind::ConnectionError);
        consumer.on_bootstrapped(SignedCertificate::new(b"cert".to_vec()), "csrKey");

        assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::Failed(ErrorKind::ConnectionError));
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsumerEvent::Bootstrapped {
                certificate: SignedCertificate::new(b"cert".to_vec()),
                enrollment_alias: "csrKey".to_string(),
            }
        );
    }

    #[test]
    fn closed_receiver_does_not_panic() {
        let (consumer, rx) = ChannelConsumer::new();
        drop(rx);
        consumer.on_bootstrap_failed(ErrorKind::SigningError);
    }
}
