//! Where bootstrap outcomes end up: certificates on disk, renewal timers.

use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bootstrap_auth::cert::summarize_certificate;
use bootstrap_core::{ConsumerEvent, SignedCertificate};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A certificate written by [`CertificateSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub path: PathBuf,
    pub enrollment_alias: String,
    pub size: usize,
    /// Expiry, when the certificate parses as X.509.
    pub not_after: Option<DateTime<Utc>>,
}

/// Writes issued certificates to `<cert_dir>/<enrollment_alias>.der`.
#[derive(Debug, Clone)]
pub struct CertificateSink {
    cert_dir: PathBuf,
}

impl CertificateSink {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    /// Persist `certificate`, replacing any previous one for the alias.
    ///
    /// The file is written next to its final name and renamed into place,
    /// so readers never see a partial certificate.
    pub fn store(
        &self,
        certificate: &SignedCertificate,
        enrollment_alias: &str,
    ) -> Result<StoredCertificate> {
        std::fs::create_dir_all(&self.cert_dir)
            .with_context(|| format!("Failed to create {}", self.cert_dir.display()))?;

        let path = self.cert_dir.join(format!("{enrollment_alias}.der"));
        let staging = self.cert_dir.join(format!(".{enrollment_alias}.der.tmp"));
        write_private(&staging, certificate.der())?;
        std::fs::rename(&staging, &path)
            .with_context(|| format!("Failed to move certificate to {}", path.display()))?;

        let not_after = summarize_certificate(certificate.der())
            .map(|summary| summary.not_after)
            .ok();

        Ok(StoredCertificate {
            path,
            enrollment_alias: enrollment_alias.to_string(),
            size: certificate.der().len(),
            not_after,
        })
    }

    /// Handle one outcome. Returns the stored certificate on success.
    pub fn handle(&self, event: ConsumerEvent) -> Option<StoredCertificate> {
        match event {
            ConsumerEvent::Bootstrapped {
                certificate,
                enrollment_alias,
            } => match self.store(&certificate, &enrollment_alias) {
                Ok(stored) => {
                    tracing::info!(
                        alias = %stored.enrollment_alias,
                        size = stored.size,
                        not_after = ?stored.not_after,
                        path = %stored.path.display(),
                        "Stored gateway certificate"
                    );
                    Some(stored)
                }
                Err(e) => {
                    tracing::error!(
                        alias = %enrollment_alias,
                        error = %format!("{e:#}"),
                        "Failed to store certificate"
                    );
                    None
                }
            },
            ConsumerEvent::Failed(kind) => {
                tracing::warn!(kind = %kind, "Bootstrap attempt failed");
                None
            }
        }
    }

    /// Drain outcomes until the engine side goes away, scheduling renewal
    /// after every stored certificate with a known expiry.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<ConsumerEvent>,
        mut renewal: RenewalScheduler,
    ) {
        while let Some(event) = events.recv().await {
            if let Some(not_after) = self.handle(event).and_then(|stored| stored.not_after) {
                renewal.schedule(not_after);
            }
        }
        tracing::debug!("Outcome channel closed; certificate sink stopped");
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Re-triggers bootstrap ahead of certificate expiry.
///
/// At most one renewal is pending; scheduling replaces it. Dropping the
/// scheduler cancels it.
pub struct RenewalScheduler {
    trigger: broadcast::Sender<()>,
    renew_before: Duration,
    min_delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl RenewalScheduler {
    /// Renewal fires `renew_before` ahead of expiry, but never sooner than
    /// `min_delay` from now.
    pub fn new(
        trigger: broadcast::Sender<()>,
        renew_before: Duration,
        min_delay: Duration,
    ) -> Self {
        Self {
            trigger,
            renew_before,
            min_delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, not_after: DateTime<Utc>) {
        self.cancel();

        let delay = renewal_delay(not_after, Utc::now(), self.renew_before).max(self.min_delay);
        let trigger = self.trigger.clone();
        tracing::info!(
            not_after = %not_after,
            delay_secs = delay.as_secs(),
            "Scheduled certificate renewal"
        );

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!("Certificate renewal due");
            if trigger.send(()).is_err() {
                tracing::debug!("No trigger subscriber for renewal");
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|pending| !pending.is_finished())
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Time from `now` until renewal is due; zero once inside the window.
pub fn renewal_delay(
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
    renew_before: Duration,
) -> Duration {
    let remaining = (not_after - now).to_std().unwrap_or(Duration::ZERO);
    remaining.saturating_sub(renew_before)
}
