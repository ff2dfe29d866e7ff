//! Gateway Bootstrap Agent - obtains the gateway's certificate from its controller
//!
//! Proves possession of the hardware key, has a fresh enrollment key
//! certified, stores the certificate, and does it again whenever the
//! network changes or the certificate nears expiry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bootstrap_auth::identity::{Fingerprint, KeyAlgorithm};
use bootstrap_core::{
    AttemptState, BootstrapEngine, ChannelConsumer, ConsumerEvent, KeyCustodian, Provisioning,
    TriggerAdapter,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

mod config;
mod convert;
mod device_id;
mod grpc;
mod keystore;
mod sink;
mod tls;
mod watch;

use config::{AgentConfig, Overrides};
use device_id::DeviceIdStore;
use grpc::GrpcConnector;
use keystore::FileKeyStore;
use sink::{CertificateSink, RenewalScheduler};

/// Pending environment-change signals; more than this collapse into one.
const TRIGGER_CAPACITY: usize = 16;
/// Renewal never fires sooner than this after a certificate is stored.
const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(60);
/// Shortest wait for an in-flight attempt at shutdown; the RPC timeout
/// extends it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Definition
// ============================================================================

/// Gateway bootstrap agent
#[derive(Parser)]
#[command(name = "bootstrap-agent", version, about)]
struct Cli {
    /// Configuration file (default: agent.toml in the platform config directory)
    #[arg(long, env = "BOOTSTRAP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Controller host
    #[arg(long, env = "BOOTSTRAP_CONTROLLER", global = true)]
    controller: Option<String>,

    /// Controller port
    #[arg(long, env = "BOOTSTRAP_PORT", global = true)]
    port: Option<u16>,

    /// PEM bundle of trusted controller CAs
    #[arg(long, env = "BOOTSTRAP_TRUST_ROOTS", global = true)]
    trust_roots: Option<PathBuf>,

    /// Directory for keys, device id and certificates
    #[arg(long, env = "BOOTSTRAP_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap now, then again on every trigger (default if no command given)
    Run,

    /// Run a single attempt; exit status reflects the outcome
    Once,

    /// Create the hardware key if absent and print its public key
    Provision,

    /// Print the device id and hardware key fingerprint
    Identity,
}

impl Commands {
    fn needs_controller(&self) -> bool {
        matches!(self, Self::Run | Self::Once)
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = run(cli).await;

    if let Err(e) = &result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Run);

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    config.apply_overrides(Overrides {
        controller: cli.controller,
        port: cli.port,
        trust_roots: cli.trust_roots,
        data_dir: cli.data_dir,
    });
    config
        .validate(command.needs_controller())
        .context("Invalid configuration")?;

    match command {
        Commands::Run => cmd_run(config).await,
        Commands::Once => cmd_once(config).await,
        Commands::Provision => cmd_provision(&config),
        Commands::Identity => cmd_identity(&config),
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Engine plus the receiving end of its outcome channel.
struct Agent {
    engine: BootstrapEngine<GrpcConnector>,
    outcomes: mpsc::UnboundedReceiver<ConsumerEvent>,
    sink: CertificateSink,
}

impl Agent {
    fn build(config: &AgentConfig) -> Result<Self> {
        let trust_roots = config
            .trust_roots
            .clone()
            .context("trust_roots must be set to reach the controller")?;

        let custodian = open_custodian(config)?;
        let device_id =
            DeviceIdStore::new(&config.data_dir).resolve(config.device_id.as_deref())?;
        let connector = GrpcConnector::new(config.endpoint(), trust_roots, config.rpc_timeout());
        let (consumer, outcomes) = ChannelConsumer::new();

        tracing::info!(
            device_id = %device_id,
            controller = %connector.endpoint(),
            hardware_alias = %config.hardware_alias,
            "Bootstrap agent configured"
        );

        let engine = BootstrapEngine::builder(
            connector,
            custodian,
            Arc::new(device_id),
            Arc::new(consumer),
        )
        .config(config.engine_config())
        .build();

        Ok(Self {
            engine,
            outcomes,
            sink: CertificateSink::new(config.cert_dir()),
        })
    }
}

fn open_custodian(config: &AgentConfig) -> Result<Arc<KeyCustodian>> {
    let store = FileKeyStore::open(config.key_dir())
        .with_context(|| format!("Failed to open key store at {}", config.key_dir().display()))?;
    Ok(Arc::new(KeyCustodian::new(Arc::new(store))))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(config: AgentConfig) -> Result<()> {
    let Agent {
        engine,
        outcomes,
        sink,
    } = Agent::build(&config)?;

    let (trigger_tx, trigger_rx) = broadcast::channel(TRIGGER_CAPACITY);
    let adapter = TriggerAdapter::subscribe(engine.clone(), trigger_rx);

    #[cfg(unix)]
    let sighup =
        watch::spawn_sighup(trigger_tx.clone()).context("Failed to install SIGHUP handler")?;

    let poller = config.poll_interval().map(|interval| {
        let target = config.authority();
        tracing::info!(interval_secs = interval.as_secs(), "Polling local addresses");
        watch::spawn_address_poller(target, interval, trigger_tx.clone())
    });

    let renewal =
        RenewalScheduler::new(trigger_tx.clone(), config.renew_before(), MIN_RENEWAL_DELAY);
    let sink_task = tokio::spawn(sink.run(outcomes, renewal));

    if engine.trigger().is_none() {
        tracing::debug!("Initial attempt already in flight");
    }

    shutdown_signal().await;

    adapter.shutdown().await;
    #[cfg(unix)]
    sighup.abort();
    if let Some(poller) = poller {
        poller.abort();
    }

    if engine.is_in_flight() {
        tracing::info!("Waiting for in-flight attempt");
        let mut state = engine.state();
        let idle = state.wait_for(|state| *state == AttemptState::Idle);
        if tokio::time::timeout(shutdown_grace(&config), idle).await.is_err() {
            tracing::warn!("In-flight attempt did not finish before shutdown");
        }
    }

    drop(engine);
    sink_task.abort();
    tracing::info!("Bootstrap agent stopped");
    Ok(())
}

fn shutdown_grace(config: &AgentConfig) -> Duration {
    config.rpc_timeout().max(SHUTDOWN_GRACE)
}

async fn cmd_once(config: AgentConfig) -> Result<()> {
    let Agent {
        engine,
        mut outcomes,
        sink,
    } = Agent::build(&config)?;

    let outcome = engine
        .run_once()
        .await
        .context("An attempt is already in flight")?;

    // The consumer has been called by now; persist what it received.
    while let Ok(event) = outcomes.try_recv() {
        sink.handle(event);
    }

    match outcome {
        Ok(receipt) => {
            println!("Bootstrapped: certificate for {}", receipt.enrollment_alias);
            if let Some(not_after) = receipt.not_after {
                println!("  Valid until: {}", not_after.to_rfc3339());
            }
            Ok(())
        }
        Err(kind) => bail!("Bootstrap failed: {kind}"),
    }
}

fn cmd_provision(config: &AgentConfig) -> Result<()> {
    let custodian = open_custodian(config)?;
    let provisioning = custodian
        .provision_hardware_key(&config.hardware_alias, KeyAlgorithm::EcdsaP256Sha256)
        .context("Failed to provision hardware key")?;

    let public_key = provisioning.public_key();
    match &provisioning {
        Provisioning::Created(_) => println!("Created hardware key {}", config.hardware_alias),
        Provisioning::Existing(_) => {
            println!("Hardware key {} already exists", config.hardware_alias)
        }
    }
    println!("Fingerprint: {}", Fingerprint::from_public_key(public_key));
    print!(
        "{}",
        public_key
            .to_public_key_pem()
            .context("Failed to encode public key")?
    );
    Ok(())
}

fn cmd_identity(config: &AgentConfig) -> Result<()> {
    let device_id =
        DeviceIdStore::new(&config.data_dir).resolve(config.device_id.as_deref())?;
    println!("Device ID: {device_id}");

    let custodian = open_custodian(config)?;
    match custodian
        .hardware_public_key(&config.hardware_alias)
        .context("Failed to read hardware key")?
    {
        Some(public_key) => println!(
            "Hardware key: {} ({})",
            Fingerprint::from_public_key(&public_key),
            public_key.algorithm()
        ),
        None => println!("Hardware key: not provisioned (run `bootstrap-agent provision`)"),
    }
    Ok(())
}

// ============================================================================
// Signals
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bootstrap_auth::identity::{EcdsaSignature, PublicKey};
    use bootstrap_core::{
        Challenge, ChallengeResponse, ChannelConnector, ChannelError, DeviceId, ErrorKind,
        SecureChannel, SignedCertificate,
    };
    use prost::Message;

    const CHALLENGE: &[u8] = &[0xA1, 0xB2, 0xC3];

    /// Controller double that sees exactly the bytes the gRPC client would send.
    #[derive(Clone)]
    struct WireController {
        hardware_key: PublicKey,
        received: Arc<Mutex<Vec<bootstrap_proto::Response>>>,
        reject: bool,
    }

    #[async_trait]
    impl ChannelConnector for WireController {
        type Channel = WireController;

        async fn connect(&self) -> Result<WireController, ChannelError> {
            Ok(self.clone())
        }
    }

    #[async_trait]
    impl SecureChannel for WireController {
        async fn request_challenge(
            &self,
            device_id: &DeviceId,
        ) -> Result<Challenge, ChannelError> {
            let request = convert::gateway_id(device_id).encode_to_vec();
            let request = bootstrap_proto::AccessGatewayId::decode(request.as_slice())
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
            assert_eq!(request.id, device_id.as_str());

            convert::challenge_from_proto(bootstrap_proto::Challenge {
                key_type: bootstrap_proto::challenge_key::KeyType::SoftwareEcdsaSha256 as i32,
                challenge: CHALLENGE.to_vec(),
            })
        }

        async fn submit_response(
            &self,
            response: &ChallengeResponse,
        ) -> Result<SignedCertificate, ChannelError> {
            let bytes = convert::response_to_proto(response).encode_to_vec();
            let decoded = bootstrap_proto::Response::decode(bytes.as_slice())
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
            self.received.lock().unwrap().push(decoded.clone());

            if self.reject {
                return Err(convert::classify_status(tonic::Status::permission_denied(
                    "unknown gateway",
                )));
            }

            let Some(bootstrap_proto::response::Response::EcdsaResponse(ecdsa)) = decoded.response
            else {
                return Err(ChannelError::Rejected("expected an ECDSA response".to_string()));
            };
            let signature = EcdsaSignature::from_scalars(&ecdsa.r, &ecdsa.s)
                .map_err(|e| ChannelError::Rejected(e.to_string()))?;
            if !self.hardware_key.verify(&decoded.challenge, &signature) {
                return Err(ChannelError::Rejected("bad challenge signature".to_string()));
            }

            Ok(convert::certificate_from_proto(bootstrap_proto::Certificate {
                cert_der: b"CERT_BYTES".to_vec(),
                ..Default::default()
            }))
        }
    }

    struct Setup {
        _dir: tempfile::TempDir,
        config: AgentConfig,
        controller: WireController,
    }

    fn setup(reject: bool) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            data_dir: dir.path().to_path_buf(),
            trust_roots: Some(dir.path().join("roots.pem")),
            ..AgentConfig::default()
        };

        let custodian = open_custodian(&config).unwrap();
        let provisioning = custodian
            .provision_hardware_key(&config.hardware_alias, KeyAlgorithm::EcdsaP256Sha256)
            .unwrap();

        let controller = WireController {
            hardware_key: provisioning.public_key().clone(),
            received: Arc::new(Mutex::new(Vec::new())),
            reject,
        };
        Setup {
            _dir: dir,
            config,
            controller,
        }
    }

    fn build_engine(
        setup: &Setup,
    ) -> (BootstrapEngine<WireController>, mpsc::UnboundedReceiver<ConsumerEvent>) {
        let config = &setup.config;
        let device_id = DeviceIdStore::new(&config.data_dir).resolve(None).unwrap();
        let (consumer, outcomes) = ChannelConsumer::new();
        let engine = BootstrapEngine::builder(
            setup.controller.clone(),
            open_custodian(config).unwrap(),
            Arc::new(device_id),
            Arc::new(consumer),
        )
        .config(config.engine_config())
        .build();
        (engine, outcomes)
    }

    #[tokio::test]
    async fn test_bootstrap_over_the_wire_format() {
        let setup = setup(false);
        let (engine, mut outcomes) = build_engine(&setup);
        let sink = CertificateSink::new(setup.config.cert_dir());

        let receipt = engine.run_once().await.unwrap().unwrap();
        assert_eq!(receipt.certificate.der(), b"CERT_BYTES");
        assert_eq!(receipt.not_after, None);

        let stored = sink.handle(outcomes.try_recv().unwrap()).unwrap();
        assert_eq!(stored.path, setup.config.cert_dir().join("csrKey.der"));
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"CERT_BYTES");

        let device_id = std::fs::read_to_string(setup.config.data_dir.join("device_id")).unwrap();
        let received = setup.controller.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        let request = &received[0];
        assert_eq!(request.challenge, CHALLENGE);
        assert_eq!(
            request.hw_id.as_ref().map(|id| id.id.as_str()),
            Some(device_id.trim())
        );

        let csr = request.csr.as_ref().unwrap();
        assert!(!csr.csr_der.is_empty());
        assert_eq!(csr.cert_type, 0);
        assert_eq!(csr.valid_time.as_ref().map(|t| t.seconds), Some(10_000));

        // The enrollment key lives on disk next to the hardware key.
        assert!(setup.config.key_dir().join("csrKey.pk8").exists());
        assert!(setup.config.key_dir().join("hwKey.pk8").exists());
    }

    #[tokio::test]
    async fn test_rejection_erases_enrollment_key() {
        let setup = setup(true);
        let (engine, mut outcomes) = build_engine(&setup);

        let outcome = engine.run_once().await.unwrap();

        assert_eq!(outcome.unwrap_err(), ErrorKind::RejectedByController);
        assert_eq!(
            outcomes.try_recv().unwrap(),
            ConsumerEvent::Failed(ErrorKind::RejectedByController)
        );
        assert!(!setup.config.key_dir().join("csrKey.pk8").exists());
        assert!(setup.config.key_dir().join("hwKey.pk8").exists());
    }

    #[tokio::test]
    async fn test_missing_hardware_key_is_identity_unavailable() {
        let setup = setup(false);
        std::fs::remove_file(setup.config.key_dir().join("hwKey.pk8")).unwrap();
        let (engine, _outcomes) = build_engine(&setup);

        let outcome = engine.run_once().await.unwrap();

        assert_eq!(outcome.unwrap_err(), ErrorKind::IdentityUnavailable);
        assert!(setup.controller.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "bootstrap-agent",
            "--controller",
            "controller.example.org",
            "--port",
            "8443",
            "once",
        ])
        .unwrap();
        assert_eq!(cli.controller.as_deref(), Some("controller.example.org"));
        assert_eq!(cli.port, Some(8443));
        assert!(matches!(cli.command, Some(Commands::Once)));

        let cli = Cli::try_parse_from(["bootstrap-agent"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_shutdown_waits_at_least_one_rpc_timeout() {
        let mut config = AgentConfig::default();
        assert_eq!(shutdown_grace(&config), Duration::from_secs(30));

        config.rpc_timeout_secs = 2;
        assert_eq!(shutdown_grace(&config), SHUTDOWN_GRACE);
    }

    #[test]
    fn test_only_controller_commands_need_trust_roots() {
        assert!(Commands::Run.needs_controller());
        assert!(Commands::Once.needs_controller());
        assert!(!Commands::Provision.needs_controller());
        assert!(!Commands::Identity.needs_controller());
    }
}
