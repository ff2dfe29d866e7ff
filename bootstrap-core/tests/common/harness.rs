//! Test doubles for engine tests.
//!
//! Every collaborator is a plain struct implementing the core trait, with
//! counters and recorders the tests assert on.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bootstrap_auth::identity::{EcdsaSignature, KeyAlgorithm, PrivateKey, PublicKey};
use bootstrap_auth::store::{KeyStore, MemoryKeyStore, StoreError};
use bootstrap_core::{
    AttemptEvent, AttemptObserver, AttemptState, BootstrapConsumer, BootstrapEngine, Challenge,
    ChallengeResponse, ChannelConnector, ChannelError, ConsumerEvent, DeviceId, ErrorKind,
    KeyCustodian, KeyType, SecureChannel, SignedCertificate,
};
use rcgen::{CertificateParams, DnType, KeyPair, RemoteKeyPair, SignatureAlgorithm};
use tokio::sync::Notify;

pub const DEVICE_ID: &str = "gw-1234";
pub const HARDWARE_ALIAS: &str = "hwKey";
pub const ENROLLMENT_ALIAS: &str = "csrKey";
pub const CHALLENGE: &[u8] = &[0xA1, 0xB2];
pub const CERT_BYTES: &[u8] = b"CERT_BYTES";

// ============================================================================
// Key store
// ============================================================================

/// In-memory store with fault injection and call counters.
///
/// A real hardware key is provisioned on construction.
pub struct TestKeyStore {
    inner: MemoryKeyStore,
    fixed_hardware_signature: Option<EcdsaSignature>,
    hardware_sign_failures: AtomicUsize,
    generate_unavailable: AtomicBool,
    pub hardware_sign_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub erased: Mutex<Vec<String>>,
}

impl TestKeyStore {
    pub fn new() -> Self {
        let inner = MemoryKeyStore::new();
        inner
            .insert(HARDWARE_ALIAS, PrivateKey::generate())
            .expect("fresh store");
        Self::from_store(inner)
    }

    /// A store with no hardware key provisioned.
    pub fn without_hardware_key() -> Self {
        Self::from_store(MemoryKeyStore::new())
    }

    fn from_store(inner: MemoryKeyStore) -> Self {
        Self {
            inner,
            fixed_hardware_signature: None,
            hardware_sign_failures: AtomicUsize::new(0),
            generate_unavailable: AtomicBool::new(false),
            hardware_sign_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            erased: Mutex::new(Vec::new()),
        }
    }

    /// Hardware key signs every challenge to this fixed signature.
    pub fn with_fixed_hardware_signature(mut self, signature: EcdsaSignature) -> Self {
        self.fixed_hardware_signature = Some(signature);
        self
    }

    /// The next `count` hardware signatures fail with a crypto error.
    pub fn failing_hardware_signs(self, count: usize) -> Self {
        self.hardware_sign_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_generate_unavailable(self) -> Self {
        self.generate_unavailable.store(true, Ordering::SeqCst);
        self
    }

    pub fn hardware_public_key(&self) -> PublicKey {
        self.inner
            .lookup(HARDWARE_ALIAS)
            .unwrap()
            .expect("hardware key provisioned")
    }

    pub fn enrollment_key(&self) -> Option<PublicKey> {
        self.inner.lookup(ENROLLMENT_ALIAS).unwrap()
    }

    pub fn hardware_sign_calls(&self) -> usize {
        self.hardware_sign_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl KeyStore for TestKeyStore {
    fn lookup(&self, alias: &str) -> Result<Option<PublicKey>, StoreError> {
        self.inner.lookup(alias)
    }

    fn generate(&self, alias: &str, algorithm: KeyAlgorithm) -> Result<PublicKey, StoreError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.generate_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("secure element offline".to_string()));
        }
        self.inner.generate(alias, algorithm)
    }

    fn sign(&self, alias: &str, message: &[u8]) -> Result<EcdsaSignature, StoreError> {
        if alias == HARDWARE_ALIAS {
            self.hardware_sign_calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.hardware_sign_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.hardware_sign_failures
                    .store(failures - 1, Ordering::SeqCst);
                return Err(StoreError::Crypto("injected signing failure".to_string()));
            }
            if let Some(signature) = &self.fixed_hardware_signature {
                return Ok(signature.clone());
            }
        }
        self.inner.sign(alias, message)
    }

    fn erase(&self, alias: &str) -> Result<(), StoreError> {
        self.erased.lock().unwrap().push(alias.to_string());
        self.inner.erase(alias)
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// rcgen key pair that signs through a key store.
struct StoreKeyPair {
    store: Arc<dyn KeyStore>,
    alias: String,
    public_key: Vec<u8>,
}

impl RemoteKeyPair for StoreKeyPair {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.store
            .sign(&self.alias, msg)
            .ok()
            .and_then(|signature| signature.to_der().ok())
            .ok_or(rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &rcgen::PKCS_ECDSA_P256_SHA256
    }
}

/// Self-signed certificate for the key under `alias` in `store`.
pub fn certificate_for(store: Arc<dyn KeyStore>, alias: &str) -> Vec<u8> {
    let public_key = store
        .lookup(alias)
        .unwrap()
        .expect("key to certify")
        .to_sec1_bytes();
    let key_pair = KeyPair::from_remote(Box::new(StoreKeyPair {
        store,
        alias: alias.to_string(),
        public_key,
    }))
    .unwrap();

    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, DEVICE_ID);
    params.not_before = rcgen::date_time_ymd(2026, 1, 1);
    params.not_after = rcgen::date_time_ymd(2030, 1, 1);
    params.self_signed(&key_pair).unwrap().der().to_vec()
}

// ============================================================================
// Controller
// ============================================================================

type Responder =
    Box<dyn Fn(&ChallengeResponse) -> Result<SignedCertificate, ChannelError> + Send + Sync>;

/// Scripted controller shared by every channel its connector opens.
pub struct MockController {
    connect_error: Option<ChannelError>,
    challenge: Result<Challenge, ChannelError>,
    responder: Responder,
    gate: Option<Arc<Notify>>,
    submit_gate: Option<Arc<Notify>>,
    pub connects: AtomicUsize,
    pub challenge_requests: Mutex<Vec<DeviceId>>,
    pub submissions: Mutex<Vec<ChallengeResponse>>,
}

impl MockController {
    /// Issues `CHALLENGE` for ECDSA and answers every submission with
    /// `CERT_BYTES`.
    pub fn new() -> Self {
        Self {
            connect_error: None,
            challenge: Ok(Challenge::new(KeyType::SoftwareEcdsaSha256, CHALLENGE)),
            responder: Box::new(|_| Ok(SignedCertificate::new(CERT_BYTES))),
            gate: None,
            submit_gate: None,
            connects: AtomicUsize::new(0),
            challenge_requests: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_connect_error(mut self, error: ChannelError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn with_challenge(mut self, challenge: Result<Challenge, ChannelError>) -> Self {
        self.challenge = challenge;
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&ChallengeResponse) -> Result<SignedCertificate, ChannelError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    /// Challenge requests wait until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Submissions wait until `gate` is notified.
    pub fn with_submit_gate(mut self, gate: Arc<Notify>) -> Self {
        self.submit_gate = Some(gate);
        self
    }

    pub fn submissions(&self) -> Vec<ChallengeResponse> {
        self.submissions.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub struct MockConnector(pub Arc<MockController>);

pub struct MockChannel(Arc<MockController>);

#[async_trait]
impl ChannelConnector for MockConnector {
    type Channel = MockChannel;

    async fn connect(&self) -> Result<MockChannel, ChannelError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        match &self.0.connect_error {
            Some(error) => Err(error.clone()),
            None => Ok(MockChannel(Arc::clone(&self.0))),
        }
    }
}

#[async_trait]
impl SecureChannel for MockChannel {
    async fn request_challenge(&self, device_id: &DeviceId) -> Result<Challenge, ChannelError> {
        self.0
            .challenge_requests
            .lock()
            .unwrap()
            .push(device_id.clone());
        if let Some(gate) = &self.0.gate {
            gate.notified().await;
        }
        self.0.challenge.clone()
    }

    async fn submit_response(
        &self,
        response: &ChallengeResponse,
    ) -> Result<SignedCertificate, ChannelError> {
        self.0.submissions.lock().unwrap().push(response.clone());
        if let Some(gate) = &self.0.submit_gate {
            gate.notified().await;
        }
        (self.0.responder)(response)
    }
}

// ============================================================================
// Consumer and observer
// ============================================================================

/// Records every outcome, plus whether the enrollment key was still in the
/// store when the callback ran.
pub struct RecordingConsumer {
    store: Arc<TestKeyStore>,
    pub events: Mutex<Vec<ConsumerEvent>>,
    pub enrollment_key_at_callback: Mutex<Vec<bool>>,
}

impl RecordingConsumer {
    pub fn new(store: Arc<TestKeyStore>) -> Self {
        Self {
            store,
            events: Mutex::new(Vec::new()),
            enrollment_key_at_callback: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: ConsumerEvent) {
        self.enrollment_key_at_callback
            .lock()
            .unwrap()
            .push(self.store.enrollment_key().is_some());
        self.events.lock().unwrap().push(event);
    }
}

impl BootstrapConsumer for RecordingConsumer {
    fn on_bootstrapped(&self, certificate: SignedCertificate, enrollment_alias: &str) {
        self.record(ConsumerEvent::Bootstrapped {
            certificate,
            enrollment_alias: enrollment_alias.to_string(),
        });
    }

    fn on_bootstrap_failed(&self, reason: ErrorKind) {
        self.record(ConsumerEvent::Failed(reason));
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<AttemptEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Every state entered, in order.
    pub fn states(&self) -> Vec<AttemptState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AttemptEvent::Transition { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn sign_retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, AttemptEvent::SignRetry { .. }))
            .count()
    }
}

impl AttemptObserver for RecordingObserver {
    fn observe(&self, event: &AttemptEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// An engine wired to test doubles.
pub struct Fixture {
    pub store: Arc<TestKeyStore>,
    pub controller: Arc<MockController>,
    pub consumer: Arc<RecordingConsumer>,
    pub observer: Arc<RecordingObserver>,
    pub engine: BootstrapEngine<MockConnector>,
}

impl Fixture {
    pub fn new(store: TestKeyStore, controller: MockController) -> Self {
        Self::with_shared_store(Arc::new(store), controller)
    }

    /// For controllers whose responder needs the store.
    pub fn with_shared_store(store: Arc<TestKeyStore>, controller: MockController) -> Self {
        let controller = Arc::new(controller);
        let consumer = Arc::new(RecordingConsumer::new(Arc::clone(&store)));
        let observer = Arc::new(RecordingObserver::default());

        let custodian = Arc::new(KeyCustodian::new(store.clone()));
        let engine = BootstrapEngine::builder(
            MockConnector(Arc::clone(&controller)),
            custodian,
            Arc::new(DeviceId::new(DEVICE_ID)),
            consumer.clone(),
        )
        .observer(observer.clone())
        .build();

        Self {
            store,
            controller,
            consumer,
            observer,
            engine,
        }
    }

    pub fn happy() -> Self {
        Self::new(TestKeyStore::new(), MockController::new())
    }
}
