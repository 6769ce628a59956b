//! Mock AMF for integration testing
//!
//! Serves one gNB association, normally the far end of a
//! [`MemoryTransport`] pair. A single task reads the association and runs
//! the network side of each procedure:
//!
//! - NG Setup, answered with a response or the configured failure
//! - registration: SUCI deconcealment, 5G-AKA against the provisioned
//!   subscriber, NAS security mode, then Initial Context Setup carrying the
//!   Registration Accept
//! - PDU session establishment: an address from the pool and a PDU Session
//!   Resource Setup whose NAS PDU is the protected accept
//! - service request, deregistration, UE context release
//! - path switch with fresh uplink TEIDs, NG Reset in both directions
//!
//! Everything observable is pushed to [`MockAmf::events`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use coretester_common::{
    log_nas_message, log_ngap_message, Direction, FrameQueue, Guti, OpType, Plmn, SNssai, Supi, Tai, UeConfig,
    WaitError,
};
use coretester_crypto::kdf::{derive_aka_keys, derive_algorithm_key, derive_kgnb, kdf, sha256, ACCESS_TYPE_3GPP};
use coretester_crypto::sidf::deconceal;
use coretester_crypto::{
    AlgorithmKind, CipheringAlgorithm, HomeNetworkPrivateKey, IntegrityAlgorithm, KdfError, Milenage, MilenageError,
    SidfError, Suci,
};
use coretester_nas::{
    peek_security_header_type, AuthenticationFailure, AuthenticationReject, AuthenticationRequest,
    AuthenticationResponse, CodecError, DeregistrationAcceptUeOriginating, DeregistrationRequestUeOriginating,
    DlNasTransport, IdentityRequest, IdentityType, MmCause, MmMessage, MobileIdentity, NasCount, NasDirection,
    NasKeySetIdentifier, NasMessage, NasSecurityAlgorithms, PayloadContainerType, PduAddress,
    PduSessionEstablishmentAccept, PduSessionType, ProtectionParams, ProtocolConfigurationOptions,
    QosFlowDescription, QosRule, RegistrationAccept, RegistrationRequest, SecuredNasMessage, SecurityError,
    SecurityHeaderType, SecurityModeCommand, SecurityModeComplete, ServiceAccept, SessionAmbr, SmMessage,
    UeSecurityCapability, UlNasTransport,
};
use coretester_ngap::ies::{Cause, GtpTunnel, Guami, SecurityContext, UeSecurityCapabilities};
use coretester_ngap::procedures::{
    build_downlink_nas_transport, build_initial_context_setup_request, build_ng_reset, build_ng_reset_acknowledge,
    build_ng_setup_failure, build_ng_setup_response, build_paging, build_path_switch_request_acknowledge,
    build_path_switch_request_failure, build_pdu_session_resource_setup_request, build_ue_context_release_command,
    parse_error_indication, parse_initial_context_setup_response, parse_initial_ue_message, parse_ng_reset,
    parse_ng_reset_acknowledge, parse_ng_setup_request, parse_path_switch_request,
    parse_pdu_session_resource_setup_response, parse_ue_context_release_complete, parse_ue_context_release_request,
    parse_uplink_nas_transport, DownlinkNasTransportParams, InitialContextSetupRequestParams, NgResetAcknowledgeData,
    NgResetParams, NgSetupFailureData, NgSetupResponseData, PagingParams, PathSwitchRequestAcknowledgeParams,
    PathSwitchRequestFailureParams, PduSessionResourceSetupItem, PduSessionResourceSetupRequestParams,
    PduSessionResourceSetupResponseItem, PduSessionTransferItem, PlmnSupportItem, ResetType, ServedGuamiItem,
    UeContextReleaseCommandParams, UeNgapIds,
};
use coretester_ngap::transfer::{
    decode_pdu_session_resource_setup_response_transfer, encode_cause_transfer,
    encode_path_switch_request_acknowledge_transfer, encode_pdu_session_resource_setup_request_transfer,
    NgapPduSessionType, PathSwitchRequestAcknowledgeTransfer, PduSessionResourceSetupRequestTransfer,
    QosFlowSetupRequestItem,
};
use coretester_ngap::{NgapError, NgapPdu, Presence, ProcedureCode};
use coretester_sctp::{MemoryTransport, NgapTransport, SctpError, NON_UE_STREAM};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::test_fixtures::{test_guami, test_slice, TEST_HANDOVER_UPF_ADDRESS, TEST_UE_IP_POOL, TEST_UPF_ADDRESS};

/// NAS cause group value "authentication failure"
const CAUSE_AUTHENTICATION_FAILURE: Cause = Cause::Nas(1);

/// FC value of the NH derivation (TS 33.501 A.10)
const FC_NH: u8 = 0x6F;

const DEFAULT_QFI: u8 = 1;
const DEFAULT_5QI: u8 = 9;

/// Mock AMF errors
#[derive(Debug, Error)]
pub enum MockAmfError {
    #[error("NGAP error: {0}")]
    Ngap(#[from] NgapError),
    #[error("NAS codec error: {0}")]
    Nas(#[from] CodecError),
    #[error("NAS security error: {0}")]
    Security(#[from] SecurityError),
    #[error("SCTP error: {0}")]
    Sctp(#[from] SctpError),
    #[error("key derivation failed: {0}")]
    Kdf(#[from] KdfError),
    #[error("SUCI deconcealment failed: {0}")]
    Sidf(#[from] SidfError),
    #[error("AUTS rejected: {0}")]
    Milenage(#[from] MilenageError),
    #[error("invalid subscriber: {0}")]
    Subscriber(#[from] coretester_common::Error),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error("unknown AMF-UE-NGAP-ID {0}")]
    UnknownUe(u64),
    #[error("no subscription for IMSI {0}")]
    UnknownSubscriber(String),
    #[error("AMF-UE-NGAP-ID {0} has no NAS security context")]
    NoSecurityContext(u64),
    #[error("unexpected {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, MockAmfError>;

/// PDU session as the mock AMF and its UPF see it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPduSession {
    pub psi: u8,
    pub ue_ip: Ipv4Addr,
    /// UPF side of the tunnel
    pub ul_teid: u32,
    /// gNB side, known once the gNB answered the setup
    pub dl_teid: Option<u32>,
    pub qfi: u8,
}

/// Events emitted by the mock AMF
#[derive(Debug, Clone, PartialEq)]
pub enum MockAmfEvent {
    NgSetup { ran_node_name: Option<String> },
    InitialUeMessage { ran_ue_ngap_id: u32, amf_ue_ngap_id: u64 },
    Authenticated { amf_ue_ngap_id: u64, supi: String },
    /// RES* did not match, or the UE reported a MAC failure
    AuthenticationRejected { amf_ue_ngap_id: u64, supi: String },
    Registered { amf_ue_ngap_id: u64, supi: String, guti: Guti },
    PduSessionEstablished { amf_ue_ngap_id: u64, session: MockPduSession },
    ServiceAccepted { amf_ue_ngap_id: u64 },
    PathSwitched { amf_ue_ngap_id: u64, ran_ue_ngap_id: u32, sessions: Vec<MockPduSession> },
    Deregistered { amf_ue_ngap_id: u64 },
    ContextReleased { amf_ue_ngap_id: u64 },
    /// NG Reset from the gNB; `connections` is 0 for a whole-interface reset
    NgReset { whole_interface: bool, connections: usize },
    NgResetAcknowledged { connections: usize },
    ErrorIndication { cause: Option<Cause> },
    HandlerFailed { message: String, error: String },
}

/// Mock AMF configuration
#[derive(Debug, Clone)]
pub struct MockAmfConfig {
    pub amf_name: String,
    pub guami: Guami,
    pub tac: u32,
    pub slices: Vec<SNssai>,
    pub relative_capacity: u8,
    /// Serving network name used to derive XRES* and Kamf
    pub serving_network_name: String,
    /// Answer NG Setup with a failure carrying this cause
    pub ng_setup_failure: Option<Cause>,
    /// SIDF key for SUCIs concealed with Profile A or B
    pub home_network_key: Option<HomeNetworkPrivateKey>,
    pub integrity: IntegrityAlgorithm,
    pub ciphering: CipheringAlgorithm,
    pub upf_address: IpAddr,
    /// UPF named in the Path Switch Request Acknowledge
    pub handover_upf_address: IpAddr,
    /// Addresses are handed out from this network upwards
    pub ue_ip_pool: Ipv4Addr,
    /// Link MTU sent in the extended PCO
    pub mtu: u16,
    /// Answer every path switch with a failure
    pub reject_path_switch: bool,
}

impl Default for MockAmfConfig {
    fn default() -> Self {
        let guami = test_guami();
        Self {
            amf_name: "coretester-mock-amf".to_string(),
            serving_network_name: guami.plmn.serving_network_name(),
            guami,
            tac: 1,
            slices: vec![test_slice()],
            relative_capacity: 255,
            ng_setup_failure: None,
            home_network_key: None,
            integrity: IntegrityAlgorithm::Nia2,
            ciphering: CipheringAlgorithm::Nea2,
            upf_address: TEST_UPF_ADDRESS,
            handover_upf_address: TEST_HANDOVER_UPF_ADDRESS,
            ue_ip_pool: TEST_UE_IP_POOL,
            mtu: 1400,
            reject_path_switch: false,
        }
    }
}

impl MockAmfConfig {
    fn plmn(&self) -> Plmn {
        self.guami.plmn
    }
}

/// Snapshot of one UE context in the mock AMF
#[derive(Debug, Clone)]
pub struct MockUeContext {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    /// IMSI digits, once identified
    pub supi: Option<String>,
    pub guti: Option<Guti>,
    pub registered: bool,
    /// Whether the UE-associated NG connection is up
    pub connected: bool,
    pub pdu_sessions: Vec<MockPduSession>,
}

struct Subscriber {
    key: [u8; 16],
    op: [u8; 16],
    op_type: OpType,
    amf: [u8; 2],
    /// Next SQN to put in a challenge
    sqn: [u8; 6],
}

impl Subscriber {
    fn milenage(&self) -> Milenage {
        match self.op_type {
            OpType::Opc => Milenage::new(&self.key, &self.op),
            OpType::Op => Milenage::with_op(&self.key, &self.op),
        }
    }
}

fn next_sqn(sqn: [u8; 6]) -> [u8; 6] {
    let mut wide = [0u8; 8];
    wide[2..].copy_from_slice(&sqn);
    let next = (u64::from_be_bytes(wide) + 1) & 0xFFFF_FFFF_FFFF;
    let mut out = [0u8; 6];
    out.copy_from_slice(&next.to_be_bytes()[2..]);
    out
}

struct PendingChallenge {
    xres_star: [u8; 16],
    kamf: [u8; 32],
}

/// Network side of a NAS security context.
struct NasSecurity {
    integrity: IntegrityAlgorithm,
    ciphering: CipheringAlgorithm,
    k_nas_int: [u8; 16],
    k_nas_enc: [u8; 16],
    ul_count: NasCount,
    dl_count: NasCount,
}

impl NasSecurity {
    fn new(kamf: &[u8; 32], integrity: IntegrityAlgorithm, ciphering: CipheringAlgorithm) -> Result<Self> {
        Ok(Self {
            integrity,
            ciphering,
            k_nas_int: derive_algorithm_key(kamf, AlgorithmKind::NasInt, integrity.id())?,
            k_nas_enc: derive_algorithm_key(kamf, AlgorithmKind::NasEnc, ciphering.id())?,
            ul_count: NasCount::default(),
            dl_count: NasCount::default(),
        })
    }

    fn params(&self, count: NasCount, direction: NasDirection) -> ProtectionParams<'_> {
        ProtectionParams {
            integrity: self.integrity,
            ciphering: self.ciphering,
            k_nas_int: &self.k_nas_int,
            k_nas_enc: &self.k_nas_enc,
            count,
            direction,
        }
    }

    fn protect(&mut self, plain: &[u8], header_type: SecurityHeaderType) -> Result<Vec<u8>> {
        let secured = SecuredNasMessage::protect(plain, header_type, &self.params(self.dl_count, NasDirection::Downlink))?;
        self.dl_count.increment();
        Ok(secured.encode())
    }

    fn unprotect(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let secured = SecuredNasMessage::decode(data)?;
        self.ul_count.track_received(secured.header.sequence_number);
        let params = self.params(self.ul_count, NasDirection::Uplink);
        secured.verify(&params)?;
        Ok(secured.into_plain(&params))
    }
}

struct AmfUe {
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
    stream_id: u16,
    connected: bool,
    supi: Option<String>,
    capability: Option<UeSecurityCapability>,
    challenge: Option<PendingChallenge>,
    kamf: Option<[u8; 32]>,
    kgnb: Option<[u8; 32]>,
    security: Option<NasSecurity>,
    guti: Option<Guti>,
    registered: bool,
    sessions: Vec<MockPduSession>,
}

impl AmfUe {
    fn new(amf_ue_ngap_id: u64, ran_ue_ngap_id: u32, stream_id: u16) -> Self {
        Self {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
            stream_id,
            connected: true,
            supi: None,
            capability: None,
            challenge: None,
            kamf: None,
            kgnb: None,
            security: None,
            guti: None,
            registered: false,
            sessions: Vec::new(),
        }
    }

    /// Takes over what a context from an earlier connection knew.
    fn resume(&mut self, previous: AmfUe) {
        self.supi = previous.supi;
        self.capability = previous.capability;
        self.kamf = previous.kamf;
        self.kgnb = previous.kgnb;
        self.security = previous.security;
        self.guti = previous.guti;
        self.registered = previous.registered;
        self.sessions = previous.sessions;
    }

    fn snapshot(&self) -> MockUeContext {
        MockUeContext {
            amf_ue_ngap_id: self.amf_ue_ngap_id,
            ran_ue_ngap_id: self.ran_ue_ngap_id,
            supi: self.supi.clone(),
            guti: self.guti,
            registered: self.registered,
            connected: self.connected,
            pdu_sessions: self.sessions.clone(),
        }
    }

    fn security(&mut self) -> Result<&mut NasSecurity> {
        let id = self.amf_ue_ngap_id;
        self.security.as_mut().ok_or(MockAmfError::NoSecurityContext(id))
    }

    fn session_mut(&mut self, psi: u8) -> Option<&mut MockPduSession> {
        self.sessions.iter_mut().find(|s| s.psi == psi)
    }
}

/// Mock AMF state
struct MockAmfState {
    ues: HashMap<u64, AmfUe>,
    /// Keyed by IMSI digits
    subscribers: HashMap<String, Subscriber>,
    next_amf_ue_ngap_id: u64,
    next_tmsi: u32,
    next_ul_teid: u32,
    next_host: u32,
}

impl MockAmfState {
    fn ue(&mut self, amf_ue_ngap_id: u64) -> Result<&mut AmfUe> {
        self.ues.get_mut(&amf_ue_ngap_id).ok_or(MockAmfError::UnknownUe(amf_ue_ngap_id))
    }

    fn allocate_ul_teid(&mut self) -> u32 {
        let teid = self.next_ul_teid;
        self.next_ul_teid += 1;
        teid
    }

    /// Earlier context whose GUTI carries `tmsi`.
    fn take_by_tmsi(&mut self, tmsi: u32) -> Option<AmfUe> {
        let id = self
            .ues
            .values()
            .find(|ue| ue.guti.map(|g| g.tmsi) == Some(tmsi))
            .map(|ue| ue.amf_ue_ngap_id)?;
        self.ues.remove(&id)
    }
}

struct Inner {
    config: MockAmfConfig,
    transport: MemoryTransport,
    state: Mutex<MockAmfState>,
    events: FrameQueue<MockAmfEvent>,
}

/// Mock AMF for integration testing
pub struct MockAmf {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MockAmf {
    /// Starts serving `transport`. Must be called from a tokio runtime.
    pub fn start(config: MockAmfConfig, transport: MemoryTransport) -> Self {
        let inner = Arc::new(Inner {
            config,
            transport,
            state: Mutex::new(MockAmfState {
                ues: HashMap::new(),
                subscribers: HashMap::new(),
                next_amf_ue_ngap_id: 1,
                next_tmsi: 0xC000_0001,
                next_ul_teid: 0x1000_0000,
                next_host: 2,
            }),
            events: FrameQueue::new("mock AMF events"),
        });
        info!(amf = %inner.config.amf_name, "Mock AMF started");
        let task = tokio::spawn(Arc::clone(&inner).run());
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn config(&self) -> &MockAmfConfig {
        &self.inner.config
    }

    /// Provisions the subscriber with the credentials the UE holds.
    pub fn add_subscriber(&self, config: &UeConfig) -> Result<()> {
        let imsi = Supi::new(config.hplmn, &config.msin)?.imsi();
        self.inner.lock().subscribers.insert(
            imsi,
            Subscriber {
                key: config.key,
                op: config.op,
                op_type: config.op_type,
                amf: config.amf,
                sqn: config.sqn,
            },
        );
        Ok(())
    }

    pub fn events(&self) -> &FrameQueue<MockAmfEvent> {
        &self.inner.events
    }

    /// First event matching `predicate`; earlier events are dropped.
    pub async fn wait_for_event<F>(&self, predicate: F, timeout: Duration) -> Result<MockAmfEvent>
    where
        F: FnMut(&MockAmfEvent) -> bool,
    {
        Ok(self.inner.events.wait_for(predicate, timeout).await?)
    }

    pub fn ue_count(&self) -> usize {
        self.inner.lock().ues.len()
    }

    pub fn registered_count(&self) -> usize {
        self.inner.lock().ues.values().filter(|ue| ue.registered).count()
    }

    pub fn ue_context(&self, amf_ue_ngap_id: u64) -> Option<MockUeContext> {
        self.inner.lock().ues.get(&amf_ue_ngap_id).map(AmfUe::snapshot)
    }

    /// Context of the subscriber with these IMSI digits.
    pub fn ue_by_supi(&self, imsi: &str) -> Option<MockUeContext> {
        self.inner
            .lock()
            .ues
            .values()
            .find(|ue| ue.supi.as_deref() == Some(imsi))
            .map(AmfUe::snapshot)
    }

    pub fn ue_contexts(&self) -> Vec<MockUeContext> {
        self.inner.lock().ues.values().map(AmfUe::snapshot).collect()
    }

    /// AMF-initiated UE Context Release Command.
    pub async fn release_ue(&self, amf_ue_ngap_id: u64, cause: Cause) -> Result<()> {
        self.inner.release(amf_ue_ngap_id, cause).await
    }

    /// AMF-initiated NG Reset; the acknowledge shows up as an event.
    pub async fn ng_reset(&self, reset_type: ResetType) -> Result<()> {
        let pdu = build_ng_reset(&NgResetParams {
            cause: Cause::MISC_OM_INTERVENTION,
            reset_type,
        })?;
        self.inner.send(NON_UE_STREAM, &pdu).await
    }

    /// Pages the UE holding `guti` in the configured tracking area.
    pub async fn page(&self, guti: Guti) -> Result<()> {
        let pdu = build_paging(&PagingParams {
            ue_paging_identity: guti.s_tmsi(),
            paging_drx: None,
            tai_list: vec![Tai::new(self.inner.config.plmn(), self.inner.config.tac)],
        })?;
        self.inner.send(NON_UE_STREAM, &pdu).await
    }

    /// Closes the association and waits for the read task.
    pub async fn stop(&self) {
        if let Err(e) = self.inner.transport.close().await {
            warn!(error = %e, "Failed to close mock AMF transport");
        }
        let task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Mock AMF task ended abnormally");
            }
        }
        info!("Mock AMF stopped");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MockAmfState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(self: Arc<Self>) {
        loop {
            let msg = match self.transport.recv().await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Mock AMF receive failed");
                    break;
                }
            };
            let pdu = match NgapPdu::decode(&msg.data) {
                Ok(pdu) => pdu,
                Err(e) => {
                    warn!(error = %e, "Mock AMF dropping undecodable NGAP");
                    continue;
                }
            };
            log_ngap_message(Direction::Rx, &pdu.message_name(), &msg.data);
            if let Err(e) = self.dispatch(&pdu, msg.stream_id).await {
                warn!(message = %pdu.message_name(), error = %e, "Mock AMF handler failed");
                self.events.push(MockAmfEvent::HandlerFailed {
                    message: pdu.message_name(),
                    error: e.to_string(),
                });
            }
        }
        debug!("Mock AMF read task finished");
    }

    async fn dispatch(&self, pdu: &NgapPdu, stream_id: u16) -> Result<()> {
        match (pdu.presence, pdu.procedure_code) {
            (Presence::InitiatingMessage, ProcedureCode::NgSetup) => self.handle_ng_setup(pdu).await,
            (Presence::InitiatingMessage, ProcedureCode::InitialUeMessage) => {
                self.handle_initial_ue_message(pdu, stream_id).await
            }
            (Presence::InitiatingMessage, ProcedureCode::UplinkNasTransport) => {
                let msg = parse_uplink_nas_transport(pdu)?;
                {
                    let mut state = self.lock();
                    let ue = state.ue(msg.amf_ue_ngap_id)?;
                    ue.ran_ue_ngap_id = msg.ran_ue_ngap_id;
                    ue.stream_id = stream_id;
                }
                self.handle_nas(msg.amf_ue_ngap_id, &msg.nas_pdu).await
            }
            (Presence::SuccessfulOutcome, ProcedureCode::InitialContextSetup) => {
                let response = parse_initial_context_setup_response(pdu)?;
                debug!(amf_ue_ngap_id = response.amf_ue_ngap_id, "Initial Context Setup complete");
                self.on_sessions_set_up(response.amf_ue_ngap_id, &response.sessions)
            }
            (Presence::SuccessfulOutcome, ProcedureCode::PduSessionResourceSetup) => {
                let response = parse_pdu_session_resource_setup_response(pdu)?;
                self.on_sessions_set_up(response.amf_ue_ngap_id, &response.sessions)
            }
            (Presence::InitiatingMessage, ProcedureCode::UeContextReleaseRequest) => {
                let request = parse_ue_context_release_request(pdu)?;
                self.release(request.amf_ue_ngap_id, request.cause).await
            }
            (Presence::SuccessfulOutcome, ProcedureCode::UeContextRelease) => {
                let complete = parse_ue_context_release_complete(pdu)?;
                self.lock().ue(complete.amf_ue_ngap_id)?.connected = false;
                self.events.push(MockAmfEvent::ContextReleased {
                    amf_ue_ngap_id: complete.amf_ue_ngap_id,
                });
                Ok(())
            }
            (Presence::InitiatingMessage, ProcedureCode::PathSwitchRequest) => {
                self.handle_path_switch(pdu, stream_id).await
            }
            (Presence::InitiatingMessage, ProcedureCode::NgReset) => self.handle_ng_reset(pdu).await,
            (Presence::SuccessfulOutcome, ProcedureCode::NgReset) => {
                let ack = parse_ng_reset_acknowledge(pdu)?;
                self.events.push(MockAmfEvent::NgResetAcknowledged {
                    connections: ack.connections.len(),
                });
                Ok(())
            }
            (Presence::InitiatingMessage, ProcedureCode::ErrorIndication) => {
                let indication = parse_error_indication(pdu)?;
                warn!(cause = ?indication.cause, "Error Indication from gNB");
                self.events.push(MockAmfEvent::ErrorIndication {
                    cause: indication.cause,
                });
                Ok(())
            }
            _ => Err(MockAmfError::Unexpected(pdu.message_name())),
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    async fn send(&self, stream_id: u16, pdu: &NgapPdu) -> Result<()> {
        let bytes = pdu.encode()?;
        log_ngap_message(Direction::Tx, &pdu.message_name(), &bytes);
        self.transport.send(stream_id, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// RAN-UE-NGAP-ID and stream of a UE.
    fn route(&self, amf_ue_ngap_id: u64) -> Result<(u32, u16)> {
        let mut state = self.lock();
        let ue = state.ue(amf_ue_ngap_id)?;
        Ok((ue.ran_ue_ngap_id, ue.stream_id))
    }

    async fn send_nas(&self, amf_ue_ngap_id: u64, nas_pdu: Vec<u8>) -> Result<()> {
        let (ran_ue_ngap_id, stream_id) = self.route(amf_ue_ngap_id)?;
        let pdu = build_downlink_nas_transport(&DownlinkNasTransportParams {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
            nas_pdu,
        })?;
        self.send(stream_id, &pdu).await
    }

    /// Protects `plain` in the UE's current context.
    fn protect(&self, amf_ue_ngap_id: u64, plain: &[u8]) -> Result<Vec<u8>> {
        self.lock()
            .ue(amf_ue_ngap_id)?
            .security()?
            .protect(plain, SecurityHeaderType::IntegrityProtectedAndCiphered)
    }

    async fn release(&self, amf_ue_ngap_id: u64, cause: Cause) -> Result<()> {
        let (ran_ue_ngap_id, stream_id) = self.route(amf_ue_ngap_id)?;
        let pdu = build_ue_context_release_command(&UeContextReleaseCommandParams {
            ue_ngap_ids: UeNgapIds::Pair {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
            },
            cause,
        })?;
        self.send(stream_id, &pdu).await
    }

    // ========================================================================
    // Interface management
    // ========================================================================

    async fn handle_ng_setup(&self, pdu: &NgapPdu) -> Result<()> {
        let request = parse_ng_setup_request(pdu)?;
        info!(
            gnb_id = request.global_gnb_id.gnb_id,
            ran_node_name = ?request.ran_node_name,
            "NG Setup Request"
        );
        let config = &self.config;
        let answer = match config.ng_setup_failure {
            Some(cause) => build_ng_setup_failure(&NgSetupFailureData {
                cause,
                time_to_wait: None,
            })?,
            None => build_ng_setup_response(&NgSetupResponseData {
                amf_name: config.amf_name.clone(),
                served_guami_list: vec![ServedGuamiItem {
                    guami: config.guami,
                    backup_amf_name: None,
                }],
                relative_amf_capacity: config.relative_capacity,
                plmn_support_list: vec![PlmnSupportItem {
                    plmn: config.plmn(),
                    slice_support_list: config.slices.clone(),
                }],
            })?,
        };
        self.send(NON_UE_STREAM, &answer).await?;
        self.events.push(MockAmfEvent::NgSetup {
            ran_node_name: request.ran_node_name,
        });
        Ok(())
    }

    async fn handle_ng_reset(&self, pdu: &NgapPdu) -> Result<()> {
        let reset = parse_ng_reset(pdu)?;
        let (whole_interface, connections) = {
            let mut state = self.lock();
            match &reset.reset_type {
                ResetType::NgInterface => {
                    state.ues.values_mut().for_each(|ue| ue.connected = false);
                    (true, Vec::new())
                }
                ResetType::PartOfNgInterface(connections) => {
                    for connection in connections {
                        if let Some(ue) = connection.amf_ue_ngap_id.and_then(|id| state.ues.get_mut(&id)) {
                            ue.connected = false;
                        }
                    }
                    (false, connections.clone())
                }
            }
        };
        info!(cause = %reset.cause, whole_interface, connections = connections.len(), "NG Reset from gNB");
        let count = connections.len();
        let ack = build_ng_reset_acknowledge(&NgResetAcknowledgeData { connections })?;
        self.send(NON_UE_STREAM, &ack).await?;
        self.events.push(MockAmfEvent::NgReset {
            whole_interface,
            connections: count,
        });
        Ok(())
    }

    // ========================================================================
    // NAS
    // ========================================================================

    async fn handle_initial_ue_message(&self, pdu: &NgapPdu, stream_id: u16) -> Result<()> {
        let msg = parse_initial_ue_message(pdu)?;
        let resume_tmsi = msg
            .five_g_s_tmsi
            .map(|s| s.tmsi)
            .or_else(|| guti_of_initial_nas(&msg.nas_pdu).map(|g| g.tmsi));
        let amf_ue_ngap_id = {
            let mut state = self.lock();
            let amf_ue_ngap_id = state.next_amf_ue_ngap_id;
            state.next_amf_ue_ngap_id += 1;
            let mut ue = AmfUe::new(amf_ue_ngap_id, msg.ran_ue_ngap_id, stream_id);
            if let Some(previous) = resume_tmsi.and_then(|tmsi| state.take_by_tmsi(tmsi)) {
                debug!(
                    amf_ue_ngap_id,
                    previous = previous.amf_ue_ngap_id,
                    "new NG connection for a known UE"
                );
                ue.resume(previous);
            }
            state.ues.insert(amf_ue_ngap_id, ue);
            amf_ue_ngap_id
        };
        self.events.push(MockAmfEvent::InitialUeMessage {
            ran_ue_ngap_id: msg.ran_ue_ngap_id,
            amf_ue_ngap_id,
        });
        self.handle_nas(amf_ue_ngap_id, &msg.nas_pdu).await
    }

    async fn handle_nas(&self, amf_ue_ngap_id: u64, nas: &[u8]) -> Result<()> {
        let plain = if peek_security_header_type(nas)?.is_protected() {
            self.lock().ue(amf_ue_ngap_id)?.security()?.unprotect(nas)?
        } else {
            nas.to_vec()
        };
        let message = NasMessage::decode(&plain)?;
        let message_type = message.message_type();
        log_nas_message(Direction::Rx, &format!("{message_type:?}"), &plain);

        match message {
            NasMessage::RegistrationRequest(request) => self.on_registration_request(amf_ue_ngap_id, request).await,
            NasMessage::IdentityResponse(response) => match response.mobile_identity {
                MobileIdentity::Suci(value) => self.identify(amf_ue_ngap_id, &value).await,
                other => Err(MockAmfError::Unexpected(format!("identity {other:?}"))),
            },
            NasMessage::AuthenticationResponse(response) => {
                self.on_authentication_response(amf_ue_ngap_id, response).await
            }
            NasMessage::AuthenticationFailure(failure) => self.on_authentication_failure(amf_ue_ngap_id, failure).await,
            NasMessage::SecurityModeComplete(complete) => {
                self.on_security_mode_complete(amf_ue_ngap_id, complete).await
            }
            NasMessage::SecurityModeReject(reject) => {
                warn!(amf_ue_ngap_id, cause = ?reject.cause, "Security Mode Reject");
                self.release(amf_ue_ngap_id, CAUSE_AUTHENTICATION_FAILURE).await
            }
            NasMessage::RegistrationComplete(_) => self.on_registration_complete(amf_ue_ngap_id),
            NasMessage::UlNasTransport(transport) => self.on_ul_nas_transport(amf_ue_ngap_id, transport).await,
            NasMessage::ServiceRequest(_) => self.on_service_request(amf_ue_ngap_id).await,
            NasMessage::DeregistrationRequestUeOriginating(request) => {
                self.on_deregistration(amf_ue_ngap_id, request).await
            }
            NasMessage::ConfigurationUpdateComplete(_) | NasMessage::MmStatus(_) => {
                debug!(amf_ue_ngap_id, ?message_type, "ignored");
                Ok(())
            }
            other => Err(MockAmfError::Unexpected(format!("{:?}", other.message_type()))),
        }
    }

    async fn on_registration_request(&self, amf_ue_ngap_id: u64, request: RegistrationRequest) -> Result<()> {
        let known_supi = {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            if request.ue_security_capability.is_some() {
                ue.capability = request.ue_security_capability.clone();
            }
            ue.supi.clone()
        };
        match (&request.mobile_identity, known_supi) {
            (MobileIdentity::Suci(value), _) => self.identify(amf_ue_ngap_id, value).await,
            (MobileIdentity::Guti(_), Some(supi)) => self.authenticate(amf_ue_ngap_id, supi).await,
            (MobileIdentity::Guti(guti), None) => {
                debug!(amf_ue_ngap_id, %guti, "unknown GUTI, asking for the SUCI");
                let request = IdentityRequest {
                    identity_type: IdentityType::Suci,
                }
                .encode()?;
                self.send_nas(amf_ue_ngap_id, request).await
            }
            (other, _) => Err(MockAmfError::Unexpected(format!("registration identity {other:?}"))),
        }
    }

    /// Resolves a SUCI to the IMSI and starts 5G-AKA.
    async fn identify(&self, amf_ue_ngap_id: u64, suci_identity: &[u8]) -> Result<()> {
        let suci = Suci::from_mobile_identity(suci_identity)
            .ok_or_else(|| MockAmfError::Unexpected("malformed SUCI".to_string()))?;
        let msin = deconceal(&suci, self.config.home_network_key.as_ref())?;
        let supi = format!("{}{}{}", suci.mcc, suci.mnc, msin);
        debug!(amf_ue_ngap_id, %suci, %supi, "SUCI deconcealed");
        self.authenticate(amf_ue_ngap_id, supi).await
    }

    async fn authenticate(&self, amf_ue_ngap_id: u64, supi: String) -> Result<()> {
        let request = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let subscriber = state
                .subscribers
                .get_mut(&supi)
                .ok_or_else(|| MockAmfError::UnknownSubscriber(supi.clone()))?;
            let ue = state
                .ues
                .get_mut(&amf_ue_ngap_id)
                .ok_or(MockAmfError::UnknownUe(amf_ue_ngap_id))?;

            let mut rand = [0u8; 16];
            rand.copy_from_slice(&sha256(&[&amf_ue_ngap_id.to_be_bytes()[..], supi.as_bytes()].concat())[..16]);
            let vector = subscriber.milenage().generate_vector(&rand, &subscriber.sqn, &subscriber.amf);
            subscriber.sqn = next_sqn(subscriber.sqn);
            let keys = derive_aka_keys(
                &vector.ck,
                &vector.ik,
                &self.config.serving_network_name,
                &rand,
                &vector.xres,
                &vector.sqn_xor_ak(),
                &supi,
            )?;
            ue.supi = Some(supi);
            ue.challenge = Some(PendingChallenge {
                xres_star: keys.res_star,
                kamf: keys.kamf,
            });
            AuthenticationRequest {
                ngksi: NasKeySetIdentifier::native(1),
                abba: vec![0x00, 0x00],
                rand: Some(rand),
                autn: Some(vector.autn),
            }
            .encode()?
        };
        self.send_nas(amf_ue_ngap_id, request).await
    }

    async fn on_authentication_response(&self, amf_ue_ngap_id: u64, response: AuthenticationResponse) -> Result<()> {
        let (accepted, supi) = {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            let challenge = ue
                .challenge
                .take()
                .ok_or_else(|| MockAmfError::Unexpected("Authentication Response without a challenge".to_string()))?;
            let accepted = response.res_star == Some(challenge.xres_star);
            if accepted {
                ue.kamf = Some(challenge.kamf);
            }
            (accepted, ue.supi.clone().unwrap_or_default())
        };
        if !accepted {
            warn!(amf_ue_ngap_id, %supi, "RES* mismatch");
            return self.reject_authentication(amf_ue_ngap_id, supi).await;
        }
        info!(amf_ue_ngap_id, %supi, "UE authenticated");
        self.events.push(MockAmfEvent::Authenticated { amf_ue_ngap_id, supi });
        self.security_mode(amf_ue_ngap_id).await
    }

    async fn on_authentication_failure(&self, amf_ue_ngap_id: u64, failure: AuthenticationFailure) -> Result<()> {
        let supi = self.lock().ue(amf_ue_ngap_id)?.supi.clone().unwrap_or_default();
        match (failure.cause, failure.auts) {
            (MmCause::SynchFailure, Some(auts)) => {
                let resynced = {
                    let mut guard = self.lock();
                    let state = &mut *guard;
                    let subscriber = state
                        .subscribers
                        .get_mut(&supi)
                        .ok_or_else(|| MockAmfError::UnknownSubscriber(supi.clone()))?;
                    // The RAND of the failed challenge is rebuilt the same way.
                    let mut rand = [0u8; 16];
                    rand.copy_from_slice(
                        &sha256(&[&amf_ue_ngap_id.to_be_bytes()[..], supi.as_bytes()].concat())[..16],
                    );
                    let sqn_ms = subscriber.milenage().resync_sqn(&rand, &auts)?;
                    subscriber.sqn = next_sqn(sqn_ms);
                    sqn_ms
                };
                debug!(amf_ue_ngap_id, sqn_ms = ?resynced, "SQN resynchronised");
                self.authenticate(amf_ue_ngap_id, supi).await
            }
            (cause, _) => {
                warn!(amf_ue_ngap_id, ?cause, "Authentication Failure");
                self.reject_authentication(amf_ue_ngap_id, supi).await
            }
        }
    }

    async fn reject_authentication(&self, amf_ue_ngap_id: u64, supi: String) -> Result<()> {
        self.send_nas(amf_ue_ngap_id, AuthenticationReject.encode()?).await?;
        self.events.push(MockAmfEvent::AuthenticationRejected { amf_ue_ngap_id, supi });
        self.release(amf_ue_ngap_id, CAUSE_AUTHENTICATION_FAILURE).await
    }

    /// Security Mode Command under a new context; both COUNTs start at zero.
    async fn security_mode(&self, amf_ue_ngap_id: u64) -> Result<()> {
        let (integrity, ciphering) = (self.config.integrity, self.config.ciphering);
        let protected = {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            let kamf = ue.kamf.ok_or(MockAmfError::NoSecurityContext(amf_ue_ngap_id))?;
            let command = SecurityModeCommand {
                selected_algorithms: NasSecurityAlgorithms { ciphering, integrity },
                ngksi: NasKeySetIdentifier::native(1),
                replayed_ue_security_capability: ue.capability.clone().unwrap_or_default(),
                imeisv_requested: true,
                additional_security_info: None,
                abba: None,
            }
            .encode()?;
            let mut security = NasSecurity::new(&kamf, integrity, ciphering)?;
            let protected = security.protect(&command, SecurityHeaderType::IntegrityProtectedWithNewSecurityContext)?;
            ue.security = Some(security);
            protected
        };
        self.send_nas(amf_ue_ngap_id, protected).await
    }

    /// Registration Accept inside Initial Context Setup.
    async fn on_security_mode_complete(&self, amf_ue_ngap_id: u64, complete: SecurityModeComplete) -> Result<()> {
        if complete.nas_message_container.is_none() {
            debug!(amf_ue_ngap_id, "Security Mode Complete without the registration request");
        }
        let config = &self.config;
        let (pdu, stream_id) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let tmsi = state.next_tmsi;
            state.next_tmsi += 1;
            let ue = state
                .ues
                .get_mut(&amf_ue_ngap_id)
                .ok_or(MockAmfError::UnknownUe(amf_ue_ngap_id))?;
            let guti = Guti::new(
                config.plmn(),
                config.guami.amf_region_id,
                config.guami.amf_set_id,
                config.guami.amf_pointer,
                tmsi,
            );
            ue.guti = Some(guti);

            let accept = RegistrationAccept {
                registration_result: 0x01,
                guti: Some(guti),
                tai_list: vec![Tai::new(config.plmn(), config.tac)],
                allowed_nssai: config.slices.clone(),
                pdu_session_status: None,
                t3512: None,
            }
            .encode()?;
            let kamf = ue.kamf.ok_or(MockAmfError::NoSecurityContext(amf_ue_ngap_id))?;
            let security = ue.security()?;
            let kgnb = derive_kgnb(&kamf, security.ul_count.to_u32(), ACCESS_TYPE_3GPP)?;
            let nas_pdu = security.protect(&accept, SecurityHeaderType::IntegrityProtectedAndCiphered)?;
            ue.kgnb = Some(kgnb);

            let pdu = build_initial_context_setup_request(&InitialContextSetupRequestParams {
                amf_ue_ngap_id,
                ran_ue_ngap_id: ue.ran_ue_ngap_id,
                guami: config.guami,
                sessions: Vec::new(),
                allowed_nssai: config.slices.clone(),
                ue_security_capabilities: UeSecurityCapabilities::default(),
                security_key: kgnb,
                nas_pdu: Some(nas_pdu),
            })?;
            (pdu, ue.stream_id)
        };
        self.send(stream_id, &pdu).await
    }

    fn on_registration_complete(&self, amf_ue_ngap_id: u64) -> Result<()> {
        let (supi, guti) = {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            ue.registered = true;
            let guti = ue
                .guti
                .ok_or_else(|| MockAmfError::Unexpected("Registration Complete before the accept".to_string()))?;
            (ue.supi.clone().unwrap_or_default(), guti)
        };
        info!(amf_ue_ngap_id, %supi, %guti, "UE registered");
        self.events.push(MockAmfEvent::Registered {
            amf_ue_ngap_id,
            supi,
            guti,
        });
        Ok(())
    }

    async fn on_ul_nas_transport(&self, amf_ue_ngap_id: u64, transport: UlNasTransport) -> Result<()> {
        if transport.payload_container_type != PayloadContainerType::N1SmInformation {
            return Err(MockAmfError::Unexpected(format!(
                "UL NAS Transport payload {:?}",
                transport.payload_container_type
            )));
        }
        match NasMessage::decode(&transport.payload_container)? {
            NasMessage::PduSessionEstablishmentRequest(request) => {
                self.establish_session(amf_ue_ngap_id, request.pdu_session_id, request.pti, transport.dnn)
                    .await
            }
            other => Err(MockAmfError::Unexpected(format!("{:?}", other.message_type()))),
        }
    }

    async fn establish_session(&self, amf_ue_ngap_id: u64, psi: u8, pti: u8, dnn: Option<String>) -> Result<()> {
        let config = &self.config;
        let (pdu, stream_id) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let ul_teid = state.allocate_ul_teid();
            let ue_ip = Ipv4Addr::from(u32::from(config.ue_ip_pool) + state.next_host);
            state.next_host += 1;
            let ue = state
                .ues
                .get_mut(&amf_ue_ngap_id)
                .ok_or(MockAmfError::UnknownUe(amf_ue_ngap_id))?;

            let accept = PduSessionEstablishmentAccept {
                pdu_session_id: psi,
                pti,
                pdu_session_type: PduSessionType::Ipv4,
                ssc_mode: 1,
                qos_rules: vec![QosRule {
                    id: 1,
                    default_rule: true,
                    precedence: 255,
                    qfi: DEFAULT_QFI,
                }],
                session_ambr: SessionAmbr::mbps(1000, 1000),
                cause: None,
                pdu_address: Some(PduAddress::ipv4(ue_ip)),
                snssai: config.slices.first().copied(),
                qos_flow_descriptions: vec![QosFlowDescription {
                    qfi: DEFAULT_QFI,
                    five_qi: Some(DEFAULT_5QI),
                }],
                extended_pco: Some(ProtocolConfigurationOptions {
                    containers: vec![(
                        ProtocolConfigurationOptions::IPV4_LINK_MTU,
                        config.mtu.to_be_bytes().to_vec(),
                    )],
                }),
                dnn,
            }
            .encode()?;
            let transport = DlNasTransport::n1_sm(psi, accept).encode()?;
            let nas_pdu = ue
                .security()?
                .protect(&transport, SecurityHeaderType::IntegrityProtectedAndCiphered)?;

            let transfer = encode_pdu_session_resource_setup_request_transfer(&PduSessionResourceSetupRequestTransfer {
                session_ambr: Some((1_000_000_000, 1_000_000_000)),
                ul_ngu_up_tnl: GtpTunnel::new(config.upf_address, ul_teid),
                pdu_session_type: NgapPduSessionType::Ipv4,
                qos_flows: vec![QosFlowSetupRequestItem::new(DEFAULT_QFI, DEFAULT_5QI)],
            })?;
            ue.sessions.retain(|s| s.psi != psi);
            ue.sessions.push(MockPduSession {
                psi,
                ue_ip,
                ul_teid,
                dl_teid: None,
                qfi: DEFAULT_QFI,
            });
            debug!(amf_ue_ngap_id, psi, %ue_ip, ul_teid, "PDU session allocated");

            let pdu = build_pdu_session_resource_setup_request(&PduSessionResourceSetupRequestParams {
                amf_ue_ngap_id,
                ran_ue_ngap_id: ue.ran_ue_ngap_id,
                nas_pdu: None,
                sessions: vec![PduSessionResourceSetupItem {
                    pdu_session_id: psi,
                    nas_pdu: Some(nas_pdu),
                    snssai: config.slices.first().copied().unwrap_or_default(),
                    transfer,
                }],
            })?;
            (pdu, ue.stream_id)
        };
        self.send(stream_id, &pdu).await
    }

    /// Records the gNB's DL TEIDs from a setup response.
    fn on_sessions_set_up(&self, amf_ue_ngap_id: u64, items: &[PduSessionResourceSetupResponseItem]) -> Result<()> {
        let mut established = Vec::with_capacity(items.len());
        {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            for item in items {
                let transfer = decode_pdu_session_resource_setup_response_transfer(&item.transfer)?;
                let session = ue.session_mut(item.pdu_session_id).ok_or_else(|| {
                    MockAmfError::Unexpected(format!("setup response for unknown session {}", item.pdu_session_id))
                })?;
                session.dl_teid = Some(transfer.dl_ngu_up_tnl.teid);
                established.push(*session);
            }
        }
        for session in established {
            info!(amf_ue_ngap_id, psi = session.psi, dl_teid = ?session.dl_teid, "PDU session established");
            self.events.push(MockAmfEvent::PduSessionEstablished {
                amf_ue_ngap_id,
                session,
            });
        }
        Ok(())
    }

    /// Service Accept inside Initial Context Setup, restoring every session.
    async fn on_service_request(&self, amf_ue_ngap_id: u64) -> Result<()> {
        let config = &self.config;
        let (pdu, stream_id) = {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            if !ue.registered {
                return Err(MockAmfError::Unexpected("Service Request from an unregistered UE".to_string()));
            }
            let kamf = ue.kamf.ok_or(MockAmfError::NoSecurityContext(amf_ue_ngap_id))?;
            let accept = ServiceAccept {
                pdu_session_status: None,
                reactivation_result: None,
            }
            .encode()?;
            // The Service Request itself is the NAS COUNT the KgNB is bound to.
            let security = ue.security()?;
            let kgnb = derive_kgnb(&kamf, security.ul_count.to_u32(), ACCESS_TYPE_3GPP)?;
            let nas_pdu = security.protect(&accept, SecurityHeaderType::IntegrityProtectedAndCiphered)?;
            ue.kgnb = Some(kgnb);

            let sessions = ue
                .sessions
                .iter()
                .map(|session| -> Result<PduSessionResourceSetupItem> {
                    let transfer =
                        encode_pdu_session_resource_setup_request_transfer(&PduSessionResourceSetupRequestTransfer {
                            session_ambr: Some((1_000_000_000, 1_000_000_000)),
                            ul_ngu_up_tnl: GtpTunnel::new(config.upf_address, session.ul_teid),
                            pdu_session_type: NgapPduSessionType::Ipv4,
                            qos_flows: vec![QosFlowSetupRequestItem::new(session.qfi, DEFAULT_5QI)],
                        })?;
                    Ok(PduSessionResourceSetupItem {
                        pdu_session_id: session.psi,
                        nas_pdu: None,
                        snssai: config.slices.first().copied().unwrap_or_default(),
                        transfer,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let pdu = build_initial_context_setup_request(&InitialContextSetupRequestParams {
                amf_ue_ngap_id,
                ran_ue_ngap_id: ue.ran_ue_ngap_id,
                guami: config.guami,
                sessions,
                allowed_nssai: config.slices.clone(),
                ue_security_capabilities: UeSecurityCapabilities::default(),
                security_key: kgnb,
                nas_pdu: Some(nas_pdu),
            })?;
            (pdu, ue.stream_id)
        };
        self.send(stream_id, &pdu).await?;
        self.events.push(MockAmfEvent::ServiceAccepted { amf_ue_ngap_id });
        Ok(())
    }

    async fn on_deregistration(&self, amf_ue_ngap_id: u64, request: DeregistrationRequestUeOriginating) -> Result<()> {
        {
            let mut state = self.lock();
            let ue = state.ue(amf_ue_ngap_id)?;
            ue.registered = false;
            ue.sessions.clear();
        }
        if !request.deregistration_type.switch_off {
            let accept = self.protect(amf_ue_ngap_id, &DeregistrationAcceptUeOriginating.encode()?)?;
            self.send_nas(amf_ue_ngap_id, accept).await?;
        }
        info!(amf_ue_ngap_id, switch_off = request.deregistration_type.switch_off, "UE deregistered");
        self.events.push(MockAmfEvent::Deregistered { amf_ue_ngap_id });
        self.release(amf_ue_ngap_id, Cause::NAS_DEREGISTER).await
    }

    // ========================================================================
    // Mobility
    // ========================================================================

    async fn handle_path_switch(&self, pdu: &NgapPdu, stream_id: u16) -> Result<()> {
        let request = parse_path_switch_request(pdu)?;
        let transfers = request.decode_transfers()?;
        let amf_ue_ngap_id = request.source_amf_ue_ngap_id;
        let ran_ue_ngap_id = request.ran_ue_ngap_id;

        let answer = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let new_teids: Vec<u32> = transfers.iter().map(|_| state.allocate_ul_teid()).collect();
            let ue = state
                .ues
                .get_mut(&amf_ue_ngap_id)
                .ok_or(MockAmfError::UnknownUe(amf_ue_ngap_id))?;
            ue.ran_ue_ngap_id = ran_ue_ngap_id;
            ue.stream_id = stream_id;

            let mut switched = Vec::new();
            let mut released = Vec::new();
            for ((psi, transfer), ul_teid) in transfers.into_iter().zip(new_teids) {
                match ue.session_mut(psi) {
                    Some(session) if !self.config.reject_path_switch => {
                        session.dl_teid = Some(transfer.dl_ngu_up_tnl.teid);
                        session.ul_teid = ul_teid;
                        switched.push(*session);
                    }
                    _ => released.push(PduSessionTransferItem {
                        pdu_session_id: psi,
                        transfer: encode_cause_transfer(&Cause::RADIO_NETWORK_UNSPECIFIED)?,
                    }),
                }
            }

            if switched.is_empty() {
                PathSwitchAnswer::Failure(build_path_switch_request_failure(&PathSwitchRequestFailureParams {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    released_sessions: released,
                })?)
            } else {
                let kamf = ue.kamf.ok_or(MockAmfError::NoSecurityContext(amf_ue_ngap_id))?;
                let kgnb = ue.kgnb.ok_or(MockAmfError::NoSecurityContext(amf_ue_ngap_id))?;
                let next_hop_nh = kdf(&kamf, FC_NH, &[&kgnb])?;
                let sessions = switched
                    .iter()
                    .map(|session| -> Result<PduSessionTransferItem> {
                        Ok(PduSessionTransferItem {
                            pdu_session_id: session.psi,
                            transfer: encode_path_switch_request_acknowledge_transfer(
                                &PathSwitchRequestAcknowledgeTransfer {
                                    ul_ngu_up_tnl: Some(GtpTunnel::new(
                                        self.config.handover_upf_address,
                                        session.ul_teid,
                                    )),
                                },
                            )?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let ack = build_path_switch_request_acknowledge(&PathSwitchRequestAcknowledgeParams {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    ue_security_capabilities: None,
                    security_context: SecurityContext {
                        next_hop_chaining_count: 1,
                        next_hop_nh,
                    },
                    sessions,
                    allowed_nssai: self.config.slices.clone(),
                })?;
                PathSwitchAnswer::Acknowledge(ack, switched)
            }
        };

        match answer {
            PathSwitchAnswer::Acknowledge(ack, sessions) => {
                self.send(stream_id, &ack).await?;
                info!(amf_ue_ngap_id, ran_ue_ngap_id, sessions = sessions.len(), "path switched");
                self.events.push(MockAmfEvent::PathSwitched {
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                    sessions,
                });
            }
            PathSwitchAnswer::Failure(failure) => {
                warn!(amf_ue_ngap_id, ran_ue_ngap_id, "path switch refused");
                self.send(stream_id, &failure).await?;
            }
        }
        Ok(())
    }
}

enum PathSwitchAnswer {
    Acknowledge(NgapPdu, Vec<MockPduSession>),
    Failure(NgapPdu),
}

/// GUTI an integrity protected initial message identifies the UE with.
/// The payload of an initial message is never ciphered.
fn guti_of_initial_nas(nas: &[u8]) -> Option<Guti> {
    if !peek_security_header_type(nas).ok()?.is_protected() {
        return None;
    }
    let secured = SecuredNasMessage::decode(nas).ok()?;
    match NasMessage::decode(&secured.payload).ok()? {
        NasMessage::RegistrationRequest(request) => match request.mobile_identity {
            MobileIdentity::Guti(guti) => Some(guti),
            _ => None,
        },
        NasMessage::DeregistrationRequestUeOriginating(request) => match request.mobile_identity {
            MobileIdentity::Guti(guti) => Some(guti),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coretester_ngap::procedures::{
        build_ng_reset, build_ng_setup_request, parse_ng_reset_acknowledge, parse_ng_setup_failure,
        parse_ng_setup_response, BroadcastPlmnItem, NgSetupRequestParams, SupportedTaItem,
    };
    use coretester_ngap::ies::{GlobalGnbId, PagingDrx};

    use crate::test_fixtures::{test_plmn, TestUeConfig};

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn gnb_recv(gnb: &MemoryTransport) -> (u16, NgapPdu) {
        let msg = tokio::time::timeout(TIMEOUT, gnb.recv()).await.unwrap().unwrap().unwrap();
        (msg.stream_id, NgapPdu::decode(&msg.data).unwrap())
    }

    async fn gnb_send(gnb: &MemoryTransport, stream_id: u16, pdu: &NgapPdu) {
        gnb.send(stream_id, Bytes::from(pdu.encode().unwrap())).await.unwrap();
    }

    fn ng_setup_request() -> NgapPdu {
        build_ng_setup_request(&NgSetupRequestParams {
            global_gnb_id: GlobalGnbId {
                plmn: test_plmn(),
                gnb_id: 1,
                gnb_id_length: 22,
            },
            ran_node_name: Some("raw-gnb".to_string()),
            supported_ta_list: vec![SupportedTaItem {
                tac: 1,
                broadcast_plmn_list: vec![BroadcastPlmnItem {
                    plmn: test_plmn(),
                    slice_support_list: vec![test_slice()],
                }],
            }],
            default_paging_drx: PagingDrx::V128,
        })
        .unwrap()
    }

    #[test]
    fn test_next_sqn_wraps_at_48_bits() {
        assert_eq!(next_sqn([0, 0, 0, 0, 0, 0xff]), [0, 0, 0, 0, 1, 0]);
        assert_eq!(next_sqn([0xff; 6]), [0; 6]);
    }

    #[tokio::test]
    async fn test_ng_setup_response_advertises_config() {
        let (gnb, amf_side) = MemoryTransport::pair("gnb", "amf");
        let amf = MockAmf::start(MockAmfConfig::default(), amf_side);

        gnb_send(&gnb, NON_UE_STREAM, &ng_setup_request()).await;
        let (stream, pdu) = gnb_recv(&gnb).await;
        assert_eq!(stream, NON_UE_STREAM);
        let response = parse_ng_setup_response(&pdu).unwrap();
        assert_eq!(response.amf_name, "coretester-mock-amf");
        assert_eq!(response.served_guami_list[0].guami, test_guami());
        assert_eq!(response.plmn_support_list[0].slice_support_list, vec![test_slice()]);

        let event = amf.wait_for_event(|e| matches!(e, MockAmfEvent::NgSetup { .. }), TIMEOUT).await.unwrap();
        assert_eq!(
            event,
            MockAmfEvent::NgSetup {
                ran_node_name: Some("raw-gnb".to_string())
            }
        );
        amf.stop().await;
    }

    #[tokio::test]
    async fn test_ng_setup_failure_when_configured() {
        let (gnb, amf_side) = MemoryTransport::pair("gnb", "amf");
        let config = MockAmfConfig {
            ng_setup_failure: Some(Cause::MISC_OM_INTERVENTION),
            ..MockAmfConfig::default()
        };
        let amf = MockAmf::start(config, amf_side);

        gnb_send(&gnb, NON_UE_STREAM, &ng_setup_request()).await;
        let (_, pdu) = gnb_recv(&gnb).await;
        assert_eq!(parse_ng_setup_failure(&pdu).unwrap().cause, Cause::MISC_OM_INTERVENTION);
        amf.stop().await;
    }

    #[tokio::test]
    async fn test_ng_reset_from_gnb_is_acknowledged() {
        let (gnb, amf_side) = MemoryTransport::pair("gnb", "amf");
        let amf = MockAmf::start(MockAmfConfig::default(), amf_side);

        let reset = build_ng_reset(&NgResetParams {
            cause: Cause::TRANSPORT_UNSPECIFIED,
            reset_type: ResetType::NgInterface,
        })
        .unwrap();
        gnb_send(&gnb, NON_UE_STREAM, &reset).await;
        let (_, pdu) = gnb_recv(&gnb).await;
        assert!(parse_ng_reset_acknowledge(&pdu).unwrap().connections.is_empty());

        let event = amf.wait_for_event(|e| matches!(e, MockAmfEvent::NgReset { .. }), TIMEOUT).await.unwrap();
        assert_eq!(
            event,
            MockAmfEvent::NgReset {
                whole_interface: true,
                connections: 0
            }
        );
        amf.stop().await;
    }

    #[tokio::test]
    async fn test_subscriber_provisioning() {
        let (_gnb, amf_side) = MemoryTransport::pair("gnb", "amf");
        let amf = MockAmf::start(MockAmfConfig::default(), amf_side);
        amf.add_subscriber(&TestUeConfig::default().to_ue_config()).unwrap();
        assert!(amf.inner.lock().subscribers.contains_key("001010000000001"));

        let mut bad = TestUeConfig::default().to_ue_config();
        bad.msin = "12ab".to_string();
        assert!(matches!(amf.add_subscriber(&bad), Err(MockAmfError::Subscriber(_))));
        amf.stop().await;
    }

    #[tokio::test]
    async fn test_unexpected_message_is_reported() {
        let (gnb, amf_side) = MemoryTransport::pair("gnb", "amf");
        let amf = MockAmf::start(MockAmfConfig::default(), amf_side);

        // Uplink NAS for a UE the AMF never saw.
        let pdu = coretester_ngap::procedures::build_uplink_nas_transport(
            &coretester_ngap::procedures::UplinkNasTransportParams {
                amf_ue_ngap_id: 99,
                ran_ue_ngap_id: 1,
                nas_pdu: vec![0x7e, 0x00, 0x43],
                user_location_info: coretester_ngap::ies::UserLocationInfoNr {
                    nr_cgi: coretester_ngap::ies::NrCgi {
                        plmn: test_plmn(),
                        nr_cell_identity: 0x10,
                    },
                    tai: Tai::new(test_plmn(), 1),
                    time_stamp: None,
                },
            },
        )
        .unwrap();
        gnb_send(&gnb, 1, &pdu).await;
        let event = amf
            .wait_for_event(|e| matches!(e, MockAmfEvent::HandlerFailed { .. }), TIMEOUT)
            .await
            .unwrap();
        match event {
            MockAmfEvent::HandlerFailed { error, .. } => assert!(error.contains("99")),
            other => panic!("unexpected event {other:?}"),
        }
        amf.stop().await;
    }
}
