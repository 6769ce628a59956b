//! UE NAS engine
//!
//! One [`Ue`] per simulated subscriber. Downlink input from the gNB is queued
//! and handled by a per-UE task, one message at a time and in arrival order.
//! Procedures (`register`, `service_request`, `deregister`, ...) are called
//! by the test driver from any task.
//!
//! Every processed downlink message is reported on the UE's event queue, so
//! the driver waits on outcomes instead of polling state:
//!
//! ```text
//! driver --register()--> Ue --Initial UE Message--> gNB --> AMF
//! AMF --> gNB --send_downlink_nas()--> inbox --> Ue task --> events
//! driver <--wait_for_registration()-- events
//! ```
//!
//! Errors never stop the task: a message that cannot be handled is
//! reported as [`UeEvent::Failed`] and the next one is processed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use coretester_common::{log_nas_message, Direction, FrameQueue, Guti, Supi, UeConfig, WaitError};
use coretester_crypto::sidf::conceal;
use coretester_crypto::{HomeNetworkPublicKey, MilenageError, Suci};
use coretester_nas::{
    AuthenticationRequest, ConfigurationUpdateCommand, DeregistrationRequestUeTerminated, DlNasTransport,
    IdentityRequest, IdentityType, MessageType, MmCause, MmMessageType, MobileIdentity, NasCount, NasMessage,
    PayloadContainerType, PduSessionEstablishmentAccept, PduSessionEstablishmentReject, RegistrationAccept,
    RegistrationType, SecurityHeaderType, SecurityModeCommand, ServiceType,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, UeError};
use crate::nas::builders::{self, RegistrationParams, ServiceParams};
use crate::nas::mm::{CmState, MmState, MmStateMachine};
use crate::nas::sm::{
    PduSession, PduSessionTable, ProcedureTransactionManager, PtiValidationResult, SessionTunnel, MAX_PDU_SESSIONS,
};
use crate::radio::{DownlinkSender, UplinkSender};
use crate::security::UeSecurityContext;

/// Outcome of one processed downlink input.
#[derive(Debug, Clone)]
pub enum UeEvent {
    /// A NAS message was handled. The 5GSM message inside a DL NAS
    /// Transport is reported right after the transport.
    Handled(NasMessage),
    /// Decoding or handling failed; `message_type` is unset when the
    /// message could not be decoded at all.
    Failed {
        message_type: Option<MessageType>,
        error: UeError,
    },
    /// The gNB set up user plane resources for a session.
    TunnelReady { psi: u8, tunnel: SessionTunnel },
    /// The RRC connection was released.
    Released,
}

enum Downlink {
    Nas {
        nas: Vec<u8>,
        amf_ue_ngap_id: u64,
        ran_ue_ngap_id: u32,
    },
    RrcRelease,
    SessionSetup {
        psi: u8,
        tunnel: SessionTunnel,
    },
}

#[derive(Debug)]
struct UeState {
    mm: MmStateMachine,
    sessions: PduSessionTable,
    /// Tunnels reported before the session accept was processed
    pending_tunnels: HashMap<u8, SessionTunnel>,
    ptm: ProcedureTransactionManager,
    guti: Option<Guti>,
    amf_ue_ngap_id: Option<u64>,
    /// Type of the registration in progress, repeated in the SMC Complete
    registration_type: RegistrationType,
    serving_network_name: String,
}

pub struct Ue {
    config: UeConfig,
    supi: Supi,
    suci: Suci,
    /// SUCI as a 5GS mobile identity value
    suci_identity: Vec<u8>,
    ran_ue_ngap_id: u32,
    /// Held across encode and send so uplink COUNTs go out in order
    security: tokio::sync::Mutex<UeSecurityContext>,
    state: Mutex<UeState>,
    uplink: Arc<dyn UplinkSender>,
    events: FrameQueue<UeEvent>,
    inbox: mpsc::UnboundedSender<Downlink>,
}

impl fmt::Debug for Ue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ue")
            .field("supi", &self.supi.to_string())
            .field("ran_ue_ngap_id", &self.ran_ue_ngap_id)
            .field("state", &self.lock_state().mm.to_string())
            .finish_non_exhaustive()
    }
}

impl Ue {
    /// Creates the UE and starts its message task. Must be called from a
    /// tokio runtime.
    ///
    /// The SUCI is concealed once here and reused for every registration.
    pub fn spawn(config: UeConfig, ran_ue_ngap_id: u32, uplink: Arc<dyn UplinkSender>) -> Result<Arc<Self>> {
        let security = UeSecurityContext::new(&config)?;
        let supi = security.supi().clone();
        let key = HomeNetworkPublicKey {
            scheme: config.protection_scheme,
            key_id: config.home_network_public_key_id,
            key: config.home_network_public_key.clone(),
        };
        let suci = conceal(
            &config.msin,
            &config.hplmn.mcc_string(),
            &config.hplmn.mnc_string(),
            &config.routing_indicator,
            &key,
        )?;
        let suci_identity = suci.to_mobile_identity()?;

        let state = UeState {
            mm: MmStateMachine::new(),
            sessions: PduSessionTable::new(),
            pending_tunnels: HashMap::new(),
            ptm: ProcedureTransactionManager::new(),
            guti: config.guti,
            amf_ue_ngap_id: None,
            registration_type: RegistrationType::InitialRegistration,
            serving_network_name: config.hplmn.serving_network_name(),
        };
        let (inbox, rx) = mpsc::unbounded_channel();
        let ue = Arc::new(Self {
            events: FrameQueue::new(format!("{supi} NAS")),
            config,
            supi,
            suci,
            suci_identity,
            ran_ue_ngap_id,
            security: tokio::sync::Mutex::new(security),
            state: Mutex::new(state),
            uplink,
            inbox,
        });
        debug!(supi = %ue.supi, suci = %ue.suci, ran_ue_ngap_id, "UE created");
        tokio::spawn(Self::run(Arc::downgrade(&ue), rx));
        Ok(ue)
    }

    /// Ends when the last handle to the UE is dropped.
    async fn run(ue: Weak<Self>, mut inbox: mpsc::UnboundedReceiver<Downlink>) {
        while let Some(item) = inbox.recv().await {
            let Some(ue) = ue.upgrade() else {
                break;
            };
            match item {
                Downlink::Nas {
                    nas,
                    amf_ue_ngap_id,
                    ran_ue_ngap_id,
                } => {
                    // Reported on the event queue.
                    let _ = ue.handle_downlink_nas(&nas, amf_ue_ngap_id, ran_ue_ngap_id).await;
                }
                Downlink::RrcRelease => ue.handle_rrc_release(),
                Downlink::SessionSetup { psi, tunnel } => ue.handle_session_setup(psi, tunnel),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, UeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, item: Downlink) -> Result<()> {
        self.inbox.send(item).map_err(|_| UeError::Stopped(self.supi.to_string()))
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &UeConfig {
        &self.config
    }

    pub fn supi(&self) -> &Supi {
        &self.supi
    }

    pub fn suci(&self) -> &Suci {
        &self.suci
    }

    pub fn ran_ue_ngap_id(&self) -> u32 {
        self.ran_ue_ngap_id
    }

    pub fn amf_ue_ngap_id(&self) -> Option<u64> {
        self.lock_state().amf_ue_ngap_id
    }

    pub fn mm_state(&self) -> MmState {
        self.lock_state().mm.mm_state()
    }

    pub fn cm_state(&self) -> CmState {
        self.lock_state().mm.cm_state()
    }

    pub fn is_registered(&self) -> bool {
        self.lock_state().mm.is_registered()
    }

    pub fn is_idle(&self) -> bool {
        self.lock_state().mm.is_idle()
    }

    pub fn guti(&self) -> Option<Guti> {
        self.lock_state().guti
    }

    pub fn pdu_session(&self, psi: u8) -> Option<PduSession> {
        self.lock_state().sessions.get(psi).cloned()
    }

    pub fn pdu_sessions(&self) -> Vec<PduSession> {
        self.lock_state().sessions.iter().cloned().collect()
    }

    pub fn events(&self) -> &FrameQueue<UeEvent> {
        &self.events
    }

    /// Serving network name fed into the RES* derivation; defaults to the
    /// one of the home PLMN.
    pub fn set_serving_network_name(&self, name: impl Into<String>) {
        self.lock_state().serving_network_name = name.into();
    }

    pub async fn ul_count(&self) -> NasCount {
        self.security.lock().await.ul_count()
    }

    pub async fn dl_count(&self) -> NasCount {
        self.security.lock().await.dl_count()
    }

    fn identity(&self, guti: Option<Guti>) -> MobileIdentity {
        guti.map(MobileIdentity::Guti)
            .unwrap_or_else(|| MobileIdentity::Suci(self.suci_identity.clone()))
    }

    fn switch_mm(&self, state: MmState) {
        if let Some(t) = self.lock_state().mm.switch_mm_state(state) {
            debug!(supi = %self.supi, "{} -> {}", t.old_state, t.new_state);
        }
    }

    // ========== Uplink ==========

    async fn send_plain(&self, nas: Vec<u8>, name: &str) -> Result<()> {
        let amf_ue_ngap_id = self.lock_state().amf_ue_ngap_id.ok_or(UeError::NotConnected)?;
        log_nas_message(Direction::Tx, name, &nas);
        self.uplink.send_uplink_nas(nas, amf_ue_ngap_id, self.ran_ue_ngap_id).await
    }

    /// Protects and sends `plain` as one step under the security lock.
    async fn send_protected(&self, plain: Vec<u8>, header_type: SecurityHeaderType, name: &str) -> Result<()> {
        let amf_ue_ngap_id = self.lock_state().amf_ue_ngap_id.ok_or(UeError::NotConnected)?;
        let mut security = self.security.lock().await;
        let nas = security.encode_with_security(&plain, header_type)?;
        log_nas_message(Direction::Tx, name, &nas);
        self.uplink.send_uplink_nas(nas, amf_ue_ngap_id, self.ran_ue_ngap_id).await
    }

    /// Protected when a security context is active, plain before.
    async fn send_with_current_context(&self, plain: Vec<u8>, name: &str) -> Result<()> {
        let active = self.security.lock().await.is_active();
        if active {
            self.send_protected(plain, SecurityHeaderType::IntegrityProtectedAndCiphered, name)
                .await
        } else {
            self.send_plain(plain, name).await
        }
    }

    // ========== Procedures ==========

    /// Initial registration with the GUTI when one is known, else the SUCI.
    pub async fn register(&self) -> Result<()> {
        self.register_with(RegistrationType::InitialRegistration).await
    }

    /// Registration of the given type. Mobility and periodic updates report
    /// the UE's PDU sessions.
    pub async fn register_with(&self, registration_type: RegistrationType) -> Result<()> {
        let (guti, sessions, amf_ue_ngap_id) = {
            let mut state = self.lock_state();
            if registration_type == RegistrationType::InitialRegistration && state.mm.is_registered() {
                return Err(UeError::InvalidState {
                    expected: MmState::Deregistered,
                    actual: state.mm.mm_state(),
                });
            }
            let sessions = match registration_type {
                RegistrationType::InitialRegistration => Vec::new(),
                _ => state.sessions.ids(),
            };
            state.registration_type = registration_type;
            (state.guti, sessions, state.amf_ue_ngap_id)
        };

        let mut security = self.security.lock().await;
        let capability = security.capability().clone();
        let nssai = [self.config.snssai];
        let request = builders::registration_request(&RegistrationParams {
            registration_type,
            ngksi: security.ngksi(),
            identity: self.identity(guti),
            capability: &capability,
            requested_nssai: &nssai,
            include_mm_capability: false,
            pdu_sessions: &sessions,
        })?;
        let nas = if security.is_active() {
            security.encode_with_security(&request, SecurityHeaderType::IntegrityProtected)?
        } else {
            request
        };

        {
            let mut state = self.lock_state();
            state.mm.switch_mm_state(MmState::RegisteredInitiated);
            state.mm.switch_cm_state(CmState::Connected);
        }
        info!(supi = %self.supi, ?registration_type, "sending Registration Request");
        log_nas_message(Direction::Tx, "Registration Request", &nas);
        match amf_ue_ngap_id {
            Some(amf_ue_ngap_id) => {
                self.uplink
                    .send_uplink_nas(nas, amf_ue_ngap_id, self.ran_ue_ngap_id)
                    .await
            }
            None => self.uplink.send_initial_ue_message(self.ran_ue_ngap_id, nas, None).await,
        }
    }

    /// Service Request from CM-IDLE.
    ///
    /// The full message is ciphered into the NAS message container of a
    /// reduced outer message, which goes out integrity protected in a new
    /// Initial UE Message.
    pub async fn service_request(&self, service_type: ServiceType) -> Result<()> {
        let (s_tmsi, sessions) = {
            let state = self.lock_state();
            if !state.mm.is_idle() {
                return Err(UeError::NotIdle);
            }
            let guti = state.guti.ok_or(UeError::MissingIe("5G-GUTI"))?;
            (guti.s_tmsi(), state.sessions.ids())
        };

        let mut security = self.security.lock().await;
        let params = ServiceParams {
            service_type,
            ngksi: security.ngksi(),
            s_tmsi,
            pdu_sessions: &sessions,
        };
        let inner = builders::service_request_inner(&params)?;
        let container = security.cipher_container(&inner)?;
        let outer = builders::service_request(&params, container)?;
        let nas = security.encode_with_security(&outer, SecurityHeaderType::IntegrityProtected)?;

        {
            let mut state = self.lock_state();
            state.mm.switch_mm_state(MmState::ServiceRequestInitiated);
            state.mm.switch_cm_state(CmState::Connected);
        }
        info!(supi = %self.supi, ?service_type, "sending Service Request");
        log_nas_message(Direction::Tx, "Service Request", &nas);
        self.uplink
            .send_initial_ue_message(self.ran_ue_ngap_id, nas, Some(s_tmsi))
            .await
    }

    /// UE-originating deregistration over 3GPP access. With `switch_off`
    /// the network does not answer and the UE is deregistered at once.
    pub async fn deregister(&self, switch_off: bool) -> Result<()> {
        let (guti, amf_ue_ngap_id) = {
            let state = self.lock_state();
            if !state.mm.is_registered() {
                return Err(UeError::InvalidState {
                    expected: MmState::Registered,
                    actual: state.mm.mm_state(),
                });
            }
            (state.guti, state.amf_ue_ngap_id)
        };

        let mut security = self.security.lock().await;
        let request = builders::deregistration_request(security.ngksi(), self.identity(guti), switch_off)?;
        // An initial NAS message is never ciphered.
        let header_type = match amf_ue_ngap_id {
            Some(_) => SecurityHeaderType::IntegrityProtectedAndCiphered,
            None => SecurityHeaderType::IntegrityProtected,
        };
        let nas = security.encode_with_security(&request, header_type)?;

        if switch_off {
            self.deregistered();
        } else {
            self.switch_mm(MmState::DeregisteredInitiated);
        }
        info!(supi = %self.supi, switch_off, "sending Deregistration Request");
        log_nas_message(Direction::Tx, "Deregistration Request", &nas);
        match amf_ue_ngap_id {
            Some(amf_ue_ngap_id) => {
                self.uplink
                    .send_uplink_nas(nas, amf_ue_ngap_id, self.ran_ue_ngap_id)
                    .await
            }
            None => {
                let s_tmsi = guti.map(|g| g.s_tmsi());
                self.uplink.send_initial_ue_message(self.ran_ue_ngap_id, nas, s_tmsi).await
            }
        }
    }

    /// PDU Session Establishment Request for session `psi` with the
    /// configured DNN and S-NSSAI.
    pub async fn request_pdu_session(&self, psi: u8) -> Result<()> {
        if psi == 0 || psi as usize >= MAX_PDU_SESSIONS {
            return Err(UeError::Config(format!("invalid PDU session id {psi}")));
        }
        let pti = {
            let mut state = self.lock_state();
            if !state.mm.is_registered() {
                return Err(UeError::InvalidState {
                    expected: MmState::Registered,
                    actual: state.mm.mm_state(),
                });
            }
            state.ptm.allocate(psi).ok_or(UeError::PtiExhausted)?
        };
        let request = match builders::pdu_session_establishment_request(psi, pti, &self.config.dnn, self.config.snssai) {
            Ok(request) => request,
            Err(e) => {
                self.lock_state().ptm.free(pti);
                return Err(e.into());
            }
        };
        info!(supi = %self.supi, psi, pti, dnn = %self.config.dnn, "requesting PDU session");
        let sent = self
            .send_protected(request, SecurityHeaderType::IntegrityProtectedAndCiphered, "UL NAS Transport")
            .await;
        if sent.is_err() {
            self.lock_state().ptm.free(pti);
        }
        sent
    }

    // ========== Waits ==========

    async fn wait_outcome<F>(&self, mut predicate: F, failed_on: &[MessageType], timeout: Duration) -> Result<NasMessage>
    where
        F: FnMut(&NasMessage) -> bool,
    {
        let event = self
            .events
            .wait_for(
                |event| match event {
                    UeEvent::Handled(message) => predicate(message),
                    UeEvent::Failed {
                        message_type: Some(t), ..
                    } => failed_on.contains(t),
                    _ => false,
                },
                timeout,
            )
            .await?;
        match event {
            UeEvent::Handled(message) => Ok(message),
            UeEvent::Failed { error, .. } => Err(error),
            other => Err(WaitError::Unexpected {
                queue: self.events.name().to_string(),
                frame: format!("{other:?}"),
            }
            .into()),
        }
    }

    /// Waits for a handled NAS message matching `predicate`.
    pub async fn wait_for_message<F>(&self, predicate: F, timeout: Duration) -> Result<NasMessage>
    where
        F: FnMut(&NasMessage) -> bool,
    {
        self.wait_outcome(predicate, &[], timeout).await
    }

    /// Waits for the end of a registration and returns the assigned GUTI.
    pub async fn wait_for_registration(&self, timeout: Duration) -> Result<Guti> {
        let message = self
            .wait_outcome(
                |m| {
                    matches!(
                        m,
                        NasMessage::RegistrationAccept(_)
                            | NasMessage::RegistrationReject(_)
                            | NasMessage::AuthenticationReject(_)
                    )
                },
                &[MessageType::Mm(MmMessageType::RegistrationAccept)],
                timeout,
            )
            .await?;
        match message {
            NasMessage::RegistrationReject(reject) => Err(UeError::RegistrationRejected(reject.cause)),
            NasMessage::AuthenticationReject(_) => Err(UeError::AuthenticationRejected),
            _ => self.guti().ok_or(UeError::MissingIe("5G-GUTI")),
        }
    }

    /// Waits for the network's answer on session `psi`.
    pub async fn wait_for_pdu_session(&self, psi: u8, timeout: Duration) -> Result<PduSession> {
        let message = self
            .wait_outcome(
                |m| match m {
                    NasMessage::PduSessionEstablishmentAccept(a) => a.pdu_session_id == psi,
                    NasMessage::PduSessionEstablishmentReject(r) => r.pdu_session_id == psi,
                    _ => false,
                },
                &[MessageType::Mm(MmMessageType::DlNasTransport)],
                timeout,
            )
            .await?;
        match message {
            NasMessage::PduSessionEstablishmentReject(reject) => Err(UeError::PduSessionRejected {
                psi,
                cause: reject.cause,
            }),
            _ => self.pdu_session(psi).ok_or(UeError::MissingIe("PDU session")),
        }
    }

    /// Waits until the gNB reports user plane resources for `psi`.
    pub async fn wait_for_tunnel(&self, psi: u8, timeout: Duration) -> Result<SessionTunnel> {
        let event = self
            .events
            .wait_for(|e| matches!(e, UeEvent::TunnelReady { psi: p, .. } if *p == psi), timeout)
            .await?;
        match event {
            UeEvent::TunnelReady { tunnel, .. } => Ok(tunnel),
            other => Err(WaitError::Unexpected {
                queue: self.events.name().to_string(),
                frame: format!("{other:?}"),
            }
            .into()),
        }
    }

    pub async fn wait_for_service(&self, timeout: Duration) -> Result<()> {
        let message = self
            .wait_outcome(
                |m| matches!(m, NasMessage::ServiceAccept(_) | NasMessage::ServiceReject(_)),
                &[],
                timeout,
            )
            .await?;
        match message {
            NasMessage::ServiceReject(reject) => Err(UeError::ServiceRejected(reject.cause)),
            _ => Ok(()),
        }
    }

    pub async fn wait_for_deregistration(&self, timeout: Duration) -> Result<()> {
        self.wait_for_message(
            |m| {
                matches!(
                    m,
                    NasMessage::DeregistrationAcceptUeOriginating(_) | NasMessage::DeregistrationRequestUeTerminated(_)
                )
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    // ========== Downlink ==========

    /// Decodes and handles one downlink NAS message, then reports it on the
    /// event queue.
    pub async fn handle_downlink_nas(&self, nas: &[u8], amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Result<()> {
        if ran_ue_ngap_id != self.ran_ue_ngap_id {
            warn!(
                supi = %self.supi,
                expected = self.ran_ue_ngap_id,
                received = ran_ue_ngap_id,
                "downlink NAS for another RAN-UE-NGAP-ID"
            );
        }
        {
            let mut state = self.lock_state();
            state.amf_ue_ngap_id = Some(amf_ue_ngap_id);
            state.mm.switch_cm_state(CmState::Connected);
        }

        let decoded = self.security.lock().await.decode(nas);
        let message = match decoded {
            Ok(message) => message,
            Err(error) => {
                warn!(supi = %self.supi, %error, "dropping undecodable downlink NAS");
                self.events.push(UeEvent::Failed {
                    message_type: None,
                    error: error.clone(),
                });
                return Err(error);
            }
        };
        let message_type = message.message_type();
        log_nas_message(Direction::Rx, &format!("{message_type:?}"), nas);

        match self.handle_message(&message).await {
            Ok(inner) => {
                self.events.push(UeEvent::Handled(message));
                if let Some(inner) = inner {
                    self.events.push(UeEvent::Handled(inner));
                }
                Ok(())
            }
            Err(error) => {
                warn!(supi = %self.supi, ?message_type, %error, "NAS handler failed");
                self.events.push(UeEvent::Failed {
                    message_type: Some(message_type),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Returns the 5GSM message unwrapped from a DL NAS Transport.
    async fn handle_message(&self, message: &NasMessage) -> Result<Option<NasMessage>> {
        match message {
            NasMessage::IdentityRequest(m) => self.on_identity_request(m).await?,
            NasMessage::AuthenticationRequest(m) => self.on_authentication_request(m).await?,
            NasMessage::AuthenticationReject(_) => {
                warn!(supi = %self.supi, "authentication rejected");
                self.deregistered();
            }
            NasMessage::SecurityModeCommand(m) => self.on_security_mode_command(m).await?,
            NasMessage::RegistrationAccept(m) => self.on_registration_accept(m).await?,
            NasMessage::RegistrationReject(m) => {
                warn!(supi = %self.supi, cause = ?m.cause, "registration rejected");
                self.deregistered();
            }
            NasMessage::ConfigurationUpdateCommand(m) => self.on_configuration_update(m).await?,
            NasMessage::DlNasTransport(m) => return self.on_dl_nas_transport(m).map(Some),
            NasMessage::DeregistrationRequestUeTerminated(m) => self.on_network_deregistration(m).await?,
            NasMessage::DeregistrationAcceptUeOriginating(_) => {
                info!(supi = %self.supi, "deregistered");
                self.deregistered();
            }
            NasMessage::ServiceAccept(_) => {
                info!(supi = %self.supi, "service accepted");
                self.switch_mm(MmState::Registered);
            }
            NasMessage::ServiceReject(m) => {
                warn!(supi = %self.supi, cause = ?m.cause, "service rejected");
                self.switch_mm(MmState::Registered);
            }
            NasMessage::MmStatus(m) => warn!(supi = %self.supi, cause = ?m.cause, "5GMM status from network"),
            other => return Err(UeError::Unimplemented(other.message_type())),
        }
        Ok(None)
    }

    fn deregistered(&self) {
        let mut state = self.lock_state();
        state.mm.switch_mm_state(MmState::Deregistered);
        state.sessions = PduSessionTable::new();
        state.pending_tunnels.clear();
    }

    async fn on_identity_request(&self, request: &IdentityRequest) -> Result<()> {
        let identity = match request.identity_type {
            IdentityType::Imei | IdentityType::Imeisv => MobileIdentity::Imeisv(self.config.imeisv.clone()),
            _ => MobileIdentity::Suci(self.suci_identity.clone()),
        };
        debug!(supi = %self.supi, identity_type = ?request.identity_type, "answering Identity Request");
        self.send_with_current_context(builders::identity_response(identity)?, "Identity Response")
            .await
    }

    async fn on_authentication_request(&self, request: &AuthenticationRequest) -> Result<()> {
        let rand = request.rand.ok_or(UeError::MissingIe("RAND"))?;
        let autn = request.autn.ok_or(UeError::MissingIe("AUTN"))?;
        let snn = self.lock_state().serving_network_name.clone();

        let derived = {
            let mut security = self.security.lock().await;
            let derived = security.derive_res_star_and_set_key(&rand, &autn, &snn);
            if derived.is_ok() {
                security.set_ngksi(request.ngksi);
            }
            derived
        };
        match derived {
            Ok(res_star) => {
                self.send_plain(builders::authentication_response(res_star)?, "Authentication Response")
                    .await
            }
            Err(UeError::Authentication(MilenageError::MacFailure)) => {
                warn!(supi = %self.supi, "AUTN MAC check failed");
                let failure = builders::authentication_failure(MmCause::MacFailure, None)?;
                self.send_plain(failure, "Authentication Failure").await
            }
            Err(UeError::Authentication(MilenageError::SynchFailure { auts })) => {
                warn!(supi = %self.supi, "SQN out of range, requesting resynchronisation");
                let failure = builders::authentication_failure(MmCause::SynchFailure, Some(auts))?;
                self.send_plain(failure, "Authentication Failure").await
            }
            Err(e) => Err(e),
        }
    }

    /// The context was already activated while decoding the command.
    async fn on_security_mode_command(&self, command: &SecurityModeCommand) -> Result<()> {
        let (guti, sessions, registration_type) = {
            let state = self.lock_state();
            (state.guti, state.sessions.ids(), state.registration_type)
        };
        let capability = self.security.lock().await.capability().clone();
        let ngksi = command.ngksi;
        let nssai = [self.config.snssai];
        let registration = RegistrationParams {
            registration_type,
            ngksi,
            identity: self.identity(guti),
            capability: &capability,
            requested_nssai: &nssai,
            include_mm_capability: true,
            pdu_sessions: &sessions,
        };
        let imeisv = command.imeisv_requested.then_some(self.config.imeisv.as_str());
        let complete = builders::security_mode_complete(imeisv, &registration)?;
        debug!(
            supi = %self.supi,
            integrity = ?command.selected_algorithms.integrity,
            ciphering = ?command.selected_algorithms.ciphering,
            "security mode command accepted"
        );
        self.send_protected(
            complete,
            SecurityHeaderType::IntegrityProtectedAndCipheredWithNewSecurityContext,
            "Security Mode Complete",
        )
        .await?;
        self.switch_mm(MmState::RegisteredInitiated);
        Ok(())
    }

    /// Completes the registration and asks for the default PDU session when
    /// the UE does not hold it yet.
    async fn on_registration_accept(&self, accept: &RegistrationAccept) -> Result<()> {
        let has_default_session = {
            let mut state = self.lock_state();
            if let Some(guti) = accept.guti {
                state.guti = Some(guti);
            }
            state.mm.switch_mm_state(MmState::Registered);
            state.mm.switch_cm_state(CmState::Connected);
            state.sessions.get(self.config.pdu_session_id).is_some()
        };
        info!(supi = %self.supi, guti = ?self.guti(), "registered");
        self.send_protected(
            builders::registration_complete()?,
            SecurityHeaderType::IntegrityProtectedAndCiphered,
            "Registration Complete",
        )
        .await?;
        if self.config.pdu_session_id != 0 && !has_default_session {
            self.request_pdu_session(self.config.pdu_session_id).await?;
        }
        Ok(())
    }

    async fn on_configuration_update(&self, command: &ConfigurationUpdateCommand) -> Result<()> {
        if let Some(guti) = command.guti {
            info!(supi = %self.supi, %guti, "new 5G-GUTI");
            self.lock_state().guti = Some(guti);
        }
        if command.registration_requested {
            debug!(supi = %self.supi, "network requests re-registration");
        }
        self.send_protected(
            builders::configuration_update_complete()?,
            SecurityHeaderType::IntegrityProtectedAndCiphered,
            "Configuration Update Complete",
        )
        .await
    }

    fn on_dl_nas_transport(&self, transport: &DlNasTransport) -> Result<NasMessage> {
        if transport.payload_container_type != PayloadContainerType::N1SmInformation {
            warn!(
                supi = %self.supi,
                container = ?transport.payload_container_type,
                "unsupported DL NAS Transport payload"
            );
            return Err(UeError::Unimplemented(MessageType::Mm(MmMessageType::DlNasTransport)));
        }
        let inner = NasMessage::decode(&transport.payload_container)?;
        match &inner {
            NasMessage::PduSessionEstablishmentAccept(accept) => self.on_pdu_session_accept(accept)?,
            NasMessage::PduSessionEstablishmentReject(reject) => self.on_pdu_session_reject(reject),
            other => return Err(UeError::Unimplemented(other.message_type())),
        }
        Ok(inner)
    }

    fn release_pti(&self, state: &mut UeState, pti: u8, psi: u8) {
        match state.ptm.validate_pti_psi(pti, psi) {
            PtiValidationResult::Valid => state.ptm.free(pti),
            result => warn!(supi = %self.supi, pti, psi, ?result, "answer does not match a pending request"),
        }
    }

    fn on_pdu_session_accept(&self, accept: &PduSessionEstablishmentAccept) -> Result<()> {
        let mut state = self.lock_state();
        self.release_pti(&mut state, accept.pti, accept.pdu_session_id);
        let mut session = PduSession::from_accept(accept)?;
        session.tunnel = state.pending_tunnels.remove(&session.id);
        info!(
            supi = %self.supi,
            psi = session.id,
            ue_ip = %session.ue_ip,
            qfi = session.qfi,
            five_qi = ?session.five_qi,
            "PDU session established"
        );
        state.sessions.insert(session)
    }

    fn on_pdu_session_reject(&self, reject: &PduSessionEstablishmentReject) {
        let mut state = self.lock_state();
        self.release_pti(&mut state, reject.pti, reject.pdu_session_id);
        warn!(supi = %self.supi, psi = reject.pdu_session_id, cause = ?reject.cause, "PDU session rejected");
    }

    async fn on_network_deregistration(&self, request: &DeregistrationRequestUeTerminated) -> Result<()> {
        info!(
            supi = %self.supi,
            cause = ?request.cause,
            re_registration = request.deregistration_type.re_registration_required,
            "network-initiated deregistration"
        );
        self.send_protected(
            builders::deregistration_accept_ue_terminated()?,
            SecurityHeaderType::IntegrityProtectedAndCiphered,
            "Deregistration Accept",
        )
        .await?;
        self.deregistered();
        Ok(())
    }

    fn handle_rrc_release(&self) {
        {
            let mut state = self.lock_state();
            state.mm.switch_cm_state(CmState::Idle);
            state.amf_ue_ngap_id = None;
        }
        debug!(supi = %self.supi, "RRC connection released");
        self.events.push(UeEvent::Released);
    }

    fn handle_session_setup(&self, psi: u8, tunnel: SessionTunnel) {
        {
            let mut state = self.lock_state();
            match state.sessions.get_mut(psi) {
                Some(session) => session.tunnel = Some(tunnel),
                None => {
                    state.pending_tunnels.insert(psi, tunnel);
                }
            }
        }
        debug!(
            supi = %self.supi,
            psi,
            ul_teid = tunnel.ul_teid,
            dl_teid = tunnel.dl_teid,
            upf = %tunnel.upf_address,
            "user plane ready"
        );
        self.events.push(UeEvent::TunnelReady { psi, tunnel });
    }
}

impl DownlinkSender for Ue {
    fn send_downlink_nas(&self, nas: Vec<u8>, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Result<()> {
        self.enqueue(Downlink::Nas {
            nas,
            amf_ue_ngap_id,
            ran_ue_ngap_id,
        })
    }

    fn rrc_release(&self) -> Result<()> {
        self.enqueue(Downlink::RrcRelease)
    }

    fn pdu_session_resource_setup(&self, psi: u8, tunnel: SessionTunnel) -> Result<()> {
        self.enqueue(Downlink::SessionSetup { psi, tunnel })
    }
}
