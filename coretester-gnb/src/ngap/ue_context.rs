//! UE Context Management for NGAP
//!
//! Each UE attached to the gNB has a context keyed by its RAN-UE-NGAP-ID.
//! The context tracks:
//! - the AMF-UE-NGAP-ID, once the AMF has bound one
//! - the AMF association and SCTP stream carrying the UE's signalling
//! - the user plane half of each PDU session
//!
//! The table is shared between the association read tasks and the callers
//! driving procedures; every access goes through its lock. Identifiers come
//! from [`IdAllocator`], which only uses atomic increments.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use coretester_ngap::ies::UeSecurityCapabilities;
use coretester_ue::{DownlinkSender, SessionTunnel, MAX_PDU_SESSIONS};

/// UE state within NGAP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UeState {
    /// No UE-associated NG connection yet, or the last one was released
    #[default]
    Idle,
    /// Initial UE Message sent, waiting for the AMF to bind its ID
    Connecting,
    /// AMF-UE-NGAP-ID bound
    Connected,
    /// Initial Context Setup done
    Active,
}

impl fmt::Display for UeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UeState::Idle => write!(f, "Idle"),
            UeState::Connecting => write!(f, "Connecting"),
            UeState::Connected => write!(f, "Connected"),
            UeState::Active => write!(f, "Active"),
        }
    }
}

/// User plane resources of one PDU session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub psi: u8,
    /// Uplink TEID (gNB -> UPF)
    pub ul_teid: u32,
    /// UPF transport layer address
    pub upf_address: IpAddr,
    pub qfi: u8,
    pub five_qi: Option<u8>,
    /// Downlink TEID (UPF -> gNB), allocated by the gNB
    pub dl_teid: u32,
}

impl SessionContext {
    pub fn tunnel(&self) -> SessionTunnel {
        SessionTunnel {
            ul_teid: self.ul_teid,
            dl_teid: self.dl_teid,
            upf_address: self.upf_address,
            qfi: self.qfi,
        }
    }
}

/// NGAP UE context
#[derive(Clone)]
pub struct UeContext {
    pub ran_ue_ngap_id: u32,
    /// AMF UE NGAP ID (assigned by AMF)
    pub amf_ue_ngap_id: Option<u64>,
    /// Index of the AMF association serving the UE
    pub amf_index: usize,
    /// SCTP stream ID for this UE
    pub stream_id: u16,
    pub state: UeState,
    /// Security capabilities from Initial Context Setup, reused for path switch
    pub security_capabilities: Option<UeSecurityCapabilities>,
    ue: Arc<dyn DownlinkSender>,
    sessions: [Option<SessionContext>; MAX_PDU_SESSIONS],
    /// New DL TEIDs offered in an outstanding Path Switch Request
    pending_switch: Vec<(u8, u32)>,
}

impl UeContext {
    pub fn new(ran_ue_ngap_id: u32, amf_index: usize, stream_id: u16, ue: Arc<dyn DownlinkSender>) -> Self {
        Self {
            ran_ue_ngap_id,
            amf_ue_ngap_id: None,
            amf_index,
            stream_id,
            state: UeState::Idle,
            security_capabilities: None,
            ue,
            sessions: Default::default(),
            pending_switch: Vec::new(),
        }
    }

    /// Downlink side of the UE engine.
    pub fn ue(&self) -> Arc<dyn DownlinkSender> {
        Arc::clone(&self.ue)
    }

    /// Binds the AMF UE NGAP ID; a later value replaces an earlier one.
    pub fn bind_amf_ue_ngap_id(&mut self, id: u64) {
        self.amf_ue_ngap_id = Some(id);
        if matches!(self.state, UeState::Idle | UeState::Connecting) {
            self.state = UeState::Connected;
        }
    }

    /// Drops the UE-associated NG connection and its user plane.
    pub fn release(&mut self) {
        self.amf_ue_ngap_id = None;
        self.state = UeState::Idle;
        self.sessions = Default::default();
        self.pending_switch.clear();
    }

    pub fn session(&self, psi: u8) -> Option<&SessionContext> {
        self.sessions.get(psi as usize)?.as_ref()
    }

    /// Stores a session, replacing an older one with the same ID.
    /// Returns `false` if `psi` is not a valid PDU session identity.
    pub fn set_session(&mut self, session: SessionContext) -> bool {
        match self.sessions.get_mut(session.psi as usize) {
            Some(slot) if session.psi != 0 => {
                *slot = Some(session);
                true
            }
            _ => false,
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionContext> {
        self.sessions.iter().flatten()
    }

    pub fn set_pending_switch(&mut self, offered: Vec<(u8, u32)>) {
        self.pending_switch = offered;
    }

    pub fn take_pending_switch(&mut self) -> Vec<(u8, u32)> {
        std::mem::take(&mut self.pending_switch)
    }
}

impl fmt::Debug for UeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UeContext")
            .field("ran_ue_ngap_id", &self.ran_ue_ngap_id)
            .field("amf_ue_ngap_id", &self.amf_ue_ngap_id)
            .field("amf_index", &self.amf_index)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state)
            .field("sessions", &self.sessions().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Lock-protected RAN-UE-NGAP-ID to context map.
#[derive(Debug, Default)]
pub struct UeContextTable {
    contexts: Mutex<HashMap<u32, UeContext>>,
}

impl UeContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, UeContext>> {
        self.contexts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, ctx: UeContext) {
        self.lock().insert(ctx.ran_ue_ngap_id, ctx);
    }

    pub fn remove(&self, ran_ue_ngap_id: u32) -> Option<UeContext> {
        self.lock().remove(&ran_ue_ngap_id)
    }

    /// Copy of the context, for reading outside the lock.
    pub fn get(&self, ran_ue_ngap_id: u32) -> Option<UeContext> {
        self.lock().get(&ran_ue_ngap_id).cloned()
    }

    /// Runs `f` on the context under the lock.
    pub fn update<R>(&self, ran_ue_ngap_id: u32, f: impl FnOnce(&mut UeContext) -> R) -> Option<R> {
        self.lock().get_mut(&ran_ue_ngap_id).map(f)
    }

    pub fn find_by_amf_ue_ngap_id(&self, amf_ue_ngap_id: u64) -> Option<u32> {
        self.lock()
            .values()
            .find(|ctx| ctx.amf_ue_ngap_id == Some(amf_ue_ngap_id))
            .map(|ctx| ctx.ran_ue_ngap_id)
    }

    /// RAN-UE-NGAP-IDs of the UEs served by one AMF association.
    pub fn ids_on_amf(&self, amf_index: usize) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .lock()
            .values()
            .filter(|ctx| ctx.amf_index == amf_index)
            .map(|ctx| ctx.ran_ue_ngap_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// RAN-UE-NGAP-ID and downlink TEID allocator.
#[derive(Debug)]
pub struct IdAllocator {
    next_ran_ue_ngap_id: AtomicU32,
    next_dl_teid: AtomicU32,
}

impl IdAllocator {
    pub fn new(dl_teid_base: u32) -> Self {
        Self {
            next_ran_ue_ngap_id: AtomicU32::new(1),
            next_dl_teid: AtomicU32::new(dl_teid_base),
        }
    }

    /// Next RAN-UE-NGAP-ID; 0 is never handed out.
    pub fn next_ran_ue_ngap_id(&self) -> u32 {
        loop {
            let id = self.next_ran_ue_ngap_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Next downlink TEID; 0 is never handed out.
    pub fn next_dl_teid(&self) -> u32 {
        loop {
            let teid = self.next_dl_teid.fetch_add(1, Ordering::Relaxed);
            if teid != 0 {
                return teid;
            }
        }
    }
}
