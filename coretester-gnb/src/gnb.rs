//! The simulated gNB
//!
//! A [`Gnb`] holds one [`AmfContext`] per AMF association, the UE context
//! table and the identifier allocator. Each association has a read task
//! (see [`crate::ngap::task`]) that decodes, handles and queues every frame;
//! the methods here drive the gNB-initiated procedures and wait on those
//! queues for the answers.
//!
//! A [`TunnelManager`] handed over with [`Gnb::set_tunnel_manager`] carries
//! the user plane of its sessions and is shut down by [`Gnb::close`].
//!
//! UE engines are attached with [`Gnb::attach_ue`]. Their uplink goes
//! through a [`GnbUplink`], which only holds a weak reference so that the
//! gNB and its UEs do not keep each other alive.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use coretester_common::{FiveGSTmsi, GnbConfig, UeConfig};
use coretester_gtp::{TunnelHandle, TunnelManager};
use coretester_ngap::codec::ID_RAN_UE_NGAP_ID;
use coretester_ngap::ies::{get_ran_ue_ngap_id, Cause};
use coretester_ngap::procedures::{
    parse_ng_reset_acknowledge, parse_ng_setup_failure, parse_ng_setup_response, parse_paging,
    parse_path_switch_request_failure, NgResetAcknowledgeData, NgResetParams, NgSetupResponseData, PagingData,
};
use coretester_ngap::{IeContainer, NgapPdu, Presence, ProcedureCode};
use coretester_sctp::{NgapTransport, NON_UE_STREAM};
use coretester_ue::{DownlinkSender, Ue, UeError, UplinkSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GnbError, Result};
use crate::ngap::amf_context::{AmfContext, NgapFrame};
use crate::ngap::builders;
use crate::ngap::task::run_association;
use crate::ngap::ue_context::{IdAllocator, SessionContext, UeContext, UeContextTable, UeState};
use crate::sctp::connect_amf;

/// RAN-UE-NGAP-ID of a UE-associated PDU, if it carries one.
pub(crate) fn frame_ran_ue_ngap_id(pdu: &NgapPdu) -> Option<u32> {
    pdu.decode_ie(ID_RAN_UE_NGAP_ID, get_ran_ue_ngap_id).ok().flatten()
}

impl NgapFrame {
    /// Turns a failed handler run into an error for the waiter.
    fn checked(self) -> Result<Self> {
        match self.handler_error {
            Some(error) => Err(GnbError::Handler {
                message: self.pdu.message_name(),
                error,
            }),
            None => Ok(self),
        }
    }
}

pub struct Gnb {
    pub(crate) config: GnbConfig,
    pub(crate) ues: UeContextTable,
    pub(crate) ids: IdAllocator,
    amfs: RwLock<Vec<Arc<AmfContext>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tunnels: Mutex<Option<Arc<TunnelManager>>>,
}

impl Gnb {
    /// Creates a gNB without any association.
    pub fn new(config: GnbConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let ids = IdAllocator::new(config.dl_teid_base);
        Ok(Arc::new(Self {
            config,
            ues: UeContextTable::new(),
            ids,
            amfs: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            tunnels: Mutex::new(None),
        }))
    }

    /// Creates a gNB and opens an SCTP association to every configured AMF.
    pub async fn connect(config: GnbConfig) -> Result<Arc<Self>> {
        let gnb = Self::new(config)?;
        for amf in gnb.config.amf_configs.clone() {
            let association = connect_amf(&gnb.config, &amf).await?;
            let num_streams = association.num_streams();
            gnb.add_association(Arc::new(association), num_streams);
        }
        Ok(gnb)
    }

    /// Adds an association and starts its read task; returns its index.
    pub fn add_association(self: &Arc<Self>, transport: Arc<dyn NgapTransport>, num_streams: u16) -> usize {
        let mut amfs = self.amfs.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = amfs.len();
        let amf = Arc::new(AmfContext::new(index, transport, num_streams));
        amfs.push(Arc::clone(&amf));
        drop(amfs);

        info!(amf = %amf.peer(), index, num_streams, "AMF association added");
        let task = tokio::spawn(run_association(Arc::downgrade(self), amf));
        self.lock_tasks().push(task);
        index
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tunnels(&self) -> MutexGuard<'_, Option<Arc<TunnelManager>>> {
        self.tunnels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hands the user plane to the gNB; a previous manager is returned.
    pub fn set_tunnel_manager(&self, manager: Arc<TunnelManager>) -> Option<Arc<TunnelManager>> {
        self.lock_tunnels().replace(manager)
    }

    pub fn tunnel_manager(&self) -> Option<Arc<TunnelManager>> {
        self.lock_tunnels().clone()
    }

    /// Opens the GTP-U tunnel of session `psi` on the gNB's tunnel manager.
    pub async fn open_session_tunnel(&self, ue: &Ue, psi: u8, interface_name: &str) -> Result<TunnelHandle> {
        let ran_ue_ngap_id = ue.ran_ue_ngap_id();
        let session = self
            .session(ran_ue_ngap_id, psi)
            .ok_or(GnbError::UnknownSession { ran_ue_ngap_id, psi })?;
        let manager = self.tunnel_manager().ok_or(GnbError::NoUserPlane)?;
        crate::gtp::open_tunnel(&manager, ue, &session, interface_name).await
    }

    pub fn config(&self) -> &GnbConfig {
        &self.config
    }

    pub fn amf(&self, index: usize) -> Result<Arc<AmfContext>> {
        self.amfs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(index)
            .cloned()
            .ok_or(GnbError::UnknownAmf(index))
    }

    pub fn amf_count(&self) -> usize {
        self.amfs.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Ready AMF with the highest relative capacity.
    fn select_amf(&self) -> Result<Arc<AmfContext>> {
        self.amfs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|amf| amf.is_ready())
            .max_by_key(|amf| amf.relative_capacity())
            .cloned()
            .ok_or(GnbError::NoAmfReady)
    }

    // ========================================================================
    // Non-UE-associated procedures
    // ========================================================================

    /// NG Setup on association `index`.
    ///
    /// Returns the response, or [`GnbError::NgSetupFailed`] with the AMF's
    /// cause and time to wait.
    pub async fn ng_setup(&self, index: usize, timeout: Duration) -> Result<NgSetupResponseData> {
        let amf = self.amf(index)?;
        let pdu = builders::ng_setup_request(&self.config)?;
        amf.on_ng_setup_sent();
        amf.send(NON_UE_STREAM, &pdu).await?;

        let frame = amf
            .frames()
            .wait_for(|f| f.is_outcome_of(ProcedureCode::NgSetup), timeout)
            .await?
            .checked()?;
        if frame.pdu.presence == Presence::SuccessfulOutcome {
            Ok(parse_ng_setup_response(&frame.pdu)?)
        } else {
            let failure = parse_ng_setup_failure(&frame.pdu)?;
            Err(GnbError::NgSetupFailed {
                cause: failure.cause,
                time_to_wait: failure.time_to_wait,
            })
        }
    }

    /// NG Setup on every association, in order; stops at the first failure.
    pub async fn ng_setup_all(&self, timeout: Duration) -> Result<Vec<NgSetupResponseData>> {
        let mut responses = Vec::with_capacity(self.amf_count());
        for index in 0..self.amf_count() {
            responses.push(self.ng_setup(index, timeout).await?);
        }
        Ok(responses)
    }

    /// NG Reset towards association `index`.
    ///
    /// The affected UE associations are released locally as soon as the
    /// reset is sent; the acknowledge is then awaited.
    pub async fn ng_reset(&self, index: usize, params: NgResetParams, timeout: Duration) -> Result<NgResetAcknowledgeData> {
        let amf = self.amf(index)?;
        let pdu = builders::ng_reset(&params)?;
        amf.send(NON_UE_STREAM, &pdu).await?;
        let released = self.release_connections(index, &params.reset_type);
        debug!(amf = %amf.peer(), released = released.len(), "NG Reset sent");

        let frame = amf
            .frames()
            .wait_for(|f| f.is(Presence::SuccessfulOutcome, ProcedureCode::NgReset), timeout)
            .await?
            .checked()?;
        Ok(parse_ng_reset_acknowledge(&frame.pdu)?)
    }

    // ========================================================================
    // UE attachment
    // ========================================================================

    /// Spawns a UE engine served by the best ready AMF.
    pub fn attach_ue(self: &Arc<Self>, config: UeConfig) -> Result<Arc<Ue>> {
        let amf = self.select_amf()?;
        let ran_ue_ngap_id = self.ids.next_ran_ue_ngap_id();
        let ue = Ue::spawn(config, ran_ue_ngap_id, self.uplink())?;
        let downlink: Arc<dyn DownlinkSender> = Arc::clone(&ue) as Arc<dyn DownlinkSender>;
        self.ues
            .insert(UeContext::new(ran_ue_ngap_id, amf.index, amf.ue_stream(ran_ue_ngap_id), downlink));
        info!(ran_ue_ngap_id, supi = %ue.supi(), amf = %amf.peer(), "UE attached");
        Ok(ue)
    }

    /// Adds a context for any downlink receiver; returns its RAN-UE-NGAP-ID.
    pub fn attach(&self, ue: Arc<dyn DownlinkSender>) -> Result<u32> {
        let amf = self.select_amf()?;
        let ran_ue_ngap_id = self.ids.next_ran_ue_ngap_id();
        self.ues
            .insert(UeContext::new(ran_ue_ngap_id, amf.index, amf.ue_stream(ran_ue_ngap_id), ue));
        Ok(ran_ue_ngap_id)
    }

    /// Forgets a UE; its NG connection, if any, is not released towards the AMF.
    pub fn detach(&self, ran_ue_ngap_id: u32) -> Option<UeContext> {
        self.ues.remove(ran_ue_ngap_id)
    }

    /// Uplink handle for UE engines attached to this gNB.
    pub fn uplink(self: &Arc<Self>) -> Arc<dyn UplinkSender> {
        Arc::new(GnbUplink {
            gnb: Arc::downgrade(self),
        })
    }

    pub fn ue_context(&self, ran_ue_ngap_id: u32) -> Option<UeContext> {
        self.ues.get(ran_ue_ngap_id)
    }

    pub fn ue_count(&self) -> usize {
        self.ues.len()
    }

    pub fn session(&self, ran_ue_ngap_id: u32, psi: u8) -> Option<SessionContext> {
        self.ues.get(ran_ue_ngap_id)?.session(psi).copied()
    }

    // ========================================================================
    // UE-associated procedures
    // ========================================================================

    /// Wraps the first NAS message of a connection in an Initial UE Message.
    pub async fn send_initial_ue_message(
        &self,
        ran_ue_ngap_id: u32,
        nas: Vec<u8>,
        five_g_s_tmsi: Option<FiveGSTmsi>,
    ) -> Result<()> {
        let pdu = builders::initial_ue_message(&self.config, ran_ue_ngap_id, nas, five_g_s_tmsi)?;
        let (amf_index, stream_id) = self
            .ues
            .update(ran_ue_ngap_id, |ctx| {
                ctx.amf_ue_ngap_id = None;
                ctx.state = UeState::Connecting;
                (ctx.amf_index, ctx.stream_id)
            })
            .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
        self.amf(amf_index)?.send(stream_id, &pdu).await
    }

    pub async fn send_uplink_nas(&self, nas: Vec<u8>, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Result<()> {
        let pdu = builders::uplink_nas_transport(&self.config, amf_ue_ngap_id, ran_ue_ngap_id, nas)?;
        let ctx = self.ues.get(ran_ue_ngap_id).ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
        self.amf(ctx.amf_index)?.send(ctx.stream_id, &pdu).await
    }

    /// Asks the AMF to release the UE's NG connection.
    ///
    /// The AMF answers with a UE Context Release Command, which the read task
    /// handles like any other.
    pub async fn ue_context_release_request(&self, ran_ue_ngap_id: u32, cause: Cause) -> Result<()> {
        let ctx = self.ues.get(ran_ue_ngap_id).ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
        let amf_ue_ngap_id = ctx.amf_ue_ngap_id.ok_or(GnbError::NotConnected(ran_ue_ngap_id))?;
        let psis = ctx.sessions().map(|s| s.psi).collect();
        let pdu = builders::ue_context_release_request(amf_ue_ngap_id, ran_ue_ngap_id, psis, cause)?;
        self.amf(ctx.amf_index)?.send(ctx.stream_id, &pdu).await
    }

    /// Path switch after an Xn handover onto this gNB.
    ///
    /// Every session of the UE is offered a new downlink TEID. On success the
    /// returned sessions carry the uplink endpoints from the acknowledge.
    pub async fn path_switch(&self, ran_ue_ngap_id: u32, timeout: Duration) -> Result<Vec<SessionContext>> {
        let ctx = self.ues.get(ran_ue_ngap_id).ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
        let amf_ue_ngap_id = ctx.amf_ue_ngap_id.ok_or(GnbError::NotConnected(ran_ue_ngap_id))?;
        let sessions: Vec<SessionContext> = ctx.sessions().copied().collect();
        let offered: Vec<(u8, u32)> = sessions.iter().map(|s| (s.psi, self.ids.next_dl_teid())).collect();
        let pdu = builders::path_switch_request(
            &self.config,
            ran_ue_ngap_id,
            amf_ue_ngap_id,
            ctx.security_capabilities.unwrap_or_default(),
            &sessions,
            &offered,
        )?;

        let amf = self.amf(ctx.amf_index)?;
        self.ues.update(ran_ue_ngap_id, |c| c.set_pending_switch(offered));
        amf.send(ctx.stream_id, &pdu).await?;

        let frame = amf
            .frames()
            .wait_for(
                |f| {
                    f.is_outcome_of(ProcedureCode::PathSwitchRequest)
                        && frame_ran_ue_ngap_id(&f.pdu) == Some(ran_ue_ngap_id)
                },
                timeout,
            )
            .await?
            .checked()?;
        if frame.pdu.presence == Presence::SuccessfulOutcome {
            let ctx = self.ues.get(ran_ue_ngap_id).ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
            Ok(ctx.sessions().copied().collect())
        } else {
            let failure = parse_path_switch_request_failure(&frame.pdu)?;
            Err(GnbError::PathSwitchFailed {
                ran_ue_ngap_id,
                released: failure.release_causes()?,
            })
        }
    }

    // ========================================================================
    // Waiting on received frames
    // ========================================================================

    /// First frame from association `index` matching `predicate`.
    pub async fn wait_for_frame<F>(&self, index: usize, predicate: F, timeout: Duration) -> Result<NgapFrame>
    where
        F: FnMut(&NgapFrame) -> bool,
    {
        Ok(self.amf(index)?.frames().wait_for(predicate, timeout).await?)
    }

    /// Next Paging from association `index`; answering it is up to the caller.
    pub async fn wait_for_paging(&self, index: usize, timeout: Duration) -> Result<PagingData> {
        let frame = self
            .wait_for_frame(index, |f| f.is(Presence::InitiatingMessage, ProcedureCode::Paging), timeout)
            .await?
            .checked()?;
        Ok(parse_paging(&frame.pdu)?)
    }

    /// Closes every association and waits for the read tasks to end, then
    /// shuts down the tunnel manager.
    pub async fn close(&self) {
        let amfs = self.amfs.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        for amf in &amfs {
            if let Err(e) = amf.transport().close().await {
                warn!(amf = %amf.peer(), error = %e, "Failed to close AMF association");
            }
        }
        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "NGAP read task ended abnormally");
            }
        }
        self.ues.clear();
        let tunnels = self.lock_tunnels().take();
        if let Some(manager) = tunnels {
            debug!(tunnels = manager.len(), "Closing user plane");
            manager.shutdown().await;
        }
        info!("gNB closed");
    }
}

impl std::fmt::Debug for Gnb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gnb")
            .field("gnb_id", &self.config.gnb_id)
            .field("amfs", &self.amf_count())
            .field("ues", &self.ue_count())
            .finish()
    }
}

/// UE-side view of the gNB.
pub struct GnbUplink {
    gnb: Weak<Gnb>,
}

impl GnbUplink {
    fn gnb(&self) -> coretester_ue::Result<Arc<Gnb>> {
        self.gnb.upgrade().ok_or_else(|| UeError::Uplink(GnbError::Closed.to_string()))
    }
}

#[async_trait]
impl UplinkSender for GnbUplink {
    async fn send_initial_ue_message(
        &self,
        ran_ue_ngap_id: u32,
        nas: Vec<u8>,
        s_tmsi: Option<FiveGSTmsi>,
    ) -> coretester_ue::Result<()> {
        self.gnb()?
            .send_initial_ue_message(ran_ue_ngap_id, nas, s_tmsi)
            .await
            .map_err(|e| UeError::Uplink(e.to_string()))
    }

    async fn send_uplink_nas(&self, nas: Vec<u8>, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> coretester_ue::Result<()> {
        self.gnb()?
            .send_uplink_nas(nas, amf_ue_ngap_id, ran_ue_ngap_id)
            .await
            .map_err(|e| UeError::Uplink(e.to_string()))
    }
}
