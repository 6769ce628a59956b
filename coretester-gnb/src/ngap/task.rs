//! NGAP read task and message handlers
//!
//! One task per AMF association. For every received PDU the task:
//! 1. decodes it (undecodable frames are answered with an Error Indication)
//! 2. dispatches it by `(presence, procedure code)` to a handler
//! 3. pushes it, with the handler outcome, onto the association's frame queue
//!
//! Handlers never wait on UE processing: delivery to a UE engine only
//! enqueues. Frames of one association are therefore handled in arrival
//! order and the queue sees them in that order too.
//!
//! # Message Flow
//!
//! ```text
//! AMF --> read task --> handler --+--> UE engine (NAS, release, tunnels)
//!                                 +--> AMF (responses)
//!                      frame -------> FrameQueue --> waiters
//! ```

use std::sync::{Arc, Weak};

use coretester_common::{log_ngap_message, Direction};
use coretester_ngap::ies::Cause;
use coretester_ngap::procedures::{
    build_error_indication, build_initial_context_setup_response, build_ng_reset_acknowledge,
    build_pdu_session_resource_setup_response, build_ue_context_release_complete, parse_downlink_nas_transport,
    parse_error_indication, parse_initial_context_setup_request, parse_ng_reset, parse_ng_reset_acknowledge,
    parse_ng_setup_failure, parse_ng_setup_response, parse_paging, parse_path_switch_request_acknowledge,
    parse_path_switch_request_failure, parse_pdu_session_resource_setup_request,
    parse_ue_context_release_command, ErrorIndicationParams, InitialContextSetupResponseParams,
    NgResetAcknowledgeData, PduSessionResourceSetupItem, PduSessionResourceSetupResponseItem,
    PduSessionResourceSetupResponseParams, ResetType, UeAssociatedNgConnection, UeContextReleaseCompleteParams,
};
use coretester_ngap::ies::GtpTunnel;
use coretester_ngap::transfer::{
    encode_pdu_session_resource_setup_response_transfer, PduSessionResourceSetupResponseTransfer,
};
use coretester_ngap::{decode_ngap_pdu, NgapError, NgapPdu, Presence, ProcedureCode};
use coretester_sctp::{NGAP_PPID, NON_UE_STREAM};
use coretester_ue::{DownlinkSender, SessionTunnel};
use tracing::{debug, error, info, warn};

use super::amf_context::{AmfContext, NgapFrame};
use super::ue_context::{SessionContext, UeState};
use crate::error::{GnbError, Result};
use crate::gnb::Gnb;

/// Protocol cause transfer-syntax-error
const CAUSE_TRANSFER_SYNTAX_ERROR: Cause = Cause::Protocol(0);

/// Session set up by a handler, to be announced to the UE once the
/// response is on its way.
struct SetupSession {
    psi: u8,
    nas_pdu: Option<Vec<u8>>,
    tunnel: SessionTunnel,
}

/// Reads the association until it closes.
pub(crate) async fn run_association(gnb: Weak<Gnb>, amf: Arc<AmfContext>) {
    info!(amf = %amf.peer(), "NGAP read task started");
    loop {
        let msg = match amf.transport().recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                error!(amf = %amf.peer(), error = %e, "NGAP receive failed");
                break;
            }
        };
        if msg.ppid != NGAP_PPID {
            warn!(amf = %amf.peer(), ppid = msg.ppid, "Dropping non-NGAP message");
            continue;
        }
        let Some(gnb) = gnb.upgrade() else {
            break;
        };

        let pdu = match decode_ngap_pdu(&msg.data) {
            Ok(pdu) => pdu,
            Err(e) => {
                error!(amf = %amf.peer(), stream = msg.stream_id, error = %e, "Undecodable NGAP PDU");
                gnb.send_error_indication(&amf, None, CAUSE_TRANSFER_SYNTAX_ERROR).await;
                continue;
            }
        };
        log_ngap_message(Direction::Rx, &pdu.message_name(), &msg.data);

        let handler_error = match gnb.dispatch(&amf, &pdu).await {
            Ok(()) => None,
            Err(e) => {
                warn!(amf = %amf.peer(), message = %pdu.message_name(), error = %e, "NGAP handler failed");
                if let GnbError::UnknownUe(ran_ue_ngap_id) = e {
                    gnb.send_error_indication(&amf, Some(ran_ue_ngap_id), Cause::RADIO_NETWORK_UNKNOWN_LOCAL_UE_NGAP_ID)
                        .await;
                }
                Some(e.to_string())
            }
        };
        amf.frames().push(NgapFrame {
            stream_id: msg.stream_id,
            pdu,
            handler_error,
        });
    }
    amf.on_association_down();
    info!(amf = %amf.peer(), "NGAP read task stopped");
}

impl Gnb {
    async fn dispatch(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        use Presence::{InitiatingMessage, SuccessfulOutcome, UnsuccessfulOutcome};

        match (pdu.presence, pdu.procedure_code) {
            (InitiatingMessage, ProcedureCode::DownlinkNasTransport) => self.handle_downlink_nas_transport(pdu),
            (InitiatingMessage, ProcedureCode::InitialContextSetup) => {
                self.handle_initial_context_setup(amf, pdu).await
            }
            (InitiatingMessage, ProcedureCode::PduSessionResourceSetup) => {
                self.handle_pdu_session_resource_setup(amf, pdu).await
            }
            (InitiatingMessage, ProcedureCode::UeContextRelease) => {
                self.handle_ue_context_release_command(amf, pdu).await
            }
            (InitiatingMessage, ProcedureCode::Paging) => self.handle_paging(pdu),
            (InitiatingMessage, ProcedureCode::NgReset) => self.handle_ng_reset(amf, pdu).await,
            (InitiatingMessage, ProcedureCode::ErrorIndication) => self.handle_error_indication(amf, pdu),
            (SuccessfulOutcome, ProcedureCode::NgSetup) => {
                amf.on_ng_setup_response(parse_ng_setup_response(pdu)?);
                Ok(())
            }
            (UnsuccessfulOutcome, ProcedureCode::NgSetup) => {
                amf.on_ng_setup_failure(&parse_ng_setup_failure(pdu)?);
                Ok(())
            }
            (SuccessfulOutcome, ProcedureCode::NgReset) => {
                let ack = parse_ng_reset_acknowledge(pdu)?;
                info!(amf = %amf.peer(), connections = ack.connections.len(), "NG Reset acknowledged");
                Ok(())
            }
            (SuccessfulOutcome, ProcedureCode::PathSwitchRequest) => self.handle_path_switch_acknowledge(pdu),
            (UnsuccessfulOutcome, ProcedureCode::PathSwitchRequest) => self.handle_path_switch_failure(pdu),
            _ => Err(GnbError::UnexpectedMessage(pdu.message_name())),
        }
    }

    pub(crate) async fn send_error_indication(&self, amf: &AmfContext, ran_ue_ngap_id: Option<u32>, cause: Cause) {
        let params = ErrorIndicationParams {
            amf_ue_ngap_id: None,
            ran_ue_ngap_id,
            cause: Some(cause),
        };
        let stream = ran_ue_ngap_id.map_or(NON_UE_STREAM, |id| amf.ue_stream(id));
        let result = match build_error_indication(&params) {
            Ok(pdu) => amf.send(stream, &pdu).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(amf = %amf.peer(), error = %e, "Failed to send Error Indication");
        }
    }

    // ========================================================================
    // NAS delivery
    // ========================================================================

    fn handle_downlink_nas_transport(&self, pdu: &NgapPdu) -> Result<()> {
        let msg = parse_downlink_nas_transport(pdu)?;
        let ue = self
            .ues
            .update(msg.ran_ue_ngap_id, |ctx| {
                ctx.bind_amf_ue_ngap_id(msg.amf_ue_ngap_id);
                ctx.ue()
            })
            .ok_or(GnbError::UnknownUe(msg.ran_ue_ngap_id))?;
        debug!(
            ran_ue_ngap_id = msg.ran_ue_ngap_id,
            amf_ue_ngap_id = msg.amf_ue_ngap_id,
            len = msg.nas_pdu.len(),
            "Downlink NAS"
        );
        ue.send_downlink_nas(msg.nas_pdu, msg.amf_ue_ngap_id, msg.ran_ue_ngap_id)?;
        Ok(())
    }

    // ========================================================================
    // Context and session setup
    // ========================================================================

    async fn handle_initial_context_setup(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        let req = parse_initial_context_setup_request(pdu)?;
        let (amf_ue_ngap_id, ran_ue_ngap_id) = (req.amf_ue_ngap_id, req.ran_ue_ngap_id);
        let (ue, stream_id) = self
            .ues
            .update(ran_ue_ngap_id, |ctx| {
                ctx.bind_amf_ue_ngap_id(amf_ue_ngap_id);
                ctx.security_capabilities = Some(req.ue_security_capabilities);
                ctx.state = UeState::Active;
                (ctx.ue(), ctx.stream_id)
            })
            .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;

        let (items, setups) = self.setup_sessions(ran_ue_ngap_id, &req.sessions)?;
        let response = build_initial_context_setup_response(&InitialContextSetupResponseParams {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
            sessions: items,
        })?;
        amf.send(stream_id, &response).await?;
        info!(ran_ue_ngap_id, amf_ue_ngap_id, sessions = setups.len(), "Initial Context Setup complete");

        if let Some(nas) = req.nas_pdu {
            ue.send_downlink_nas(nas, amf_ue_ngap_id, ran_ue_ngap_id)?;
        }
        announce_sessions(ue.as_ref(), setups, amf_ue_ngap_id, ran_ue_ngap_id)
    }

    async fn handle_pdu_session_resource_setup(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        let req = parse_pdu_session_resource_setup_request(pdu)?;
        let (amf_ue_ngap_id, ran_ue_ngap_id) = (req.amf_ue_ngap_id, req.ran_ue_ngap_id);
        let (ue, stream_id) = self
            .ues
            .update(ran_ue_ngap_id, |ctx| {
                ctx.bind_amf_ue_ngap_id(amf_ue_ngap_id);
                (ctx.ue(), ctx.stream_id)
            })
            .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;

        let (items, setups) = self.setup_sessions(ran_ue_ngap_id, &req.sessions)?;
        let response = build_pdu_session_resource_setup_response(&PduSessionResourceSetupResponseParams {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
            sessions: items,
        })?;
        amf.send(stream_id, &response).await?;

        if let Some(nas) = req.nas_pdu {
            ue.send_downlink_nas(nas, amf_ue_ngap_id, ran_ue_ngap_id)?;
        }
        announce_sessions(ue.as_ref(), setups, amf_ue_ngap_id, ran_ue_ngap_id)
    }

    /// Stores the user plane of each requested session and builds the
    /// response items. A session ID appearing again replaces the old one.
    fn setup_sessions(
        &self,
        ran_ue_ngap_id: u32,
        requested: &[PduSessionResourceSetupItem],
    ) -> Result<(Vec<PduSessionResourceSetupResponseItem>, Vec<SetupSession>)> {
        let mut items = Vec::with_capacity(requested.len());
        let mut setups = Vec::with_capacity(requested.len());
        for item in requested {
            let transfer = item.decode_transfer()?;
            let flow = transfer
                .default_flow()
                .ok_or(NgapError::MissingMandatoryIe("QosFlowSetupRequestList"))?;
            let session = SessionContext {
                psi: item.pdu_session_id,
                ul_teid: transfer.ul_teid(),
                upf_address: transfer.upf_address(),
                qfi: flow.qfi,
                five_qi: Some(flow.five_qi),
                dl_teid: self.ids.next_dl_teid(),
            };
            let stored = self
                .ues
                .update(ran_ue_ngap_id, |ctx| ctx.set_session(session))
                .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;
            if !stored {
                return Err(NgapError::InvalidIeValue(format!("PDU session ID {}", item.pdu_session_id)).into());
            }
            debug!(
                ran_ue_ngap_id,
                psi = session.psi,
                ul_teid = session.ul_teid,
                dl_teid = session.dl_teid,
                upf = %session.upf_address,
                qfi = session.qfi,
                "PDU session resources stored"
            );

            let response = encode_pdu_session_resource_setup_response_transfer(&PduSessionResourceSetupResponseTransfer {
                dl_ngu_up_tnl: GtpTunnel::new(self.config.gtp_ip, session.dl_teid),
                associated_qfis: transfer.qos_flows.iter().map(|f| f.qfi).collect(),
            })?;
            items.push(PduSessionResourceSetupResponseItem {
                pdu_session_id: session.psi,
                transfer: response,
            });
            setups.push(SetupSession {
                psi: session.psi,
                nas_pdu: item.nas_pdu.clone(),
                tunnel: session.tunnel(),
            });
        }
        Ok((items, setups))
    }

    // ========================================================================
    // Release
    // ========================================================================

    async fn handle_ue_context_release_command(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        let cmd = parse_ue_context_release_command(pdu)?;
        let amf_ue_ngap_id = cmd.ue_ngap_ids.amf_ue_ngap_id();
        let ran_ue_ngap_id = match cmd.ue_ngap_ids.ran_ue_ngap_id() {
            Some(id) => id,
            None => self
                .ues
                .find_by_amf_ue_ngap_id(amf_ue_ngap_id)
                .ok_or(GnbError::UnknownAmfUeNgapId(amf_ue_ngap_id))?,
        };
        let (ue, stream_id) = self
            .ues
            .update(ran_ue_ngap_id, |ctx| {
                ctx.release();
                (ctx.ue(), ctx.stream_id)
            })
            .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;

        let complete = build_ue_context_release_complete(&UeContextReleaseCompleteParams {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
        })?;
        amf.send(stream_id, &complete).await?;
        info!(ran_ue_ngap_id, amf_ue_ngap_id, cause = %cmd.cause, "UE context released");
        ue.rrc_release()?;
        Ok(())
    }

    async fn handle_ng_reset(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        let reset = parse_ng_reset(pdu)?;
        let released = self.release_connections(amf.index, &reset.reset_type);
        info!(amf = %amf.peer(), cause = %reset.cause, released = released.len(), "NG Reset from AMF");
        let connections = match reset.reset_type {
            ResetType::NgInterface => Vec::new(),
            ResetType::PartOfNgInterface(list) => list,
        };
        let ack = build_ng_reset_acknowledge(&NgResetAcknowledgeData { connections })?;
        amf.send(NON_UE_STREAM, &ack).await
    }

    /// Releases the UE associations named by a reset; returns what was released.
    pub(crate) fn release_connections(&self, amf_index: usize, reset_type: &ResetType) -> Vec<UeAssociatedNgConnection> {
        let targets: Vec<u32> = match reset_type {
            ResetType::NgInterface => self.ues.ids_on_amf(amf_index),
            ResetType::PartOfNgInterface(list) => list
                .iter()
                .filter_map(|conn| {
                    conn.ran_ue_ngap_id
                        .or_else(|| conn.amf_ue_ngap_id.and_then(|id| self.ues.find_by_amf_ue_ngap_id(id)))
                })
                .collect(),
        };

        let mut released = Vec::new();
        for ran_ue_ngap_id in targets {
            let Some((amf_ue_ngap_id, ue)) = self.ues.update(ran_ue_ngap_id, |ctx| {
                let amf_ue_ngap_id = ctx.amf_ue_ngap_id;
                ctx.release();
                (amf_ue_ngap_id, ctx.ue())
            }) else {
                continue;
            };
            if let Err(e) = ue.rrc_release() {
                warn!(ran_ue_ngap_id, error = %e, "UE did not take the release");
            }
            released.push(UeAssociatedNgConnection {
                amf_ue_ngap_id,
                ran_ue_ngap_id: Some(ran_ue_ngap_id),
            });
        }
        released
    }

    // ========================================================================
    // Paging and errors
    // ========================================================================

    fn handle_paging(&self, pdu: &NgapPdu) -> Result<()> {
        let paging = parse_paging(pdu)?;
        info!(
            amf_set_id = paging.ue_paging_identity.amf_set_id,
            amf_pointer = paging.ue_paging_identity.amf_pointer,
            tmsi = paging.ue_paging_identity.tmsi,
            tais = paging.tai_list.len(),
            "Paging received"
        );
        Ok(())
    }

    fn handle_error_indication(&self, amf: &AmfContext, pdu: &NgapPdu) -> Result<()> {
        let indication = parse_error_indication(pdu)?;
        warn!(
            amf = %amf.peer(),
            amf_ue_ngap_id = ?indication.amf_ue_ngap_id,
            ran_ue_ngap_id = ?indication.ran_ue_ngap_id,
            cause = ?indication.cause,
            "Error Indication from AMF"
        );
        Ok(())
    }

    // ========================================================================
    // Path switch
    // ========================================================================

    fn handle_path_switch_acknowledge(&self, pdu: &NgapPdu) -> Result<()> {
        let ack = parse_path_switch_request_acknowledge(pdu)?;
        let switched = ack.switched_sessions()?;
        let ran_ue_ngap_id = ack.ran_ue_ngap_id;

        let (ue, updated, unknown) = self
            .ues
            .update(ran_ue_ngap_id, |ctx| {
                ctx.bind_amf_ue_ngap_id(ack.amf_ue_ngap_id);
                if let Some(caps) = ack.ue_security_capabilities {
                    ctx.security_capabilities = Some(caps);
                }
                let offered = ctx.take_pending_switch();
                let mut updated = Vec::with_capacity(switched.len());
                let mut unknown = Vec::new();
                for switch in &switched {
                    let Some(mut session) = ctx.session(switch.pdu_session_id).copied() else {
                        unknown.push(switch.pdu_session_id);
                        continue;
                    };
                    if let Some(&(_, dl_teid)) = offered.iter().find(|(psi, _)| *psi == switch.pdu_session_id) {
                        session.dl_teid = dl_teid;
                    }
                    if let Some(tunnel) = switch.ul_ngu_up_tnl {
                        session.ul_teid = tunnel.teid;
                        session.upf_address = tunnel.transport_layer_address;
                    }
                    ctx.set_session(session);
                    updated.push(session);
                }
                (ctx.ue(), updated, unknown)
            })
            .ok_or(GnbError::UnknownUe(ran_ue_ngap_id))?;

        if let Some(&psi) = unknown.first() {
            return Err(GnbError::UnknownSession { ran_ue_ngap_id, psi });
        }
        for session in &updated {
            info!(
                ran_ue_ngap_id,
                psi = session.psi,
                ul_teid = session.ul_teid,
                upf = %session.upf_address,
                dl_teid = session.dl_teid,
                "PDU session switched"
            );
            ue.pdu_session_resource_setup(session.psi, session.tunnel())?;
        }
        Ok(())
    }

    fn handle_path_switch_failure(&self, pdu: &NgapPdu) -> Result<()> {
        let failure = parse_path_switch_request_failure(pdu)?;
        self.ues.update(failure.ran_ue_ngap_id, |ctx| ctx.take_pending_switch());
        warn!(
            ran_ue_ngap_id = failure.ran_ue_ngap_id,
            released = failure.released_sessions.len(),
            "Path switch failed"
        );
        Ok(())
    }
}

/// Hands each session's NAS and tunnel to the UE, in request order.
fn announce_sessions(
    ue: &dyn DownlinkSender,
    setups: Vec<SetupSession>,
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
) -> Result<()> {
    for setup in setups {
        if let Some(nas) = setup.nas_pdu {
            ue.send_downlink_nas(nas, amf_ue_ngap_id, ran_ue_ngap_id)?;
        }
        ue.pdu_session_resource_setup(setup.psi, setup.tunnel)?;
    }
    Ok(())
}
