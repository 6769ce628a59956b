//! Outbound NGAP messages of the gNB
//!
//! Pure functions of the gNB configuration and the procedure parameters.
//! Each one validates before encoding anything, so a bad configuration or
//! a zero identifier fails without touching the association.

use coretester_common::{FiveGSTmsi, GnbConfig, Tai};
use coretester_ngap::ies::{
    Cause, GlobalGnbId, GtpTunnel, NrCgi, PagingDrx, RrcEstablishmentCause, UeSecurityCapabilities,
    UserLocationInfoNr,
};
use coretester_ngap::procedures::{
    build_initial_ue_message, build_ng_reset, build_ng_setup_request, build_path_switch_request,
    build_ue_context_release_request, build_uplink_nas_transport, BroadcastPlmnItem, InitialUeMessageParams,
    NgResetParams, NgSetupRequestParams, PathSwitchRequestParams, PduSessionTransferItem, SupportedTaItem,
    UeContextReleaseRequestParams, UplinkNasTransportParams,
};
use coretester_ngap::transfer::{encode_path_switch_request_transfer, PathSwitchRequestTransfer};
use coretester_ngap::{NgapError, NgapPdu, NgapResult};

use super::ue_context::SessionContext;

/// Location of the gNB's single cell.
pub fn user_location(config: &GnbConfig) -> UserLocationInfoNr {
    UserLocationInfoNr {
        nr_cgi: NrCgi {
            plmn: config.plmn,
            nr_cell_identity: config.nci,
        },
        tai: Tai::new(config.plmn, config.tac),
        time_stamp: None,
    }
}

/// NG Setup Request advertising the configured PLMN, TAC and slices.
pub fn ng_setup_request(config: &GnbConfig) -> NgapResult<NgapPdu> {
    let default_paging_drx = PagingDrx::from_frames(config.paging_drx)
        .ok_or_else(|| NgapError::InvalidIeValue(format!("paging DRX {} frames", config.paging_drx)))?;
    let ran_node_name = Some(config.ran_node_name.clone()).filter(|name| !name.is_empty());
    build_ng_setup_request(&NgSetupRequestParams {
        global_gnb_id: GlobalGnbId {
            plmn: config.plmn,
            gnb_id: config.gnb_id,
            gnb_id_length: config.gnb_id_length,
        },
        ran_node_name,
        supported_ta_list: vec![SupportedTaItem {
            tac: config.tac,
            broadcast_plmn_list: vec![BroadcastPlmnItem {
                plmn: config.plmn,
                slice_support_list: config.slices.clone(),
            }],
        }],
        default_paging_drx,
    })
}

pub fn ng_reset(params: &NgResetParams) -> NgapResult<NgapPdu> {
    build_ng_reset(params)
}

/// Initial UE Message; a 5G-S-TMSI means the UE is resuming (service request).
pub fn initial_ue_message(
    config: &GnbConfig,
    ran_ue_ngap_id: u32,
    nas_pdu: Vec<u8>,
    five_g_s_tmsi: Option<FiveGSTmsi>,
) -> NgapResult<NgapPdu> {
    let rrc_establishment_cause = if five_g_s_tmsi.is_some() {
        RrcEstablishmentCause::MoData
    } else {
        RrcEstablishmentCause::MoSignalling
    };
    build_initial_ue_message(&InitialUeMessageParams {
        ran_ue_ngap_id,
        nas_pdu,
        user_location_info: user_location(config),
        rrc_establishment_cause,
        five_g_s_tmsi,
        ue_context_requested: false,
    })
}

pub fn uplink_nas_transport(
    config: &GnbConfig,
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
    nas_pdu: Vec<u8>,
) -> NgapResult<NgapPdu> {
    build_uplink_nas_transport(&UplinkNasTransportParams {
        amf_ue_ngap_id,
        ran_ue_ngap_id,
        nas_pdu,
        user_location_info: user_location(config),
    })
}

/// Path Switch Request offering `offered` (PDU session ID, new DL TEID)
/// for the sessions in `sessions`.
pub fn path_switch_request(
    config: &GnbConfig,
    ran_ue_ngap_id: u32,
    source_amf_ue_ngap_id: u64,
    security_capabilities: UeSecurityCapabilities,
    sessions: &[SessionContext],
    offered: &[(u8, u32)],
) -> NgapResult<NgapPdu> {
    if offered.is_empty() {
        return Err(NgapError::MissingParameter("PDU session to be switched"));
    }
    let items = offered
        .iter()
        .map(|&(psi, dl_teid)| {
            let qfi = sessions
                .iter()
                .find(|s| s.psi == psi)
                .map(|s| s.qfi)
                .ok_or(NgapError::MissingParameter("QoS flow of switched session"))?;
            let transfer = encode_path_switch_request_transfer(&PathSwitchRequestTransfer {
                dl_ngu_up_tnl: GtpTunnel::new(config.gtp_ip, dl_teid),
                accepted_qfis: vec![qfi],
            })?;
            Ok(PduSessionTransferItem {
                pdu_session_id: psi,
                transfer,
            })
        })
        .collect::<NgapResult<Vec<_>>>()?;
    build_path_switch_request(&PathSwitchRequestParams {
        ran_ue_ngap_id,
        source_amf_ue_ngap_id,
        user_location_info: user_location(config),
        ue_security_capabilities: security_capabilities,
        sessions: items,
    })
}

pub fn ue_context_release_request(
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
    pdu_session_ids: Vec<u8>,
    cause: Cause,
) -> NgapResult<NgapPdu> {
    build_ue_context_release_request(&UeContextReleaseRequestParams {
        amf_ue_ngap_id,
        ran_ue_ngap_id,
        pdu_session_ids,
        cause,
    })
}
