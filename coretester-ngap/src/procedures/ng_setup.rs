//! NG Setup Procedure
//!
//! Implements the NG Setup procedure as defined in 3GPP TS 38.413 Section 8.7.1.
//! This procedure is used to exchange application-level data needed for the NG-RAN node
//! and the AMF to correctly interoperate on the NG-C interface.

use coretester_common::{Plmn, SNssai};

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerResult};

use super::{require_gnb_id, require_plmn, require_tac};

/// maxnoofTACs
const MAX_TACS: usize = 256;
/// maxnoofBPLMNs
const MAX_BPLMNS: usize = 12;
/// maxnoofServedGUAMIs
const MAX_SERVED_GUAMIS: usize = 256;
/// maxnoofPLMNs
const MAX_PLMNS: usize = 12;

/// Broadcast PLMN item for NG Setup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPlmnItem {
    pub plmn: Plmn,
    /// Slices supported in this PLMN
    pub slice_support_list: Vec<SNssai>,
}

impl PerCodec for BroadcastPlmnItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        encode_slice_support_list(enc, &self.slice_support_list)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "BroadcastPLMNItem")?;
        Ok(Self {
            plmn: Plmn::decode_per(dec)?,
            slice_support_list: decode_slice_support_list(dec)?,
        })
    }
}

/// Supported TA (Tracking Area) item for NG Setup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedTaItem {
    /// Tracking Area Code (24 bits)
    pub tac: u32,
    pub broadcast_plmn_list: Vec<BroadcastPlmnItem>,
}

impl PerCodec for SupportedTaItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        enc.put_octet_string(&self.tac.to_be_bytes()[1..], 3, 3, false)?;
        encode_list(enc, &self.broadcast_plmn_list, 1, MAX_BPLMNS)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "SupportedTAItem")?;
        let tac = dec.get_octet_string(3, 3, false)?;
        Ok(Self {
            tac: u32::from_be_bytes([0, tac[0], tac[1], tac[2]]),
            broadcast_plmn_list: decode_list(dec, 1, MAX_BPLMNS)?,
        })
    }
}

/// Parameters for building an NG Setup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgSetupRequestParams {
    pub global_gnb_id: GlobalGnbId,
    pub ran_node_name: Option<String>,
    pub supported_ta_list: Vec<SupportedTaItem>,
    pub default_paging_drx: PagingDrx,
}

/// Served GUAMI item from NG Setup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedGuamiItem {
    pub guami: Guami,
    pub backup_amf_name: Option<String>,
}

impl PerCodec for ServedGuamiItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[self.backup_amf_name.is_some(), false]);
        self.guami.encode_per(enc)?;
        if let Some(name) = &self.backup_amf_name {
            put_node_name(enc, name)?;
        }
        Ok(())
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 2, "ServedGUAMIItem")?;
        let guami = Guami::decode_per(dec)?;
        let backup_amf_name = if opt[0] { Some(get_node_name(dec)?) } else { None };
        Ok(Self { guami, backup_amf_name })
    }
}

/// PLMN Support item from NG Setup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlmnSupportItem {
    pub plmn: Plmn,
    pub slice_support_list: Vec<SNssai>,
}

impl PerCodec for PlmnSupportItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        encode_slice_support_list(enc, &self.slice_support_list)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "PLMNSupportItem")?;
        Ok(Self {
            plmn: Plmn::decode_per(dec)?,
            slice_support_list: decode_slice_support_list(dec)?,
        })
    }
}

/// Parsed NG Setup Response data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgSetupResponseData {
    pub amf_name: String,
    pub served_guami_list: Vec<ServedGuamiItem>,
    /// Relative AMF Capacity (0-255)
    pub relative_amf_capacity: u8,
    pub plmn_support_list: Vec<PlmnSupportItem>,
}

/// Parsed NG Setup Failure data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgSetupFailureData {
    pub cause: Cause,
    /// Time to wait before retrying
    pub time_to_wait: Option<TimeToWait>,
}

// ============================================================================
// NG Setup Request
// ============================================================================

fn validate_ng_setup_request(params: &NgSetupRequestParams) -> NgapResult<()> {
    require_plmn(&params.global_gnb_id.plmn, "gNB PLMN")?;
    require_gnb_id(&params.global_gnb_id)?;
    if params.supported_ta_list.is_empty() {
        return Err(NgapError::MissingParameter("supported TA list"));
    }
    for ta in &params.supported_ta_list {
        require_tac(ta.tac)?;
        if ta.broadcast_plmn_list.is_empty() {
            return Err(NgapError::MissingParameter("broadcast PLMN list"));
        }
        for bplmn in &ta.broadcast_plmn_list {
            require_plmn(&bplmn.plmn, "broadcast PLMN")?;
            if bplmn.slice_support_list.is_empty() {
                return Err(NgapError::MissingParameter("slice support list"));
            }
        }
    }
    Ok(())
}

/// Build an NG Setup Request PDU
///
/// Fails with [`NgapError::MissingParameter`] if the PLMN, gNB ID, TAC or
/// slice list is empty.
pub fn build_ng_setup_request(params: &NgSetupRequestParams) -> NgapResult<NgapPdu> {
    validate_ng_setup_request(params)?;

    let mut pdu = NgapPdu::initiating(ProcedureCode::NgSetup);
    pdu.push_ie(ID_GLOBAL_RAN_NODE_ID, Criticality::Reject, |e| params.global_gnb_id.encode_per(e))?;
    if let Some(name) = &params.ran_node_name {
        pdu.push_ie(ID_RAN_NODE_NAME, Criticality::Ignore, |e| put_node_name(e, name))?;
    }
    pdu.push_ie(ID_SUPPORTED_TA_LIST, Criticality::Reject, |e| {
        encode_list(e, &params.supported_ta_list, 1, MAX_TACS)
    })?;
    pdu.push_ie(ID_DEFAULT_PAGING_DRX, Criticality::Ignore, |e| params.default_paging_drx.encode_per(e))?;
    Ok(pdu)
}

/// Parse an NG Setup Request (AMF side)
pub fn parse_ng_setup_request(pdu: &NgapPdu) -> NgapResult<NgSetupRequestParams> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::NgSetup)?;
    Ok(NgSetupRequestParams {
        global_gnb_id: pdu.require_ie(ID_GLOBAL_RAN_NODE_ID, "GlobalRANNodeID", GlobalGnbId::decode_per)?,
        ran_node_name: pdu.decode_ie(ID_RAN_NODE_NAME, get_node_name)?,
        supported_ta_list: pdu.require_ie(ID_SUPPORTED_TA_LIST, "SupportedTAList", |d| decode_list(d, 1, MAX_TACS))?,
        default_paging_drx: pdu.require_ie(ID_DEFAULT_PAGING_DRX, "DefaultPagingDRX", PagingDrx::decode_per)?,
    })
}

// ============================================================================
// NG Setup Response / Failure
// ============================================================================

/// Build an NG Setup Response PDU (AMF side)
pub fn build_ng_setup_response(data: &NgSetupResponseData) -> NgapResult<NgapPdu> {
    NgapPdu::successful(ProcedureCode::NgSetup)
        .with_ie(ID_AMF_NAME, Criticality::Reject, |e| put_node_name(e, &data.amf_name))?
        .with_ie(ID_SERVED_GUAMI_LIST, Criticality::Reject, |e| {
            encode_list(e, &data.served_guami_list, 1, MAX_SERVED_GUAMIS)
        })?
        .with_ie(ID_RELATIVE_AMF_CAPACITY, Criticality::Ignore, |e| {
            e.put_constrained(u64::from(data.relative_amf_capacity), 0, 255)
        })?
        .with_ie(ID_PLMN_SUPPORT_LIST, Criticality::Reject, |e| {
            encode_list(e, &data.plmn_support_list, 1, MAX_PLMNS)
        })
}

/// Parse an NG Setup Response from an NGAP PDU
pub fn parse_ng_setup_response(pdu: &NgapPdu) -> NgapResult<NgSetupResponseData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::NgSetup)?;
    Ok(NgSetupResponseData {
        amf_name: pdu.require_ie(ID_AMF_NAME, "AMFName", get_node_name)?,
        served_guami_list: pdu.require_ie(ID_SERVED_GUAMI_LIST, "ServedGUAMIList", |d| {
            decode_list(d, 1, MAX_SERVED_GUAMIS)
        })?,
        relative_amf_capacity: pdu.require_ie(ID_RELATIVE_AMF_CAPACITY, "RelativeAMFCapacity", |d| {
            Ok(d.get_constrained(0, 255)? as u8)
        })?,
        plmn_support_list: pdu.require_ie(ID_PLMN_SUPPORT_LIST, "PLMNSupportList", |d| {
            decode_list(d, 1, MAX_PLMNS)
        })?,
    })
}

/// Build an NG Setup Failure PDU (AMF side)
pub fn build_ng_setup_failure(data: &NgSetupFailureData) -> NgapResult<NgapPdu> {
    let mut pdu = NgapPdu::unsuccessful(ProcedureCode::NgSetup);
    pdu.push_ie(ID_CAUSE, Criticality::Ignore, |e| data.cause.encode_per(e))?;
    if let Some(ttw) = &data.time_to_wait {
        pdu.push_ie(ID_TIME_TO_WAIT, Criticality::Ignore, |e| ttw.encode_per(e))?;
    }
    Ok(pdu)
}

/// Parse an NG Setup Failure from an NGAP PDU
pub fn parse_ng_setup_failure(pdu: &NgapPdu) -> NgapResult<NgSetupFailureData> {
    pdu.expect(Presence::UnsuccessfulOutcome, ProcedureCode::NgSetup)?;
    Ok(NgSetupFailureData {
        cause: pdu.require_ie(ID_CAUSE, "Cause", Cause::decode_per)?,
        time_to_wait: pdu.decode_ie(ID_TIME_TO_WAIT, TimeToWait::decode_per)?,
    })
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Build and encode an NG Setup Request to bytes
pub fn encode_ng_setup_request(params: &NgSetupRequestParams) -> NgapResult<Vec<u8>> {
    build_ng_setup_request(params)?.encode()
}

/// Decode and parse an NG Setup Response from bytes
pub fn decode_ng_setup_response(bytes: &[u8]) -> NgapResult<NgSetupResponseData> {
    parse_ng_setup_response(&decode_ngap_pdu(bytes)?)
}

/// Decode and parse an NG Setup Failure from bytes
pub fn decode_ng_setup_failure(bytes: &[u8]) -> NgapResult<NgSetupFailureData> {
    parse_ng_setup_failure(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is an NG Setup Response
pub fn is_ng_setup_response(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::SuccessfulOutcome, ProcedureCode::NgSetup)
}

/// Check if an NGAP PDU is an NG Setup Failure
pub fn is_ng_setup_failure(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::UnsuccessfulOutcome, ProcedureCode::NgSetup)
}
