//! Paging Procedure
//!
//! Implements the Paging procedure as defined in 3GPP TS 38.413 Section 8.5.1.

use coretester_common::{FiveGSTmsi, Tai};

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerResult};

/// maxnoofTAIforPaging
const MAX_TAI_FOR_PAGING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TaiForPagingItem(Tai);

impl PerCodec for TaiForPagingItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.0.encode_per(enc)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "TAIListForPagingItem")?;
        Ok(Self(Tai::decode_per(dec)?))
    }
}

/// Paging contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingParams {
    pub ue_paging_identity: FiveGSTmsi,
    pub paging_drx: Option<PagingDrx>,
    pub tai_list: Vec<Tai>,
}

pub type PagingData = PagingParams;

/// Build a Paging PDU (AMF side)
pub fn build_paging(params: &PagingParams) -> NgapResult<NgapPdu> {
    if params.tai_list.is_empty() {
        return Err(NgapError::MissingParameter("TAI list for paging"));
    }
    let items: Vec<TaiForPagingItem> = params.tai_list.iter().copied().map(TaiForPagingItem).collect();
    let mut pdu = NgapPdu::initiating(ProcedureCode::Paging).with_ie(ID_UE_PAGING_IDENTITY, Criticality::Ignore, |e| {
        put_ue_paging_identity(e, &params.ue_paging_identity)
    })?;
    if let Some(drx) = &params.paging_drx {
        pdu.push_ie(ID_PAGING_DRX, Criticality::Ignore, |e| drx.encode_per(e))?;
    }
    pdu.push_ie(ID_TAI_LIST_FOR_PAGING, Criticality::Ignore, |e| {
        encode_list(e, &items, 1, MAX_TAI_FOR_PAGING)
    })?;
    Ok(pdu)
}

/// Parse a Paging message from an NGAP PDU
pub fn parse_paging(pdu: &NgapPdu) -> NgapResult<PagingData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::Paging)?;
    let items: Vec<TaiForPagingItem> = pdu.require_ie(ID_TAI_LIST_FOR_PAGING, "TAIListForPaging", |d| {
        decode_list(d, 1, MAX_TAI_FOR_PAGING)
    })?;
    Ok(PagingData {
        ue_paging_identity: pdu.require_ie(ID_UE_PAGING_IDENTITY, "UEPagingIdentity", get_ue_paging_identity)?,
        paging_drx: pdu.decode_ie(ID_PAGING_DRX, PagingDrx::decode_per)?,
        tai_list: items.into_iter().map(|item| item.0).collect(),
    })
}

/// Build and encode a Paging message to bytes
pub fn encode_paging(params: &PagingParams) -> NgapResult<Vec<u8>> {
    build_paging(params)?.encode()
}

/// Decode and parse a Paging message from bytes
pub fn decode_paging(bytes: &[u8]) -> NgapResult<PagingData> {
    parse_paging(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is a Paging message
pub fn is_paging(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::Paging)
}
