//! NG Reset Procedure
//!
//! Implements the NG Reset procedure as defined in 3GPP TS 38.413 Section 8.7.4.
//! Either side may reset the whole NG interface or a list of UE-associated
//! logical NG connections.

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerError, PerResult};

/// maxnoofNGConnectionsToReset
const MAX_NG_CONNECTIONS_TO_RESET: usize = 65536;

/// One UE-associated logical NG connection; at least one ID is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeAssociatedNgConnection {
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u32>,
}

impl PerCodec for UeAssociatedNgConnection {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[self.amf_ue_ngap_id.is_some(), self.ran_ue_ngap_id.is_some(), false]);
        if let Some(id) = self.amf_ue_ngap_id {
            put_amf_ue_ngap_id(enc, id)?;
        }
        if let Some(id) = self.ran_ue_ngap_id {
            put_ran_ue_ngap_id(enc, id)?;
        }
        Ok(())
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 3, "UE-associatedLogicalNG-connectionItem")?;
        let amf_ue_ngap_id = if opt[0] { Some(get_amf_ue_ngap_id(dec)?) } else { None };
        let ran_ue_ngap_id = if opt[1] { Some(get_ran_ue_ngap_id(dec)?) } else { None };
        Ok(Self {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
        })
    }
}

/// ResetType
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetType {
    /// Reset all UE-associated connections of the interface
    NgInterface,
    PartOfNgInterface(Vec<UeAssociatedNgConnection>),
}

impl PerCodec for ResetType {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        match self {
            ResetType::NgInterface => {
                enc.put_choice(0, 3, false)?;
                // ResetAll ::= ENUMERATED { reset-all, ... }
                enc.put_enumerated(0, 1, true)
            }
            ResetType::PartOfNgInterface(list) => {
                enc.put_choice(1, 3, false)?;
                encode_list(enc, list, 1, MAX_NG_CONNECTIONS_TO_RESET)
            }
        }
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        match dec.get_choice(3, false, "ResetType")? {
            0 => {
                dec.get_enumerated(1, true)?;
                Ok(ResetType::NgInterface)
            }
            1 => Ok(ResetType::PartOfNgInterface(decode_list(dec, 1, MAX_NG_CONNECTIONS_TO_RESET)?)),
            _ => Err(PerError::UnsupportedExtension("ResetType")),
        }
    }
}

/// Parameters for building an NG Reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgResetParams {
    pub cause: Cause,
    pub reset_type: ResetType,
}

impl Default for NgResetParams {
    fn default() -> Self {
        Self {
            cause: Cause::MISC_OM_INTERVENTION,
            reset_type: ResetType::NgInterface,
        }
    }
}

/// Parsed NG Reset Acknowledge data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NgResetAcknowledgeData {
    /// Connections acknowledged for a partial reset
    pub connections: Vec<UeAssociatedNgConnection>,
}

/// Build an NG Reset PDU
pub fn build_ng_reset(params: &NgResetParams) -> NgapResult<NgapPdu> {
    if let ResetType::PartOfNgInterface(list) = &params.reset_type {
        if list.is_empty() {
            return Err(NgapError::MissingParameter("UE-associated logical NG-connection list"));
        }
        if list.iter().any(|c| c.amf_ue_ngap_id.is_none() && c.ran_ue_ngap_id.is_none()) {
            return Err(NgapError::MissingParameter("AMF-UE-NGAP-ID or RAN-UE-NGAP-ID"));
        }
    }
    NgapPdu::initiating(ProcedureCode::NgReset)
        .with_ie(ID_CAUSE, Criticality::Ignore, |e| params.cause.encode_per(e))?
        .with_ie(ID_RESET_TYPE, Criticality::Reject, |e| params.reset_type.encode_per(e))
}

/// Parse an NG Reset from an NGAP PDU
pub fn parse_ng_reset(pdu: &NgapPdu) -> NgapResult<NgResetParams> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::NgReset)?;
    Ok(NgResetParams {
        cause: pdu.require_ie(ID_CAUSE, "Cause", Cause::decode_per)?,
        reset_type: pdu.require_ie(ID_RESET_TYPE, "ResetType", ResetType::decode_per)?,
    })
}

/// Build an NG Reset Acknowledge PDU
pub fn build_ng_reset_acknowledge(data: &NgResetAcknowledgeData) -> NgapResult<NgapPdu> {
    let mut pdu = NgapPdu::successful(ProcedureCode::NgReset);
    if !data.connections.is_empty() {
        pdu.push_ie(ID_UE_ASSOCIATED_LOGICAL_NG_CONNECTION_LIST, Criticality::Ignore, |e| {
            encode_list(e, &data.connections, 1, MAX_NG_CONNECTIONS_TO_RESET)
        })?;
    }
    Ok(pdu)
}

/// Parse an NG Reset Acknowledge from an NGAP PDU
pub fn parse_ng_reset_acknowledge(pdu: &NgapPdu) -> NgapResult<NgResetAcknowledgeData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::NgReset)?;
    Ok(NgResetAcknowledgeData {
        connections: pdu
            .decode_ie(ID_UE_ASSOCIATED_LOGICAL_NG_CONNECTION_LIST, |d| {
                decode_list(d, 1, MAX_NG_CONNECTIONS_TO_RESET)
            })?
            .unwrap_or_default(),
    })
}

/// Build and encode an NG Reset to bytes
pub fn encode_ng_reset(params: &NgResetParams) -> NgapResult<Vec<u8>> {
    build_ng_reset(params)?.encode()
}

/// Decode and parse an NG Reset Acknowledge from bytes
pub fn decode_ng_reset_acknowledge(bytes: &[u8]) -> NgapResult<NgResetAcknowledgeData> {
    parse_ng_reset_acknowledge(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is an NG Reset Acknowledge
pub fn is_ng_reset_acknowledge(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::SuccessfulOutcome, ProcedureCode::NgReset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ng_reset_all_roundtrip() {
        let params = NgResetParams::default();
        let bytes = encode_ng_reset(&params).unwrap();
        assert_eq!(bytes[1], 20);
        let decoded = parse_ng_reset(&decode_ngap_pdu(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_ng_reset_partial_roundtrip() {
        let params = NgResetParams {
            cause: Cause::RADIO_NETWORK_UNSPECIFIED,
            reset_type: ResetType::PartOfNgInterface(vec![
                UeAssociatedNgConnection {
                    amf_ue_ngap_id: Some(7),
                    ran_ue_ngap_id: Some(1),
                },
                UeAssociatedNgConnection {
                    amf_ue_ngap_id: None,
                    ran_ue_ngap_id: Some(2),
                },
            ]),
        };
        let bytes = encode_ng_reset(&params).unwrap();
        assert_eq!(parse_ng_reset(&decode_ngap_pdu(&bytes).unwrap()).unwrap(), params);
    }

    #[test]
    fn test_ng_reset_validation() {
        let params = NgResetParams {
            cause: Cause::MISC_UNSPECIFIED,
            reset_type: ResetType::PartOfNgInterface(vec![UeAssociatedNgConnection::default()]),
        };
        assert!(matches!(build_ng_reset(&params), Err(NgapError::MissingParameter(_))));
    }

    #[test]
    fn test_ng_reset_acknowledge_roundtrip() {
        let bytes = build_ng_reset_acknowledge(&NgResetAcknowledgeData::default())
            .unwrap()
            .encode()
            .unwrap();
        let pdu = decode_ngap_pdu(&bytes).unwrap();
        assert!(is_ng_reset_acknowledge(&pdu));
        assert!(decode_ng_reset_acknowledge(&bytes).unwrap().connections.is_empty());
    }
}
