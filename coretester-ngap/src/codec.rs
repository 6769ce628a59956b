//! NGAP PDU codec
//!
//! The outer NGAP-PDU (TS 38.413 9.4) is a CHOICE of InitiatingMessage,
//! SuccessfulOutcome and UnsuccessfulOutcome, each carrying a procedure code,
//! a criticality and an open-type message value. Every message value modelled
//! here is a SEQUENCE holding a single ProtocolIE-Container, so a PDU is kept
//! as a list of IEs whose values stay PER encoded until a typed IE codec
//! (see [`crate::ies`]) reads them.

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

use crate::per::{PerDecoder, PerEncoder, PerError, PerResult};

// Protocol IE identifiers
pub const ID_ALLOWED_NSSAI: u16 = 0;
pub const ID_AMF_NAME: u16 = 1;
pub const ID_AMF_UE_NGAP_ID: u16 = 10;
pub const ID_CAUSE: u16 = 15;
pub const ID_CRITICALITY_DIAGNOSTICS: u16 = 19;
pub const ID_DEFAULT_PAGING_DRX: u16 = 21;
pub const ID_FIVE_G_S_TMSI: u16 = 26;
pub const ID_GLOBAL_RAN_NODE_ID: u16 = 27;
pub const ID_GUAMI: u16 = 28;
pub const ID_NAS_PDU: u16 = 38;
pub const ID_PAGING_DRX: u16 = 50;
pub const ID_PDU_SESSION_RESOURCE_RELEASED_LIST_PS_FAIL: u16 = 69;
pub const ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_REQ: u16 = 71;
pub const ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_RES: u16 = 72;
pub const ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_REQ: u16 = 74;
pub const ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_RES: u16 = 75;
pub const ID_PDU_SESSION_RESOURCE_TO_BE_SWITCHED_DL_LIST: u16 = 76;
pub const ID_PDU_SESSION_RESOURCE_SWITCHED_LIST: u16 = 77;
pub const ID_PLMN_SUPPORT_LIST: u16 = 80;
pub const ID_RAN_NODE_NAME: u16 = 82;
pub const ID_RAN_UE_NGAP_ID: u16 = 85;
pub const ID_RELATIVE_AMF_CAPACITY: u16 = 86;
pub const ID_RESET_TYPE: u16 = 88;
pub const ID_RRC_ESTABLISHMENT_CAUSE: u16 = 90;
pub const ID_SECURITY_CONTEXT: u16 = 93;
pub const ID_SECURITY_KEY: u16 = 94;
pub const ID_SERVED_GUAMI_LIST: u16 = 96;
pub const ID_SOURCE_AMF_UE_NGAP_ID: u16 = 100;
pub const ID_SUPPORTED_TA_LIST: u16 = 102;
pub const ID_TAI_LIST_FOR_PAGING: u16 = 103;
pub const ID_TIME_TO_WAIT: u16 = 107;
pub const ID_UE_ASSOCIATED_LOGICAL_NG_CONNECTION_LIST: u16 = 111;
pub const ID_UE_CONTEXT_REQUEST: u16 = 112;
pub const ID_UE_NGAP_IDS: u16 = 114;
pub const ID_UE_PAGING_IDENTITY: u16 = 115;
pub const ID_UE_SECURITY_CAPABILITIES: u16 = 119;
pub const ID_USER_LOCATION_INFORMATION: u16 = 121;
pub const ID_PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE: u16 = 130;
pub const ID_PDU_SESSION_RESOURCE_LIST_CXT_REL_REQ: u16 = 133;
pub const ID_PDU_SESSION_TYPE: u16 = 134;
pub const ID_QOS_FLOW_SETUP_REQUEST_LIST: u16 = 136;
pub const ID_UL_NGU_UP_TNL_INFORMATION: u16 = 139;

/// Maximum number of protocol IEs in a container
pub const MAX_PROTOCOL_IES: usize = 65535;

#[derive(Debug, Error)]
pub enum NgapError {
    #[error("PER codec error: {0}")]
    Per(#[from] PerError),

    #[error("Invalid message type: expected {expected}, got {actual}")]
    InvalidMessageType { expected: String, actual: String },

    #[error("Missing mandatory IE: {0}")]
    MissingMandatoryIe(&'static str),

    #[error("Invalid IE value: {0}")]
    InvalidIeValue(String),

    /// A builder was given an empty or zero required parameter.
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
}

pub type NgapResult<T> = Result<T, NgapError>;

/// Which CHOICE alternative of NGAP-PDU a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    InitiatingMessage,
    SuccessfulOutcome,
    UnsuccessfulOutcome,
}

impl Presence {
    fn index(self) -> usize {
        match self {
            Presence::InitiatingMessage => 0,
            Presence::SuccessfulOutcome => 1,
            Presence::UnsuccessfulOutcome => 2,
        }
    }
}

/// Elementary procedure codes (TS 38.413 9.4.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProcedureCode {
    AmfConfigurationUpdate = 0,
    DownlinkNasTransport = 4,
    ErrorIndication = 9,
    InitialContextSetup = 14,
    InitialUeMessage = 15,
    NgReset = 20,
    NgSetup = 21,
    Paging = 24,
    PathSwitchRequest = 25,
    PduSessionResourceModify = 26,
    PduSessionResourceRelease = 28,
    PduSessionResourceSetup = 29,
    UeContextRelease = 41,
    UeContextReleaseRequest = 42,
    UeRadioCapabilityInfoIndication = 44,
    UplinkNasTransport = 46,
    #[num_enum(catch_all)]
    Other(u8),
}

impl ProcedureCode {
    /// Criticality the procedure is sent with.
    pub fn default_criticality(self) -> Criticality {
        match self {
            ProcedureCode::DownlinkNasTransport
            | ProcedureCode::UplinkNasTransport
            | ProcedureCode::InitialUeMessage
            | ProcedureCode::Paging
            | ProcedureCode::ErrorIndication
            | ProcedureCode::UeContextReleaseRequest
            | ProcedureCode::UeRadioCapabilityInfoIndication => Criticality::Ignore,
            _ => Criticality::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Criticality {
    #[default]
    Reject,
    Ignore,
    Notify,
}

impl Criticality {
    fn encode(self, enc: &mut PerEncoder) -> PerResult<()> {
        let index = match self {
            Criticality::Reject => 0,
            Criticality::Ignore => 1,
            Criticality::Notify => 2,
        };
        enc.put_enumerated(index, 3, false)
    }

    fn decode(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        match dec.get_enumerated(3, false)? {
            0 => Ok(Criticality::Reject),
            1 => Ok(Criticality::Ignore),
            _ => Ok(Criticality::Notify),
        }
    }
}

/// One ProtocolIE-Field with its value still PER encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolIe {
    pub id: u16,
    pub criticality: Criticality,
    pub value: Vec<u8>,
}

impl ProtocolIe {
    /// Encodes `f` as the IE value.
    pub fn new<F>(id: u16, criticality: Criticality, f: F) -> PerResult<Self>
    where
        F: FnOnce(&mut PerEncoder) -> PerResult<()>,
    {
        let mut enc = PerEncoder::new();
        f(&mut enc)?;
        Ok(Self {
            id,
            criticality,
            value: enc.finish(),
        })
    }

    pub fn decode_value<T, F>(&self, f: F) -> PerResult<T>
    where
        F: FnOnce(&mut PerDecoder<'_>) -> PerResult<T>,
    {
        f(&mut PerDecoder::new(&self.value))
    }
}

/// ProtocolIE-Container: SEQUENCE (SIZE (0..maxProtocolIEs)) OF ProtocolIE-Field
pub fn encode_ie_container(enc: &mut PerEncoder, ies: &[ProtocolIe]) -> PerResult<()> {
    enc.put_constrained_length(ies.len(), 0, MAX_PROTOCOL_IES)?;
    for ie in ies {
        enc.put_constrained(u64::from(ie.id), 0, 65535)?;
        ie.criticality.encode(enc)?;
        enc.put_open_type(&ie.value)?;
    }
    Ok(())
}

pub fn decode_ie_container(dec: &mut PerDecoder<'_>) -> PerResult<Vec<ProtocolIe>> {
    let count = dec.get_constrained_length(0, MAX_PROTOCOL_IES)?;
    let mut ies = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let id = dec.get_constrained(0, 65535)? as u16;
        let criticality = Criticality::decode(dec)?;
        let value = dec.get_open_type()?;
        ies.push(ProtocolIe { id, criticality, value });
    }
    Ok(ies)
}

/// Lookup helpers shared by NGAP messages and nested transfers.
pub trait IeContainer {
    fn ies(&self) -> &[ProtocolIe];

    fn ie(&self, id: u16) -> Option<&ProtocolIe> {
        self.ies().iter().find(|ie| ie.id == id)
    }

    /// Decodes an optional IE.
    fn decode_ie<T, F>(&self, id: u16, f: F) -> NgapResult<Option<T>>
    where
        F: FnOnce(&mut PerDecoder<'_>) -> PerResult<T>,
    {
        match self.ie(id) {
            Some(ie) => Ok(Some(ie.decode_value(f)?)),
            None => Ok(None),
        }
    }

    /// Decodes a mandatory IE, failing with its name when absent.
    fn require_ie<T, F>(&self, id: u16, name: &'static str, f: F) -> NgapResult<T>
    where
        F: FnOnce(&mut PerDecoder<'_>) -> PerResult<T>,
    {
        self.decode_ie(id, f)?.ok_or(NgapError::MissingMandatoryIe(name))
    }
}

/// A decoded NGAP PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgapPdu {
    pub presence: Presence,
    pub procedure_code: ProcedureCode,
    pub criticality: Criticality,
    pub ies: Vec<ProtocolIe>,
}

impl IeContainer for NgapPdu {
    fn ies(&self) -> &[ProtocolIe] {
        &self.ies
    }
}

impl NgapPdu {
    pub fn new(presence: Presence, procedure_code: ProcedureCode) -> Self {
        Self {
            presence,
            procedure_code,
            criticality: procedure_code.default_criticality(),
            ies: Vec::new(),
        }
    }

    pub fn initiating(procedure_code: ProcedureCode) -> Self {
        Self::new(Presence::InitiatingMessage, procedure_code)
    }

    pub fn successful(procedure_code: ProcedureCode) -> Self {
        Self::new(Presence::SuccessfulOutcome, procedure_code)
    }

    pub fn unsuccessful(procedure_code: ProcedureCode) -> Self {
        Self::new(Presence::UnsuccessfulOutcome, procedure_code)
    }

    /// Appends an IE whose value is produced by `f`.
    pub fn push_ie<F>(&mut self, id: u16, criticality: Criticality, f: F) -> NgapResult<()>
    where
        F: FnOnce(&mut PerEncoder) -> PerResult<()>,
    {
        self.ies.push(ProtocolIe::new(id, criticality, f)?);
        Ok(())
    }

    /// Builder form of [`Self::push_ie`].
    pub fn with_ie<F>(mut self, id: u16, criticality: Criticality, f: F) -> NgapResult<Self>
    where
        F: FnOnce(&mut PerEncoder) -> PerResult<()>,
    {
        self.push_ie(id, criticality, f)?;
        Ok(self)
    }

    pub fn is(&self, presence: Presence, procedure_code: ProcedureCode) -> bool {
        self.presence == presence && self.procedure_code == procedure_code
    }

    /// Fails unless this PDU is the expected message.
    pub fn expect(&self, presence: Presence, procedure_code: ProcedureCode) -> NgapResult<()> {
        if self.is(presence, procedure_code) {
            return Ok(());
        }
        Err(NgapError::InvalidMessageType {
            expected: format!("{presence:?}/{procedure_code:?}"),
            actual: self.message_name(),
        })
    }

    pub fn message_name(&self) -> String {
        format!("{:?}/{:?}", self.presence, self.procedure_code)
    }

    pub fn encode(&self) -> NgapResult<Vec<u8>> {
        let mut enc = PerEncoder::new();
        enc.put_choice(self.presence.index(), 3, true)?;
        enc.put_constrained(u64::from(u8::from(self.procedure_code)), 0, 255)?;
        self.criticality.encode(&mut enc)?;
        enc.put_open_with(|value| {
            value.put_sequence_preamble(true, &[]);
            encode_ie_container(value, &self.ies)
        })?;
        Ok(enc.finish())
    }

    pub fn decode(bytes: &[u8]) -> NgapResult<Self> {
        let mut dec = PerDecoder::new(bytes);
        let presence = match dec.get_choice(3, true, "NGAP-PDU")? {
            0 => Presence::InitiatingMessage,
            1 => Presence::SuccessfulOutcome,
            _ => Presence::UnsuccessfulOutcome,
        };
        let procedure_code = ProcedureCode::from(dec.get_constrained(0, 255)? as u8);
        let criticality = Criticality::decode(&mut dec)?;
        let ies = dec.get_open_with(|value| {
            value.get_sequence_preamble(true, 0, "NGAP message")?;
            decode_ie_container(value)
        })?;
        Ok(Self {
            presence,
            procedure_code,
            criticality,
            ies,
        })
    }
}

/// Encode an NGAP PDU to bytes using APER
pub fn encode_ngap_pdu(pdu: &NgapPdu) -> NgapResult<Vec<u8>> {
    pdu.encode()
}

/// Decode an NGAP PDU from bytes using APER
pub fn decode_ngap_pdu(bytes: &[u8]) -> NgapResult<NgapPdu> {
    NgapPdu::decode(bytes)
}
