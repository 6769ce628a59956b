//! 5GSM messages (TS 24.501 8.3)

use coretester_common::SNssai;

use crate::codec::{get_array, get_lv, get_lve, get_u8, put_lv, put_lve, put_tlv, put_tlve, put_tv1, CodecError, CodecResult, OptionalIes};
use crate::enums::{PduSessionType, SmCause, SmMessageType};
use crate::header::PlainSmHeader;
use crate::ies::{
    decode_dnn, encode_dnn, PduAddress, ProtocolConfigurationOptions, QosFlowDescription, QosRule, SessionAmbr,
};

/// A 5GSM message; the PDU session ID and PTI live in the message itself.
pub trait SmMessage: Sized {
    const MESSAGE_TYPE: SmMessageType;

    fn pdu_session_id(&self) -> u8;

    fn pti(&self) -> u8;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()>;

    fn decode_body(header: &PlainSmHeader, buf: &mut &[u8]) -> CodecResult<Self>;

    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        PlainSmHeader::new(self.pdu_session_id(), self.pti(), Self::MESSAGE_TYPE).encode(&mut buf);
        self.encode_body(&mut buf)?;
        Ok(buf)
    }
}

const IEI_PDU_SESSION_TYPE: u8 = 0x90;
const IEI_SSC_MODE: u8 = 0xA0;
const IEI_EXTENDED_PCO: u8 = 0x7B;

fn session_type(value: u8) -> CodecResult<PduSessionType> {
    PduSessionType::try_from(value & 0x07).map_err(|_| CodecError::InvalidValue {
        field: "PDU session type",
        value: (value & 0x07).to_string(),
    })
}

fn optional_pco(ies: &OptionalIes) -> CodecResult<Option<ProtocolConfigurationOptions>> {
    ies.get(IEI_EXTENDED_PCO)
        .map(ProtocolConfigurationOptions::decode_value)
        .transpose()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionEstablishmentRequest {
    pub pdu_session_id: u8,
    pub pti: u8,
    /// Integrity protection maximum data rate, uplink then downlink
    pub integrity_max_data_rate: [u8; 2],
    pub pdu_session_type: Option<PduSessionType>,
    pub ssc_mode: Option<u8>,
    pub extended_pco: Option<ProtocolConfigurationOptions>,
}

impl PduSessionEstablishmentRequest {
    /// "Full data rate" in both directions
    pub const FULL_DATA_RATE: [u8; 2] = [0xFF, 0xFF];

    pub fn ipv4(pdu_session_id: u8, pti: u8) -> Self {
        Self {
            pdu_session_id,
            pti,
            integrity_max_data_rate: Self::FULL_DATA_RATE,
            pdu_session_type: Some(PduSessionType::Ipv4),
            ssc_mode: Some(1),
            extended_pco: Some(ProtocolConfigurationOptions::ue_request()),
        }
    }
}

impl SmMessage for PduSessionEstablishmentRequest {
    const MESSAGE_TYPE: SmMessageType = SmMessageType::PduSessionEstablishmentRequest;

    fn pdu_session_id(&self) -> u8 {
        self.pdu_session_id
    }

    fn pti(&self) -> u8 {
        self.pti
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.extend_from_slice(&self.integrity_max_data_rate);
        if let Some(pdu_type) = self.pdu_session_type {
            put_tv1(buf, IEI_PDU_SESSION_TYPE, pdu_type.into());
        }
        if let Some(mode) = self.ssc_mode {
            put_tv1(buf, IEI_SSC_MODE, mode);
        }
        if let Some(pco) = &self.extended_pco {
            put_tlve(buf, IEI_EXTENDED_PCO, &pco.encode_value())?;
        }
        Ok(())
    }

    fn decode_body(header: &PlainSmHeader, buf: &mut &[u8]) -> CodecResult<Self> {
        let integrity_max_data_rate = get_array(buf)?;
        let ies = OptionalIes::decode(buf, &[(0x55, 2)])?;
        Ok(Self {
            pdu_session_id: header.pdu_session_id,
            pti: header.pti,
            integrity_max_data_rate,
            pdu_session_type: ies.half(IEI_PDU_SESSION_TYPE).map(session_type).transpose()?,
            ssc_mode: ies.half(IEI_SSC_MODE).map(|v| v & 0x07),
            extended_pco: optional_pco(&ies)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionEstablishmentAccept {
    pub pdu_session_id: u8,
    pub pti: u8,
    pub pdu_session_type: PduSessionType,
    pub ssc_mode: u8,
    pub qos_rules: Vec<QosRule>,
    pub session_ambr: SessionAmbr,
    pub cause: Option<SmCause>,
    pub pdu_address: Option<PduAddress>,
    pub snssai: Option<SNssai>,
    pub qos_flow_descriptions: Vec<QosFlowDescription>,
    pub extended_pco: Option<ProtocolConfigurationOptions>,
    pub dnn: Option<String>,
}

impl PduSessionEstablishmentAccept {
    pub const IEI_CAUSE: u8 = 0x59;
    pub const IEI_PDU_ADDRESS: u8 = 0x29;
    pub const IEI_RQ_TIMER: u8 = 0x56;
    pub const IEI_SNSSAI: u8 = 0x22;
    pub const IEI_QOS_FLOW_DESCRIPTIONS: u8 = 0x79;
    pub const IEI_DNN: u8 = 0x25;

    /// Link MTU announced in the extended PCO.
    pub fn mtu(&self) -> Option<u16> {
        self.extended_pco.as_ref().and_then(ProtocolConfigurationOptions::ipv4_link_mtu)
    }

    /// QFI of the default rule, else of the first rule.
    pub fn default_qfi(&self) -> Option<u8> {
        self.qos_rules
            .iter()
            .find(|r| r.default_rule)
            .or_else(|| self.qos_rules.first())
            .map(|r| r.qfi)
    }

    /// 5QI announced for `qfi`.
    pub fn five_qi(&self, qfi: u8) -> Option<u8> {
        self.qos_flow_descriptions
            .iter()
            .find(|f| f.qfi == qfi)
            .and_then(|f| f.five_qi)
    }
}

impl SmMessage for PduSessionEstablishmentAccept {
    const MESSAGE_TYPE: SmMessageType = SmMessageType::PduSessionEstablishmentAccept;

    fn pdu_session_id(&self) -> u8 {
        self.pdu_session_id
    }

    fn pti(&self) -> u8 {
        self.pti
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(((self.ssc_mode & 0x07) << 4) | u8::from(self.pdu_session_type));
        put_lve(buf, &QosRule::encode_rules(&self.qos_rules))?;
        put_lv(buf, &self.session_ambr.encode_value())?;
        if let Some(cause) = self.cause {
            buf.extend_from_slice(&[Self::IEI_CAUSE, cause.into()]);
        }
        if let Some(address) = &self.pdu_address {
            put_tlv(buf, Self::IEI_PDU_ADDRESS, &address.encode_value())?;
        }
        if let Some(snssai) = &self.snssai {
            put_tlv(buf, Self::IEI_SNSSAI, &snssai.encode())?;
        }
        if !self.qos_flow_descriptions.is_empty() {
            put_tlve(
                buf,
                Self::IEI_QOS_FLOW_DESCRIPTIONS,
                &QosFlowDescription::encode_descriptions(&self.qos_flow_descriptions),
            )?;
        }
        if let Some(pco) = &self.extended_pco {
            put_tlve(buf, IEI_EXTENDED_PCO, &pco.encode_value())?;
        }
        if let Some(dnn) = &self.dnn {
            put_tlv(buf, Self::IEI_DNN, &encode_dnn(dnn)?)?;
        }
        Ok(())
    }

    fn decode_body(header: &PlainSmHeader, buf: &mut &[u8]) -> CodecResult<Self> {
        let octet = get_u8(buf)?;
        let pdu_session_type = session_type(octet & 0x0F)?;
        let ssc_mode = (octet >> 4) & 0x07;
        let qos_rules = QosRule::decode_rules(&get_lve(buf)?)?;
        let session_ambr = SessionAmbr::decode_value(&get_lv(buf)?)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_CAUSE, 1), (Self::IEI_RQ_TIMER, 1)])?;
        Ok(Self {
            pdu_session_id: header.pdu_session_id,
            pti: header.pti,
            pdu_session_type,
            ssc_mode,
            qos_rules,
            session_ambr,
            cause: ies.get(Self::IEI_CAUSE).and_then(|v| v.first().copied()).map(SmCause::from),
            pdu_address: ies.get(Self::IEI_PDU_ADDRESS).map(PduAddress::decode_value).transpose()?,
            snssai: ies
                .get(Self::IEI_SNSSAI)
                .map(|v| {
                    SNssai::decode(v).map_err(|e| CodecError::InvalidValue {
                        field: "S-NSSAI",
                        value: e.to_string(),
                    })
                })
                .transpose()?,
            qos_flow_descriptions: ies
                .get(Self::IEI_QOS_FLOW_DESCRIPTIONS)
                .map(QosFlowDescription::decode_descriptions)
                .transpose()?
                .unwrap_or_default(),
            extended_pco: optional_pco(&ies)?,
            dnn: ies.get(Self::IEI_DNN).map(decode_dnn).transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionEstablishmentReject {
    pub pdu_session_id: u8,
    pub pti: u8,
    pub cause: SmCause,
}

impl SmMessage for PduSessionEstablishmentReject {
    const MESSAGE_TYPE: SmMessageType = SmMessageType::PduSessionEstablishmentReject;

    fn pdu_session_id(&self) -> u8 {
        self.pdu_session_id
    }

    fn pti(&self) -> u8 {
        self.pti
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        Ok(())
    }

    fn decode_body(header: &PlainSmHeader, buf: &mut &[u8]) -> CodecResult<Self> {
        let cause = SmCause::from(get_u8(buf)?);
        OptionalIes::decode(buf, &[])?;
        Ok(Self {
            pdu_session_id: header.pdu_session_id,
            pti: header.pti,
            cause,
        })
    }
}
