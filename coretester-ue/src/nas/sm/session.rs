//! PDU session records
//!
//! A record is created when the network accepts a PDU session. The user
//! plane half (TEIDs, UPF address) arrives separately from the gNB once the
//! session resources are set up.

use std::net::{IpAddr, Ipv4Addr};

use coretester_common::SNssai;
use coretester_nas::PduSessionEstablishmentAccept;

use crate::error::{Result, UeError};

/// Number of PDU session identities (0 is unused).
pub const MAX_PDU_SESSIONS: usize = 16;

/// User plane resources of a session, as set up by the gNB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTunnel {
    pub ul_teid: u32,
    pub dl_teid: u32,
    pub upf_address: IpAddr,
    pub qfi: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSession {
    pub id: u8,
    pub ue_ip: Ipv4Addr,
    /// Link MTU from the extended PCO, when the network sent one
    pub mtu: Option<u16>,
    pub qfi: u8,
    pub five_qi: Option<u8>,
    pub dnn: Option<String>,
    pub snssai: Option<SNssai>,
    pub tunnel: Option<SessionTunnel>,
}

impl PduSession {
    /// Builds the record from an accept; the accept must carry an IPv4
    /// address and at least one QoS rule.
    pub fn from_accept(accept: &PduSessionEstablishmentAccept) -> Result<Self> {
        let ue_ip = accept
            .pdu_address
            .as_ref()
            .and_then(|a| a.ipv4)
            .ok_or(UeError::MissingIe("PDU address (IPv4)"))?;
        let qfi = accept.default_qfi().ok_or(UeError::MissingIe("QoS rule"))?;
        Ok(Self {
            id: accept.pdu_session_id,
            ue_ip,
            mtu: accept.mtu(),
            qfi,
            five_qi: accept.five_qi(qfi),
            dnn: accept.dnn.clone(),
            snssai: accept.snssai,
            tunnel: None,
        })
    }
}

/// Sessions of one UE, indexed by PDU session identity.
#[derive(Debug, Clone, Default)]
pub struct PduSessionTable {
    slots: [Option<PduSession>; MAX_PDU_SESSIONS],
}

impl PduSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `session`, replacing an older record with the same id.
    pub fn insert(&mut self, session: PduSession) -> Result<()> {
        let slot = self
            .slots
            .get_mut(session.id as usize)
            .filter(|_| session.id != 0)
            .ok_or(UeError::Config(format!("invalid PDU session id {}", session.id)))?;
        *slot = Some(session);
        Ok(())
    }

    pub fn get(&self, id: u8) -> Option<&PduSession> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut PduSession> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    pub fn remove(&mut self, id: u8) -> Option<PduSession> {
        self.slots.get_mut(id as usize)?.take()
    }

    /// Ids of the sessions present.
    pub fn ids(&self) -> Vec<u8> {
        self.iter().map(|s| s.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PduSession> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}
