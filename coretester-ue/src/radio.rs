//! Air interface between a UE and its gNB
//!
//! There is no simulated RRC: NAS bytes cross directly between the UE
//! engine and the gNB relay through this pair of traits. The gNB implements
//! [`UplinkSender`] and the UE implements [`DownlinkSender`].

use async_trait::async_trait;
use coretester_common::FiveGSTmsi;

use crate::error::Result;
use crate::nas::sm::SessionTunnel;

/// UE to gNB direction.
#[async_trait]
pub trait UplinkSender: Send + Sync {
    /// First NAS message of a connection: the gNB wraps it in an
    /// Initial UE Message.
    async fn send_initial_ue_message(
        &self,
        ran_ue_ngap_id: u32,
        nas: Vec<u8>,
        s_tmsi: Option<FiveGSTmsi>,
    ) -> Result<()>;

    /// NAS message on an established connection (Uplink NAS Transport).
    async fn send_uplink_nas(&self, nas: Vec<u8>, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Result<()>;
}

/// gNB to UE direction.
///
/// Calls only enqueue; the UE processes them in order on its own task, so
/// the gNB's read loop is never held up by NAS processing.
pub trait DownlinkSender: Send + Sync {
    fn send_downlink_nas(&self, nas: Vec<u8>, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Result<()>;

    /// The connection was released (UE Context Release Command).
    fn rrc_release(&self) -> Result<()>;

    /// User plane resources for `psi` are set up on the gNB.
    fn pdu_session_resource_setup(&self, psi: u8, tunnel: SessionTunnel) -> Result<()>;
}
