//! User plane attachment
//!
//! Turns a PDU session the gNB set up (its tunnel endpoints) and what the
//! UE learned from the network (its address and MTU) into a GTP-U tunnel.

use std::net::IpAddr;

use coretester_gtp::{TunnelConfig, TunnelHandle, TunnelManager};
use coretester_ue::Ue;
use tracing::info;

use crate::error::{GnbError, Result};
use crate::ngap::ue_context::SessionContext;

/// Used when the network did not send a link MTU.
pub const DEFAULT_TUNNEL_MTU: u16 = 1400;

pub fn tunnel_config(session: &SessionContext, ue_ip: IpAddr, interface_name: &str, mtu: u16) -> TunnelConfig {
    TunnelConfig::new(
        interface_name,
        ue_ip,
        session.upf_address,
        session.ul_teid,
        session.dl_teid,
        mtu,
        session.qfi,
    )
}

/// Opens the tunnel of `session` on `manager` for `ue`.
///
/// The UE must have completed PDU session establishment for the same PSI.
pub async fn open_tunnel(
    manager: &TunnelManager,
    ue: &Ue,
    session: &SessionContext,
    interface_name: &str,
) -> Result<TunnelHandle> {
    let pdu_session = ue.pdu_session(session.psi).ok_or(GnbError::UnknownSession {
        ran_ue_ngap_id: ue.ran_ue_ngap_id(),
        psi: session.psi,
    })?;
    let mtu = pdu_session.mtu.unwrap_or(DEFAULT_TUNNEL_MTU);
    let config = tunnel_config(session, IpAddr::V4(pdu_session.ue_ip), interface_name, mtu);
    let handle = manager.add_tunnel(config).await?;
    info!(
        interface = interface_name,
        psi = session.psi,
        ue_ip = %pdu_session.ue_ip,
        ul_teid = session.ul_teid,
        dl_teid = session.dl_teid,
        "User plane tunnel open"
    );
    Ok(handle)
}
