//! N2 transport setup
//!
//! Opens one SCTP association per configured AMF, bound to the gNB's NGAP
//! address. Everything above this point only sees [`NgapTransport`].
//!
//! [`NgapTransport`]: coretester_sctp::NgapTransport

use std::net::SocketAddr;

use coretester_common::{AmfConfig, GnbConfig};
use coretester_sctp::{SctpAssociation, SctpConfig};
use tracing::info;

use crate::error::Result;

/// Establishes the SCTP association to `amf`.
pub async fn connect_amf(config: &GnbConfig, amf: &AmfConfig) -> Result<SctpAssociation> {
    let local = SocketAddr::new(config.ngap_ip, 0);
    let remote = SocketAddr::new(amf.address, amf.port);
    info!(%local, %remote, "Connecting to AMF");

    let association = SctpAssociation::connect_with_local(local, remote, SctpConfig::default()).await?;
    info!(
        %remote,
        local = %association.local_addr(),
        streams = association.num_streams(),
        "Connected to AMF"
    );
    Ok(association)
}
