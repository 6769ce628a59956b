//! coretester-gnb - simulated gNB for testing a 5G core
//!
//! The gNB relays NAS between attached UE engines and one or more AMFs over
//! NGAP, answers the AMF-initiated procedures (context setup, PDU session
//! setup, release, reset) and drives the gNB-initiated ones (NG Setup, NG
//! Reset, path switch). PDU sessions it sets up can be turned into GTP-U
//! tunnels with [`gtp::open_tunnel`].
//!
//! # Architecture
//!
//! ```text
//!  UE engines <--- DownlinkSender --- Gnb --- NgapTransport ---> AMF
//!      |                              ^  |
//!      +------ UplinkSender ----------+  +--- FrameQueue (per AMF) ---> tests
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use coretester_gnb::Gnb;
//!
//! let gnb = Gnb::connect(config).await?;
//! gnb.ng_setup_all(Duration::from_secs(5)).await?;
//! let ue = gnb.attach_ue(ue_config)?;
//! ue.register().await?;
//! ue.wait_for_registration(Duration::from_secs(5)).await?;
//! ```

pub mod error;
pub mod gnb;
pub mod gtp;
pub mod ngap;
pub mod sctp;

pub use error::{GnbError, Result};
pub use gnb::{Gnb, GnbUplink};
pub use ngap::{AmfContext, AmfInfo, AmfState, NgapFrame, SessionContext, UeContext, UeState};
