//! NGAP relay
//!
//! - [`amf_context`]: per-association state and frame queue
//! - [`ue_context`]: UE-associated NG connections and their sessions
//! - [`builders`]: gNB-originated messages
//! - [`task`]: the read task and the handlers for AMF-originated messages

pub mod amf_context;
pub mod builders;
pub mod task;
pub mod ue_context;

pub use amf_context::{AmfContext, AmfInfo, AmfState, NgapFrame};
pub use ue_context::{SessionContext, UeContext, UeState};
