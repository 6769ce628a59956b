//! AMF Context Management
//!
//! One context per AMF association. It owns the transport, the ordered
//! queue of every NGAP frame received from that AMF, and what NG Setup
//! learned about the AMF (name, capacity, served GUAMIs and PLMNs).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use coretester_common::{log_ngap_message, Direction, FrameQueue};
use coretester_ngap::ies::{Cause, TimeToWait};
use coretester_ngap::procedures::{NgSetupFailureData, NgSetupResponseData, PlmnSupportItem, ServedGuamiItem};
use coretester_ngap::{NgapPdu, Presence, ProcedureCode};
use coretester_sctp::{ue_stream, NgapTransport};
use tracing::{debug, info, warn};

use crate::error::Result;

/// AMF connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmfState {
    /// Association up, NG Setup not attempted
    #[default]
    Connected,
    /// NG Setup in progress
    WaitingNgSetup,
    /// NG Setup complete, ready for operation
    Ready,
    /// The AMF answered NG Setup Failure
    SetupFailed,
    /// Association closed
    Closed,
}

impl fmt::Display for AmfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfState::Connected => write!(f, "Connected"),
            AmfState::WaitingNgSetup => write!(f, "WaitingNgSetup"),
            AmfState::Ready => write!(f, "Ready"),
            AmfState::SetupFailed => write!(f, "SetupFailed"),
            AmfState::Closed => write!(f, "Closed"),
        }
    }
}

/// One received NGAP frame, as queued for waiters.
#[derive(Debug, Clone)]
pub struct NgapFrame {
    pub stream_id: u16,
    pub pdu: NgapPdu,
    /// Error of the gNB's own handler for this frame, if it failed
    pub handler_error: Option<String>,
}

impl NgapFrame {
    pub fn is(&self, presence: Presence, procedure_code: ProcedureCode) -> bool {
        self.pdu.is(presence, procedure_code)
    }

    /// Response (successful or unsuccessful outcome) of `procedure_code`.
    pub fn is_outcome_of(&self, procedure_code: ProcedureCode) -> bool {
        self.pdu.procedure_code == procedure_code && self.pdu.presence != Presence::InitiatingMessage
    }
}

/// What NG Setup (and its failure) taught us about the AMF
#[derive(Debug, Clone, Default)]
pub struct AmfInfo {
    pub state: AmfState,
    /// AMF name from NG Setup Response
    pub amf_name: Option<String>,
    /// Relative AMF capacity (0-255)
    pub relative_capacity: u8,
    pub served_guami_list: Vec<ServedGuamiItem>,
    pub plmn_support_list: Vec<PlmnSupportItem>,
    /// Cause of the last NG Setup Failure
    pub setup_failure: Option<(Cause, Option<TimeToWait>)>,
}

/// AMF context for one association
pub struct AmfContext {
    pub index: usize,
    transport: Arc<dyn NgapTransport>,
    num_streams: u16,
    frames: FrameQueue<NgapFrame>,
    info: Mutex<AmfInfo>,
}

impl AmfContext {
    pub fn new(index: usize, transport: Arc<dyn NgapTransport>, num_streams: u16) -> Self {
        let frames = FrameQueue::new(format!("NGAP frames from {}", transport.peer()));
        Self {
            index,
            transport,
            num_streams,
            frames,
            info: Mutex::new(AmfInfo::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AmfInfo> {
        self.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn transport(&self) -> &Arc<dyn NgapTransport> {
        &self.transport
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    /// Ordered queue of every frame received from this AMF.
    pub fn frames(&self) -> &FrameQueue<NgapFrame> {
        &self.frames
    }

    pub fn info(&self) -> AmfInfo {
        self.lock().clone()
    }

    pub fn state(&self) -> AmfState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == AmfState::Ready
    }

    pub fn relative_capacity(&self) -> u8 {
        self.lock().relative_capacity
    }

    /// Stream carrying the signalling of `ran_ue_ngap_id`.
    pub fn ue_stream(&self, ran_ue_ngap_id: u32) -> u16 {
        ue_stream(ran_ue_ngap_id, self.num_streams)
    }

    /// Encodes and sends `pdu` on `stream_id`.
    pub async fn send(&self, stream_id: u16, pdu: &NgapPdu) -> Result<()> {
        let bytes = pdu.encode()?;
        log_ngap_message(Direction::Tx, &pdu.message_name(), &bytes);
        self.transport.send(stream_id, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Marks the AMF as waiting for NG Setup response
    pub fn on_ng_setup_sent(&self) {
        self.lock().state = AmfState::WaitingNgSetup;
    }

    /// Updates the context with NG Setup Response data
    pub fn on_ng_setup_response(&self, response: NgSetupResponseData) {
        info!(
            amf = %self.peer(),
            amf_name = %response.amf_name,
            capacity = response.relative_amf_capacity,
            "NG Setup complete"
        );
        let mut info = self.lock();
        info.state = AmfState::Ready;
        info.amf_name = Some(response.amf_name);
        info.relative_capacity = response.relative_amf_capacity;
        info.served_guami_list = response.served_guami_list;
        info.plmn_support_list = response.plmn_support_list;
        info.setup_failure = None;
    }

    pub fn on_ng_setup_failure(&self, failure: &NgSetupFailureData) {
        warn!(amf = %self.peer(), cause = %failure.cause, time_to_wait = ?failure.time_to_wait, "NG Setup failed");
        let mut info = self.lock();
        info.state = AmfState::SetupFailed;
        info.setup_failure = Some((failure.cause, failure.time_to_wait));
    }

    /// Called by the read task once the association is gone.
    pub fn on_association_down(&self) {
        debug!(amf = %self.peer(), "AMF association down");
        let mut info = self.lock();
        info.state = AmfState::Closed;
        info.served_guami_list.clear();
        info.plmn_support_list.clear();
        drop(info);
        self.frames.close();
    }
}

impl fmt::Debug for AmfContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmfContext")
            .field("index", &self.index)
            .field("peer", &self.peer())
            .field("num_streams", &self.num_streams)
            .field("info", &self.info())
            .finish()
    }
}
