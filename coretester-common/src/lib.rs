//! Common types and utilities for coretester
//!
//! This crate provides the identifiers, configuration records, logging setup
//! and the bounded message-wait queue shared by every coretester crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
pub mod wait;

pub use config::{
    AmfConfig, GnbConfig, OpType, ProtectionScheme, SupportedAlgs, UeConfig, DEFAULT_DL_TEID_BASE,
    DEFAULT_GTP_PORT, DEFAULT_NGAP_PORT,
};
pub use error::Error;
pub use logging::{
    init_logging, init_logging_with_filter, init_test_logging, log_gtp_message, log_nas_message,
    log_ngap_message, log_protocol_message, Direction, HexDump, LogLevel,
};
pub use types::*;
pub use wait::{FrameQueue, WaitError, MAX_QUEUE_DEPTH};
