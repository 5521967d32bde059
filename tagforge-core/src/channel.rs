//! Tag channel abstraction: the hardware-facing collaborator that executes
//! operation requests and reports tag sightings and completions.

use async_trait::async_trait;
use serde::Serialize;
use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};
use tagforge_epc::TagIdentifier;
use tagforge_error::channel::ChannelError;

/// Gen2 memory bank addressed by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryBank {
    Reserved,
    Epc,
    Tid,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Write,
    PartialWrite,
    Read,
    Lock,
    Permalock,
}

impl OperationKind {
    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(self, OperationKind::Write | OperationKind::PartialWrite)
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Write => "write",
            OperationKind::PartialWrite => "partial-write",
            OperationKind::Read => "read",
            OperationKind::Lock => "lock",
            OperationKind::Permalock => "permalock",
        };
        f.write_str(s)
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One operation for the channel to execute against a single tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Process-unique id echoed back in [`OperationResult::request_id`].
    pub id: u64,
    pub tid: TagIdentifier,
    pub kind: OperationKind,
    pub bank: MemoryBank,
    /// Offset in 16-bit words.
    pub word_offset: u16,
    /// Number of words read, or written when `payload` is set.
    pub word_count: u16,
    /// Uppercase hex payload for writes; empty otherwise.
    pub payload: String,
    /// 8 hex characters.
    pub access_password: String,
    pub retry_count: u32,
    pub block_write: bool,
}

impl OperationRequest {
    /// Allocate a request with a fresh id.
    pub fn new(tid: TagIdentifier, kind: OperationKind, bank: MemoryBank) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            tid,
            kind,
            bank,
            word_offset: 0,
            word_count: 0,
            payload: String::new(),
            access_password: String::new(),
            retry_count: 0,
            block_write: false,
        }
    }
}

/// A tag sighting reported by a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSample {
    pub tid: String,
    pub epc: String,
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
}

/// Completion of a previously submitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub request_id: u64,
    pub tid: String,
    pub kind: OperationKind,
    pub success: bool,
    /// EPC read back by a verification read.
    pub read_epc: Option<String>,
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
    pub error: Option<String>,
}

/// Hardware channel able to execute tag operations.
///
/// Implementations queue requests on the device and report completions
/// asynchronously through the coordinator's notification entry points.
#[async_trait]
pub trait TagChannel: Send + Sync {
    /// Queue `request` on the device.
    async fn submit_operation(&self, request: OperationRequest) -> Result<(), ChannelError>;

    /// Drop every request queued but not yet executed.
    async fn discard_all_pending(&self) -> Result<(), ChannelError>;
}

/// Result of handing a request to the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Submitted { request_id: u64 },
    /// First submission failed; the discard-and-resubmit retry succeeded.
    Resubmitted { request_id: u64 },
    /// Both submissions failed.
    ChannelError(ChannelError),
}

impl DispatchOutcome {
    #[inline]
    pub fn is_submitted(&self) -> bool {
        !matches!(self, DispatchOutcome::ChannelError(_))
    }
}
