//! In-process tag field used by `tagforge simulate`.
//!
//! The channel forwards requests to a device task holding per-TID EPC memory;
//! the device executes them and reports completions back to the coordinator
//! the way a reader's event stream would.

use async_trait::async_trait;
use std::collections::HashMap;
use tagforge_core::{
    OperationKind, OperationRequest, OperationResult, TFCoordinator, TagChannel, TagSample,
};
use tagforge_epc::TagIdentifier;
use tagforge_error::channel::ChannelError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const EPC_BANK_BASE_WORD: u16 = 2;

pub struct SimulatedChannel {
    tx: mpsc::UnboundedSender<OperationRequest>,
}

#[async_trait]
impl TagChannel for SimulatedChannel {
    async fn submit_operation(&self, request: OperationRequest) -> Result<(), ChannelError> {
        self.tx
            .send(request)
            .map_err(|_| ChannelError::NotConnected)
    }

    async fn discard_all_pending(&self) -> Result<(), ChannelError> {
        // requests execute as soon as they arrive, nothing is ever pending
        Ok(())
    }
}

pub struct SimulatedDevice {
    rx: mpsc::UnboundedReceiver<OperationRequest>,
    memory: HashMap<TagIdentifier, String>,
    /// Every n-th write is silently dropped (0 disables).
    flaky_every: usize,
    writes: usize,
}

/// Build a connected channel/device pair over `tags` (TID, initial EPC).
pub fn field(tags: &[(TagIdentifier, String)], flaky_every: usize) -> (SimulatedChannel, SimulatedDevice) {
    let (tx, rx) = mpsc::unbounded_channel();
    let memory = tags.iter().cloned().collect();
    (
        SimulatedChannel { tx },
        SimulatedDevice {
            rx,
            memory,
            flaky_every,
            writes: 0,
        },
    )
}

/// Samples for every tag, as one inventory round would report them.
pub fn inventory(tags: &[(TagIdentifier, String)]) -> Vec<TagSample> {
    tags.iter()
        .enumerate()
        .map(|(i, (tid, epc))| TagSample {
            tid: tid.to_string(),
            epc: epc.clone(),
            rssi: Some(-45.0 - (i % 20) as f32),
            antenna_port: Some((i % 4 + 1) as u16),
        })
        .collect()
}

impl SimulatedDevice {
    pub async fn run(mut self, coordinator: TFCoordinator, token: CancellationToken) {
        info!(tags = self.memory.len(), "Simulated device started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => {
                        let result = self.execute(request);
                        // outcomes are logged by the coordinator
                        drop(coordinator.on_operation_complete(vec![result]));
                    }
                    None => break,
                }
            }
        }
        info!(writes = self.writes, "Simulated device stopped");
    }

    fn execute(&mut self, request: OperationRequest) -> OperationResult {
        let mut result = OperationResult {
            request_id: request.id,
            tid: request.tid.to_string(),
            kind: request.kind,
            success: true,
            read_epc: None,
            rssi: Some(-50.0),
            antenna_port: Some(1),
            error: None,
        };
        let Some(epc) = self.memory.get_mut(&request.tid) else {
            result.success = false;
            result.error = Some("tag not in field".into());
            return result;
        };

        match request.kind {
            OperationKind::Write | OperationKind::PartialWrite => {
                self.writes += 1;
                if self.flaky_every > 0 && self.writes % self.flaky_every == 0 {
                    debug!(tid = %request.tid, "Simulated write dropped");
                    return result;
                }
                let start = usize::from(request.word_offset.saturating_sub(EPC_BANK_BASE_WORD)) * 4;
                let end = (start + request.payload.len()).min(epc.len());
                if start < end {
                    epc.replace_range(start..end, &request.payload[..end - start]);
                }
            }
            OperationKind::Read => result.read_epc = Some(epc.clone()),
            OperationKind::Lock | OperationKind::Permalock => {}
        }
        result
    }
}
