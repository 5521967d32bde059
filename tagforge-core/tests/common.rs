#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, Once,
};
use tagforge_common::CoordinatorSettings;
use tagforge_core::{
    MemoryResultSink, OperationKind, OperationRequest, OperationResult, TFCoordinator, TagChannel,
};
use tagforge_epc::ChipRegistry;
use tagforge_error::channel::ChannelError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Level;

pub const TID: &str = "E2801160200074C5F1A2B3C4";
pub const SEED_EPC: &str = "3034257BF400B7800004CB2F";
pub const EXPECTED_EPC: &str = "3034257BF400B7C5F1A2B3C4";
/// Seed prefix plus the Monza R6 formula serial of [`TID`].
pub const ASSIGNED_EPC: &str = "3034257BF400B705F1A2B3C4";

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// In-memory channel recording submissions, with scripted failures.
#[derive(Debug)]
pub struct MockChannel {
    submitted: Mutex<Vec<OperationRequest>>,
    discards: AtomicUsize,
    failures_left: AtomicUsize,
    /// Submissions wait while this is `false`.
    open: watch::Sender<bool>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            discards: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            open: watch::channel(true).0,
        })
    }

    /// Block submissions until [`MockChannel::release_submissions`].
    pub fn hold_submissions(&self) {
        self.open.send_replace(false);
    }

    pub fn release_submissions(&self) {
        self.open.send_replace(true);
    }

    /// Make the next `n` submissions fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<OperationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn last(&self) -> OperationRequest {
        match self.submitted.lock().unwrap().last() {
            Some(r) => r.clone(),
            None => panic!("no request submitted"),
        }
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagChannel for MockChannel {
    async fn submit_operation(&self, request: OperationRequest) -> Result<(), ChannelError> {
        let mut open = self.open.subscribe();
        let ready = open.wait_for(|open| *open).await.is_ok();
        if !ready {
            return Err(ChannelError::NotConnected);
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChannelError::Transport("simulated".into()));
        }
        self.submitted.lock().unwrap().push(request);
        Ok(())
    }

    async fn discard_all_pending(&self) -> Result<(), ChannelError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub coordinator: TFCoordinator,
    pub channel: Arc<MockChannel>,
    pub sink: Arc<MemoryResultSink>,
}

pub fn harness(settings: CoordinatorSettings) -> Harness {
    init_tracing();
    let channel = MockChannel::new();
    let sink = Arc::new(MemoryResultSink::new());
    let coordinator = match TFCoordinator::spawn(
        settings,
        ChipRegistry::builtin(),
        channel.clone(),
        sink.clone(),
        CancellationToken::new(),
    ) {
        Ok(c) => c,
        Err(e) => panic!("failed to spawn coordinator: {e}"),
    };
    Harness {
        coordinator,
        channel,
        sink,
    }
}

/// Completion for `request` as the device would report it.
pub fn completion(request: &OperationRequest, read_epc: Option<&str>) -> OperationResult {
    OperationResult {
        request_id: request.id,
        tid: request.tid.to_string(),
        kind: request.kind,
        success: true,
        read_epc: read_epc.map(str::to_string),
        rssi: Some(-48.0),
        antenna_port: Some(1),
        error: None,
    }
}

pub fn is_read(request: &OperationRequest) -> bool {
    request.kind == OperationKind::Read
}
