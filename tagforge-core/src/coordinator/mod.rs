//! Tag operation lifecycle coordinator.
//!
//! [`TFCoordinator`] is a cloneable handle to an actor task that owns all
//! per-session maps. Hardware channels call the notification entry points
//! concurrently; the handle talks to the actor for every state change and
//! performs channel submission and result logging itself, outside the actor,
//! so a slow device never stalls bookkeeping.

mod actor;
pub mod state;

use crate::{
    channel::{
        DispatchOutcome, MemoryBank, OperationKind, OperationRequest, OperationResult,
        TagChannel, TagSample,
    },
    result_log::{ResultLine, ResultSink, ResultStatus},
};
use actor::{Command, CoordinatorActor, Discovery, VerifyDecision};
use arc_swap::ArcSwap;
use state::{TagState, WriteStyle, EPC_WORDS, EPC_WORD_OFFSET};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tagforge_common::CoordinatorSettings;
use tagforge_epc::{normalize_96, ChipRegistry, EpcGenerator, TagIdentifier, UsedSerialSet};
use tagforge_error::{channel::ChannelError, TFError, TFResult};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Signal quality attached to a verification read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VerifyMetrics {
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
}

/// Outcome of processing one verification read.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Read-back matched; result recorded.
    Success,
    /// Mismatch; a rewrite with the same style was submitted.
    Mismatch { retry: u32 },
    /// Mismatch, and the rewrite could not be submitted; recorded as failed.
    ChannelError(ChannelError),
    /// Mismatch with retries exhausted; recorded as failed.
    Failed { retries: u32 },
}

/// Cloneable handle to the coordinator actor.
#[derive(Clone)]
pub struct TFCoordinator {
    tx: mpsc::Sender<Command>,
    channel: Arc<dyn TagChannel>,
    sink: Arc<dyn ResultSink>,
    settings: Arc<ArcSwap<CoordinatorSettings>>,
    in_flight: Arc<AtomicUsize>,
    used: UsedSerialSet,
    token: CancellationToken,
}

impl TFCoordinator {
    /// Spawn the actor on the current runtime and return its handle.
    ///
    /// # Arguments
    /// * `settings` - Coordinator tunables; replaceable later through
    ///   [`TFCoordinator::update_settings`]
    /// * `registry` - Chip tables used for TID serials and result lines
    /// * `channel` - Device channel executing operation requests
    /// * `sink` - Receiver of one result line per finished cycle
    /// * `token` - Stops the actor when cancelled
    pub fn spawn(
        settings: CoordinatorSettings,
        registry: Arc<ChipRegistry>,
        channel: Arc<dyn TagChannel>,
        sink: Arc<dyn ResultSink>,
        token: CancellationToken,
    ) -> TFResult<Self> {
        let used = UsedSerialSet::new();
        let generator = EpcGenerator::new(
            Arc::clone(&registry),
            used.clone(),
            settings.random_attempts,
            &settings.default_vendor_prefix,
        )?;
        let (tx, rx) = mpsc::channel(settings.actor_queue_capacity.max(1));
        let settings = Arc::new(ArcSwap::from_pointee(settings));

        let actor = CoordinatorActor::new(
            generator,
            registry,
            Arc::clone(&settings),
            rx,
            token.clone(),
        );
        tokio::spawn(actor.run());

        Ok(Self {
            tx,
            channel,
            sink,
            settings,
            in_flight: Arc::new(AtomicUsize::new(0)),
            used,
            token,
        })
    }

    // === Configuration ===

    pub fn settings(&self) -> Arc<CoordinatorSettings> {
        self.settings.load_full()
    }

    /// Swap tunables; in-flight commands finish with the previous values.
    pub fn update_settings(&self, settings: CoordinatorSettings) {
        info!(
            backlog_threshold = settings.backlog_threshold,
            max_verify_retries = settings.max_verify_retries,
            "Coordinator settings updated"
        );
        self.settings.store(Arc::new(settings));
    }

    /// Serials issued in this session.
    pub fn used_serials(&self) -> &UsedSerialSet {
        &self.used
    }

    /// Requests submitted and not yet completed or discarded.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> TFResult<R> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| TFError::ServiceUnavailable)?;
        rx.await.map_err(|_| TFError::ServiceUnavailable)
    }

    // === Assignment and results ===

    /// Upsert the EPC `tid` should carry; the last call wins.
    pub async fn record_expected_epc(&self, tid: &str, epc: &str) -> TFResult<()> {
        let tid = TagIdentifier::parse(tid)?;
        let epc = normalize_96(epc)?;
        self.request(|reply| Command::RecordExpected { tid, epc, reply })
            .await
    }

    pub async fn expected_epc(&self, tid: &str) -> TFResult<Option<String>> {
        Ok(self.snapshot(tid).await?.expected)
    }

    pub async fn has_result(&self, tid: &str) -> TFResult<bool> {
        Ok(self.snapshot(tid).await?.result.is_some())
    }

    pub async fn result(&self, tid: &str) -> TFResult<Option<String>> {
        Ok(self.snapshot(tid).await?.result)
    }

    pub async fn is_processed(&self, tid: &str) -> TFResult<bool> {
        Ok(self.snapshot(tid).await?.processed)
    }

    pub async fn is_success(&self, tid: &str) -> TFResult<bool> {
        Ok(self.snapshot(tid).await?.success)
    }

    pub async fn tag_state(&self, tid: &str) -> TFResult<Option<TagState>> {
        Ok(self.snapshot(tid).await?.state)
    }

    async fn snapshot(&self, tid: &str) -> TFResult<actor::TagSnapshot> {
        let tid = TagIdentifier::parse(tid)?;
        self.request(|reply| Command::Snapshot { tid, reply }).await
    }

    /// Number of TIDs with a latched success.
    pub async fn success_count(&self) -> TFResult<usize> {
        self.request(|reply| Command::SuccessCount { reply }).await
    }

    /// Record an outcome for `tid`. Returns `true` when this call latched the
    /// TID's first success.
    pub async fn record_result(&self, tid: &str, text: &str, was_success: bool) -> TFResult<bool> {
        let tid = TagIdentifier::parse(tid)?;
        let text = text.to_string();
        self.request(|reply| Command::RecordResult {
            tid,
            text,
            was_success,
            reply,
        })
        .await
    }

    /// EPC assigned to `tid`, generating one from `current_epc` and the TID
    /// serial on first use.
    ///
    /// # Errors
    /// `AssignmentExhausted` when neither the TID serial nor the random
    /// fallback yields an unused value.
    pub async fn next_epc_for_tag(&self, current_epc: &str, tid: &str) -> TFResult<String> {
        let tid = TagIdentifier::parse(tid)?;
        let current_epc = current_epc.to_string();
        self.request(|reply| Command::NextEpc {
            current_epc,
            tid,
            reply,
        })
        .await?
    }

    /// Start a new session: every map and the used-serial set are cleared.
    pub async fn clean_up(&self) -> TFResult<()> {
        self.request(|reply| Command::CleanUp { reply }).await?;
        self.in_flight.store(0, Ordering::Release);
        Ok(())
    }

    // === Dispatch ===

    /// Write the full expected EPC. Verification is requested when the
    /// channel reports the write complete.
    pub async fn trigger_write_and_verify(&self, tid: &str) -> TFResult<DispatchOutcome> {
        let tid = TagIdentifier::parse(tid)?;
        self.dispatch_write(&tid, WriteStyle::Full, true).await
    }

    /// Write only the trailing `words` 16-bit words of the expected EPC.
    pub async fn trigger_partial_write_and_verify(
        &self,
        tid: &str,
        words: u8,
    ) -> TFResult<DispatchOutcome> {
        if words == 0 || words > EPC_WORDS {
            return Err(TFError::Argument(format!(
                "partial write must cover 1..={EPC_WORDS} words, got {words}"
            )));
        }
        let tid = TagIdentifier::parse(tid)?;
        let style = if words == EPC_WORDS {
            WriteStyle::Full
        } else {
            WriteStyle::Partial { words }
        };
        self.dispatch_write(&tid, style, true).await
    }

    /// Read back the EPC bank for verification.
    pub async fn trigger_verification_read(&self, tid: &str) -> TFResult<DispatchOutcome> {
        let tid = TagIdentifier::parse(tid)?;
        self.dispatch_verification_read(&tid).await
    }

    pub async fn lock_tag(&self, tid: &str) -> TFResult<DispatchOutcome> {
        let tid = TagIdentifier::parse(tid)?;
        self.dispatch_lock(&tid, OperationKind::Lock).await
    }

    /// Irreversibly lock the EPC bank.
    pub async fn permalock_tag(&self, tid: &str) -> TFResult<DispatchOutcome> {
        let tid = TagIdentifier::parse(tid)?;
        self.dispatch_lock(&tid, OperationKind::Permalock).await
    }

    async fn dispatch_write(
        &self,
        tid: &TagIdentifier,
        style: WriteStyle,
        fresh: bool,
    ) -> TFResult<DispatchOutcome> {
        let plan = self
            .request(|reply| Command::BeginWrite {
                tid: tid.clone(),
                style,
                fresh,
                reply,
            })
            .await??;
        let kind = match style {
            WriteStyle::Full => OperationKind::Write,
            WriteStyle::Partial { .. } => OperationKind::PartialWrite,
        };
        let settings = self.settings.load_full();
        let mut request = OperationRequest::new(tid.clone(), kind, MemoryBank::Epc);
        request.word_offset = plan.word_offset;
        request.word_count = plan.word_count;
        request.payload = plan.payload;
        request.access_password = settings.access_password.clone();
        request.retry_count = plan.retry_count;
        request.block_write = settings.block_write;
        self.submit(request).await
    }

    async fn dispatch_verification_read(&self, tid: &TagIdentifier) -> TFResult<DispatchOutcome> {
        let retry_count = self
            .request(|reply| Command::BeginVerify {
                tid: tid.clone(),
                reply,
            })
            .await?;
        let mut request = OperationRequest::new(tid.clone(), OperationKind::Read, MemoryBank::Epc);
        request.word_offset = EPC_WORD_OFFSET;
        request.word_count = u16::from(EPC_WORDS);
        request.access_password = self.settings.load().access_password.clone();
        request.retry_count = retry_count;
        self.submit(request).await
    }

    async fn dispatch_lock(
        &self,
        tid: &TagIdentifier,
        kind: OperationKind,
    ) -> TFResult<DispatchOutcome> {
        let mut request = OperationRequest::new(tid.clone(), kind, MemoryBank::Epc);
        request.access_password = self.settings.load().access_password.clone();
        self.submit(request).await
    }

    /// Submit, then record a channel failure when both attempts fail.
    async fn submit(&self, request: OperationRequest) -> TFResult<DispatchOutcome> {
        let tid = request.tid.clone();
        let outcome = self.dispatch(request).await;
        if let DispatchOutcome::ChannelError(e) = &outcome {
            let line = self
                .request(|reply| Command::DispatchFailed {
                    tid,
                    error: e.clone(),
                    reply,
                })
                .await?;
            self.emit(&line).await;
        }
        Ok(outcome)
    }

    /// Backlog check, submit, and one discard-and-resubmit retry.
    async fn dispatch(&self, request: OperationRequest) -> DispatchOutcome {
        let threshold = self.settings.load().backlog_threshold;
        let pending = self.in_flight();
        if pending > threshold {
            warn!(
                pending,
                threshold, "Operation backlog over threshold, discarding pending requests"
            );
            self.discard_pending().await;
        }

        let request_id = request.id;
        match self.channel.submit_operation(request.clone()).await {
            Ok(()) => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                debug!(
                    tid = %request.tid,
                    kind = %request.kind,
                    request_id,
                    "Operation submitted"
                );
                DispatchOutcome::Submitted { request_id }
            }
            Err(first) => {
                warn!(
                    tid = %request.tid,
                    kind = %request.kind,
                    error = %first,
                    "Submit failed, discarding pending and resubmitting once"
                );
                self.discard_pending().await;
                let tid = request.tid.clone();
                let kind = request.kind;
                match self.channel.submit_operation(request).await {
                    Ok(()) => {
                        self.in_flight.fetch_add(1, Ordering::AcqRel);
                        DispatchOutcome::Resubmitted { request_id }
                    }
                    Err(second) => {
                        error!(tid = %tid, kind = %kind, error = %second, "Resubmit failed");
                        DispatchOutcome::ChannelError(second)
                    }
                }
            }
        }
    }

    async fn discard_pending(&self) {
        if let Err(e) = self.channel.discard_all_pending().await {
            warn!(error = %e, "Discarding pending operations failed");
        }
        self.in_flight.store(0, Ordering::Release);
    }

    async fn emit(&self, line: &ResultLine) {
        if let Err(e) = self.sink.append(line).await {
            warn!(tid = %line.tid, error = %e, "Failed to append result line");
        }
    }

    // === Verification ===

    /// Compare a read-back EPC with the expected one.
    ///
    /// A mismatch rewrites with the style of the last write until the
    /// configured retry bound is reached. A match or exhaustion records the
    /// result and emits one result line.
    ///
    /// # Errors
    /// `InvalidState` when no expected EPC was recorded for `tid`.
    pub async fn process_verification_result(
        &self,
        tid: &str,
        read_epc: &str,
        metrics: VerifyMetrics,
    ) -> TFResult<VerifyOutcome> {
        let tid = TagIdentifier::parse(tid)?;
        let read_epc = read_epc.to_string();
        let decision = self
            .request(|reply| Command::Verify {
                tid: tid.clone(),
                read_epc,
                metrics,
                reply,
            })
            .await??;

        match decision {
            VerifyDecision::Recorded(line) => {
                self.emit(&line).await;
                Ok(match line.status {
                    ResultStatus::Success => VerifyOutcome::Success,
                    _ => VerifyOutcome::Failed {
                        retries: line.retry_count,
                    },
                })
            }
            VerifyDecision::Retry { style, retry_count } => {
                match self.dispatch_write(&tid, style, false).await? {
                    DispatchOutcome::ChannelError(e) => Ok(VerifyOutcome::ChannelError(e)),
                    _ => Ok(VerifyOutcome::Mismatch { retry: retry_count }),
                }
            }
        }
    }

    // === Notifications ===

    /// Tag sightings from a channel. Returns TIDs seen for the first time.
    pub async fn on_read_reported(&self, samples: Vec<TagSample>) -> Vec<TagIdentifier> {
        let samples: Vec<Discovery> = samples
            .into_iter()
            .filter_map(|s| match TagIdentifier::parse(&s.tid) {
                Ok(tid) => Some(Discovery {
                    tid,
                    epc: s.epc,
                    rssi: s.rssi,
                    antenna_port: s.antenna_port,
                }),
                Err(e) => {
                    warn!(tid = %s.tid, error = %e, "Ignoring sample with malformed TID");
                    None
                }
            })
            .collect();
        if samples.is_empty() {
            return Vec::new();
        }
        match self
            .request(|reply| Command::Discover { samples, reply })
            .await
        {
            Ok(fresh) => fresh,
            Err(e) => {
                error!(error = %e, "Coordinator unavailable for read report");
                Vec::new()
            }
        }
    }

    /// Completions from a channel. Writes are followed by a verification
    /// read; reads are verified. Failures are logged and recorded, never
    /// returned.
    ///
    /// Returns at once: follow-up submissions and result logging run on a
    /// spawned task, so the reporting channel is never held up by device or
    /// sink I/O. Await the handle to observe the verification outcomes.
    pub fn on_operation_complete(
        &self,
        results: Vec<OperationResult>,
    ) -> JoinHandle<Vec<VerifyOutcome>> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.complete_operations(results).await })
    }

    async fn complete_operations(&self, results: Vec<OperationResult>) -> Vec<VerifyOutcome> {
        let mut outcomes = Vec::new();
        for result in results {
            let _ = self
                .in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    Some(n.saturating_sub(1))
                });
            let tid = match TagIdentifier::parse(&result.tid) {
                Ok(tid) => tid,
                Err(e) => {
                    warn!(tid = %result.tid, error = %e, "Ignoring completion with malformed TID");
                    continue;
                }
            };

            match result.kind {
                OperationKind::Write | OperationKind::PartialWrite => {
                    if !result.success {
                        warn!(
                            tid = %tid,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "Write reported failure, verifying anyway"
                        );
                    }
                    if let Err(e) = self.dispatch_verification_read(&tid).await {
                        error!(tid = %tid, error = %e, "Verification read not dispatched");
                    }
                }
                OperationKind::Read => {
                    let read_epc = result.read_epc.unwrap_or_default();
                    let metrics = VerifyMetrics {
                        rssi: result.rssi,
                        antenna_port: result.antenna_port,
                    };
                    match self
                        .process_verification_result(tid.as_str(), &read_epc, metrics)
                        .await
                    {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => warn!(tid = %tid, error = %e, "Verification not processed"),
                    }
                }
                OperationKind::Lock | OperationKind::Permalock => {
                    if result.success {
                        info!(tid = %tid, kind = %result.kind, "Lock applied");
                    } else {
                        warn!(
                            tid = %tid,
                            kind = %result.kind,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "Lock failed"
                        );
                    }
                }
            }
        }
        outcomes
    }
}
