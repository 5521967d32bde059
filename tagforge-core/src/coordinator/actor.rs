//! Coordinator actor: the single task owning every session map.
//!
//! Each command is handled to completion before the next one is received, so
//! composite sequences (recording a result, clearing the session, deciding an
//! assignment) are atomic without any lock scoping.

use super::{
    state::{SessionState, TagState, WriteStyle},
    VerifyMetrics,
};
use crate::result_log::{ResultLine, ResultStatus};
use arc_swap::ArcSwap;
use std::{sync::Arc, time::Instant};
use tagforge_common::CoordinatorSettings;
use tagforge_epc::{ChipRegistry, EpcGenerator, TagIdentifier, TidParser};
use tagforge_error::{channel::ChannelError, TFError, TFResult};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of one TID.
#[derive(Debug, Clone, Default)]
pub(crate) struct TagSnapshot {
    pub state: Option<TagState>,
    pub expected: Option<String>,
    pub result: Option<String>,
    pub processed: bool,
    pub success: bool,
}

/// Parameters for the write request the handle is about to submit.
#[derive(Debug, Clone)]
pub(crate) struct WritePlan {
    pub payload: String,
    pub word_offset: u16,
    pub word_count: u16,
    pub retry_count: u32,
}

#[derive(Debug)]
pub(crate) enum VerifyDecision {
    /// Terminal; the line still has to reach the result sink.
    Recorded(ResultLine),
    /// Rewrite with the same style.
    Retry { style: WriteStyle, retry_count: u32 },
}

pub(crate) struct Discovery {
    pub tid: TagIdentifier,
    pub epc: String,
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
}

pub(crate) enum Command {
    Discover {
        samples: Vec<Discovery>,
        reply: oneshot::Sender<Vec<TagIdentifier>>,
    },
    RecordExpected {
        tid: TagIdentifier,
        epc: String,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        tid: TagIdentifier,
        reply: oneshot::Sender<TagSnapshot>,
    },
    SuccessCount {
        reply: oneshot::Sender<usize>,
    },
    RecordResult {
        tid: TagIdentifier,
        text: String,
        was_success: bool,
        reply: oneshot::Sender<bool>,
    },
    NextEpc {
        current_epc: String,
        tid: TagIdentifier,
        reply: oneshot::Sender<TFResult<String>>,
    },
    BeginWrite {
        tid: TagIdentifier,
        style: WriteStyle,
        fresh: bool,
        reply: oneshot::Sender<TFResult<WritePlan>>,
    },
    BeginVerify {
        tid: TagIdentifier,
        reply: oneshot::Sender<u32>,
    },
    Verify {
        tid: TagIdentifier,
        read_epc: String,
        metrics: VerifyMetrics,
        reply: oneshot::Sender<TFResult<VerifyDecision>>,
    },
    DispatchFailed {
        tid: TagIdentifier,
        error: ChannelError,
        reply: oneshot::Sender<ResultLine>,
    },
    CleanUp {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct CoordinatorActor {
    state: SessionState,
    generator: EpcGenerator,
    registry: Arc<ChipRegistry>,
    settings: Arc<ArcSwap<CoordinatorSettings>>,
    rx: mpsc::Receiver<Command>,
    token: CancellationToken,
}

impl CoordinatorActor {
    pub fn new(
        generator: EpcGenerator,
        registry: Arc<ChipRegistry>,
        settings: Arc<ArcSwap<CoordinatorSettings>>,
        rx: mpsc::Receiver<Command>,
        token: CancellationToken,
    ) -> Self {
        Self {
            state: SessionState::new(),
            generator,
            registry,
            settings,
            rx,
            token,
        }
    }

    pub async fn run(mut self) {
        info!("Coordinator actor started");
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!("Coordinator actor cancelled");
                    break;
                }
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        debug!("All coordinator handles dropped");
                        break;
                    }
                }
            }
        }
        info!(
            tags = self.state.tag_count(),
            successes = self.state.success_count(),
            "Coordinator actor stopped"
        );
    }

    // Reply send errors mean the caller went away; nothing to do.
    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Discover { samples, reply } => {
                let fresh = samples
                    .into_iter()
                    .filter(|s| {
                        self.state
                            .discover(&s.tid, &s.epc, s.rssi, s.antenna_port)
                    })
                    .map(|s| s.tid)
                    .collect::<Vec<_>>();
                for tid in &fresh {
                    debug!(tid = %tid, "Tag discovered");
                }
                let _ = reply.send(fresh);
            }
            Command::RecordExpected { tid, epc, reply } => {
                self.state.record_expected(&tid, &epc);
                let _ = reply.send(());
            }
            Command::Snapshot { tid, reply } => {
                let _ = reply.send(TagSnapshot {
                    state: self.state.state(&tid),
                    expected: self.state.expected(&tid).cloned(),
                    result: self.state.result(&tid).cloned(),
                    processed: self.state.is_processed(&tid),
                    success: self.state.is_success(&tid),
                });
            }
            Command::SuccessCount { reply } => {
                let _ = reply.send(self.state.success_count());
            }
            Command::RecordResult {
                tid,
                text,
                was_success,
                reply,
            } => {
                let _ = reply.send(self.state.record_result(&tid, &text, was_success));
            }
            Command::NextEpc {
                current_epc,
                tid,
                reply,
            } => {
                let _ = reply.send(self.next_epc(&current_epc, &tid));
            }
            Command::BeginWrite {
                tid,
                style,
                fresh,
                reply,
            } => {
                let _ = reply.send(self.begin_write(&tid, style, fresh));
            }
            Command::BeginVerify { tid, reply } => {
                let entry = self.state.entry_mut(&tid);
                entry.state = TagState::VerifyPending;
                entry.verify_started = Some(Instant::now());
                let _ = reply.send(entry.retries);
            }
            Command::Verify {
                tid,
                read_epc,
                metrics,
                reply,
            } => {
                let _ = reply.send(self.verify(&tid, &read_epc, metrics));
            }
            Command::DispatchFailed { tid, error, reply } => {
                let _ = reply.send(self.dispatch_failed(&tid, &error));
            }
            Command::CleanUp { reply } => {
                let tags = self.state.tag_count();
                self.state.clear();
                self.generator.used_serials().clear();
                info!(tags, "Session cleaned up");
                let _ = reply.send(());
            }
        }
    }

    /// Existing assignment, or a freshly generated one recorded before the
    /// reply is sent.
    fn next_epc(&mut self, current_epc: &str, tid: &TagIdentifier) -> TFResult<String> {
        if let Some(epc) = self.state.expected(tid) {
            return Ok(epc.clone());
        }
        let epc = self
            .generator
            .next_epc_for_tag(current_epc, tid.as_str())
            .map_err(|e| match e {
                TFError::Exhaustion(reason) => {
                    warn!(tid = %tid, reason = %reason, "EPC assignment exhausted");
                    TFError::AssignmentExhausted {
                        tid: tid.to_string(),
                    }
                }
                other => other,
            })?;
        self.state.record_expected(tid, &epc);
        debug!(tid = %tid, epc = %epc, "EPC assigned");
        Ok(epc)
    }

    fn begin_write(
        &mut self,
        tid: &TagIdentifier,
        style: WriteStyle,
        fresh: bool,
    ) -> TFResult<WritePlan> {
        let expected = self.state.expected(tid).cloned().ok_or_else(|| {
            TFError::InvalidState(format!("no expected EPC recorded for TID {tid}"))
        })?;
        let entry = self.state.entry_mut(tid);
        if fresh {
            entry.retries = 0;
        }
        entry.state = TagState::WritePending;
        entry.write_style = Some(style);
        entry.write_started = Some(Instant::now());
        entry.verify_started = None;
        Ok(WritePlan {
            payload: style.payload(&expected).to_string(),
            word_offset: style.word_offset(),
            word_count: u16::from(style.words()),
            retry_count: entry.retries,
        })
    }

    fn verify(
        &mut self,
        tid: &TagIdentifier,
        read_epc: &str,
        metrics: VerifyMetrics,
    ) -> TFResult<VerifyDecision> {
        let expected = self.state.expected(tid).cloned().ok_or_else(|| {
            TFError::InvalidState(format!("no expected EPC recorded for TID {tid}"))
        })?;
        let max_retries = self.settings.load().max_verify_retries;
        let read_epc = read_epc.trim().to_ascii_uppercase();
        let matched = read_epc.eq_ignore_ascii_case(&expected);

        let entry = self.state.entry_mut(tid);
        entry.rssi = metrics.rssi.or(entry.rssi);
        entry.antenna_port = metrics.antenna_port.or(entry.antenna_port);

        if !matched && entry.retries < max_retries {
            entry.retries += 1;
            entry.state = TagState::VerifiedFailure;
            // Style of the last write, which carries the payload length.
            let style = entry.write_style.unwrap_or(WriteStyle::Full);
            debug!(
                tid = %tid,
                expected = %expected,
                read = %read_epc,
                retry = entry.retries,
                "Verification mismatch, rewriting"
            );
            return Ok(VerifyDecision::Retry {
                style,
                retry_count: entry.retries,
            });
        }

        let (status, text) = if matched {
            entry.state = TagState::VerifiedSuccess;
            (ResultStatus::Success, format!("Success: {read_epc}"))
        } else {
            entry.state = TagState::VerifiedFailure;
            (
                ResultStatus::Failure,
                format!(
                    "Failure: read {read_epc} expected {expected} after {} retries",
                    entry.retries
                ),
            )
        };
        let line = self.result_line(tid, &expected, &read_epc, status);
        self.state.record_result(tid, &text, matched);
        Ok(VerifyDecision::Recorded(line))
    }

    fn dispatch_failed(&mut self, tid: &TagIdentifier, error: &ChannelError) -> ResultLine {
        let expected = self.state.expected(tid).cloned().unwrap_or_default();
        let line = self.result_line(tid, &expected, "", ResultStatus::ChannelError);
        self.state
            .record_result(tid, &format!("ChannelError: {error}"), false);
        line
    }

    fn result_line(
        &mut self,
        tid: &TagIdentifier,
        expected: &str,
        verified: &str,
        status: ResultStatus,
    ) -> ResultLine {
        let chip_model = TidParser::new(tid.as_str(), Arc::clone(&self.registry))
            .ok()
            .and_then(|p| p.model_name().ok().map(str::to_string));
        let now = Instant::now();
        let entry = self.state.entry_mut(tid);
        let write_time_ms = match (entry.write_started, entry.verify_started) {
            (Some(w), Some(v)) => v.saturating_duration_since(w).as_millis() as u64,
            (Some(w), None) => now.saturating_duration_since(w).as_millis() as u64,
            _ => 0,
        };
        let verify_time_ms = entry
            .verify_started
            .map(|v| now.saturating_duration_since(v).as_millis() as u64)
            .unwrap_or(0);
        ResultLine {
            timestamp: chrono::Local::now(),
            tid: tid.to_string(),
            previous_epc: entry.previous_epc.clone(),
            expected_epc: expected.to_string(),
            verified_epc: verified.to_string(),
            write_time_ms,
            verify_time_ms,
            status,
            retry_count: entry.retries,
            rssi: entry.rssi,
            antenna_port: entry.antenna_port,
            chip_model,
        }
    }
}

