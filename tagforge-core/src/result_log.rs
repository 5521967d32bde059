//! Per-cycle result lines and the sinks that receive them.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tagforge_error::TFResult;
use tokio::io::AsyncWriteExt;

/// Column order consumed by downstream tooling.
pub const CSV_HEADER: &str = "timestamp,TID,previousEPC,expectedEPC,verifiedEPC,writeTimeMs,verifyTimeMs,resultStatus,retryCount,rssi,antennaPort,chipModel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    Success,
    Failure,
    ChannelError,
}

impl Display for ResultStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultStatus::Success => "Success",
            ResultStatus::Failure => "Failure",
            ResultStatus::ChannelError => "ChannelError",
        };
        f.write_str(s)
    }
}

/// One write/verify cycle outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultLine {
    pub timestamp: DateTime<Local>,
    pub tid: String,
    pub previous_epc: String,
    pub expected_epc: String,
    pub verified_epc: String,
    pub write_time_ms: u64,
    pub verify_time_ms: u64,
    pub status: ResultStatus,
    pub retry_count: u32,
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
    pub chip_model: Option<String>,
}

impl ResultLine {
    /// Render as a CSV row. Missing optional values are empty cells and the
    /// trailing chip model column is omitted when unknown.
    pub fn to_csv_row(&self) -> String {
        let mut row = format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.tid,
            self.previous_epc,
            self.expected_epc,
            self.verified_epc,
            self.write_time_ms,
            self.verify_time_ms,
            self.status,
            self.retry_count,
            self.rssi.map(|r| format!("{r:.1}")).unwrap_or_default(),
            self.antenna_port.map(|p| p.to_string()).unwrap_or_default(),
        );
        if let Some(model) = &self.chip_model {
            row.push(',');
            row.push_str(&model.replace(',', ";"));
        }
        row
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append(&self, line: &ResultLine) -> TFResult<()>;
}

/// Emits each line as an `info` event on target `tagforge::result`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingResultSink;

#[async_trait]
impl ResultSink for TracingResultSink {
    async fn append(&self, line: &ResultLine) -> TFResult<()> {
        tracing::info!(
            target: "tagforge::result",
            tid = %line.tid,
            status = %line.status,
            retries = line.retry_count,
            "{}",
            line.to_csv_row()
        );
        Ok(())
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    lines: Mutex<Vec<ResultLine>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<ResultLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn append(&self, line: &ResultLine) -> TFResult<()> {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
        Ok(())
    }
}

/// Appends CSV rows to a file, writing the header when the file is new.
#[derive(Debug)]
pub struct CsvFileResultSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl CsvFileResultSink {
    pub async fn open<P: AsRef<Path>>(path: P) -> TFResult<Self> {
        let path = path.as_ref().to_path_buf();
        let is_new = !tokio::fs::try_exists(&path).await.unwrap_or(false);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if is_new {
            file.write_all(format!("{CSV_HEADER}\n").as_bytes()).await?;
        }
        tracing::info!(path = %path.display(), "result CSV opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for CsvFileResultSink {
    async fn append(&self, line: &ResultLine) -> TFResult<()> {
        let mut file = self.file.lock().await;
        file.write_all(format!("{}\n", line.to_csv_row()).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }
}
