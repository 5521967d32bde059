//! Tag operation lifecycle: the coordinator actor, the hardware channel seam
//! and result logging.

pub mod channel;
pub mod coordinator;
pub mod result_log;

pub use channel::{
    DispatchOutcome, MemoryBank, OperationKind, OperationRequest, OperationResult, TagChannel,
    TagSample,
};
pub use coordinator::{
    state::{TagState, WriteStyle},
    TFCoordinator, VerifyMetrics, VerifyOutcome,
};
pub use result_log::{
    CsvFileResultSink, MemoryResultSink, ResultLine, ResultSink, ResultStatus, TracingResultSink,
    CSV_HEADER,
};
