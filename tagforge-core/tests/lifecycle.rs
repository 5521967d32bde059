mod common;

use common::{completion, harness, is_read, ASSIGNED_EPC, EXPECTED_EPC, SEED_EPC, TID};
use tagforge_common::CoordinatorSettings;
use tagforge_core::{
    DispatchOutcome, MemoryBank, OperationKind, ResultStatus, TagSample, TagState, VerifyMetrics,
    VerifyOutcome,
};
use tagforge_error::TFError;

#[tokio::test]
async fn full_write_verify_cycle_records_one_success() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;

    let fresh = c
        .on_read_reported(vec![TagSample {
            tid: TID.into(),
            epc: SEED_EPC.into(),
            rssi: Some(-50.0),
            antenna_port: Some(2),
        }])
        .await;
    assert_eq!(fresh.len(), 1);
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::Discovered));

    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::Assigned));

    let outcome = c.trigger_write_and_verify(TID).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Submitted { .. }));
    let write = h.channel.last();
    assert_eq!(write.kind, OperationKind::Write);
    assert_eq!(write.bank, MemoryBank::Epc);
    assert_eq!(write.word_offset, 2);
    assert_eq!(write.word_count, 6);
    assert_eq!(write.payload, EXPECTED_EPC);
    assert_eq!(write.access_password, "00000000");
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::WritePending));
    assert_eq!(c.in_flight(), 1);

    let outcomes = c
        .on_operation_complete(vec![completion(&write, None)])
        .await
        .unwrap();
    assert!(outcomes.is_empty());
    let read = h.channel.last();
    assert!(is_read(&read));
    assert_eq!(read.word_offset, 2);
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::VerifyPending));

    let lower = EXPECTED_EPC.to_ascii_lowercase();
    let outcomes = c
        .on_operation_complete(vec![completion(&read, Some(&lower))])
        .await
        .unwrap();
    assert_eq!(outcomes, vec![VerifyOutcome::Success]);
    assert_eq!(c.in_flight(), 0);
    assert_eq!(c.success_count().await.unwrap(), 1);
    assert!(c.is_processed(TID).await.unwrap());
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::Recorded));

    let lines = h.sink.lines();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line.status, ResultStatus::Success);
    assert_eq!(line.previous_epc, SEED_EPC);
    assert_eq!(line.verified_epc, EXPECTED_EPC);
    assert_eq!(line.chip_model.as_deref(), Some("Monza R6"));
    assert_eq!(line.antenna_port, Some(1));
}

#[tokio::test]
async fn success_is_latched_at_most_once() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    assert!(c.record_result(TID, "ok", true).await.unwrap());
    assert!(!c.record_result(TID, "ok again", true).await.unwrap());
    assert_eq!(c.success_count().await.unwrap(), 1);
    assert_eq!(c.result(TID).await.unwrap().as_deref(), Some("ok again"));
    assert!(c.has_result(TID).await.unwrap());
}

#[tokio::test]
async fn mismatch_retries_same_partial_style_then_fails() {
    let settings = CoordinatorSettings {
        max_verify_retries: 2,
        ..Default::default()
    };
    let h = harness(settings);
    let c = &h.coordinator;
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();

    c.trigger_partial_write_and_verify(TID, 2).await.unwrap();
    let first = h.channel.last();
    assert_eq!(first.kind, OperationKind::PartialWrite);
    assert_eq!(first.payload, &EXPECTED_EPC[16..]);
    assert_eq!(first.word_offset, 6);
    assert_eq!(first.word_count, 2);

    let wrong = "3034257BF400B7C5F1A2FFFF";
    let metrics = VerifyMetrics::default();
    assert_eq!(
        c.process_verification_result(TID, wrong, metrics).await.unwrap(),
        VerifyOutcome::Mismatch { retry: 1 }
    );
    let retry = h.channel.last();
    assert_eq!(retry.kind, OperationKind::PartialWrite);
    assert_eq!(retry.payload, first.payload);
    assert_eq!(retry.retry_count, 1);

    assert_eq!(
        c.process_verification_result(TID, wrong, metrics).await.unwrap(),
        VerifyOutcome::Mismatch { retry: 2 }
    );
    assert_eq!(
        c.process_verification_result(TID, wrong, metrics).await.unwrap(),
        VerifyOutcome::Failed { retries: 2 }
    );
    assert_eq!(h.channel.submitted().len(), 3);
    assert!(c.is_processed(TID).await.unwrap());
    assert!(!c.is_success(TID).await.unwrap());
    let lines = h.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].status, ResultStatus::Failure);
    assert_eq!(lines[0].retry_count, 2);
}

#[tokio::test]
async fn backlog_over_threshold_discards_pending() {
    let settings = CoordinatorSettings {
        backlog_threshold: 2,
        ..Default::default()
    };
    let h = harness(settings);
    let c = &h.coordinator;

    for _ in 0..3 {
        c.trigger_verification_read(TID).await.unwrap();
    }
    assert_eq!(c.in_flight(), 3);
    assert_eq!(h.channel.discards(), 0);

    c.trigger_verification_read(TID).await.unwrap();
    assert_eq!(h.channel.discards(), 1);
    assert_eq!(c.in_flight(), 1);
}

#[tokio::test]
async fn failed_submit_is_resubmitted_once() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;

    h.channel.fail_next(1);
    let outcome = c.lock_tag(TID).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Resubmitted { .. }));
    assert_eq!(h.channel.discards(), 1);
    assert_eq!(h.channel.last().kind, OperationKind::Lock);
    assert!(!c.has_result(TID).await.unwrap());
}

#[tokio::test]
async fn second_submit_failure_is_recorded_not_thrown() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();

    h.channel.fail_next(2);
    let outcome = c.trigger_write_and_verify(TID).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::ChannelError(_)));
    assert!(h.channel.submitted().is_empty());
    assert_eq!(c.in_flight(), 0);

    let result = c.result(TID).await.unwrap().unwrap_or_default();
    assert!(result.starts_with("ChannelError"), "{result}");
    assert!(!c.is_success(TID).await.unwrap());
    let lines = h.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].status, ResultStatus::ChannelError);
}

#[tokio::test]
async fn retry_that_cannot_be_submitted_reports_channel_error() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();
    c.trigger_write_and_verify(TID).await.unwrap();

    h.channel.fail_next(2);
    let outcome = c
        .process_verification_result(TID, SEED_EPC, VerifyMetrics::default())
        .await
        .unwrap();
    assert!(matches!(outcome, VerifyOutcome::ChannelError(_)));
    assert!(c.is_processed(TID).await.unwrap());
}

#[tokio::test]
async fn next_epc_is_first_writer_wins() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;

    let first = c.next_epc_for_tag(SEED_EPC, TID).await.unwrap();
    assert_eq!(first, ASSIGNED_EPC);
    let again = c.next_epc_for_tag("E2801160000000FFFFFFFFFF", TID).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(c.expected_epc(TID).await.unwrap().as_deref(), Some(ASSIGNED_EPC));

    // explicit upsert still overrides
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();
    assert_eq!(c.next_epc_for_tag(SEED_EPC, TID).await.unwrap(), EXPECTED_EPC);
}

#[tokio::test]
async fn exhausted_fallback_raises_assignment_exhausted() {
    let settings = CoordinatorSettings {
        random_attempts: 0,
        ..Default::default()
    };
    let h = harness(settings);
    let c = &h.coordinator;

    // Unknown chips sharing their last five bytes collide on the TID serial.
    c.next_epc_for_tag(SEED_EPC, "E2C0FFEE0000000102030405")
        .await
        .unwrap();
    let err = c
        .next_epc_for_tag(SEED_EPC, "E2C0FFEF0000000102030405")
        .await
        .unwrap_err();
    assert!(matches!(err, TFError::AssignmentExhausted { .. }), "{err}");
}

#[tokio::test]
async fn write_without_assignment_is_invalid_state() {
    let h = harness(CoordinatorSettings::default());
    let err = h.coordinator.trigger_write_and_verify(TID).await.unwrap_err();
    assert!(matches!(err, TFError::InvalidState(_)), "{err}");
    let err = h
        .coordinator
        .trigger_partial_write_and_verify(TID, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, TFError::Argument(_)), "{err}");
    assert!(h.channel.submitted().is_empty());
}

#[tokio::test]
async fn clean_up_starts_a_fresh_session() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    c.next_epc_for_tag(SEED_EPC, TID).await.unwrap();
    c.record_result(TID, "ok", true).await.unwrap();
    assert_eq!(c.used_serials().len(), 1);

    c.clean_up().await.unwrap();
    assert_eq!(c.success_count().await.unwrap(), 0);
    assert_eq!(c.expected_epc(TID).await.unwrap(), None);
    assert_eq!(c.tag_state(TID).await.unwrap(), None);
    assert!(!c.is_processed(TID).await.unwrap());
    assert!(c.used_serials().is_empty());

    // the TID serial is free again
    assert_eq!(c.next_epc_for_tag(SEED_EPC, TID).await.unwrap(), ASSIGNED_EPC);
}

#[tokio::test]
async fn settings_swap_applies_to_next_verification() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();
    c.update_settings(CoordinatorSettings {
        max_verify_retries: 0,
        ..Default::default()
    });
    assert_eq!(c.settings().max_verify_retries, 0);
    let outcome = c
        .process_verification_result(TID, SEED_EPC, VerifyMetrics::default())
        .await
        .unwrap();
    assert_eq!(outcome, VerifyOutcome::Failed { retries: 0 });
}

#[tokio::test]
async fn malformed_samples_are_ignored() {
    let h = harness(CoordinatorSettings::default());
    let fresh = h
        .coordinator
        .on_read_reported(vec![
            TagSample {
                tid: "nonsense".into(),
                epc: SEED_EPC.into(),
                rssi: None,
                antenna_port: None,
            },
            TagSample {
                tid: TID.into(),
                epc: SEED_EPC.into(),
                rssi: None,
                antenna_port: None,
            },
        ])
        .await;
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].as_str(), TID);
}

#[tokio::test]
async fn shutdown_makes_handle_unavailable() {
    let h = harness(CoordinatorSettings::default());
    h.coordinator.shutdown();
    tokio::task::yield_now().await;
    let err = h.coordinator.success_count().await.unwrap_err();
    assert!(matches!(err, TFError::ServiceUnavailable), "{err}");
}

#[tokio::test]
async fn completion_notification_returns_before_follow_up_submission() {
    let h = harness(CoordinatorSettings::default());
    let c = &h.coordinator;
    c.record_expected_epc(TID, EXPECTED_EPC).await.unwrap();
    c.trigger_write_and_verify(TID).await.unwrap();
    let write = h.channel.last();

    h.channel.hold_submissions();
    let pending = c.on_operation_complete(vec![completion(&write, None)]);
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());
    assert_eq!(h.channel.submitted().len(), 1);

    h.channel.release_submissions();
    let outcomes = pending.await.unwrap();
    assert!(outcomes.is_empty());
    assert!(is_read(&h.channel.last()));
    assert_eq!(c.tag_state(TID).await.unwrap(), Some(TagState::VerifyPending));
}
