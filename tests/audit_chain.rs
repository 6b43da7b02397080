// tests/audit_chain.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;

use uuid::Uuid;

use batchdag::audit::{AuditChainRecorder, AuditEvent, validate_records};
use batchdag::errors::AuditError;

type TestResult = Result<(), Box<dyn Error>>;

fn fill_chain(recorder: &mut AuditChainRecorder, execution: Uuid, n: usize) -> TestResult {
    recorder.append(
        Some(execution),
        AuditEvent::ExecutionStarted {
            job_id: "nightly".to_string(),
        },
    )?;
    for i in 1..n {
        recorder.append(
            Some(execution),
            AuditEvent::TransactionCompleted {
                transaction: format!("tx{i}"),
            },
        )?;
    }
    Ok(())
}

#[test]
fn appends_link_each_record_to_its_predecessor() -> TestResult {
    init_tracing();
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, Uuid::new_v4(), 5)?;

    let records = recorder.records();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].sequence, 1);
    assert_eq!(records[0].previous_hash, None);
    for pair in records.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert_eq!(pair[1].previous_hash.as_deref(), Some(pair[0].hash.as_str()));
    }
    Ok(())
}

#[test]
fn untampered_chain_validates_end_to_end() -> TestResult {
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, Uuid::new_v4(), 5)?;

    let result = recorder.validate_chain(1, 5);
    assert!(result.valid);
    assert_eq!(result.checked, 5);
    assert_eq!(result.first_invalid, None);
    assert!(!recorder.is_poisoned());
    Ok(())
}

#[test]
fn mutated_record_is_reported_at_its_own_sequence() -> TestResult {
    init_tracing();
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, Uuid::new_v4(), 5)?;

    // Tamper with R3's event body after the fact.
    let mut records = recorder.records().to_vec();
    records[2].event = AuditEvent::TransactionCompleted {
        transaction: "forged".to_string(),
    };

    let result = validate_records(&records);
    assert!(!result.valid);
    assert_eq!(result.first_invalid, Some(3));
    // R1 and R2 were verified before validation halted.
    assert_eq!(result.checked, 2);
    Ok(())
}

#[test]
fn rewritten_hash_breaks_the_successor_linkage() -> TestResult {
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, Uuid::new_v4(), 5)?;

    // Tamper with R3 and recompute its own hash so it self-verifies; the
    // break then shows up at R4, which no longer links to it.
    let mut records = recorder.records().to_vec();
    records[2].event = AuditEvent::TransactionCompleted {
        transaction: "forged".to_string(),
    };
    records[2].hash = records[2].compute_hash();

    let result = validate_records(&records);
    assert!(!result.valid);
    assert_eq!(result.first_invalid, Some(4));
    assert_eq!(result.checked, 3);
    Ok(())
}

#[test]
fn range_validation_only_walks_the_requested_records() -> TestResult {
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, Uuid::new_v4(), 6)?;

    let result = recorder.validate_chain(2, 4);
    assert!(result.valid);
    assert_eq!(result.checked, 3);
    Ok(())
}

#[test]
fn detected_tampering_poisons_the_recorder_until_acknowledged() -> TestResult {
    init_tracing();
    let execution = Uuid::new_v4();
    let mut recorder = AuditChainRecorder::new();
    fill_chain(&mut recorder, execution, 4)?;

    // Rehydrate from an archived copy that was tampered with in storage.
    let mut records = recorder.records().to_vec();
    records[1].event = AuditEvent::TransactionCompleted {
        transaction: "forged".to_string(),
    };
    let mut restored = AuditChainRecorder::from_records(records);

    let result = restored.validate_chain(1, 4);
    assert!(!result.valid);
    assert!(restored.is_poisoned());

    // Appends are refused while poisoned.
    let err = restored
        .append(
            Some(execution),
            AuditEvent::TransactionCompleted {
                transaction: "tx9".to_string(),
            },
        )
        .expect_err("poisoned recorder must refuse appends");
    assert_eq!(err, AuditError::Poisoned);

    // Operator acknowledgement re-opens the chain.
    restored.acknowledge_tamper();
    assert!(!restored.is_poisoned());
    restored.append(
        Some(execution),
        AuditEvent::ConfigMutated {
            detail: "chain resumed after tamper investigation".to_string(),
        },
    )?;
    Ok(())
}

#[test]
fn empty_chain_validates_trivially() {
    let mut recorder = AuditChainRecorder::new();
    let result = recorder.validate_chain(1, 100);
    assert!(result.valid);
    assert_eq!(result.checked, 0);
    assert!(recorder.is_empty());
    assert_eq!(recorder.len(), 0);
}
