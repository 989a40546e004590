use pretty_assertions::assert_eq;
use serde_json::json;
use specmatrix_audit::{
    read_journal, verify_chain, AuditAction, AuditLedger, AuditRecord, JsonlSink, VolatileSink,
};
use specmatrix_model::{RequestContext, UserId};
use std::sync::Arc;

fn sample_records(actor: UserId) -> Vec<AuditRecord> {
    let ctx = RequestContext::new()
        .with_ip("10.0.0.7")
        .with_user_agent("browser");
    vec![
        AuditRecord::new(AuditAction::ProjectCreated, "project", "p1")
            .actor(Some(actor))
            .context(&ctx)
            .details(json!({"name": "Pump station"})),
        AuditRecord::new(AuditAction::ExtractionStarted, "document", "d1")
            .context(&RequestContext::system()),
    ]
}

#[test]
fn journal_round_trips_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let actor = UserId::new();

    let ledger = AuditLedger::new(Arc::new(JsonlSink::open(&path).unwrap()));
    ledger.append_batch(sample_records(actor)).unwrap();
    ledger
        .append(AuditRecord::new(AuditAction::DocumentDeleted, "document", "d1").actor(Some(actor)))
        .unwrap();

    let restored = read_journal(&path).unwrap();
    assert_eq!(restored, ledger.entries());
    verify_chain(&restored).unwrap();
    assert_eq!(restored[1].context.ip_address.as_deref(), Some("system"));
}

#[test]
fn edited_journal_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let ledger = AuditLedger::new(Arc::new(JsonlSink::open(&path).unwrap()));
    ledger.append_batch(sample_records(UserId::new())).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("Pump station", "Pump statiom")).unwrap();

    let restored = read_journal(&path).unwrap();
    assert!(verify_chain(&restored).unwrap_err().is_integrity_violation());
}

#[test]
fn reopened_ledger_appends_to_same_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let ledger = AuditLedger::new(Arc::new(JsonlSink::open(&path).unwrap()));
        ledger.append_batch(sample_records(UserId::new())).unwrap();
    }
    let history = read_journal(&path).unwrap();
    let ledger =
        AuditLedger::with_history(Arc::new(JsonlSink::open(&path).unwrap()), history).unwrap();
    ledger
        .append(AuditRecord::new(AuditAction::ProjectPurged, "project", "p1"))
        .unwrap();

    let all = read_journal(&path).unwrap();
    assert_eq!(all.len(), 3);
    verify_chain(&all).unwrap();
}

#[test]
fn volatile_ledger_keeps_entries_in_memory() {
    let ledger = AuditLedger::new(Arc::new(VolatileSink));
    ledger.append_batch(sample_records(UserId::new())).unwrap();
    assert_eq!(ledger.len(), 2);
}
