//! Integration tests for tally-core
//!
//! These tests exercise the full receipt → confirm → rate → ledger → report
//! workflow through the public API, against a file-backed database.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tally_core::{
    db::Database,
    models::{ExtractedFields, RateClass, UserIdentity, YearMonth},
    reporting::{render_monthly_report, send_monthly_summaries},
    ConversationEngine, EngineConfig, ExportFilter, InboundEvent, Ledger, MockBackend, Notifier,
    Reply,
};

/// Collects outbound messages
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, recipient: &UserIdentity, message: &str) -> tally_core::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.to_string()));
        Ok(())
    }
}

fn temp_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let db = Database::new_unencrypted(path.to_str().unwrap()).unwrap();
    (dir, db)
}

fn engine(db: &Database, extractor: MockBackend, outbox: Arc<Outbox>) -> ConversationEngine {
    ConversationEngine::new(
        Arc::new(extractor),
        Arc::new(db.clone()),
        outbox,
        EngineConfig::default(),
    )
}

// =============================================================================
// End-to-end conversation
// =============================================================================

#[tokio::test]
async fn test_receipt_and_manual_expenses_reach_the_ledger() {
    let (_dir, db) = temp_db();
    let outbox = Arc::new(Outbox::default());
    let engine = engine(&db, MockBackend::new(), outbox.clone());
    let user = "905551112233";

    // Receipt: 250 TRY at Migros, paid by card
    engine.process(InboundEvent::image(user, vec![1, 2, 3])).await;
    engine.process(InboundEvent::text(user, "yes")).await;
    engine.process(InboundEvent::text(user, "pos")).await;

    // Manual: 180,50 TRY at a market, cash
    engine.process(InboundEvent::text(user, "manual")).await;
    engine.process(InboundEvent::text(user, "180,50")).await;
    engine.process(InboundEvent::text(user, "Pazar")).await;
    engine.process(InboundEvent::text(user, "atm")).await;

    let owner = UserIdentity::new(user);
    let records = db.query_all_by_owner(&owner).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].converted_amount, 12750.0);
    assert_eq!(records[1].converted_amount, 9747.0);
    assert_eq!(records[1].rate_class, RateClass::Atm);

    // Every event got exactly one outbound message
    assert_eq!(outbox.sent.lock().unwrap().len(), 7);

    let replies = engine.handle(InboundEvent::text(user, "total")).await;
    match replies.as_slice() {
        [Reply::MonthlyTotal(summary)] => {
            assert_eq!(summary.count, 2);
            assert_eq!(summary.total_converted, 22497.0);
            assert_eq!(summary.rate_class_total(RateClass::Pos), 12750.0);
        }
        other => panic!("expected monthly total, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    let path = path.to_str().unwrap();

    {
        let db = Database::new_unencrypted(path).unwrap();
        let engine = engine(&db, MockBackend::new(), Arc::new(Outbox::default()));
        engine.handle(InboundEvent::image("u1", vec![9])).await;
        engine.handle(InboundEvent::text("u1", "yes")).await;
        engine.handle(InboundEvent::text("u1", "ATM")).await;
    }

    let db = Database::new_unencrypted(path).unwrap();
    assert_eq!(db.count_expenses().unwrap(), 1);
    let all = db.list_all_expenses(None).unwrap();
    assert_eq!(all[0].merchant, "Migros");
    assert_eq!(all[0].converted_amount, 13500.0);
}

#[tokio::test]
async fn test_unreadable_receipt_still_commits_with_typed_fields() {
    let (_dir, db) = temp_db();
    let engine = engine(
        &db,
        MockBackend::with_fields(ExtractedFields {
            amount: None,
            merchant: Some("BIM".to_string()),
            currency_hint: None,
            ..ExtractedFields::default()
        }),
        Arc::new(Outbox::default()),
    );

    engine.handle(InboundEvent::image("u1", vec![7])).await;
    // Amount typed straight at the confirmation prompt; merchant was read
    let replies = engine.handle(InboundEvent::text("u1", "42")).await;
    assert!(matches!(replies.as_slice(), [Reply::RatePrompt { .. }]));
    engine.handle(InboundEvent::text("u1", "POS")).await;

    let record = &db.list_all_expenses(None).unwrap()[0];
    assert_eq!(record.merchant, "BIM");
    assert_eq!(record.amount_original, 42.0);
    assert_eq!(record.converted_amount, 2142.0);
}

// =============================================================================
// Reporting and export
// =============================================================================

#[tokio::test]
async fn test_monthly_report_run_and_export() {
    let (_dir, db) = temp_db();
    let outbox = Arc::new(Outbox::default());
    let engine = engine(&db, MockBackend::new(), outbox.clone());

    for user in ["alice", "bob"] {
        engine.handle(InboundEvent::image(user, vec![1])).await;
        engine.handle(InboundEvent::text(user, "yes")).await;
        engine.handle(InboundEvent::text(user, "POS")).await;
    }

    let month = YearMonth::current();
    let stats = send_monthly_summaries(&db, outbox.as_ref(), month).await.unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.errors, 0);

    let sent = outbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, m)| m.contains("Monthly Report")));
    assert!(sent.iter().all(|(_, m)| m.contains("Migros")));

    let mut csv = Vec::new();
    let rows = db
        .export_expenses_csv(
            &ExportFilter {
                owner: Some(UserIdentity::new("alice")),
                month: Some(month),
            },
            &mut csv,
        )
        .unwrap();
    assert_eq!(rows, 1);
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.contains("alice"));
    assert!(!csv.contains("bob"));
}

#[tokio::test]
async fn test_empty_month_report_has_no_recipients() {
    let (_dir, db) = temp_db();
    let outbox = Outbox::default();

    let stats = send_monthly_summaries(&db, &outbox, YearMonth::new(2020, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(stats.sent, 0);
    assert!(outbox.sent.lock().unwrap().is_empty());

    let summary = tally_core::reporting::monthly_summary(
        &UserIdentity::new("nobody"),
        YearMonth::new(2020, 1).unwrap(),
        &[],
    );
    assert!(render_monthly_report(&summary).contains("January 2020"));
}
