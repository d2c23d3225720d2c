mod support;

use std::time::Duration;

use mtr_core::portal::{selectors, tracking_url};
use mtr_core::receiving::ReceiveSettings;
use mtr_core::records::RowStatus;
use mtr_core::report::ReportStore;
use mtr_core::robot::{receive_open_rows, resume};
use support::{config, defaults, open_row, pending_row, FakePortal};
use tempfile::tempdir;

#[tokio::test]
async fn failing_manifest_is_marked_and_the_next_one_still_runs() {
    let dir = tempdir().expect("tempdir");
    let screenshots = dir.path().to_string_lossy().to_string();
    let config = config(&screenshots);
    let report = dir.path().join("relatorio.xlsx");

    let mut store = ReportStore::new(
        &report,
        defaults(),
        vec![
            pending_row("11111"),
            open_row("12345", "2024-05-01 10:00:00", 2.5),
            open_row("67890", "2024-05-02 09:00:00", 2.5),
        ],
    );
    store.save().expect("save");

    let mut settings = ReceiveSettings::new(&config.portal, &config.waste);
    settings.settle = Duration::ZERO;
    let mut portal = FakePortal::new().with_text(selectors::ROW_WEIGHT_TEXT, "2,50000 (Ton)");
    portal.fail_on_fill = Some("12345".to_string());

    let outcomes = receive_open_rows(&mut portal, &mut store, &settings)
        .await
        .expect("receiving loop");

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].manifest, "12345");
    assert_eq!(outcomes[0].status, RowStatus::Error);
    assert!(outcomes[0].detail.contains("open dialog"));
    assert_eq!(outcomes[1].manifest, "67890");
    assert_eq!(outcomes[1].status, RowStatus::Sent);

    assert!(dir.path().join("erro_mtr_12345.png").exists());
    assert!(dir.path().join("sucesso_mtr_67890.png").exists());
    assert!(portal.called(&format!("fill {}=67890", selectors::RECEIVE_CODE)));

    let reloaded = ReportStore::load(&report, defaults()).expect("load");
    let statuses: Vec<(&str, RowStatus)> = reloaded
        .rows()
        .iter()
        .map(|row| (row.manifest.as_str(), row.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("11111", RowStatus::Pending),
            ("12345", RowStatus::Error),
            ("67890", RowStatus::Sent),
        ]
    );
}

#[tokio::test]
async fn row_without_weight_fails_before_touching_the_portal() {
    let dir = tempdir().expect("tempdir");
    let screenshots = dir.path().to_string_lossy().to_string();
    let config = config(&screenshots);
    let report = dir.path().join("relatorio.xlsx");

    let mut weightless = open_row("22222", "2024-05-01 10:00:00", 1.0);
    weightless.weight_tons = None;
    let mut store = ReportStore::new(&report, defaults(), vec![weightless]);
    store.save().expect("save");

    let settings = ReceiveSettings::new(&config.portal, &config.waste);
    let mut portal = FakePortal::new();

    let outcomes = receive_open_rows(&mut portal, &mut store, &settings)
        .await
        .expect("receiving loop");

    assert_eq!(outcomes[0].status, RowStatus::Error);
    assert!(!portal.called(&format!("fill {}=22222", selectors::RECEIVE_CODE)));
    assert!(portal.called(&format!("wait_url {}", tracking_url(&config.portal))));
    assert_eq!(store.rows()[0].status, RowStatus::Error);
}

#[tokio::test]
async fn resume_logs_in_and_receives_open_rows_of_an_existing_report() {
    let dir = tempdir().expect("tempdir");
    let screenshots = dir.path().to_string_lossy().to_string();
    let config = config(&screenshots);
    let report = dir.path().join("relatorio.xlsx");

    let mut already_sent = open_row("33333", "2024-05-01 10:00:00", 2.5);
    already_sent.status = RowStatus::Sent;
    ReportStore::new(
        &report,
        defaults(),
        vec![already_sent, open_row("44444", "2024-05-01 11:00:00", 2.5)],
    )
    .save()
    .expect("save");

    let mut portal = FakePortal::new().with_text(selectors::ROW_WEIGHT_TEXT, "2,50000 (Ton)");
    let summary = resume(&config, &mut portal, &report).await.expect("resume");

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.sent(), 1);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.outcomes[0].manifest, "44444");
    assert!(portal.called(&format!("click {}", selectors::LOGIN_SUBMIT)));
    assert!(!portal.called(&format!("fill {}=33333", selectors::RECEIVE_CODE)));

    let reloaded = ReportStore::load(&report, defaults()).expect("load");
    assert!(reloaded.open_rows().is_empty());
}

#[tokio::test]
async fn shared_manifest_outcomes_land_on_their_own_rows() {
    let dir = tempdir().expect("tempdir");
    let screenshots = dir.path().to_string_lossy().to_string();
    let config = config(&screenshots);
    let report = dir.path().join("relatorio.xlsx");

    let first = open_row("555", "2024-05-01 10:00:00", 2.5);
    let mut second = open_row("555", "2023-01-01 08:00:00", 2.5);
    second.ticket = Some("T-2".to_string());
    let mut store = ReportStore::new(&report, defaults(), vec![first, second]);
    store.save().expect("save");

    let mut settings = ReceiveSettings::new(&config.portal, &config.waste);
    settings.settle = Duration::ZERO;
    settings.calendar_step_cap = 3;
    let mut portal = FakePortal::new().with_text(selectors::ROW_WEIGHT_TEXT, "2,50000 (Ton)");
    portal.calendar_stuck = true;

    let outcomes = receive_open_rows(&mut portal, &mut store, &settings)
        .await
        .expect("receiving loop");

    let statuses: Vec<RowStatus> = outcomes.iter().map(|outcome| outcome.status).collect();
    assert_eq!(statuses, vec![RowStatus::Sent, RowStatus::Error]);
    assert!(outcomes[1].detail.contains("calendar"));

    let reloaded = ReportStore::load(&report, defaults()).expect("load");
    let stored: Vec<(Option<&str>, RowStatus)> = reloaded
        .rows()
        .iter()
        .map(|row| (row.ticket.as_deref(), row.status))
        .collect();
    assert_eq!(
        stored,
        vec![(Some("T-1"), RowStatus::Sent), (Some("T-2"), RowStatus::Error)]
    );
    assert!(reloaded.open_rows().is_empty());
}
