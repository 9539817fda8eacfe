//! End-to-end resolutions over fixture-backed read paths

use std::sync::Arc;

use labdesk::backend::{BackendRouter, Fixture, InMemoryBackend, ReadOperation, ANY_ITEM};
use labdesk::cache::QueryCache;
use labdesk::pipeline::{BookingsComposer, FailureStage, PipelineConfig, ResolveOptions};
use labdesk::types::{
    BackendError, IdentityMode, PipelineError, RawStatus, Reservation, ReservationKey,
    StatusCategory, Subject,
};

const WALLET: &str = "0x00000000000000000000000000000000000a11ce";
const NOW: i64 = 1_700_100_000;
const HOUR: i64 = 3600;

fn key(byte: &str) -> ReservationKey {
    ReservationKey::parse(&format!("0x{}", byte.repeat(32))).unwrap()
}

/// Same shape the binary reads with `--fixture`
fn fixture() -> Fixture {
    let raw = serde_json::json!({
        "keys": {
            WALLET: [key("01").as_str(), key("02").as_str(), key("03").as_str()]
        },
        "counts": { WALLET: 3 },
        "reservations": [
            {
                "key": key("01").as_str(), "labId": 1, "status": "confirmed",
                "start": NOW - 2 * HOUR, "end": NOW - HOUR, "renter": WALLET
            },
            {
                "key": key("02").as_str(), "labId": 2, "status": "confirmed",
                "start": NOW + HOUR, "end": NOW + 2 * HOUR, "renter": WALLET
            },
            {
                "key": key("03").as_str(), "labId": 1, "status": "cancelled",
                "start": NOW - 10 * HOUR, "end": NOW - 9 * HOUR, "renter": WALLET
            }
        ],
        "labs": [
            { "id": 1, "uri": "ipfs://lab-1" },
            { "id": 2 }
        ],
        "metadata": {
            "ipfs://lab-1": { "name": "Oscilloscope", "category": "electronics" }
        },
        "owners": {
            "1": { "address": "0x00000000000000000000000000000000000b0b00", "name": "Uni Lab" }
        }
    });
    serde_json::from_value(raw).unwrap()
}

struct Setup {
    wallet: Arc<InMemoryBackend>,
    institutional: Arc<InMemoryBackend>,
    composer: BookingsComposer,
}

fn setup() -> Setup {
    let wallet = Arc::new(InMemoryBackend::from_fixture("wallet", fixture()));
    let institutional = Arc::new(InMemoryBackend::new("institutional"));
    let router = BackendRouter::new(wallet.clone(), institutional.clone());
    let composer = BookingsComposer::new(
        router,
        Arc::new(QueryCache::with_defaults()),
        PipelineConfig::default(),
    );
    Setup {
        wallet,
        institutional,
        composer,
    }
}

#[tokio::test]
async fn resolves_classifies_and_summarizes_fixture() {
    let s = setup();
    let composed = s
        .composer
        .resolve(Subject::wallet(WALLET), ResolveOptions::default().at(NOW))
        .await
        .unwrap();

    assert_eq!(composed.records.len(), 3);
    assert_eq!(composed.summary.completed, 1);
    assert_eq!(composed.summary.upcoming, 1);
    assert_eq!(composed.summary.cancelled, 1);
    assert_eq!(composed.summary.total, 3);

    let first = composed.find(&key("01")).unwrap();
    assert_eq!(first.category, StatusCategory::Completed);
    assert_eq!(first.lab_name, "Oscilloscope");

    // Lab 2 has neither metadata nor owner: fallback name plus partial failures
    let second = composed.find(&key("02")).unwrap();
    assert_eq!(second.lab_name, "Lab 2");
    assert!(composed
        .partial_failures
        .iter()
        .any(|f| f.stage == FailureStage::LabOwner));

    // Recent activity holds started bookings only, most recent first
    let recent: Vec<_> = composed
        .recent_activity
        .iter()
        .filter_map(|b| b.key.clone())
        .collect();
    assert_eq!(recent, vec![key("01"), key("03")]);

    // Lab 1 is shared by two bookings but joined once
    assert_eq!(s.wallet.calls(ReadOperation::Lab), 2);
    assert_eq!(s.wallet.calls(ReadOperation::LabMetadata), 1);
    assert_eq!(s.institutional.total_calls(), 0);
}

#[tokio::test]
async fn optimistic_booking_is_replaced_by_confirmed_one() {
    let s = setup();
    let subject = Subject::wallet(WALLET);
    let start = NOW + 24 * HOUR;

    s.composer
        .resolve(subject.clone(), ResolveOptions::default().at(NOW))
        .await
        .unwrap();

    s.composer
        .insert_optimistic(&subject, 2, start, Some(start + HOUR));
    let pending = s
        .composer
        .resolve(subject.clone(), ResolveOptions::default().at(NOW))
        .await
        .unwrap();
    assert_eq!(pending.records.len(), 4);
    assert_eq!(pending.optimistic_count(), 1);
    assert_eq!(pending.summary.pending, 1);

    // The request lands on the backend a few seconds off the local guess
    let confirmed = Reservation::new(key("04"), 2, RawStatus::Pending)
        .with_window(start + 5, start + HOUR)
        .with_renter(WALLET);
    s.wallet.insert_reservation(confirmed);
    s.wallet.set_keys(
        &subject,
        vec![key("01"), key("02"), key("03"), key("04")],
    );
    s.composer.confirm_mutation(&subject, Some(&key("04")));

    let settled = s
        .composer
        .resolve(subject, ResolveOptions::default().at(NOW))
        .await
        .unwrap();
    assert_eq!(settled.records.len(), 4);
    assert_eq!(settled.optimistic_count(), 0);
    assert_eq!(settled.find(&key("04")).unwrap().category, StatusCategory::Pending);
    assert!(s.composer.optimistic().is_empty());
    assert_eq!(s.wallet.calls(ReadOperation::Count), 2);
}

#[tokio::test]
async fn cached_resolution_issues_no_new_reads() {
    let s = setup();
    let subject = Subject::wallet(WALLET);
    s.composer
        .resolve(subject.clone(), ResolveOptions::default().at(NOW))
        .await
        .unwrap();
    let reads = s.wallet.total_calls();

    let again = s
        .composer
        .resolve(subject, ResolveOptions::default().at(NOW))
        .await
        .unwrap();
    assert_eq!(again.records.len(), 3);
    assert_eq!(s.wallet.total_calls(), reads);

    // Lab 2's missing owner is answered from cache but still reported
    assert_eq!(s.wallet.calls(ReadOperation::LabOwner), 2);
    assert!(again
        .partial_failures
        .iter()
        .any(|f| f.stage == FailureStage::LabOwner && f.item == "2"));
}

#[tokio::test]
async fn failed_record_legs_are_tolerated() {
    let s = setup();
    s.wallet.fail_always(
        ReadOperation::Reservation,
        key("02").as_str(),
        BackendError::Status {
            code: 403,
            url: "memory://reservation".into(),
        },
    );

    let composed = s
        .composer
        .resolve(Subject::wallet(WALLET), ResolveOptions::default().at(NOW).without_details())
        .await
        .unwrap();

    assert_eq!(composed.records.len(), 2);
    assert!(composed.find(&key("02")).is_none());
    let failure = composed
        .partial_failures
        .iter()
        .find(|f| f.stage == FailureStage::Record)
        .unwrap();
    assert_eq!(failure.item, key("02").to_string());
    assert!(composed.records.iter().all(|b| b.lab.is_none()));
}

#[tokio::test]
async fn lab_subject_reads_through_its_own_path() {
    let s = setup();
    let lab = Subject::lab(1, IdentityMode::Institutional);
    s.institutional.set_keys(&lab, vec![key("01")]);
    s.institutional.insert_reservation(
        Reservation::new(key("01"), 1, RawStatus::Confirmed)
            .with_window(NOW - HOUR, NOW + HOUR)
            .with_renter(WALLET),
    );
    s.institutional.fail_always(
        ReadOperation::Lab,
        ANY_ITEM,
        BackendError::Network("offline".into()),
    );

    let composed = s
        .composer
        .resolve(lab, ResolveOptions::default().at(NOW))
        .await
        .unwrap();

    assert_eq!(composed.records.len(), 1);
    assert_eq!(composed.records[0].category, StatusCategory::Active);
    assert_eq!(composed.records[0].lab_name, "Lab 1");
    assert_eq!(s.wallet.total_calls(), 0);
}

#[tokio::test]
async fn unusable_config_fails_before_any_read() {
    let wallet = Arc::new(InMemoryBackend::from_fixture("wallet", fixture()));
    let institutional = Arc::new(InMemoryBackend::new("institutional"));
    let router = BackendRouter::new(wallet.clone(), institutional);
    let composer = BookingsComposer::new(
        router,
        Arc::new(QueryCache::with_defaults()),
        PipelineConfig {
            fanout_ceiling: 0,
            ..Default::default()
        },
    );

    let err = composer
        .resolve(Subject::wallet(WALLET), ResolveOptions::default().at(NOW))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(!err.is_retryable());
    assert_eq!(wallet.total_calls(), 0);
}
