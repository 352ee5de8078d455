//! Integration tests for the full transaction pipeline.
//!
//! Movement → Coordinator (per-item lock, atomic commit) → Publisher → Bus
//! → consumers.
//!
//! Verifies the ledger-sum invariant, linearized same-item commits,
//! parallel different-item commits, fault atomicity, broker-outage
//! tolerance and the reconciliation flow.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use equiptrack_core::{ItemId, LedgerEntryId};
use equiptrack_events::{EventBus, EventMessage, InMemoryEventBus, Subscription};
use equiptrack_warehouse::{ItemDraft, ItemStatus, LedgerEntry, Movement, MovementKind, StockRecord};

use crate::coordinator::{CommitError, CommitReceipt};
use crate::projections::notifications::{InMemoryNotificationStore, NotificationProjection, NotificationStore};
use crate::publisher::{self, BrokerLink, EventPublisher, InMemoryBrokerLink, LinkError, PublisherConfig, PublisherHandle};
use crate::reconciliation::{InMemoryPaperworkStore, PaperworkProbe, ProbeError, ReconciliationConfig};
use crate::service::WarehouseService;
use crate::store::{InMemoryWarehouseStore, LedgerStore, StockStore, StoreError, WarehouseStore};

fn draft(quantity: i64, min_quantity: i64) -> ItemDraft {
    ItemDraft {
        name: "Flow meter RS-100".to_string(),
        serial_number: "RS100-007".to_string(),
        category: "instruments".to_string(),
        description: String::new(),
        manufacturer: "Metrix".to_string(),
        unit_price: 48_000,
        quantity,
        min_quantity,
        location: "rack 2".to_string(),
        purchase_date: None,
        warranty_expiry: None,
    }
}

struct Harness {
    service: WarehouseService<InMemoryWarehouseStore>,
    store: Arc<InMemoryWarehouseStore>,
    paperwork: Arc<InMemoryPaperworkStore>,
    publisher: EventPublisher,
    bus: Arc<InMemoryEventBus<EventMessage>>,
    handle: PublisherHandle,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryWarehouseStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let (event_publisher, handle) = publisher::spawn(
        InMemoryBrokerLink::new(Arc::clone(&bus)),
        PublisherConfig::default(),
    );
    let paperwork = Arc::new(InMemoryPaperworkStore::new());
    let service = WarehouseService::new(
        Arc::clone(&store),
        event_publisher.clone(),
        Arc::clone(&paperwork) as Arc<dyn PaperworkProbe>,
        ReconciliationConfig::default(),
    );

    Harness {
        service,
        store,
        paperwork,
        publisher: event_publisher,
        bus,
        handle,
    }
}

fn ledger_sum(store: &InMemoryWarehouseStore, item_id: ItemId) -> i64 {
    store
        .item_history(item_id)
        .unwrap()
        .iter()
        .map(|e| e.quantity_delta)
        .sum()
}

/// Drain the subscription until a message with `topic` arrives (or panic).
fn wait_for_topic(sub: &Subscription<EventMessage>, topic: &str) -> EventMessage {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Ok(message) = sub.recv_timeout(Duration::from_millis(100)) {
            if message.topic == topic {
                return message;
            }
        }
    }
    panic!("no '{topic}' fact arrived in time");
}

#[test]
fn registration_writes_record_entry_and_fact() {
    let h = harness();
    let sub = h.bus.subscribe();

    let record = h.service.register_item(draft(10, 5), "admin").unwrap();

    assert_eq!(record.quantity, 10);
    assert_eq!(record.status, ItemStatus::Available);
    assert_eq!(ledger_sum(&h.store, record.id), 10);
    assert_eq!(h.store.entry_count_for_item(record.id).unwrap(), 1);

    let fact = wait_for_topic(&sub, "equipment.created");
    assert_eq!(fact.payload["serial_number"], "RS100-007");
    assert_eq!(h.publisher.dropped_count(), 0);

    h.handle.shutdown();
}

#[test]
fn issue_below_threshold_commits_and_reports_low() {
    let h = harness();
    let record = h.service.register_item(draft(10, 5), "admin").unwrap();

    let receipt = h
        .service
        .record_movement(
            Movement::new(record.id, MovementKind::Issue, 6, "storekeeper")
                .with_counterpart("field-team"),
        )
        .unwrap();

    assert_eq!(receipt.new_quantity, 4);
    assert_eq!(receipt.new_status, ItemStatus::Low);

    let stored = h.service.item(record.id).unwrap();
    assert_eq!(stored.quantity, 4);
    assert_eq!(stored.status, ItemStatus::Low);
    assert_eq!(ledger_sum(&h.store, record.id), 4);

    h.handle.shutdown();
}

#[test]
fn issuing_everything_reports_unavailable() {
    let h = harness();
    let record = h.service.register_item(draft(10, 5), "admin").unwrap();

    let receipt = h
        .service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 10, "storekeeper"))
        .unwrap();

    assert_eq!(receipt.new_quantity, 0);
    assert_eq!(receipt.new_status, ItemStatus::Unavailable);

    h.handle.shutdown();
}

#[test]
fn overdraw_is_rejected_and_leaves_state_untouched() {
    let h = harness();
    let record = h.service.register_item(draft(10, 5), "admin").unwrap();

    let err = h
        .service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 11, "storekeeper"))
        .unwrap_err();

    assert_eq!(
        err,
        CommitError::InsufficientStock {
            available: 10,
            requested: 11
        }
    );
    assert_eq!(h.service.item(record.id).unwrap().quantity, 10);
    assert_eq!(h.store.entry_count_for_item(record.id).unwrap(), 1);

    h.handle.shutdown();
}

#[test]
fn unknown_item_and_archived_item_are_not_found() {
    let h = harness();

    let err = h
        .service
        .record_movement(Movement::new(ItemId::new(), MovementKind::Intake, 1, "admin"))
        .unwrap_err();
    assert_eq!(err, CommitError::NotFound);

    let record = h.service.register_item(draft(5, 1), "admin").unwrap();
    h.service.archive_item(record.id).unwrap();

    let err = h
        .service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 1, "storekeeper"))
        .unwrap_err();
    assert_eq!(err, CommitError::NotFound);

    h.handle.shutdown();
}

#[test]
fn concurrent_issues_on_one_item_never_double_spend() {
    let h = harness();
    let record = h.service.register_item(draft(10, 2), "admin").unwrap();

    // Two issues of 6 against 10 in stock: together they would overdraw, so
    // exactly one must win.
    let barrier = Barrier::new(2);
    let service = &h.service;
    let item_id = record.id;
    let results: Vec<Result<CommitReceipt, CommitError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    service.record_movement(Movement::new(
                        item_id,
                        MovementKind::Issue,
                        6,
                        "storekeeper",
                    ))
                })
            })
            .collect();
        handles.into_iter().map(|j| j.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejections = results
        .iter()
        .filter(|r| matches!(r, Err(CommitError::InsufficientStock { .. })))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(rejections, 1);
    assert_eq!(h.service.item(record.id).unwrap().quantity, 4);
    assert_eq!(ledger_sum(&h.store, record.id), 4);

    h.handle.shutdown();
}

#[test]
fn different_items_commit_in_parallel() {
    let h = harness();
    let a = h.service.register_item(draft(60, 2), "admin").unwrap();
    let b = h.service.register_item(draft(60, 2), "admin").unwrap();

    let barrier = Barrier::new(2);
    let service = &h.service;
    thread::scope(|s| {
        for item_id in [a.id, b.id] {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    service
                        .record_movement(Movement::new(item_id, MovementKind::Issue, 1, "storekeeper"))
                        .unwrap();
                }
            });
        }
    });

    for item_id in [a.id, b.id] {
        assert_eq!(h.service.item(item_id).unwrap().quantity, 10);
        assert_eq!(ledger_sum(&h.store, item_id), 10);
    }

    h.handle.shutdown();
}

/// Store wrapper that fails a configurable number of upcoming commits.
struct FaultyStore {
    inner: InMemoryWarehouseStore,
    fail_commits: AtomicU32,
    commit_attempts: AtomicU32,
}

impl FaultyStore {
    fn new(fail_commits: u32) -> Self {
        Self {
            inner: InMemoryWarehouseStore::new(),
            fail_commits: AtomicU32::new(fail_commits),
            commit_attempts: AtomicU32::new(0),
        }
    }

    fn try_fail(&self) -> Result<(), StoreError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }
}

impl StockStore for FaultyStore {
    fn item(&self, id: ItemId) -> Result<Option<StockRecord>, StoreError> {
        self.inner.item(id)
    }

    fn update_item(&self, record: &StockRecord) -> Result<bool, StoreError> {
        self.inner.update_item(record)
    }

    fn delete_item(&self, id: ItemId) -> Result<bool, StoreError> {
        self.inner.delete_item(id)
    }

    fn list_items(&self, filter: &crate::store::ItemFilter) -> Result<Vec<StockRecord>, StoreError> {
        self.inner.list_items(filter)
    }
}

impl LedgerStore for FaultyStore {
    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.entry(id)
    }

    fn list_entries(
        &self,
        filter: &crate::store::LedgerFilter,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.list_entries(filter)
    }

    fn item_history(&self, item_id: ItemId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.item_history(item_id)
    }

    fn entry_count_for_item(&self, item_id: ItemId) -> Result<u64, StoreError> {
        self.inner.entry_count_for_item(item_id)
    }
}

impl WarehouseStore for FaultyStore {
    fn commit_movement(&self, record: &StockRecord, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.try_fail()?;
        self.inner.commit_movement(record, entry)
    }

    fn commit_registration(
        &self,
        record: &StockRecord,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        self.try_fail()?;
        self.inner.commit_registration(record, entry)
    }
}

fn faulty_service(fail_commits: u32) -> (WarehouseService<FaultyStore>, Arc<FaultyStore>, PublisherHandle) {
    let store = Arc::new(FaultyStore::new(fail_commits));
    let bus = Arc::new(InMemoryEventBus::new());
    let (event_publisher, handle) =
        publisher::spawn(InMemoryBrokerLink::new(bus), PublisherConfig::default());
    let service = WarehouseService::new(
        Arc::clone(&store),
        event_publisher,
        Arc::new(InMemoryPaperworkStore::new()) as Arc<dyn PaperworkProbe>,
        ReconciliationConfig::default(),
    );
    (service, store, handle)
}

#[test]
fn persistent_storage_fault_surfaces_after_bounded_retries() {
    let (service, store, handle) = faulty_service(0);
    let record = service.register_item(draft(10, 5), "admin").unwrap();

    store.fail_commits.store(u32::MAX, Ordering::SeqCst);
    store.commit_attempts.store(0, Ordering::SeqCst);

    let err = service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 2, "storekeeper"))
        .unwrap_err();

    assert!(matches!(err, CommitError::StorageUnavailable(_)));
    // Bounded: default policy is three attempts.
    assert_eq!(store.commit_attempts.load(Ordering::SeqCst), 3);

    // No partial state: both collections exactly as before the fault.
    assert_eq!(store.item(record.id).unwrap().unwrap().quantity, 10);
    assert_eq!(store.entry_count_for_item(record.id).unwrap(), 1);
    assert_eq!(ledger_sum(&store.inner, record.id), 10);

    handle.shutdown();
}

#[test]
fn transient_storage_fault_is_retried_to_success() {
    let (service, store, handle) = faulty_service(0);
    let record = service.register_item(draft(10, 5), "admin").unwrap();

    store.fail_commits.store(1, Ordering::SeqCst);
    let receipt = service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 2, "storekeeper"))
        .unwrap();

    assert_eq!(receipt.new_quantity, 8);
    assert_eq!(store.entry_count_for_item(record.id).unwrap(), 2);

    handle.shutdown();
}

#[test]
fn broker_outage_never_blocks_or_fails_the_commit() {
    struct DownLink;

    impl BrokerLink for DownLink {
        fn connect(&mut self, _deadline: Duration) -> Result<(), LinkError> {
            Err(LinkError::Unavailable("connection refused".to_string()))
        }

        fn send(&mut self, _m: &EventMessage, _deadline: Duration) -> Result<(), LinkError> {
            Err(LinkError::Unavailable("connection refused".to_string()))
        }
    }

    let store = Arc::new(InMemoryWarehouseStore::new());
    let (event_publisher, handle) = publisher::spawn(DownLink, PublisherConfig::default());
    let service = WarehouseService::new(
        Arc::clone(&store),
        event_publisher.clone(),
        Arc::new(InMemoryPaperworkStore::new()) as Arc<dyn PaperworkProbe>,
        ReconciliationConfig::default(),
    );

    let record = service.register_item(draft(10, 5), "admin").unwrap();
    let receipt = service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 6, "storekeeper"))
        .unwrap();

    // The commit path is unaffected by the dead broker.
    assert_eq!(receipt.new_quantity, 4);
    assert_eq!(receipt.new_status, ItemStatus::Low);
    assert_eq!(service.item(record.id).unwrap().quantity, 4);

    // The facts were dropped (and logged), not queued forever.
    let deadline = Instant::now() + Duration::from_secs(2);
    while event_publisher.dropped_count() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(event_publisher.dropped_count() >= 2);

    handle.shutdown();
}

#[test]
fn undocumented_movement_produces_exactly_one_notice() {
    let h = harness();
    let sub = h.bus.subscribe();
    let record = h.service.register_item(draft(10, 2), "admin").unwrap();

    h.service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 3, "storekeeper"))
        .unwrap();

    let notice = wait_for_topic(&sub, "documentation.required");
    assert_eq!(notice.payload["kind"], "issue");

    // Single-attempt probe: no second notice follows.
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        if let Ok(message) = sub.recv_timeout(Duration::from_millis(100)) {
            assert_ne!(message.topic, "documentation.required");
        }
    }

    h.handle.shutdown();
}

#[test]
fn documented_movement_stays_silent() {
    struct AlwaysDocumented;

    impl PaperworkProbe for AlwaysDocumented {
        fn has_document(&self, _entry_id: LedgerEntryId) -> Result<bool, ProbeError> {
            Ok(true)
        }
    }

    let store = Arc::new(InMemoryWarehouseStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let (event_publisher, handle) = publisher::spawn(
        InMemoryBrokerLink::new(Arc::clone(&bus)),
        PublisherConfig::default(),
    );
    let service = WarehouseService::new(
        Arc::clone(&store),
        event_publisher,
        Arc::new(AlwaysDocumented) as Arc<dyn PaperworkProbe>,
        ReconciliationConfig::default(),
    );

    let sub = bus.subscribe();
    let record = service.register_item(draft(10, 2), "admin").unwrap();
    service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 3, "storekeeper"))
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(700);
    while Instant::now() < deadline {
        if let Ok(message) = sub.recv_timeout(Duration::from_millis(100)) {
            assert_ne!(message.topic, "documentation.required");
        }
    }

    handle.shutdown();
}

#[test]
fn delete_requires_empty_ledger_and_archive_is_the_alternative() {
    let h = harness();
    let record = h.service.register_item(draft(10, 2), "admin").unwrap();

    // Registration already wrote the initial intake entry.
    let err = h.service.delete_item(record.id).unwrap_err();
    assert!(matches!(err, CommitError::Conflict(_)));
    assert!(h.service.item(record.id).is_ok());

    let archived = h.service.archive_item(record.id).unwrap();
    assert!(archived.archived);
    assert_eq!(h.store.entry_count_for_item(record.id).unwrap(), 1);

    h.handle.shutdown();
}

#[test]
fn paperwork_gap_report_lists_only_undocumented_entries() {
    let h = harness();
    let record = h.service.register_item(draft(20, 2), "admin").unwrap();
    let documented = h
        .service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 2, "storekeeper"))
        .unwrap();
    h.paperwork.file_document(documented.entry_id);

    let undocumented = h
        .service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 3, "storekeeper"))
        .unwrap();

    let missing = h.service.entries_without_paperwork().unwrap();
    let missing_ids: Vec<_> = missing.iter().map(|e| e.id).collect();

    assert!(missing_ids.contains(&undocumented.entry_id));
    assert!(!missing_ids.contains(&documented.entry_id));

    h.handle.shutdown();
}

#[test]
fn notification_projection_consumes_the_fact_stream() {
    let h = harness();

    let projection = Arc::new(NotificationProjection::new(InMemoryNotificationStore::new()));
    let consumer = Arc::clone(&projection);
    let sub = h.bus.subscribe();
    thread::spawn(move || {
        while let Ok(message) = sub.recv() {
            if let Err(e) = consumer.apply_message(&message) {
                eprintln!("failed to apply fact: {e}");
            }
        }
    });

    let record = h.service.register_item(draft(10, 5), "admin").unwrap();
    h.service
        .record_movement(Movement::new(record.id, MovementKind::Issue, 6, "storekeeper"))
        .unwrap();

    // Registration info + low-stock warning (and possibly a paperwork
    // notice) should materialize.
    let deadline = Instant::now() + Duration::from_secs(3);
    while projection.store().list(false).len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    let records = projection.store().list(false);
    assert!(records.len() >= 2, "expected at least two notifications");
    assert!(records.iter().any(|n| n.message.contains("running low")));

    h.handle.shutdown();
}

#[test]
fn update_details_rederives_status_on_threshold_change() {
    let h = harness();
    let record = h.service.register_item(draft(10, 5), "admin").unwrap();
    assert_eq!(record.status, ItemStatus::Available);

    let updated = h
        .service
        .update_item_details(
            record.id,
            crate::service::ItemDetailsUpdate {
                min_quantity: Some(15),
                ..Default::default()
            },
        )
        .unwrap();

    // 0 < 10 < 15, so the shared rule now says Low.
    assert_eq!(updated.status, ItemStatus::Low);
    assert_eq!(h.service.item(record.id).unwrap().status, ItemStatus::Low);

    h.handle.shutdown();
}
