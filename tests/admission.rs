use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use ulid::Ulid;

use gymslot::model::{EquipmentInfo, SlotInfo};
use gymslot::{Engine, EngineError, FacilityConfig};

// ── Test infrastructure ──────────────────────────────────────

fn fresh_wal() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gymslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("gym.wal")
}

const USERS: usize = 24;
const DATES: [&str; 2] = ["2024-07-03", "2024-07-04"];
const STARTS: [&str; 3] = ["07:00", "07:15", "07:30"];

fn user(i: usize) -> String {
    format!("member-{i}")
}

async fn snapshot(engine: &Engine) -> (Vec<SlotInfo>, Vec<EquipmentInfo>) {
    let mut slots = Vec::new();
    let mut equipment = Vec::new();
    for i in 0..USERS {
        for slot in engine.list_slots(&user(i)) {
            equipment.extend(engine.list_user_equipment(&user(i), slot.id).await);
            slots.push(slot);
        }
    }
    (slots, equipment)
}

/// Peak number of simultaneously open slots per date, by sweep line.
fn peak_occupancy(slots: &[SlotInfo]) -> HashMap<String, usize> {
    let mut events: HashMap<String, Vec<(u32, i32)>> = HashMap::new();
    for s in slots {
        let e = events.entry(s.date.clone()).or_default();
        e.push((s.start, 1));
        e.push((s.end, -1));
    }
    events
        .into_iter()
        .map(|(date, mut evs)| {
            // Ends sort before starts at the same minute: half-open windows.
            evs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
            let mut open = 0i32;
            let mut peak = 0i32;
            for (_, delta) in evs {
                open += delta;
                peak = peak.max(open);
            }
            (date, peak as usize)
        })
        .collect()
}

fn assert_invariants(config: &FacilityConfig, slots: &[SlotInfo], equipment: &[EquipmentInfo]) {
    for (date, peak) in peak_occupancy(slots) {
        assert!(
            peak <= config.max_concurrent_slots as usize,
            "{date}: {peak} concurrent slots"
        );
    }

    let mut per_bucket: HashMap<(String, u32, String), usize> = HashMap::new();
    let mut per_user_slot: HashMap<(String, Ulid), usize> = HashMap::new();
    for r in equipment {
        *per_bucket
            .entry((r.date.clone(), r.start, r.equipment.clone()))
            .or_default() += 1;
        *per_user_slot.entry((r.user_id.clone(), r.slot_id)).or_default() += 1;

        let slot = slots
            .iter()
            .find(|s| s.id == r.slot_id)
            .expect("reservation outlived its slot");
        assert_eq!((slot.date.as_str(), slot.start), (r.date.as_str(), r.start));
        assert_eq!(slot.user_id, r.user_id);
    }
    assert!(per_bucket.values().all(|&n| n <= config.units_per_equipment as usize));
    assert!(per_user_slot.values().all(|&n| n <= config.max_equipment_per_slot as usize));
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn member_day_flow() {
    let engine = Engine::new(fresh_wal(), FacilityConfig::default()).unwrap();

    let slot = engine
        .book_slot("dana", "2024-07-03", "17:30", "18:15", "female")
        .await
        .unwrap();
    let bench = engine.book_equipment("dana", slot, "Gym Benches").await.unwrap();
    engine.book_equipment("dana", slot, "Dumbbells").await.unwrap();

    let avail = engine.catalog_availability("2024-07-03", "17:30").await.unwrap();
    let remaining: HashMap<_, _> = avail
        .iter()
        .map(|a| (a.equipment.as_str(), a.remaining))
        .collect();
    assert_eq!(remaining["Gym Benches"], 2);
    assert_eq!(remaining["Dumbbells"], 2);
    assert_eq!(remaining["Treadmill"], 3);

    engine.delete_equipment_reservation(bench, "dana").await.unwrap();
    let held: Vec<_> = engine
        .list_user_equipment("dana", slot)
        .await
        .into_iter()
        .map(|e| e.equipment)
        .collect();
    assert_eq!(held, vec!["Dumbbells".to_string()]);

    engine.delete_slot(slot, "dana").await.unwrap();
    assert_eq!(engine.reservation_count(), 0);
}

#[tokio::test]
async fn error_messages_name_the_rule() {
    let engine = Engine::new(fresh_wal(), FacilityConfig::default()).unwrap();

    let err = engine
        .book_slot("dana", "2024-07-03", "09:00", "09:50", "Female")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "slot duration cannot exceed 45 minutes: requested 50 minutes"
    );
    assert!(!err.is_store_failure());
    assert_eq!(err.kind(), "duration_exceeded");

    let err = engine.delete_slot(Ulid::new(), "dana").await.unwrap_err();
    assert_eq!(err.to_string(), "not found or unauthorized");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_load_keeps_every_ceiling() {
    let path = fresh_wal();
    let config = FacilityConfig {
        max_concurrent_slots: 6,
        units_per_equipment: 2,
        ..FacilityConfig::default()
    };
    let engine = Arc::new(Engine::new(path.clone(), config.clone()).unwrap());
    let catalog = config.equipment_catalog.clone();

    let tasks = (0..USERS).map(|i| {
        let eng = engine.clone();
        let catalog = catalog.clone();
        async move {
            let me = user(i);
            for round in 0..4 {
                let date = DATES[(i + round) % DATES.len()];
                let start = STARTS[(i * 7 + round) % STARTS.len()];
                let end = match start {
                    "07:00" => "07:30",
                    "07:15" => "07:45",
                    _ => "08:00",
                };
                let Ok(slot) = eng.book_slot(&me, date, start, end, "Male").await else {
                    continue;
                };
                for k in 0..4 {
                    let name = &catalog[(i + k) % 3];
                    match eng.book_equipment(&me, slot, name).await {
                        Ok(_)
                        | Err(EngineError::EquipmentFullyBooked(_))
                        | Err(EngineError::AlreadyBooked(_))
                        | Err(EngineError::UserSlotLimitExceeded(_))
                        | Err(EngineError::NotFoundOrUnauthorized) => {}
                        Err(e) => panic!("unexpected rejection: {e}"),
                    }
                }
                if round % 2 == 1 {
                    eng.delete_slot(slot, &me).await.unwrap();
                }
            }
        }
    });
    join_all(tasks.map(tokio::spawn)).await;

    let (slots, equipment) = snapshot(&engine).await;
    assert!(!slots.is_empty());
    assert_invariants(&config, &slots, &equipment);
    assert_eq!(slots.len(), engine.slot_count());
    assert_eq!(equipment.len(), engine.reservation_count());

    // The replayed image matches what was live.
    drop(engine);
    let replayed = Engine::new(path, config.clone()).unwrap();
    let (slots2, equipment2) = snapshot(&replayed).await;
    assert_eq!(slots2, slots);
    assert_eq!(equipment2, equipment);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn equipment_racing_slot_deletion_leaves_no_orphans() {
    let engine = Arc::new(Engine::new(fresh_wal(), FacilityConfig::default()).unwrap());

    for round in 0..20 {
        let slot = engine
            .book_slot("sam", "2024-07-03", "19:00", "19:45", "Male")
            .await
            .unwrap();
        let booker = {
            let eng = engine.clone();
            tokio::spawn(async move {
                for name in ["Treadmill", "Spin Bike", "Dumbbells"] {
                    let _ = eng.book_equipment("sam", slot, name).await;
                }
            })
        };
        let deleter = {
            let eng = engine.clone();
            tokio::spawn(async move { eng.delete_slot(slot, "sam").await })
        };
        booker.await.unwrap();
        deleter.await.unwrap().unwrap();

        assert_eq!(engine.reservation_count(), 0, "orphan after round {round}");
    }
}
