use speechtrack_core::{
    open_db, AssessmentIngestor, FeatureMap, FixedClock, HistoryService, IngestRequest,
    TrackingPolicy,
};
use std::path::PathBuf;
use std::thread;

const DAY_MS: i64 = 86_400_000;
const NOW_MS: i64 = 2_000 * DAY_MS;
const PER_WRITER: i64 = 12;

fn writer(path: PathBuf, user_id: &'static str, lane: i64) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let conn = open_db(&path).unwrap();
        let ingestor =
            AssessmentIngestor::with_clock(&conn, TrackingPolicy::default(), FixedClock(NOW_MS))
                .unwrap();
        for step in 0..PER_WRITER {
            let mut features = FeatureMap::new();
            features.insert(
                "speech_rate_wpm".to_string(),
                (100.0 + (step * 2 + lane) as f64).into(),
            );
            ingestor
                .ingest(
                    &IngestRequest::new(user_id, features, 0.3)
                        .recorded_at(NOW_MS - 100 * DAY_MS + (step * 2 + lane) * 60_000),
                )
                .unwrap();
        }
    })
}

#[test]
fn parallel_writers_on_one_user_keep_baselines_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracking.sqlite3");
    drop(open_db(&path).unwrap());

    let handles = vec![
        writer(path.clone(), "shared", 0),
        writer(path.clone(), "shared", 1),
        writer(path.clone(), "other", 0),
    ];
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assessments WHERE user_id = 'shared';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 2 * PER_WRITER);

    let stored = HistoryService::new(&conn)
        .get_baseline("shared", "speech_rate_wpm")
        .unwrap()
        .expect("baseline");
    assert_eq!(stored.sample_size, 5);
    // The five most recent values across both writers are 119..=123.
    assert_eq!(stored.central, 121.0);

    let rebuilt = AssessmentIngestor::with_clock(&conn, TrackingPolicy::default(), FixedClock(NOW_MS))
        .unwrap()
        .rebuild_baselines("shared")
        .unwrap();
    assert_eq!(rebuilt, vec![stored]);
}
