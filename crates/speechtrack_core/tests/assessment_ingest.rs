use rusqlite::Connection;
use speechtrack_core::model::assessment::FeatureRejection;
use speechtrack_core::repo::assessment_repo::{AssessmentRepository, SqliteAssessmentRepository};
use speechtrack_core::{
    open_db_in_memory, AssessmentIngestor, ClassificationOrder, FeatureMap, FeatureValue,
    FixedClock, HistoryService, IngestRequest, RepoError, Severity, Stage, TrackingError,
    TrackingPolicy, ValidationError,
};

const DAY_MS: i64 = 86_400_000;
const NOW_MS: i64 = 400 * DAY_MS;

fn ingestor(conn: &Connection) -> AssessmentIngestor<'_, FixedClock> {
    AssessmentIngestor::with_clock(conn, TrackingPolicy::default(), FixedClock(NOW_MS)).unwrap()
}

fn features(pairs: &[(&str, f64)]) -> FeatureMap {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), FeatureValue::from(*value)))
        .collect()
}

fn ingest_day(
    ingestor: &AssessmentIngestor<'_, FixedClock>,
    user_id: &str,
    day: i64,
    pairs: &[(&str, f64)],
) -> speechtrack_core::IngestOutcome {
    ingestor
        .ingest(
            &IngestRequest::new(user_id, features(pairs), 0.2)
                .recorded_at(NOW_MS - (30 - day) * DAY_MS),
        )
        .unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn rising_hesitation_raises_moderate_alert_against_updated_baseline() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    for (day, value) in [(1, 0.10), (2, 0.12), (3, 0.11)] {
        let outcome = ingest_day(&ingestor, "u1", day, &[("hesitation_ratio", value)]);
        assert!(outcome.alerts.is_empty());
    }

    let history = HistoryService::new(&conn);
    let baseline = history
        .get_baseline("u1", "hesitation_ratio")
        .unwrap()
        .expect("baseline after three assessments");
    assert!((baseline.central - 0.11).abs() < 1e-12);
    assert_eq!(baseline.sample_size, 3);

    let outcome = ingest_day(&ingestor, "u1", 4, &[("hesitation_ratio", 0.50)]);

    let baseline = history
        .get_baseline("u1", "hesitation_ratio")
        .unwrap()
        .expect("baseline after four assessments");
    assert!((baseline.central - 0.115).abs() < 1e-12);
    assert_eq!(baseline.sample_size, 4);
    assert_eq!(outcome.refreshed_baselines, vec![baseline.clone()]);

    assert_eq!(outcome.alerts.len(), 1);
    let alert = &outcome.alerts[0];
    assert_eq!(alert.severity, Severity::Moderate);
    assert_eq!(alert.feature_name, "hesitation_ratio");
    assert_eq!(alert.assessment_id, outcome.assessment_id);
    assert!((alert.deviation - 0.385).abs() < 1e-9);
    assert!(!alert.is_reviewed);
    assert_eq!(alert.created_at, NOW_MS);
}

#[test]
fn classify_then_refresh_scores_against_prior_baseline() {
    let conn = open_db_in_memory().unwrap();
    let policy = TrackingPolicy {
        classification_order: ClassificationOrder::ClassifyThenRefresh,
        ..TrackingPolicy::default()
    };
    let ingestor = AssessmentIngestor::with_clock(&conn, policy, FixedClock(NOW_MS)).unwrap();

    for (day, value) in [(1, 0.10), (2, 0.12), (3, 0.11)] {
        let outcome = ingest_day(&ingestor, "u1", day, &[("hesitation_ratio", value)]);
        assert!(outcome.alerts.is_empty());
    }
    let outcome = ingest_day(&ingestor, "u1", 4, &[("hesitation_ratio", 0.50)]);

    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].severity, Severity::Severe);
    assert!((outcome.alerts[0].deviation - 0.39).abs() < 1e-9);

    let baseline = HistoryService::new(&conn)
        .get_baseline("u1", "hesitation_ratio")
        .unwrap()
        .expect("baseline refreshed after classification");
    assert!((baseline.central - 0.115).abs() < 1e-12);
}

#[test]
fn users_with_fewer_than_three_assessments_have_no_baselines() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    for day in 1..=2 {
        let outcome = ingest_day(
            &ingestor,
            "u1",
            day,
            &[("speech_rate_wpm", 120.0), ("hesitation_ratio", 0.1)],
        );
        assert!(outcome.refreshed_baselines.is_empty());
        assert!(outcome.alerts.is_empty());
    }

    assert!(HistoryService::new(&conn).get_baselines("u1").unwrap().is_empty());
}

#[test]
fn features_need_three_measurements_for_a_baseline() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    ingest_day(&ingestor, "u1", 1, &[("speech_rate_wpm", 120.0), ("pause_count", 4.0)]);
    ingest_day(&ingestor, "u1", 2, &[("speech_rate_wpm", 118.0)]);
    let outcome = ingest_day(
        &ingestor,
        "u1",
        3,
        &[("speech_rate_wpm", 121.0), ("pause_count", 5.0)],
    );

    let names: Vec<&str> = outcome
        .refreshed_baselines
        .iter()
        .map(|baseline| baseline.feature_name.as_str())
        .collect();
    assert_eq!(names, vec!["speech_rate_wpm"]);
}

#[test]
fn baseline_uses_the_five_most_recent_values() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    // Ingested out of chronological order; recency follows recorded_at.
    for day in [3, 1, 2, 7, 5, 4, 6] {
        ingest_day(&ingestor, "u1", day, &[("speech_rate_wpm", day as f64)]);
    }

    let baseline = HistoryService::new(&conn)
        .get_baseline("u1", "speech_rate_wpm")
        .unwrap()
        .expect("baseline");
    let sigma = 2.0_f64.sqrt();
    assert_eq!(baseline.sample_size, 5);
    assert!((baseline.central - 5.0).abs() < 1e-12);
    assert!((baseline.upper - (5.0 + 2.0 * sigma)).abs() < 1e-9);
    assert!((baseline.lower - (5.0 - 2.0 * sigma)).abs() < 1e-9);
}

#[test]
fn constant_history_never_alerts() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    for day in 1..=3 {
        ingest_day(&ingestor, "u1", day, &[("pause_count", 2.0)]);
    }
    let outcome = ingest_day(&ingestor, "u1", 4, &[("pause_count", 2.0)]);

    assert!(outcome.alerts.is_empty());
    let baseline = &outcome.refreshed_baselines[0];
    assert_eq!(baseline.upper, baseline.lower);
}

#[test]
fn alerts_never_use_another_users_baseline() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    for (day, value) in [(1, 0.10), (2, 0.12), (3, 0.11)] {
        ingest_day(&ingestor, "u1", day, &[("hesitation_ratio", value)]);
    }

    let outcome = ingest_day(&ingestor, "u2", 4, &[("hesitation_ratio", 0.95)]);
    assert!(outcome.alerts.is_empty());
    assert!(HistoryService::new(&conn).get_baselines("u2").unwrap().is_empty());
}

#[test]
fn duplicate_assessment_id_is_rejected_without_partial_writes() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);
    ingestor
        .ingest(
            &IngestRequest::new("u1", features(&[("speech_rate_wpm", 120.0)]), 0.2)
                .with_assessment_id("a1"),
        )
        .unwrap();

    let err = ingestor
        .ingest(
            &IngestRequest::new("u2", features(&[("speech_rate_wpm", 80.0)]), 0.9)
                .with_assessment_id("a1"),
        )
        .unwrap_err();

    match err {
        TrackingError::DuplicateKey {
            user_id,
            assessment_id,
        } => {
            assert_eq!(user_id, "u2");
            assert_eq!(assessment_id, "a1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&conn, "users"), 1);
    assert_eq!(count(&conn, "assessments"), 1);
    assert_eq!(count(&conn, "assessment_features"), 1);

    let stored = SqliteAssessmentRepository::try_new(&conn)
        .unwrap()
        .list_features("a1")
        .unwrap();
    assert_eq!(stored[0].value, 120.0);
}

#[test]
fn non_numeric_features_are_dropped_not_fatal() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);
    let mut raw = features(&[("speech_rate_wpm", 120.0), ("jitter", f64::NAN)]);
    raw.insert("language".to_string(), "en".into());
    raw.insert("has_long_pause".to_string(), true.into());
    raw.insert("pitch_mean".to_string(), FeatureValue::Null);

    let outcome = ingestor
        .ingest(&IngestRequest::new("u1", raw, 0.3).with_transcript("the cat sat"))
        .unwrap();

    let dropped: Vec<(&str, FeatureRejection)> = outcome
        .dropped_features
        .iter()
        .map(|dropped| (dropped.name.as_str(), dropped.reason))
        .collect();
    assert_eq!(
        dropped,
        vec![
            ("has_long_pause", FeatureRejection::NotNumeric),
            ("jitter", FeatureRejection::NotFinite),
            ("language", FeatureRejection::NotNumeric),
            ("pitch_mean", FeatureRejection::NotNumeric),
        ]
    );

    let repo = SqliteAssessmentRepository::try_new(&conn).unwrap();
    let stored = repo.list_features(&outcome.assessment_id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].feature_name, "speech_rate_wpm");
    let assessment = repo.get_assessment(&outcome.assessment_id).unwrap().unwrap();
    assert_eq!(assessment.transcript.as_deref(), Some("the cat sat"));
}

#[test]
fn derived_assessment_id_combines_user_and_timestamp() {
    let conn = open_db_in_memory().unwrap();

    let outcome = ingestor(&conn)
        .ingest(&IngestRequest::new("u1", features(&[("speech_rate_wpm", 120.0)]), 0.2))
        .unwrap();

    assert_eq!(outcome.recorded_at, NOW_MS);
    assert_eq!(outcome.assessment_id, format!("u1_{NOW_MS}"));
}

#[test]
fn invalid_requests_write_nothing() {
    let conn = open_db_in_memory().unwrap();
    let ingestor = ingestor(&conn);

    let err = ingestor
        .ingest(&IngestRequest::new("u1", features(&[("speech_rate_wpm", 120.0)]), f64::NAN))
        .unwrap_err();
    assert!(matches!(
        err,
        TrackingError::InvalidInput(ValidationError::NonFiniteRiskScore(_))
    ));

    let err = ingestor
        .ingest(&IngestRequest::new("", features(&[("speech_rate_wpm", 120.0)]), 0.2))
        .unwrap_err();
    assert!(matches!(
        err,
        TrackingError::InvalidInput(ValidationError::EmptyUserId)
    ));

    assert_eq!(count(&conn, "users"), 0);
    assert_eq!(count(&conn, "assessments"), 0);
}

#[test]
fn invalid_policy_is_rejected_at_construction() {
    let conn = open_db_in_memory().unwrap();
    let policy = TrackingPolicy {
        window: 2,
        ..TrackingPolicy::default()
    };

    assert!(AssessmentIngestor::new(&conn, policy).is_err());
}

#[test]
fn request_deserializes_from_extractor_json() {
    let request: IngestRequest = serde_json::from_str(
        r#"{
            "user_id": "u1",
            "risk_score": 0.42,
            "task_type": 2,
            "features": {
                "speech_rate_wpm": 118.5,
                "word_finding_difficulty_count": 3,
                "language": "en",
                "voiced": true
            }
        }"#,
    )
    .unwrap();

    assert_eq!(request.task_type, 2);
    assert_eq!(request.recorded_at, None);
    assert_eq!(
        request.features.get("word_finding_difficulty_count"),
        Some(&FeatureValue::Number(3.0))
    );
    assert_eq!(request.features.get("voiced"), Some(&FeatureValue::Boolean(true)));
}

#[test]
fn nested_extractor_values_are_dropped_and_numbers_still_ingested() {
    let conn = open_db_in_memory().unwrap();
    let request: IngestRequest = serde_json::from_str(
        r#"{
            "user_id": "u1",
            "risk_score": 0.4,
            "features": {
                "speech_rate_wpm": 118.5,
                "tempo": [120.0],
                "meta": {"k": 1}
            }
        }"#,
    )
    .unwrap();

    let outcome = ingestor(&conn).ingest(&request).unwrap();

    let dropped: Vec<(&str, FeatureRejection)> = outcome
        .dropped_features
        .iter()
        .map(|dropped| (dropped.name.as_str(), dropped.reason))
        .collect();
    assert_eq!(
        dropped,
        vec![
            ("meta", FeatureRejection::NotNumeric),
            ("tempo", FeatureRejection::NotNumeric),
        ]
    );
    let stored = SqliteAssessmentRepository::try_new(&conn)
        .unwrap()
        .list_features(&outcome.assessment_id)
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].feature_name, "speech_rate_wpm");
    assert_eq!(stored[0].value, 118.5);
}

#[test]
fn failure_after_assessment_insert_rolls_back_everything() {
    let conn = open_db_in_memory().unwrap();
    // A band with upper < lower cannot be read back, so loading baselines
    // fails after the assessment and its features were written.
    conn.execute_batch(
        "INSERT INTO users (user_id, created_at) VALUES ('u1', 0);
         INSERT INTO user_baselines
            (user_id, feature_name, baseline_value, upper_threshold, lower_threshold, sample_size, last_updated)
         VALUES ('u1', 'pause_count', 2.0, 1.0, 3.0, 3, 0);",
    )
    .unwrap();

    let err = ingestor(&conn)
        .ingest(
            &IngestRequest::new(
                "u1",
                features(&[("speech_rate_wpm", 120.0), ("hesitation_ratio", 0.1)]),
                0.3,
            )
            .with_assessment_id("a1"),
        )
        .unwrap_err();

    match err {
        TrackingError::PersistenceFailure {
            stage,
            user_id,
            assessment_id,
            source,
        } => {
            assert_eq!(stage, Stage::LoadBaselines);
            assert_eq!(user_id.as_deref(), Some("u1"));
            assert_eq!(assessment_id.as_deref(), Some("a1"));
            assert!(matches!(source, RepoError::InvalidData(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&conn, "assessments"), 0);
    assert_eq!(count(&conn, "assessment_features"), 0);
    assert_eq!(count(&conn, "alerts"), 0);
    assert_eq!(count(&conn, "user_baselines"), 1);
}
