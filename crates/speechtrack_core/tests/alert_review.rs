use rusqlite::Connection;
use speechtrack_core::{
    open_db_in_memory, AlertFilter, AlertReviewService, AssessmentIngestor, ClassificationOrder,
    DeviationDirection, FeatureMap, FeatureValue, FixedClock, HistoryService, IngestRequest,
    Severity, TrackingError, TrackingPolicy, UserProfile, UserRegistry,
};

const DAY_MS: i64 = 86_400_000;
const NOW_MS: i64 = 300 * DAY_MS;

fn features(pairs: &[(&str, f64)]) -> FeatureMap {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), FeatureValue::from(*value)))
        .collect()
}

/// Three days of stable history, then one assessment that deviates mildly,
/// moderately and severely on three different features.
fn seed_alerts(conn: &Connection, user_id: &str) {
    let policy = TrackingPolicy {
        classification_order: ClassificationOrder::ClassifyThenRefresh,
        ..TrackingPolicy::default()
    };
    let ingestor = AssessmentIngestor::with_clock(conn, policy, FixedClock(NOW_MS)).unwrap();

    for (day, value) in [(1, 0.10), (2, 0.12), (3, 0.11)] {
        let outcome = ingestor
            .ingest(
                &IngestRequest::new(
                    user_id,
                    features(&[("f_mild", value), ("f_moderate", value), ("f_severe", value)]),
                    0.2,
                )
                .recorded_at(NOW_MS - (10 - day) * DAY_MS),
            )
            .unwrap();
        assert!(outcome.alerts.is_empty());
    }

    let outcome = ingestor
        .ingest(
            &IngestRequest::new(
                user_id,
                features(&[("f_mild", 0.125), ("f_moderate", 0.13), ("f_severe", 0.50)]),
                0.7,
            )
            .recorded_at(NOW_MS - 5 * DAY_MS),
        )
        .unwrap();
    assert_eq!(outcome.alerts.len(), 3);
}

#[test]
fn alerts_are_tiered_and_ordered_by_severity() {
    let conn = open_db_in_memory().unwrap();
    seed_alerts(&conn, "u1");

    let records = HistoryService::new(&conn)
        .get_alerts(&AlertFilter::for_user("u1"))
        .unwrap();

    let tiers: Vec<(&str, Severity)> = records
        .iter()
        .map(|record| (record.alert.feature_name.as_str(), record.alert.severity))
        .collect();
    assert_eq!(
        tiers,
        vec![
            ("f_severe", Severity::Severe),
            ("f_moderate", Severity::Moderate),
            ("f_mild", Severity::Mild),
        ]
    );
    assert!(records
        .iter()
        .all(|record| record.alert.direction() == DeviationDirection::Increase));
}

#[test]
fn reviewing_all_unreviewed_alerts_empties_the_queue() {
    let conn = open_db_in_memory().unwrap();
    UserRegistry::new(&conn)
        .register_user(&UserProfile::new("u2").with_name("Grace"))
        .unwrap();
    seed_alerts(&conn, "u1");
    seed_alerts(&conn, "u2");
    let history = HistoryService::new(&conn);

    let pending = history.get_alerts(&AlertFilter::unreviewed()).unwrap();
    assert_eq!(pending.len(), 6);
    assert!(pending
        .iter()
        .any(|record| record.user_name.as_deref() == Some("Grace")));

    let ids: Vec<i64> = pending.iter().map(|record| record.alert.alert_id).collect();
    let marked = AlertReviewService::new(&conn)
        .mark_many_reviewed(&ids)
        .unwrap();
    assert_eq!(marked, 6);

    assert!(history
        .get_alerts(&AlertFilter::unreviewed())
        .unwrap()
        .is_empty());
    let all = history.get_alerts(&AlertFilter::default()).unwrap();
    assert_eq!(all.len(), 6);
    assert!(all.iter().all(|record| record.alert.is_reviewed));
}

#[test]
fn reviewing_twice_is_a_no_op() {
    let conn = open_db_in_memory().unwrap();
    seed_alerts(&conn, "u1");
    let review = AlertReviewService::new(&conn);
    let alert_id = HistoryService::new(&conn)
        .get_alerts(&AlertFilter::for_user("u1"))
        .unwrap()[0]
        .alert
        .alert_id;

    review.mark_reviewed(alert_id).unwrap();
    review.mark_reviewed(alert_id).unwrap();

    let alert = review.get_alert(alert_id).unwrap();
    assert!(alert.is_reviewed);
    assert_eq!(alert.severity, Severity::Severe);
}

#[test]
fn unknown_alert_is_not_found_and_aborts_the_batch() {
    let conn = open_db_in_memory().unwrap();
    seed_alerts(&conn, "u1");
    let review = AlertReviewService::new(&conn);
    let history = HistoryService::new(&conn);
    let known = history.get_alerts(&AlertFilter::for_user("u1")).unwrap()[0]
        .alert
        .alert_id;

    let err = review.mark_reviewed(9_999).unwrap_err();
    assert!(matches!(err, TrackingError::NotFound { entity: "alert", .. }));
    assert!(matches!(
        review.get_alert(9_999),
        Err(TrackingError::NotFound { .. })
    ));

    assert!(review.mark_many_reviewed(&[known, 9_999]).is_err());
    assert_eq!(
        history
            .get_alerts(&AlertFilter::unreviewed())
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn filters_narrow_by_severity_user_and_window() {
    let conn = open_db_in_memory().unwrap();
    seed_alerts(&conn, "u1");
    seed_alerts(&conn, "u2");

    let history = HistoryService::new(&conn).with_clock(FixedClock(NOW_MS));
    let at_least_moderate = history
        .get_alerts(&AlertFilter::for_user("u2").min_severity(Severity::Moderate))
        .unwrap();
    assert_eq!(at_least_moderate.len(), 2);
    assert!(at_least_moderate
        .iter()
        .all(|record| record.alert.user_id == "u2" && record.alert.severity >= Severity::Moderate));

    assert_eq!(
        history
            .get_alerts(&AlertFilter::default().within_days(1))
            .unwrap()
            .len(),
        6
    );

    let later = HistoryService::new(&conn).with_clock(FixedClock(NOW_MS + 8 * DAY_MS));
    assert!(later
        .get_alerts(&AlertFilter::default().within_days(7))
        .unwrap()
        .is_empty());
}
