//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `speechtrack_core` linkage without any front end.
//! - With a database path, print a read-only summary of tracked users and,
//!   for a given user, their baselines and unreviewed alerts.
//!
//! Usage: `speechtrack [DB_PATH [USER_ID]]`

use speechtrack_core::{open_existing_db, AlertFilter, HistoryService, UserRegistry};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("speechtrack_core ping={}", speechtrack_core::ping());
    println!("speechtrack_core version={}", speechtrack_core::core_version());

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };

    match summarize(&db_path, args.next().as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn summarize(db_path: &str, user_id: Option<&str>) -> Result<(), String> {
    let conn = open_existing_db(db_path).map_err(|err| err.to_string())?;

    let users = UserRegistry::new(&conn)
        .list_users()
        .map_err(|err| err.to_string())?;
    println!("users={}", users.len());
    for user in &users {
        println!(
            "  {}\tname={}\tassessments={}\tlast={}",
            user.user_id,
            user.name.as_deref().unwrap_or("-"),
            user.assessment_count,
            user.last_assessment_at
                .map_or_else(|| "-".to_string(), |at| at.to_string()),
        );
    }

    let Some(user_id) = user_id else {
        return Ok(());
    };
    let history = HistoryService::new(&conn);

    let baselines = history
        .get_baselines(user_id)
        .map_err(|err| err.to_string())?;
    println!("baselines={}", baselines.len());
    for baseline in &baselines {
        println!(
            "  {}\tcentral={:.4}\tband=[{:.4}, {:.4}]\tn={}",
            baseline.feature_name,
            baseline.central,
            baseline.lower,
            baseline.upper,
            baseline.sample_size
        );
    }

    let alerts = history
        .get_alerts(&AlertFilter::for_user(user_id).unreviewed_only())
        .map_err(|err| err.to_string())?;
    println!("unreviewed_alerts={}", alerts.len());
    for record in &alerts {
        let alert = &record.alert;
        println!(
            "  #{}\t{}\t{}\tdeviation={:+.4}\tassessment={}",
            alert.alert_id,
            alert.severity.label(),
            alert.feature_name,
            alert.deviation,
            alert.assessment_id
        );
    }

    Ok(())
}
