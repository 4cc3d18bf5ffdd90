//! Invariant checks over already-fetched metrics rows.
//!
//! Checks run on the exact collections that go into a snapshot, so a passing
//! report describes the exported data and not a later state of the store.
//!
//! Output is a structured [`ValidationReport`] that serialises to JSON
//! for `qdev validate --json`.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::derive::{approx_eq, safe_rate};
use super::types::*;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Severity level for a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single validation check result.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub id: String,
    pub ok: bool,
    pub severity: Severity,
    pub details: String,
    /// Offending user ids (or `user@date` keys), capped at `max_offenders`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<String>,
}

/// Full validation report.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
}

impl ValidationReport {
    /// True if every check passed.
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// Count of checks that failed with a given severity.
    pub fn count_failures(&self, sev: Severity) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.ok && c.severity == sev)
            .count()
    }

    /// Failed checks only.
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.ok)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValidateConfig {
    /// Allowed gap between a stored acceptance rate and acceptances / suggestions.
    pub rate_tolerance: f64,
    /// How many offenders to list per check.
    pub max_offenders: usize,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            rate_tolerance: 1e-3,
            max_offenders: 10,
        }
    }
}

/// Borrowed view of the sections one export fetched.
#[derive(Debug, Clone, Copy)]
pub struct Sections<'a> {
    pub summaries: &'a [UserMetricsSummary],
    pub daily: &'a [DailyRecord],
    pub aggregate: &'a AggregatedMetrics,
    pub trends: &'a [TrendPoint],
    pub rankings: &'a UserRankings,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Run every check and return a structured report.
pub fn run_validation(sections: Sections<'_>, config: &ValidateConfig) -> ValidationReport {
    let checks = vec![
        check_acceptance_bounded(sections.summaries, config),
        check_rate_matches_ratio(sections.summaries, config),
        check_daily_unique(sections.daily, config),
        check_trend_zero_rate(sections.trends, config),
        check_ranking_excludes_zero(sections.summaries, sections.rankings, config),
        check_aggregate_user_count(sections.summaries, sections.aggregate),
    ];
    ValidationReport { checks }
}

fn make_check(
    id: &str,
    severity: Severity,
    offenders: Vec<String>,
    ok_details: &str,
    fail_details: impl FnOnce(usize) -> String,
    config: &ValidateConfig,
) -> Check {
    let ok = offenders.is_empty();
    let details = if ok {
        ok_details.to_string()
    } else {
        fail_details(offenders.len())
    };
    Check {
        id: id.to_string(),
        ok,
        severity,
        details,
        offenders: offenders.into_iter().take(config.max_offenders).collect(),
    }
}

fn check_acceptance_bounded(rows: &[UserMetricsSummary], config: &ValidateConfig) -> Check {
    let offenders: Vec<String> = rows
        .iter()
        .filter(|r| {
            r.total_inline_acceptance_count < 0
                || r.total_inline_acceptance_count > r.total_inline_suggestions_count
        })
        .map(|r| r.user_id.clone())
        .collect();
    make_check(
        "summary.acceptance_within_suggestions",
        Severity::Error,
        offenders,
        "0 <= acceptances <= suggestions for every user",
        |n| format!("{n} user(s) accepted more suggestions than they received"),
        config,
    )
}

fn check_rate_matches_ratio(rows: &[UserMetricsSummary], config: &ValidateConfig) -> Check {
    let offenders: Vec<String> = rows
        .iter()
        .filter(|r| {
            let expected = safe_rate(
                r.total_inline_acceptance_count,
                r.total_inline_suggestions_count,
            );
            !approx_eq(r.acceptance_rate, expected, config.rate_tolerance)
        })
        .map(|r| r.user_id.clone())
        .collect();
    make_check(
        "summary.rate_matches_ratio",
        Severity::Error,
        offenders,
        "stored acceptance_rate equals acceptances / suggestions",
        |n| format!("{n} user(s) have an acceptance_rate that disagrees with their counts"),
        config,
    )
}

fn check_daily_unique(rows: &[DailyRecord], config: &ValidateConfig) -> Check {
    let mut seen = HashSet::new();
    let offenders: Vec<String> = rows
        .iter()
        .filter(|r| !seen.insert((r.user_id.as_str(), r.date)))
        .map(|r| format!("{}@{}", r.user_id, r.date))
        .collect();
    make_check(
        "daily.unique_user_date",
        Severity::Error,
        offenders,
        "one daily row per user per date",
        |n| format!("{n} duplicate (user, date) row(s)"),
        config,
    )
}

fn check_trend_zero_rate(points: &[TrendPoint], config: &ValidateConfig) -> Check {
    let offenders: Vec<String> = points
        .iter()
        .filter(|p| p.daily_suggestions == 0 && p.daily_acceptance_rate != 0.0)
        .map(|p| p.date.to_string())
        .collect();
    make_check(
        "trends.zero_suggestion_rate",
        Severity::Error,
        offenders,
        "days without suggestions report a zero acceptance rate",
        |n| format!("{n} day(s) report a rate without any suggestions"),
        config,
    )
}

fn check_ranking_excludes_zero(
    rows: &[UserMetricsSummary],
    rankings: &UserRankings,
    config: &ValidateConfig,
) -> Check {
    let suggestions: HashMap<&str, i64> = rows
        .iter()
        .map(|r| (r.user_id.as_str(), r.total_inline_suggestions_count))
        .collect();
    let offenders: Vec<String> = rankings
        .top_acceptance_rate
        .iter()
        .filter(|r| suggestions.get(r.user_id.as_str()).is_some_and(|&s| s <= 0))
        .map(|r| r.user_id.clone())
        .collect();
    make_check(
        "rankings.acceptance_excludes_zero_suggestions",
        Severity::Error,
        offenders,
        "acceptance-rate leaderboard only ranks users with suggestions",
        |n| format!("{n} ranked user(s) have no suggestions"),
        config,
    )
}

fn check_aggregate_user_count(rows: &[UserMetricsSummary], aggregate: &AggregatedMetrics) -> Check {
    let listed = rows.len() as i64;
    let ok = aggregate.total_users == listed;
    Check {
        id: "aggregate.user_count_matches_summary".into(),
        ok,
        // Sections are read one after another, so the store may move in between.
        severity: Severity::Warning,
        details: if ok {
            format!("{listed} user(s) in both aggregate and summary")
        } else {
            format!(
                "aggregate counts {} user(s) but summary lists {listed}",
                aggregate.total_users
            )
        },
        offenders: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
