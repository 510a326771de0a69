//! Database health checks.
//!
//! Everything here uses the public pool API only: a liveness checkout, a
//! `SELECT 1` probe and catalog listings through `execute_query`.

use crate::core::db::schema::{list_tables, list_views};
use crate::core::db::{ConnectionFactory, Executor, Value};
use serde::Serialize;
use tracing::{error, info};

/// Tables of the football statistics schema.
pub const DEFAULT_TABLES: &[&str] = &["competitions", "fixtures", "matches", "seasons", "teams", "venues"];

/// Views of the football statistics schema.
pub const DEFAULT_VIEWS: &[&str] = &["team_match_stats"];

/// Tables and views that must exist.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    pub tables: Vec<String>,
    pub views: Vec<String>,
}

impl Expectations {
    /// The football statistics schema: `DEFAULT_TABLES` and `DEFAULT_VIEWS`.
    pub fn standard() -> Self {
        Expectations {
            tables: DEFAULT_TABLES.iter().map(|s| s.to_string()).collect(),
            views: DEFAULT_VIEWS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.views.is_empty()
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub checks: Vec<CheckResult>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    fn push(&mut self, check: CheckResult) {
        if check.passed {
            info!(check = %check.name, "{}", check.detail);
        } else {
            error!(check = %check.name, "{}", check.detail);
        }
        self.checks.push(check);
    }
}

/// Runs every check and collects the results. Checks after a failed
/// connection check are skipped.
pub fn run_checks<F: ConnectionFactory>(executor: &Executor<F>, expected: &Expectations) -> CheckReport {
    let mut report = CheckReport::default();

    report.push(check_connection(executor));
    if !report.passed() {
        return report;
    }
    report.push(check_query(executor));

    match list_tables(executor) {
        Ok(found) => {
            for table in &expected.tables {
                report.push(presence("table", table, &found));
            }
        }
        Err(e) => report.push(CheckResult::fail("tables", format!("could not list tables: {}", e))),
    }

    match list_views(executor) {
        Ok(found) => {
            for view in &expected.views {
                report.push(presence("view", view, &found));
            }
        }
        Err(e) => report.push(CheckResult::fail("views", format!("could not list views: {}", e))),
    }

    report
}

/// Checks a connection out and immediately returns it.
pub fn check_connection<F: ConnectionFactory>(executor: &Executor<F>) -> CheckResult {
    match executor.pool().acquire() {
        Ok(conn) => {
            drop(conn);
            CheckResult::pass("connection", "database connection successful")
        }
        Err(e) => CheckResult::fail("connection", format!("database connection failed: {}", e)),
    }
}

/// `SELECT 1 as test` must return exactly one row with `test = 1`.
pub fn check_query<F: ConnectionFactory>(executor: &Executor<F>) -> CheckResult {
    match executor.fetch_all("SELECT 1 as test", &[]) {
        Ok(rows) if rows.len() == 1 && rows[0].get("test") == Some(&Value::Integer(1)) => {
            CheckResult::pass("query", format!("query execution successful: {}", rows[0].to_json()))
        }
        Ok(rows) => CheckResult::fail(
            "query",
            format!("unexpected probe result: {} row(s)", rows.len()),
        ),
        Err(e) => CheckResult::fail("query", format!("query execution failed: {}", e)),
    }
}

fn presence(kind: &str, name: &str, found: &[String]) -> CheckResult {
    let check = format!("{} '{}'", kind, name);
    if found.iter().any(|f| f == name) {
        CheckResult::pass(check, format!("{} '{}' exists", kind, name))
    } else {
        CheckResult::fail(check, format!("{} '{}' not found", kind, name))
    }
}
