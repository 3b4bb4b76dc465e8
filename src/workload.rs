use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Table every generated statement targets.
pub const TABLE: &str = "test_table";

/// Schema the workload expects. Run once with `--create-table`.
pub const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS test_table (\
     id SERIAL PRIMARY KEY, c1 TEXT, c2 TEXT, c3 TEXT, c4 TEXT, c5 TEXT);";

// Upper bounds (exclusive) of each operation's share of [0, 1).
const FETCH_MAX_CUTOFF: f64 = 0.01;
const READ_ROW_CUTOFF: f64 = 0.20;
const INSERT_ROW_CUTOFF: f64 = 0.80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    FetchMax,
    ReadRow,
    InsertRow,
    UpdateRow,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::FetchMax,
        OperationType::ReadRow,
        OperationType::InsertRow,
        OperationType::UpdateRow,
    ];

    /// Label used for the `type` metric dimension.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::FetchMax => "fetch_max",
            OperationType::ReadRow => "read_row",
            OperationType::InsertRow => "insert_row",
            OperationType::UpdateRow => "update_row",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work for a dispatch loop: the SQL to submit and what kind of operation it is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationType,
    pub sql: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    Run(Operation),
    /// The drawn operation needs a known max id and none is cached yet.
    Skip(OperationType),
}

/// Which operation a draw in [0, 1) maps to.
pub fn classify(draw: f64) -> OperationType {
    if draw < FETCH_MAX_CUTOFF {
        OperationType::FetchMax
    } else if draw < READ_ROW_CUTOFF {
        OperationType::ReadRow
    } else if draw < INSERT_ROW_CUTOFF {
        OperationType::InsertRow
    } else {
        OperationType::UpdateRow
    }
}

/// Pick the next operation for a uniformly distributed `draw` in [0, 1).
///
/// `max_id` bounds the row chosen by reads and updates. Reads fall back to row 1 while it
/// is unknown; updates are skipped instead.
pub fn select<R: Rng + ?Sized>(draw: f64, max_id: Option<i64>, rng: &mut R) -> Selection {
    let kind = classify(draw);
    let sql = match kind {
        OperationType::FetchMax => fetch_max_sql(),
        OperationType::ReadRow => read_row_sql(pick_row(max_id, rng).unwrap_or(1)),
        OperationType::InsertRow => insert_row_sql(),
        OperationType::UpdateRow => match pick_row(max_id, rng) {
            Some(id) => update_row_sql(id),
            None => return Selection::Skip(kind),
        },
    };
    Selection::Run(Operation { kind, sql })
}

fn pick_row<R: Rng + ?Sized>(max_id: Option<i64>, rng: &mut R) -> Option<i64> {
    match max_id {
        Some(max) if max >= 1 => Some(rng.gen_range(1..=max)),
        _ => None,
    }
}

fn fresh_value() -> String {
    Uuid::new_v4().to_string()
}

pub fn fetch_max_sql() -> String {
    format!("SELECT MAX(id) AS max FROM {TABLE};")
}

pub fn read_row_sql(id: i64) -> String {
    format!("BEGIN; SELECT * FROM {TABLE} WHERE id = {id}; COMMIT;")
}

pub fn insert_row_sql() -> String {
    format!(
        "BEGIN; INSERT INTO {TABLE} (c1, c2, c3, c4, c5) VALUES \
         ('{}', '{}', '{}', '{}', '{}'); COMMIT;",
        fresh_value(),
        fresh_value(),
        fresh_value(),
        fresh_value(),
        fresh_value()
    )
}

pub fn update_row_sql(id: i64) -> String {
    format!(
        "BEGIN; SELECT * FROM {TABLE} WHERE id = {id} FOR UPDATE; \
         UPDATE {TABLE} SET c1 = '{}', c2 = '{}', c3 = '{}', c4 = '{}', c5 = '{}' \
         WHERE id = {id}; COMMIT;",
        fresh_value(),
        fresh_value(),
        fresh_value(),
        fresh_value(),
        fresh_value()
    )
}

const UNKNOWN_MAX_ID: i64 = i64::MIN;

/// Highest row id seen by any `fetch_max`, shared by every dispatch loop.
///
/// Readers tolerate stale values, so a single atomic is enough; concurrent writers race
/// and the last store wins. `i64::MIN` is reserved to mean "unknown".
#[derive(Debug)]
pub struct MaxIdCache {
    value: AtomicI64,
}

impl Default for MaxIdCache {
    fn default() -> Self {
        Self {
            value: AtomicI64::new(UNKNOWN_MAX_ID),
        }
    }
}

impl MaxIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<i64> {
        match self.value.load(Ordering::Relaxed) {
            UNKNOWN_MAX_ID => None,
            id => Some(id),
        }
    }

    pub fn set(&self, id: i64) {
        self.value.store(id, Ordering::Relaxed);
    }
}
