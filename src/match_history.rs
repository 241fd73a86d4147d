use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use parquet::basic::{ConvertedType, LogicalType, TimeUnit};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use parquet::schema::types::SchemaDescriptor;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::error::PredictError;

pub const HOME_PREFIX: &str = "HT_";
pub const AWAY_PREFIX: &str = "AT_";

const MATCHES_TABLE: &str = "matches";
const DATE_COLUMN: &str = "Date";
const HOME_TEAM_COLUMN: &str = "HomeTeam";
const AWAY_TEAM_COLUMN: &str = "AwayTeam";

// Raw scraper names that the feature list knows under their role-prefixed form.
const RENAME_MAP: &[(&str, &str)] = &[
    ("home_possession", "HT_possession"),
    ("away_possession", "AT_possession"),
    ("home_expected_goals_xg", "HT_expected_goals"),
    ("away_expected_goals_xg", "AT_expected_goals"),
    ("home_big_chances", "HT_big_chances"),
    ("away_big_chances", "AT_big_chances"),
    ("home_touches_in_opposition_box", "HT_touches_in_opposition_box"),
    ("away_touches_in_opposition_box", "AT_touches_in_opposition_box"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Cell::Number(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Home,
    Away,
}

impl Role {
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Home => HOME_PREFIX,
            Role::Away => AWAY_PREFIX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub date: NaiveDateTime,
    pub home_team: String,
    pub away_team: String,
    values: HashMap<String, Cell>,
}

impl MatchRecord {
    pub fn new(date: NaiveDateTime, home_team: &str, away_team: &str) -> Self {
        Self {
            date,
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            values: HashMap::new(),
        }
    }

    pub fn with_number(mut self, column: &str, value: f64) -> Self {
        self.insert(column, Cell::Number(value));
        self
    }

    pub fn with_text(mut self, column: &str, value: &str) -> Self {
        self.insert(column, Cell::Text(value.to_string()));
        self
    }

    pub fn insert(&mut self, column: &str, cell: Cell) {
        self.values.insert(column.to_string(), cell);
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.values.get(column)
    }

    /// Finite numeric value of `column`; NaN and text that does not parse count as missing.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column)
            .and_then(Cell::as_f64)
            .filter(|v| v.is_finite())
    }

    pub fn role_of(&self, team: &str) -> Option<Role> {
        if self.home_team == team {
            Some(Role::Home)
        } else if self.away_team == team {
            Some(Role::Away)
        } else {
            None
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Date-ordered table of past fixtures with a per-team index.
///
/// Immutable once built; share it behind an `Arc` and query through
/// [`HistoryView`], which carries the as-of boundary.
#[derive(Debug, Clone, Default)]
pub struct MatchHistory {
    records: Vec<MatchRecord>,
    by_team: HashMap<String, Vec<usize>>,
    columns: BTreeSet<String>,
}

impl MatchHistory {
    pub fn from_records(mut records: Vec<MatchRecord>) -> Self {
        // Stable: same-day fixtures keep their insertion order.
        records.sort_by(|a, b| a.date.cmp(&b.date));

        let mut by_team: HashMap<String, Vec<usize>> = HashMap::new();
        let mut columns = BTreeSet::new();
        for (idx, record) in records.iter().enumerate() {
            by_team
                .entry(record.home_team.clone())
                .or_default()
                .push(idx);
            if record.away_team != record.home_team {
                by_team
                    .entry(record.away_team.clone())
                    .or_default()
                    .push(idx);
            }
            for column in record.columns() {
                if !columns.contains(column) {
                    columns.insert(column.to_string());
                }
            }
        }

        Self {
            records,
            by_team,
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn list_teams(&self) -> Vec<String> {
        let mut teams = self.by_team.keys().cloned().collect::<Vec<_>>();
        teams.sort_unstable();
        teams
    }

    /// Everything stored. Live fixtures are always in the future, so this is lookahead-free.
    pub fn view(&self) -> HistoryView<'_> {
        HistoryView {
            history: self,
            cutoff: None,
        }
    }

    /// Only records dated strictly before `cutoff`.
    pub fn view_before(&self, cutoff: NaiveDateTime) -> HistoryView<'_> {
        HistoryView {
            history: self,
            cutoff: Some(cutoff),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TeamRow<'a> {
    pub record: &'a MatchRecord,
    pub role: Role,
}

impl<'a> TeamRow<'a> {
    pub fn prefix(&self) -> &'static str {
        self.role.prefix()
    }

    pub fn team(&self) -> &'a str {
        match self.role {
            Role::Home => &self.record.home_team,
            Role::Away => &self.record.away_team,
        }
    }

    pub fn date(&self) -> NaiveDateTime {
        self.record.date
    }

    /// `<own prefix><field>`, falling back to the unprefixed column.
    pub fn lookup(&self, field: &str) -> Option<&'a Cell> {
        self.record
            .get(&format!("{}{field}", self.prefix()))
            .or_else(|| self.record.get(field))
    }

    pub fn own_number(&self, field: &str) -> Option<f64> {
        self.record.number(&format!("{}{field}", self.prefix()))
    }
}

/// Point-in-time window over a [`MatchHistory`].
///
/// Every aggregate only sees records before the view's cutoff, so the match
/// being predicted can never leak into its own features.
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    history: &'a MatchHistory,
    cutoff: Option<NaiveDateTime>,
}

impl<'a> HistoryView<'a> {
    pub fn cutoff(&self) -> Option<NaiveDateTime> {
        self.cutoff
    }

    pub fn history(&self) -> &'a MatchHistory {
        self.history
    }

    pub fn contains(&self, team: &str) -> bool {
        !self.team_indices(team).is_empty()
    }

    pub fn team_matches(&self, team: &str) -> impl Iterator<Item = &'a MatchRecord> + 'a {
        let records = &self.history.records;
        self.team_indices(team).iter().map(move |&idx| &records[idx])
    }

    pub fn latest(&self, team: &str) -> Result<TeamRow<'a>, PredictError> {
        let idx = self
            .team_indices(team)
            .last()
            .copied()
            .ok_or_else(|| PredictError::not_found(team))?;
        let record = &self.history.records[idx];
        let role = record
            .role_of(team)
            .ok_or_else(|| PredictError::not_found(team))?;
        Ok(TeamRow { record, role })
    }

    /// Mean of the role-correct `base` column over the team's last `window` matches.
    pub fn trailing_mean(&self, team: &str, base: &str, window: usize) -> f64 {
        let values = self.role_values(team, base, window);
        let mut sum = 0.0;
        let mut n = 0usize;
        for v in values.into_iter().flatten() {
            sum += v;
            n += 1;
        }
        if n == 0 { 0.0 } else { sum / n as f64 }
    }

    /// Exponentially weighted mean (`alpha = 2 / (span + 1)`) of the role-correct
    /// `base` column over the last `lookback` matches, read at the most recent one.
    ///
    /// Weights follow absolute position, so a missing value drops out of both sums
    /// without shifting the decay of its neighbours.
    pub fn ewma(&self, team: &str, base: &str, span: f64, lookback: usize) -> f64 {
        let values = self.role_values(team, base, lookback);
        let alpha = 2.0 / (span.max(1.0) + 1.0);
        let decay = 1.0 - alpha;
        let n = values.len();

        let mut num = 0.0;
        let mut den = 0.0;
        for (i, v) in values.into_iter().enumerate() {
            let Some(v) = v else {
                continue;
            };
            let w = decay.powi((n - 1 - i) as i32);
            num += w * v;
            den += w;
        }
        if den > 0.0 { num / den } else { 0.0 }
    }

    fn team_indices(&self, team: &str) -> &'a [usize] {
        let Some(all) = self.history.by_team.get(team) else {
            return &[];
        };
        match self.cutoff {
            None => all,
            Some(cutoff) => {
                let records = &self.history.records;
                let end = all.partition_point(|&idx| records[idx].date < cutoff);
                &all[..end]
            }
        }
    }

    fn role_values(&self, team: &str, base: &str, take_last: usize) -> Vec<Option<f64>> {
        let indices = self.team_indices(team);
        let start = indices.len().saturating_sub(take_last);
        let home_col = format!("{HOME_PREFIX}{base}");
        let away_col = format!("{AWAY_PREFIX}{base}");

        indices[start..]
            .iter()
            .map(|&idx| {
                let record = &self.history.records[idx];
                if record.home_team == team {
                    record.number(&home_col)
                } else {
                    record.number(&away_col)
                }
            })
            .collect()
    }
}

pub fn load_history(path: &Path) -> Result<MatchHistory> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "parquet" => load_parquet(path),
        "sqlite" | "sqlite3" | "db" => {
            let conn = open_db(path)?;
            load_sqlite(&conn)
        }
        _ => Err(anyhow!(
            "unsupported history snapshot {} (expected .sqlite or .parquet)",
            path.display()
        )),
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open sqlite db {}", path.display()))
}

/// Reads every column of the `matches` table; anything besides date and teams is a statistic.
pub fn load_sqlite(conn: &Connection) -> Result<MatchHistory> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {MATCHES_TABLE}"))
        .context("prepare history query")?;
    let names = stmt
        .column_names()
        .into_iter()
        .map(sanitize_column)
        .collect::<Vec<_>>();

    let mut rows = stmt.query([]).context("query history rows")?;
    let mut records = Vec::new();
    let mut skipped = 0usize;
    while let Some(row) = rows.next().context("read history row")? {
        let mut raw = RawRow::default();
        for (idx, name) in names.iter().enumerate() {
            let value = match row.get_ref(idx).context("decode history cell")? {
                ValueRef::Null | ValueRef::Blob(_) => RawValue::Null,
                ValueRef::Integer(v) => RawValue::Number(v as f64),
                ValueRef::Real(v) => RawValue::Number(v),
                ValueRef::Text(bytes) => {
                    RawValue::Text(String::from_utf8_lossy(bytes).into_owned())
                }
            };
            raw.push(name, value);
        }
        match raw.finish() {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    finish_load("sqlite", records, skipped)
}

pub fn load_parquet(path: &Path) -> Result<MatchHistory> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader history")?;
    let units = timestamp_units(reader.metadata().file_metadata().schema_descr());
    let iter = reader.get_row_iter(None).context("iterate history rows")?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut undecodable = 0usize;
    for row in iter {
        let Ok(row) = row else {
            undecodable += 1;
            continue;
        };
        let mut raw = RawRow::default();
        for (name, field) in row.get_column_iter() {
            let unit = units.get(name.as_str()).copied();
            raw.push(&sanitize_column(name), parquet_value(field, unit));
        }
        match raw.finish() {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if undecodable > 0 {
        warn!(source = "parquet", undecodable, "history rows failed to decode");
    }
    finish_load("parquet", records, skipped)
}

fn finish_load(source: &str, records: Vec<MatchRecord>, skipped: usize) -> Result<MatchHistory> {
    if records.is_empty() {
        return Err(anyhow!("no usable match rows in {source} history"));
    }
    if skipped > 0 {
        warn!(source, skipped, "skipped history rows without date or teams");
    }
    let history = MatchHistory::from_records(records);
    info!(
        source,
        matches = history.len(),
        teams = history.by_team.len(),
        columns = history.columns.len(),
        "loaded match history"
    );
    Ok(history)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampUnit {
    Millis,
    Micros,
    Nanos,
}

impl TimestampUnit {
    fn per_second(self) -> i64 {
        match self {
            TimestampUnit::Millis => 1_000,
            TimestampUnit::Micros => 1_000_000,
            TimestampUnit::Nanos => 1_000_000_000,
        }
    }

    fn to_datetime(self, ticks: i64) -> Option<NaiveDateTime> {
        let per_second = self.per_second();
        let nanos = ticks.rem_euclid(per_second) * (1_000_000_000 / per_second);
        DateTime::from_timestamp(ticks.div_euclid(per_second), nanos as u32).map(|d| d.naive_utc())
    }
}

// The record API only decodes legacy converted types, so nanosecond
// timestamps (pandas `datetime64[ns]`) arrive as bare INT64 values.
fn timestamp_units(schema: &SchemaDescriptor) -> HashMap<String, TimestampUnit> {
    schema
        .columns()
        .iter()
        .filter_map(|col| {
            let unit = match col.logical_type() {
                Some(LogicalType::Timestamp { unit, .. }) => match unit {
                    TimeUnit::MILLIS(_) => TimestampUnit::Millis,
                    TimeUnit::MICROS(_) => TimestampUnit::Micros,
                    TimeUnit::NANOS(_) => TimestampUnit::Nanos,
                },
                _ => match col.converted_type() {
                    ConvertedType::TIMESTAMP_MILLIS => TimestampUnit::Millis,
                    ConvertedType::TIMESTAMP_MICROS => TimestampUnit::Micros,
                    _ => return None,
                },
            };
            Some((col.name().to_string(), unit))
        })
        .collect()
}

fn parquet_value(field: &Field, unit: Option<TimestampUnit>) -> RawValue {
    let stamp = |value: Option<NaiveDateTime>| value.map_or(RawValue::Null, RawValue::Timestamp);
    match field {
        Field::Bool(v) => RawValue::Number(if *v { 1.0 } else { 0.0 }),
        Field::Byte(v) => RawValue::Number(*v as f64),
        Field::Short(v) => RawValue::Number(*v as f64),
        Field::Int(v) => RawValue::Number(*v as f64),
        Field::Long(v) => match unit {
            Some(unit) => stamp(unit.to_datetime(*v)),
            None => RawValue::Number(*v as f64),
        },
        Field::UByte(v) => RawValue::Number(*v as f64),
        Field::UShort(v) => RawValue::Number(*v as f64),
        Field::UInt(v) => RawValue::Number(*v as f64),
        Field::ULong(v) => RawValue::Number(*v as f64),
        Field::Float(v) => RawValue::Number(*v as f64),
        Field::Double(v) => RawValue::Number(*v),
        Field::Str(s) => RawValue::Text(s.clone()),
        Field::Date(days) => stamp(
            NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(*days))))
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        ),
        Field::TimestampMillis(ms) => stamp(TimestampUnit::Millis.to_datetime(*ms)),
        Field::TimestampMicros(us) => stamp(TimestampUnit::Micros.to_datetime(*us)),
        _ => RawValue::Null,
    }
}

enum RawValue {
    Null,
    Number(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

#[derive(Default)]
struct RawRow {
    date: Option<NaiveDateTime>,
    home: Option<String>,
    away: Option<String>,
    values: HashMap<String, Cell>,
}

impl RawRow {
    fn push(&mut self, name: &str, value: RawValue) {
        match name {
            DATE_COLUMN => {
                self.date = match value {
                    RawValue::Timestamp(dt) => Some(dt),
                    RawValue::Text(s) => parse_match_date(&s),
                    RawValue::Number(secs) => {
                        DateTime::from_timestamp(secs as i64, 0).map(|d| d.naive_utc())
                    }
                    RawValue::Null => None,
                };
            }
            HOME_TEAM_COLUMN => self.home = team_name(value),
            AWAY_TEAM_COLUMN => self.away = team_name(value),
            _ => {
                let cell = match value {
                    RawValue::Number(v) => Cell::Number(v),
                    RawValue::Text(s) => Cell::Text(s),
                    RawValue::Timestamp(dt) => Cell::Text(dt.to_string()),
                    RawValue::Null => return,
                };
                self.values.insert(name.to_string(), cell);
            }
        }
    }

    fn finish(self) -> Option<MatchRecord> {
        let date = self.date?;
        let home_team = self.home?;
        let away_team = self.away?;
        Some(MatchRecord {
            date,
            home_team,
            away_team,
            values: self.values,
        })
    }
}

fn team_name(value: RawValue) -> Option<String> {
    let RawValue::Text(s) = value else {
        return None;
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn sanitize_column(raw: &str) -> String {
    let renamed = RENAME_MAP
        .iter()
        .find(|(from, _)| *from == raw)
        .map(|(_, to)| *to)
        .unwrap_or(raw);
    renamed
        .replace('>', "_GT_")
        .replace('<', "_LT_")
        .replace('.', "_")
}

pub fn parse_match_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    // Offsets are dropped, keeping the local wall-clock time.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    let day_first = if s.rsplit('/').next().is_some_and(|year| year.len() == 2) {
        "%d/%m/%y"
    } else {
        "%d/%m/%Y"
    };
    for fmt in ["%Y-%m-%d", day_first] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}
