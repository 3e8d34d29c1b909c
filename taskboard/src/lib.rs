//! Task board engine: turns a spreadsheet export of project tasks into a
//! normalized, read-only board model for a reporting front end.
//! The transform is pure; file access lives behind `storage::RecordSource`.

pub mod model {
    use chrono::NaiveDate;
    use indexmap::{IndexMap, IndexSet};
    use serde::{Deserialize, Serialize};
    use serde_with::skip_serializing_none;
    use std::path::PathBuf;

    /* ------------------------------ Columns ------------------------------ */

    /// Column names of the board export that map onto `Task` fields.
    pub mod columns {
        pub const TASK_ID: &str = "Task ID";
        pub const CREATED_AT: &str = "Created At";
        pub const COMPLETED_AT: &str = "Completed At";
        pub const LAST_MODIFIED: &str = "Last Modified";
        pub const NAME: &str = "Name";
        pub const SECTION: &str = "Section/Column";
        pub const ASSIGNEE: &str = "Assignee";
        pub const ASSIGNEE_EMAIL: &str = "Assignee Email";
        pub const START_DATE: &str = "Start Date";
        pub const DUE_DATE: &str = "Due Date";
        pub const PRIORITY: &str = "Priority";
        pub const STATUS: &str = "Status";
        pub const TAGS: &str = "Tags";
        pub const NOTES: &str = "Notes";
        pub const PARENT_TASK: &str = "Parent task";
        pub const BLOCKED_BY: &str = "Blocked By (Dependencies)";
        pub const BLOCKING: &str = "Blocking (Dependencies)";

        /// Everything outside this list is a custom field.
        pub const KNOWN: &[&str] = &[
            TASK_ID,
            CREATED_AT,
            COMPLETED_AT,
            LAST_MODIFIED,
            NAME,
            SECTION,
            ASSIGNEE,
            ASSIGNEE_EMAIL,
            START_DATE,
            DUE_DATE,
            PRIORITY,
            STATUS,
            TAGS,
            NOTES,
            PARENT_TASK,
            BLOCKED_BY,
            BLOCKING,
        ];

        /// Columns whose absence degrades the report without breaking it.
        pub const RECOMMENDED: &[&str] = &[SECTION, ASSIGNEE, DUE_DATE];
    }

    pub const UNCATEGORIZED: &str = "Uncategorized";
    pub const UNASSIGNED: &str = "Unassigned";
    pub const NO_STATUS: &str = "No status";
    pub const NO_PRIORITY: &str = "No priority";

    /// Timeline width used when no task carries a date.
    pub const DEFAULT_RANGE_DAYS: i64 = 30;

    /// Lowercase fragments that mark a section as finished work.
    pub const DONE_VOCABULARY: &[&str] = &[
        "done",
        "complete",
        "completed",
        "finished",
        "closed",
        "resolved",
    ];

    /* ------------------------------ Records ------------------------------ */

    /// One spreadsheet row keyed by header, column order preserved.
    pub type Record = IndexMap<String, String>;

    /// Trimmed cell value; `None` when the column is absent or blank.
    pub fn cell<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
        record
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Parsed export: header row plus one record per data row.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CsvTable {
        pub headers: Vec<String>,
        pub records: Vec<Record>,
    }

    /* ------------------------------- Tasks ------------------------------- */

    /// Position of a task in the board's task arena.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TaskIdx(pub usize);

    /// A board task: one valid input row plus everything derived from it.
    ///
    /// Parent links are by name (`parent_name`) and resolved through lookups;
    /// names are not guaranteed unique.
    #[skip_serializing_none]
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Task {
        pub id: String,
        pub name: String,

        /// Resolved workflow section, never empty.
        pub section: String,
        pub assignee: String,
        pub assignee_email: Option<String>,
        pub priority: Option<String>,
        pub status: Option<String>,
        #[serde(default)]
        pub tags: IndexSet<String>,
        pub notes: Option<String>,

        pub created_at: Option<String>,
        pub completed_at: Option<String>,
        pub modified_at: Option<String>,
        pub blocked_by: Option<String>,
        pub blocking: Option<String>,

        pub parent_name: Option<String>,
        pub is_subtask: bool,

        pub start_date: Option<NaiveDate>,
        pub due_date: Option<NaiveDate>,
        pub is_done: bool,
        pub is_overdue: bool,
        pub days_until_due: Option<i64>,
        pub duration: Option<TaskDuration>,
        pub timeline: Option<TimelinePosition>,

        /// 1-based rank of the section by first appearance.
        pub section_order: usize,
        /// High=1, Medium=2, Low=3, anything else 4.
        pub priority_order: u8,

        /// `None` when the input has no custom columns at all.
        #[serialize_always]
        pub custom_fields: Option<IndexMap<String, Option<String>>>,
    }

    impl Task {
        /// Start of the bar on the timeline: start date, else due date.
        pub fn effective_start(&self) -> Option<NaiveDate> {
            self.start_date.or(self.due_date)
        }

        /// End of the bar on the timeline: due date, else start date.
        pub fn effective_end(&self) -> Option<NaiveDate> {
            self.due_date.or(self.start_date)
        }
    }

    /// Progress facts for a task with both a start and a due date.
    /// Days count the start but not the due date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TaskDuration {
        pub days: i64,
        pub elapsed: i64,
        pub remaining: i64,
        pub percent_elapsed: u32,
        pub has_started: bool,
        pub is_complete: bool,
    }

    /// Normalized horizontal placement inside the project range (0..=100).
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TimelinePosition {
        pub start_percent: f64,
        pub width_percent: f64,
    }

    /* ------------------------------ Aggregates ------------------------------ */

    /// Union of all task dates. `days` is never below one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProjectRange {
        pub start: Option<NaiveDate>,
        pub end: Option<NaiveDate>,
        pub days: i64,
    }

    impl Default for ProjectRange {
        fn default() -> Self {
            Self {
                start: None,
                end: None,
                days: DEFAULT_RANGE_DAYS,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatsSnapshot {
        pub total: usize,
        pub done: usize,
        pub overdue: usize,
        pub completion_percent: u32,
        pub by_status: IndexMap<String, usize>,
        pub by_priority: IndexMap<String, usize>,
        pub by_assignee: IndexMap<String, usize>,
        pub by_section: IndexMap<String, usize>,
    }

    impl StatsSnapshot {
        pub fn breakdowns(&self) -> [(&'static str, &IndexMap<String, usize>); 4] {
            [
                ("status", &self.by_status),
                ("priority", &self.by_priority),
                ("assignee", &self.by_assignee),
                ("section", &self.by_section),
            ]
        }
    }

    /* ------------------------------ Ranking ------------------------------ */

    pub fn priority_rank(priority: Option<&str>) -> u8 {
        match priority.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
            Some("high") => 1,
            Some("medium") => 2,
            Some("low") => 3,
            _ => 4,
        }
    }

    /// Heuristic: "Completed Tasks" and "CLOSED-ARCHIVE" both count as done.
    pub fn is_done_section(section: &str) -> bool {
        let lower = section.to_lowercase();
        DONE_VOCABULARY.iter().any(|word| lower.contains(word))
    }

    /* ------------------------------- Errors ------------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("CSV file not found: {path:?}")]
        NotFound { path: PathBuf },
        #[error("failed to read CSV file {path:?}: {source}")]
        Read {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to parse CSV file {path:?}: {reason}")]
        Parse { path: PathBuf, reason: String },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum LoadErrorKind {
        CsvNotFound,
        CsvParseError,
    }

    /// Error descriptor attached to a board whose input could not be loaded.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LoadFailure {
        pub kind: LoadErrorKind,
        pub message: String,
        pub hint: String,
    }

    impl LoadError {
        pub fn kind(&self) -> LoadErrorKind {
            match self {
                LoadError::NotFound { .. } => LoadErrorKind::CsvNotFound,
                LoadError::Read { .. } | LoadError::Parse { .. } => LoadErrorKind::CsvParseError,
            }
        }

        pub fn failure(&self) -> LoadFailure {
            let hint = match self {
                LoadError::NotFound { path } => format!(
                    "Export the board as CSV and save it to {}, or point `csv_path` at the export.",
                    path.display()
                ),
                LoadError::Read { .. } => {
                    "Make sure the export is readable and saved as UTF-8 text.".to_string()
                }
                LoadError::Parse { .. } => "Check that the export is comma-separated, starts with a header row, and has balanced double quotes.".to_string(),
            };
            LoadFailure {
                kind: self.kind(),
                message: self.to_string(),
                hint,
            }
        }
    }

}

pub mod calendar {
    //! Calendar-day arithmetic. Every comparison happens on UTC dates so the
    //! time of day of the reference instant never changes a result.

    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

    /// The "today" a board is computed against, normalized to a UTC date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ReferenceDate(pub NaiveDate);

    impl ReferenceDate {
        pub fn today_utc() -> Self {
            Self(Utc::now().date_naive())
        }

        pub fn date(self) -> NaiveDate {
            self.0
        }
    }

    impl From<NaiveDate> for ReferenceDate {
        fn from(date: NaiveDate) -> Self {
            Self(date)
        }
    }

    impl From<NaiveDateTime> for ReferenceDate {
        fn from(dt: NaiveDateTime) -> Self {
            Self(dt.date())
        }
    }

    impl From<DateTime<Utc>> for ReferenceDate {
        fn from(dt: DateTime<Utc>) -> Self {
            Self(dt.date_naive())
        }
    }

    const NAIVE_DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    /// Parse a date cell. Accepts `YYYY-MM-DD`, RFC 3339 timestamps (taken
    /// at their UTC date) and zone-less date-times.
    pub fn parse_date(raw: &str) -> Option<NaiveDate> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc).date_naive());
        }
        NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(|dt| dt.date())
    }

    /// Whole calendar days from `from` to `to`; negative when `to` is earlier.
    pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
        (to - from).num_days()
    }

}

pub mod storage {
    use super::model::{CsvTable, LoadError};
    use std::path::Path;

    /// Hands the engine already-parsed records. Parsing is independent of
    /// where the bytes come from.
    pub trait RecordSource {
        fn load(&self, path: &Path) -> Result<CsvTable, LoadError>;
    }
}

pub mod parser {
    //! CSV reader built on `nom`.
    //!
    //! One known shape only: comma separated, optional double quotes with `""`
    //! escapes, quoted cells may span lines, first row is the header.

    use crate::model::*;
    use crate::storage::RecordSource;
    use anyhow::{Result, anyhow, bail};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{is_not, tag, take_while},
        character::complete::{char, line_ending},
        combinator::{cut, eof, map, value},
        error::{VerboseError, context},
        multi::{fold_many0, separated_list1},
        sequence::{preceded, terminated},
    };
    use std::{fs, io, path::Path};

    /* ------------------------ Public entry points ------------------------ */

    /// Parse CSV text into headers and records.
    pub fn parse_csv_from_str(input: &str) -> Result<CsvTable> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let (_rest, rows) = parse_rows(input).map_err(to_anyhow("rows"))?;

        let mut rows = rows.into_iter();
        let Some(header_row) = rows.next() else {
            bail!("input is empty: expected a header row");
        };
        let headers: Vec<String> = header_row
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            bail!("header row has no column names");
        }

        let records = rows
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|row| {
                let mut record = Record::with_capacity(headers.len());
                for (header, value) in headers.iter().zip(row) {
                    if !header.is_empty() {
                        record.insert(header.clone(), value);
                    }
                }
                record
            })
            .collect();

        Ok(CsvTable { headers, records })
    }

    /// Reads exports from the local filesystem.
    pub struct CsvFileSource;

    impl RecordSource for CsvFileSource {
        fn load(&self, path: &Path) -> std::result::Result<CsvTable, LoadError> {
            let text = fs::read_to_string(path).map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => LoadError::NotFound {
                    path: path.to_path_buf(),
                },
                _ => LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                },
            })?;
            parse_csv_from_str(&text).map_err(|e| LoadError::Parse {
                path: path.to_path_buf(),
                reason: format!("{e:#}"),
            })
        }
    }

    pub(crate) type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn to_anyhow(label: &'static str) -> impl Fn(nom::Err<VerboseError<&str>>) -> anyhow::Error {
        move |e| match e {
            nom::Err::Error(ve) | nom::Err::Failure(ve) => anyhow!(pretty_verbose_error(label, ve)),
            nom::Err::Incomplete(_) => anyhow!("incomplete input while parsing {}", label),
        }
    }

    fn pretty_verbose_error(label: &str, ve: VerboseError<&str>) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        let _ = writeln!(s, "parse error in {}:", label);
        for (frag, kind) in ve.errors {
            let show = frag
                .get(0..frag.find('\n').unwrap_or(frag.len()))
                .unwrap_or(frag);
            let _ = writeln!(s, "  at: {:?}  {:?}", show, kind);
        }
        s
    }

    /* ------------------------------- Grammar ------------------------------- */

    fn parse_rows(mut i: &str) -> PResult<'_, Vec<Vec<String>>> {
        let mut rows = Vec::new();
        while !i.is_empty() {
            // blank line
            if let Ok((rest, _)) = line_ending_ve(i) {
                i = rest;
                continue;
            }
            let (rest, row) = parse_record(i)?;
            let (rest, _) = context("end of record", alt((line_ending_ve, eof)))(rest)?;
            rows.push(row);
            i = rest;
        }
        Ok((i, rows))
    }

    fn parse_record(i: &str) -> PResult<'_, Vec<String>> {
        separated_list1(char(','), parse_field)(i)
    }

    fn parse_field(i: &str) -> PResult<'_, String> {
        alt((quoted_field, bare_field))(i)
    }

    /// Once the opening quote is seen the field must close, so a missing quote
    /// is a hard failure instead of a silent fallback to a bare field.
    fn quoted_field(i: &str) -> PResult<'_, String> {
        preceded(
            char('"'),
            cut(terminated(quoted_body, context("closing quote", char('"')))),
        )(i)
    }

    fn quoted_body(i: &str) -> PResult<'_, String> {
        fold_many0(
            alt((is_not("\""), value("\"", tag("\"\"")))),
            String::new,
            |mut acc, chunk: &str| {
                acc.push_str(chunk);
                acc
            },
        )(i)
    }

    fn bare_field(i: &str) -> PResult<'_, String> {
        map(
            take_while(|c: char| c != ',' && c != '\n' && c != '\r'),
            |s: &str| s.to_string(),
        )(i)
    }

    fn line_ending_ve(i: &str) -> PResult<'_, &str> {
        line_ending::<_, VerboseError<&str>>(i)
    }

}

pub mod config {
    //! Board settings loaded from a `key = value` file.
    //!
    //! Keys are described once in `SCHEMA`; a single generic routine converts
    //! and assigns values. The engine itself only passes settings through.

    use crate::parser::PResult;
    use nom::{
        branch::alt,
        bytes::complete::{take_while, take_while1},
        character::complete::{char, not_line_ending, space0},
        combinator::{all_consuming, cut, eof, map, rest, value},
        sequence::{delimited, preceded, separated_pair, terminated, tuple},
    };
    use serde::{Deserialize, Serialize};
    use std::{
        fs, io,
        path::{Path, PathBuf},
    };
    use tracing::{debug, warn};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BoardSettings {
        pub title: String,
        pub csv_path: PathBuf,
        pub notes_preview_length: usize,
        /// Opaque to the engine (e.g. "preview", "full", "hidden").
        pub notes_display: String,
        pub show_completed: bool,
    }

    impl Default for BoardSettings {
        fn default() -> Self {
            Self {
                title: "Project Board".to_string(),
                csv_path: PathBuf::from("tasks.csv"),
                notes_preview_length: 140,
                notes_display: "preview".to_string(),
                show_completed: true,
            }
        }
    }

    /* ------------------------------- Schema ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ValueKind {
        Text,
        Count,
        Flag,
        Path,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ConfigValue {
        Text(String),
        Count(usize),
        Flag(bool),
        Path(PathBuf),
    }

    impl ValueKind {
        fn parse(self, raw: &str) -> Option<ConfigValue> {
            match self {
                ValueKind::Text => Some(ConfigValue::Text(raw.to_string())),
                ValueKind::Count => raw.parse().ok().map(ConfigValue::Count),
                ValueKind::Flag => match raw.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Some(ConfigValue::Flag(true)),
                    "false" | "no" | "off" | "0" => Some(ConfigValue::Flag(false)),
                    _ => None,
                },
                ValueKind::Path if raw.is_empty() => None,
                ValueKind::Path => Some(ConfigValue::Path(PathBuf::from(raw))),
            }
        }

        fn describe(self) -> &'static str {
            match self {
                ValueKind::Text => "text",
                ValueKind::Count => "a non-negative integer",
                ValueKind::Flag => "true or false",
                ValueKind::Path => "a path",
            }
        }
    }

    /// One recognized config key.
    pub struct FieldDef {
        pub key: &'static str,
        pub kind: ValueKind,
        apply: fn(&mut BoardSettings, ConfigValue),
    }

    pub const SCHEMA: &[FieldDef] = &[
        FieldDef {
            key: "title",
            kind: ValueKind::Text,
            apply: set_title,
        },
        FieldDef {
            key: "csv_path",
            kind: ValueKind::Path,
            apply: set_csv_path,
        },
        FieldDef {
            key: "notes_preview_length",
            kind: ValueKind::Count,
            apply: set_notes_preview_length,
        },
        FieldDef {
            key: "notes_display",
            kind: ValueKind::Text,
            apply: set_notes_display,
        },
        FieldDef {
            key: "show_completed",
            kind: ValueKind::Flag,
            apply: set_show_completed,
        },
    ];

    fn set_title(s: &mut BoardSettings, v: ConfigValue) {
        if let ConfigValue::Text(t) = v {
            s.title = t;
        }
    }

    fn set_csv_path(s: &mut BoardSettings, v: ConfigValue) {
        if let ConfigValue::Path(p) = v {
            s.csv_path = p;
        }
    }

    fn set_notes_preview_length(s: &mut BoardSettings, v: ConfigValue) {
        if let ConfigValue::Count(n) = v {
            s.notes_preview_length = n;
        }
    }

    fn set_notes_display(s: &mut BoardSettings, v: ConfigValue) {
        if let ConfigValue::Text(t) = v {
            s.notes_display = t;
        }
    }

    fn set_show_completed(s: &mut BoardSettings, v: ConfigValue) {
        if let ConfigValue::Flag(b) = v {
            s.show_completed = b;
        }
    }

    /* ------------------------------- Parsing ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum ConfigError {
        #[error("line {line}: expected `key = value`")]
        Malformed { line: usize },
        #[error("line {line}: unknown key `{key}`")]
        UnknownKey { line: usize, key: String },
        #[error("line {line}: `{key}` expects {expected}, got `{value}`")]
        InvalidValue {
            line: usize,
            key: String,
            expected: &'static str,
            value: String,
        },
        #[error("config file {path:?} not found, using defaults")]
        Missing { path: PathBuf },
        #[error("config file {path:?} could not be read: {reason}")]
        Unreadable { path: PathBuf, reason: String },
    }

    /// Keys are matched case-insensitively; `-` and `_` are interchangeable.
    fn normalize_key(key: &str) -> String {
        key.trim().to_ascii_lowercase().replace('-', "_")
    }

    /// One line of a config file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConfigLine<'a> {
        /// Blank line or `#` comment.
        Skip,
        Entry { key: &'a str, value: &'a str },
    }

    /// `key = value`, `key = "value"`, `# comment` or nothing.
    fn parse_config_line(i: &str) -> PResult<'_, ConfigLine<'_>> {
        all_consuming(preceded(
            space0,
            alt((
                value(ConfigLine::Skip, eof),
                value(ConfigLine::Skip, preceded(char('#'), rest)),
                map(parse_entry, |(key, raw)| ConfigLine::Entry { key, value: raw }),
            )),
        ))(i)
    }

    fn parse_entry(i: &str) -> PResult<'_, (&str, &str)> {
        separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            tuple((space0, char('='), space0)),
            parse_value,
        )(i)
    }

    fn parse_value(i: &str) -> PResult<'_, &str> {
        alt((
            terminated(double_quoted, space0),
            terminated(single_quoted, space0),
            map(not_line_ending, str::trim_end),
        ))(i)
    }

    // an opened quote must close on the same line
    fn double_quoted(i: &str) -> PResult<'_, &str> {
        delimited(char('"'), take_while(|c: char| c != '"'), cut(char('"')))(i)
    }

    fn single_quoted(i: &str) -> PResult<'_, &str> {
        delimited(char('\''), take_while(|c: char| c != '\''), cut(char('\'')))(i)
    }

    /// Apply a single entry through the schema.
    pub fn apply_entry(
        settings: &mut BoardSettings,
        line: usize,
        key: &str,
        raw: &str,
    ) -> Result<(), ConfigError> {
        let key = normalize_key(key);
        let Some(field) = SCHEMA.iter().find(|f| f.key == key) else {
            return Err(ConfigError::UnknownKey { line, key });
        };
        let value = field
            .kind
            .parse(raw)
            .ok_or_else(|| ConfigError::InvalidValue {
                line,
                key: key.clone(),
                expected: field.kind.describe(),
                value: raw.to_string(),
            })?;
        (field.apply)(settings, value);
        Ok(())
    }

    /// Parse config text. Bad lines are reported and skipped; defaults stay
    /// in place for anything not set.
    pub fn parse_settings(text: &str) -> (BoardSettings, Vec<ConfigError>) {
        let mut settings = BoardSettings::default();
        let mut warnings = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let (key, raw) = match parse_config_line(line) {
                Ok((_, ConfigLine::Entry { key, value })) => (key, value),
                Ok((_, ConfigLine::Skip)) => continue,
                Err(_) => {
                    warnings.push(ConfigError::Malformed { line: line_no });
                    continue;
                }
            };
            if let Err(err) = apply_entry(&mut settings, line_no, key, raw) {
                warnings.push(err);
            }
        }
        (settings, warnings)
    }

    /* -------------------------------- Store -------------------------------- */

    /// Owns the settings for one config file. Reloading is explicit: callers
    /// invoke `reload()` or forward file-change events to `notify_changed`.
    #[derive(Debug, Clone)]
    pub struct ConfigStore {
        path: PathBuf,
        settings: BoardSettings,
        warnings: Vec<ConfigError>,
        generation: u64,
    }

    impl ConfigStore {
        pub fn open(path: impl Into<PathBuf>) -> Self {
            let mut store = Self {
                path: path.into(),
                settings: BoardSettings::default(),
                warnings: Vec::new(),
                generation: 0,
            };
            store.reload();
            store
        }

        /// Re-read the file. An unreadable file keeps the previous settings.
        pub fn reload(&mut self) -> &BoardSettings {
            match fs::read_to_string(&self.path) {
                Ok(text) => {
                    let (settings, warnings) = parse_settings(&text);
                    self.settings = settings;
                    self.warnings = warnings;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    self.settings = BoardSettings::default();
                    self.warnings = vec![ConfigError::Missing {
                        path: self.path.clone(),
                    }];
                }
                Err(err) => {
                    self.warnings = vec![ConfigError::Unreadable {
                        path: self.path.clone(),
                        reason: err.to_string(),
                    }];
                }
            }
            self.generation += 1;
            for w in &self.warnings {
                warn!(path = %self.path.display(), "{w}");
            }
            debug!(
                path = %self.path.display(),
                generation = self.generation,
                "config loaded"
            );
            &self.settings
        }

        /// Change notification hook; reloads only when `changed` is this file.
        pub fn notify_changed(&mut self, changed: &Path) -> bool {
            if !same_file(changed, &self.path) {
                return false;
            }
            self.reload();
            true
        }

        pub fn settings(&self) -> &BoardSettings {
            &self.settings
        }

        pub fn warnings(&self) -> &[ConfigError] {
            &self.warnings
        }

        pub fn generation(&self) -> u64 {
            self.generation
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    fn same_file(a: &Path, b: &Path) -> bool {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn schema_coerces_values() {
            let text = "# board\ntitle = \"Launch plan\"\nnotes-preview-length = 80\nSHOW_COMPLETED = no\ncsv_path = data/export.csv\n";
            let (settings, warnings) = parse_settings(text);
            assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
            assert_eq!(settings.title, "Launch plan");
            assert_eq!(settings.notes_preview_length, 80);
            assert!(!settings.show_completed);
            assert_eq!(settings.csv_path, PathBuf::from("data/export.csv"));
            assert_eq!(settings.notes_display, "preview");
        }

        #[test]
        fn bad_lines_warn_and_keep_defaults() {
            let (settings, warnings) =
                parse_settings("notes_preview_length = lots\ncolour = blue\njust text\n");
            assert_eq!(settings, BoardSettings::default());
            assert_eq!(warnings.len(), 3);
            assert!(matches!(
                warnings[0],
                ConfigError::InvalidValue { line: 1, .. }
            ));
            assert!(matches!(warnings[1], ConfigError::UnknownKey { line: 2, .. }));
            assert_eq!(warnings[2], ConfigError::Malformed { line: 3 });
        }

        #[test]
        fn line_grammar_splits_keys_values_and_comments() {
            let entry = |key, value| ConfigLine::Entry { key, value };
            let cases = [
                ("", ConfigLine::Skip),
                ("   \t", ConfigLine::Skip),
                ("  # a = b", ConfigLine::Skip),
                ("title=Board", entry("title", "Board")),
                ("\ttitle   =   Board plan  ", entry("title", "Board plan")),
                ("title = \"  padded \"", entry("title", "  padded ")),
                ("title = 'it says \"hi\"'", entry("title", "it says \"hi\"")),
                ("notes-display =", entry("notes-display", "")),
            ];
            for (line, expected) in cases {
                let (_, parsed) = parse_config_line(line).expect(line);
                assert_eq!(parsed, expected, "{line:?}");
            }
        }

        #[test]
        fn line_grammar_rejects_broken_lines() {
            for line in ["just text", "= value", "title = \"open", "title = \"a\" b", "ti tle = x"] {
                assert!(parse_config_line(line).is_err(), "{line:?} should not parse");
            }
            let (_, warnings) = parse_settings("title = \"open\ntitle = ok\n");
            assert_eq!(warnings, vec![ConfigError::Malformed { line: 1 }]);
        }

        #[test]
        fn every_schema_key_round_trips_through_apply_entry() {
            let mut settings = BoardSettings::default();
            for field in SCHEMA {
                let raw = match field.kind {
                    ValueKind::Text => "x",
                    ValueKind::Count => "7",
                    ValueKind::Flag => "false",
                    ValueKind::Path => "board.csv",
                };
                apply_entry(&mut settings, 1, field.key, raw).expect("schema key applies");
            }
            assert_eq!(settings.title, "x");
            assert_eq!(settings.notes_preview_length, 7);
        }

        #[test]
        fn store_reloads_explicitly() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("board.conf");
            fs::write(&path, "title = First\n").expect("write config");

            let mut store = ConfigStore::open(&path);
            assert_eq!(store.path(), path.as_path());
            assert_eq!(store.settings().title, "First");
            assert_eq!(store.generation(), 1);

            fs::write(&path, "title = Second\n").expect("rewrite config");
            assert_eq!(store.settings().title, "First");

            let other = tmp.path().join("other.conf");
            assert!(!store.notify_changed(&other));
            assert_eq!(store.settings().title, "First");

            assert!(store.notify_changed(&path));
            assert_eq!(store.settings().title, "Second");
            assert_eq!(store.generation(), 2);
        }

        #[test]
        fn missing_file_uses_defaults_with_warning() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let store = ConfigStore::open(tmp.path().join("absent.conf"));
            assert_eq!(store.settings(), &BoardSettings::default());
            assert!(matches!(store.warnings(), [ConfigError::Missing { .. }]));
        }
    }
}

pub mod projectors {
    pub mod validate {
        //! Non-fatal data-quality checks over raw records.

        use crate::model::{Record, cell, columns};
        use indexmap::IndexSet;

        /// Every key seen across records, first appearance order. Stands in for
        /// the header row when records arrive without one.
        pub fn columns_of(records: &[Record]) -> Vec<String> {
            let columns: IndexSet<&str> = records
                .iter()
                .flat_map(|r| r.keys().map(String::as_str))
                .collect();
            columns.into_iter().map(str::to_string).collect()
        }

        /// Row numbers are 1-based and count the header row. Recommended
        /// columns are checked against `headers`.
        pub fn validate_records(records: &[Record], headers: &[String]) -> Vec<String> {
            let mut diagnostics = Vec::new();
            for (idx, record) in records.iter().enumerate() {
                if cell(record, columns::NAME).is_none() {
                    diagnostics.push(format!(
                        "row {}: missing required field `{}`",
                        idx + 2,
                        columns::NAME
                    ));
                }
            }

            if records.is_empty() {
                return diagnostics;
            }
            for column in columns::RECOMMENDED {
                if !headers.iter().any(|h| h == column) {
                    diagnostics.push(format!("recommended column `{column}` is missing"));
                }
            }
            diagnostics
        }

        /// First `limit` lines plus a `+N more` tail.
        pub fn summarize(diagnostics: &[String], limit: usize) -> Vec<String> {
            let mut lines: Vec<String> = diagnostics.iter().take(limit).cloned().collect();
            if diagnostics.len() > limit {
                lines.push(format!("+{} more", diagnostics.len() - limit));
            }
            lines
        }

    }

    pub mod fields {
        use crate::model::{Record, cell, columns};
        use indexmap::{IndexMap, IndexSet};

        pub fn is_known_field(column: &str) -> bool {
            columns::KNOWN.contains(&column)
        }

        /// Unknown columns across all records, first appearance order.
        pub fn discover_custom_fields(records: &[Record]) -> Vec<String> {
            let mut seen: IndexSet<&str> = IndexSet::new();
            for record in records {
                for key in record.keys() {
                    let key = key.trim();
                    if !key.is_empty() && !is_known_field(key) {
                        seen.insert(key);
                    }
                }
            }
            seen.into_iter().map(str::to_string).collect()
        }

        /// `None` when there are no custom columns at all; otherwise one entry
        /// per discovered column, blank or absent cells as `None`.
        pub fn custom_fields_for(
            record: &Record,
            names: &[String],
        ) -> Option<IndexMap<String, Option<String>>> {
            if names.is_empty() {
                return None;
            }
            Some(
                names
                    .iter()
                    .map(|name| (name.clone(), cell(record, name).map(str::to_string)))
                    .collect(),
            )
        }

    }

    pub mod sections {
        //! Section resolution in two passes: own sections first, then
        //! inheritance for subtasks that have none.

        use crate::model::{Record, UNCATEGORIZED, cell, columns};
        use indexmap::{IndexMap, IndexSet};

        #[derive(Debug, Clone, Default)]
        pub struct SectionResolver {
            by_name: IndexMap<String, String>,
            duplicates: IndexSet<String>,
            collisions: usize,
        }

        impl SectionResolver {
            /// First pass. The first record with a given name wins; later
            /// records with the same name only bump the collision counter.
            pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
                let mut resolver = Self::default();
                let mut seen: IndexSet<&str> = IndexSet::new();
                for record in records {
                    let Some(name) = cell(record, columns::NAME) else {
                        continue;
                    };
                    if !seen.insert(name) {
                        resolver.collisions += 1;
                        resolver.duplicates.insert(name.to_string());
                    }
                    if let Some(section) = cell(record, columns::SECTION) {
                        resolver
                            .by_name
                            .entry(name.to_string())
                            .or_insert_with(|| section.to_string());
                    }
                }
                resolver
            }

            pub fn section_of(&self, name: &str) -> Option<&str> {
                self.by_name.get(name).map(String::as_str)
            }

            /// Second pass: own section, else the parent's, else the sentinel.
            pub fn resolve(&self, record: &Record) -> String {
                cell(record, columns::SECTION)
                    .or_else(|| {
                        cell(record, columns::PARENT_TASK).and_then(|p| self.section_of(p))
                    })
                    .unwrap_or(UNCATEGORIZED)
                    .to_string()
            }

            pub fn collisions(&self) -> usize {
                self.collisions
            }

            pub fn duplicate_names(&self) -> impl Iterator<Item = &str> {
                self.duplicates.iter().map(String::as_str)
            }

            /// One aggregate line for all duplicate names, if any.
            pub fn collision_diagnostic(&self) -> Option<String> {
                if self.collisions == 0 {
                    return None;
                }
                let names: Vec<&str> = self.duplicate_names().collect();
                Some(format!(
                    "{} duplicate task name(s) ({}): the first occurrence is used for subtask section inheritance",
                    self.collisions,
                    names.join(", ")
                ))
            }
        }

        /// Distinct sections in first-appearance order; rank is the 1-based
        /// position, unknown names rank after all of them.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct SectionOrder {
            names: IndexSet<String>,
        }

        impl SectionOrder {
            pub fn from_resolved<'a>(sections: impl IntoIterator<Item = &'a String>) -> Self {
                Self {
                    names: sections.into_iter().cloned().collect(),
                }
            }

            pub fn rank(&self, section: &str) -> usize {
                self.names
                    .get_index_of(section)
                    .map(|i| i + 1)
                    .unwrap_or(self.names.len() + 1)
            }

            pub fn names(&self) -> Vec<String> {
                self.names.iter().cloned().collect()
            }
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::test_support::record;
            use pretty_assertions::assert_eq;

            #[test]
            fn subtask_inherits_parent_listed_later() {
                let records = vec![
                    record(&[("Name", "Child"), ("Parent task", "Parent")]),
                    record(&[("Name", "Parent"), ("Section/Column", "Doing")]),
                ];
                let resolver = SectionResolver::from_records(&records);
                assert_eq!(resolver.resolve(&records[0]), "Doing");
                assert_eq!(resolver.resolve(&records[1]), "Doing");
            }

            #[test]
            fn own_section_beats_inheritance_and_fallback_is_uncategorized() {
                let records = vec![
                    record(&[("Name", "Parent"), ("Section/Column", "Doing")]),
                    record(&[
                        ("Name", "Child"),
                        ("Section/Column", "Review"),
                        ("Parent task", "Parent"),
                    ]),
                    record(&[("Name", "Lost"), ("Parent task", "Nobody")]),
                    record(&[("Name", "Loose")]),
                ];
                let resolver = SectionResolver::from_records(&records);
                assert_eq!(resolver.resolve(&records[1]), "Review");
                assert_eq!(resolver.resolve(&records[2]), UNCATEGORIZED);
                assert_eq!(resolver.resolve(&records[3]), UNCATEGORIZED);
            }

            #[test]
            fn first_occurrence_wins_and_collisions_are_counted() {
                let records = vec![
                    record(&[("Name", "Task A"), ("Section/Column", "To do")]),
                    record(&[("Name", "Task A"), ("Section/Column", "Done")]),
                    record(&[("Name", "Task A")]),
                ];
                let resolver = SectionResolver::from_records(&records);
                assert_eq!(resolver.section_of("Task A"), Some("To do"));
                assert_eq!(resolver.collisions(), 2);
                assert_eq!(resolver.duplicate_names().collect::<Vec<_>>(), vec!["Task A"]);
                let diag = resolver.collision_diagnostic().expect("diagnostic");
                assert!(diag.contains("duplicate"));
            }

            #[test]
            fn ranks_follow_first_appearance() {
                let resolved: Vec<String> = ["Doing", "To do", "Doing", "Done"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                let order = SectionOrder::from_resolved(&resolved);
                assert_eq!(order.names(), vec!["Doing", "To do", "Done"]);
                assert_eq!(order.rank("Doing"), 1);
                assert_eq!(order.rank("Done"), 3);
                assert_eq!(order.rank("Elsewhere"), 4);
            }
        }
    }

    pub mod tasks {
        //! Record → `Task` mapping once sections and custom columns are known.

        use super::fields::custom_fields_for;
        use super::timeline::compute_duration;
        use crate::calendar::{days_between, parse_date};
        use crate::model::*;
        use chrono::NaiveDate;
        use indexmap::IndexSet;

        /// Inputs shared by every task of one run.
        #[derive(Debug, Clone, Copy)]
        pub struct TaskContext<'a> {
            pub today: NaiveDate,
            pub custom_field_names: &'a [String],
        }

        /// Comma separated, trimmed, blanks dropped, duplicates collapsed.
        pub fn parse_tags(raw: Option<&str>) -> IndexSet<String> {
            raw.map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
        }

        fn owned(record: &Record, column: &str) -> Option<String> {
            cell(record, column).map(str::to_string)
        }

        fn read_date(
            record: &Record,
            column: &str,
            row: usize,
            name: &str,
            diagnostics: &mut Vec<String>,
        ) -> Option<NaiveDate> {
            let raw = cell(record, column)?;
            let parsed = parse_date(raw);
            if parsed.is_none() {
                diagnostics.push(format!(
                    "row {row}: invalid {column} `{raw}` on task `{name}`, treated as missing"
                ));
            }
            parsed
        }

        pub fn build_task(
            record: &Record,
            row: usize,
            section: String,
            section_order: usize,
            ctx: &TaskContext<'_>,
            diagnostics: &mut Vec<String>,
        ) -> Task {
            let name = cell(record, columns::NAME).unwrap_or_default().to_string();
            let start_date = read_date(record, columns::START_DATE, row, &name, diagnostics);
            let due_date = read_date(record, columns::DUE_DATE, row, &name, diagnostics);

            let completed_at = owned(record, columns::COMPLETED_AT);
            let is_done = is_done_section(&section) || completed_at.is_some();
            let is_overdue = !is_done && due_date.is_some_and(|due| due < ctx.today);

            let priority = owned(record, columns::PRIORITY);
            let priority_order = priority_rank(priority.as_deref());
            let parent_name = owned(record, columns::PARENT_TASK);

            Task {
                id: cell(record, columns::TASK_ID).unwrap_or_default().to_string(),
                name,
                section,
                assignee: cell(record, columns::ASSIGNEE)
                    .unwrap_or(UNASSIGNED)
                    .to_string(),
                assignee_email: owned(record, columns::ASSIGNEE_EMAIL),
                priority,
                status: owned(record, columns::STATUS),
                tags: parse_tags(cell(record, columns::TAGS)),
                notes: owned(record, columns::NOTES),
                created_at: owned(record, columns::CREATED_AT),
                completed_at,
                modified_at: owned(record, columns::LAST_MODIFIED),
                blocked_by: owned(record, columns::BLOCKED_BY),
                blocking: owned(record, columns::BLOCKING),
                is_subtask: parent_name.is_some(),
                parent_name,
                start_date,
                due_date,
                is_done,
                is_overdue,
                days_until_due: due_date.map(|due| days_between(ctx.today, due)),
                duration: compute_duration(start_date, due_date, ctx.today),
                timeline: None,
                section_order,
                priority_order,
                custom_fields: custom_fields_for(record, ctx.custom_field_names),
            }
        }

    }

    pub mod grouping {
        //! Board ordering: roots sorted by (section rank, priority rank), each
        //! followed directly by its subtasks in input order.

        use crate::model::{Task, TaskIdx};
        use indexmap::{IndexMap, IndexSet};
        use serde::Serialize;
        use std::collections::HashMap;

        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct Ordering {
            pub order: Vec<TaskIdx>,
            /// Subtasks whose parent name matches no task; kept as roots.
            pub orphans: Vec<TaskIdx>,
            /// Tasks only reachable through a parent cycle.
            pub detached: Vec<TaskIdx>,
        }

        /// Order the task arena. Every task appears exactly once.
        pub fn order_tasks(tasks: &[Task]) -> Ordering {
            let mut first_by_name: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
            for (i, task) in tasks.iter().enumerate() {
                first_by_name.entry(task.name.as_str()).or_insert(i);
            }

            let mut children: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
            let mut roots = Vec::new();
            let mut orphans = Vec::new();
            for (i, task) in tasks.iter().enumerate() {
                match task.parent_name.as_deref() {
                    None => roots.push(i),
                    Some(parent) => match first_by_name.get(parent) {
                        Some(&p) if p != i => children[p].push(i),
                        _ => {
                            roots.push(i);
                            orphans.push(TaskIdx(i));
                        }
                    },
                }
            }

            // stable: exact ties keep input order
            roots.sort_by_key(|&i| (tasks[i].section_order, tasks[i].priority_order));

            let mut visited = vec![false; tasks.len()];
            let mut order = Vec::with_capacity(tasks.len());
            for &root in &roots {
                push_subtree(root, &children, &mut visited, &mut order);
            }

            let mut detached = Vec::new();
            for i in 0..tasks.len() {
                if !visited[i] {
                    let before = order.len();
                    push_subtree(i, &children, &mut visited, &mut order);
                    detached.extend_from_slice(&order[before..]);
                }
            }

            Ordering {
                order,
                orphans,
                detached,
            }
        }

        fn push_subtree(
            root: usize,
            children: &[Vec<usize>],
            visited: &mut [bool],
            order: &mut Vec<TaskIdx>,
        ) {
            let mut stack = vec![root];
            while let Some(i) = stack.pop() {
                if visited[i] {
                    continue;
                }
                visited[i] = true;
                order.push(TaskIdx(i));
                stack.extend(children[i].iter().rev().copied().filter(|&c| !visited[c]));
            }
        }

        /// Section buckets filtered from the final order, keyed in section order.
        pub fn bucket_by_section(
            tasks: &[Task],
            order: &[TaskIdx],
            section_names: &[String],
        ) -> IndexMap<String, Vec<TaskIdx>> {
            let mut buckets: IndexMap<String, Vec<TaskIdx>> = section_names
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect();
            for &idx in order {
                buckets
                    .entry(tasks[idx.0].section.clone())
                    .or_default()
                    .push(idx);
            }
            buckets
        }

        /// Per-section lookups so renderers never rescan the task list.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct SectionIndex {
            task_names: IndexMap<String, IndexSet<String>>,
            subtasks: IndexMap<String, IndexMap<String, Vec<TaskIdx>>>,
        }

        impl SectionIndex {
            pub fn build(tasks: &[Task], order: &[TaskIdx]) -> Self {
                let mut index = Self::default();
                for &idx in order {
                    let task = &tasks[idx.0];
                    index
                        .task_names
                        .entry(task.section.clone())
                        .or_default()
                        .insert(task.name.clone());
                    if let Some(parent) = &task.parent_name {
                        index
                            .subtasks
                            .entry(task.section.clone())
                            .or_default()
                            .entry(parent.clone())
                            .or_default()
                            .push(idx);
                    }
                }
                index
            }

            pub fn contains_task(&self, section: &str, name: &str) -> bool {
                self.task_names
                    .get(section)
                    .is_some_and(|names| names.contains(name))
            }

            pub fn subtasks_in(&self, section: &str, parent: &str) -> &[TaskIdx] {
                self.subtasks
                    .get(section)
                    .and_then(|by_parent| by_parent.get(parent))
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
            }

            pub fn has_subtasks_in(&self, section: &str, parent: &str) -> bool {
                !self.subtasks_in(section, parent).is_empty()
            }
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::test_support::task;
            use pretty_assertions::assert_eq;

            fn names(tasks: &[Task], order: &[TaskIdx]) -> Vec<String> {
                order.iter().map(|i| tasks[i.0].name.clone()).collect()
            }

            #[test]
            fn roots_sort_by_section_then_priority() {
                let tasks = vec![
                    task("low-todo", "To do", 1, 3, None),
                    task("done", "Done", 2, 1, None),
                    task("high-todo", "To do", 1, 1, None),
                    task("none-todo", "To do", 1, 4, None),
                ];
                let ordering = order_tasks(&tasks);
                assert_eq!(
                    names(&tasks, &ordering.order),
                    vec!["high-todo", "low-todo", "none-todo", "done"]
                );
            }

            #[test]
            fn subtasks_follow_parent_in_input_order() {
                let tasks = vec![
                    task("sub-2", "To do", 1, 1, Some("P")),
                    task("Q", "To do", 1, 2, None),
                    task("P", "To do", 1, 3, None),
                    task("sub-1", "To do", 1, 1, Some("P")),
                    task("grand", "To do", 1, 1, Some("sub-2")),
                ];
                let ordering = order_tasks(&tasks);
                assert_eq!(
                    names(&tasks, &ordering.order),
                    vec!["Q", "P", "sub-2", "grand", "sub-1"]
                );
                assert!(ordering.orphans.is_empty());
            }

            #[test]
            fn orphans_stay_roots_and_are_reported() {
                let tasks = vec![
                    task("A", "Doing", 2, 4, None),
                    task("orphan", "To do", 1, 4, Some("Missing")),
                ];
                let ordering = order_tasks(&tasks);
                assert_eq!(names(&tasks, &ordering.order), vec!["orphan", "A"]);
                assert_eq!(ordering.orphans, vec![TaskIdx(1)]);
            }

            #[test]
            fn parent_cycles_still_emit_every_task_once() {
                let tasks = vec![
                    task("root", "To do", 1, 4, None),
                    task("X", "To do", 1, 4, Some("Y")),
                    task("Y", "To do", 1, 4, Some("X")),
                    task("self", "To do", 1, 4, Some("self")),
                ];
                let ordering = order_tasks(&tasks);
                let mut seen = ordering.order.clone();
                seen.sort();
                assert_eq!(seen, vec![TaskIdx(0), TaskIdx(1), TaskIdx(2), TaskIdx(3)]);
                assert_eq!(ordering.detached, vec![TaskIdx(1), TaskIdx(2)]);
                assert_eq!(ordering.orphans, vec![TaskIdx(3)]);
            }

            #[test]
            fn duplicate_parent_names_attach_to_first_occurrence() {
                let tasks = vec![
                    task("P", "Doing", 2, 4, None),
                    task("P", "To do", 1, 4, None),
                    task("child", "Doing", 2, 4, Some("P")),
                ];
                let ordering = order_tasks(&tasks);
                assert_eq!(names(&tasks, &ordering.order), vec!["P", "P", "child"]);
                assert_eq!(ordering.order, vec![TaskIdx(1), TaskIdx(0), TaskIdx(2)]);
            }

            #[test]
            fn buckets_and_index_follow_global_order() {
                let tasks = vec![
                    task("P", "To do", 1, 2, None),
                    task("first", "To do", 1, 1, None),
                    task("child", "To do", 1, 4, Some("P")),
                    task("elsewhere", "Done", 2, 4, Some("P")),
                ];
                let ordering = order_tasks(&tasks);
                let sections = vec!["To do".to_string(), "Done".to_string()];
                let buckets = bucket_by_section(&tasks, &ordering.order, &sections);
                assert_eq!(names(&tasks, &buckets["To do"]), vec!["first", "P", "child"]);
                assert_eq!(names(&tasks, &buckets["Done"]), vec!["elsewhere"]);

                let index = SectionIndex::build(&tasks, &ordering.order);
                assert!(index.contains_task("To do", "child"));
                assert!(!index.contains_task("Done", "child"));
                assert!(index.has_subtasks_in("To do", "P"));
                assert_eq!(index.subtasks_in("Done", "P"), &[TaskIdx(3)]);
                assert!(!index.has_subtasks_in("Done", "first"));
            }
        }
    }

    pub mod timeline {
        //! Date-range math for the timeline view and per-task progress.

        use crate::calendar::days_between;
        use crate::model::{ProjectRange, Task, TaskDuration, TaskIdx, TimelinePosition};
        use chrono::NaiveDate;

        fn round2(x: f64) -> f64 {
            (x * 100.0).round() / 100.0
        }

        /// Span covering every effective date; 30 days when nothing is dated.
        pub fn project_range(tasks: &[Task]) -> ProjectRange {
            let mut earliest: Option<NaiveDate> = None;
            let mut latest: Option<NaiveDate> = None;
            for task in tasks {
                for d in [task.effective_start(), task.effective_end()].into_iter().flatten() {
                    earliest = Some(earliest.map_or(d, |e| e.min(d)));
                    latest = Some(latest.map_or(d, |l| l.max(d)));
                }
            }
            match (earliest, latest) {
                (Some(start), Some(end)) => ProjectRange {
                    start: Some(start),
                    end: Some(end),
                    days: (days_between(start, end) + 1).max(1),
                },
                _ => ProjectRange::default(),
            }
        }

        /// Bar placement for a dated task. Width is at least 1% and never runs
        /// past the right edge.
        pub fn position(task: &Task, range: &ProjectRange) -> Option<TimelinePosition> {
            let start = task.effective_start()?;
            let end = task.effective_end()?;
            let origin = range.start?;
            let span = range.days.max(1) as f64;

            let offset = days_between(origin, start) as f64;
            let start_percent = (offset / span * 100.0).clamp(0.0, 100.0);
            let length = (days_between(start, end) + 1) as f64;
            let width_percent = (length / span * 100.0)
                .min(100.0 - start_percent)
                .max(1.0);

            Some(TimelinePosition {
                start_percent: round2(start_percent),
                width_percent: round2(width_percent),
            })
        }

        pub fn apply_positions(tasks: &mut [Task], range: &ProjectRange) {
            for task in tasks.iter_mut() {
                task.timeline = position(task, range);
            }
        }

        /// Requires both dates and `due >= start`. Elapsed is clamped to the
        /// duration, so progress stays within 0..=100.
        pub fn compute_duration(
            start: Option<NaiveDate>,
            due: Option<NaiveDate>,
            today: NaiveDate,
        ) -> Option<TaskDuration> {
            let (start, due) = (start?, due?);
            if due < start {
                return None;
            }
            let days = days_between(start, due);
            let since_start = days_between(start, today);
            let elapsed = since_start.clamp(0, days);
            let percent_elapsed = if days == 0 {
                if since_start >= 0 { 100 } else { 0 }
            } else {
                (elapsed as f64 / days as f64 * 100.0).round() as u32
            };
            Some(TaskDuration {
                days,
                elapsed,
                remaining: days - elapsed,
                percent_elapsed,
                has_started: since_start >= 0,
                is_complete: today >= due,
            })
        }

        /// Dated tasks by effective start (ties keep board order), undated last.
        pub fn chronological(tasks: &[Task], order: &[TaskIdx]) -> Vec<TaskIdx> {
            let mut dated: Vec<(NaiveDate, TaskIdx)> = Vec::new();
            let mut undated = Vec::new();
            for &idx in order {
                match tasks[idx.0].effective_start() {
                    Some(d) => dated.push((d, idx)),
                    None => undated.push(idx),
                }
            }
            dated.sort_by_key(|(d, _)| *d);
            dated.into_iter().map(|(_, idx)| idx).chain(undated).collect()
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::test_support::{date, task};
            use pretty_assertions::assert_eq;

            fn dated(name: &str, start: Option<NaiveDate>, due: Option<NaiveDate>) -> Task {
                let mut t = task(name, "To do", 1, 4, None);
                t.start_date = start;
                t.due_date = due;
                t
            }

            #[test]
            fn empty_or_undated_uses_default_range() {
                assert_eq!(project_range(&[]).days, 30);
                let range = project_range(&[dated("A", None, None)]);
                assert_eq!(range, ProjectRange::default());
                assert_eq!(position(&dated("A", None, None), &range), None);
            }

            #[test]
            fn single_day_range_is_one_day_and_finite() {
                let day = Some(date(2026, 1, 15));
                let tasks = vec![dated("A", day, day), dated("B", day, day)];
                let range = project_range(&tasks);
                assert_eq!(range.days, 1);
                for t in &tasks {
                    let pos = position(t, &range).expect("position");
                    assert!(pos.start_percent.is_finite());
                    assert!(pos.width_percent.is_finite());
                    assert_eq!(pos.start_percent, 0.0);
                    assert_eq!(pos.width_percent, 100.0);
                }
            }

            #[test]
            fn range_spans_start_only_and_due_only_tasks() {
                let tasks = vec![
                    dated("A", Some(date(2026, 1, 1)), None),
                    dated("B", None, Some(date(2026, 1, 10))),
                ];
                let range = project_range(&tasks);
                assert_eq!(range.start, Some(date(2026, 1, 1)));
                assert_eq!(range.end, Some(date(2026, 1, 10)));
                assert_eq!(range.days, 10);

                let b = position(&tasks[1], &range).expect("position");
                assert_eq!(b.start_percent, 90.0);
                assert_eq!(b.width_percent, 10.0);
            }

            #[test]
            fn width_is_clamped_to_remaining_space_and_minimum() {
                let range = ProjectRange {
                    start: Some(date(2026, 1, 1)),
                    end: Some(date(2026, 12, 31)),
                    days: 365,
                };
                let tiny = position(&dated("A", Some(date(2026, 3, 1)), None), &range)
                    .expect("position");
                assert_eq!(tiny.width_percent, 1.0);

                let at_edge = position(&dated("B", Some(date(2026, 12, 31)), None), &range)
                    .expect("position");
                assert!(at_edge.start_percent + at_edge.width_percent <= 101.0);
                assert!(at_edge.width_percent >= 1.0);

                let early = position(&dated("C", Some(date(2025, 6, 1)), Some(date(2026, 1, 2))), &range)
                    .expect("position");
                assert_eq!(early.start_percent, 0.0);
                assert!(early.width_percent <= 100.0);
            }

            #[test]
            fn duration_counts_start_but_not_due() {
                let start = date(2026, 1, 1);
                let due = date(2026, 1, 5);

                let before = compute_duration(Some(start), Some(due), date(2025, 12, 30)).expect("duration");
                assert_eq!(before.days, 4);
                assert_eq!(before.elapsed, 0);
                assert_eq!(before.percent_elapsed, 0);
                assert!(!before.has_started);

                let mid = compute_duration(Some(start), Some(due), date(2026, 1, 3)).expect("duration");
                assert_eq!((mid.elapsed, mid.remaining, mid.percent_elapsed), (2, 2, 50));
                assert!(mid.has_started && !mid.is_complete);

                let after = compute_duration(Some(start), Some(due), date(2026, 2, 1)).expect("duration");
                assert_eq!((after.elapsed, after.remaining, after.percent_elapsed), (4, 0, 100));
                assert!(after.is_complete);
            }

            #[test]
            fn duration_handles_degenerate_inputs() {
                let day = date(2026, 1, 15);
                let same = compute_duration(Some(day), Some(day), day).expect("duration");
                assert_eq!(same.days, 0);
                assert_eq!(same.percent_elapsed, 100);
                assert_eq!(compute_duration(Some(day), Some(date(2026, 1, 1)), day), None);
                assert_eq!(compute_duration(None, Some(day), day), None);
            }

            #[test]
            fn chronological_puts_undated_last() {
                let tasks = vec![
                    dated("late", Some(date(2026, 3, 1)), None),
                    dated("undated", None, None),
                    dated("early", None, Some(date(2026, 1, 1))),
                    dated("tie", Some(date(2026, 3, 1)), None),
                ];
                let order: Vec<TaskIdx> = (0..tasks.len()).map(TaskIdx).collect();
                let names: Vec<&str> = chronological(&tasks, &order)
                    .iter()
                    .map(|i| tasks[i.0].name.as_str())
                    .collect();
                assert_eq!(names, vec!["early", "late", "tie", "undated"]);
            }
        }
    }

    pub mod stats {
        use crate::model::{NO_PRIORITY, NO_STATUS, StatsSnapshot, Task};
        use indexmap::IndexMap;

        /// Rounded; 0 for an empty board.
        pub fn completion_percent(done: usize, total: usize) -> u32 {
            if total == 0 {
                return 0;
            }
            (done as f64 / total as f64 * 100.0).round() as u32
        }

        fn bump(map: &mut IndexMap<String, usize>, key: &str) {
            *map.entry(key.to_string()).or_insert(0) += 1;
        }

        /// Single pass; breakdown keys appear in the order tasks are visited.
        pub fn aggregate<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> StatsSnapshot {
            let mut stats = StatsSnapshot::default();
            for task in tasks {
                stats.total += 1;
                if task.is_done {
                    stats.done += 1;
                }
                if task.is_overdue {
                    stats.overdue += 1;
                }
                bump(&mut stats.by_status, task.status.as_deref().unwrap_or(NO_STATUS));
                bump(
                    &mut stats.by_priority,
                    task.priority.as_deref().unwrap_or(NO_PRIORITY),
                );
                bump(&mut stats.by_assignee, &task.assignee);
                bump(&mut stats.by_section, &task.section);
            }
            stats.completion_percent = completion_percent(stats.done, stats.total);
            stats
        }

    }

    pub mod board {
        //! Orchestration: raw records (or a record source) in, one immutable
        //! `Board` out.

        use super::grouping::{self, SectionIndex};
        use super::sections::{SectionOrder, SectionResolver};
        use super::tasks::{TaskContext, build_task};
        use super::{fields, stats, timeline, validate};
        use crate::calendar::ReferenceDate;
        use crate::config::BoardSettings;
        use crate::model::*;
        use crate::storage::RecordSource;
        use indexmap::IndexMap;
        use serde::Serialize;
        use std::path::Path;
        use tracing::{debug, error, warn};

        /// Diagnostics beyond this many are folded into a `+N more` line.
        pub const LOGGED_DIAGNOSTICS: usize = 10;

        /// The normalized board. Tasks live in `tasks` (input order); every
        /// other collection refers to them by `TaskIdx`.
        #[derive(Debug, Clone, Default, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Board {
            pub tasks: Vec<Task>,
            pub all: Vec<TaskIdx>,
            pub sections: IndexMap<String, Vec<TaskIdx>>,
            pub section_names: Vec<String>,
            pub stats: StatsSnapshot,
            pub timeline: Vec<TaskIdx>,
            pub project_range: ProjectRange,
            pub custom_field_names: Vec<String>,
            pub section_index: SectionIndex,
            pub diagnostics: Vec<String>,
            pub settings: BoardSettings,
            pub error: Option<LoadFailure>,
        }

        /// Front-end shape with indices resolved to tasks.
        #[derive(Debug, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct BoardView<'a> {
            pub all: Vec<&'a Task>,
            pub sections: IndexMap<&'a str, Vec<&'a Task>>,
            pub section_names: &'a [String],
            pub stats: &'a StatsSnapshot,
            pub timeline: Vec<&'a Task>,
            pub project_range: &'a ProjectRange,
            pub custom_field_names: &'a [String],
            pub settings: &'a BoardSettings,
            pub diagnostics: &'a [String],
            pub error: Option<&'a LoadFailure>,
        }

        impl Board {
            /// Empty board carrying a load failure.
            pub fn failed(failure: LoadFailure, settings: BoardSettings) -> Self {
                Self {
                    settings,
                    error: Some(failure),
                    ..Self::default()
                }
            }

            pub fn task(&self, idx: TaskIdx) -> &Task {
                &self.tasks[idx.0]
            }

            fn resolve<'a>(&'a self, idxs: &'a [TaskIdx]) -> impl Iterator<Item = &'a Task> + 'a {
                idxs.iter().map(|&i| self.task(i))
            }

            /// Tasks in board order.
            pub fn ordered(&self) -> impl Iterator<Item = &Task> + '_ {
                self.resolve(&self.all)
            }

            pub fn section<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Task> + 'a {
                let idxs = self.sections.get(name).map(Vec::as_slice).unwrap_or(&[]);
                self.resolve(idxs)
            }

            pub fn view(&self) -> BoardView<'_> {
                BoardView {
                    all: self.ordered().collect(),
                    sections: self
                        .sections
                        .iter()
                        .map(|(name, idxs)| (name.as_str(), self.resolve(idxs).collect()))
                        .collect(),
                    section_names: &self.section_names,
                    stats: &self.stats,
                    timeline: self.resolve(&self.timeline).collect(),
                    project_range: &self.project_range,
                    custom_field_names: &self.custom_field_names,
                    settings: &self.settings,
                    diagnostics: &self.diagnostics,
                    error: self.error.as_ref(),
                }
            }
        }

        /// Run the whole transform over already-parsed records. Without a
        /// header row, the columns present in the records stand in for it.
        pub fn project_records(
            records: &[Record],
            today: impl Into<ReferenceDate>,
            settings: BoardSettings,
        ) -> Board {
            let headers = validate::columns_of(records);
            project(records, &headers, today.into(), settings)
        }

        /// Run the whole transform over a parsed export, header row included.
        pub fn project_table(
            table: &CsvTable,
            today: impl Into<ReferenceDate>,
            settings: BoardSettings,
        ) -> Board {
            project(&table.records, &table.headers, today.into(), settings)
        }

        fn project(
            records: &[Record],
            headers: &[String],
            today: ReferenceDate,
            settings: BoardSettings,
        ) -> Board {
            let today = today.date();
            let mut diagnostics = validate::validate_records(records, headers);

            let valid: Vec<(usize, &Record)> = records
                .iter()
                .enumerate()
                .filter(|(_, r)| cell(r, columns::NAME).is_some())
                .collect();

            let custom_field_names = fields::discover_custom_fields(records);

            let resolver = SectionResolver::from_records(valid.iter().map(|(_, r)| *r));
            let collisions = resolver.collision_diagnostic();
            if let Some(line) = &collisions {
                diagnostics.push(line.clone());
            }
            let resolved: Vec<String> = valid.iter().map(|(_, r)| resolver.resolve(r)).collect();
            let section_order = SectionOrder::from_resolved(&resolved);

            let ctx = TaskContext {
                today,
                custom_field_names: &custom_field_names,
            };
            let mut tasks: Vec<Task> = valid
                .iter()
                .zip(resolved)
                .map(|((idx, record), section)| {
                    let rank = section_order.rank(&section);
                    build_task(record, idx + 2, section, rank, &ctx, &mut diagnostics)
                })
                .collect();

            let project_range = timeline::project_range(&tasks);
            timeline::apply_positions(&mut tasks, &project_range);

            let ordering = grouping::order_tasks(&tasks);
            if !ordering.orphans.is_empty() {
                let names: Vec<&str> = ordering
                    .orphans
                    .iter()
                    .map(|&i| tasks[i.0].name.as_str())
                    .collect();
                diagnostics.push(format!(
                    "{} subtask(s) point at a missing parent or at themselves, kept at top level: {}",
                    names.len(),
                    names.join(", ")
                ));
            }
            if !ordering.detached.is_empty() {
                diagnostics.push(format!(
                    "{} task(s) sit in a parent cycle and were listed after the board",
                    ordering.detached.len()
                ));
            }

            let section_names = section_order.names();
            let sections = grouping::bucket_by_section(&tasks, &ordering.order, &section_names);
            let section_index = SectionIndex::build(&tasks, &ordering.order);
            let timeline = timeline::chronological(&tasks, &ordering.order);
            let stats = stats::aggregate(ordering.order.iter().map(|&i| &tasks[i.0]));

            for line in warning_lines(&diagnostics, collisions.as_deref()) {
                warn!("{line}");
            }
            debug!(
                tasks = tasks.len(),
                sections = section_names.len(),
                custom_fields = custom_field_names.len(),
                done = stats.done,
                overdue = stats.overdue,
                "board projected"
            );

            Board {
                tasks,
                all: ordering.order,
                sections,
                section_names,
                stats,
                timeline,
                project_range,
                custom_field_names,
                section_index,
                diagnostics,
                settings,
                error: None,
            }
        }

        /// Lines to log for one run: the duplicate-name summary always, then
        /// the capped list of everything else.
        fn warning_lines(diagnostics: &[String], collisions: Option<&str>) -> Vec<String> {
            let rest: Vec<String> = diagnostics
                .iter()
                .filter(|d| Some(d.as_str()) != collisions)
                .cloned()
                .collect();
            collisions
                .map(str::to_string)
                .into_iter()
                .chain(validate::summarize(&rest, LOGGED_DIAGNOSTICS))
                .collect()
        }

        /// Load through `source` and project. Never fails: a load error yields
        /// an empty board with `error` set.
        pub fn project_source(
            source: &impl RecordSource,
            path: &Path,
            today: impl Into<ReferenceDate>,
            settings: BoardSettings,
        ) -> Board {
            match source.load(path) {
                Ok(table) => {
                    debug!(path = %path.display(), rows = table.records.len(), "records loaded");
                    project_table(&table, today, settings)
                }
                Err(err) => {
                    let failure = err.failure();
                    error!(kind = ?failure.kind, "{}", failure.message);
                    Board::failed(failure, settings)
                }
            }
        }

    }
}


pub use calendar::ReferenceDate;
pub use parser::{CsvFileSource, parse_csv_from_str};
pub use projectors::board::{Board, BoardView, project_records, project_source, project_table};
