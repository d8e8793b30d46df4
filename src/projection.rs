//! View projection: column filter and free-text search
//!
//! Both match against the display text of a row, case-insensitively and
//! literally. Regex metacharacters typed by the user are escaped, so `1.0`
//! only matches a literal `1.0`.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::display::format_row;
use crate::protocol::RowResult;

/// Column filter; inactive unless a column is set and the value is non-empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub column: Option<usize>,
    pub value: String,
}

impl FilterSpec {
    pub fn new<S: Into<String>>(column: usize, value: S) -> Self {
        Self {
            column: Some(column),
            value: value.into(),
        }
    }

    /// Column to filter on, when the filter is active
    pub fn active_column(&self) -> Option<usize> {
        self.column.filter(|_| !self.value.is_empty())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Free-text search over all columns; inactive when empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSpec {
    pub pattern: String,
}

impl SearchSpec {
    pub fn new<S: Into<String>>(pattern: S) -> Self {
        Self { pattern: pattern.into() }
    }

    pub fn is_active(&self) -> bool {
        !self.pattern.is_empty()
    }

    pub fn clear(&mut self) {
        self.pattern.clear();
    }
}

fn markup() -> Option<&'static Regex> {
    static MARKUP: OnceLock<Option<Regex>> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"\{[^}]*\}").ok()).as_ref()
}

/// Remove `{...}` style markup from cell text
pub fn strip_markup(text: &str) -> String {
    match markup() {
        Some(markup) => markup.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Case-insensitive literal matcher for `pattern`
///
/// `None` when the escaped pattern exceeds the regex size limit; such a
/// pattern matches no row.
fn literal(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(pattern))
        .case_insensitive(true)
        .build()
        .map_err(|e| log::warn!("Pattern {:?} matches nothing: {}", pattern, e))
        .ok()
}

fn matches(matcher: &Option<Regex>, cell: &str) -> bool {
    matcher.as_ref().map_or(false, |regex| regex.is_match(cell))
}

/// Apply `filter` and `search` to a cycle's rows
///
/// Both must pass for a row to be kept. Order is preserved. A filter column
/// outside the table matches no row.
///
/// ```rust
/// use modbus_monitor::projection::{project, FilterSpec, SearchSpec};
///
/// let rows = Vec::new();
/// assert!(project(rows, &FilterSpec::default(), &SearchSpec::default()).is_empty());
/// ```
pub fn project(rows: Vec<RowResult>, filter: &FilterSpec, search: &SearchSpec) -> Vec<RowResult> {
    let filter = filter
        .active_column()
        .map(|column| (column, literal(&filter.value)));
    let search = if search.is_active() {
        Some(literal(&search.pattern))
    } else {
        None
    };

    if filter.is_none() && search.is_none() {
        return rows;
    }

    rows.into_iter()
        .filter(|row| {
            let cells: Vec<String> = format_row(row).iter().map(|cell| strip_markup(cell)).collect();

            let passes_filter = match &filter {
                Some((column, matcher)) => cells.get(*column).map_or(false, |cell| matches(matcher, cell)),
                None => true,
            };
            let passes_search = match &search {
                Some(matcher) => cells.iter().any(|cell| matches(matcher, cell)),
                None => true,
            };
            passes_filter && passes_search
        })
        .collect()
}
