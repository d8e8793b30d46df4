/// Display surface seam and table layout
///
/// Rows reach the screen as fixed-width text cells. The same cell text is
/// what the view projection matches filters and searches against, so a
/// filter on the `function` column compares exactly what the user sees.

use std::fmt;

use chrono::{DateTime, Local};

use crate::connection::LinkState;
use crate::error::MonitorResult;
use crate::projection::{FilterSpec, SearchSpec};
use crate::protocol::RowResult;
use crate::utils::format::progress_bar;

/// Number of table columns
pub const COLUMN_COUNT: usize = 8;

/// Column widths in characters
pub const COLUMN_WIDTHS: [usize; COLUMN_COUNT] = [4, 8, 15, 12, 15, 10, 30, 15];

/// Table header cells
pub const TABLE_HEADER: [&str; COLUMN_COUNT] = [
    "SID",
    "Register",
    "function",
    "type",
    "value",
    "arch",
    "description",
    "status",
];

/// One formatted table row
pub type Row = [String; COLUMN_COUNT];

/// Format a row result into its display cells
///
/// Slave id and address are right-aligned, the status cell is left as is,
/// everything else is padded on the right. Descriptions are cut to one less
/// than their column width.
pub fn format_row(row: &RowResult) -> Row {
    let description: String = row.description.chars().take(COLUMN_WIDTHS[6] - 1).collect();
    [
        format!("{:>w$}", row.slave_id, w = COLUMN_WIDTHS[0]),
        format!("{:>w$}", row.address, w = COLUMN_WIDTHS[1]),
        format!("{:<w$}", row.kind.as_str(), w = COLUMN_WIDTHS[2]),
        format!("{:<w$}", row.format.name(), w = COLUMN_WIDTHS[3]),
        format!("{:<w$}", row.formatted_value, w = COLUMN_WIDTHS[4]),
        format!("{:<w$}", row.architecture_label, w = COLUMN_WIDTHS[5]),
        format!("{:<w$}", description, w = COLUMN_WIDTHS[6]),
        row.status.to_string(),
    ]
}

/// Where the session writes its table and status line
pub trait DisplaySurface {
    /// Replace the table contents
    ///
    /// On error the surface must keep showing the previous table.
    fn update_table(&mut self, header: &[&str], rows: &[Row]) -> MonitorResult<()>;

    /// Replace the status line
    fn update_status(&mut self, line: &str);
}

/// Parts of the status line
#[derive(Debug, Clone)]
pub struct StatusLine<'a> {
    /// Shown only when set
    pub progress: Option<u8>,
    pub link: LinkState,
    pub target: &'a str,
    pub action: &'a str,
    pub last_update: Option<DateTime<Local>>,
    pub filter: &'a FilterSpec,
    pub search: &'a SearchSpec,
}

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(" ")?;
        if let Some(percent) = self.progress {
            write!(f, "{} | ", progress_bar(percent))?;
        }

        match self.link {
            LinkState::Connected => write!(f, "Modbus: ONLINE ({})", self.target)?,
            LinkState::Connecting => f.write_str("Modbus: Connecting...")?,
            LinkState::Disconnected => f.write_str("Modbus: Disconnected")?,
        }

        write!(f, " | Status: {} | Last Read: ", self.action)?;
        match self.last_update {
            Some(time) => write!(f, "{}", time.format("%H:%M:%S"))?,
            None => f.write_str("N/A")?,
        }

        if let Some(column) = self.filter.active_column() {
            if let Some(name) = TABLE_HEADER.get(column) {
                write!(f, " Filter: {}={}", name, self.filter.value)?;
            }
        }
        if self.search.is_active() {
            write!(f, " Search: {}", self.search.pattern)?;
        }
        Ok(())
    }
}
