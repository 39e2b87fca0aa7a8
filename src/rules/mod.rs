pub mod dump;
pub mod listing;

pub use dump::{RuleBreakdown, SavedChain, SavedRule};
pub use listing::{ExtraFields, ListedChain, ListedRule};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four iptables tables.
///
/// Ordering follows the listing order used when aggregating all tables, so
/// ordered maps keyed by `Table` iterate filter, nat, raw, mangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Filter,
    Nat,
    Raw,
    Mangle,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Filter, Table::Nat, Table::Raw, Table::Mangle];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Raw => "raw",
            Table::Mangle => "mangle",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        match name {
            "filter" => Some(Table::Filter),
            "nat" => Some(Table::Nat),
            "raw" => Some(Table::Raw),
            "mangle" => Some(Table::Mangle),
            _ => None,
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::Filter
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
