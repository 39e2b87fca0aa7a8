//! Core for inspecting and mutating iptables rules on remote hosts over SSH.
//!
//! The routing layer above this crate supplies an opaque session key and
//! credentials; this crate owns the per-session connections, runs the
//! iptables commands, and parses their two textual output formats into
//! structured chain/rule data.

pub mod error;
pub mod rules;
pub mod service;
pub mod ssh;

pub use error::{Error, Result};
pub use rules::{
    ExtraFields, ListedChain, ListedRule, RuleBreakdown, SavedChain, SavedRule, Table,
};
pub use service::{CommandRunner, RuleService, SshCommandRunner, TableListing, Timeouts};
pub use ssh::{CommandResult, Connection, ConnectionInfo, ConnectionRegistry, Credentials};
