//! Orchestration of remote iptables operations: assembles the literal
//! commands, routes them through a session's connection, and parses the
//! output. The wire format of each command matters; remote hosts are
//! configured with sudo policies matching these exact strings.

use crate::error::{Error, Result};
use crate::rules::dump::{parse_dump, SavedChain};
use crate::rules::listing::{parse_listing, ListedChain};
use crate::rules::Table;
use crate::ssh::exec::{run_command, CommandResult};
use crate::ssh::{ConnectionInfo, ConnectionRegistry, Credentials};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Where configuration snapshots live on the remote host
const RULES_FILE: &str = "/etc/iptables/rules.v4";

const DUMP_COMMAND: &str = "sudo iptables-save";

/// Deadlines threaded through every network-facing call
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            command: Duration::from_secs(60),
        }
    }
}

/// Runs one opaque command on behalf of a session.
///
/// The seam between orchestration and the SSH transport; orchestration tests
/// run against a scripted implementation instead of a network.
pub trait CommandRunner: Send + Sync {
    fn run(&self, session: &str, command: &str) -> Result<CommandResult>;
}

/// Production runner: resolves the session in the registry and executes the
/// command over its connection.
pub struct SshCommandRunner {
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
}

impl SshCommandRunner {
    pub fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

impl CommandRunner for SshCommandRunner {
    fn run(&self, session: &str, command: &str) -> Result<CommandResult> {
        let connection = self.registry.get(session)?;
        run_command(&connection, command, self.timeout)
    }
}

/// Per-table result of `list_all_rules`.
///
/// Empty `chains` alongside a populated `error` means the fetch failed for
/// this table; empty `chains` alone means the table really is empty.
#[derive(Debug, Clone, Serialize)]
pub struct TableListing {
    pub chains: Vec<ListedChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Facade the routing layer talks to: connection lifecycle plus the rule
/// operations, composed over the registry, executor, and parsers.
pub struct RuleService {
    registry: Arc<ConnectionRegistry>,
    runner: Arc<dyn CommandRunner>,
    timeouts: Timeouts,
}

impl RuleService {
    pub fn new(timeouts: Timeouts) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let runner = Arc::new(SshCommandRunner::new(Arc::clone(&registry), timeouts.command));
        Self {
            registry,
            runner,
            timeouts,
        }
    }

    /// Build a service over a custom runner. The registry still backs the
    /// connection-lifecycle calls; rule operations go through `runner`.
    pub fn with_runner(runner: Arc<dyn CommandRunner>, timeouts: Timeouts) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            runner,
            timeouts,
        }
    }

    pub fn open(&self, session: &str, credentials: &Credentials) -> Result<()> {
        self.registry.open(session, credentials, self.timeouts.connect)
    }

    pub fn close(&self, session: &str) {
        self.registry.close(session);
    }

    pub fn is_open(&self, session: &str) -> bool {
        self.registry.is_open(session)
    }

    pub fn sessions(&self) -> Vec<ConnectionInfo> {
        self.registry.sessions()
    }

    /// Run an opaque command for `session`, returning stdout. Any non-zero
    /// exit status is an error carrying the remote stderr.
    pub fn run(&self, session: &str, command: &str) -> Result<String> {
        let result = self.runner.run(session, command)?;
        if result.success() {
            Ok(result.stdout)
        } else {
            Err(Error::CommandFailed {
                exit_code: result.exit_status,
                stderr: result.stderr,
            })
        }
    }

    /// Fetch and parse all four tables, strictly in order.
    ///
    /// A failing table degrades to an empty listing with the failure message
    /// recorded; the remaining tables still populate. Partial failure never
    /// aborts the whole call.
    pub fn list_all_rules(&self, session: &str) -> BTreeMap<Table, TableListing> {
        let mut tables = BTreeMap::new();

        for table in Table::ALL {
            let listing = match self.list_rules(session, table) {
                Ok(chains) => TableListing {
                    chains,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(
                        "Failed to list {} table (session {}): {}",
                        table,
                        session,
                        e
                    );
                    TableListing {
                        chains: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            tables.insert(table, listing);
        }

        tables
    }

    /// Fetch and parse one table's listing. Failures propagate.
    pub fn list_rules(&self, session: &str, table: Table) -> Result<Vec<ListedChain>> {
        let stdout = self.run(session, &listing_command(table))?;
        Ok(parse_listing(&stdout))
    }

    /// Fetch and parse the full configuration dump. Failures propagate.
    pub fn get_dump(&self, session: &str) -> Result<BTreeMap<String, Vec<SavedChain>>> {
        let stdout = self.run(session, DUMP_COMMAND)?;
        Ok(parse_dump(&stdout))
    }

    /// Apply one rule, given verbatim to iptables (no escaping, no syntax
    /// validation).
    pub fn add_rule(&self, session: &str, rule_text: &str, table: Table) -> Result<()> {
        let command = format!("sudo iptables {}{}", table_qualifier(table), rule_text);
        self.run(session, &command).map(drop)
    }

    /// Delete a rule by chain and 1-based line number.
    pub fn delete_rule(
        &self,
        session: &str,
        chain: &str,
        rule_number: u32,
        table: Table,
    ) -> Result<()> {
        let command = format!(
            "sudo iptables {}-D {} {}",
            table_qualifier(table),
            chain,
            rule_number
        );
        self.run(session, &command).map(drop)
    }

    /// Snapshot the running configuration to the rules file on the remote host.
    pub fn save_configuration(&self, session: &str) -> Result<()> {
        let command = format!("{} > {}", DUMP_COMMAND, RULES_FILE);
        self.run(session, &command).map(drop)
    }

    /// Restore the running configuration from the rules file on the remote host.
    pub fn restore_configuration(&self, session: &str) -> Result<()> {
        let command = format!("sudo iptables-restore < {}", RULES_FILE);
        self.run(session, &command).map(drop)
    }
}

impl Default for RuleService {
    fn default() -> Self {
        Self::new(Timeouts::default())
    }
}

fn listing_command(table: Table) -> String {
    format!("sudo iptables -t {} -L -n -v --line-numbers", table)
}

/// `-t <table> ` qualifier, omitted entirely for the default table.
fn table_qualifier(table: Table) -> String {
    if table == Table::Filter {
        String::new()
    } else {
        format!("-t {} ", table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const SESSION: &str = "sess-1";

    /// Scripted runner: canned stdout per exact command string, optional
    /// scripted failures, and a log of everything executed.
    #[derive(Default)]
    struct ScriptedRunner {
        outputs: HashMap<String, String>,
        failures: HashMap<String, (i32, String)>,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn with_output(mut self, command: &str, stdout: &str) -> Self {
            self.outputs.insert(command.to_string(), stdout.to_string());
            self
        }

        fn with_failure(mut self, command: &str, exit_code: i32, stderr: &str) -> Self {
            self.failures
                .insert(command.to_string(), (exit_code, stderr.to_string()));
            self
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, session: &str, command: &str) -> Result<CommandResult> {
            if session != SESSION {
                return Err(Error::NoActiveConnection(session.to_string()));
            }
            self.executed.lock().push(command.to_string());

            if let Some((exit_code, stderr)) = self.failures.get(command) {
                return Ok(CommandResult {
                    stdout: String::new(),
                    stderr: stderr.clone(),
                    exit_status: *exit_code,
                });
            }
            match self.outputs.get(command) {
                Some(stdout) => Ok(CommandResult {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_status: 0,
                }),
                // Unknown command: fail loudly so template drift breaks tests.
                None => Ok(CommandResult {
                    stdout: String::new(),
                    stderr: format!("unexpected command: {}", command),
                    exit_status: 127,
                }),
            }
        }
    }

    fn service(runner: ScriptedRunner) -> (RuleService, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let service = RuleService::with_runner(
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Timeouts::default(),
        );
        (service, runner)
    }

    const FILTER_LISTING: &str = "\
Chain INPUT (policy ACCEPT 10 packets, 840 bytes)
num   pkts bytes target     prot opt source               destination
1       42  2520 ACCEPT     tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:22
";

    const EMPTY_LISTING: &str = "\
Chain PREROUTING (policy ACCEPT 0 packets, 0 bytes)
num   pkts bytes target     prot opt source               destination
";

    #[test]
    fn test_list_rules_runs_exact_listing_command() {
        let (service, runner) = service(
            ScriptedRunner::default()
                .with_output("sudo iptables -t filter -L -n -v --line-numbers", FILTER_LISTING),
        );

        let chains = service.list_rules(SESSION, Table::Filter).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].name, "INPUT");
        assert_eq!(
            runner.executed(),
            vec!["sudo iptables -t filter -L -n -v --line-numbers"]
        );
    }

    #[test]
    fn test_list_rules_failure_propagates() {
        let (service, _) = service(ScriptedRunner::default().with_failure(
            "sudo iptables -t nat -L -n -v --line-numbers",
            4,
            "iptables: Permission denied.",
        ));

        let err = service.list_rules(SESSION, Table::Nat).unwrap_err();
        assert!(
            matches!(err, Error::CommandFailed { exit_code: 4, ref stderr } if stderr.contains("Permission denied"))
        );
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rampart=debug".into()),
            )
            .try_init();
    }

    #[test]
    fn test_list_all_rules_degrades_failed_table_only() {
        init_tracing();
        let (service, runner) = service(
            ScriptedRunner::default()
                .with_output("sudo iptables -t filter -L -n -v --line-numbers", FILTER_LISTING)
                .with_failure(
                    "sudo iptables -t nat -L -n -v --line-numbers",
                    1,
                    "iptables: Resource temporarily unavailable.",
                )
                .with_output("sudo iptables -t raw -L -n -v --line-numbers", EMPTY_LISTING)
                .with_output("sudo iptables -t mangle -L -n -v --line-numbers", EMPTY_LISTING),
        );

        let tables = service.list_all_rules(SESSION);
        assert_eq!(tables.len(), 4);

        assert_eq!(tables[&Table::Filter].chains.len(), 1);
        assert!(tables[&Table::Filter].error.is_none());

        let nat = &tables[&Table::Nat];
        assert!(nat.chains.is_empty());
        assert!(nat.error.as_deref().unwrap().contains("status 1"));

        // An empty table is distinguishable from a failed one.
        assert_eq!(tables[&Table::Raw].chains.len(), 1);
        assert!(tables[&Table::Raw].error.is_none());
        assert!(tables[&Table::Mangle].error.is_none());

        // All four fetched, strictly in table order, nat failure nonfatal.
        assert_eq!(
            runner.executed(),
            vec![
                "sudo iptables -t filter -L -n -v --line-numbers",
                "sudo iptables -t nat -L -n -v --line-numbers",
                "sudo iptables -t raw -L -n -v --line-numbers",
                "sudo iptables -t mangle -L -n -v --line-numbers",
            ]
        );
    }

    #[test]
    fn test_get_dump_parses_tables() {
        let (service, runner) = service(ScriptedRunner::default().with_output(
            "sudo iptables-save",
            "*filter\n:INPUT ACCEPT [0:0]\n-A INPUT -p tcp --dport 22 -j ACCEPT\nCOMMIT\n",
        ));

        let tables = service.get_dump(SESSION).unwrap();
        assert_eq!(tables["filter"][0].name, "INPUT");
        assert_eq!(tables["filter"][0].rules.len(), 1);
        assert_eq!(runner.executed(), vec!["sudo iptables-save"]);
    }

    #[test]
    fn test_add_rule_omits_table_qualifier_for_filter() {
        let (service, runner) = service(
            ScriptedRunner::default()
                .with_output("sudo iptables -A INPUT -p tcp --dport 443 -j ACCEPT", ""),
        );

        service
            .add_rule(SESSION, "-A INPUT -p tcp --dport 443 -j ACCEPT", Table::Filter)
            .unwrap();
        assert_eq!(
            runner.executed(),
            vec!["sudo iptables -A INPUT -p tcp --dport 443 -j ACCEPT"]
        );
    }

    #[test]
    fn test_add_rule_includes_table_qualifier_for_nat() {
        let (service, runner) = service(ScriptedRunner::default().with_output(
            "sudo iptables -t nat -A PREROUTING -p tcp --dport 80 -j DNAT --to-destination 10.0.0.2:8080",
            "",
        ));

        service
            .add_rule(
                SESSION,
                "-A PREROUTING -p tcp --dport 80 -j DNAT --to-destination 10.0.0.2:8080",
                Table::Nat,
            )
            .unwrap();
        assert_eq!(runner.executed().len(), 1);
    }

    #[test]
    fn test_add_rule_nonzero_exit_is_hard_failure() {
        let (service, _) = service(ScriptedRunner::default().with_failure(
            "sudo iptables -A INPUT -j BOGUS",
            2,
            "iptables: No chain/target/match by that name.",
        ));

        let err = service.add_rule(SESSION, "-A INPUT -j BOGUS", Table::Filter).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 2, .. }));
    }

    #[test]
    fn test_delete_rule_command_templates() {
        let (service, runner) = service(
            ScriptedRunner::default()
                .with_output("sudo iptables -D INPUT 3", "")
                .with_output("sudo iptables -t mangle -D PREROUTING 1", ""),
        );

        service.delete_rule(SESSION, "INPUT", 3, Table::Filter).unwrap();
        service
            .delete_rule(SESSION, "PREROUTING", 1, Table::Mangle)
            .unwrap();
        assert_eq!(
            runner.executed(),
            vec![
                "sudo iptables -D INPUT 3",
                "sudo iptables -t mangle -D PREROUTING 1",
            ]
        );
    }

    #[test]
    fn test_save_and_restore_command_templates() {
        let (service, runner) = service(
            ScriptedRunner::default()
                .with_output("sudo iptables-save > /etc/iptables/rules.v4", "")
                .with_output("sudo iptables-restore < /etc/iptables/rules.v4", ""),
        );

        service.save_configuration(SESSION).unwrap();
        service.restore_configuration(SESSION).unwrap();
        assert_eq!(
            runner.executed(),
            vec![
                "sudo iptables-save > /etc/iptables/rules.v4",
                "sudo iptables-restore < /etc/iptables/rules.v4",
            ]
        );
    }

    #[test]
    fn test_run_on_unknown_session_fails() {
        let (service, _) = service(ScriptedRunner::default());
        let err = service.run("never-opened", "sudo iptables-save").unwrap_err();
        assert!(matches!(err, Error::NoActiveConnection(s) if s == "never-opened"));
    }

    #[test]
    fn test_run_returns_stdout_on_success() {
        let (service, _) =
            service(ScriptedRunner::default().with_output("sudo iptables-save", "*filter\n"));
        let stdout = service.run(SESSION, "sudo iptables-save").unwrap();
        assert_eq!(stdout, "*filter\n");
    }
}
