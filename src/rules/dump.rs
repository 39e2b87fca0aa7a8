//! Parser for the machine dump/restore format emitted by `iptables-save`.
//!
//! Three line prefixes matter: `*table` opens a table section, `:chain`
//! declares a chain with its policy, `-A chain ...` appends a rule to an
//! already-declared chain. Comments, counters, `COMMIT`, and blank lines are
//! ignored. Rule lines naming a chain never declared in the current table are
//! silently dropped. This parser never fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One chain from the dump, rules in encounter order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedChain {
    pub name: String,
    /// Default policy from the `:` line, verbatim (`-` for user chains).
    pub policy: String,
    pub rules: Vec<SavedRule>,
}

/// One `-A` rule line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRule {
    /// The verbatim line, restorable as-is.
    pub raw: String,
    /// Everything after `-A <chain> `.
    pub content: String,
    pub parsed: RuleBreakdown,
}

/// Canonical fields tokenized out of a rule's option string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBreakdown {
    pub protocol: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub source_port: Option<String>,
    pub dest_port: Option<String>,
    pub target: Option<String>,
    pub nat_destination: Option<String>,
    /// Unrecognized option tokens, in encounter order.
    pub other: Vec<String>,
}

/// Parse a full configuration dump into a per-table map of chains.
pub fn parse_dump(output: &str) -> BTreeMap<String, Vec<SavedChain>> {
    let mut tables = BTreeMap::new();
    let mut current: Option<(String, Vec<SavedChain>)> = None;

    for line in output.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix('*') {
            if let Some((table, chains)) = current.take() {
                tables.insert(table, chains);
            }
            let name = rest.split_whitespace().next().unwrap_or_default();
            current = Some((name.to_string(), Vec::new()));
        } else if let Some(rest) = trimmed.strip_prefix(':') {
            // Chain declaration outside a table section has nowhere to go.
            let Some((_, chains)) = current.as_mut() else {
                continue;
            };
            let mut parts = rest.split_whitespace();
            let (Some(name), Some(policy)) = (parts.next(), parts.next()) else {
                continue;
            };
            chains.push(SavedChain {
                name: name.to_string(),
                policy: policy.to_string(),
                rules: Vec::new(),
            });
        } else if let Some(rest) = trimmed.strip_prefix("-A ") {
            let Some((_, chains)) = current.as_mut() else {
                continue;
            };
            let Some((chain_name, content)) = rest.split_once(char::is_whitespace) else {
                continue;
            };
            let content = content.trim();
            match chains.iter_mut().find(|chain| chain.name == chain_name) {
                Some(chain) => chain.rules.push(SavedRule {
                    raw: trimmed.to_string(),
                    content: content.to_string(),
                    parsed: tokenize_rule_content(content),
                }),
                None => {
                    tracing::debug!("Dropping rule for undeclared chain {}", chain_name);
                }
            }
        }
        // comments, COMMIT, counters, blank lines
    }

    if let Some((table, chains)) = current.take() {
        tables.insert(table, chains);
    }

    tables
}

/// Recognized single-value flags; each consumes exactly the next token.
const KNOWN_FLAGS: [&str; 7] = ["-p", "-s", "-d", "--sport", "--dport", "-j", "--to-destination"];

/// Tokenize the option string of one rule (everything after `-A <chain>`).
///
/// Single left-to-right pass with one-token lookahead: recognized flags take
/// the following token as their value (last occurrence wins), any other
/// `-`-prefixed token lands in `other`, paired with the following token when
/// that token is not itself a flag. Multi-argument extensions therefore
/// degrade into several `other` entries rather than one coherent option.
pub fn tokenize_rule_content(content: &str) -> RuleBreakdown {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut parsed = RuleBreakdown::default();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let lookahead = tokens.get(i + 1).copied();

        if KNOWN_FLAGS.contains(&token) {
            let Some(value) = lookahead else {
                // Flag at end of line: no value to consume.
                i += 1;
                continue;
            };
            let value = Some(value.to_string());
            match token {
                "-p" => parsed.protocol = value,
                "-s" => parsed.source = value,
                "-d" => parsed.destination = value,
                "--sport" => parsed.source_port = value,
                "--dport" => parsed.dest_port = value,
                "-j" => parsed.target = value,
                _ => parsed.nat_destination = value,
            }
            i += 2;
        } else if token.starts_with('-') {
            match lookahead {
                Some(value) if !value.starts_with('-') => {
                    parsed.other.push(format!("{} {}", token, value));
                    i += 2;
                }
                _ => {
                    parsed.other.push(token.to_string());
                    i += 1;
                }
            }
        } else {
            // Stray value token; nothing claims it.
            i += 1;
        }
    }

    parsed
}
