//! Parser for the numbered rule listing produced by
//! `iptables -t <table> -L -n -v --line-numbers`.
//!
//! The grammar is line-oriented: `Chain <name> ...` headers open a chain,
//! lines starting with a digit are rules, everything else (column headers,
//! blanks) is ignored. Malformed input degrades to a partial or empty result;
//! this parser never fails.

use serde::{Deserialize, Serialize};

/// One chain from the listing output, rules in encounter order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedChain {
    pub name: String,
    pub rules: Vec<ListedRule>,
}

/// One numbered rule line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedRule {
    /// 1-based position within the chain; the index used for deletion.
    pub line_number: u32,
    pub target: String,
    pub protocol: String,
    pub options: String,
    pub source: String,
    pub destination: String,
    /// Free-form trailing columns, rejoined with single spaces.
    pub extra: String,
    pub extra_fields: ExtraFields,
}

/// Port/NAT sub-fields scanned out of the extra column. Absent patterns leave
/// the field unset; that is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFields {
    pub source_port: Option<String>,
    pub dest_port: Option<String>,
    pub nat_ip: Option<String>,
    pub nat_port: Option<String>,
    pub nat_destination: Option<String>,
}

/// Scanner state: either collecting rules into a chain, or skipping rule
/// lines because no well-formed chain header is open.
enum State {
    Skipping,
    Collecting(ListedChain),
}

/// Parse one table's listing output into ordered chains.
pub fn parse_listing(output: &str) -> Vec<ListedChain> {
    let mut chains = Vec::new();
    let mut state = State::Skipping;

    for line in output.lines() {
        let trimmed = line.trim();

        let mut parts = trimmed.split_whitespace();
        if parts.next() == Some("Chain") {
            if let State::Collecting(chain) = std::mem::replace(&mut state, State::Skipping) {
                chains.push(chain);
            }
            // A header with no name token leaves the scanner skipping: rule
            // lines are dropped until the next well-formed header.
            state = match parts.next() {
                Some(name) => State::Collecting(ListedChain {
                    name: name.to_string(),
                    rules: Vec::new(),
                }),
                None => State::Skipping,
            };
            continue;
        }

        if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            if let State::Collecting(ref mut chain) = state {
                if let Some(rule) = parse_rule_line(trimmed) {
                    chain.rules.push(rule);
                }
            }
        }
        // column headers, blanks, anything else: ignored
    }

    if let State::Collecting(chain) = state {
        chains.push(chain);
    }

    chains
}

/// Fixed columns: number, packets, bytes, target, protocol, options, source,
/// destination; everything after is the free-form extra text. Lines with
/// fewer than 8 columns are discarded.
fn parse_rule_line(line: &str) -> Option<ListedRule> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 8 {
        return None;
    }

    let line_number = leading_number(tokens[0])?;
    let extra = tokens[8..].join(" ");

    Some(ListedRule {
        line_number,
        target: tokens[3].to_string(),
        protocol: tokens[4].to_string(),
        options: tokens[5].to_string(),
        source: tokens[6].to_string(),
        destination: tokens[7].to_string(),
        extra_fields: extract_extra_fields(&extra),
        extra,
    })
}

fn leading_number(token: &str) -> Option<u32> {
    let digits: &str = token
        .split_once(|c: char| !c.is_ascii_digit())
        .map_or(token, |(head, _)| head);
    digits.parse().ok()
}

/// Scan the extra column for `spt:`, `dpt:`/`dpts:`, and `to:` sub-fields.
/// Each pattern is optional and independent of the others.
pub fn extract_extra_fields(extra: &str) -> ExtraFields {
    let mut fields = ExtraFields::default();

    for token in extra.split_whitespace() {
        if let Some(value) = token.strip_prefix("spt:") {
            if is_digits(value) {
                fields.source_port = Some(value.to_string());
            }
        } else if let Some(value) = token.strip_prefix("dpts:") {
            // Range form, kept verbatim
            if let Some((low, high)) = value.split_once(':') {
                if is_digits(low) && is_digits(high) {
                    fields.dest_port = Some(value.to_string());
                }
            }
        } else if let Some(value) = token.strip_prefix("dpt:") {
            if is_digits(value) {
                fields.dest_port = Some(value.to_string());
            }
        } else if let Some(value) = token.strip_prefix("to:") {
            if let Some((ip, port)) = parse_nat_destination(value) {
                fields.nat_destination = Some(match port {
                    Some(ref p) => format!("{}:{}", ip, p),
                    None => ip.clone(),
                });
                fields.nat_ip = Some(ip);
                fields.nat_port = port;
            }
        }
    }

    fields
}

/// `<ipv4>[:<digits>]`
fn parse_nat_destination(value: &str) -> Option<(String, Option<String>)> {
    let (ip, port) = match value.split_once(':') {
        Some((ip, port)) => (ip, Some(port)),
        None => (value, None),
    };

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 || !octets.iter().all(|octet| is_digits(octet)) {
        return None;
    }

    match port {
        Some(port) if !is_digits(port) => None,
        Some(port) => Some((ip.to_string(), Some(port.to_string()))),
        None => Some((ip.to_string(), None)),
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
