// src/models/filter.rs
//! Server list filters.
//!
//! A filter expression travels as a flat list of key/value pairs in prefix
//! notation. Boolean operators (`and`, `or`, `nand`, `nor`) carry as their
//! value the number of pairs in the whole subtree that follows them, not the
//! number of immediate children:
//!
//! ```text
//! map == cp_dustbowl || (tags has payload && !(tags has payloadrace))
//!
//! "or", "4"
//! "map", "cp_dustbowl"
//! "and", "2"
//! "gametagsand", "payload"
//! "gametagsnor", "payloadrace"
//! ```
//!
//! Unary NOT is `nand` or `nor` with a single operand. The top-level list is
//! an implicit conjunction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use crate::error::DirectoryError;
use crate::models::server::ServerRecord;
use crate::utils::parse_ip_or_socket;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// `IP` or `IP:port` as accepted by the `addr` and `gameaddr` filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrPattern {
    pub ip: Ipv4Addr,
    pub port: Option<u16>,
}

impl AddrPattern {
    pub fn matches(&self, addr: SocketAddrV4) -> bool {
        *addr.ip() == self.ip && self.port.map_or(true, |port| port == addr.port())
    }
}

impl fmt::Display for AddrPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.ip, port),
            None => write!(f, "{}", self.ip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Map(String),
    /// Comma-delimited lists, kept as given.
    GameDataAnd(String),
    GameDataOr(String),
    GameDataNor(String),
    GameTagsAnd(String),
    GameTagsNor(String),
    Addr(AddrPattern),
    GameAddr(AddrPattern),
    Dedicated,
    Secure,
    NotFull,
    HasPlayers,
    NoPlayers,
    Linux,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nand(Vec<Filter>),
    Nor(Vec<Filter>),
}

impl Filter {
    pub fn token(&self) -> &'static str {
        match self {
            Filter::Map(_) => "map",
            Filter::GameDataAnd(_) => "gamedataand",
            Filter::GameDataOr(_) => "gamedataor",
            Filter::GameDataNor(_) => "gamedatanor",
            Filter::GameTagsAnd(_) => "gametagsand",
            Filter::GameTagsNor(_) => "gametagsnor",
            Filter::Addr(_) => "addr",
            Filter::GameAddr(_) => "gameaddr",
            Filter::Dedicated => "dedicated",
            Filter::Secure => "secure",
            Filter::NotFull => "notfull",
            Filter::HasPlayers => "hasplayers",
            Filter::NoPlayers => "noplayers",
            Filter::Linux => "linux",
            Filter::And(_) => "and",
            Filter::Or(_) => "or",
            Filter::Nand(_) => "nand",
            Filter::Nor(_) => "nor",
        }
    }

    fn children(&self) -> Option<&[Filter]> {
        match self {
            Filter::And(c) | Filter::Or(c) | Filter::Nand(c) | Filter::Nor(c) => Some(c),
            _ => None,
        }
    }

    /// Pairs this expression occupies when encoded, itself included.
    pub fn pair_count(&self) -> usize {
        1 + self.descendant_count()
    }

    fn descendant_count(&self) -> usize {
        self.children()
            .map(|children| children.iter().map(Filter::pair_count).sum())
            .unwrap_or(0)
    }

    pub fn matches(&self, server: &ServerRecord) -> bool {
        match self {
            Filter::Map(map) => server.map.eq_ignore_ascii_case(map),
            Filter::GameDataAnd(list) => list_items(list).all(|want| contains(server.game_data_items(), want)),
            Filter::GameDataOr(list) => list_items(list).any(|want| contains(server.game_data_items(), want)),
            Filter::GameDataNor(list) => !list_items(list).any(|want| contains(server.game_data_items(), want)),
            Filter::GameTagsAnd(list) => list_items(list).all(|want| contains(server.tags(), want)),
            Filter::GameTagsNor(list) => !list_items(list).any(|want| contains(server.tags(), want)),
            Filter::Addr(pattern) | Filter::GameAddr(pattern) => pattern.matches(server.addr()),
            Filter::Dedicated => server.dedicated,
            Filter::Secure => server.secure,
            Filter::NotFull => server.players < server.max_players,
            Filter::HasPlayers => server.players > 0,
            Filter::NoPlayers => server.players == 0,
            Filter::Linux => server.linux,
            Filter::And(children) => children.iter().all(|f| f.matches(server)),
            Filter::Or(children) => children.iter().any(|f| f.matches(server)),
            Filter::Nand(children) => !children.iter().all(|f| f.matches(server)),
            Filter::Nor(children) => !children.iter().any(|f| f.matches(server)),
        }
    }

    fn encode_into(&self, out: &mut Vec<KeyValuePair>) {
        let value = match self {
            Filter::Map(v)
            | Filter::GameDataAnd(v)
            | Filter::GameDataOr(v)
            | Filter::GameDataNor(v)
            | Filter::GameTagsAnd(v)
            | Filter::GameTagsNor(v) => v.clone(),
            Filter::Addr(pattern) | Filter::GameAddr(pattern) => pattern.to_string(),
            Filter::And(_) | Filter::Or(_) | Filter::Nand(_) | Filter::Nor(_) => {
                self.descendant_count().to_string()
            }
            _ => String::new(),
        };
        out.push(KeyValuePair::new(self.token(), value));
        if let Some(children) = self.children() {
            for child in children {
                child.encode_into(out);
            }
        }
    }
}

fn list_items(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn contains<'a>(mut haystack: impl Iterator<Item = &'a str>, needle: &str) -> bool {
    haystack.any(|item| item.eq_ignore_ascii_case(needle))
}

/// True when the server passes every top-level filter.
pub fn matches_all(filters: &[Filter], server: &ServerRecord) -> bool {
    filters.iter().all(|f| f.matches(server))
}

pub fn encode(filters: &[Filter]) -> Vec<KeyValuePair> {
    let mut out = Vec::with_capacity(filters.iter().map(Filter::pair_count).sum());
    for filter in filters {
        filter.encode_into(&mut out);
    }
    out
}

/// Rebuilds the filter trees from their flat encoding in one left-to-right
/// pass. Any arity that does not line up with the input is rejected.
pub fn decode(pairs: &[KeyValuePair]) -> Result<Vec<Filter>, DirectoryError> {
    let mut decoder = Decoder { pairs, pos: 0 };
    let mut filters = Vec::new();
    while decoder.pos < pairs.len() {
        filters.push(decoder.expr(pairs.len(), 0)?);
    }
    Ok(filters)
}

struct Decoder<'a> {
    pairs: &'a [KeyValuePair],
    pos: usize,
}

fn malformed(reason: String) -> DirectoryError {
    DirectoryError::MalformedFilter(reason)
}

impl<'a> Decoder<'a> {
    fn expr(&mut self, limit: usize, depth: usize) -> Result<Filter, DirectoryError> {
        let at = self.pos;
        let pair = &self.pairs[at];
        self.pos += 1;

        let key = pair.key.trim().to_ascii_lowercase();
        let value = pair.value.trim();
        let filter = match key.as_str() {
            "and" | "or" | "nand" | "nor" => {
                if depth >= MAX_DEPTH {
                    return Err(malformed(format!("'{}' at pair {} nests deeper than {}", key, at, MAX_DEPTH)));
                }
                let size: usize = value.parse().map_err(|_| {
                    malformed(format!("'{}' at pair {} has non-numeric size '{}'", key, at, value))
                })?;
                if size == 0 {
                    return Err(malformed(format!("'{}' at pair {} has no operands", key, at)));
                }
                let Some(end) = self.pos.checked_add(size).filter(|end| *end <= limit) else {
                    return Err(malformed(format!(
                        "'{}' at pair {} spans {} pairs but only {} remain in its scope",
                        key,
                        at,
                        size,
                        limit - self.pos
                    )));
                };
                let mut children = Vec::new();
                while self.pos < end {
                    children.push(self.expr(end, depth + 1)?);
                }
                match key.as_str() {
                    "and" => Filter::And(children),
                    "or" => Filter::Or(children),
                    "nand" => Filter::Nand(children),
                    _ => Filter::Nor(children),
                }
            }
            "map" => Filter::Map(required(&key, at, value)?),
            "gamedataand" => Filter::GameDataAnd(required(&key, at, value)?),
            "gamedataor" => Filter::GameDataOr(required(&key, at, value)?),
            "gamedatanor" => Filter::GameDataNor(required(&key, at, value)?),
            "gametagsand" => Filter::GameTagsAnd(required(&key, at, value)?),
            "gametagsnor" => Filter::GameTagsNor(required(&key, at, value)?),
            "addr" => Filter::Addr(addr_pattern(&key, at, value)?),
            "gameaddr" => Filter::GameAddr(addr_pattern(&key, at, value)?),
            "dedicated" => Filter::Dedicated,
            "secure" => Filter::Secure,
            "notfull" => Filter::NotFull,
            "hasplayers" => Filter::HasPlayers,
            "noplayers" => Filter::NoPlayers,
            "linux" => Filter::Linux,
            _ => return Err(malformed(format!("unknown operator '{}' at pair {}", pair.key, at))),
        };
        Ok(filter)
    }
}

fn required(key: &str, at: usize, value: &str) -> Result<String, DirectoryError> {
    if value.is_empty() {
        return Err(malformed(format!("'{}' at pair {} needs a value", key, at)));
    }
    Ok(value.to_string())
}

fn addr_pattern(key: &str, at: usize, value: &str) -> Result<AddrPattern, DirectoryError> {
    parse_ip_or_socket(value)
        .map(|(ip, port)| AddrPattern { ip, port })
        .map_err(|e| malformed(format!("'{}' at pair {}: {}", key, at, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(flat: &[&str]) -> Vec<KeyValuePair> {
        flat.chunks(2).map(|kv| KeyValuePair::new(kv[0], kv[1])).collect()
    }

    fn server(map: &str, tags: &str) -> ServerRecord {
        ServerRecord { map: map.into(), game_tags: tags.into(), ..ServerRecord::default() }
    }

    #[test]
    fn nested_sizes_count_descendants() {
        let decoded = decode(&pairs(&[
            "or", "4",
            "map", "cp_dustbowl",
            "and", "2",
            "gametagsand", "payload",
            "gametagsnor", "payloadrace",
        ]))
        .unwrap();

        assert_eq!(
            decoded,
            vec![Filter::Or(vec![
                Filter::Map("cp_dustbowl".into()),
                Filter::And(vec![
                    Filter::GameTagsAnd("payload".into()),
                    Filter::GameTagsNor("payloadrace".into()),
                ]),
            ])]
        );
    }

    #[test]
    fn encode_then_decode_rebuilds_tree() {
        let tree = vec![
            Filter::Secure,
            Filter::Nor(vec![
                Filter::Addr(AddrPattern { ip: Ipv4Addr::new(10, 0, 0, 1), port: Some(37015) }),
                Filter::Or(vec![
                    Filter::NoPlayers,
                    Filter::Nand(vec![Filter::GameDataOr("a,b".into())]),
                ]),
            ]),
            Filter::Map("mp_lobby".into()),
        ];
        let encoded = encode(&tree);
        assert_eq!(encoded[1], KeyValuePair::new("nor", "5"));
        assert_eq!(encoded[3], KeyValuePair::new("or", "3"));
        assert_eq!(decode(&encoded).unwrap(), tree);
    }

    #[test]
    fn flat_operands_decode_as_siblings() {
        let decoded = decode(&pairs(&["or", "2", "map", "cp_dustbowl", "gametagsand", "payload", "notfull", ""])).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].pair_count(), 3);
        assert_eq!(decoded[1], Filter::NotFull);
    }

    #[test]
    fn size_past_end_of_input_is_rejected() {
        let err = decode(&pairs(&["and", "3", "map", "x", "secure", ""])).unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedFilter(_)));
    }

    #[test]
    fn child_overrunning_parent_scope_is_rejected() {
        // The outer `or` claims two pairs, but its nested `and` needs three.
        let err = decode(&pairs(&["or", "2", "and", "2", "map", "a", "map", "b"])).unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedFilter(_)));
    }

    #[test]
    fn bad_operands_are_rejected() {
        for flat in [
            vec!["and", "two", "map", "x"],
            vec!["nor", "0"],
            vec!["map", ""],
            vec!["addr", "not-an-ip"],
            vec!["region", "eu"],
        ] {
            assert!(decode(&pairs(&flat)).is_err(), "{:?} should be rejected", flat);
        }
    }

    #[test]
    fn oversized_arity_is_rejected() {
        let huge = usize::MAX.to_string();
        for flat in [
            vec!["and", huge.as_str()],
            vec!["secure", "", "and", huge.as_str()],
            vec!["or", "2", "nor", huge.as_str(), "map", "x"],
        ] {
            let err = decode(&pairs(&flat)).unwrap_err();
            assert!(matches!(err, DirectoryError::MalformedFilter(_)), "{:?} should be rejected", flat);
        }
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut flat = Vec::new();
        let depth = MAX_DEPTH + 1;
        for level in 0..depth {
            flat.push(KeyValuePair::new("nand", (depth - level).to_string()));
        }
        flat.push(KeyValuePair::new("secure", ""));
        assert!(decode(&flat).is_err());
    }

    #[test]
    fn evaluates_example_expression() {
        let filters = decode(&pairs(&[
            "or", "4",
            "map", "cp_dustbowl",
            "and", "2",
            "gametagsand", "payload",
            "gametagsnor", "payloadrace",
        ]))
        .unwrap();

        assert!(matches_all(&filters, &server("cp_dustbowl", "")));
        assert!(matches_all(&filters, &server("pl_badwater", "payload,casual")));
        assert!(!matches_all(&filters, &server("plr_hightower", "payload,payloadrace")));
        assert!(!matches_all(&filters, &server("ctf_2fort", "ctf")));
    }

    #[test]
    fn unary_not_and_occupancy() {
        let not_full = decode(&pairs(&["nand", "1", "noplayers", ""])).unwrap();
        let mut record = ServerRecord { max_players: 16, ..ServerRecord::default() };
        assert!(!matches_all(&not_full, &record));
        record.players = 3;
        assert!(matches_all(&not_full, &record));
        assert!(Filter::NotFull.matches(&record));
        record.players = 16;
        assert!(!Filter::NotFull.matches(&record));
    }

    #[test]
    fn addr_without_port_matches_any_port() {
        let pattern = AddrPattern { ip: Ipv4Addr::new(192, 168, 0, 1), port: None };
        assert!(pattern.matches(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 27015)));
        assert!(!pattern.matches(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 27015)));
    }

    #[test]
    fn operator_keys_ignore_case() {
        let decoded = decode(&pairs(&["MAP", "mp_glitch", "Secure", "1"])).unwrap();
        assert_eq!(decoded, vec![Filter::Map("mp_glitch".into()), Filter::Secure]);
    }
}
