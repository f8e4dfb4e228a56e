//! Condition operators.

use std::collections::HashSet;
use std::net::IpAddr;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// Operator-specific parameters as they appear in a rule condition.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OperatorParams {
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub list: Vec<String>,
    #[serde(default)]
    pub options: OperatorOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OperatorOptions {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub min_length: usize,
}

/// A compiled condition operator.
#[derive(Debug, Clone)]
pub enum Operator {
    MatchRegex {
        regex: Regex,
        source: String,
        min_length: usize,
    },
    PhraseMatch(Vec<String>),
    ExactMatch(HashSet<String>),
    IpMatch(Vec<IpNetwork>),
}

impl Operator {
    pub(crate) fn compile(name: &str, params: &OperatorParams) -> Result<Self, String> {
        match name {
            "match_regex" => {
                let source = params
                    .regex
                    .clone()
                    .ok_or_else(|| "match_regex requires a regex parameter".to_owned())?;
                let regex = RegexBuilder::new(&source)
                    .case_insensitive(!params.options.case_sensitive)
                    .build()
                    .map_err(|e| format!("invalid regular expression: {e}"))?;
                Ok(Self::MatchRegex {
                    regex,
                    source,
                    min_length: params.options.min_length,
                })
            }
            "phrase_match" => {
                if params.list.is_empty() {
                    return Err("phrase_match requires a non-empty list".to_owned());
                }
                Ok(Self::PhraseMatch(params.list.clone()))
            }
            "exact_match" => Ok(Self::ExactMatch(params.list.iter().cloned().collect())),
            "ip_match" => params
                .list
                .iter()
                .map(|entry| entry.parse())
                .collect::<Result<_, _>>()
                .map(Self::IpMatch),
            other => Err(format!("unknown operator '{other}'")),
        }
    }

    /// Returns the operator name used in triggers.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MatchRegex { .. } => "match_regex",
            Self::PhraseMatch(_) => "phrase_match",
            Self::ExactMatch(_) => "exact_match",
            Self::IpMatch(_) => "ip_match",
        }
    }

    /// Returns the operator value reported in triggers.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::MatchRegex { source, .. } => source,
            _ => "",
        }
    }

    /// Tests `input`, returning the highlighted fragment on a match.
    #[must_use]
    pub fn matches(&self, input: &str) -> Option<String> {
        match self {
            Self::MatchRegex {
                regex, min_length, ..
            } => {
                if input.len() < *min_length {
                    return None;
                }
                regex.find(input).map(|m| m.as_str().to_owned())
            }
            Self::PhraseMatch(phrases) => phrases
                .iter()
                .find(|phrase| input.contains(phrase.as_str()))
                .cloned(),
            Self::ExactMatch(values) => values.contains(input).then(|| input.to_owned()),
            Self::IpMatch(networks) => {
                let ip: IpAddr = input.trim().parse().ok()?;
                networks
                    .iter()
                    .any(|net| net.contains(ip))
                    .then(|| input.to_owned())
            }
        }
    }
}

/// An IPv4 or IPv6 network. IPv4 is stored in its IPv6-mapped form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    base: u128,
    prefix: u8,
}

impl IpNetwork {
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u128::MAX << (128 - u32::from(self.prefix))
        };
        (to_bits(ip) & mask) == (self.base & mask)
    }
}

impl std::str::FromStr for IpNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let ip: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| format!("invalid IP address '{s}'"))?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            None => max,
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("invalid network prefix in '{s}'"))?,
        };
        let prefix = if ip.is_ipv4() { prefix + 96 } else { prefix };
        Ok(Self {
            base: to_bits(ip),
            prefix,
        })
    }
}

fn to_bits(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}
