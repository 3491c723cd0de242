use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// How a subscription destination is compared to a published destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationMatching {
    #[default]
    Exact,
    /// `*` matches inside one path segment, a trailing `**` matches the rest.
    Pattern,
}

impl DestinationMatching {
    pub fn matches(self, subscribed: &str, destination: &str) -> bool {
        match self {
            DestinationMatching::Exact => subscribed == destination,
            DestinationMatching::Pattern => pattern_matches(subscribed, destination),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DestinationMatching::Exact => "exact",
            DestinationMatching::Pattern => "pattern",
        }
    }
}

impl fmt::Display for DestinationMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationMatching {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(DestinationMatching::Exact),
            "pattern" => Ok(DestinationMatching::Pattern),
            other => Err(BrokerError::UnknownMatching(other.to_string())),
        }
    }
}

fn pattern_matches(pattern: &str, destination: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let destination_segments: Vec<&str> = destination.split('/').collect();

    for (index, segment) in pattern_segments.iter().enumerate() {
        if *segment == "**" && index == pattern_segments.len() - 1 {
            return destination_segments.len() >= index;
        }
        match destination_segments.get(index) {
            Some(candidate) if segment_matches(segment, candidate) => {}
            _ => return false,
        }
    }
    pattern_segments.len() == destination_segments.len()
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == segment;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return false,
    };
    let Some(mut remaining) = segment.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(position) => remaining = &remaining[position + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
