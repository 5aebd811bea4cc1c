/*============================================================
  Project: appleloops
  Module: appleloops::version
  ------------------------------------------------------------
  Purpose:
    Loose vendor version values as found in manifests and
    installer receipts (`1.0.0.0.1.1447702152`, `10.4.8`).

  Security / Safety Notes:
    Pure data container; no I/O performed in this module.

  Dependencies:
    serde for report serialization.

  Operational Scope:
    Package versions, receipt versions and application versions.

  Revision History:
    2026-10-18 CW  Introduced loose version ordering.
  ------------------------------------------------------------
  Principles Observed:
    - Equality agrees with ordering
    - Numeric parts compare numerically
============================================================*/

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Number(u64),
    Text(String),
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Number(a), Component::Number(b)) => a.cmp(b),
            (Component::Text(a), Component::Text(b)) => a.cmp(b),
            // Numbers sort before text.
            (Component::Number(_), Component::Text(_)) => Ordering::Less,
            (Component::Text(_), Component::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A loosely structured version compared component by component.
#[derive(Debug, Clone)]
pub struct LooseVersion {
    raw: String,
    components: Vec<Component>,
}

impl LooseVersion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let mut components = Vec::new();
        let mut current = String::new();
        let mut numeric = false;

        let mut flush = |buffer: &mut String, numeric: bool| {
            if buffer.is_empty() {
                return;
            }
            let component = if numeric {
                buffer
                    .parse::<u64>()
                    .map(Component::Number)
                    .unwrap_or_else(|_| Component::Text(buffer.clone()))
            } else {
                Component::Text(buffer.clone())
            };
            components.push(component);
            buffer.clear();
        };

        for ch in raw.chars() {
            if ch == '.' || ch == '-' || ch == '_' || ch.is_whitespace() {
                flush(&mut current, numeric);
                continue;
            }
            let is_digit = ch.is_ascii_digit();
            if !current.is_empty() && is_digit != numeric {
                flush(&mut current, numeric);
            }
            numeric = is_digit;
            current.push(ch);
        }
        flush(&mut current, numeric);

        Self {
            raw: raw.to_string(),
            components,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric components only, in order.
    pub fn numbers(&self) -> Vec<u64> {
        self.components
            .iter()
            .filter_map(|component| match component {
                Component::Number(n) => Some(*n),
                Component::Text(_) => None,
            })
            .collect()
    }
}

impl Default for LooseVersion {
    fn default() -> Self {
        Self::parse("0.0.0")
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for LooseVersion {}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for LooseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        assert_eq!(LooseVersion::default().as_str(), "0.0.0");
        assert!(LooseVersion::default() < LooseVersion::parse("0.0.1"));
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert!(LooseVersion::parse("10.4.10") > LooseVersion::parse("10.4.8"));
        assert!(LooseVersion::parse("1.0.0.0.1.1447702152") > LooseVersion::parse("1.0.0.0.1"));
        assert_eq!(LooseVersion::parse("3.4"), LooseVersion::parse("3.4"));
    }

    #[test]
    fn mixed_components_split_on_kind() {
        let version = LooseVersion::parse("2.0b3");
        assert_eq!(version.numbers(), vec![2, 0, 3]);
        assert!(LooseVersion::parse("2.0") < version);
    }
}
