//! Canonicalized BLE MAC addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A BLE MAC address, canonicalized to upper-case hex octets joined by colons.
///
/// Accepts colon- or hyphen-separated input; rejects anything that doesn't
/// decode to exactly six hex octets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// The canonical string form, e.g. `"AA:BB:CC:DD:EE:FF"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last two octets as a lower-case hex suffix, used for synthesizing
    /// friendly names (`"eeff"` for `AA:BB:CC:DD:EE:FF`).
    pub fn hex_suffix(&self) -> String {
        self.0
            .rsplit(':')
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("")
            .to_lowercase()
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else {
            return Err(invalid_mac(s));
        };

        if octets.len() != 6 {
            return Err(invalid_mac(s));
        }

        let mut canon = String::with_capacity(17);
        for (i, octet) in octets.iter().enumerate() {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid_mac(s));
            }
            if i > 0 {
                canon.push(':');
            }
            canon.push_str(&octet.to_ascii_uppercase());
        }

        Ok(MacAddress(canon))
    }
}

fn invalid_mac(raw: &str) -> Error {
    Error::validation(format!("invalid MAC address: {raw}")).with_context("raw", raw)
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_separated() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn parses_hyphen_separated() {
        let mac: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn rejects_non_hex() {
        let result: Result<MacAddress, _> = "GG:BB:CC:DD:EE:FF".parse();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_wrong_octet_count() {
        let result: Result<MacAddress, _> = "AA:BB:CC".parse();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mixed_separators() {
        let result: Result<MacAddress, _> = "AA:BB-CC:DD:EE:FF".parse();
        assert!(result.is_err());
    }

    #[test]
    fn hex_suffix_is_last_two_octets_lowercase() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.hex_suffix(), "eeff");
    }

    #[test]
    fn json_roundtrip() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn json_rejects_invalid_mac() {
        let result: Result<MacAddress, _> = serde_json::from_str("\"not-a-mac\"");
        assert!(result.is_err());
    }

    #[test]
    fn ordering_is_lexicographic_on_canonical_form() {
        let a: MacAddress = "AA:00:00:00:00:00".parse().unwrap();
        let b: MacAddress = "BB:00:00:00:00:00".parse().unwrap();
        assert!(a < b);
    }
}
