use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier used to match a queued work item to a pending local record.
///
/// Keys are opaque strings on the wire. Numeric ids (`7`) and generated
/// order ids (`482913-9f0d8ae4...`) share the same representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wraps an existing identifier.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh order key: a six-digit number followed by a
    /// dash-free UUID, e.g. `482913-9f0d8ae4e4214d2a88670b1e4c64aa01`.
    pub fn generate() -> Self {
        let number: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        Self(format!("{number}-{}", Uuid::new_v4().simple()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for CorrelationKey {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for CorrelationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An order amount in minor units (cents). Serialized as a bare integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Orders must be for a strictly positive amount.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Delivery address carried from order confirmation to the shipping stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub home_address: String,
    pub city: String,
    #[serde(default)]
    pub region: String,
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

impl ShippingAddress {
    /// Returns true when the fields a carrier needs are present.
    pub fn is_deliverable(&self) -> bool {
        !self.home_address.trim().is_empty()
            && !self.city.trim().is_empty()
            && !self.country.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_unique_and_well_formed() {
        let k1 = CorrelationKey::generate();
        let k2 = CorrelationKey::generate();
        assert_ne!(k1, k2);

        let (number, suffix) = k1.as_str().split_once('-').unwrap();
        assert_eq!(number.len(), 6);
        assert!(number.parse::<u32>().unwrap() >= 100_000);
        assert_eq!(suffix.len(), 32);
        assert!(!suffix.contains('-'));
    }

    #[test]
    fn numeric_keys_render_as_strings() {
        let key = CorrelationKey::from(7u64);
        assert_eq!(key.as_str(), "7");
        assert_eq!(key, CorrelationKey::new("7"));
    }

    #[test]
    fn key_serializes_transparently() {
        let key = CorrelationKey::new("42");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"42\"");
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(129_900).to_string(), "1299.00");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
        assert!(!Money::from_cents(0).is_positive());
    }

    #[test]
    fn money_serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(2599)).unwrap();
        assert_eq!(json, "2599");
    }

    #[test]
    fn address_deliverability() {
        let mut address = ShippingAddress {
            home_address: "12 Harbour Rd".to_string(),
            city: "Lagos".to_string(),
            region: String::new(),
            country: "NG".to_string(),
            phone: String::new(),
        };
        assert!(address.is_deliverable());

        address.city = "  ".to_string();
        assert!(!address.is_deliverable());
    }
}
