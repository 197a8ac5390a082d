//! Discovery and auto-configuration (spec.md §4.5).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use batteryhawk_types::{Device, Family, MacAddress};

/// A normalized advertisement, independent of the underlying BLE stack's
/// representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Advertisement {
    pub service_uuids: Vec<uuid::Uuid>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<uuid::Uuid, Vec<u8>>,
    pub local_name: Option<String>,
    pub tx_power: Option<i16>,
    pub platform_data: HashMap<String, String>,
}

/// A single discovery sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sighting {
    pub mac: MacAddress,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    #[serde(with = "time::serde::rfc3339")]
    pub discovered_at: OffsetDateTime,
    pub advertisement: Advertisement,
}

impl Sighting {
    /// Classify the family of this sighting using the layered evidence
    /// order from spec.md §4.2: name substring, then manufacturer-data
    /// pattern, then service-UUID membership.
    pub fn classify_family(&self) -> Family {
        if let Some(name) = &self.name {
            if let Some(family) = Family::from_name(name) {
                return family;
            }
        }
        for data in self.advertisement.manufacturer_data.values() {
            if let Some(family) = Family::from_manufacturer_data(data) {
                return family;
            }
        }
        Family::from_service_uuids(&self.advertisement.service_uuids).unwrap_or(Family::Unknown)
    }
}

/// Minimum short-scan slice used when `stop_on_new=true` and the caller
/// has not set an explicit `short_timeout`.
pub fn short_timeout_for(duration: Duration) -> Duration {
    Duration::from_secs_f64((duration.as_secs_f64() * 0.1).max(5.0))
}

/// Per-family rule controlling whether auto-configuration claims a
/// sighting, and what polling interval it assigns.
#[derive(Debug, Clone)]
pub struct AutoConfigRule {
    pub enabled: bool,
    pub polling_interval_s: u32,
    pub friendly_name_template: String,
}

impl Default for AutoConfigRule {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_s: batteryhawk_types::device::DEFAULT_POLLING_INTERVAL_S,
            friendly_name_template: "{family}-{suffix}".to_string(),
        }
    }
}

/// Rules block passed to [`auto_configure`], keyed by family.
#[derive(Debug, Clone, Default)]
pub struct AutoConfigRules {
    pub bm2: AutoConfigRule,
    pub bm6: AutoConfigRule,
}

impl AutoConfigRules {
    fn rule_for(&self, family: Family) -> Option<&AutoConfigRule> {
        match family {
            Family::Bm2 => Some(&self.bm2),
            Family::Bm6 => Some(&self.bm6),
            Family::Unknown => None,
        }
    }
}

/// Render a friendly-name template, substituting `{mac}`, `{suffix}`
/// (last-4-hex), `{family}`, and `{name}` (original advertised name, or
/// empty).
pub fn render_friendly_name(template: &str, sighting: &Sighting, family: Family) -> String {
    template
        .replace("{mac}", sighting.mac.as_str())
        .replace("{suffix}", &sighting.mac.hex_suffix())
        .replace("{family}", &family.to_string())
        .replace("{name}", sighting.name.as_deref().unwrap_or(""))
}

/// Classify and, where the rules allow, configure each sighting. Returns a
/// map of mac (as string) to whether auto-configuration claimed it.
///
/// `already_configured` and `configure` let the caller (the device
/// registry) own persistence; this function is pure classification logic.
pub fn auto_configure<F>(
    sightings: &[Sighting],
    rules: &AutoConfigRules,
    already_configured: impl Fn(&MacAddress) -> bool,
    mut configure: F,
) -> HashMap<String, bool>
where
    F: FnMut(&Sighting, Family, String, u32),
{
    let mut results = HashMap::new();

    for sighting in sightings {
        let family = sighting.classify_family();
        if already_configured(&sighting.mac) {
            results.insert(sighting.mac.as_str().to_string(), false);
            continue;
        }

        let Some(rule) = rules.rule_for(family) else {
            results.insert(sighting.mac.as_str().to_string(), false);
            continue;
        };

        if !rule.enabled {
            results.insert(sighting.mac.as_str().to_string(), false);
            continue;
        }

        let friendly_name = render_friendly_name(&rule.friendly_name_template, sighting, family);
        configure(sighting, family, friendly_name, rule.polling_interval_s);
        results.insert(sighting.mac.as_str().to_string(), true);
    }

    results
}

/// Register a fresh batch of sightings into the device registry's map,
/// idempotently: existing macs are left untouched (spec.md §9 Open
/// Question 1 decision).
pub fn register_discovered(
    registry: &mut HashMap<MacAddress, Device>,
    sightings: &[Sighting],
) {
    for sighting in sightings {
        registry
            .entry(sighting.mac.clone())
            .or_insert_with(|| Device::discovered(sighting.mac.clone(), sighting.discovered_at));
    }
}
