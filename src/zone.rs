//! Zones and sensor naming.
//!
//! A zone is a (location, cluster) pair — "Flower Room"/"front" — and is the
//! identity for every piece of time-varying state in the facility. CAN node
//! IDs map statically onto zones, and each zone contributes a short suffix
//! to the canonical sensor names (`dry_bulb_f`, `co2_b`, `rh_v`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A room plus sub-area, the unit of control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub location: String,
    pub cluster: String,
}

impl Zone {
    pub fn new(location: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            cluster: cluster.into(),
        }
    }

    /// Suffix appended to base sensor names for this zone.
    ///
    /// Lab sensors carry no suffix; unknown rooms fall back to none.
    pub fn sensor_suffix(&self) -> &'static str {
        match self.location.as_str() {
            "Flower Room" => {
                if self.cluster == "front" {
                    "f"
                } else {
                    "b"
                }
            }
            "Veg Room" => "v",
            _ => "",
        }
    }

    /// Canonical sensor name for a base reading in this zone.
    pub fn sensor_name(&self, base: &str) -> String {
        let suffix = self.sensor_suffix();
        if suffix.is_empty() {
            base.to_string()
        } else {
            format!("{base}_{suffix}")
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.cluster)
    }
}

/// Map a CAN node ID onto its zone.
///
/// The table mirrors the sensor-node firmware: nodes 1/2 sit at the back and
/// front of the flower room, 3 in veg, 4 in the lab, 5 outside. Unknown
/// nodes fall back to `fallback` (caller-configurable).
pub fn zone_for_node(node_id: u8, fallback: &Zone) -> Zone {
    match node_id {
        1 => Zone::new("Flower Room", "back"),
        2 => Zone::new("Flower Room", "front"),
        3 => Zone::new("Veg Room", "main"),
        4 => Zone::new("Lab", "main"),
        5 => Zone::new("Outside", "main"),
        _ => fallback.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes() {
        assert_eq!(Zone::new("Flower Room", "back").sensor_suffix(), "b");
        assert_eq!(Zone::new("Flower Room", "front").sensor_suffix(), "f");
        assert_eq!(Zone::new("Veg Room", "main").sensor_suffix(), "v");
        assert_eq!(Zone::new("Lab", "main").sensor_suffix(), "");
    }

    #[test]
    fn sensor_names() {
        let front = Zone::new("Flower Room", "front");
        assert_eq!(front.sensor_name("dry_bulb"), "dry_bulb_f");
        let lab = Zone::new("Lab", "main");
        assert_eq!(lab.sensor_name("water_level"), "water_level");
    }

    #[test]
    fn node_mapping_with_fallback() {
        let fallback = Zone::new("Flower Room", "back");
        assert_eq!(zone_for_node(2, &fallback), Zone::new("Flower Room", "front"));
        assert_eq!(zone_for_node(5, &fallback), Zone::new("Outside", "main"));
        assert_eq!(zone_for_node(9, &fallback), fallback);
    }
}
