//! Drone state broadcast parsing
//!
//! The drone broadcasts its state as ASCII `key:value` pairs separated by
//! `;`, e.g. `pitch:0;roll:0;yaw:0;...;bat:86;baro:-52.43;time:0;\r\n`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest state reported by the drone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    battery: Option<String>,
    fields: BTreeMap<String, String>,
}

impl TelemetrySnapshot {
    /// Battery percentage as reported, if ever seen.
    pub fn battery(&self) -> Option<&str> {
        self.battery.as_deref()
    }

    /// Battery percentage as a number, when the reported text is numeric.
    pub fn battery_percent(&self) -> Option<u8> {
        self.battery.as_deref().and_then(|b| b.parse().ok())
    }

    /// Raw value of any field from the most recent datagram.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// All fields from the most recent datagram.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Apply one telemetry datagram.
    ///
    /// The field map is replaced wholesale by the fields parsed from this
    /// datagram. The battery value is taken from the first usable `bat` field
    /// and only replaced when the datagram carries one; otherwise the previous value is retained. Non-UTF-8
    /// payloads are ignored entirely.
    ///
    /// Returns whether anything changed.
    pub fn apply(&mut self, payload: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(payload) else {
            return false;
        };

        let mut fields = BTreeMap::new();
        let mut battery = None;

        for field in text.split(';').map(str::trim).filter(|f| !f.is_empty()) {
            if battery.is_none() && field.starts_with("bat") {
                battery = field.split(':').next_back().map(str::trim).filter(|v| !v.is_empty() && *v != field);
            }
            if let Some((key, value)) = field.split_once(':') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut changed = false;
        if let Some(battery) = battery {
            if self.battery.as_deref() != Some(battery) {
                self.battery = Some(battery.to_string());
                changed = true;
            }
        }
        if !fields.is_empty() && fields != self.fields {
            self.fields = fields;
            changed = true;
        }
        changed
    }
}
