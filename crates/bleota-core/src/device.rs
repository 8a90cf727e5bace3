//! Remote endpoint addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// An addressable device produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Advertised local name (may be empty).
    pub name: String,
    /// Platform address: a MAC on Linux/Windows, a peripheral UUID on macOS.
    pub address: String,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Discovery filter: substring match on the advertised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub name_contains: String,
}

impl DeviceFilter {
    pub fn by_name(fragment: impl Into<String>) -> Self {
        Self {
            name_contains: fragment.into(),
        }
    }

    pub fn matches(&self, name: Option<&str>) -> bool {
        name.is_some_and(|n| n.contains(&self.name_contains))
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::by_name(crate::protocol::DEVICE_NAME_FILTER)
    }
}

/// First discovered device accepted by `filter`, in discovery order.
pub fn select_first(
    found: impl IntoIterator<Item = DeviceHandle>,
    filter: &DeviceFilter,
) -> Result<DeviceHandle, UpdateError> {
    found
        .into_iter()
        .find(|d| filter.matches(Some(&d.name)))
        .ok_or_else(|| UpdateError::Discovery {
            filter: filter.name_contains.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_substring() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(Some("ESP32FirmwareUpdate")));
        assert!(filter.matches(Some("Lab-ESP32FirmwareUpdate-2")));
        assert!(!filter.matches(Some("ESP32")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DeviceHandle::new("Node", "AA:BB").to_string(),
            "Node (AA:BB)"
        );
        assert_eq!(DeviceHandle::new("", "AA:BB").to_string(), "AA:BB");
    }

    #[test]
    fn test_select_first_in_discovery_order() {
        let found = vec![
            DeviceHandle::new("Thermostat", "11:11"),
            DeviceHandle::new("ESP32FirmwareUpdate", "22:22"),
            DeviceHandle::new("ESP32FirmwareUpdate", "33:33"),
        ];
        let device = select_first(found, &DeviceFilter::default()).unwrap();
        assert_eq!(device.address, "22:22");
    }

    #[test]
    fn test_select_first_none_found() {
        let err = select_first(Vec::new(), &DeviceFilter::by_name("Board")).unwrap_err();
        assert!(matches!(err, UpdateError::Discovery { filter } if filter == "Board"));
    }
}
