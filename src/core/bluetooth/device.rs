//! Bluetooth device representation and scan filtering

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One advertisement observation of a peripheral.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Platform-specific stable identifier (address or OS-assigned ID)
    pub id: String,
    /// The advertised local name, if any
    pub name: Option<String>,
    /// The signal strength (RSSI) in dBm
    pub rssi: i16,
    /// Manufacturer-specific data keyed by company ID
    pub manufacturer_data: Option<HashMap<u16, Vec<u8>>>,
    pub service_uuids: BTreeSet<Uuid>,
    pub tx_power: Option<i16>,
    pub connectable: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi,
            manufacturer_data: None,
            service_uuids: BTreeSet::new(),
            tx_power: None,
            connectable: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.insert(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data
            .get_or_insert_with(HashMap::new)
            .insert(company_id, data);
        self
    }
}

/// Manufacturer data predicate: the company ID must be present and its
/// payload must start with `data_prefix` when one is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerDataFilter {
    pub company_id: u16,
    #[serde(default)]
    pub data_prefix: Option<Vec<u8>>,
}

/// Scan filter. Every present predicate must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanFilter {
    pub service_uuids: Option<Vec<Uuid>>,
    pub name: Option<String>,
    pub name_prefix: Option<String>,
    pub min_rssi: Option<i16>,
    pub manufacturer_data: Option<ManufacturerDataFilter>,
}

impl ScanFilter {
    pub fn matches(&self, device: &Device) -> bool {
        self.matches_services(device)
            && self.matches_name(device)
            && self.min_rssi.is_none_or(|min| device.rssi >= min)
            && self.matches_manufacturer(device)
    }

    /// Services handed to the adapter so it can filter in hardware.
    pub fn adapter_services(&self) -> Vec<Uuid> {
        self.service_uuids.clone().unwrap_or_default()
    }

    fn matches_services(&self, device: &Device) -> bool {
        match &self.service_uuids {
            Some(wanted) if !wanted.is_empty() => {
                wanted.iter().any(|uuid| device.service_uuids.contains(uuid))
            }
            _ => true,
        }
    }

    fn matches_name(&self, device: &Device) -> bool {
        let name = device.name.as_deref();
        let exact = self.name.as_deref().is_none_or(|wanted| name == Some(wanted));
        let prefix = self
            .name_prefix
            .as_deref()
            .is_none_or(|prefix| name.is_some_and(|n| n.starts_with(prefix)));
        exact && prefix
    }

    fn matches_manufacturer(&self, device: &Device) -> bool {
        let Some(filter) = &self.manufacturer_data else {
            return true;
        };
        device
            .manufacturer_data
            .as_ref()
            .and_then(|data| data.get(&filter.company_id))
            .is_some_and(|payload| {
                filter
                    .data_prefix
                    .as_deref()
                    .is_none_or(|prefix| payload.starts_with(prefix))
            })
    }
}
