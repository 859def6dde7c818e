//! Shared pieces of the ADT Pulse entities: ids, device grouping and the
//! zone predicates.

use pulsehearth_client::Site;
use pulsehearth_client::ZONE_STATE_OK;
use pulsehearth_client::ZONE_STATUS_ONLINE;
use pulsehearth_client::Zone;

use super::DOMAIN;

pub const ATTRIBUTION: &str = "Data provided by ADT";

pub fn alarm_unique_id(site_id: &str) -> String {
    format!("adt_pulse_alarm_{}", site_id)
}

pub fn gateway_unique_id(site_id: &str) -> String {
    format!("adt_pulse_gateway_{}", site_id)
}

pub fn zone_unique_id(site_id: &str, zone_id: u32) -> String {
    format!("adt_pulse_{}_{}", site_id, zone_id)
}

/// Device identifier of the gateway: its serial number when known.
pub fn gateway_identifier(site: &Site) -> (String, String) {
    let id = match &site.gateway.serial_number {
        Some(serial) if !serial.is_empty() => serial.clone(),
        _ => gateway_unique_id(&site.id),
    };
    (DOMAIN.to_string(), id)
}

pub fn zone_open(zone: &Zone) -> bool {
    zone.state != ZONE_STATE_OK
}

pub fn zone_trouble(zone: &Zone) -> bool {
    zone.status != ZONE_STATUS_ONLINE
}

/// True when the site can be armed without forcing.
pub fn system_can_be_armed(site: &Site) -> bool {
    !site
        .zones
        .values()
        .any(|zone| zone_open(zone) || zone_trouble(zone))
}

#[cfg(test)]
mod tests {
    use pulsehearth_client::AlarmStatus;

    use super::*;
    use crate::integrations::adtpulse::testing::site;
    use crate::integrations::adtpulse::testing::zone;

    #[test]
    fn test_zone_open() {
        assert!(!zone_open(&zone(1, "Front Door", "doorWindow", "OK", "Online")));
        assert!(zone_open(&zone(1, "Front Door", "doorWindow", "Open", "Online")));
        assert!(zone_open(&zone(2, "Hall", "motion", "Motion", "Online")));
        assert!(zone_open(&zone(3, "Glass", "glass", "Tamper", "Online")));
    }

    #[test]
    fn test_zone_trouble() {
        assert!(!zone_trouble(&zone(1, "Front Door", "doorWindow", "OK", "Online")));
        assert!(zone_trouble(&zone(1, "Front Door", "doorWindow", "OK", "Low Battery")));
    }

    #[test]
    fn test_system_can_be_armed() {
        let mut site = site(AlarmStatus::Off);
        assert!(system_can_be_armed(&site));

        site.zones
            .insert(3, zone(3, "Back Door", "doorWindow", "Open", "Online"));
        assert!(!system_can_be_armed(&site));

        site.zones
            .insert(3, zone(3, "Back Door", "doorWindow", "OK", "Trouble"));
        assert!(!system_can_be_armed(&site));

        site.zones
            .insert(3, zone(3, "Back Door", "doorWindow", "OK", "Online"));
        assert!(system_can_be_armed(&site));
    }

    #[test]
    fn test_gateway_identifier() {
        let mut site = site(AlarmStatus::Off);
        assert_eq!(
            gateway_identifier(&site),
            ("adtpulse".to_string(), "5U020CN3007E3".to_string())
        );
        site.gateway.serial_number = None;
        assert_eq!(
            gateway_identifier(&site),
            ("adtpulse".to_string(), "adt_pulse_gateway_160301z".to_string())
        );
    }
}
