//! Resolution of the characteristic handles a session needs

use log::{debug, info};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_DEVICE_NAME, UUID_NOTIFY_CHAR, UUID_PRIMARY_SERVICE, UUID_WRITE_CHAR,
};
use crate::core::bluetooth::peripheral::{DiscoveredService, GattCharacteristic};
use crate::core::error::{Error, Result};

/// Handles resolved once per connection.
#[derive(Debug, Clone)]
pub struct CharacteristicSet<C> {
    /// Commands are written here
    pub write: C,
    /// Command responses are notified here
    pub notify: C,
    /// Device name (0x2A00)
    pub device: C,
}

impl<C: GattCharacteristic> CharacteristicSet<C> {
    /// Picks the handles out of a service enumeration. The first match in
    /// enumeration order wins.
    ///
    /// Write and notify must live in the primary service. The device name is
    /// looked up there first and then in the remaining services, since
    /// devices usually expose it under Generic Access.
    pub fn resolve(services: &[DiscoveredService<C>]) -> Result<Self> {
        for service in services {
            debug!(
                "Available service: {} ({} characteristics)",
                service.uuid,
                service.characteristics.len()
            );
        }

        let primary = services
            .iter()
            .find(|s| s.uuid == UUID_PRIMARY_SERVICE)
            .ok_or(Error::ServiceNotFound(UUID_PRIMARY_SERVICE))?;
        info!("Found primary service: {}", primary.uuid);

        let write = find_in(primary, UUID_WRITE_CHAR)
            .ok_or(Error::CharacteristicNotFound(UUID_WRITE_CHAR))?;
        let notify = find_in(primary, UUID_NOTIFY_CHAR)
            .ok_or(Error::CharacteristicNotFound(UUID_NOTIFY_CHAR))?;
        let device = find_in(primary, UUID_DEVICE_NAME)
            .or_else(|| {
                services
                    .iter()
                    .filter(|s| s.uuid != UUID_PRIMARY_SERVICE)
                    .find_map(|s| find_in(s, UUID_DEVICE_NAME))
            })
            .ok_or(Error::CharacteristicNotFound(UUID_DEVICE_NAME))?;

        Ok(Self {
            write,
            notify,
            device,
        })
    }
}

fn find_in<C: GattCharacteristic>(service: &DiscoveredService<C>, uuid: Uuid) -> Option<C> {
    service
        .characteristics
        .iter()
        .find(|c| c.uuid() == uuid)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::mock::{MockPeripheral, generic_access, switchbot_services};

    #[test]
    fn resolves_all_three_handles() {
        let peripheral = MockPeripheral::new(switchbot_services);
        let services = peripheral.services();

        let set = CharacteristicSet::resolve(&services).expect("resolve");
        assert_eq!(set.write.uuid(), UUID_WRITE_CHAR);
        assert_eq!(set.notify.uuid(), UUID_NOTIFY_CHAR);
        assert_eq!(set.device.uuid(), UUID_DEVICE_NAME);
    }

    #[test]
    fn missing_primary_service_is_reported() {
        let peripheral = MockPeripheral::new(|p| vec![generic_access(p)]);
        let err = CharacteristicSet::resolve(&peripheral.services()).unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(uuid) if uuid == UUID_PRIMARY_SERVICE));
    }

    #[test]
    fn missing_notify_is_reported() {
        let peripheral = MockPeripheral::new(|p| {
            vec![
                DiscoveredService {
                    uuid: UUID_PRIMARY_SERVICE,
                    characteristics: vec![p.characteristic(UUID_WRITE_CHAR)],
                },
                generic_access(p),
            ]
        });
        let err = CharacteristicSet::resolve(&peripheral.services()).unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound(uuid) if uuid == UUID_NOTIFY_CHAR));
    }

    #[test]
    fn device_name_outside_any_service_is_reported() {
        let peripheral = MockPeripheral::new(|p| {
            vec![DiscoveredService {
                uuid: UUID_PRIMARY_SERVICE,
                characteristics: vec![
                    p.characteristic(UUID_WRITE_CHAR),
                    p.characteristic(UUID_NOTIFY_CHAR),
                ],
            }]
        });
        let err = CharacteristicSet::resolve(&peripheral.services()).unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound(uuid) if uuid == UUID_DEVICE_NAME));
    }

    #[test]
    fn device_name_in_primary_service_wins() {
        let peripheral = MockPeripheral::new(|p| {
            vec![
                generic_access(p),
                DiscoveredService {
                    uuid: UUID_PRIMARY_SERVICE,
                    characteristics: vec![
                        p.characteristic(UUID_WRITE_CHAR),
                        p.characteristic(UUID_NOTIFY_CHAR),
                        p.tagged_characteristic(UUID_DEVICE_NAME, "primary"),
                    ],
                },
            ]
        });
        let set = CharacteristicSet::resolve(&peripheral.services()).expect("resolve");
        assert_eq!(set.device.tag(), Some("primary"));
    }
}
