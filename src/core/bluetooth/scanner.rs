use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdvertisingDevice, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio::time::{Instant, timeout_at};
use uuid::Uuid;

use crate::core::bluetooth::constants::{UUID_SERVICE_DATA, UUID_SERVICE_DATA_LEGACY};
use crate::core::bluetooth::device::{DeviceIdentity, Model};

/// Model code used when a device advertises no SwitchBot service data
const UNADVERTISED_MODEL_CODE: char = '?';

/// Scan until a device whose id or MAC address contains `target` shows up.
pub async fn find_device(
    adapter: &Adapter,
    target: &str,
    scan_duration: Duration,
) -> Result<(Device, DeviceIdentity)> {
    info!("Starting bluetooth scan for {}", target);
    let deadline = Instant::now() + scan_duration;
    let mut scan_stream = adapter.scan(&[]).await?;

    loop {
        let discovered = match timeout_at(deadline, scan_stream.next()).await {
            Ok(Some(discovered)) => discovered,
            Ok(None) => {
                info!("Bluetooth scan stream has ended.");
                break;
            }
            Err(_) => {
                info!("Scan window of {:?} elapsed", scan_duration);
                break;
            }
        };

        debug!(
            "Found device - Device: {:?}, RSSI: {:?}",
            discovered.device, discovered.rssi
        );
        if let Some(identity) = identify(&discovered, target) {
            info!(
                "Found device: Address: {}, ID: {}, Model: {}, RSSI: {:?}",
                identity.address(),
                identity.id(),
                identity.model(),
                discovered.rssi
            );
            return Ok((discovered.device, identity));
        }
    }

    Err(anyhow!("No device matching {} found", target))
}

fn identify(discovered: &AdvertisingDevice, target: &str) -> Option<DeviceIdentity> {
    let id = discovered.device.id().to_string();
    let address = extract_mac_address(&id).unwrap_or_else(|| "N/A".to_string());
    if !matches_target(&id, &address, target) {
        return None;
    }
    let model = model_from_service_data(&discovered.adv_data.service_data)
        .unwrap_or(Model::Unknown(UNADVERTISED_MODEL_CODE));
    Some(DeviceIdentity::new(id, address, model))
}

fn matches_target(id: &str, address: &str, target: &str) -> bool {
    let target = target.to_uppercase();
    !target.is_empty() && (id.to_uppercase().contains(&target) || address.contains(&target))
}

fn model_from_service_data(service_data: &HashMap<Uuid, Vec<u8>>) -> Option<Model> {
    [UUID_SERVICE_DATA, UUID_SERVICE_DATA_LEGACY]
        .iter()
        .filter_map(|uuid| service_data.get(uuid))
        .find_map(|data| Model::from_service_data(data))
}

fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}
