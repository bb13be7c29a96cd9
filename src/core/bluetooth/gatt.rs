//! Timed characteristic read and write

use std::time::Duration;

use log::debug;
use tokio::time::timeout;

use crate::core::bluetooth::peripheral::GattCharacteristic;
use crate::core::error::{Error, Result};

/// Read a characteristic value, failing with `ReadTimeout` if the peripheral
/// does not answer in time.
pub async fn read<C: GattCharacteristic>(characteristic: &C, limit: Duration) -> Result<Vec<u8>> {
    debug!("Reading characteristic {}", characteristic.uuid());
    match timeout(limit, characteristic.read()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::ReadTimeout),
    }
}

/// Write with response, failing with `WriteTimeout` if no confirmation
/// arrives in time.
pub async fn write<C: GattCharacteristic>(
    characteristic: &C,
    value: &[u8],
    limit: Duration,
) -> Result<()> {
    debug!(
        "Writing {} bytes to characteristic {}",
        value.len(),
        characteristic.uuid()
    );
    match timeout(limit, characteristic.write(value, false)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::WriteTimeout),
    }
}
