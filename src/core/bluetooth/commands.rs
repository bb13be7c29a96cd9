//! SwitchBot command channel
//! A command is one write to the command characteristic answered by one
//! notification on the notify characteristic.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::timeout;

use crate::core::bluetooth::characteristics::CharacteristicSet;
use crate::core::bluetooth::gatt;
use crate::core::bluetooth::notification::NotificationSink;
use crate::core::bluetooth::peripheral::GattCharacteristic;
use crate::core::error::{Error, Result};

/// Command channel on top of a connected link
pub struct CommandChannel {
    sink: Arc<NotificationSink>,
    write_timeout: Duration,
    command_timeout: Duration,
}

impl CommandChannel {
    pub fn new(sink: Arc<NotificationSink>, write_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            sink,
            write_timeout,
            command_timeout,
        }
    }

    /// Write `request` and wait for the response notification.
    ///
    /// The response waiter is registered before the write is issued rather
    /// than after it is confirmed, so a notification that beats the write
    /// confirmation still resolves this exchange.
    ///
    /// Only one exchange may be outstanding; a second one fails with `Busy`
    /// instead of taking over the first one's response.
    pub async fn exchange<C: GattCharacteristic>(
        &self,
        characteristics: &CharacteristicSet<C>,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        if request.is_empty() {
            return Err(Error::InvalidArgument("command must not be empty".into()));
        }

        let response = self.sink.register()?;

        info!("Sending command to device: {:02x?}", request);
        if let Err(e) = gatt::write(&characteristics.write, request, self.write_timeout).await {
            self.sink.clear();
            return Err(e);
        }

        match timeout(self.command_timeout, response).await {
            Ok(Ok(result)) => {
                debug!("Command response: {:02x?}", result);
                result
            }
            // waiter dropped without an answer
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                warn!("No response within {:?}", self.command_timeout);
                self.sink.clear();
                Err(Error::CommandTimeout)
            }
        }
    }
}
