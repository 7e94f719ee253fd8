use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::stream::{Stream, StreamExt};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::constants::{ADV_MANUFACTURER_DATA, ADV_MANUFACTURER_ID};
use crate::error::{Error, Result};
use crate::transport::BleTransport;

pub struct ScaleScanner {
    manager: Manager,
}

impl ScaleScanner {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    /// Yields each scale seen within `timeout` once, then stops scanning.
    pub async fn start_scan(
        &self,
        timeout: Duration,
    ) -> Result<Pin<Box<dyn Stream<Item = BleTransport> + Send>>> {
        let adapters = self.manager.adapters().await?;
        let central = Arc::new(adapters.into_iter().next().ok_or(Error::NoAdapter)?);

        central.start_scan(ScanFilter::default()).await?;

        self.create_scale_stream(central, timeout).await
    }

    async fn create_scale_stream(
        &self,
        central: Arc<Adapter>,
        timeout: Duration,
    ) -> Result<Pin<Box<dyn Stream<Item = BleTransport> + Send>>> {
        let mut events = central.events().await?;

        let stream = stream! {
            let deadline = sleep(timeout);
            tokio::pin!(deadline);
            let mut seen = HashSet::new();

            loop {
                let event = tokio::select! {
                    _ = &mut deadline => None,
                    event = events.next() => event,
                };
                let Some(event) = event else { break };

                let id = match event {
                    CentralEvent::DeviceDiscovered(id) => id,
                    CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                if seen.contains(&id) {
                    continue;
                }
                let Ok(peripheral) = central.peripheral(&id).await else { continue };
                if Self::is_scale(&peripheral).await {
                    debug!(address = %peripheral.address(), "found scale");
                    seen.insert(id);
                    yield BleTransport::new(peripheral);
                }
            }

            if let Err(e) = central.stop_scan().await {
                warn!("failed to stop scanning: {e}");
            }
        };

        Ok(Box::pin(stream))
    }

    async fn is_scale(peripheral: &impl Peripheral) -> bool {
        peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .map_or(false, |props| matches_advertisement(&props.manufacturer_data))
    }
}

/// The scale advertises exactly one manufacturer-data record with a fixed payload.
pub fn matches_advertisement(manufacturer_data: &HashMap<u16, Vec<u8>>) -> bool {
    manufacturer_data.len() == 1
        && manufacturer_data
            .get(&ADV_MANUFACTURER_ID)
            .is_some_and(|data| data.as_slice() == ADV_MANUFACTURER_DATA)
}
