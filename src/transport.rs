//! The link to the scale: four GATT characteristics behind a small trait.

use async_trait::async_trait;
use btleplug::api::{BDAddr, CharPropFlags, Characteristic, Peripheral, WriteType};
use btleplug::platform::Peripheral as PeripheralStruct;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::constants::{
    HW_REV_CHARACTERISTIC_UUID, RX_CHARACTERISTIC_UUID, SW_REV_CHARACTERISTIC_UUID,
    TX_CHARACTERISTIC_UUID,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    HardwareRevision,
    SoftwareRevision,
    /// Command frames are written here.
    Command,
    /// Notification frames arrive here.
    Notify,
}

impl CharacteristicId {
    pub fn uuid(&self) -> Uuid {
        match *self {
            CharacteristicId::HardwareRevision => HW_REV_CHARACTERISTIC_UUID,
            CharacteristicId::SoftwareRevision => SW_REV_CHARACTERISTIC_UUID,
            CharacteristicId::Command => TX_CHARACTERISTIC_UUID,
            CharacteristicId::Notify => RX_CHARACTERISTIC_UUID,
        }
    }
}

pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// What the driver needs from the wireless link. Delivery is assumed reliable and ordered.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn read(&self, characteristic: CharacteristicId) -> Result<Vec<u8>>;

    async fn write(&self, characteristic: CharacteristicId, bytes: &[u8]) -> Result<()>;

    /// Enables notifications and returns the values as they arrive. The stream
    /// ends when the link goes away.
    async fn subscribe(&self, characteristic: CharacteristicId) -> Result<NotificationStream>;
}

pub struct BleTransport {
    peripheral: PeripheralStruct,
}

impl BleTransport {
    pub fn new(peripheral: PeripheralStruct) -> Self {
        Self { peripheral }
    }

    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    fn characteristic(&self, id: CharacteristicId) -> Result<Characteristic> {
        let uuid = id.uuid();
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(Error::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match timeout(Duration::from_millis(200), self.peripheral.is_connected()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(_)) => false,
            Err(_) => false,
        }
    }

    async fn read(&self, characteristic: CharacteristicId) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: CharacteristicId, bytes: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral.write(&characteristic, bytes, write_type).await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: CharacteristicId) -> Result<NotificationStream> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        let notifications = self.peripheral.notifications().await?;
        Ok(notifications
            .filter_map(move |notification| {
                future::ready((notification.uuid == uuid).then_some(notification.value))
            })
            .boxed())
    }
}
