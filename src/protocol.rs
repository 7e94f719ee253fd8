//! Frames commands onto the link and turns notifications into [`DeviceState`] snapshots.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{AllowedUnits, Unit};
use crate::decoding::Notification;
use crate::encoding::{Request, FIRST_SEQUENCE};
use crate::error::Result;
use crate::state::{DeviceState, SessionState, StateCell};
use crate::transport::{CharacteristicId, Transport};

pub struct Protocol {
    transport: Arc<dyn Transport>,
    sequence: Mutex<u8>,
    state: StateCell,
}

impl Protocol {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sequence: Mutex::new(FIRST_SEQUENCE),
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await?;
        self.state.transition(SessionState::Connected);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let result = self.transport.disconnect().await;
        self.mark_disconnected();
        result
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    pub async fn hardware_revision(&self) -> Result<String> {
        self.read_string(CharacteristicId::HardwareRevision).await
    }

    pub async fn software_revision(&self) -> Result<String> {
        self.read_string(CharacteristicId::SoftwareRevision).await
    }

    async fn read_string(&self, characteristic: CharacteristicId) -> Result<String> {
        let bytes = self.transport.read(characteristic).await?;
        let text = String::from_utf8(bytes)?;
        Ok(text.trim_end_matches('\0').to_string())
    }

    /// Subscribes to notifications and decodes them on a background task until the
    /// stream ends.
    pub async fn start_notify(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut notifications = self.transport.subscribe(CharacteristicId::Notify).await?;
        self.state.transition(SessionState::Notifying);

        let me = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(frame) = notifications.next().await {
                me.handle_notification(&frame).await;
            }
            debug!("notification stream ended");
            me.mark_disconnected();
        }))
    }

    pub async fn handle_notification(&self, frame: &[u8]) {
        let notification = match Notification::try_from(frame) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("discarding malformed notification: {e}");
                return;
            }
        };
        notification.log();

        match notification {
            Notification::Sleep => {
                info!("scale is powering off");
                self.mark_disconnected();
                if let Err(e) = self.transport.disconnect().await {
                    warn!("disconnect after sleep failed: {e}");
                }
            }
            Notification::Weight(reading) => {
                if self.state.session() == SessionState::Disconnected {
                    debug!("ignoring weight outside of a session");
                    return;
                }
                let state = DeviceState::from(&reading);
                state.log();
                self.state.set_unit(reading.unit);
                self.state.publish(state);
                self.state.transition(SessionState::Active);
            }
            Notification::Unknown { .. } => {}
        }
    }

    fn mark_disconnected(&self) {
        let current = self.state.current();
        if current.connected {
            self.state.publish(DeviceState {
                connected: false,
                ..current
            });
        }
        self.state.transition(SessionState::Disconnected);
    }

    /// Frames and writes one request. The sequence number only advances once the
    /// write went through.
    pub async fn send(&self, request: Request) -> Result<()> {
        let mut sequence = self.sequence.lock().await;
        let frame = request.encode(*sequence);
        self.transport.write(CharacteristicId::Command, &frame).await?;
        debug!(seq = *sequence, ?request, "sent {:02x?}", frame);
        *sequence = sequence.wrapping_add(1);
        Ok(())
    }

    pub async fn power_on(&self) -> Result<()> {
        self.send(Request::PowerOn).await
    }

    pub async fn sleep(&self) -> Result<()> {
        self.send(Request::Sleep).await
    }

    pub async fn tare(&self) -> Result<()> {
        self.send(Request::Tare).await
    }

    pub async fn request_weight(&self) -> Result<()> {
        self.send(Request::WeightRequest).await
    }

    pub async fn set_timeout(&self, seconds: u16) -> Result<()> {
        self.send(Request::SetTimeout(seconds)).await
    }

    /// Switches the display unit. The cached unit only follows once the write went through.
    pub async fn set_unit(&self, unit: Unit) -> Result<()> {
        self.send(Request::SetUnit(unit)).await?;
        self.state.set_unit(unit);
        Ok(())
    }

    pub async fn set_allowed_units(&self, units: AllowedUnits) -> Result<()> {
        self.send(Request::EnableUnits(units)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{Command, Sign};
    use crate::decoding::tests::weight_frame;
    use crate::decoding::Frame;
    use crate::encoding::encode;
    use crate::error::Error;
    use crate::transport::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn protocol() -> (Arc<MockTransport>, Arc<Protocol>) {
        let transport = Arc::new(MockTransport::new());
        let protocol = Arc::new(Protocol::new(transport.clone()));
        (transport, protocol)
    }

    #[tokio::test]
    async fn sequence_starts_at_one_and_increments() {
        let (transport, protocol) = protocol();
        protocol.power_on().await.unwrap();
        protocol.tare().await.unwrap();
        protocol.set_unit(Unit::Gram).await.unwrap();

        let sequences: Vec<u8> = transport
            .commands()
            .iter()
            .map(|bytes| Frame::parse_checked(bytes).unwrap().sequence())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sequence_wraps_after_255() {
        let (transport, protocol) = protocol();
        for _ in 0..256 {
            protocol.request_weight().await.unwrap();
        }
        let commands = transport.commands();
        assert_eq!(Frame::parse_checked(&commands[254]).unwrap().sequence(), 255);
        assert_eq!(Frame::parse_checked(&commands[255]).unwrap().sequence(), 0);
    }

    #[tokio::test]
    async fn failed_write_does_not_consume_a_sequence_number() {
        let (transport, protocol) = protocol();
        transport.fail_writes(true);
        assert!(matches!(protocol.tare().await, Err(Error::Transport(_))));

        transport.fail_writes(false);
        protocol.tare().await.unwrap();
        let commands = transport.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(Frame::parse_checked(&commands[0]).unwrap().sequence(), 1);
    }

    #[tokio::test]
    async fn typed_commands_reach_the_wire() {
        let (transport, protocol) = protocol();
        protocol.set_timeout(45).await.unwrap();
        protocol.set_allowed_units(AllowedUnits::GRAM).await.unwrap();
        protocol.sleep().await.unwrap();

        let requests: Vec<Request> = transport
            .commands()
            .iter()
            .map(|bytes| Request::try_from(&Frame::parse_checked(bytes).unwrap()).unwrap())
            .collect();
        assert_eq!(
            requests,
            vec![
                Request::SetTimeout(45),
                Request::EnableUnits(AllowedUnits::GRAM),
                Request::Sleep,
            ]
        );
    }

    #[tokio::test]
    async fn reads_revision_strings() {
        let (_, protocol) = protocol();
        assert_eq!(protocol.hardware_revision().await.unwrap(), "1.0.2");
        assert_eq!(protocol.software_revision().await.unwrap(), "3.1.7");
    }

    #[tokio::test]
    async fn weight_notification_activates_the_session() {
        let (transport, protocol) = protocol();
        protocol.connect().await.unwrap();
        let _pump = protocol.start_notify().await.unwrap();
        assert_eq!(protocol.state().session(), SessionState::Notifying);

        let mut updates = protocol.state().subscribe();
        transport.notify(weight_frame(Sign::Positive, 1000, Unit::MilliliterWater, true));
        tokio::time::timeout(Duration::from_secs(1), updates.changed())
            .await
            .unwrap()
            .unwrap();
        let state = *updates.borrow();

        assert_eq!(
            state,
            DeviceState {
                connected: true,
                stable: true,
                unit: Unit::MilliliterWater,
                weight: 100.0,
            }
        );
        assert_eq!(protocol.state().session(), SessionState::Active);
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_leave_state_alone() {
        let (_, protocol) = protocol();
        protocol.connect().await.unwrap();
        protocol.start_notify().await.unwrap();
        protocol
            .handle_notification(&weight_frame(Sign::Negative, 500, Unit::Gram, false))
            .await;
        let before = protocol.state().current();

        protocol
            .handle_notification(&encode(3, Command::Tare, &[]))
            .await;
        protocol.handle_notification(&[0xa5, 0x22, 0x01]).await;
        let mut bad_unit = weight_frame(Sign::Positive, 1, Unit::Gram, true);
        bad_unit[13] = 0x7f;
        protocol.handle_notification(&bad_unit).await;

        assert_eq!(protocol.state().current(), before);
        assert_eq!(before.weight, -50.0);
    }

    #[tokio::test]
    async fn sleep_notification_ends_the_session() {
        let (transport, protocol) = protocol();
        protocol.connect().await.unwrap();
        protocol.start_notify().await.unwrap();
        protocol
            .handle_notification(&weight_frame(Sign::Positive, 20, Unit::Gram, true))
            .await;

        protocol
            .handle_notification(&encode(9, Command::Sleep, &[]))
            .await;

        let state = protocol.state().current();
        assert!(!state.connected);
        assert_eq!(state.weight, 2.0);
        assert_eq!(protocol.state().session(), SessionState::Disconnected);
        assert_eq!(transport.disconnects(), 1);

        // nothing moves once the session is over
        protocol
            .handle_notification(&weight_frame(Sign::Positive, 90, Unit::Gram, true))
            .await;
        assert_eq!(protocol.state().current(), state);
    }

    #[tokio::test]
    async fn ended_stream_drops_an_active_session() {
        let (transport, protocol) = protocol();
        protocol.connect().await.unwrap();
        let pump = protocol.start_notify().await.unwrap();
        protocol
            .handle_notification(&weight_frame(Sign::Positive, 40, Unit::Gram, true))
            .await;
        assert_eq!(protocol.state().session(), SessionState::Active);

        transport.end_notifications();
        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(protocol.state().session(), SessionState::Disconnected);
        let state = protocol.state().current();
        assert!(!state.connected);
        assert_eq!(state.weight, 4.0);
    }
}
