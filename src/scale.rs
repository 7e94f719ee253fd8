use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::command_queue::CommandQueue;
use crate::config::{AutoOff, ScaleConfig};
use crate::constants::{AllowedUnits, Unit};
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::state::{DeviceState, SessionState};
use crate::transport::Transport;

/// Settings last confirmed by a successful write.
#[derive(Debug, Clone, Copy)]
struct Settings {
    allowed_units: AllowedUnits,
    auto_off: AutoOff,
}

/// Resolves once a queued command has been written, or failed.
///
/// Dropping it does not cancel the command. A command that panics resolves to
/// [`Error::CommandAborted`].
#[must_use = "the command runs regardless, but its result is lost"]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::CommandAborted)))
    }
}

/// A connected ENS-C551S session.
pub struct Scale {
    protocol: Arc<Protocol>,
    queue: Arc<CommandQueue>,
    config: ScaleConfig,
    settings: Arc<Mutex<Settings>>,
    updates: Mutex<watch::Receiver<DeviceState>>,
    hardware_revision: String,
    software_revision: String,
    notifications: JoinHandle<()>,
}

impl Scale {
    /// Connects, powers the scale on, applies `config` and waits for the first
    /// weight report.
    pub async fn connect(transport: Arc<dyn Transport>, config: ScaleConfig) -> Result<Self> {
        let protocol = Arc::new(Protocol::new(transport));
        protocol.connect().await?;

        let setup = async {
            let hardware_revision = protocol.hardware_revision().await?;
            let software_revision = protocol.software_revision().await?;
            let updates = protocol.state().subscribe();
            let notifications = protocol.start_notify().await?;
            Ok::<_, Error>((hardware_revision, software_revision, updates, notifications))
        };
        let (hardware_revision, software_revision, updates, notifications) = match setup.await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(e) = protocol.disconnect().await {
                    warn!("disconnect after failed setup: {e}");
                }
                return Err(e);
            }
        };
        info!(%hardware_revision, %software_revision, "connected to scale");

        let scale = Scale {
            protocol,
            queue: Arc::new(CommandQueue::new()),
            settings: Arc::new(Mutex::new(Settings {
                allowed_units: config.allowed_units,
                auto_off: config.auto_off,
            })),
            config,
            updates: Mutex::new(updates),
            hardware_revision,
            software_revision,
            notifications,
        };

        if let Err(e) = scale.start().await {
            if let Err(e) = scale.disconnect().await {
                warn!("disconnect after failed start: {e}");
            }
            return Err(e);
        }
        Ok(scale)
    }

    async fn start(&self) -> Result<()> {
        self.protocol.power_on().await?;
        let auto_off = self.set_auto_off(self.config.auto_off)?;
        let allowed_units = self.set_allowed_units(self.config.allowed_units)?;
        auto_off.await?;
        allowed_units.await?;

        timeout(self.config.first_update_timeout, self.wait())
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    /// Drains queued commands, then drops the link.
    pub async fn disconnect(self) -> Result<()> {
        self.queue.close().await;
        let result = self.protocol.disconnect().await;
        self.notifications.abort();
        info!("disconnected from scale");
        result
    }

    fn submit<Fut>(&self, what: &'static str, work: Fut) -> Result<Completion>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.queue.enqueue(async move {
            let result = work.await;
            if let Err(e) = &result {
                warn!("{what} failed: {e}");
            }
            let _ = tx.send(result);
        })?;
        Ok(Completion { rx })
    }

    pub fn tare(&self) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        self.submit("tare", async move { protocol.tare().await })
    }

    /// Asks the scale to power off; it answers with a sleep notification.
    pub fn sleep(&self) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        self.submit("sleep", async move { protocol.sleep().await })
    }

    pub fn request_weight(&self) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        self.submit("weight request", async move { protocol.request_weight().await })
    }

    pub fn set_unit(&self, unit: Unit) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        self.submit("set unit", async move { protocol.set_unit(unit).await })
    }

    pub fn set_allowed_units(&self, units: AllowedUnits) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        let settings = Arc::clone(&self.settings);
        self.submit("set allowed units", async move {
            protocol.set_allowed_units(units).await?;
            settings.lock().await.allowed_units = units;
            Ok(())
        })
    }

    pub fn set_auto_off(&self, auto_off: AutoOff) -> Result<Completion> {
        let protocol = Arc::clone(&self.protocol);
        let settings = Arc::clone(&self.settings);
        let queue = Arc::downgrade(&self.queue);
        let period = self.config.keepalive_period;
        let keepalive = self.config.keepalive_timeout;

        self.submit("set auto-off", async move {
            let queue = queue.upgrade().ok_or(Error::QueueClosed)?;
            match auto_off {
                AutoOff::Never => {
                    protocol.set_timeout(keepalive).await?;
                    queue.set_periodic(
                        move || {
                            let protocol = Arc::clone(&protocol);
                            async move {
                                if let Err(e) = protocol.set_timeout(keepalive).await {
                                    warn!("keep-alive failed: {e}");
                                }
                            }
                        },
                        period,
                    )?;
                }
                AutoOff::After(seconds) => {
                    queue.cancel_periodic();
                    protocol.set_timeout(seconds).await?;
                }
            }
            settings.lock().await.auto_off = auto_off;
            Ok(())
        })
    }

    /// Waits for the next snapshot. Snapshots published since the previous call
    /// count, so nothing is missed between calls.
    pub async fn wait(&self) -> Result<DeviceState> {
        let mut updates = self.updates.lock().await;
        updates.changed().await.map_err(|_| Error::NotConnected)?;
        let state = *updates.borrow_and_update();
        Ok(state)
    }

    pub fn state(&self) -> DeviceState {
        self.protocol.state().current()
    }

    pub fn session(&self) -> SessionState {
        self.protocol.state().session()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.protocol.state().subscribe_session()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_stable(&self) -> bool {
        self.state().stable
    }

    /// Display unit as last confirmed by the scale.
    pub fn unit(&self) -> Unit {
        self.protocol.state().unit()
    }

    /// Latest weight in grams.
    pub fn weight(&self) -> f64 {
        self.state().weight
    }

    /// Asks the link itself rather than the last snapshot.
    pub async fn link_connected(&self) -> bool {
        self.protocol.is_connected().await
    }

    pub async fn allowed_units(&self) -> AllowedUnits {
        self.settings.lock().await.allowed_units
    }

    pub async fn auto_off(&self) -> AutoOff {
        self.settings.lock().await.auto_off
    }

    pub fn hardware_revision(&self) -> &str {
        &self.hardware_revision
    }

    pub fn software_revision(&self) -> &str {
        &self.software_revision
    }
}

impl Drop for Scale {
    fn drop(&mut self) {
        self.notifications.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{Command, Sign};
    use crate::decoding::tests::weight_frame;
    use crate::decoding::Frame;
    use crate::encoding::{encode, Request};
    use crate::transport::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn requests(transport: &MockTransport) -> Vec<Request> {
        transport
            .commands()
            .iter()
            .map(|bytes| Request::try_from(&Frame::parse_checked(bytes).unwrap()).unwrap())
            .collect()
    }

    async fn connected(config: ScaleConfig) -> (Arc<MockTransport>, Scale) {
        let transport = Arc::new(MockTransport::new());
        transport.notify(weight_frame(Sign::Positive, 1000, Unit::Gram, true));
        let scale = Scale::connect(transport.clone(), config).await.unwrap();
        (transport, scale)
    }

    #[tokio::test]
    async fn connect_powers_on_and_applies_config() {
        let (transport, scale) = connected(ScaleConfig::default()).await;

        assert_eq!(scale.hardware_revision(), "1.0.2");
        assert_eq!(scale.software_revision(), "3.1.7");
        assert_eq!(scale.session(), SessionState::Active);
        assert!(scale.is_connected());
        assert!(scale.is_stable());
        assert_eq!(scale.weight(), 100.0);
        assert!(scale.link_connected().await);
        assert_eq!(
            requests(&transport),
            vec![
                Request::PowerOn,
                Request::SetTimeout(30),
                Request::EnableUnits(AllowedUnits::all()),
            ]
        );

        scale.disconnect().await.unwrap();
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_without_a_weight_report() {
        let transport = Arc::new(MockTransport::new());
        let config = ScaleConfig {
            first_update_timeout: Duration::from_secs(2),
            ..ScaleConfig::default()
        };

        let result = Scale::connect(transport.clone(), config).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_written_in_submission_order() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        transport.set_write_delay(Duration::from_millis(50));

        let tare = scale.tare().unwrap();
        let unit = scale.set_unit(Unit::Ounce).unwrap();
        let weight = scale.request_weight().unwrap();
        unit.await.unwrap();
        tare.await.unwrap();
        weight.await.unwrap();

        assert_eq!(
            &requests(&transport)[3..],
            &[Request::Tare, Request::SetUnit(Unit::Ounce), Request::WeightRequest]
        );
        scale.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_reaches_the_caller_and_keeps_the_cache() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        transport.fail_writes(true);

        let result = scale.set_allowed_units(AllowedUnits::GRAM).unwrap().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(scale.allowed_units().await, AllowedUnits::all());

        transport.fail_writes(false);
        scale
            .set_allowed_units(AllowedUnits::GRAM | AllowedUnits::ML_WATER)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            scale.allowed_units().await,
            AllowedUnits::GRAM | AllowedUnits::ML_WATER
        );
        scale.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn unit_follows_acknowledged_writes_and_reports() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        assert_eq!(scale.unit(), Unit::Gram);

        transport.fail_writes(true);
        let result = scale.set_unit(Unit::Ounce).unwrap().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(scale.unit(), Unit::Gram);

        transport.fail_writes(false);
        scale.set_unit(Unit::Ounce).unwrap().await.unwrap();
        assert_eq!(scale.unit(), Unit::Ounce);
        assert_eq!(scale.state().unit, Unit::Gram);

        // a unit picked with the button on the scale shows up with the next report
        transport.notify(weight_frame(Sign::Positive, 300, Unit::MilliliterMilk, true));
        let state = scale.wait().await.unwrap();
        assert_eq!(state.unit, Unit::MilliliterMilk);
        assert_eq!(scale.unit(), Unit::MilliliterMilk);

        scale.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn lost_link_ends_the_session() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        let mut sessions = scale.subscribe_session();
        assert_eq!(*sessions.borrow_and_update(), SessionState::Active);

        transport.end_notifications();
        let state = scale.wait().await.unwrap();
        assert!(!state.connected);
        assert_eq!(state.weight, 100.0);
        assert!(!scale.is_connected());

        sessions.changed().await.unwrap();
        assert_eq!(*sessions.borrow_and_update(), SessionState::Disconnected);
        assert_eq!(scale.session(), SessionState::Disconnected);

        scale.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn completion_without_a_result_reports_an_aborted_command() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(tx);
        let result = Completion { rx }.await;
        assert!(matches!(result, Err(Error::CommandAborted)));
    }

    #[tokio::test]
    async fn dropping_the_scale_stops_the_notification_pump() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        let protocol = Arc::clone(&scale.protocol);
        assert_eq!(Arc::strong_count(&protocol), 3);

        drop(scale);
        for _ in 0..10 {
            if Arc::strong_count(&protocol) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(Arc::strong_count(&protocol), 1);
        assert_eq!(transport.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_auto_off_keeps_the_scale_awake() {
        let config = ScaleConfig {
            auto_off: AutoOff::Never,
            ..ScaleConfig::default()
        };
        let (transport, scale) = connected(config).await;
        assert_eq!(scale.auto_off().await, AutoOff::Never);

        tokio::time::sleep(Duration::from_secs(300)).await;
        let keepalives = requests(&transport)
            .into_iter()
            .filter(|r| *r == Request::SetTimeout(300))
            .count();
        // one at setup, then at 140 s and 280 s
        assert_eq!(keepalives, 3);

        scale.set_auto_off(AutoOff::After(45)).unwrap().await.unwrap();
        let before = transport.commands().len();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.commands().len(), before);
        assert_eq!(requests(&transport).last(), Some(&Request::SetTimeout(45)));
        assert_eq!(scale.auto_off().await, AutoOff::After(45));

        scale.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn wait_reports_each_new_snapshot() {
        let (transport, scale) = connected(ScaleConfig::default()).await;

        transport.notify(weight_frame(Sign::Negative, 250, Unit::Ounce, false));
        let state = scale.wait().await.unwrap();
        assert_eq!(state.unit, Unit::Ounce);
        assert!(!state.stable);
        assert_eq!(state.weight, -2.5 * (5000.0 / 176.35));

        transport.notify(encode(0, Command::Sleep, &[]));
        let state = scale.wait().await.unwrap();
        assert!(!state.connected);
        assert!(!scale.is_connected());
        assert_eq!(scale.session(), SessionState::Disconnected);

        scale.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_drains_pending_commands() {
        let (transport, scale) = connected(ScaleConfig::default()).await;
        transport.set_write_delay(Duration::from_millis(100));

        let _ = scale.tare().unwrap();
        let _ = scale.set_unit(Unit::MilliliterMilk).unwrap();
        scale.disconnect().await.unwrap();

        assert_eq!(
            &requests(&transport)[3..],
            &[Request::Tare, Request::SetUnit(Unit::MilliliterMilk)]
        );
        assert_eq!(transport.disconnects(), 1);
    }
}
