//! Keeps the last known state of one device fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::capability::light::LightCommand;
use crate::capability::light::LightState;
use crate::device::Device;
use crate::device::DeviceState;
use crate::device::Error;
use crate::transport::Connector;
use crate::transport::TcpConnector;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity for the poller→caller event channel
pub const EVENT_CHANNEL_SIZE: usize = 64;

/// Outcome of one poll, published by a spawned poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Updated { name: String, state: DeviceState },
    Failed { name: String, error: String },
}

/// Polls one device and owns its cached [`DeviceState`].
///
/// The cache is only written from successful queries, or optimistically after
/// a gang change the device accepted.
pub struct Poller<C: Connector = TcpConnector> {
    name: String,
    device: Arc<Device<C>>,
    interval: Duration,
    state: Arc<Mutex<DeviceState>>,
}

impl<C: Connector> Clone for Poller<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            device: self.device.clone(),
            interval: self.interval,
            state: self.state.clone(),
        }
    }
}

impl<C: Connector + 'static> Poller<C> {
    pub fn new(name: impl Into<String>, device: Arc<Device<C>>) -> Self {
        Self {
            name: name.into(),
            device,
            interval: DEFAULT_POLL_INTERVAL,
            state: Arc::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<Device<C>> {
        &self.device
    }

    /// Copy of the cached state.
    pub async fn snapshot(&self) -> DeviceState {
        self.state.lock().await.clone()
    }

    /// Cached state read as a light, once the device's features are known.
    pub async fn light_state(&self) -> Option<LightState> {
        let features = self.device.light_features().ok()?;
        Some(LightState::from_attributes(&*self.state.lock().await, &features))
    }

    /// Fetch the current state, handshaking first if the identity or its
    /// attribute list is still missing.
    pub async fn poll_once(&self) -> Result<DeviceState, Error> {
        let needs_handshake = self
            .device
            .identity()
            .is_none_or(|identity| identity.dpids().is_empty());
        if needs_handshake {
            debug!("[{}] Device info missing, querying device", self.name);
            // A failed handshake does not stop the state query.
            if let Err(e) = self.device.try_refresh_identity().await {
                warn!("[{}] Device info query failed: {}", self.name, e);
            }
        }

        let state = self.device.try_query_state().await?;
        *self.state.lock().await = state.clone();
        Ok(state)
    }

    /// Poll on every tick and publish the outcome until the receiver is
    /// dropped.
    pub fn spawn(&self, events: mpsc::Sender<PollEvent>) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move {
            info!(
                "[{}] Polling {} every {:?}",
                poller.name,
                poller.device.address(),
                poller.interval
            );
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let event = match poller.poll_once().await {
                    Ok(state) => PollEvent::Updated {
                        name: poller.name.clone(),
                        state,
                    },
                    Err(e) => {
                        warn!("[{}] Failed to update device state: {}", poller.name, e);
                        PollEvent::Failed {
                            name: poller.name.clone(),
                            error: e.to_string(),
                        }
                    }
                };
                if events.send(event).await.is_err() {
                    debug!("[{}] Event receiver dropped, stopping", poller.name);
                    break;
                }
            }
        })
    }

    /// Switch one gang, using and updating the cached bitmask.
    pub async fn set_gang(&self, gang: u8, on: bool) -> bool {
        let mut state = self.state.lock().await;
        self.device.set_gang(&mut state, gang, on).await
    }

    pub async fn turn_on_light(&self, command: &LightCommand) -> bool {
        let ok = self.device.turn_on_light(command).await;
        if ok {
            self.refresh().await;
        }
        ok
    }

    pub async fn turn_off_light(&self) -> bool {
        let ok = self.device.turn_off_light().await;
        if ok {
            self.refresh().await;
        }
        ok
    }

    /// Re-read the state after a command; the device may not apply every
    /// value as sent.
    async fn refresh(&self) {
        if let Err(e) = self.poll_once().await {
            debug!("[{}] Refresh after command failed: {}", self.name, e);
        }
    }
}
