//! The mutation authority.
//!
//! One [`Engine`] task owns the [`MachineRegistry`] and the
//! [`NotificationCoalescer`]. Telemetry, operator commands and ticker fires
//! all reach it as intents on a single queue and are applied one at a time,
//! so there is no locking and every snapshot is consistent. Deliveries run as
//! a boxed future polled by the same loop; while one is outstanding the loop
//! keeps applying intents and ticks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use laundry_proto::{Artifact, ChatTarget, Delivered, Delivery, DeliveryError, MachineClass};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalescer::{Cycle, NotificationCoalescer};
use crate::config::LaundryConfig;
use crate::registry::{BankLayout, MachineRegistry, RegistryError, RegistrySnapshot};
use crate::render::{Render, StatusRenderer};
use crate::telemetry::{TelemetryBridge, TelemetryEvent, TopicScheme};
use crate::ticker::Ticker;

type DeliveryFuture = BoxFuture<'static, Result<Delivered, DeliveryError>>;

/// Errors surfaced to callers of an [`EngineHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Stopped,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Work queued for the engine.
#[derive(Debug)]
pub(crate) enum Intent {
    Telemetry(TelemetryEvent),
    Override {
        class: MachineClass,
        slot: u32,
        minutes: i64,
        reply: oneshot::Sender<Result<u32, RegistryError>>,
    },
    Repost {
        target: ChatTarget,
    },
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub layout: BankLayout,
    pub tick_interval: Duration,
    pub delivery_timeout: Duration,
    pub default_target: Option<ChatTarget>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&LaundryConfig::default())
    }
}

impl From<&LaundryConfig> for EngineConfig {
    fn from(config: &LaundryConfig) -> Self {
        Self {
            layout: config.layout(),
            tick_interval: config.tick_interval(),
            delivery_timeout: config.delivery_timeout(),
            default_target: config.default_target(),
        }
    }
}

/// Cloneable front door to a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    intents: mpsc::UnboundedSender<Intent>,
    layout: BankLayout,
}

impl EngineHandle {
    pub fn layout(&self) -> BankLayout {
        self.layout
    }

    /// A bridge that feeds decoded telemetry into this engine.
    pub fn telemetry_bridge(&self, scheme: TopicScheme) -> TelemetryBridge {
        TelemetryBridge::new(scheme, self.layout, self.intents.clone())
    }

    /// Operator override of a slot's remaining minutes.
    ///
    /// Returns the value now stored. Rejections leave the registry untouched.
    pub async fn override_remaining(
        &self,
        class: MachineClass,
        slot: u32,
        minutes: i64,
    ) -> Result<u32, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Intent::Override {
            class,
            slot,
            minutes,
            reply,
        })?;
        let stored = rx.await.map_err(|_| EngineError::Stopped)??;
        Ok(stored)
    }

    /// Posts a fresh status message to `target`; it becomes the live one.
    pub fn repost(&self, target: ChatTarget) -> Result<(), EngineError> {
        self.send(Intent::Repost { target })
    }

    /// Current state of every machine.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Intent::Snapshot { reply })?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.intents.is_closed()
    }

    fn send(&self, intent: Intent) -> Result<(), EngineError> {
        self.intents.send(intent).map_err(|_| EngineError::Stopped)
    }
}

enum Step {
    Stop,
    Outcome(Result<Delivered, DeliveryError>),
    Tick(u32),
    Intent(Intent),
    QueueClosed,
}

/// Single owner of machine state and the live status message.
pub struct Engine {
    registry: MachineRegistry,
    coalescer: NotificationCoalescer,
    ticker: Ticker,
    intents: mpsc::UnboundedReceiver<Intent>,
    intents_open: bool,
    delivery: Arc<dyn Delivery>,
    renderer: Arc<dyn Render>,
    delivery_timeout: Duration,
    in_flight: Option<DeliveryFuture>,
}

impl Engine {
    /// Builds an engine and its handle. Nothing runs until [`Engine::run`].
    ///
    /// Must be called within a Tokio runtime (the ticker is created here).
    pub fn new(config: EngineConfig, delivery: Arc<dyn Delivery>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            registry: MachineRegistry::new(config.layout),
            coalescer: NotificationCoalescer::new(config.default_target),
            ticker: Ticker::new(config.tick_interval),
            intents: rx,
            intents_open: true,
            delivery,
            renderer: Arc::new(StatusRenderer),
            delivery_timeout: config.delivery_timeout,
            in_flight: None,
        };
        let handle = EngineHandle {
            intents: tx,
            layout: config.layout,
        };
        (engine, handle)
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Render>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Runs until `cancel` fires. An outstanding delivery is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            washers = self.registry.layout().washers,
            dryers = self.registry.layout().dryers,
            tick = ?self.ticker.period(),
            "Engine started"
        );

        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Stop,
                outcome = next_outcome(&mut self.in_flight) => Step::Outcome(outcome),
                minutes = self.ticker.tick() => Step::Tick(minutes),
                intent = self.intents.recv(), if self.intents_open => match intent {
                    Some(intent) => Step::Intent(intent),
                    None => Step::QueueClosed,
                },
            };

            match step {
                Step::Stop => break,
                Step::Outcome(outcome) => self.coalescer.complete(outcome),
                Step::Tick(minutes) => self.decay(minutes),
                Step::Intent(intent) => self.apply(intent),
                Step::QueueClosed => {
                    debug!("All engine handles dropped, continuing on ticks only");
                    self.intents_open = false;
                }
            }
            self.pump();
        }

        if self.in_flight.take().is_some() {
            debug!("Dropping in-flight delivery on shutdown");
        }
        info!("Engine stopped");
    }

    fn decay(&mut self, minutes: u32) {
        if minutes == 0 {
            return;
        }
        let changes = self.registry.apply_decay(minutes);
        debug!(minutes, changed = changes.len(), "Applied decay");
        self.coalescer.observe(changes);
    }

    fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Telemetry(event) => {
                let minutes = event.directive.remaining_minutes();
                match self
                    .registry
                    .set_remaining(event.class, event.slot, i64::from(minutes))
                {
                    Ok(changes) => {
                        info!(
                            slot = %event.key(),
                            minutes,
                            changed = !changes.is_empty(),
                            "Telemetry applied"
                        );
                        self.coalescer.observe(changes);
                    }
                    Err(e) => warn!(slot = %event.key(), error = %e, "Dropping telemetry"),
                }
            }
            Intent::Override {
                class,
                slot,
                minutes,
                reply,
            } => {
                let result = self.registry.set_remaining(class, slot, minutes);
                let reply_value = match result {
                    Ok(changes) => {
                        info!(class = %class, slot, minutes, "Operator override applied");
                        self.coalescer.observe(changes);
                        self.registry.get(class, slot)
                    }
                    Err(e) => {
                        info!(class = %class, slot, minutes, error = %e, "Operator override rejected");
                        Err(e)
                    }
                };
                let _ = reply.send(reply_value);
            }
            Intent::Repost { target } => {
                info!(chat = %target, "Status repost requested");
                self.coalescer.request_repost(target);
            }
            Intent::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    /// Starts the next render/deliver cycle if the coalescer has one ready.
    fn pump(&mut self) {
        if !self.coalescer.is_idle() || !self.coalescer.has_pending_work() {
            return;
        }
        let snapshot = self.registry.snapshot();
        let Some(cycle) = self.coalescer.start(&snapshot) else {
            return;
        };
        match self.renderer.render(&snapshot) {
            Ok(artifact) => self.in_flight = Some(self.dispatch(cycle, artifact)),
            Err(e) => self
                .coalescer
                .complete(Err(DeliveryError::Render(e.to_string()))),
        }
    }

    fn dispatch(&self, cycle: Cycle, artifact: Artifact) -> DeliveryFuture {
        debug!(cycle = ?cycle, "Delivering status");
        let delivery = Arc::clone(&self.delivery);
        let limit = self.delivery_timeout;
        async move {
            let attempt = async {
                match cycle {
                    Cycle::Send(target) => delivery
                        .send(&target, &artifact)
                        .await
                        .map(Delivered::Sent),
                    Cycle::Edit(handle) => delivery
                        .edit(&handle, &artifact)
                        .await
                        .map(|()| Delivered::Edited),
                }
            };
            time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(DeliveryError::Timeout(limit)))
        }
        .boxed()
    }
}

/// Resolves with the in-flight delivery's outcome, or never if there is none.
fn next_outcome(
    in_flight: &mut Option<DeliveryFuture>,
) -> impl Future<Output = Result<Delivered, DeliveryError>> + '_ {
    async move {
        let Some(delivery) = in_flight.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = delivery.await;
        *in_flight = None;
        outcome
    }
}
