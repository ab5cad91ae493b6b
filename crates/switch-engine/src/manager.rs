//! Switch manager
//!
//! The manager owns the cryogenic routing tree and the pulse driver, and
//! is the only way to actuate hardware. Every mutating operation runs the
//! same bracket inside one lock-held critical section:
//!
//! 1. acquire the actuation lock
//! 2. power the amplifier down (acknowledged, or the operation aborts)
//! 3. unblock the pulser
//! 4. actuate, root to leaf
//! 5. recompute the snapshot
//! 6. restore the amplifier to its prior state
//! 7. block the pulser
//! 8. release the lock and broadcast the snapshot
//!
//! The lock covers exactly the hardware-touching section, so two
//! concurrent requests can never interleave their relay sequences. A
//! failure mid-walk keeps whatever was actuated (polarities are recorded
//! per completed flip, never rolled back), still runs the restore/block
//! epilogue and still broadcasts the as-actuated snapshot.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use relay_board::{RelayBoard, Verification};
use switch_tree::{Branch, Direction, RelayId, RoutingTree, Step, TreeError, TreeSnapshot};

use crate::amp::AmpProtector;
use crate::config::{EngineConfig, PulseMode};
use crate::controller::{FunctionGeneratorDriver, PulseDriver, SimpleRelayDriver};
use crate::error::EngineError;
use crate::events::SwitchEvent;
use crate::generator::{build_generator, PulseGen};

/// Everything that must be serialized: tree state, the driver and the
/// amplifier guard live and die together under one lock.
struct Actuation<T> {
    tree: RoutingTree,
    driver: PulseDriver<T>,
    amp: AmpProtector,
}

impl<T> Actuation<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Prologue: amplifier off (acknowledged), pulser unblocked
    async fn begin(&mut self, verification: &Verification) -> Result<(), EngineError> {
        self.amp.shutdown().await?;
        self.driver.unblock_pulser(verification).await
    }

    /// Epilogue: amplifier restored, pulser blocked
    ///
    /// Both always run; the first failure is reported.
    async fn finish(&mut self, verification: &Verification) -> Result<(), EngineError> {
        let restore = self.amp.restore().await;
        let block = self.driver.block_pulser(verification).await;
        restore?;
        block
    }

    /// Flip along a precomputed path, skipping already-correct relays
    /// when memory mode allows it
    async fn walk_steps(
        &mut self,
        steps: &[Step],
        settle: Duration,
        remember: bool,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        for step in steps {
            sleep(settle).await;

            let node = self
                .tree
                .node(step.relay)
                .ok_or(TreeError::UnknownRelay(step.relay))?;
            let desired = step.direction.selects_left();
            if node.polarity == desired && remember {
                debug!("{} already in desired state", step.relay);
                continue;
            }

            match step.direction {
                Direction::Left => {
                    self.driver
                        .flip_left(step.relay.as_u8(), verification)
                        .await?
                }
                Direction::Right => {
                    self.driver
                        .flip_right(step.relay.as_u8(), verification)
                        .await?
                }
            }
            // Recorded only after the flip succeeded, so a partial
            // failure leaves the tree reflecting what actually happened
            self.tree.apply_step(*step);
        }
        Ok(())
    }
}

/// The active root-to-leaf path with each node's stored polarity
fn active_path(tree: &RoutingTree) -> Vec<(RelayId, bool)> {
    let mut path = Vec::new();
    let mut cursor = Branch::Node(tree.root());
    while let Branch::Node(id) = cursor {
        let Some(node) = tree.node(id) else { break };
        path.push((id, node.polarity));
        cursor = node.to_next();
    }
    path
}

/// Coordinator for the cryogenic switch tree
pub struct SwitchManager<T> {
    inner: Mutex<Actuation<T>>,
    remember_state: bool,
    settle: Duration,
    events: broadcast::Sender<SwitchEvent>,
}

impl<T> SwitchManager<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Assemble a manager from its injected resources
    pub fn new(driver: PulseDriver<T>, amp: AmpProtector, config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Actuation {
                tree: RoutingTree::cryo8(),
                driver,
                amp,
            }),
            remember_state: config.remember_state,
            settle: Duration::from_millis(config.pulse.sleep_ms),
            events,
        }
    }

    /// Current tree state without touching hardware
    pub async fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::capture(&self.inner.lock().await.tree)
    }

    /// Subscribe to state changes
    ///
    /// Returns the current snapshot plus a stream that yields a
    /// [`SwitchEvent::Snapshot`] after every completed change (and
    /// keep-alive frames if [`SwitchManager::spawn_keepalive`] is
    /// running).
    pub async fn subscribe(&self) -> (TreeSnapshot, broadcast::Receiver<SwitchEvent>) {
        let guard = self.inner.lock().await;
        (TreeSnapshot::capture(&guard.tree), self.events.subscribe())
    }

    /// Emit keep-alive frames every `period` until the handle is aborted
    pub fn spawn_keepalive(&self, period: Duration) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                // Send fails when nobody is subscribed; keep ticking,
                // subscribers may come later
                let _ = events.send(SwitchEvent::KeepAlive);
            }
        })
    }

    /// Select the cryogenic pulse amplitude
    pub async fn cryo_mode(&self) {
        self.inner.lock().await.driver.cryo_mode();
    }

    /// Select the room-temperature pulse amplitude
    pub async fn room_temp_mode(&self) {
        self.inner.lock().await.driver.room_temp_mode();
    }

    /// Swap the pulse generator at runtime
    pub async fn set_generator(&self, generator: PulseGen) -> Result<(), EngineError> {
        self.inner.lock().await.driver.set_generator(generator).await
    }

    /// Route the tree to an output channel
    ///
    /// With memory mode enabled, only relays whose stored polarity
    /// disagrees with the desired path are flipped; otherwise every step
    /// is re-asserted regardless of believed state.
    pub async fn route_channel(
        &self,
        channel: u8,
        verification: &Verification,
    ) -> Result<TreeSnapshot, EngineError> {
        verification.check()?;
        let mut guard = self.inner.lock().await;

        // Malformed channels fail here, before the amplifier is touched
        let steps = guard.tree.route_steps(channel)?;
        info!("routing to channel {} ({} steps)", channel, steps.len());

        guard.begin(verification).await?;
        let walked = guard
            .walk_steps(&steps, self.settle, self.remember_state, verification)
            .await;
        self.conclude(guard, walked, verification).await
    }

    /// Flip a single relay, independent of full-path routing
    pub async fn toggle(
        &self,
        relay: u8,
        verification: &Verification,
    ) -> Result<TreeSnapshot, EngineError> {
        verification.check()?;
        let mut guard = self.inner.lock().await;

        let id = RelayId(relay);
        let polarity = guard
            .tree
            .node(id)
            .ok_or(TreeError::UnknownRelay(id))?
            .polarity;
        let step = Step {
            relay: id,
            direction: if polarity {
                Direction::Right
            } else {
                Direction::Left
            },
        };
        info!("toggling {} to {:?}", id, step.direction);

        guard.begin(verification).await?;
        let walked = guard
            .walk_steps(&[step], self.settle, false, verification)
            .await;
        self.conclude(guard, walked, verification).await
    }

    /// Drive every relay to the canonical baseline (all right)
    pub async fn reset(&self, verification: &Verification) -> Result<TreeSnapshot, EngineError> {
        verification.check()?;
        let mut guard = self.inner.lock().await;

        let steps: Vec<Step> = guard
            .tree
            .nodes()
            .map(|n| Step {
                relay: n.id,
                direction: Direction::Right,
            })
            .collect();
        info!("resetting all {} relays", steps.len());

        guard.begin(verification).await?;
        let walked = guard
            .walk_steps(&steps, self.settle, false, verification)
            .await;
        self.conclude(guard, walked, verification).await
    }

    /// Re-assert the active path from stored polarities
    ///
    /// Replays the flips the software believes are in place without
    /// changing logical state; used to recover physical state after a
    /// suspected desync (e.g. power loss on the board).
    pub async fn re_assert(
        &self,
        verification: &Verification,
    ) -> Result<TreeSnapshot, EngineError> {
        verification.check()?;
        let mut guard = self.inner.lock().await;

        let steps: Vec<Step> = active_path(&guard.tree)
            .into_iter()
            .map(|(relay, polarity)| Step {
                relay,
                direction: if polarity {
                    Direction::Left
                } else {
                    Direction::Right
                },
            })
            .collect();
        info!("re-asserting active path ({} relays)", steps.len());

        guard.begin(verification).await?;
        let walked = guard
            .walk_steps(&steps, self.settle, false, verification)
            .await;
        self.conclude(guard, walked, verification).await
    }

    /// Common tail of every mutating operation: refresh + snapshot +
    /// epilogue + broadcast, preserving a walk failure as the primary
    /// error.
    async fn conclude(
        &self,
        mut guard: tokio::sync::MutexGuard<'_, Actuation<T>>,
        walked: Result<(), EngineError>,
        verification: &Verification,
    ) -> Result<TreeSnapshot, EngineError> {
        guard.tree.refresh_active();
        let snapshot = TreeSnapshot::capture(&guard.tree);
        let finished = guard.finish(verification).await;
        drop(guard);

        if let Err(e) = &walked {
            warn!("actuation failed mid-sequence: {}", e);
        }
        let _ = self.events.send(SwitchEvent::Snapshot(snapshot.clone()));

        walked?;
        finished?;
        Ok(snapshot)
    }
}

/// Build a fully wired manager from configuration
///
/// Selects the pulse driver and generator variants, connects the
/// amplifier guard, and hands back a manager ready to route.
pub async fn build_manager<T>(
    board: RelayBoard<T>,
    config: EngineConfig,
) -> Result<SwitchManager<T>, EngineError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let driver = match config.mode {
        PulseMode::SimpleRelay => {
            PulseDriver::SimpleRelay(SimpleRelayDriver::new(board, &config.pulse))
        }
        PulseMode::FunctionGenerator => {
            let generator = build_generator(&config.generator);
            PulseDriver::FunctionGenerator(
                FunctionGeneratorDriver::connect(board, generator, &config.pulse).await?,
            )
        }
    };

    let amp = AmpProtector::from_config(&config.amplifier);
    amp.connect().await?;

    Ok(SwitchManager::new(driver, amp, &config))
}
