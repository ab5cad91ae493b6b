//! Pulse drivers
//!
//! A [`PulseDriver`] turns "flip this relay left/right" into physical
//! action. Two implementations exist, matching the two ways the
//! room-temperature rack has been built:
//!
//! - [`SimpleRelayDriver`]: the relay board itself produces the coil
//!   pulse. A shared direction relay selects the pulse sense, so a flip
//!   is direction-set, settle, coil pulse, settle (and for the right
//!   direction, direction-reset afterwards).
//! - [`FunctionGeneratorDriver`]: the board only wire-switches: it
//!   routes an external function generator's output onto the target coil
//!   line through a private 6-relay sub-tree, then the generator fires a
//!   single polarized pulse. A dedicated protection relay keeps the
//!   generator's idle output away from the coils outside an intentional
//!   actuation window.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tracing::{debug, warn};

use relay_board::{RelayBoard, Verification};
use switch_tree::{Direction, RoutingTree};

use crate::config::PulseConfig;
use crate::error::EngineError;
use crate::generator::{Polarity, PulseGen};

/// Shared direction relay (SimpleRelay) / pulser protection relay
/// (FunctionGenerator). Channel 0 on the board in both racks.
const RELAY_ZERO: u8 = 0;

/// Generator output channel wired to the switch tree
const GENERATOR_CHANNEL: u8 = 1;

/// Pulse width the generator is armed with (seconds)
const ARM_PULSE_WIDTH: f64 = 0.050;

/// Polymorphic pulse driver, selected by configuration
pub enum PulseDriver<T> {
    /// Relay board pulses coils directly
    SimpleRelay(SimpleRelayDriver<T>),
    /// Function generator pulses through a wire-switching sub-tree
    FunctionGenerator(FunctionGeneratorDriver<T>),
}

impl<T> PulseDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Flip a relay to its left branch
    pub async fn flip_left(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        match self {
            PulseDriver::SimpleRelay(d) => d.flip_left(relay, verification).await,
            PulseDriver::FunctionGenerator(d) => d.flip_left(relay, verification).await,
        }
    }

    /// Flip a relay to its right branch
    pub async fn flip_right(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        match self {
            PulseDriver::SimpleRelay(d) => d.flip_right(relay, verification).await,
            PulseDriver::FunctionGenerator(d) => d.flip_right(relay, verification).await,
        }
    }

    /// Select the cryogenic pulse amplitude
    pub fn cryo_mode(&mut self) {
        if let PulseDriver::FunctionGenerator(d) = self {
            d.cryo_mode();
        }
    }

    /// Select the room-temperature pulse amplitude
    pub fn room_temp_mode(&mut self) {
        if let PulseDriver::FunctionGenerator(d) = self {
            d.room_temp_mode();
        }
    }

    /// Let generator output reach the coils
    pub async fn unblock_pulser(
        &mut self,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        match self {
            // No blocking system in the direct-pulse rack
            PulseDriver::SimpleRelay(_) => Ok(()),
            PulseDriver::FunctionGenerator(d) => d.unblock_pulser(verification).await,
        }
    }

    /// Isolate the coils from the generator output
    pub async fn block_pulser(&mut self, verification: &Verification) -> Result<(), EngineError> {
        match self {
            PulseDriver::SimpleRelay(_) => Ok(()),
            PulseDriver::FunctionGenerator(d) => d.block_pulser(verification).await,
        }
    }

    /// Swap the pulse generator at runtime
    pub async fn set_generator(&mut self, generator: PulseGen) -> Result<(), EngineError> {
        match self {
            PulseDriver::SimpleRelay(_) => Err(EngineError::NoGenerator),
            PulseDriver::FunctionGenerator(d) => d.set_generator(generator).await,
        }
    }

    /// Access the generator (FunctionGenerator variant only)
    pub fn generator(&self) -> Option<&PulseGen> {
        match self {
            PulseDriver::SimpleRelay(_) => None,
            PulseDriver::FunctionGenerator(d) => Some(&d.generator),
        }
    }
}

/// Driver that pulses relay coils straight from the board
pub struct SimpleRelayDriver<T> {
    board: RelayBoard<T>,
    settle: Duration,
    pulse_ms: u64,
}

impl<T> SimpleRelayDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a board with the configured timings
    pub fn new(board: RelayBoard<T>, pulse: &PulseConfig) -> Self {
        Self {
            board,
            settle: Duration::from_millis(pulse.sleep_ms),
            pulse_ms: pulse.pulse_ms,
        }
    }

    async fn flip_left(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        // Direction relay must be at rest before the coil pulse
        self.board.turn_off(RELAY_ZERO, verification).await?;
        sleep(self.settle).await;
        self.board
            .send_pulse(relay, self.pulse_ms, verification)
            .await?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn flip_right(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        // Opposite sense: direction relay set for the pulse, then returned
        // to rest afterwards
        self.board.turn_on(RELAY_ZERO, verification).await?;
        sleep(self.settle).await;
        self.board
            .send_pulse(relay, self.pulse_ms, verification)
            .await?;
        sleep(self.settle).await;
        self.board.turn_off(RELAY_ZERO, verification).await?;
        sleep(self.settle).await;
        Ok(())
    }
}

/// Driver that wire-switches a function generator onto the target coil
pub struct FunctionGeneratorDriver<T> {
    board: RelayBoard<T>,
    wire_tree: RoutingTree,
    generator: PulseGen,
    settle: Duration,
    amplitude: f64,
    cryo_amplitude: f64,
    room_temp_amplitude: f64,
}

impl<T> FunctionGeneratorDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Build the driver and arm the generator
    ///
    /// Starts in cryogenic mode: the low amplitude is the safe default
    /// for a tree that may already be cold.
    pub async fn connect(
        board: RelayBoard<T>,
        generator: PulseGen,
        pulse: &PulseConfig,
    ) -> Result<Self, EngineError> {
        let mut driver = Self {
            board,
            wire_tree: RoutingTree::wire7(),
            generator,
            settle: Duration::from_millis(pulse.sleep_ms),
            amplitude: pulse.cryo_amplitude,
            cryo_amplitude: pulse.cryo_amplitude,
            room_temp_amplitude: pulse.room_temp_amplitude,
        };
        driver.arm_generator().await?;
        Ok(driver)
    }

    /// Connect and run the arm sequence on the current generator
    async fn arm_generator(&mut self) -> Result<(), EngineError> {
        self.generator.connect().await?;
        self.generator.setup_pulse(ARM_PULSE_WIDTH).await?;
        self.generator.set_output(GENERATOR_CHANNEL, true).await?;
        // BUS triggering lets the engine fire single pulses on demand
        self.generator.setup_trigger(GENERATOR_CHANNEL, "BUS").await?;
        Ok(())
    }

    /// Swap the active generator at runtime
    ///
    /// The old generator is disconnected defensively: a failure there is
    /// logged and ignored so a dead instrument cannot block switching to
    /// a live one. The new generator is connected and armed with the same
    /// setup sequence.
    pub async fn set_generator(&mut self, generator: PulseGen) -> Result<(), EngineError> {
        if let Err(e) = self.generator.disconnect().await {
            warn!("previous generator disconnect failed: {}", e);
        }
        self.generator = generator;
        self.arm_generator().await
    }

    fn cryo_mode(&mut self) {
        self.amplitude = self.cryo_amplitude;
    }

    fn room_temp_mode(&mut self) {
        self.amplitude = self.room_temp_amplitude;
    }

    /// Route the generator output to one coil line
    ///
    /// Walks the private wire tree with the same codec as the cryogenic
    /// tree, but steps are plain relay toggles: LEFT opens the step's
    /// relay, RIGHT closes it. No timed pulses are involved.
    async fn wire_switch(
        &mut self,
        line: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        debug!("wire switching generator output to line {}", line);
        let steps = self.wire_tree.route_steps(line)?;
        for step in steps {
            match step.direction {
                Direction::Left => {
                    self.board
                        .turn_off(step.relay.as_u8(), verification)
                        .await?
                }
                Direction::Right => {
                    self.board.turn_on(step.relay.as_u8(), verification).await?
                }
            }
            self.wire_tree.apply_step(step);
        }
        Ok(())
    }

    async fn flip_left(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        self.wire_switch(relay, verification).await?;
        sleep(self.settle).await;
        self.generator
            .trigger_with_polarity(GENERATOR_CHANNEL, self.amplitude, Polarity::Pos)
            .await?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn flip_right(
        &mut self,
        relay: u8,
        verification: &Verification,
    ) -> Result<(), EngineError> {
        self.wire_switch(relay, verification).await?;
        sleep(self.settle).await;
        self.generator
            .trigger_with_polarity(GENERATOR_CHANNEL, self.amplitude, Polarity::Neg)
            .await?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn unblock_pulser(&mut self, verification: &Verification) -> Result<(), EngineError> {
        debug!("opening the pulser protection relay");
        self.board.turn_on(RELAY_ZERO, verification).await?;
        sleep(self.settle).await;
        Ok(())
    }

    async fn block_pulser(&mut self, verification: &Verification) -> Result<(), EngineError> {
        debug!("closing the pulser protection relay");
        self.board.turn_off(RELAY_ZERO, verification).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DevPulseGen;
    use switch_sim::{run_virtual_board_task, BoardEvent, VirtualRelayBoard};
    use tokio::sync::broadcast;

    fn fast_pulse() -> PulseConfig {
        PulseConfig {
            sleep_ms: 1,
            pulse_ms: 1,
            ..Default::default()
        }
    }

    async fn virtual_board() -> (
        RelayBoard<tokio::io::DuplexStream>,
        broadcast::Receiver<BoardEvent>,
    ) {
        let (driver_io, board_io) = tokio::io::duplex(1024);
        let (event_tx, events) = broadcast::channel(1024);
        tokio::spawn(run_virtual_board_task(
            board_io,
            VirtualRelayBoard::new(),
            event_tx,
        ));
        (RelayBoard::new(driver_io), events)
    }

    async fn drain(events: &mut broadcast::Receiver<BoardEvent>) -> Vec<(u8, bool)> {
        let mut seen = Vec::new();
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            let event = event.unwrap();
            seen.push((event.relay, event.on));
        }
        seen
    }

    #[tokio::test]
    async fn simple_relay_flip_left_sequence() {
        let (board, mut events) = virtual_board().await;
        let mut driver = SimpleRelayDriver::new(board, &fast_pulse());

        driver
            .flip_left(3, &Verification::confirmed(1))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut events).await,
            vec![(0, false), (3, true), (3, false)]
        );
    }

    #[tokio::test]
    async fn simple_relay_flip_right_brackets_direction() {
        let (board, mut events) = virtual_board().await;
        let mut driver = SimpleRelayDriver::new(board, &fast_pulse());

        driver
            .flip_right(3, &Verification::confirmed(1))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut events).await,
            vec![(0, true), (3, true), (3, false), (0, false)]
        );
    }

    #[tokio::test]
    async fn wire_switch_routes_line_five() {
        let (board, mut events) = virtual_board().await;
        let generator = PulseGen::Dev(DevPulseGen::default());
        let mut driver = FunctionGeneratorDriver::connect(board, generator, &fast_pulse())
            .await
            .unwrap();

        driver
            .flip_left(5, &Verification::confirmed(1))
            .await
            .unwrap();

        // 7 - 5 = 2 = 010: R1 left (off), R2 right (on), R5 left (off)
        assert_eq!(
            drain(&mut events).await,
            vec![(1, false), (2, true), (5, false)]
        );

        let dev = driver.generator.as_dev().unwrap();
        assert_eq!(dev.fired, vec![(1, 2.5, Polarity::Pos)]);
    }

    #[tokio::test]
    async fn wire_switch_line_one_stops_at_shallow_leaf() {
        let (board, mut events) = virtual_board().await;
        let generator = PulseGen::Dev(DevPulseGen::default());
        let mut driver = FunctionGeneratorDriver::connect(board, generator, &fast_pulse())
            .await
            .unwrap();

        driver
            .flip_right(1, &Verification::confirmed(1))
            .await
            .unwrap();

        // 7 - 1 = 6 = 110: two right turns and the walk is done
        assert_eq!(drain(&mut events).await, vec![(1, true), (3, true)]);

        let dev = driver.generator.as_dev().unwrap();
        assert_eq!(dev.fired, vec![(1, 2.5, Polarity::Neg)]);
    }

    #[tokio::test]
    async fn mode_switch_changes_amplitude_only() {
        let (board, _events) = virtual_board().await;
        let generator = PulseGen::Dev(DevPulseGen::default());
        let mut driver = FunctionGeneratorDriver::connect(board, generator, &fast_pulse())
            .await
            .unwrap();

        driver.room_temp_mode();
        driver
            .flip_left(4, &Verification::confirmed(1))
            .await
            .unwrap();
        driver.cryo_mode();
        driver
            .flip_left(4, &Verification::confirmed(1))
            .await
            .unwrap();

        let dev = driver.generator.as_dev().unwrap();
        assert_eq!(dev.fired[0], (1, 5.0, Polarity::Pos));
        assert_eq!(dev.fired[1], (1, 2.5, Polarity::Pos));
    }

    #[tokio::test]
    async fn generator_swap_rearms_new_generator() {
        let (board, _events) = virtual_board().await;
        let generator = PulseGen::Dev(DevPulseGen::default());
        let mut driver = FunctionGeneratorDriver::connect(board, generator, &fast_pulse())
            .await
            .unwrap();

        driver
            .set_generator(PulseGen::Dev(DevPulseGen::default()))
            .await
            .unwrap();

        let dev = driver.generator.as_dev().unwrap();
        assert!(dev.is_connected());
        assert_eq!(
            dev.calls,
            vec![
                "setup_pulse(0.05)",
                "set_output(1, true)",
                "setup_trigger(1, BUS)",
            ]
        );
    }

    #[tokio::test]
    async fn unverified_flip_never_reaches_the_board() {
        let (board, mut events) = virtual_board().await;
        let generator = PulseGen::Dev(DevPulseGen::default());
        let mut driver = FunctionGeneratorDriver::connect(board, generator, &fast_pulse())
            .await
            .unwrap();

        let unverified = Verification {
            verified: false,
            timestamp: 0,
            user_confirmed: false,
        };
        let err = driver.flip_left(5, &unverified).await.unwrap_err();
        assert!(matches!(err, EngineError::Link(_)));

        assert!(drain(&mut events).await.is_empty());
        assert!(driver.generator.as_dev().unwrap().fired.is_empty());
    }
}
