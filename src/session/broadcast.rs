//! Movement broadcast scheduling
//!
//! The broadcaster decides, tick by tick, what the command queue sends:
//!
//! - **Active** (short interval): while the vector is non-zero, or was non-zero
//!   on the previous tick, send the `rc` command `duplicate_sends` times.
//!   After `idle_after_ticks` consecutive all-zero ticks, downshift.
//! - **Idle** (long interval): send the current (all-zero) `rc` once per tick as
//!   a keep-alive so the drone's lost-link failsafe never engages.
//!
//! Any non-zero vector seen while idle upshifts back to active.

use crate::types::{Command, MovementVector};

/// Current broadcast cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    Active,
    Idle,
}

/// What to send on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickAction {
    /// Command to send, if any.
    pub command: Option<Command>,
    /// How many copies of `command` to send back to back.
    pub copies: usize,
    /// Cadence change to apply after this tick.
    pub switch_to: Option<BroadcastMode>,
}

impl TickAction {
    fn silent() -> Self {
        Self { command: None, copies: 0, switch_to: None }
    }
}

/// Tick state machine for the movement broadcast.
#[derive(Debug, Clone)]
pub struct MovementBroadcaster {
    mode: BroadcastMode,
    previous_active: bool,
    zero_ticks: u32,
    idle_after_ticks: u32,
    duplicate_sends: usize,
}

impl MovementBroadcaster {
    /// Starts idle: a fresh session has no movement to broadcast yet.
    pub fn new(idle_after_ticks: u32, duplicate_sends: usize) -> Self {
        Self {
            mode: BroadcastMode::Idle,
            previous_active: false,
            zero_ticks: 0,
            idle_after_ticks: idle_after_ticks.max(1),
            duplicate_sends: duplicate_sends.max(1),
        }
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    /// React to a movement update between ticks.
    ///
    /// Returns the new mode when an idle broadcaster must upshift.
    pub fn on_movement(&mut self, vector: MovementVector) -> Option<BroadcastMode> {
        if self.mode == BroadcastMode::Idle && !vector.is_zero() {
            self.mode = BroadcastMode::Active;
            self.zero_ticks = 0;
            return Some(BroadcastMode::Active);
        }
        None
    }

    /// Decide what to send for this tick given the current vector.
    pub fn on_tick(&mut self, vector: MovementVector) -> TickAction {
        match self.mode {
            BroadcastMode::Idle if vector.is_zero() => TickAction {
                command: Some(Command::Rc(vector)),
                copies: 1,
                switch_to: None,
            },
            BroadcastMode::Idle => {
                // Movement raced the tick, treat it as an upshift
                self.mode = BroadcastMode::Active;
                self.zero_ticks = 0;
                self.previous_active = true;
                TickAction {
                    command: Some(Command::Rc(vector)),
                    copies: self.duplicate_sends,
                    switch_to: Some(BroadcastMode::Active),
                }
            }
            BroadcastMode::Active => self.active_tick(vector),
        }
    }

    fn active_tick(&mut self, vector: MovementVector) -> TickAction {
        let active = !vector.is_zero();
        let mut action = TickAction::silent();

        if active || self.previous_active {
            action.command = Some(Command::Rc(vector));
            action.copies = self.duplicate_sends;
        }

        if active {
            self.zero_ticks = 0;
        } else {
            self.zero_ticks += 1;
            if self.zero_ticks >= self.idle_after_ticks {
                self.mode = BroadcastMode::Idle;
                action.switch_to = Some(BroadcastMode::Idle);
            }
        }

        self.previous_active = active;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc(a: i32) -> Option<Command> {
        Some(Command::Rc(MovementVector::new(a, 0, 0, 0)))
    }

    #[test]
    fn idle_broadcaster_sends_single_keep_alive() {
        let mut b = MovementBroadcaster::new(1, 2);
        let action = b.on_tick(MovementVector::ZERO);
        assert_eq!(action.command, rc(0));
        assert_eq!(action.copies, 1);
        assert_eq!(action.switch_to, None);
        assert_eq!(b.mode(), BroadcastMode::Idle);
    }

    #[test]
    fn hold_then_release_sequence() {
        let mut b = MovementBroadcaster::new(1, 2);
        let forward = MovementVector::new(50, 0, 0, 0);

        assert_eq!(b.on_movement(forward), Some(BroadcastMode::Active));
        // Already active, no second upshift
        assert_eq!(b.on_movement(forward), None);

        for _ in 0..20 {
            let action = b.on_tick(forward);
            assert_eq!(action.command, rc(50));
            assert_eq!(action.copies, 2);
            assert_eq!(action.switch_to, None);
        }

        // Released: one final zero burst, then downshift
        let release = b.on_tick(MovementVector::ZERO);
        assert_eq!(release.command, rc(0));
        assert_eq!(release.copies, 2);
        assert_eq!(release.switch_to, Some(BroadcastMode::Idle));
        assert_eq!(b.mode(), BroadcastMode::Idle);

        let keep_alive = b.on_tick(MovementVector::ZERO);
        assert_eq!(keep_alive.command, rc(0));
        assert_eq!(keep_alive.copies, 1);
    }

    #[test]
    fn waits_configured_zero_ticks_before_downshift() {
        let mut b = MovementBroadcaster::new(3, 2);
        b.on_movement(MovementVector::new(10, 0, 0, 0));
        b.on_tick(MovementVector::new(10, 0, 0, 0));

        let first = b.on_tick(MovementVector::ZERO);
        assert_eq!(first.command, rc(0));
        assert_eq!(first.switch_to, None);

        // Zero after zero is not broadcast while still active
        let second = b.on_tick(MovementVector::ZERO);
        assert_eq!(second, TickAction::silent());

        let third = b.on_tick(MovementVector::ZERO);
        assert_eq!(third.command, None);
        assert_eq!(third.switch_to, Some(BroadcastMode::Idle));
    }

    #[test]
    fn movement_racing_idle_tick_upshifts() {
        let mut b = MovementBroadcaster::new(1, 2);
        let action = b.on_tick(MovementVector::new(0, 0, 30, 0));
        assert_eq!(action.copies, 2);
        assert_eq!(action.switch_to, Some(BroadcastMode::Active));

        // Release after the raced tick still produces the final zero burst
        let release = b.on_tick(MovementVector::ZERO);
        assert_eq!(release.command, Some(Command::Rc(MovementVector::ZERO)));
        assert_eq!(release.copies, 2);
    }

    #[test]
    fn duplicate_count_never_drops_below_one() {
        let mut b = MovementBroadcaster::new(0, 0);
        b.on_movement(MovementVector::new(1, 1, 1, 1));
        assert_eq!(b.on_tick(MovementVector::new(1, 1, 1, 1)).copies, 1);
    }
}
