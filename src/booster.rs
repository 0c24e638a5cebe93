//! The booster supply controller: voltage ramp, current-limit loop, inrush
//! blanking and short detection (§3 "BoosterState", §4.4).
//!
//! Driven by a dedicated 1 kHz ticking task in production; tests call
//! [`Booster::tick`] directly, an arbitrary number of times with no
//! sleeping, since the loop only ever reads a tick counter, never
//! wall-clock time (SPEC_FULL.md §4.4).

use crate::error::Result;

/// Linear DAC model constants implied by §4.4's formula and the stated
/// default config ranges (SPEC_FULL.md §4.4: "named constants ... `pub
/// const` so integration tests and downstream firmware can reference
/// them").
pub const DA_PASSIVE: i32 = 128;
pub const PASSIVE_VOLTAGE_01V: i32 = 160;
pub const DA_STEPS: i32 = 256;
pub const DACSTEPS_PER_MS: i32 = 4;
pub const BOOSTER_TIMEOUT_TICKS: u32 = 50;
pub const RELAIS_TIMEOUT_TICKS: u32 = 100;

pub const MIN_VOLTAGE_01V: u16 = 50;
pub const MAX_VOLTAGE_01V: u16 = 220;

/// Compute the DAC target for a given track voltage in 0.1 V units,
/// clamped to `[0, DA_STEPS)` (§4.4's formula, verbatim).
pub fn dac_target_for_voltage(voltage_01v: i32) -> i32 {
    let raw = DA_PASSIVE + ((PASSIVE_VOLTAGE_01V - voltage_01v) * 149 + 5) / 10;
    raw.clamp(0, DA_STEPS - 1)
}

/// Commanded configuration, set via the public setters (§4.4: "idempotent
/// and records the new target without touching the DAC directly").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoosterConfig {
    pub target_voltage_01v: u16,
    pub program_voltage_01v: u16,
    pub max_current_ma: u32,
    pub short_time_ms: u32,
    pub inrush_time_ms: u32,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            target_voltage_01v: 160,
            program_voltage_01v: 140,
            max_current_ma: 3000,
            short_time_ms: 100,
            inrush_time_ms: 100,
        }
    }
}

/// The full live state of the booster supply (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoosterState {
    pub on: bool,
    pub on_prog_track: bool,
    pub electrical_on: bool,
    pub dac_target: i32,
    pub dac_current: i32,
    pub inrush_remaining_ticks: u32,
    pub short_accumulator: i32,
    pub actual_current_ma: u32,
    pub off_debounce_remaining: u32,
    pub relais_settle_remaining: u32,
}

impl Default for BoosterState {
    fn default() -> Self {
        Self {
            on: false,
            on_prog_track: false,
            electrical_on: false,
            dac_target: 0,
            dac_current: 0,
            inrush_remaining_ticks: 0,
            short_accumulator: 0,
            actual_current_ma: 0,
            off_debounce_remaining: 0,
            relais_settle_remaining: 0,
        }
    }
}

/// The outcome of one [`Booster::tick`]: did a short just get declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub short_declared: bool,
}

/// The booster loop plus its commanded configuration (§4.4).
pub struct Booster {
    pub config: BoosterConfig,
    pub state: BoosterState,
}

impl Booster {
    pub fn new(config: BoosterConfig) -> Self {
        Self {
            config,
            state: BoosterState::default(),
        }
    }

    pub fn set_target_voltage(&mut self, voltage_01v: u16) -> Result<()> {
        let clamped = voltage_01v.clamp(MIN_VOLTAGE_01V, MAX_VOLTAGE_01V);
        self.config.target_voltage_01v = clamped;
        Ok(())
    }

    pub fn set_program_voltage(&mut self, voltage_01v: u16) -> Result<()> {
        let clamped = voltage_01v.clamp(MIN_VOLTAGE_01V, MAX_VOLTAGE_01V);
        self.config.program_voltage_01v = clamped;
        Ok(())
    }

    /// Command the booster on/off; takes effect through the debounce and
    /// relay logic in [`Self::tick`], never immediately.
    pub fn request_on(&mut self, on: bool, on_prog_track: bool) {
        self.state.on = on;
        self.state.on_prog_track = on_prog_track;
    }

    fn target_voltage(&self) -> i32 {
        if self.state.on_prog_track {
            self.config.program_voltage_01v as i32
        } else {
            self.config.target_voltage_01v as i32
        }
    }

    /// Advance the loop by one 1 ms tick (§4.4).
    pub fn tick(&mut self, actual_current_ma: u32) -> TickOutcome {
        self.state.actual_current_ma = actual_current_ma;
        self.state.dac_target = dac_target_for_voltage(self.target_voltage());

        if self.state.on && !self.state.electrical_on {
            if self.state.off_debounce_remaining > 0 {
                self.state.off_debounce_remaining -= 1;
                return TickOutcome::default();
            }
            if self.state.relais_settle_remaining > 0 {
                self.state.relais_settle_remaining -= 1;
                return TickOutcome::default();
            }
            self.state.electrical_on = true;
            self.state.dac_current = 0;
            self.state.inrush_remaining_ticks = self.config.inrush_time_ms;
            self.state.short_accumulator = 0;
            return TickOutcome::default();
        }

        if !self.state.on && self.state.electrical_on {
            self.state.electrical_on = false;
            self.state.off_debounce_remaining = BOOSTER_TIMEOUT_TICKS;
            self.state.relais_settle_remaining = RELAIS_TIMEOUT_TICKS;
            return TickOutcome::default();
        }

        if !self.state.electrical_on {
            return TickOutcome::default();
        }

        let mut outcome = TickOutcome::default();
        if self.state.inrush_remaining_ticks > 0 {
            self.state.inrush_remaining_ticks -= 1;
        } else {
            if actual_current_ma > self.config.max_current_ma {
                self.state.short_accumulator += 2;
            } else {
                self.state.short_accumulator = (self.state.short_accumulator - 1).max(0);
            }
            if self.state.short_accumulator > 2 * self.config.short_time_ms as i32 {
                outcome.short_declared = true;
            }
        }

        let step = DACSTEPS_PER_MS.min((self.state.dac_target - self.state.dac_current).abs());
        if self.state.dac_current < self.state.dac_target {
            self.state.dac_current += step;
        } else if self.state.dac_current > self.state.dac_target {
            self.state.dac_current -= step;
        }

        outcome
    }

    /// Force the electrical state off immediately (used when the
    /// sequencer transitions to `SHORT`/`STOP`/`POWERFAIL`).
    pub fn force_off(&mut self) {
        self.state.on = false;
        self.state.electrical_on = false;
        self.state.dac_current = 0;
    }
}
