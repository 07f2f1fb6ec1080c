//! Loading animation state machine
//!
//! [`PhaseMachine`] is pure: it is fed progress values and instants and
//! answers with [`PhaseFrame`]s plus the next instant it needs to be woken
//! at. Timing comes from a table of [`PhaseRule`]s, each owning a single
//! [`TimerSlot`]. The async driver lives in `application::phase_animator`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ts_rs::TS;

use crate::domain::progress::{PROGRESS_MAX, PROGRESS_MIN, clamp_progress};

pub const DEFAULT_IMPACT_THRESHOLD: f64 = 98.0;
pub const DEFAULT_IMPACT_FLASH: Duration = Duration::from_millis(300);
pub const DEFAULT_FINAL_IMPACT_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_FINAL_IMPACT: Duration = Duration::from_millis(1500);
pub const DEFAULT_FINAL_CLASH: Duration = Duration::from_millis(2000);
pub const DEFAULT_NARROW_VIEWPORT_PX: u32 = 640;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AnimationPhase {
    Idle,
    Approaching,
    ImpactFlash,
    Settled,
    FinalClash,
    FinalImpact,
}

impl AnimationPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Approaching => "approaching",
            Self::ImpactFlash => "impact_flash",
            Self::Settled => "settled",
            Self::FinalClash => "final_clash",
            Self::FinalImpact => "final_impact",
        }
    }
}

impl std::fmt::Display for AnimationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ViewportClass {
    Narrow,
    Wide,
}

impl ViewportClass {
    #[must_use]
    pub const fn from_width(width_px: u32, narrow_below_px: u32) -> Self {
        if width_px < narrow_below_px {
            Self::Narrow
        } else {
            Self::Wide
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AuraLevel {
    Faint,
    Medium,
    Strong,
}

impl AuraLevel {
    #[must_use]
    pub fn for_progress(progress: f64) -> Self {
        if progress > 80.0 {
            Self::Strong
        } else if progress > 50.0 {
            Self::Medium
        } else {
            Self::Faint
        }
    }
}

/// Status line shown under the animation.
#[must_use]
pub fn caption_for(progress: f64) -> &'static str {
    if progress < 30.0 {
        "Analyzing comic..."
    } else if progress < 60.0 {
        "Processing image..."
    } else if progress < 90.0 {
        "Fetching market data..."
    } else {
        "Almost ready!"
    }
}

/// How far the two figures have closed in, in percent of the stage width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub distance_factor: f64,
    pub narrow_cap: f64,
    pub wide_cap: f64,
    pub narrow_below_px: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            distance_factor: 0.4,
            narrow_cap: 25.0,
            wide_cap: 40.0,
            narrow_below_px: DEFAULT_NARROW_VIEWPORT_PX,
        }
    }
}

impl Geometry {
    #[must_use]
    pub fn closing_distance(&self, progress: f64, viewport: ViewportClass) -> f64 {
        let cap = match viewport {
            ViewportClass::Narrow => self.narrow_cap,
            ViewportClass::Wide => self.wide_cap,
        };
        (clamp_progress(progress) * self.distance_factor).min(cap)
    }
}

/// One row of the phase table.
///
/// The rule's slot is armed when progress enters `[from, until)` from
/// outside. The phase becomes visible `delay` after entry and clears
/// `clear_after` after entry. Leaving the band disarms the slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseRule {
    pub phase: AnimationPhase,
    pub from: f64,
    pub until: Option<f64>,
    pub delay: Duration,
    pub clear_after: Duration,
}

impl PhaseRule {
    #[must_use]
    pub fn contains(&self, progress: f64) -> bool {
        progress >= self.from && self.until.is_none_or(|until| progress < until)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSchedule {
    /// Later rules win when several are visible at once.
    pub rules: Vec<PhaseRule>,
    pub geometry: Geometry,
}

impl PhaseSchedule {
    /// The standard three-rule table.
    #[must_use]
    pub fn standard(
        impact_threshold: f64,
        impact_flash: Duration,
        final_impact_delay: Duration,
        final_impact: Duration,
        final_clash: Duration,
        geometry: Geometry,
    ) -> Self {
        Self {
            rules: vec![
                // Completion stays inside the band, so a jump straight to
                // 100 still flashes alongside the clash.
                PhaseRule {
                    phase: AnimationPhase::ImpactFlash,
                    from: impact_threshold,
                    until: None,
                    delay: Duration::ZERO,
                    clear_after: impact_flash,
                },
                PhaseRule {
                    phase: AnimationPhase::FinalClash,
                    from: PROGRESS_MAX,
                    until: None,
                    delay: Duration::ZERO,
                    clear_after: final_clash,
                },
                PhaseRule {
                    phase: AnimationPhase::FinalImpact,
                    from: PROGRESS_MAX,
                    until: None,
                    delay: final_impact_delay,
                    clear_after: final_impact,
                },
            ],
            geometry,
        }
    }
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        Self::standard(
            DEFAULT_IMPACT_THRESHOLD,
            DEFAULT_IMPACT_FLASH,
            DEFAULT_FINAL_IMPACT_DELAY,
            DEFAULT_FINAL_IMPACT,
            DEFAULT_FINAL_CLASH,
            Geometry::default(),
        )
    }
}

/// The single timer a rule owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerSlot {
    #[default]
    Inactive,
    Pending {
        activate_at: Instant,
        clear_at: Instant,
    },
    Active {
        clear_at: Instant,
    },
}

impl TimerSlot {
    fn arm(now: Instant, rule: &PhaseRule) -> Self {
        let clear_at = now + rule.clear_after;
        if rule.delay.is_zero() {
            Self::Active { clear_at }
        } else {
            Self::Pending {
                activate_at: now + rule.delay,
                clear_at,
            }
        }
    }

    /// Disarm. Returns whether anything was pending; calling it again is a
    /// no-op that returns `false`.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.is_armed();
        *self = Self::Inactive;
        was_armed
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        !matches!(self, Self::Inactive)
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match *self {
            Self::Inactive => None,
            Self::Pending { activate_at, .. } => Some(activate_at),
            Self::Active { clear_at } => Some(clear_at),
        }
    }

    /// Fire whatever is due at `now`.
    fn poll(&mut self, now: Instant) {
        if let Self::Pending {
            activate_at,
            clear_at,
        } = *self
        {
            if activate_at <= now {
                *self = Self::Active { clear_at };
            }
        }
        if let Self::Active { clear_at } = *self {
            if clear_at <= now {
                *self = Self::Inactive;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RuleState {
    in_band: bool,
    slot: TimerSlot,
}

/// Snapshot handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct PhaseFrame {
    pub phase: AnimationPhase,
    pub progress: f64,
    pub impact_flash: bool,
    pub final_clash: bool,
    pub final_impact: bool,
    pub closing_distance: f64,
    pub viewport: ViewportClass,
    pub caption: String,
    pub aura: AuraLevel,
    pub energy_crackle: bool,
    pub bouncing: bool,
}

impl Default for PhaseFrame {
    fn default() -> Self {
        PhaseMachine::new(PhaseSchedule::default()).frame()
    }
}

#[derive(Debug, Clone)]
pub struct PhaseMachine {
    schedule: PhaseSchedule,
    states: Vec<RuleState>,
    progress: f64,
    viewport: ViewportClass,
}

impl PhaseMachine {
    #[must_use]
    pub fn new(schedule: PhaseSchedule) -> Self {
        let states = vec![RuleState::default(); schedule.rules.len()];
        Self {
            schedule,
            states,
            progress: PROGRESS_MIN,
            viewport: ViewportClass::Wide,
        }
    }

    #[must_use]
    pub const fn schedule(&self) -> &PhaseSchedule {
        &self.schedule
    }

    #[must_use]
    pub const fn progress(&self) -> f64 {
        self.progress
    }

    /// Feed a new progress value observed at `now`.
    pub fn observe(&mut self, value: f64, now: Instant) {
        self.advance(now);
        let value = clamp_progress(value);
        if value <= PROGRESS_MIN {
            self.reset();
            return;
        }

        for (rule, state) in self.schedule.rules.iter().zip(self.states.iter_mut()) {
            let inside = rule.contains(value);
            if inside && !state.in_band {
                state.slot = TimerSlot::arm(now, rule);
            } else if !inside && state.in_band {
                state.slot.cancel();
            }
            state.in_band = inside;
        }
        self.progress = value;
    }

    /// Fire every timer that is due at `now`.
    pub fn advance(&mut self, now: Instant) {
        for state in &mut self.states {
            state.slot.poll(now);
        }
    }

    /// Back to `Idle` with every timer cancelled. Returns how many timers
    /// were still armed.
    pub fn reset(&mut self) -> usize {
        self.progress = PROGRESS_MIN;
        self.cancel_all()
    }

    /// Cancel every timer without touching progress.
    pub fn teardown(&mut self) -> usize {
        self.cancel_all()
    }

    fn cancel_all(&mut self) -> usize {
        self.states
            .iter_mut()
            .map(|state| {
                state.in_band = false;
                state.slot.cancel()
            })
            .filter(|cancelled| *cancelled)
            .count()
    }

    /// Viewport changes only affect geometry.
    pub fn set_viewport_width(&mut self, width_px: u32) {
        self.viewport = ViewportClass::from_width(width_px, self.schedule.geometry.narrow_below_px);
    }

    #[must_use]
    pub const fn viewport(&self) -> ViewportClass {
        self.viewport
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.states.iter().filter_map(|state| state.slot.deadline()).min()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.states.iter().filter(|state| state.slot.is_armed()).count()
    }

    #[must_use]
    pub fn is_visible(&self, phase: AnimationPhase) -> bool {
        self.schedule
            .rules
            .iter()
            .zip(&self.states)
            .any(|(rule, state)| rule.phase == phase && state.slot.is_active())
    }

    #[must_use]
    pub fn phase(&self) -> AnimationPhase {
        self.schedule
            .rules
            .iter()
            .zip(&self.states)
            .rev()
            .find(|(_, state)| state.slot.is_active())
            .map_or_else(|| base_phase(self.progress), |(rule, _)| rule.phase)
    }

    #[must_use]
    pub fn frame(&self) -> PhaseFrame {
        let progress = self.progress;
        PhaseFrame {
            phase: self.phase(),
            progress,
            impact_flash: self.is_visible(AnimationPhase::ImpactFlash),
            final_clash: self.is_visible(AnimationPhase::FinalClash),
            final_impact: self.is_visible(AnimationPhase::FinalImpact),
            closing_distance: self.schedule.geometry.closing_distance(progress, self.viewport),
            viewport: self.viewport,
            caption: caption_for(progress).to_string(),
            aura: AuraLevel::for_progress(progress),
            energy_crackle: progress > 70.0,
            bouncing: progress > 90.0,
        }
    }
}

fn base_phase(progress: f64) -> AnimationPhase {
    if progress <= PROGRESS_MIN {
        AnimationPhase::Idle
    } else if progress >= PROGRESS_MAX {
        AnimationPhase::Settled
    } else {
        AnimationPhase::Approaching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn machine() -> (PhaseMachine, Instant) {
        (PhaseMachine::new(PhaseSchedule::default()), Instant::now())
    }

    #[test]
    fn test_initial_frame_is_idle() {
        let (machine, _) = machine();
        let frame = machine.frame();
        assert_eq!(frame.phase, AnimationPhase::Idle);
        assert_eq!(frame.caption, "Analyzing comic...");
        assert_eq!(frame.closing_distance, 0.0);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_impact_flash_reverts_after_hold() {
        let (mut machine, t0) = machine();
        for value in [20.0, 50.0, 80.0] {
            machine.observe(value, t0);
            assert_eq!(machine.phase(), AnimationPhase::Approaching);
        }

        machine.observe(98.0, t0);
        assert_eq!(machine.phase(), AnimationPhase::ImpactFlash);
        assert_eq!(machine.next_deadline(), Some(t0 + ms(300)));

        // Changes inside the band do not restart the flash
        machine.observe(99.0, t0 + ms(200));
        assert_eq!(machine.next_deadline(), Some(t0 + ms(300)));

        machine.advance(t0 + ms(299));
        assert_eq!(machine.phase(), AnimationPhase::ImpactFlash);
        machine.advance(t0 + ms(300));
        assert_eq!(machine.phase(), AnimationPhase::Approaching);
        assert_eq!(machine.pending_timers(), 0);
    }

    #[test]
    fn test_dropping_below_threshold_cancels_flash() {
        let (mut machine, t0) = machine();
        machine.observe(98.5, t0);
        assert_eq!(machine.pending_timers(), 1);

        machine.observe(97.0, t0 + ms(50));
        assert_eq!(machine.phase(), AnimationPhase::Approaching);
        assert_eq!(machine.pending_timers(), 0);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_final_sequence_timeline() {
        let (mut machine, t0) = machine();
        machine.observe(98.0, t0);
        machine.observe(100.0, t0 + ms(10));

        // Clash takes over the phase; the flash armed at 98 keeps running
        let frame = machine.frame();
        assert_eq!(frame.phase, AnimationPhase::FinalClash);
        assert!(frame.impact_flash);
        assert!(frame.final_clash);
        assert!(!frame.final_impact);

        let clash_start = t0 + ms(10);
        machine.advance(clash_start + ms(100));
        assert_eq!(machine.phase(), AnimationPhase::FinalImpact);
        assert!(machine.frame().final_clash);

        machine.advance(t0 + ms(300));
        assert!(!machine.frame().impact_flash);

        machine.advance(clash_start + ms(1500));
        assert_eq!(machine.phase(), AnimationPhase::FinalClash);
        assert!(!machine.frame().final_impact);

        machine.advance(clash_start + ms(2000));
        assert_eq!(machine.phase(), AnimationPhase::Settled);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_jump_to_completion_flashes_with_the_clash() {
        let (mut machine, t0) = machine();
        machine.observe(90.0, t0);
        assert!(!machine.frame().impact_flash);

        machine.observe(100.0, t0);
        let frame = machine.frame();
        assert!(frame.impact_flash);
        assert!(frame.final_clash);
        assert_eq!(frame.phase, AnimationPhase::FinalClash);

        machine.advance(t0 + ms(299));
        assert!(machine.frame().impact_flash);
        machine.advance(t0 + ms(300));
        assert!(!machine.frame().impact_flash);
        assert!(machine.frame().final_clash);
    }

    #[test]
    fn test_staying_at_completion_does_not_retrigger() {
        let (mut machine, t0) = machine();
        machine.observe(100.0, t0);
        machine.advance(t0 + ms(2000));
        machine.observe(100.0, t0 + ms(2500));
        assert_eq!(machine.phase(), AnimationPhase::Settled);
        assert_eq!(machine.pending_timers(), 0);
    }

    #[test]
    fn test_reset_cancels_everything() {
        let (mut machine, t0) = machine();
        machine.observe(100.0, t0);
        assert_eq!(machine.pending_timers(), 3);

        machine.observe(0.0, t0 + ms(50));
        assert_eq!(machine.phase(), AnimationPhase::Idle);
        assert_eq!(machine.pending_timers(), 0);
        assert_eq!(machine.reset(), 0);
    }

    #[test]
    fn test_timer_cancel_is_idempotent() {
        let rule = PhaseSchedule::default().rules[2];
        let mut slot = TimerSlot::arm(Instant::now(), &rule);
        assert!(matches!(slot, TimerSlot::Pending { .. }));
        assert!(slot.cancel());
        assert!(!slot.cancel());
        assert_eq!(slot, TimerSlot::Inactive);
    }

    #[test]
    fn test_viewport_change_keeps_timers() {
        let (mut machine, t0) = machine();
        machine.observe(100.0, t0);
        let deadline = machine.next_deadline();

        machine.set_viewport_width(480);
        assert_eq!(machine.viewport(), ViewportClass::Narrow);
        assert_eq!(machine.frame().closing_distance, 25.0);
        assert_eq!(machine.next_deadline(), deadline);

        machine.set_viewport_width(1280);
        assert_eq!(machine.frame().closing_distance, 40.0);
    }

    #[test]
    fn test_non_finite_input_is_clamped() {
        let (mut machine, t0) = machine();
        machine.observe(50.0, t0);
        machine.observe(f64::NAN, t0);
        assert_eq!(machine.phase(), AnimationPhase::Idle);

        machine.observe(250.0, t0);
        assert_eq!(machine.progress(), 100.0);
        assert_eq!(machine.phase(), AnimationPhase::FinalClash);
    }

    #[rstest]
    #[case(0.0, "Analyzing comic...", AuraLevel::Faint, false, false)]
    #[case(45.0, "Processing image...", AuraLevel::Faint, false, false)]
    #[case(55.0, "Processing image...", AuraLevel::Medium, false, false)]
    #[case(75.0, "Fetching market data...", AuraLevel::Medium, true, false)]
    #[case(85.0, "Fetching market data...", AuraLevel::Strong, true, false)]
    #[case(95.0, "Almost ready!", AuraLevel::Strong, true, true)]
    fn test_presentational_fields(
        #[case] progress: f64,
        #[case] caption: &str,
        #[case] aura: AuraLevel,
        #[case] crackle: bool,
        #[case] bouncing: bool,
    ) {
        let (mut machine, t0) = machine();
        machine.observe(progress, t0);
        let frame = machine.frame();
        assert_eq!(frame.caption, caption);
        assert_eq!(frame.aura, aura);
        assert_eq!(frame.energy_crackle, crackle);
        assert_eq!(frame.bouncing, bouncing);
    }

    #[rstest]
    #[case(55.0, AuraLevel::Medium)]
    #[case(80.0, AuraLevel::Medium)]
    #[case(80.5, AuraLevel::Strong)]
    #[case(50.0, AuraLevel::Faint)]
    fn test_aura_thresholds(#[case] progress: f64, #[case] expected: AuraLevel) {
        assert_eq!(AuraLevel::for_progress(progress), expected);
    }

    fn replay(
        machine: &mut PhaseMachine,
        t0: Instant,
        steps: &[(f64, u64)],
    ) -> Vec<(AnimationPhase, Option<Instant>)> {
        steps
            .iter()
            .map(|&(value, at)| {
                machine.observe(value, t0 + ms(at));
                (machine.phase(), machine.next_deadline())
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_replay_after_reset_is_identical(
            raw in proptest::collection::vec((0.0f64..=100.0, 0u64..400), 1..32)
        ) {
            let mut elapsed = 0;
            let steps: Vec<(f64, u64)> = raw
                .into_iter()
                .map(|(value, gap)| {
                    elapsed += gap;
                    (value, elapsed)
                })
                .collect();

            let (mut machine, t0) = machine();
            let first = replay(&mut machine, t0, &steps);
            machine.reset();
            let second = replay(&mut machine, t0, &steps);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_phase_matches_band(value in 0.01f64..98.0) {
            let (mut machine, t0) = machine();
            machine.observe(value, t0);
            prop_assert_eq!(machine.phase(), AnimationPhase::Approaching);
            prop_assert_eq!(machine.pending_timers(), 0);
        }
    }
}
