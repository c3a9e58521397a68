//! Hybrid GPS / step distance calculator.
//!
//! GPS distance is accurate over long stretches but stalls indoors and jitters
//! while standing still; step-derived distance never stalls but depends on
//! the user's step length. The calculator reports the larger of the two,
//! calibrates the step length from GPS while the user is walking, and never
//! lets the reported total go backwards within a session.

use tracing::debug;

use crate::config::DistanceConfig;
use crate::types::{LocationPoint, MovementState};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const MIN_PLAUSIBLE_STEP_LENGTH_M: f64 = 0.3;
const MAX_PLAUSIBLE_STEP_LENGTH_M: f64 = 1.5;

/// Great-circle distance between two fixes in meters.
pub fn haversine_m(a: &LocationPoint, b: &LocationPoint) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CalibrationWindow {
    start_steps: u64,
    start_gps_m: f64,
}

/// Running GPS total over an append-only prefix of the location sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GpsCache {
    points: usize,
    last_point: LocationPoint,
    distance_m: f64,
}

#[derive(Debug, Clone)]
pub struct DistanceCalculator {
    config: DistanceConfig,
    average_step_length: Option<f64>,
    last_emitted: f64,
    movement: Option<MovementState>,
    window: Option<CalibrationWindow>,
    /// GPS distance seen by the previous computation.
    last_gps_m: f64,
    gps_cache: Option<GpsCache>,
    /// Indices of fixes that start a new chain after a pause.
    breaks: Vec<usize>,
}

impl DistanceCalculator {
    pub fn new(config: DistanceConfig) -> Self {
        Self {
            config,
            average_step_length: None,
            last_emitted: 0.0,
            movement: None,
            window: None,
            last_gps_m: 0.0,
            gps_cache: None,
            breaks: Vec::new(),
        }
    }

    /// Anchor the calibration window at `initial_step_count` and the GPS
    /// distance seen so far.
    pub fn initialize(&mut self, initial_step_count: u64) {
        self.window = Some(CalibrationWindow {
            start_steps: initial_step_count,
            start_gps_m: self.last_gps_m,
        });
    }

    /// Latest stable movement state; drives when calibration may run.
    pub fn set_movement_state(&mut self, state: Option<MovementState>) {
        if matches!(
            state,
            Some(MovementState::Running) | Some(MovementState::Stationary)
        ) && self.window.is_some()
        {
            debug!(?state, "calibration window discarded");
            self.window = None;
        }
        self.movement = state;
    }

    /// Drop the open calibration window; the next settled Walking period
    /// opens a new one.
    pub fn discard_window(&mut self) {
        if self.window.take().is_some() {
            debug!("calibration window discarded");
        }
    }

    /// The fix at `index` starts a new chain: no segment joins it to the fix
    /// before it, and speed is measured from it onwards.
    pub fn break_chain_at(&mut self, index: usize) {
        if index > 0 && self.breaks.last() != Some(&index) {
            self.breaks.push(index);
        }
    }

    pub fn average_step_length(&self) -> Option<f64> {
        self.average_step_length
    }

    /// Step length in use: calibrated value or the configured default.
    pub fn step_length(&self) -> f64 {
        self.average_step_length
            .unwrap_or(self.config.default_step_length_m)
    }

    pub fn last_emitted_distance(&self) -> f64 {
        self.last_emitted
    }

    /// GPS distance seen by the last `calculate_total_distance` call.
    pub fn last_gps_distance(&self) -> f64 {
        self.last_gps_m
    }

    /// Sum of segment lengths, ignoring segments below the noise floor and
    /// segments across a chain break.
    pub fn calculate_gps_distance(&self, locations: &[LocationPoint]) -> f64 {
        self.chained_distance(locations, 0)
    }

    /// Speed over the trailing window of fixes, in m/s.
    pub fn calculate_speed(&self, locations: &[LocationPoint]) -> Option<f64> {
        let chain_start = self.breaks.last().copied().unwrap_or(0).min(locations.len());
        let locations = &locations[chain_start..];
        if locations.len() < 2 {
            return None;
        }
        let window = self.config.speed_window.max(2).min(locations.len());
        let trailing = &locations[locations.len() - window..];
        let first = trailing.first()?;
        let last = trailing.last()?;
        let elapsed_ms = last.timestamp_ms.checked_sub(first.timestamp_ms)?;
        if elapsed_ms == 0 {
            return None;
        }
        Some(haversine_m(first, last) / (elapsed_ms as f64 / 1000.0))
    }

    /// Monotonic hybrid distance for the session so far.
    pub fn calculate_total_distance(&mut self, locations: &[LocationPoint], step_count: u64) -> f64 {
        let gps = self.cached_gps_distance(locations);
        self.calibrate(gps, step_count);

        let step_based = step_count as f64 * self.step_length();
        let candidate = gps.max(step_based);
        let total = candidate.max(self.last_emitted);
        self.last_emitted = total;
        total
    }

    pub fn reset(&mut self) {
        self.average_step_length = None;
        self.last_emitted = 0.0;
        self.movement = None;
        self.window = None;
        self.last_gps_m = 0.0;
        self.gps_cache = None;
        self.breaks.clear();
    }

    /// `locations` starts at index `offset` of the session track.
    fn chained_distance(&self, locations: &[LocationPoint], offset: usize) -> f64 {
        locations
            .windows(2)
            .enumerate()
            .filter(|(i, _)| !self.breaks.contains(&(offset + i + 1)))
            .map(|(_, pair)| haversine_m(&pair[0], &pair[1]))
            .filter(|d| *d >= self.config.noise_floor_m)
            .sum()
    }

    /// Same as `calculate_gps_distance`, but only walks the points appended
    /// since the previous call when the sequence has just grown.
    fn cached_gps_distance(&mut self, locations: &[LocationPoint]) -> f64 {
        let extends_cache = |c: &GpsCache| {
            c.points <= locations.len() && locations[c.points - 1] == c.last_point
        };
        let distance = match self.gps_cache.filter(extends_cache) {
            Some(c) => {
                c.distance_m + self.chained_distance(&locations[c.points - 1..], c.points - 1)
            }
            None => self.calculate_gps_distance(locations),
        };
        self.gps_cache = locations.last().map(|last| GpsCache {
            points: locations.len(),
            last_point: *last,
            distance_m: distance,
        });
        distance
    }

    fn calibrate(&mut self, gps: f64, step_count: u64) {
        self.last_gps_m = gps;

        match self.movement {
            Some(MovementState::Walking) => {}
            // Unknown keeps the window open but cannot complete it.
            None => return,
            Some(_) => {
                self.window = None;
                return;
            }
        }

        let window = match self.window {
            Some(w) => w,
            None => {
                self.window = Some(CalibrationWindow {
                    start_steps: step_count,
                    start_gps_m: gps,
                });
                return;
            }
        };

        let step_delta = step_count.saturating_sub(window.start_steps);
        let gps_delta = gps - window.start_gps_m;
        if step_delta < self.config.min_calibration_steps
            || gps_delta < self.config.min_calibration_distance_m
        {
            return;
        }

        let sample = gps_delta / step_delta as f64;
        if (MIN_PLAUSIBLE_STEP_LENGTH_M..=MAX_PLAUSIBLE_STEP_LENGTH_M).contains(&sample) {
            let updated = match self.average_step_length {
                None => sample,
                Some(avg) => {
                    let alpha = self.config.calibration_smoothing;
                    alpha * sample + (1.0 - alpha) * avg
                }
            };
            debug!(sample, average = updated, "step length calibrated");
            self.average_step_length = Some(updated);
        } else {
            debug!(sample, "implausible step length sample discarded");
        }

        self.window = Some(CalibrationWindow {
            start_steps: step_count,
            start_gps_m: gps,
        });
    }
}

impl Default for DistanceCalculator {
    fn default() -> Self {
        Self::new(DistanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Degrees of latitude per meter.
    const DEG_PER_M: f64 = 1.0 / 111_194.93;

    fn north_track(meters: &[f64]) -> Vec<LocationPoint> {
        meters
            .iter()
            .enumerate()
            .map(|(i, m)| LocationPoint::new(37.0 + m * DEG_PER_M, 127.0, i as u64 * 10_000))
            .collect()
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of latitude along a meridian.
        let a = LocationPoint::new(0.0, 0.0, 0);
        let b = LocationPoint::new(1.0, 0.0, 0);
        let d = haversine_m(&a, &b);
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn gps_distance_sums_segments_and_drops_jitter() {
        let calc = DistanceCalculator::default();
        let track = north_track(&[0.0, 10.0, 10.4, 20.4]);
        let d = calc.calculate_gps_distance(&track);
        assert!((d - 20.0).abs() < 0.05, "got {d}");
        assert_eq!(calc.calculate_gps_distance(&track[..1]), 0.0);
    }

    #[test]
    fn speed_needs_two_points_and_elapsed_time() {
        let calc = DistanceCalculator::default();
        assert_eq!(calc.calculate_speed(&[]), None);
        let track = north_track(&[0.0, 14.0, 28.0]);
        assert_eq!(calc.calculate_speed(&track[..1]), None);
        let speed = calc.calculate_speed(&track).unwrap();
        assert!((speed - 1.4).abs() < 0.01, "got {speed}");

        let same_time = [
            LocationPoint::new(37.0, 127.0, 5_000),
            LocationPoint::new(37.0001, 127.0, 5_000),
        ];
        assert_eq!(calc.calculate_speed(&same_time), None);
    }

    #[test]
    fn uncalibrated_uses_default_step_length() {
        let mut calc = DistanceCalculator::default();
        assert_eq!(calc.average_step_length(), None);
        let total = calc.calculate_total_distance(&[], 100);
        assert!((total - 70.0).abs() < 1e-9);
    }

    #[test]
    fn calibrates_while_walking() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        calc.calculate_total_distance(&[], 0);

        let track = north_track(&[0.0, 10.0, 20.0, 30.0, 40.0]);
        let total = calc.calculate_total_distance(&track, 50);
        let avg = calc.average_step_length().unwrap();
        assert!((avg - 0.8).abs() < 0.01, "got {avg}");
        assert!(total >= 40.0 - 0.05);
    }

    #[test]
    fn refinement_is_smoothed() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        let first = north_track(&[0.0, 20.0, 40.0]);
        calc.calculate_total_distance(&first, 50);
        assert!((calc.average_step_length().unwrap() - 0.8).abs() < 0.01);

        // Next 50 steps cover 30 m (0.6 m/step): 0.3 * 0.6 + 0.7 * 0.8 = 0.74.
        let second = north_track(&[0.0, 20.0, 40.0, 55.0, 70.0]);
        calc.calculate_total_distance(&second, 100);
        let avg = calc.average_step_length().unwrap();
        assert!((avg - 0.74).abs() < 0.01, "got {avg}");
    }

    #[test]
    fn running_data_never_calibrates() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Running));
        let track = north_track(&[0.0, 30.0, 60.0]);
        calc.calculate_total_distance(&track, 50);
        assert_eq!(calc.average_step_length(), None);
    }

    #[test]
    fn running_segment_discards_open_window() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        calc.calculate_total_distance(&north_track(&[0.0, 5.0]), 5);
        calc.set_movement_state(Some(MovementState::Running));
        calc.calculate_total_distance(&north_track(&[0.0, 5.0, 60.0]), 40);
        calc.set_movement_state(Some(MovementState::Walking));
        // Window restarts here at 40 steps / 60 m.
        calc.calculate_total_distance(&north_track(&[0.0, 5.0, 60.0]), 40);
        calc.calculate_total_distance(&north_track(&[0.0, 5.0, 60.0, 75.0, 90.0]), 80);
        let avg = calc.average_step_length().unwrap();
        assert!((avg - 0.75).abs() < 0.01, "got {avg}");
    }

    #[test]
    fn implausible_samples_are_ignored() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        // 200 m over 25 steps = 8 m/step.
        let track = north_track(&[0.0, 100.0, 200.0]);
        calc.calculate_total_distance(&track, 25);
        assert_eq!(calc.average_step_length(), None);
    }

    #[test]
    fn total_never_decreases_after_fix_correction() {
        let mut calc = DistanceCalculator::default();
        let long = north_track(&[0.0, 50.0, 100.0]);
        let first = calc.calculate_total_distance(&long, 10);
        let corrected = north_track(&[0.0, 40.0, 80.0]);
        let second = calc.calculate_total_distance(&corrected, 10);
        assert!(second >= first);
        assert_eq!(second, first);
    }

    #[test]
    fn reset_clears_calibration_and_floor() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        calc.calculate_total_distance(&north_track(&[0.0, 20.0, 40.0]), 50);
        assert!(calc.average_step_length().is_some());
        calc.reset();
        assert_eq!(calc.average_step_length(), None);
        assert_eq!(calc.last_emitted_distance(), 0.0);
        assert_eq!(calc.calculate_total_distance(&[], 0), 0.0);
    }

    #[test]
    fn incremental_gps_total_matches_full_recompute() {
        let mut calc = DistanceCalculator::default();
        let full = north_track(&[0.0, 12.0, 12.5, 25.0, 31.0, 44.0, 60.0]);
        for n in 1..=full.len() {
            calc.calculate_total_distance(&full[..n], 0);
        }
        let incremental = calc.last_emitted_distance();
        let recomputed = calc.calculate_gps_distance(&full);
        assert!((incremental - recomputed).abs() < 1e-6);
    }

    #[test]
    fn chain_break_skips_the_bridging_segment() {
        let mut calc = DistanceCalculator::default();
        let track = north_track(&[0.0, 10.0, 20.0, 60.0, 70.0]);
        calc.calculate_total_distance(&track[..3], 0);
        calc.break_chain_at(3);
        calc.calculate_total_distance(&track, 0);

        assert!((calc.last_gps_distance() - 30.0).abs() < 0.05);
        assert!((calc.calculate_gps_distance(&track) - 30.0).abs() < 0.05);
        // Speed only looks at the fixes after the break.
        let speed = calc.calculate_speed(&track).unwrap();
        assert!((speed - 1.0).abs() < 0.01, "got {speed}");
        assert_eq!(calc.calculate_speed(&track[..4]), None);
    }

    #[test]
    fn discarded_window_cannot_complete() {
        let mut calc = DistanceCalculator::default();
        calc.initialize(0);
        calc.set_movement_state(Some(MovementState::Walking));
        calc.calculate_total_distance(&north_track(&[0.0, 10.0]), 25);
        calc.discard_window();
        // Reopens at 25 steps / 10 m, so 30 more steps over 12 m stay short.
        calc.calculate_total_distance(&north_track(&[0.0, 10.0]), 25);
        calc.calculate_total_distance(&north_track(&[0.0, 10.0, 22.0]), 55);
        assert_eq!(calc.average_step_length(), None);
    }

    proptest! {
        #[test]
        fn total_distance_is_monotonic(
            updates in proptest::collection::vec((0usize..6, 0u64..400), 1..40),
        ) {
            let mut calc = DistanceCalculator::default();
            calc.initialize(0);
            calc.set_movement_state(Some(MovementState::Walking));
            let full = north_track(&[0.0, 12.0, 25.0, 31.0, 44.0, 60.0]);
            let mut previous = 0.0;
            for (points, steps) in updates {
                let total = calc.calculate_total_distance(&full[..points], steps);
                prop_assert!(total >= previous);
                previous = total;
            }
        }
    }
}
