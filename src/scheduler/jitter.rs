use rand::prelude::*;
use std::time::Duration;

pub const JITTER_LOW: f64 = 0.9;
pub const JITTER_HIGH: f64 = 1.1;
/// No two posts are ever closer than this, whatever the configured interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// `base_minutes * factor`, with `factor` clamped to the jitter band and the
/// result floored at [`MIN_INTERVAL`].
pub fn jittered_interval(base_minutes: u32, factor: f64) -> Duration {
    let factor = factor.clamp(JITTER_LOW, JITTER_HIGH);
    let secs = (f64::from(base_minutes) * 60.0 * factor).max(MIN_INTERVAL.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Draws a uniform factor in `[0.9, 1.1]` and applies it.
pub fn draw_interval(base_minutes: u32) -> Duration {
    let mut rng = rand::rng();
    jittered_interval(base_minutes, rng.random_range(JITTER_LOW..=JITTER_HIGH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawn_intervals_stay_in_band() {
        for base in [6u32, 10, 60, 240] {
            let lo = Duration::from_secs_f64(f64::from(base) * 60.0 * JITTER_LOW);
            let hi = Duration::from_secs_f64(f64::from(base) * 60.0 * JITTER_HIGH);
            for _ in 0..500 {
                let d = draw_interval(base);
                assert!(d >= lo && d <= hi, "{d:?} outside [{lo:?}, {hi:?}] for base {base}");
                assert!(d >= MIN_INTERVAL);
            }
        }
    }

    #[test]
    fn floor_wins_for_short_intervals() {
        assert_eq!(jittered_interval(1, 1.1), MIN_INTERVAL);
        assert_eq!(jittered_interval(5, 0.9), MIN_INTERVAL);
        assert_eq!(draw_interval(2), MIN_INTERVAL);
    }

    #[test]
    fn factor_is_clamped() {
        let near = |d: Duration, secs: f64| (d.as_secs_f64() - secs).abs() < 1e-3;
        assert!(near(jittered_interval(60, 5.0), 66.0 * 60.0));
        assert!(near(jittered_interval(60, 0.0), 54.0 * 60.0));
    }
}
