//! Diurnal load model: hour of day -> load multiplier in `[0.05, 0.90]`.

/// Relative load per hour (0h..23h). Quiet overnight, ramping through the
/// morning, peaking mid-afternoon, declining through the evening.
pub const HOURLY_LOAD_WEIGHTS: [u8; 24] = [
    10, 8, 6, 5, 5, 8, 15, 30, 50, 65, 75, 80, 82, 85, 90, 88, 80, 70, 60, 50, 40, 30, 20, 15,
];

pub const CPU_INFLUENCE: f64 = 0.8;
pub const MEMORY_INFLUENCE: f64 = 0.3;
pub const DISK_INFLUENCE: f64 = 0.1;

/// Influence factors in metric order (cpu, memory, disk).
pub const INFLUENCE_FACTORS: [f64; 3] = [CPU_INFLUENCE, MEMORY_INFLUENCE, DISK_INFLUENCE];

/// Load multiplier for an hour of day. Hours past 23 wrap around.
pub fn load_multiplier(hour: u32) -> f64 {
    let idx = (hour % 24) as usize;
    f64::from(HOURLY_LOAD_WEIGHTS[idx]) / 100.0
}

/// Additive time-of-day term: `baseline * (multiplier - 0.5) * k`.
pub fn time_of_day_influence(baseline: f64, multiplier: f64, k: f64) -> f64 {
    baseline * (multiplier - 0.5) * k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multipliers() {
        assert_eq!(load_multiplier(0), 0.10);
        assert_eq!(load_multiplier(3), 0.05);
        assert_eq!(load_multiplier(14), 0.90);
        assert_eq!(load_multiplier(23), 0.15);
    }

    #[test]
    fn wraps_past_midnight() {
        assert_eq!(load_multiplier(24), load_multiplier(0));
        assert_eq!(load_multiplier(38), load_multiplier(14));
    }

    #[test]
    fn afternoon_is_busier_than_night() {
        let night = (0..6).map(load_multiplier).fold(0.0, f64::max);
        let afternoon = (12..17).map(load_multiplier).fold(1.0, f64::min);
        assert!(afternoon > night);
    }

    #[test]
    fn influence_is_signed_around_half_load() {
        assert!(time_of_day_influence(50.0, 0.9, CPU_INFLUENCE) > 0.0);
        assert!(time_of_day_influence(50.0, 0.1, CPU_INFLUENCE) < 0.0);
        assert_eq!(time_of_day_influence(50.0, 0.5, CPU_INFLUENCE), 0.0);
        assert!((time_of_day_influence(50.0, 0.9, CPU_INFLUENCE) - 16.0).abs() < 1e-9);
    }
}
