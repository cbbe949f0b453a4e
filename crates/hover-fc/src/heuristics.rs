//! Tiered thrust corrections.
//!
//! Both functions take the current and previous deviation of a channel from its
//! baseline and return a thrust delta. The tiers are independent and add up,
//! so a large, persistent deviation compounds into a large correction. The
//! numbers were tuned by hand on one airframe and are load-bearing.

/// acc.z deviations inside this band need no correction.
pub const ACC_DEADBAND: f64 = 0.01;
pub const ACC_BASE_STEP: i32 = 200;

/// Previous deviation beyond this adds [`ACC_TREND_STEP`].
pub const ACC_TREND_THRESHOLD: f64 = 0.02;
pub const ACC_TREND_STEP: i32 = 300;

/// Both deviations beyond this add [`ACC_STRONG_STEP`].
pub const ACC_STRONG_THRESHOLD: f64 = 0.06;
pub const ACC_STRONG_STEP: i32 = 500;

/// Both deviations beyond this add a term proportional to their sum.
pub const ACC_PROPORTIONAL_THRESHOLD: f64 = 0.04;
pub const ACC_PROPORTIONAL_GAIN: f64 = 10_000.0;
pub const ACC_PROPORTIONAL_CAP: f64 = 3000.0;

/// Both deviations beyond this add [`ACC_SEVERE_STEP`].
pub const ACC_SEVERE_THRESHOLD: f64 = 0.10;
pub const ACC_SEVERE_STEP: i32 = 500;

/// gyro.z deviations inside this band need no correction.
pub const GYRO_DEADBAND: f64 = 2.0;
pub const GYRO_STEP: i32 = 200;
/// Previous deviation beyond this adds another [`GYRO_STEP`].
pub const GYRO_HARD_THRESHOLD: f64 = 20.0;

/// Thrust delta from vertical acceleration.
///
/// `deviation` is acc.z minus its baseline; positive means climbing, so the
/// delta has the opposite sign. Corrections are mirror-symmetric.
pub fn acc_adjust(deviation: f64, previous: f64) -> i32 {
    if deviation < -ACC_DEADBAND {
        acc_magnitude(-deviation, -previous)
    } else if deviation > ACC_DEADBAND {
        -acc_magnitude(deviation, previous)
    } else {
        0
    }
}

// Deviations here are already flipped so that "beyond threshold" means "greater than".
fn acc_magnitude(dev: f64, prev: f64) -> i32 {
    let mut delta = ACC_BASE_STEP;
    if prev > ACC_TREND_THRESHOLD {
        delta += ACC_TREND_STEP;
    }
    if prev > ACC_STRONG_THRESHOLD && dev > ACC_STRONG_THRESHOLD {
        delta += ACC_STRONG_STEP;
    }
    if prev > ACC_PROPORTIONAL_THRESHOLD && dev > ACC_PROPORTIONAL_THRESHOLD {
        let term = ((prev + dev - ACC_PROPORTIONAL_THRESHOLD) * ACC_PROPORTIONAL_GAIN)
            .min(ACC_PROPORTIONAL_CAP);
        delta += term.round() as i32;
    }
    if prev > ACC_SEVERE_THRESHOLD && dev > ACC_SEVERE_THRESHOLD {
        delta += ACC_SEVERE_STEP;
    }
    delta
}

/// Thrust delta from the yaw-axis gyro rate.
///
/// A strongly negative gyro.z (around -45) shows up while climbing and a
/// positive one while descending, so negative deviations reduce thrust.
/// Not part of the default hover loop; see [`crate::CorrectionPath`].
pub fn gyro_adjust(deviation: f64, previous: f64) -> i32 {
    if deviation < -GYRO_DEADBAND {
        -gyro_magnitude(-previous)
    } else if deviation > GYRO_DEADBAND {
        gyro_magnitude(previous)
    } else {
        0
    }
}

fn gyro_magnitude(prev: f64) -> i32 {
    let mut delta = GYRO_STEP;
    if prev > GYRO_HARD_THRESHOLD {
        delta += GYRO_STEP;
    }
    if prev > GYRO_DEADBAND {
        delta += GYRO_STEP;
    }
    delta
}
