//! Grading policy: the fixed percentage-to-letter band table and the
//! pass threshold used by exam statistics.

pub const PASS_THRESHOLD: f64 = 40.0;

/// Half-up rounding to two decimals, matching the stored percentage
/// format: `round2(66.666...) == 66.67`.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Letter grade for a percentage. A student absent for every subject
/// grades F regardless of percentage.
pub fn grade_for(percentage: f64, all_absent: bool) -> &'static str {
    if all_absent {
        return "F";
    }
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C"
    } else if percentage >= 40.0 {
        "D"
    } else {
        "F"
    }
}

pub fn is_pass(percentage: f64) -> bool {
    percentage >= PASS_THRESHOLD
}
