//! Trust score engine.
//!
//! Scores rise with on-time payments and fall with late or missed ones,
//! always staying inside `[0, 850]`.

use super::types::MAX_TRUST_SCORE;

/// Points gained per on-time contribution.
pub const ON_TIME_REWARD: i64 = 15;

/// Points lost per late contribution.
pub const LATE_PENALTY: i64 = 25;

/// Points lost per missed contribution.
pub const MISSED_PENALTY: i64 = 60;

/// Computes a member's new trust score.
///
/// # Examples
///
/// ```
/// use padisave_core::circle::trust::update_score;
///
/// assert_eq!(update_score(450, 1, 0, 0), 465);
/// assert_eq!(update_score(450, 0, 1, 0), 425);
/// assert_eq!(update_score(840, 3, 0, 0), 850);
/// assert_eq!(update_score(10, 0, 0, 1), 0);
/// ```
#[must_use]
pub fn update_score(current: u16, on_time: u32, late: u32, missed: u32) -> u16 {
    let delta = ON_TIME_REWARD
        .saturating_mul(i64::from(on_time))
        .saturating_sub(LATE_PENALTY.saturating_mul(i64::from(late)))
        .saturating_sub(MISSED_PENALTY.saturating_mul(i64::from(missed)));

    let score = i64::from(current.min(MAX_TRUST_SCORE))
        .saturating_add(delta)
        .clamp(0, i64::from(MAX_TRUST_SCORE));

    // Clamped to [0, 850] above.
    u16::try_from(score).unwrap_or(MAX_TRUST_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_activity_keeps_score() {
        assert_eq!(update_score(450, 0, 0, 0), 450);
    }

    #[test]
    fn clamps_at_upper_bound() {
        assert_eq!(update_score(850, 10, 0, 0), 850);
        assert_eq!(update_score(849, 1, 0, 0), 850);
    }

    #[test]
    fn clamps_at_lower_bound() {
        assert_eq!(update_score(0, 0, 5, 5), 0);
        assert_eq!(update_score(30, 0, 0, 1), 0);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(update_score(u16::MAX, 0, 0, 0), 850);
    }

    #[test]
    fn huge_counts_do_not_overflow() {
        assert_eq!(update_score(450, u32::MAX, 0, 0), 850);
        assert_eq!(update_score(450, 0, u32::MAX, u32::MAX), 0);
    }

    #[test]
    fn missed_costs_more_than_late() {
        assert!(update_score(450, 0, 0, 1) < update_score(450, 0, 1, 0));
    }
}
