//! Answer Scoring
//!
//! Pure scoring function: points awarded for an answer given correctness,
//! elapsed time, and the round's time limit. Integer arithmetic only, so
//! identical inputs score identically on every platform.

/// Maximum points for an instant correct answer.
pub const POINTS_BASE: u32 = 1000;

/// Guaranteed points for a correct answer, however slow.
pub const POINTS_FLOOR: u32 = 100;

/// Compute points for an answer with the default base and floor.
///
/// An incorrect (or absent) answer scores 0. A correct answer scores
/// proportionally to time remaining, never below [`POINTS_FLOOR`]:
/// answering the instant a round opens yields [`POINTS_BASE`], answering
/// as the timer expires still yields the floor.
#[inline]
pub fn points(correct: bool, elapsed_ms: u64, time_limit_ms: u64) -> u32 {
    points_with(correct, elapsed_ms, time_limit_ms, POINTS_BASE, POINTS_FLOOR)
}

/// Compute points with an explicit base and floor.
///
/// `elapsed_ms` is clamped to `[0, time_limit_ms]` before use. The
/// proportional term is `round(remaining / limit * base)`, computed as a
/// rounded integer division.
pub fn points_with(
    correct: bool,
    elapsed_ms: u64,
    time_limit_ms: u64,
    base: u32,
    floor: u32,
) -> u32 {
    if !correct {
        return 0;
    }
    if time_limit_ms == 0 {
        return floor.max(base);
    }

    let elapsed = elapsed_ms.min(time_limit_ms);
    let remaining = (time_limit_ms - elapsed) as u128;
    let limit = time_limit_ms as u128;

    // Rounded integer division: round(remaining / limit * base).
    let scaled = (remaining * base as u128 + limit / 2) / limit;

    floor.max(scaled as u32)
}
