use crate::reactor::WatcherId;

use std::time::Duration;

/// Handle to a timer returned by
/// [`Reactor::install_timer`](crate::Reactor::install_timer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub(crate) watcher: WatcherId,
    pub(crate) serial: u32,
}

impl TimerId {
    /// The watcher owning the timer.
    pub fn watcher(&self) -> WatcherId {
        self.watcher
    }
}

/// Direction in which an aligned timer may be nudged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignDirection {
    /// Only ever fire earlier than requested.
    Earlier,

    /// Prefer firing later; fall back to earlier when firing later would
    /// push the countdown past the period.
    Later,

    /// Whichever candidate is closer, weighted by the configured bias.
    Nearest,
}

/// Which compatible timer to align with when several exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignTarget {
    Shorter,
    Longer,
}

/// Alignment request attached to a timer.
///
/// Alignment is best effort: when no timer with a proportional period exists,
/// the countdown is used unmodified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignPolicy {
    direction: Option<AlignDirection>,
    target: AlignTarget,
}

impl AlignPolicy {
    /// No alignment.
    pub const fn none() -> Self {
        Self {
            direction: None,
            target: AlignTarget::Longer,
        }
    }

    pub const fn earlier() -> Self {
        Self {
            direction: Some(AlignDirection::Earlier),
            target: AlignTarget::Longer,
        }
    }

    pub const fn later() -> Self {
        Self {
            direction: Some(AlignDirection::Later),
            target: AlignTarget::Longer,
        }
    }

    pub const fn nearest() -> Self {
        Self {
            direction: Some(AlignDirection::Nearest),
            target: AlignTarget::Longer,
        }
    }

    /// Aligns with the longest compatible period (the default).
    pub const fn to_longer(mut self) -> Self {
        self.target = AlignTarget::Longer;
        self
    }

    pub const fn to_shorter(mut self) -> Self {
        self.target = AlignTarget::Shorter;
        self
    }

    pub fn direction(&self) -> Option<AlignDirection> {
        self.direction
    }

    pub fn target(&self) -> AlignTarget {
        self.target
    }
}

impl Default for AlignPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// A countdown timer owned by one watcher.
pub(crate) struct TimerEntry {
    pub(crate) serial: u32,

    /// `None` disables the timer.
    pub(crate) period: Option<Duration>,

    /// Never exceeds `period`.
    pub(crate) remaining: Duration,

    pub(crate) align: AlignPolicy,
    pub(crate) tag: usize,
}

impl TimerEntry {
    pub(crate) fn is_enabled(&self) -> bool {
        self.period.is_some()
    }

    /// Subtracts `elapsed`, saturating at zero.
    pub(crate) fn advance(&mut self, elapsed: Duration) {
        if self.is_enabled() {
            self.remaining = self.remaining.saturating_sub(elapsed);
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.is_enabled() && self.remaining.is_zero()
    }
}

/// Tuning for the alignment heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AlignParams {
    /// `Nearest` picks the later candidate when
    /// `(later - r) * 100 <= (r - earlier) * nearest_bias_percent`.
    pub(crate) nearest_bias_percent: u32,

    /// Largest accepted shift, as a percentage of the period.
    pub(crate) max_shift_percent: u32,
}

/// Computes the aligned countdown for a timer of `period` whose natural
/// countdown is `remaining`.
///
/// `partners` yields `(period, remaining)` for every other enabled timer.
/// Compatible partners have a period that is a multiple or a divisor of
/// `period`. The result always lies in `(0, period]` unless `remaining` is
/// returned unmodified.
pub(crate) fn align(
    period: Duration,
    remaining: Duration,
    policy: AlignPolicy,
    partners: impl Iterator<Item = (Duration, Duration)>,
    params: AlignParams,
) -> Duration {
    let Some(direction) = policy.direction else {
        return remaining;
    };

    let p = period.as_nanos();
    if p == 0 {
        return remaining;
    }

    let partner = partners
        .map(|(q, s)| (q.as_nanos(), s.as_nanos()))
        .filter(|&(q, _)| q != 0 && (p % q == 0 || q % p == 0))
        .reduce(|best, cand| match policy.target {
            AlignTarget::Longer if cand.0 > best.0 => cand,
            AlignTarget::Shorter if cand.0 < best.0 => cand,
            _ => best,
        });

    let Some((q, s)) = partner else {
        return remaining;
    };

    let r = remaining.as_nanos();
    let g = p.min(q);
    let phase = s % g;
    let offset = (r % g + g - phase) % g;

    if offset == 0 {
        return remaining;
    }

    let earlier = Some(r - offset).filter(|&e| e > 0);
    let later = Some(r - offset + g).filter(|&l| l <= p);

    let chosen = match direction {
        AlignDirection::Earlier => earlier,
        AlignDirection::Later => later.or(earlier),
        AlignDirection::Nearest => match (earlier, later) {
            (Some(e), Some(l)) => {
                if (l - r) * 100 <= (r - e) * params.nearest_bias_percent as u128 {
                    Some(l)
                } else {
                    Some(e)
                }
            }
            (e, l) => e.or(l),
        },
    };

    let Some(chosen) = chosen else {
        return remaining;
    };

    if chosen.abs_diff(r) * 100 > p * params.max_shift_percent as u128 {
        return remaining;
    }

    Duration::from_nanos(chosen as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: AlignParams = AlignParams {
        nearest_bias_percent: 100,
        max_shift_percent: 50,
    };

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_no_policy_is_untouched() {
        let partners = [(ms(100), ms(70))];
        let r = align(ms(300), ms(300), AlignPolicy::none(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(300));
    }

    #[test]
    fn test_earlier_to_divisor() {
        // Partner fires at 70, 170, 270; the 300ms timer moves to 270.
        let partners = [(ms(100), ms(70))];
        let r = align(ms(300), ms(300), AlignPolicy::earlier(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(270));
    }

    #[test]
    fn test_later_falls_back_when_past_period() {
        let partners = [(ms(100), ms(70))];
        let r = align(ms(300), ms(300), AlignPolicy::later(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(270));
    }

    #[test]
    fn test_later_within_period() {
        // A reset timer with 250ms left may slide to 270ms.
        let partners = [(ms(100), ms(70))];
        let r = align(ms(300), ms(250), AlignPolicy::later(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(270));
    }

    #[test]
    fn test_align_to_multiple() {
        // A 100ms timer next to a 300ms timer with 260ms left fires at 60,
        // 160 and 260.
        let partners = [(ms(300), ms(260))];
        let r = align(ms(100), ms(100), AlignPolicy::earlier(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(60));
    }

    #[test]
    fn test_nearest_and_bias() {
        let partners = [(ms(100), ms(90))];

        // Only 90 qualifies: 190 is past the 100ms period.
        let r = align(ms(100), ms(95), AlignPolicy::nearest(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(90));

        // 130 is 10ms earlier, 230 is 90ms later.
        let partners = [(ms(100), ms(30))];
        let r = align(ms(300), ms(140), AlignPolicy::nearest(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(130));

        // 130 is 20ms earlier, 230 is 80ms later; a 500% bias favours later.
        let biased = AlignParams {
            nearest_bias_percent: 500,
            ..PARAMS
        };
        let r = align(ms(300), ms(150), AlignPolicy::nearest(), partners.into_iter(), biased);
        assert_eq!(r, ms(230));
    }

    #[test]
    fn test_incompatible_periods_ignored() {
        let partners = [(ms(70), ms(10)), (ms(0), ms(0))];
        let r = align(ms(100), ms(100), AlignPolicy::nearest(), partners.into_iter(), PARAMS);
        assert_eq!(r, ms(100));
    }

    #[test]
    fn test_prefers_longer_or_shorter() {
        let partners = [(ms(50), ms(10)), (ms(200), ms(180))];

        let longer = align(ms(100), ms(100), AlignPolicy::earlier(), partners.into_iter(), PARAMS);
        assert_eq!(longer, ms(80));

        let shorter = align(
            ms(100),
            ms(100),
            AlignPolicy::earlier().to_shorter(),
            partners.into_iter(),
            PARAMS,
        );
        assert_eq!(shorter, ms(60));
    }

    #[test]
    fn test_max_shift_rejected() {
        let tight = AlignParams {
            max_shift_percent: 10,
            ..PARAMS
        };
        let partners = [(ms(100), ms(50))];
        let r = align(ms(100), ms(100), AlignPolicy::earlier(), partners.into_iter(), tight);
        assert_eq!(r, ms(100));
    }

    #[test]
    fn test_idempotent() {
        let partners = [(ms(100), ms(70))];
        let once = align(ms(300), ms(300), AlignPolicy::later(), partners.into_iter(), PARAMS);
        let twice = align(ms(300), once, AlignPolicy::later(), partners.into_iter(), PARAMS);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_advance_saturates() {
        let mut entry = TimerEntry {
            serial: 0,
            period: Some(ms(10)),
            remaining: ms(10),
            align: AlignPolicy::none(),
            tag: 0,
        };

        entry.advance(ms(25));
        assert!(entry.is_expired());
        assert!(entry.remaining <= entry.period.unwrap());

        entry.period = None;
        entry.remaining = ms(5);
        entry.advance(ms(25));
        assert_eq!(entry.remaining, ms(5));
        assert!(!entry.is_expired());
    }
}
