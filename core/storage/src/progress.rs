//! Download progress reporting.

/// A progress update emitted while a restore streams to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Percentage of the reported remote size written so far.
    Percent(u8),
    /// Bytes written so far, when the remote size is unknown.
    Bytes(u64),
}

/// Turns written byte counts into [`Progress`] updates.
///
/// Percentages never decrease, stay within `0..=100`, and `100` is only
/// produced by [`ProgressTracker::finish`].
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total: Option<u64>,
    written: u64,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    /// A size of zero counts as unknown.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            written: 0,
            last_percent: None,
        }
    }

    /// Record `n` more bytes written. Returns an update if one is due.
    pub fn advance(&mut self, n: usize) -> Option<Progress> {
        self.written += n as u64;

        match self.total {
            Some(total) => {
                let percent = (self.written.saturating_mul(100) / total).min(99) as u8;
                self.emit_percent(percent)
            }
            None => Some(Progress::Bytes(self.written)),
        }
    }

    /// Mark the transfer complete.
    pub fn finish(&mut self) -> Option<Progress> {
        match self.total {
            Some(_) => self.emit_percent(100),
            None => None,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn emit_percent(&mut self, percent: u8) -> Option<Progress> {
        if self.last_percent.is_some_and(|last| last >= percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(Progress::Percent(percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_size() {
        let mut tracker = ProgressTracker::new(Some(10));

        assert_eq!(tracker.advance(5), Some(Progress::Percent(50)));
        assert_eq!(tracker.advance(5), Some(Progress::Percent(99)));
        assert_eq!(tracker.finish(), Some(Progress::Percent(100)));
        assert_eq!(tracker.written(), 10);
    }

    #[test]
    fn test_unknown_size_reports_bytes() {
        let mut tracker = ProgressTracker::new(None);

        assert_eq!(tracker.advance(8192), Some(Progress::Bytes(8192)));
        assert_eq!(tracker.advance(100), Some(Progress::Bytes(8292)));
        assert_eq!(tracker.finish(), None);
    }

    #[test]
    fn test_zero_size_is_unknown() {
        let mut tracker = ProgressTracker::new(Some(0));
        assert_eq!(tracker.advance(3), Some(Progress::Bytes(3)));
    }

    #[test]
    fn test_repeated_percent_suppressed() {
        let mut tracker = ProgressTracker::new(Some(1000));

        assert_eq!(tracker.advance(1), Some(Progress::Percent(0)));
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.advance(10), Some(Progress::Percent(1)));
    }

    #[test]
    fn test_overshoot_stays_below_completion() {
        let mut tracker = ProgressTracker::new(Some(4));

        assert_eq!(tracker.advance(8), Some(Progress::Percent(99)));
        assert_eq!(tracker.finish(), Some(Progress::Percent(100)));
    }

    proptest! {
        #[test]
        fn prop_percent_monotonic_and_ends_at_100(
            total in 1u64..100_000,
            chunks in proptest::collection::vec(1usize..10_000, 0..64),
        ) {
            let mut tracker = ProgressTracker::new(Some(total));
            let mut seen = Vec::new();

            for chunk in chunks {
                if let Some(Progress::Percent(p)) = tracker.advance(chunk) {
                    seen.push(p);
                }
            }
            if let Some(Progress::Percent(p)) = tracker.finish() {
                seen.push(p);
            }

            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(seen.iter().all(|p| *p <= 100));
            prop_assert_eq!(seen.last().copied(), Some(100));
            prop_assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
        }
    }
}
