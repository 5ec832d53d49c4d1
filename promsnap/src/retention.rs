//! Per-series retention cap.

use crate::error::ConfigError;
use crate::series::Series;

/// Samples kept per series unless configured otherwise.
pub const DEFAULT_RETENTION_CAP: usize = 1000;

/// Keeps each series to its most recent `cap` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    cap: usize,
}

impl RetentionPolicy {
    /// Creates a policy keeping at most `cap` samples per series.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetentionCap`] if `cap` is zero.
    pub fn new(cap: usize) -> Result<Self, ConfigError> {
        if cap == 0 {
            return Err(ConfigError::InvalidRetentionCap { cap });
        }
        Ok(Self { cap })
    }

    /// The configured cap.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Drops the oldest samples beyond the cap; returns how many were dropped.
    pub fn apply(&self, series: &mut Series) -> usize {
        let excess = series.len().saturating_sub(self.cap);
        if excess == 0 {
            return 0;
        }
        series.drop_oldest(excess)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            cap: DEFAULT_RETENTION_CAP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Labels;
    use crate::series::Sample;

    #[test]
    fn test_zero_cap_rejected() {
        assert!(matches!(
            RetentionPolicy::new(0),
            Err(ConfigError::InvalidRetentionCap { cap: 0 })
        ));
        assert_eq!(RetentionPolicy::default().cap(), DEFAULT_RETENTION_CAP);
    }

    #[test]
    fn test_apply_keeps_most_recent() {
        let policy = RetentionPolicy::new(3).unwrap();
        let mut series = Series::new(Labels::from_pairs([("__name__", "m")]));
        for ts in 0..5 {
            series.push(Sample::new(ts, 0.0));
        }

        assert_eq!(policy.apply(&mut series), 2);
        let kept: Vec<_> = series.samples().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![2, 3, 4]);

        // Already within the cap.
        assert_eq!(policy.apply(&mut series), 0);
    }
}
