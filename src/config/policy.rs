//! Fetch policy value types
//!
//! Small validated types shared by the resolver, the TOML bundle and the
//! fetch controller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

/// Uniform random delay applied before every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDelay {
    min: Duration,
    max: Duration,
}

impl RequestDelay {
    /// Creates a delay range, rejecting `min > max`
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidDelay(format!(
                "min {:?} is greater than max {:?}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// No delay
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draws a delay uniformly from `[min, max]`
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

impl Default for RequestDelay {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for RequestDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.min.as_secs_f64(), self.max.as_secs_f64())
    }
}

/// Parses `"min,max"` in seconds, or a single value for a fixed delay
///
/// # Examples
///
/// ```
/// use shelfscan::config::RequestDelay;
/// use std::time::Duration;
///
/// let delay: RequestDelay = "3,5".parse().unwrap();
/// assert_eq!(delay.min(), Duration::from_secs(3));
/// assert_eq!(delay.max(), Duration::from_secs(5));
/// ```
impl FromStr for RequestDelay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<Duration, ConfigError> {
            let secs: f64 = part
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidDelay(format!("'{}' is not a number", s)))?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::InvalidDelay(format!(
                    "'{}' must be a non-negative number of seconds",
                    s
                )));
            }
            Duration::try_from_secs_f64(secs)
                .map_err(|e| ConfigError::InvalidDelay(format!("'{}': {}", s, e)))
        };

        match s.split_once(',') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => {
                let fixed = parse(s)?;
                Self::new(fixed, fixed)
            }
        }
    }
}

/// Retry and backoff policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Checks the multiplier is at least 1.0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Backoff before attempt `attempt` (0-based)
    ///
    /// The first attempt has no backoff; retry `n` waits
    /// `base * multiplier^(n-1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let secs = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    /// Total attempts, counting the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Default first status of the transient range
pub const DEFAULT_TRANSIENT_FROM: u16 = 500;

/// Default individually-listed transient statuses
pub const DEFAULT_TRANSIENT_CODES: [u16; 1] = [429];

/// Which statuses are parsed and which are worth retrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTable {
    parse_codes: BTreeMap<u16, bool>,
    transient_from: u16,
    transient_codes: BTreeSet<u16>,
}

impl StatusTable {
    /// Builds a validated table
    ///
    /// The parse map must be non-empty, contain at least one success entry,
    /// and only use codes in `100..=599`.
    pub fn new(
        parse_codes: BTreeMap<u16, bool>,
        transient_from: u16,
        transient_codes: impl IntoIterator<Item = u16>,
    ) -> Result<Self, ConfigError> {
        if parse_codes.is_empty() {
            return Err(ConfigError::InvalidStatusMap("no status codes".to_string()));
        }
        if let Some(code) = parse_codes.keys().find(|c| !(100..=599).contains(*c)) {
            return Err(ConfigError::InvalidStatusMap(format!(
                "status {} is outside 100..=599",
                code
            )));
        }
        if !parse_codes.values().any(|ok| *ok) {
            return Err(ConfigError::InvalidStatusMap(
                "no status is marked as success".to_string(),
            ));
        }
        Ok(Self {
            parse_codes,
            transient_from,
            transient_codes: transient_codes.into_iter().collect(),
        })
    }

    /// Whether the response body should be parsed
    pub fn is_success(&self, status: u16) -> bool {
        self.parse_codes.get(&status).copied().unwrap_or(false)
    }

    /// Whether a status is worth retrying
    pub fn is_transient(&self, status: u16) -> bool {
        status >= self.transient_from || self.transient_codes.contains(&status)
    }

    pub fn parse_codes(&self) -> &BTreeMap<u16, bool> {
        &self.parse_codes
    }

    pub fn transient_from(&self) -> u16 {
        self.transient_from
    }

    pub fn transient_codes(&self) -> &BTreeSet<u16> {
        &self.transient_codes
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self {
            parse_codes: BTreeMap::from([(200, true)]),
            transient_from: DEFAULT_TRANSIENT_FROM,
            transient_codes: DEFAULT_TRANSIENT_CODES.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_parsing() {
        let delay: RequestDelay = "3,5".parse().unwrap();
        assert_eq!(delay.min(), Duration::from_secs(3));
        assert_eq!(delay.max(), Duration::from_secs(5));

        let fixed: RequestDelay = "0.25".parse().unwrap();
        assert_eq!(fixed.min(), Duration::from_millis(250));
        assert_eq!(fixed.max(), fixed.min());

        assert!(matches!(
            "5,3".parse::<RequestDelay>(),
            Err(ConfigError::InvalidDelay(_))
        ));
        assert!("a,b".parse::<RequestDelay>().is_err());
        assert!("-1".parse::<RequestDelay>().is_err());
        assert!(matches!(
            "1e20".parse::<RequestDelay>(),
            Err(ConfigError::InvalidDelay(_))
        ));
        assert!(matches!(
            "0,1e300".parse::<RequestDelay>(),
            Err(ConfigError::InvalidDelay(_))
        ));
    }

    #[test]
    fn test_delay_sample_in_range() {
        let delay = RequestDelay::new(Duration::from_millis(10), Duration::from_millis(20)).unwrap();
        for _ in 0..100 {
            let d = delay.sample();
            assert!(d >= delay.min() && d <= delay.max());
        }
        assert_eq!(RequestDelay::none().sample(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[test]
    fn test_retry_multiplier_validation() {
        let mut policy = RetryPolicy::default();
        assert!(policy.validate().is_ok());
        policy.backoff_multiplier = 0.5;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_status_table() {
        let table = StatusTable::default();
        assert!(table.is_success(200));
        assert!(!table.is_success(404));
        assert!(table.is_transient(503));
        assert!(table.is_transient(429));
        assert!(!table.is_transient(404));
    }

    #[test]
    fn test_invalid_status_tables() {
        assert!(matches!(
            StatusTable::new(BTreeMap::new(), 500, []),
            Err(ConfigError::InvalidStatusMap(_))
        ));
        assert!(matches!(
            StatusTable::new(BTreeMap::from([(404, false)]), 500, []),
            Err(ConfigError::InvalidStatusMap(_))
        ));
        assert!(matches!(
            StatusTable::new(BTreeMap::from([(200, true), (999, false)]), 500, []),
            Err(ConfigError::InvalidStatusMap(_))
        ));
    }
}
