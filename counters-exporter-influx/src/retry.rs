use std::{fmt, str::FromStr, time::Duration};

use quanta::Clock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    source::{CounterSource, SourceError},
    timing::Sleep,
};

/// Default budget for acquiring the counter source at startup.
pub const DEFAULT_RETRY_BUDGET: RetryBudget = RetryBudget::Within(Duration::from_secs(5));

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long to keep retrying the initial connection to the counter source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// Retry until the source can be opened, however long that takes.
    Unbounded,

    /// Try exactly once, and fail immediately if the source cannot be opened.
    Once,

    /// Keep retrying until the given amount of time has elapsed since the first failed attempt.
    Within(Duration),
}

/// Error parsing a [`RetryBudget`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseBudgetError {
    /// The value is neither a number of seconds nor `off`.
    #[error("syntax error: '{0}' is neither a number of seconds nor 'off'")]
    Syntax(String),

    /// The value is a number of seconds, but negative or too large.
    #[error("range error: '{0}' is not a valid number of seconds")]
    Range(String),
}

impl FromStr for RetryBudget {
    type Err = ParseBudgetError;

    /// Parses a number of seconds, or `off` (in any case) for an unbounded budget.
    ///
    /// Zero means a single attempt.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("off") {
            return Ok(RetryBudget::Unbounded);
        }

        let secs = s.parse::<f64>().map_err(|_| ParseBudgetError::Syntax(s.to_string()))?;
        if secs.is_nan() {
            return Err(ParseBudgetError::Syntax(s.to_string()));
        }

        match Duration::try_from_secs_f64(secs) {
            Ok(Duration::ZERO) => Ok(RetryBudget::Once),
            Ok(limit) => Ok(RetryBudget::Within(limit)),
            Err(_) => Err(ParseBudgetError::Range(s.to_string())),
        }
    }
}

impl fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryBudget::Unbounded => f.write_str("off"),
            RetryBudget::Once => f.write_str("0"),
            RetryBudget::Within(limit) => write!(f, "{}", limit.as_secs_f64()),
        }
    }
}

/// The counter source could not be opened within the retry budget.
#[derive(Debug, Error)]
#[error("could not open counter source after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    attempts: usize,

    #[source]
    last_error: SourceError,
}

impl RetryError {
    /// Returns the number of attempts that were made.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns the error from the final attempt.
    pub fn last_error(&self) -> &SourceError {
        &self.last_error
    }
}

/// Opens a counter source, retrying on failure until the budget is exhausted.
///
/// Budget accounting starts at the first failed attempt. Between attempts the source's transient error state is reset
/// and the caller's sleeper is asked to pause for `delay`. After each pause, if more time than the budget allows has
/// elapsed since the first failure, the last error is returned.
///
/// Put differently: a source that fails `k` times before succeeding is opened if and only if `k * delay` fits within
/// the budget.
///
/// # Errors
///
/// If the budget is exhausted before the source could be opened, an error is returned carrying the last failure.
pub fn open_with_retry<S, P>(
    source: &mut S,
    budget: RetryBudget,
    delay: Duration,
    clock: &Clock,
    sleeper: &mut P,
) -> Result<S::Handle, RetryError>
where
    S: CounterSource,
    P: Sleep + ?Sized,
{
    let mut attempts = 0;
    let mut first_failure = None;

    loop {
        attempts += 1;
        let error = match source.open() {
            Ok(handle) => {
                if attempts > 1 {
                    info!(attempts, "Opened counter source.");
                }
                return Ok(handle);
            }
            Err(e) => e,
        };

        if first_failure.is_none() {
            match budget {
                RetryBudget::Once => return Err(RetryError { attempts, last_error: error }),
                RetryBudget::Within(limit) => {
                    warn!(error = %error, "Can't open counter source, retrying for {:?}.", limit);
                }
                RetryBudget::Unbounded => {
                    warn!(error = %error, "Can't open counter source, retrying indefinitely.");
                }
            }
            first_failure = Some(clock.now());
        } else {
            debug!(attempts, error = %error, "Counter source still unavailable.");
        }

        source.reset_error();
        sleeper.sleep(delay);

        if let (RetryBudget::Within(limit), Some(started)) = (budget, first_failure) {
            if clock.now().duration_since(started) > limit {
                return Err(RetryError { attempts, last_error: error });
            }
        }
    }
}
