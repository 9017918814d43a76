//! Retry policy and call outcome classification.
//!
//! One policy object owns the whole retry loop: which statuses are transient,
//! how many attempts, and the backoff curve. Callers only ever see the final
//! [`CallOutcome`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::transport::{RawResponse, TransportError};
use crate::time::Pause;

pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry-after used when the header is absent or unparseable.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Lower bound on any signalled retry-after.
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Upper bound on any signalled retry-after.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Final result of one logical API call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// 2xx with the raw body.
    Success(String),
    /// 404 on a call that opted in to tolerating it.
    NotFound,
    /// 429, or transient statuses that outlasted the retry budget.
    RateLimited(Duration),
    /// Any other non-2xx. Never retried.
    Failure { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    NotFound,
    Transient,
    RateLimited,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub statuses: Vec<u16>,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before retry n is `backoff_factor * 2^(n-1)` seconds.
    pub backoff_factor: f64,
    pub max_backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            max_attempts: 6,
            backoff_factor: 0.3,
            max_backoff_secs: 120.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_transient(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(30) as i32;
        let secs = (self.backoff_factor * 2f64.powi(exp))
            .min(self.max_backoff_secs)
            .min(MAX_RETRY_AFTER.as_secs_f64());
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
    }

    fn classify(&self, status: u16, allow_missing: bool) -> StatusClass {
        match status {
            200..=299 => StatusClass::Success,
            404 if allow_missing => StatusClass::NotFound,
            s if self.is_transient(s) => StatusClass::Transient,
            429 => StatusClass::RateLimited,
            _ => StatusClass::Hard,
        }
    }

    /// Drive `send` until it yields a final outcome or the budget runs out.
    pub fn run(
        &self,
        pause: &dyn Pause,
        allow_missing: bool,
        mut send: impl FnMut() -> Result<RawResponse, TransportError>,
    ) -> Result<CallOutcome, TransportError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let exhausted = attempt >= attempts;

            let resp = match send() {
                Ok(resp) => resp,
                Err(e) if e.is_transient() && !exhausted => {
                    debug!(attempt, error = %e, "transport error, retrying");
                    pause.pause(self.backoff(attempt));
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.classify(resp.status, allow_missing) {
                StatusClass::Success => return Ok(CallOutcome::Success(resp.body)),
                StatusClass::NotFound => return Ok(CallOutcome::NotFound),
                StatusClass::RateLimited => {
                    return Ok(CallOutcome::RateLimited(parse_retry_after(
                        resp.retry_after.as_deref(),
                    )))
                }
                StatusClass::Hard => {
                    return Ok(CallOutcome::Failure {
                        status: resp.status,
                        body: resp.body,
                    })
                }
                StatusClass::Transient if exhausted => {
                    return Ok(CallOutcome::RateLimited(parse_retry_after(
                        resp.retry_after.as_deref(),
                    )))
                }
                StatusClass::Transient => {
                    debug!(attempt, status = resp.status, "transient status, retrying");
                    pause.pause(self.backoff(attempt));
                }
            }
        }
    }
}

/// Seconds from a `Retry-After` header, defaulted and floored.
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    let parsed = header
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s.min(MAX_RETRY_AFTER.as_secs_f64())).ok())
        .unwrap_or(DEFAULT_RETRY_AFTER);
    parsed.clamp(MIN_RETRY_AFTER, MAX_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPause(Mutex<Vec<Duration>>);

    impl Pause for RecordingPause {
        fn pause(&self, d: Duration) {
            self.0.lock().unwrap().push(d);
        }
        fn idle(&self, d: Duration) -> bool {
            self.0.lock().unwrap().push(d);
            true
        }
    }

    fn scripted(
        responses: Vec<Result<RawResponse, TransportError>>,
    ) -> impl FnMut() -> Result<RawResponse, TransportError> {
        let mut it = responses.into_iter();
        move || it.next().expect("script exhausted")
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(Some("7")), Duration::from_secs(7));
        assert_eq!(parse_retry_after(Some("1")), MIN_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("soon")), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("12.5")), Duration::from_secs_f64(12.5));
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        assert_eq!(parse_retry_after(Some("99999999999999999999")), MAX_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("1e30")), MAX_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("7200")), MAX_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("inf")), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(Some("-3")), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn unbounded_backoff_stops_at_an_hour() {
        let p = RetryPolicy {
            backoff_factor: 1e300,
            max_backoff_secs: f64::INFINITY,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(40), MAX_RETRY_AFTER);
    }

    #[test]
    fn backoff_curve() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs_f64(0.3));
        assert_eq!(p.backoff(2), Duration::from_secs_f64(0.6));
        assert_eq!(p.backoff(3), Duration::from_secs_f64(1.2));
        let capped = RetryPolicy {
            max_backoff_secs: 1.0,
            ..RetryPolicy::default()
        };
        assert_eq!(capped.backoff(10), Duration::from_secs(1));
    }

    #[test]
    fn success_first_try() {
        let pause = RecordingPause::default();
        let out = RetryPolicy::default()
            .run(&pause, false, scripted(vec![Ok(RawResponse::new(200, "{}"))]))
            .unwrap();
        assert_eq!(out, CallOutcome::Success("{}".into()));
        assert!(pause.0.lock().unwrap().is_empty());
    }

    #[test]
    fn transient_then_success() {
        let pause = RecordingPause::default();
        let out = RetryPolicy::default()
            .run(
                &pause,
                false,
                scripted(vec![
                    Ok(RawResponse::new(503, "")),
                    Ok(RawResponse::new(502, "")),
                    Ok(RawResponse::new(200, "[]")),
                ]),
            )
            .unwrap();
        assert_eq!(out, CallOutcome::Success("[]".into()));
        assert_eq!(pause.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausted_429_carries_header() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let resp = RawResponse::new(429, "").with_retry_after("7");
        let out = policy
            .run(
                &pause,
                false,
                scripted(vec![Ok(resp.clone()), Ok(resp.clone()), Ok(resp)]),
            )
            .unwrap();
        assert_eq!(out, CallOutcome::RateLimited(Duration::from_secs(7)));
        assert_eq!(pause.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausted_5xx_defaults_to_30s() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let out = policy
            .run(
                &pause,
                false,
                scripted(vec![Ok(RawResponse::new(500, "")), Ok(RawResponse::new(504, ""))]),
            )
            .unwrap();
        assert_eq!(out, CallOutcome::RateLimited(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn explicit_429_outside_retry_set_is_immediate() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy {
            statuses: vec![503],
            ..RetryPolicy::default()
        };
        let out = policy
            .run(
                &pause,
                false,
                scripted(vec![Ok(RawResponse::new(429, "").with_retry_after("9"))]),
            )
            .unwrap();
        assert_eq!(out, CallOutcome::RateLimited(Duration::from_secs(9)));
        assert!(pause.0.lock().unwrap().is_empty());
    }

    #[test]
    fn hard_failure_not_retried() {
        let pause = RecordingPause::default();
        let out = RetryPolicy::default()
            .run(
                &pause,
                false,
                scripted(vec![Ok(RawResponse::new(400, "bad quantity"))]),
            )
            .unwrap();
        assert_eq!(
            out,
            CallOutcome::Failure {
                status: 400,
                body: "bad quantity".into()
            }
        );
    }

    #[test]
    fn not_found_only_when_allowed() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy::default();
        assert_eq!(
            policy
                .run(&pause, true, scripted(vec![Ok(RawResponse::new(404, ""))]))
                .unwrap(),
            CallOutcome::NotFound
        );
        assert!(matches!(
            policy
                .run(&pause, false, scripted(vec![Ok(RawResponse::new(404, ""))]))
                .unwrap(),
            CallOutcome::Failure { status: 404, .. }
        ));
    }

    #[test]
    fn transport_errors_share_budget() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let err = policy
            .run(
                &pause,
                false,
                scripted(vec![
                    Err(TransportError::Timeout("t1".into())),
                    Err(TransportError::Timeout("t2".into())),
                ]),
            )
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout("t2".into()));
        assert_eq!(pause.0.lock().unwrap().len(), 1);
    }
}
