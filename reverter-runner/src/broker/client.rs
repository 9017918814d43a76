//! Resilient API client: one retry policy wrapped around a transport.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::error::BrokerError;
use super::retry::{CallOutcome, RetryPolicy};
use super::transport::{ApiRequest, Method, Transport};
use crate::time::Pause;

pub struct ApiClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
    pause: Arc<dyn Pause>,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, pause: Arc<dyn Pause>) -> Self {
        Self {
            transport,
            policy,
            pause,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Perform a call; any non-2xx that survives the policy is an error.
    pub fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let request = ApiRequest::new(method, path, body);
        match self.call(&request, false)? {
            Some(v) => Ok(v),
            // unreachable with allow_missing = false, kept total
            None => Err(BrokerError::Http {
                status: 404,
                path: request.path,
                body: String::new(),
            }),
        }
    }

    /// Like [`execute`](Self::execute), but a 404 yields `Ok(None)`.
    pub fn execute_allow_missing(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, BrokerError> {
        let request = ApiRequest::new(method, path, body);
        self.call(&request, true)
    }

    fn call(&self, request: &ApiRequest, allow_missing: bool) -> Result<Option<Value>, BrokerError> {
        debug!(method = request.method.as_str(), path = %request.path, "broker call");
        let outcome = self
            .policy
            .run(self.pause.as_ref(), allow_missing, || self.transport.send(request))?;

        match outcome {
            CallOutcome::Success(body) => decode(&body).map(Some),
            CallOutcome::NotFound => Ok(None),
            CallOutcome::RateLimited(retry_after) => {
                warn!(
                    path = %request.path,
                    retry_after_secs = retry_after.as_secs_f64(),
                    "broker rate limit"
                );
                Err(BrokerError::RateLimited { retry_after })
            }
            CallOutcome::Failure { status, body } => Err(BrokerError::Http {
                status,
                path: request.path.clone(),
                body,
            }),
        }
    }
}

fn decode(body: &str) -> Result<Value, BrokerError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| BrokerError::Decode(e.to_string()))
}
