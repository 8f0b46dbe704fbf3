//! GET requests with bounded retry
//!
//! The guest API occasionally answers HTTP 500 while the instance is still
//! starting. Those responses are retried a fixed number of times with a
//! fixed delay; every other status is final.

use crate::config::RetryPolicy;
use crate::error::{MetadataError, Result};
use crate::transport::{RouteResponse, Session};
use hyper::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Issues GETs over a session according to a retry policy
#[derive(Debug)]
pub struct RequestExecutor<'a> {
    session: &'a mut Session,
    retry: RetryPolicy,
}

impl<'a> RequestExecutor<'a> {
    pub fn new(session: &'a mut Session, retry: RetryPolicy) -> Self {
        Self { session, retry }
    }

    /// GET a route, retrying while the server answers HTTP 500
    ///
    /// Once attempts are exhausted the last response is returned as-is.
    pub async fn get(&mut self, route: &str) -> Result<RouteResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let response = self.session.get(route).await?;
            if response.status != StatusCode::INTERNAL_SERVER_ERROR || attempt >= max_attempts {
                debug!(route = %route, status = response.status.as_u16(), "[GET]");
                return Ok(response);
            }

            warn!(
                route = %route,
                status = response.status.as_u16(),
                remaining = max_attempts - attempt,
                "[GET] server error, retrying"
            );
            tokio::time::sleep(self.retry.delay).await;
            attempt += 1;
        }
    }

    /// GET a route, failing on a non-success status when `raise_on_failure`
    pub async fn get_checked(&mut self, route: &str, raise_on_failure: bool) -> Result<RouteResponse> {
        let response = self.get(route).await?;
        if raise_on_failure && !response.is_success() {
            return Err(MetadataError::Http {
                status: response.status.as_u16(),
                route: route.to_string(),
                body: response.text(),
            });
        }
        Ok(response)
    }

    /// GET a route and decode its JSON body
    ///
    /// A non-success status yields `T::default()` unless `raise_on_failure`
    /// is set. A success status with a body that is not valid JSON for `T`
    /// is a format error.
    pub async fn get_json<T>(&mut self, route: &str, raise_on_failure: bool) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let response = self.get_checked(route, raise_on_failure).await?;
        if !response.is_success() {
            debug!(
                route = %route,
                status = response.status.as_u16(),
                body = %response.text(),
                "Skipping route"
            );
            return Ok(T::default());
        }

        serde_json::from_slice(&response.body).map_err(|_| MetadataError::Format {
            url: route.to_string(),
            body: response.text(),
        })
    }
}
