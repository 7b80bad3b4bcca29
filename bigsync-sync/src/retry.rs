//! Retry of DELETE requests racing a busy device
//!
//! Deleting a resource right after changing its container is rejected while the device
//! is still busy with the previous change. Those conflicts are retried at a fixed
//! interval; every other failure is returned at once.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use bigsync_rest::{RestFailure, RestResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRetry {
    /// Retries after the first attempt
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for DeleteRetry {
    fn default() -> Self {
        Self::new(12, Duration::from_secs(5))
    }
}

impl DeleteRetry {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub async fn run<F, Fut>(&self, mut send: F) -> Result<RestResponse, RestFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RestResponse, RestFailure>>,
    {
        let mut retry = 0;
        loop {
            match send().await {
                Ok(response) => return Ok(response),
                Err(failure) if failure.error.is_conflict() && retry < self.attempts => {
                    retry += 1;
                    warn!(
                        "{} busy, retry {}/{} in {:?}",
                        failure.uri, retry, self.attempts, self.interval
                    );
                    sleep(self.interval).await;
                }
                Err(failure) => {
                    if failure.error.is_conflict() {
                        error!("{} still busy after {} retries", failure.uri, self.attempts);
                    }
                    return Err(failure);
                }
            }
        }
    }
}
