use super::response::write_json_error;
use crate::net::{HttpError, NetError};
use std::time::{Duration, Instant};

/// Tracks the absolute expiration for a single HTTP request.
///
/// The handler checks it once up front and threads it into the append
/// loop, which re-checks before every store read and conditional put, so
/// an expired request fails whole: no late line is ever persisted.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestDeadline {
    expires_at: Instant,
}

impl RequestDeadline {
    pub(crate) fn from_timeout(timeout: Duration) -> Self {
        let bounded = if timeout.is_zero() {
            Duration::from_millis(1)
        } else {
            timeout
        };
        Self {
            expires_at: Instant::now() + bounded,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_deadline(expires_at: Instant) -> Self {
        Self { expires_at }
    }

    pub(crate) fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expires_at
            .checked_duration_since(Instant::now())
            .map(|remaining| remaining.is_zero())
            .unwrap_or(true)
    }

    pub(crate) fn enforce(&self) -> Result<(), NetError> {
        if self.is_expired() {
            Err(NetError::from(HttpError::RequestTimeout))
        } else {
            Ok(())
        }
    }

    /// Returns `Ok(false)` after writing the error response when the
    /// deadline has passed; `Ok(true)` means the request may proceed.
    pub(crate) fn respond_if_expired(
        &self,
        stream: &mut (impl std::io::Write + ?Sized),
    ) -> Result<bool, NetError> {
        if self.enforce().is_err() {
            write_json_error(stream, 500, "request deadline exceeded")?;
            return Ok(false);
        }
        Ok(true)
    }
}
