//! Structured error type for the remote API boundary.
//!
//! The outbox and the offline-aware façade need one decision out of every
//! failed remote call: is retrying worth anything? Network-level failures
//! are; domain rejections (validation, permission) are not. The
//! classification happens once, where the failure is produced, instead of
//! pattern-matching error messages at every call site.

use thiserror::Error;

/// Error returned by the domain write API and the content-fetch API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// The call never reached the remote system, or the response was lost.
  /// Always worth retrying once connectivity is back.
  #[error("network error: {0}")]
  Network(String),

  /// The device is known to be offline; no call was attempted.
  #[error("device is offline")]
  Offline,

  /// The remote system rejected the call for a non-network reason.
  /// Retrying cannot help.
  #[error("rejected: {0}")]
  Rejected(String),
}

impl ApiError {
  /// Whether a later retry of the same call could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ApiError::Network(_) | ApiError::Offline)
  }

  /// Classify a reqwest-level failure.
  ///
  /// Transport errors (connect, timeout, body read) are network-class;
  /// an HTTP status from the remote is a rejection since the call was
  /// delivered and answered.
  pub fn from_transport(err: reqwest::Error) -> Self {
    if err.is_status() {
      ApiError::Rejected(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn network_errors_are_retryable() {
    assert!(ApiError::Network("connection reset".into()).is_retryable());
    assert!(ApiError::Offline.is_retryable());
  }

  #[test]
  fn rejections_are_terminal() {
    assert!(!ApiError::Rejected("dose exceeds daily limit".into()).is_retryable());
  }
}
