//! Integrity monitoring for guarded objects
//!
//! This module provides the injection detector that notices when a guarded
//! object is modified by anything other than its owner. The owner announces
//! every legitimate mutation, which records a fingerprint of the object's
//! current content; before each read it asks the detector to verify that the
//! content still matches. A mismatch means some other code path rewrote the
//! object, and the incident is reported through a configurable alert channel.
//!
//! ## Features
//!
//! - **Fingerprint Tracking**: Content is reduced to a fixed-size digest so
//!   the detector never retains the guarded bytes themselves
//! - **Two-State Lifecycle**: Objects start unverified and only enter the
//!   baseline state once their owner announces a change
//! - **Configurable Alerting**: Incidents are delivered through one of four
//!   channels selected at construction time
//! - **Single-Shot Alerts**: A detected modification resets the detector, so
//!   one incident produces one alert
//!
//! ## Usage
//!
//! ```rust
//! use securebytes::detector::{AlertChannel, InjectionDetector};
//!
//! let detector = InjectionDetector::new(AlertChannel::ThrowException);
//!
//! // The owner announces its own write, then later verifies it.
//! detector.notify_changed(&[b"stored ciphertext"]).unwrap();
//! assert!(detector.verify_unchanged(&[b"stored ciphertext"]).is_ok());
//!
//! // Content rewritten behind the owner's back fails verification.
//! assert!(detector.verify_unchanged(&[b"injected content"]).is_err());
//! ```

mod alert;

pub use alert::{
    register_alert_listener, AlertChannel, DebugFailAlerter, DebugWriteAlerter, InjectionAlerter,
    InjectionMessage, RaiseEventAlerter, ThrowExceptionAlerter,
};

use crate::error::{Result, SecureBytesError};
use crate::util::{constant_time_eq, hash};
use log::warn;
use std::sync::Mutex;
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    /// No fingerprint on record; verification passes vacuously.
    Unverified,
    /// A fingerprint is on record and scans are compared against it.
    Baseline,
}

struct Inner {
    state: DetectorState,
    fingerprint: [u8; 32],
}

/// Watches a guarded object for modifications its owner did not announce.
///
/// The detector stores a digest of the object content, never the content
/// itself, so it can sit next to encrypted material without weakening it.
/// All methods take `&self` and are safe to call from multiple threads.
pub struct InjectionDetector {
    channel: AlertChannel,
    inner: Mutex<Inner>,
}

impl InjectionDetector {
    /// Creates a detector that reports incidents through `channel`.
    pub fn new(channel: AlertChannel) -> Self {
        Self {
            channel,
            inner: Mutex::new(Inner {
                state: DetectorState::Unverified,
                fingerprint: [0; 32],
            }),
        }
    }

    /// The alert channel selected at construction.
    pub fn channel(&self) -> AlertChannel {
        self.channel
    }

    /// Records the fingerprint of the object after a legitimate mutation.
    ///
    /// The object content is passed as an ordered list of parts; each part
    /// is length-prefixed before hashing so part boundaries are part of the
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::MissingArgument` - If `parts` is empty.
    /// * `SecureBytesError::OperationFailed` - If the detector lock is
    ///   poisoned.
    pub fn notify_changed(&self, parts: &[&[u8]]) -> Result<()> {
        if parts.is_empty() {
            return Err(SecureBytesError::MissingArgument(
                "object parts must not be empty".to_string(),
            ));
        }

        let mut inner = self.lock_inner()?;
        inner.fingerprint = fingerprint(parts);
        inner.state = DetectorState::Baseline;
        Ok(())
    }

    /// Verifies that the object still matches its recorded fingerprint.
    ///
    /// Unverified objects pass vacuously. On a mismatch the detector resets
    /// to unverified, so one modification produces exactly one alert, and
    /// the incident is reported through the configured channel.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::MissingArgument` - If `parts` is empty.
    /// * `SecureBytesError::IntegrityViolation` - On a mismatch, only when
    ///   the channel is [`AlertChannel::ThrowException`].
    /// * `SecureBytesError::OperationFailed` - If the detector lock is
    ///   poisoned.
    pub fn verify_unchanged(&self, parts: &[&[u8]]) -> Result<()> {
        if parts.is_empty() {
            return Err(SecureBytesError::MissingArgument(
                "object parts must not be empty".to_string(),
            ));
        }

        let mut inner = self.lock_inner()?;
        match inner.state {
            DetectorState::Unverified => Ok(()),
            DetectorState::Baseline => {
                let actual = fingerprint(parts);
                if constant_time_eq(&inner.fingerprint, &actual) {
                    return Ok(());
                }

                inner.state = DetectorState::Unverified;
                inner.fingerprint = [0; 32];
                drop(inner);

                warn!("Guarded object failed fingerprint verification");
                self.channel.dispatch(&InjectionMessage::unexpected())
            }
        }
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SecureBytesError::OperationFailed("detector lock poisoned".to_string()))
    }
}

impl Default for InjectionDetector {
    fn default() -> Self {
        Self::new(AlertChannel::default())
    }
}

impl std::fmt::Debug for InjectionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionDetector")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// Digest over length-prefixed parts, so ["ab", "c"] and ["a", "bc"] never
// collide.
fn fingerprint(parts: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::new();
    for part in parts {
        buf.extend_from_slice(&(part.len() as u64).to_le_bytes());
        buf.extend_from_slice(part);
    }
    let digest = hash(&buf);
    buf.zeroize();
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Arc;

    #[test]
    fn test_unverified_object_passes() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);
        assert!(detector.verify_unchanged(&[b"anything at all"]).is_ok());
    }

    #[test]
    fn test_announced_change_passes_verification() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);

        detector
            .notify_changed(&[b"key material", b"ciphertext"])
            .expect("notify");
        assert!(detector
            .verify_unchanged(&[b"key material", b"ciphertext"])
            .is_ok());
    }

    #[test]
    fn test_rebaseline_tracks_latest_content() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);

        detector.notify_changed(&[b"first"]).expect("notify");
        detector.notify_changed(&[b"second"]).expect("notify");

        assert!(detector.verify_unchanged(&[b"second"]).is_ok());
        assert!(detector.verify_unchanged(&[b"first"]).is_err());
    }

    #[test]
    fn test_tamper_alerts_exactly_once() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);
        detector.notify_changed(&[b"original"]).expect("notify");

        let result = detector.verify_unchanged(&[b"tampered"]);
        assert!(matches!(
            result,
            Err(SecureBytesError::IntegrityViolation(_))
        ));

        // The detector reset itself, so the same content now passes.
        assert!(detector.verify_unchanged(&[b"tampered"]).is_ok());
    }

    #[test]
    fn test_part_boundaries_are_fingerprinted() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);

        detector.notify_changed(&[b"ab", b"c"]).expect("notify");
        assert!(detector.verify_unchanged(&[b"a", b"bc"]).is_err());
    }

    #[test]
    fn test_empty_parts_rejected() {
        let detector = InjectionDetector::new(AlertChannel::ThrowException);

        assert!(matches!(
            detector.notify_changed(&[]),
            Err(SecureBytesError::MissingArgument(_))
        ));
        assert!(matches!(
            detector.verify_unchanged(&[]),
            Err(SecureBytesError::MissingArgument(_))
        ));
    }

    #[test]
    #[serial]
    fn test_raise_event_channel_reports_without_failing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        register_alert_listener(move |message: &InjectionMessage| {
            sink.lock().expect("listener sink lock").push(message.clone());
        });

        let detector = InjectionDetector::new(AlertChannel::RaiseEvent);
        detector.notify_changed(&[b"original"]).expect("notify");

        assert!(detector.verify_unchanged(&[b"tampered"]).is_ok());

        let seen = seen.lock().expect("listener sink lock");
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].expected_change);
        assert!(seen[0].actual_change);
    }

    #[test]
    fn test_default_detector_uses_raise_event() {
        let detector = InjectionDetector::default();
        assert_eq!(detector.channel(), AlertChannel::RaiseEvent);
    }
}
