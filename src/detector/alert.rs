use crate::error::{Result, SecureBytesError};
use chrono::{DateTime, Utc};
use log::{debug, error};
use std::sync::RwLock;

type AlertListener = Box<dyn Fn(&InjectionMessage) + Send + Sync>;

// Process-wide listener registry for the RaiseEvent channel.
static LISTENERS: RwLock<Vec<AlertListener>> = RwLock::new(Vec::new());

/// How a detected modification is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertChannel {
    /// Panics in debug builds, logs an error in release builds.
    DebugFail,
    /// Notifies every listener registered through
    /// [`register_alert_listener`]. The default channel.
    #[default]
    RaiseEvent,
    /// Writes the incident to the debug log and continues.
    DebugWrite,
    /// Surfaces the incident to the caller as
    /// [`SecureBytesError::IntegrityViolation`].
    ThrowException,
}

impl AlertChannel {
    pub(crate) fn dispatch(&self, message: &InjectionMessage) -> Result<()> {
        match self {
            Self::DebugFail => DebugFailAlerter.alert(message),
            Self::RaiseEvent => RaiseEventAlerter.alert(message),
            Self::DebugWrite => DebugWriteAlerter.alert(message),
            Self::ThrowException => ThrowExceptionAlerter.alert(message),
        }
    }
}

/// Description of a detected modification, delivered to alert listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionMessage {
    /// Whether the owner had announced a change before the scan.
    pub expected_change: bool,
    /// Whether the guarded object differed from its recorded fingerprint.
    pub actual_change: bool,
    /// When the mismatch was observed.
    pub detected_at: DateTime<Utc>,
}

impl InjectionMessage {
    pub(crate) fn unexpected() -> Self {
        Self {
            expected_change: false,
            actual_change: true,
            detected_at: Utc::now(),
        }
    }
}

/// Delivery strategy behind one [`AlertChannel`] variant.
pub trait InjectionAlerter: Send + Sync {
    /// Announces the modification described by `message`.
    ///
    /// # Errors
    ///
    /// Only the throwing channel returns an error; the other channels report
    /// out of band and succeed.
    fn alert(&self, message: &InjectionMessage) -> Result<()>;
}

/// Registers a listener invoked on every [`AlertChannel::RaiseEvent`]
/// delivery for the lifetime of the process.
pub fn register_alert_listener<F>(listener: F)
where
    F: Fn(&InjectionMessage) + Send + Sync + 'static,
{
    match LISTENERS.write() {
        Ok(mut listeners) => listeners.push(Box::new(listener)),
        Err(_) => error!("Alert listener registry lock poisoned; listener dropped"),
    }
}

/// Alerter behind [`AlertChannel::DebugFail`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugFailAlerter;

impl InjectionAlerter for DebugFailAlerter {
    #[allow(clippy::panic)]
    fn alert(&self, message: &InjectionMessage) -> Result<()> {
        if cfg!(debug_assertions) {
            panic!(
                "guarded object was modified outside its owner at {}",
                message.detected_at
            );
        }
        error!(
            "Guarded object was modified outside its owner at {}",
            message.detected_at
        );
        Ok(())
    }
}

/// Alerter behind [`AlertChannel::RaiseEvent`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RaiseEventAlerter;

impl InjectionAlerter for RaiseEventAlerter {
    fn alert(&self, message: &InjectionMessage) -> Result<()> {
        match LISTENERS.read() {
            Ok(listeners) => {
                for listener in listeners.iter() {
                    listener(message);
                }
                Ok(())
            }
            Err(_) => {
                error!("Alert listener registry lock poisoned; alert not delivered");
                Ok(())
            }
        }
    }
}

/// Alerter behind [`AlertChannel::DebugWrite`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugWriteAlerter;

impl InjectionAlerter for DebugWriteAlerter {
    fn alert(&self, message: &InjectionMessage) -> Result<()> {
        debug!(
            "Guarded object was modified outside its owner at {}",
            message.detected_at
        );
        Ok(())
    }
}

/// Alerter behind [`AlertChannel::ThrowException`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrowExceptionAlerter;

impl InjectionAlerter for ThrowExceptionAlerter {
    fn alert(&self, message: &InjectionMessage) -> Result<()> {
        Err(SecureBytesError::IntegrityViolation(format!(
            "guarded object was modified outside its owner at {}",
            message.detected_at
        )))
    }
}
