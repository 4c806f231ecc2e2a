//! Setpoint write-back
//!
//! A request is validated, then either echoed (preview mode) or written to
//! Sitrad and verified by reading the function back. Anything short of a
//! verified write is handed to the retry queue.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::RetryQueue;
use crate::sitrad::{InstrumentApi, WriteStatus};

/// Operator request to change a setpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointRequest {
    pub instrument_id: i64,
    pub code: String,
    pub value: f64,
}

/// Why a request was refused before reaching Sitrad
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SetpointRejection {
    #[error("Not permitted to modify values; only operators can make changes")]
    NotPermitted,
    #[error("Invalid instrument id: {0}")]
    InvalidInstrument(i64),
    #[error("Function code must not be empty")]
    EmptyCode,
    #[error("Setpoint value must be a finite number")]
    NonFiniteValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetpointStatus {
    /// Written and read back within tolerance
    Confirmed,
    /// Not yet confirmed; the retry queue owns delivery from here
    Queued,
    /// Live writes disabled; nothing was sent
    Preview,
    Rejected,
}

/// Immediate answer to a setpoint request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointOutcome {
    pub success: bool,
    pub status: SetpointStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl SetpointOutcome {
    fn accepted(status: SetpointStatus, message: &str, code: String, value: f64) -> Self {
        Self {
            success: true,
            status,
            message: message.to_string(),
            applied_value: Some(value),
            code: Some(code),
        }
    }

    fn rejected(reason: SetpointRejection) -> Self {
        Self {
            success: false,
            status: SetpointStatus::Rejected,
            message: reason.to_string(),
            applied_value: None,
            code: None,
        }
    }
}

/// Result of one write followed by a read-back
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Converged,
    /// Sitrad accepted the write but the read-back differs
    NotConverged,
    /// Sitrad answered with something other than `202 Accepted`
    Rejected(u16),
    TransportError(String),
}

/// Whether a read-back value matches the requested one
pub fn within_tolerance(current: f64, expected: f64, tolerance: f64) -> bool {
    (current - expected).abs() <= tolerance
}

/// Read the function back and compare against the expected value
///
/// Any failure to read counts as not converged.
pub async fn verify_convergence<A: InstrumentApi + ?Sized>(
    api: &A,
    instrument_id: i64,
    code: &str,
    expected: f64,
    tolerance: f64,
) -> bool {
    match api.functions(instrument_id).await {
        Ok(functions) => functions
            .iter()
            .find(|f| f.code.eq_ignore_ascii_case(code))
            .and_then(|f| f.value)
            .map_or(false, |current| within_tolerance(current, expected, tolerance)),
        Err(e) => {
            debug!(instrument_id, code, error = %e, "Convergence read failed");
            false
        }
    }
}

/// Issue a function write and, if accepted, verify it took effect
pub async fn write_and_verify<A: InstrumentApi + ?Sized>(
    api: &A,
    instrument_id: i64,
    code: &str,
    value: f64,
    tolerance: f64,
) -> WriteOutcome {
    match api.write_function(instrument_id, code, value).await {
        Ok(WriteStatus::Accepted) => {
            if verify_convergence(api, instrument_id, code, value, tolerance).await {
                WriteOutcome::Converged
            } else {
                WriteOutcome::NotConverged
            }
        }
        Ok(WriteStatus::Other(status)) => WriteOutcome::Rejected(status),
        Err(e) => WriteOutcome::TransportError(format!("{:#}", e)),
    }
}

/// Whether requests reach Sitrad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Live,
    Preview,
}

impl WriteMode {
    pub fn from_live_flag(live_writes: bool) -> Self {
        if live_writes {
            WriteMode::Live
        } else {
            WriteMode::Preview
        }
    }
}

/// Entry point for operator setpoint changes
pub struct SetpointWriter<A: ?Sized> {
    api: Arc<A>,
    queue: RetryQueue,
    mode: WriteMode,
    tolerance: f64,
}

impl<A: InstrumentApi + ?Sized> SetpointWriter<A> {
    pub fn new(api: Arc<A>, queue: RetryQueue, mode: WriteMode, tolerance: f64) -> Self {
        Self {
            api,
            queue,
            mode,
            tolerance,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Handle a setpoint change
    ///
    /// `may_write` is the caller's authorization verdict. The outcome is
    /// returned as soon as the first attempt finishes; eventual delivery of
    /// a queued write is only visible through the retry status snapshot.
    pub async fn submit(&self, request: SetpointRequest, may_write: bool) -> SetpointOutcome {
        let code = match validate(&request, may_write) {
            Ok(code) => code,
            Err(reason) => {
                warn!(
                    instrument_id = request.instrument_id,
                    code = %request.code,
                    reason = %reason,
                    "Setpoint request rejected"
                );
                return SetpointOutcome::rejected(reason);
            }
        };

        if self.mode == WriteMode::Preview {
            info!(
                instrument_id = request.instrument_id,
                code = %code,
                value = request.value,
                "Setpoint accepted in preview mode"
            );
            return SetpointOutcome::accepted(
                SetpointStatus::Preview,
                "Value updated (preview, not sent to instrument)",
                code,
                request.value,
            );
        }

        let outcome = write_and_verify(
            self.api.as_ref(),
            request.instrument_id,
            &code,
            request.value,
            self.tolerance,
        )
        .await;

        if outcome == WriteOutcome::Converged {
            info!(
                instrument_id = request.instrument_id,
                code = %code,
                value = request.value,
                "Setpoint applied"
            );
            return SetpointOutcome::accepted(
                SetpointStatus::Confirmed,
                "Setpoint applied",
                code,
                request.value,
            );
        }

        info!(
            instrument_id = request.instrument_id,
            code = %code,
            value = request.value,
            outcome = ?outcome,
            "Setpoint not confirmed, queued for retry"
        );
        self.queue.enqueue(request.instrument_id, &code, request.value);
        SetpointOutcome::accepted(
            SetpointStatus::Queued,
            "Setpoint sent; delivery will be retried until confirmed",
            code,
            request.value,
        )
    }
}

/// Check a request and return its normalized (upper-case) code
pub fn validate(request: &SetpointRequest, may_write: bool) -> Result<String, SetpointRejection> {
    if !may_write {
        return Err(SetpointRejection::NotPermitted);
    }
    if request.instrument_id <= 0 {
        return Err(SetpointRejection::InvalidInstrument(request.instrument_id));
    }
    let code = request.code.trim();
    if code.is_empty() {
        return Err(SetpointRejection::EmptyCode);
    }
    if !request.value.is_finite() {
        return Err(SetpointRejection::NonFiniteValue);
    }
    Ok(code.to_uppercase())
}
