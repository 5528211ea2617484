//! Maps `Box<dyn Error>` from trait boundaries to typed `RigError`.
//!
//! The traits in `flyrig_traits` use `Box<dyn Error + Send + Sync>` for
//! maximum flexibility; this module converts those to our typed error enum,
//! with an optional feature-gated path for `flyrig_hardware::HwError`
//! downcasting.

use crate::error::RigError;

/// Map a trait-boundary error to a typed `RigError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> RigError {
    // Feature-gated: try to downcast to HwError for precise mapping
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<flyrig_hardware::error::HwError>() {
            return match hw {
                flyrig_hardware::error::HwError::Protocol(msg) => RigError::Protocol(msg.clone()),
                flyrig_hardware::error::HwError::Comm(msg) => RigError::Comm(msg.clone()),
                flyrig_hardware::error::HwError::Timeout => RigError::Timeout,
                flyrig_hardware::error::HwError::Io(io) => RigError::Comm(io.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("checksum") {
        RigError::Protocol(s)
    } else if lower.contains("timeout") {
        RigError::Timeout
    } else {
        RigError::Hardware(s)
    }
}
