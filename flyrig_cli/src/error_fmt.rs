//! Human-readable error descriptions and structured JSON error formatting.

use flyrig_core::{BuildError, RigError};

/// Map an eyre::Report to a human-readable explanation with likely causes
/// and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingStage => {
                "What happened: No stage driver was provided to the rig.\nLikely causes: The serial link failed to open or was not wired into the composition root.\nHow to fix: Check stage.port in the config, or pass --sim to use the simulated stage.".to_string()
            }
            BuildError::MissingVision => {
                "What happened: No vision source was provided to the rig.\nLikely causes: The camera stack failed to initialize.\nHow to fix: Check the camera connection, or pass --sim to use the simulated fly.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/flyrig.toml for a sample."
            ),
        };
    }

    if let Some(re) = err.downcast_ref::<RigError>() {
        return match re {
            RigError::Protocol(msg) => format!(
                "What happened: The stage link returned corrupted telemetry ({msg}).\nLikely causes: Electrical noise on the serial line, a wrong baud rate, or mismatched firmware.\nHow to fix: Check the cable and stage.baud, then power-cycle the gantry controller."
            ),
            RigError::Comm(msg) => format!(
                "What happened: Lost communication with a device ({msg}).\nLikely causes: Unplugged cable, wrong stage.port, or insufficient device permissions.\nHow to fix: Verify the port path and that the device is attached, then rerun."
            ),
            RigError::Timeout => {
                "What happened: The stage did not arrive at the requested position in time.\nLikely causes: The gantry is obstructed, the tracker worker is not running, or move_timeout_ms is too low.\nHow to fix: Clear the stage travel, re-home with `flyrig home`, or raise tracking.move_timeout_ms.".to_string()
            }
            RigError::InvalidState(msg) => format!(
                "What happened: A service was used outside its lifecycle ({msg}).\nLikely causes: A start/stop ordering bug in an embedding program.\nHow to fix: Services are one-shot; construct a fresh instance instead of restarting."
            ),
            RigError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file and rerun."
            ),
            RigError::Hardware(msg) => format!(
                "What happened: A hardware call failed ({msg}).\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {err}"
    )
}

/// Structured error envelope for --json mode.
pub fn json_error(err: &eyre::Report) -> serde_json::Value {
    let kind = if err.downcast_ref::<BuildError>().is_some() {
        "build"
    } else if let Some(re) = err.downcast_ref::<RigError>() {
        match re {
            RigError::Config(_) => "config",
            RigError::Protocol(_) => "protocol",
            RigError::Comm(_) => "comm",
            RigError::InvalidState(_) => "invalid_state",
            RigError::Timeout => "timeout",
            RigError::Hardware(_) => "hardware",
        }
    } else {
        "other"
    };
    serde_json::json!({
        "ok": false,
        "kind": kind,
        "error": format!("{err:#}"),
        "detail": humanize(err),
    })
}
