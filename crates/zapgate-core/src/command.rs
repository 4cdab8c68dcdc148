//! Command parsing
//!
//! Turns raw chat text into a typed command so nothing downstream
//! branches on strings.

use zapgate_config::ActionLimits;
use zapgate_openshock::ActionKind;

/// A recognized command. Action arguments are raw sender input, not yet
/// resolved against the configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCommand {
    Action {
        kind: ActionKind,
        /// Requested strength percent, whatever integer the sender typed.
        strength: i64,
        /// Requested duration in whole milliseconds. The sender types
        /// seconds; fractions below one millisecond are truncated.
        duration_ms: i64,
    },
    Help,
    Unknown,
}

/// Why command text failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    /// An action argument was present but not numeric.
    NotANumber,
}

/// Parse one slash command. Keywords are case-insensitive, extra tokens
/// are ignored, and missing action arguments default to zero so the
/// clamp step raises them to the configured minimum.
pub fn parse(text: &str) -> Result<ParsedCommand, ParseFailure> {
    let mut tokens = text.split_whitespace();
    let keyword = tokens.next().unwrap_or("");

    let kind = if keyword.eq_ignore_ascii_case("/shock") {
        ActionKind::Shock
    } else if keyword.eq_ignore_ascii_case("/vibrate") {
        ActionKind::Vibrate
    } else if keyword.eq_ignore_ascii_case("/help") {
        return Ok(ParsedCommand::Help);
    } else {
        return Ok(ParsedCommand::Unknown);
    };

    let strength = match tokens.next() {
        Some(arg) => arg.parse::<i64>().map_err(|_| ParseFailure::NotANumber)?,
        None => 0,
    };

    let duration_secs = match tokens.next() {
        Some(arg) => arg.parse::<f64>().map_err(|_| ParseFailure::NotANumber)?,
        None => 0.0,
    };
    if !duration_secs.is_finite() {
        return Err(ParseFailure::NotANumber);
    }

    Ok(ParsedCommand::Action {
        kind,
        strength,
        duration_ms: (duration_secs * 1000.0) as i64,
    })
}

/// Usage text shown by `/help` and embedded in error replies.
pub fn usage_text(shock: &ActionLimits, vibrate: &ActionLimits) -> String {
    format!(
        "Usage: /shock|vibrate <strength> <duration>\n\
         Shocks: {} - {}% strength for {} - {}s\n\
         Vibrations: {} - {}% strength for {} - {}s",
        shock.strength_min,
        shock.strength_max,
        secs(shock.duration_min_ms),
        secs(shock.duration_max_ms),
        vibrate.strength_min,
        vibrate.strength_max,
        secs(vibrate.duration_min_ms),
        secs(vibrate.duration_max_ms),
    )
}

fn secs(ms: u32) -> f64 {
    f64::from(ms) / 1000.0
}
