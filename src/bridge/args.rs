//! Positional argument accessors for method handlers.
//!
//! Handlers receive raw JSON params. These helpers check arity and type at
//! the call boundary; their errors propagate out of the handler with `?` and
//! are reported as handler diagnostics.

use anyhow::{anyhow, Result};
use serde_json::Value;

fn arg(params: &[Value], index: usize) -> Result<&Value> {
    params
        .get(index)
        .ok_or_else(|| anyhow!("missing argument {index} (got {} params)", params.len()))
}

/// String argument at `index`.
pub fn string(params: &[Value], index: usize) -> Result<&str> {
    let value = arg(params, index)?;
    value
        .as_str()
        .ok_or_else(|| anyhow!("argument {index} must be a string, got {value}"))
}

/// Numeric argument at `index`.
pub fn number(params: &[Value], index: usize) -> Result<f64> {
    let value = arg(params, index)?;
    value
        .as_f64()
        .ok_or_else(|| anyhow!("argument {index} must be a number, got {value}"))
}

/// Integer argument at `index`. Fractional numbers are truncated toward zero.
#[allow(clippy::cast_possible_truncation, reason = "truncation is the documented behaviour")]
pub fn integer(params: &[Value], index: usize) -> Result<i64> {
    let value = arg(params, index)?;
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() => Ok(f.trunc() as i64),
        _ => Err(anyhow!("argument {index} must be an integer, got {value}")),
    }
}

/// Boolean argument at `index`.
pub fn boolean(params: &[Value], index: usize) -> Result<bool> {
    let value = arg(params, index)?;
    value
        .as_bool()
        .ok_or_else(|| anyhow!("argument {index} must be a boolean, got {value}"))
}
