//! Sample rate conversion using rubato
//!
//! Used by the device sink both to match the device rate and to realize the
//! playback rate: playing at rate `r` means resampling to `device_rate / r`
//! and outputting at `device_rate`.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Resample planar audio from `input_rate` to `output_rate`.
///
/// Returns a copy when the rates already match.
pub fn resample_planar(input: &[Vec<f32>], input_rate: u32, output_rate: f64) -> Result<Vec<Vec<f32>>> {
    let channels = input.len();
    let frames = input.first().map(Vec::len).unwrap_or(0);

    if channels == 0 || frames == 0 {
        return Ok(input.to_vec());
    }
    if input_rate == 0 || !output_rate.is_finite() || output_rate <= 0.0 {
        return Err(Error::Playback(format!(
            "Invalid resample rates {} -> {}",
            input_rate, output_rate
        )));
    }

    let ratio = output_rate / f64::from(input_rate);
    if (ratio - 1.0).abs() < f64::EPSILON {
        return Ok(input.to_vec());
    }

    debug!(
        "Resampling {} frames from {}Hz to {:.1}Hz ({} channels)",
        frames, input_rate, output_rate, channels
    );

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // max_relative_ratio (no runtime changes)
        PolynomialDegree::Septic,
        frames,
        channels,
    )
    .map_err(|e| Error::Playback(format!("Failed to create resampler: {}", e)))?;

    resampler
        .process(input, None)
        .map_err(|e| Error::Playback(format!("Resampling failed: {}", e)))
}
