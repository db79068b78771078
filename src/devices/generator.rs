use crate::devices::types::Device;
use crate::error::{EngineError, Result};

/// A household generator (solar array, wind turbine) with a settable output.
///
/// # Power Flow Convention (Bus)
/// Returns **negative** values while producing (generation offsets draw).
#[derive(Debug, Clone)]
pub struct Generator {
    /// Current output in watts, always within `[0, max_output_w]`.
    power_output_w: f64,
    /// Rated maximum output in watts.
    pub max_output_w: f64,
}

impl Generator {
    /// Creates a generator with the given rating and initial output.
    ///
    /// The initial output is clamped into range.
    ///
    /// # Panics
    ///
    /// Panics if `max_output_w` is negative or not finite.
    pub fn new(max_output_w: f64, initial_output_w: f64) -> Self {
        assert!(max_output_w.is_finite() && max_output_w >= 0.0);
        let mut generator = Self {
            power_output_w: 0.0,
            max_output_w,
        };
        generator.set_output(initial_output_w);
        generator
    }

    /// Current output in watts.
    pub fn output_w(&self) -> f64 {
        self.power_output_w
    }

    /// Sets the output, clamping into `[0, max_output_w]`.
    ///
    /// Returns `true` when the stored output changed.
    pub fn set_output(&mut self, value_w: f64) -> bool {
        let clamped = if value_w.is_nan() {
            0.0
        } else {
            value_w.clamp(0.0, self.max_output_w)
        };
        let changed = clamped != self.power_output_w;
        self.power_output_w = clamped;
        changed
    }

    /// Checks a requested output against the rating without touching state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for non-finite, negative, or
    /// above-rating values.
    pub fn validate_output(&self, value_w: f64) -> Result<()> {
        if !value_w.is_finite() {
            return Err(EngineError::validation(
                "generator_output_w",
                format!("must be finite, got {value_w}"),
            ));
        }
        if !(0.0..=self.max_output_w).contains(&value_w) {
            return Err(EngineError::validation(
                "generator_output_w",
                format!("must be in [0, {}], got {value_w}", self.max_output_w),
            ));
        }
        Ok(())
    }
}

impl Device for Generator {
    fn power_w(&self) -> f64 {
        -self.power_output_w
    }

    fn device_type(&self) -> &'static str {
        "Generator"
    }
}
