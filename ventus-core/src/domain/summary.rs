//! Result summary types
//!
//! Small statistics extracted from the external tools' output once a job
//! finishes. They are attached to the job record and served with its status.

use serde::{Deserialize, Serialize};

/// Cell, point and face counts reported by the mesh checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStats {
    pub cells: u64,
    pub points: u64,
    pub faces: u64,
}

/// Final aerodynamic coefficients from the solver's force monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceCoefficients {
    /// Number of rows in the coefficient time series
    pub samples: usize,
    /// Solver time of the last row
    pub final_time: f64,
    /// Drag coefficient
    pub cd: f64,
    /// Lift coefficient
    pub cl: f64,
    /// Moment coefficient
    pub cm: f64,
}

/// Distribution of one field's cell values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Number of values summarised; 1 for a uniform field
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
}

impl FieldSummary {
    /// Summarises `values`, or `None` when there are none
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut samples = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut mean = 0.0;
        let mut m2 = 0.0;

        // Welford's running variance
        for value in values {
            samples += 1;
            min = min.min(value);
            max = max.max(value);
            let delta = value - mean;
            mean += delta / samples as f64;
            m2 += delta * (value - mean);
        }

        (samples > 0).then(|| Self {
            samples,
            min,
            max,
            mean,
            std: (m2 / samples as f64).sqrt(),
        })
    }
}

/// Velocity and pressure statistics of the final solution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStatistics {
    /// Solver time the fields were read from
    pub time: f64,
    /// Magnitude of `U`
    pub velocity_magnitude: Option<FieldSummary>,
    /// Kinematic pressure `p`
    pub pressure: Option<FieldSummary>,
}
