//! Typed job parameters
//!
//! Job configs travel as loose JSON maps. Each kind parses its map into a
//! typed parameter struct here, which is also where request validation lives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::job::{JobConfig, JobKind};

/// Bad or missing request parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Checks required fields for `kind` and that every known field parses
pub fn validate_config(kind: JobKind, config: &JobConfig) -> Result<(), ValidationError> {
    for field in kind.required_fields() {
        if config.get(*field).is_none_or(Value::is_null) {
            return Err(ValidationError::MissingField(field.to_string()));
        }
    }

    match kind {
        JobKind::Simulation => SimulationParams::from_config(config).map(|_| ()),
        JobKind::Mesh => MeshParams::from_config(config).map(|_| ()),
    }
}

/// RANS turbulence closure used by the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurbulenceModel {
    #[default]
    #[serde(rename = "kEpsilon")]
    KEpsilon,
    #[serde(rename = "kOmegaSST")]
    KOmegaSst,
    #[serde(rename = "realizableKE")]
    RealizableKe,
    #[serde(rename = "RNGkEpsilon")]
    RngKEpsilon,
}

impl TurbulenceModel {
    /// Name as written into the solver dictionaries
    pub fn as_str(&self) -> &'static str {
        match self {
            TurbulenceModel::KEpsilon => "kEpsilon",
            TurbulenceModel::KOmegaSst => "kOmegaSST",
            TurbulenceModel::RealizableKe => "realizableKE",
            TurbulenceModel::RngKEpsilon => "RNGkEpsilon",
        }
    }

    /// Whether the model transports omega instead of epsilon
    pub fn uses_omega(&self) -> bool {
        matches!(self, TurbulenceModel::KOmegaSst)
    }
}

/// Parameters of a wind simulation job
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Inflow velocity magnitude in m/s
    pub wind_speed: f64,
    /// Id of the mesh job whose output the simulation runs on
    pub mesh_id: Uuid,
    /// Solver end time, also the progress target
    pub simulation_time: f64,
    pub turbulence_model: TurbulenceModel,
    /// Inflow heading in degrees, rotating about the vertical axis
    pub wind_direction: f64,
}

impl SimulationParams {
    pub const DEFAULT_SIMULATION_TIME: f64 = 1000.0;

    pub fn from_config(config: &JobConfig) -> Result<Self, ValidationError> {
        let wind_speed = required(config, "wind_speed", number)?;
        if wind_speed <= 0.0 {
            return Err(ValidationError::invalid("wind_speed", "must be positive"));
        }

        let mesh_id = required(config, "mesh_id", string)?;
        let mesh_id = Uuid::parse_str(&mesh_id)
            .map_err(|_| ValidationError::invalid("mesh_id", "must be a job id"))?;

        let simulation_time =
            optional(config, "simulation_time", number)?.unwrap_or(Self::DEFAULT_SIMULATION_TIME);
        if simulation_time <= 0.0 {
            return Err(ValidationError::invalid(
                "simulation_time",
                "must be positive",
            ));
        }

        let turbulence_model = match config.get("turbulence_model") {
            None | Some(Value::Null) => TurbulenceModel::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                ValidationError::invalid(
                    "turbulence_model",
                    "expected one of kEpsilon, kOmegaSST, realizableKE, RNGkEpsilon",
                )
            })?,
        };

        let wind_direction = optional(config, "wind_direction", number)?.unwrap_or(0.0);

        Ok(Self {
            wind_speed,
            mesh_id,
            simulation_time,
            turbulence_model,
            wind_direction,
        })
    }

    /// Inflow velocity vector (x, y, z)
    pub fn inflow_vector(&self) -> (f64, f64, f64) {
        let heading = self.wind_direction.to_radians();
        (
            self.wind_speed * heading.cos(),
            self.wind_speed * heading.sin(),
            0.0,
        )
    }
}

/// Parameters of a mesh generation job
#[derive(Debug, Clone, PartialEq)]
pub struct MeshParams {
    /// File name inside the geometry directory
    pub geometry_file: String,
    /// Surface refinement level around the geometry
    pub refinement_level: u32,
    /// Background mesh cell edge length in metres
    pub cell_size: f64,
    /// Domain size as a multiple of the geometry extent
    pub domain_factor: f64,
}

impl MeshParams {
    pub const DEFAULT_REFINEMENT_LEVEL: u32 = 3;
    pub const MAX_REFINEMENT_LEVEL: u32 = 10;
    pub const DEFAULT_CELL_SIZE: f64 = 1.0;
    pub const DEFAULT_DOMAIN_FACTOR: f64 = 5.0;

    pub fn from_config(config: &JobConfig) -> Result<Self, ValidationError> {
        let geometry_file = required(config, "geometry_file", string)?;
        if geometry_file.is_empty()
            || geometry_file.contains(['/', '\\'])
            || geometry_file.starts_with('.')
        {
            return Err(ValidationError::invalid(
                "geometry_file",
                "must be a plain file name",
            ));
        }

        let refinement_level = match config.get("refinement_level") {
            None | Some(Value::Null) => Self::DEFAULT_REFINEMENT_LEVEL,
            Some(value) => value
                .as_u64()
                .and_then(|level| u32::try_from(level).ok())
                .filter(|level| *level <= Self::MAX_REFINEMENT_LEVEL)
                .ok_or_else(|| {
                    ValidationError::invalid(
                        "refinement_level",
                        format!("expected an integer 0..={}", Self::MAX_REFINEMENT_LEVEL),
                    )
                })?,
        };

        let cell_size = optional(config, "cell_size", number)?.unwrap_or(Self::DEFAULT_CELL_SIZE);
        if cell_size <= 0.0 {
            return Err(ValidationError::invalid("cell_size", "must be positive"));
        }

        let domain_factor =
            optional(config, "domain_factor", number)?.unwrap_or(Self::DEFAULT_DOMAIN_FACTOR);
        if domain_factor < 1.0 {
            return Err(ValidationError::invalid(
                "domain_factor",
                "must be at least 1",
            ));
        }

        Ok(Self {
            geometry_file,
            refinement_level,
            cell_size,
            domain_factor,
        })
    }
}

// =============================================================================
// Field extraction
// =============================================================================

fn number(field: &str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ValidationError::invalid(field, "expected a number"))
}

fn string(field: &str, value: &Value) -> Result<String, ValidationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::invalid(field, "expected a string"))
}

fn optional<T>(
    config: &JobConfig,
    field: &str,
    parse: fn(&str, &Value) -> Result<T, ValidationError>,
) -> Result<Option<T>, ValidationError> {
    match config.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse(field, value).map(Some),
    }
}

fn required<T>(
    config: &JobConfig,
    field: &str,
    parse: fn(&str, &Value) -> Result<T, ValidationError>,
) -> Result<T, ValidationError> {
    optional(config, field, parse)?.ok_or_else(|| ValidationError::MissingField(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> JobConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let cfg = config(json!({ "wind_speed": 10 }));
        let err = validate_config(JobKind::Simulation, &cfg).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("mesh_id".to_string()));
        assert_eq!(err.to_string(), "Missing required field: mesh_id");
    }

    #[test]
    fn test_simulation_defaults() {
        let mesh_id = Uuid::new_v4();
        let cfg = config(json!({ "wind_speed": 12.5, "mesh_id": mesh_id.to_string() }));
        let params = SimulationParams::from_config(&cfg).unwrap();

        assert_eq!(params.mesh_id, mesh_id);
        assert_eq!(params.simulation_time, 1000.0);
        assert_eq!(params.turbulence_model, TurbulenceModel::KEpsilon);
        assert_eq!(params.inflow_vector(), (12.5, 0.0, 0.0));
    }

    #[test]
    fn test_simulation_rejects_bad_values() {
        let mesh_id = Uuid::new_v4().to_string();
        let cases = [
            json!({ "wind_speed": -1, "mesh_id": mesh_id }),
            json!({ "wind_speed": "fast", "mesh_id": mesh_id }),
            json!({ "wind_speed": 5, "mesh_id": "../etc" }),
            json!({ "wind_speed": 5, "mesh_id": mesh_id, "turbulence_model": "laminar" }),
            json!({ "wind_speed": 5, "mesh_id": mesh_id, "simulation_time": 0 }),
        ];

        for case in cases {
            let err = validate_config(JobKind::Simulation, &config(case.clone())).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidField { .. }),
                "expected invalid field for {case}"
            );
        }
    }

    #[test]
    fn test_turbulence_model_names() {
        let mesh_id = Uuid::new_v4().to_string();
        let cfg = config(json!({
            "wind_speed": 5,
            "mesh_id": mesh_id,
            "turbulence_model": "kOmegaSST"
        }));
        let params = SimulationParams::from_config(&cfg).unwrap();
        assert_eq!(params.turbulence_model.as_str(), "kOmegaSST");
        assert!(params.turbulence_model.uses_omega());
    }

    #[test]
    fn test_mesh_params() {
        let cfg = config(json!({ "geometry_file": "box.stl", "refinement_level": 2 }));
        let params = MeshParams::from_config(&cfg).unwrap();
        assert_eq!(params.geometry_file, "box.stl");
        assert_eq!(params.refinement_level, 2);
        assert_eq!(params.cell_size, 1.0);
        assert_eq!(params.domain_factor, 5.0);
    }

    #[test]
    fn test_mesh_rejects_path_traversal_and_bad_levels() {
        for case in [
            json!({ "geometry_file": "../secret.stl" }),
            json!({ "geometry_file": "dir/box.stl" }),
            json!({ "geometry_file": "box.stl", "refinement_level": 11 }),
            json!({ "geometry_file": "box.stl", "refinement_level": 1.5 }),
            json!({ "geometry_file": "box.stl", "domain_factor": 0.5 }),
        ] {
            assert!(validate_config(JobKind::Mesh, &config(case)).is_err());
        }
    }

    #[test]
    fn test_null_required_field_counts_as_missing() {
        let cfg = config(json!({ "geometry_file": null }));
        assert_eq!(
            validate_config(JobKind::Mesh, &cfg).unwrap_err(),
            ValidationError::MissingField("geometry_file".to_string())
        );
    }
}
