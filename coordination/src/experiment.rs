//! Experiment facade — request/response boundary into the simulator
//!
//! The orchestrator only sees [`ExperimentFacade`]. [`ToyWorld`] is a small
//! in-memory implementation with closed-form classical mechanics, enough to
//! give agents numbers to argue about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExperimentError {
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("Unknown observation category: {0}")]
    UnknownObservation(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// One tunable input of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub unit: String,
    pub default: f64,
}

/// Catalog entry describing a runnable experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub id: String,
    pub name: String,
    pub parameters: Vec<ParameterSpec>,
}

/// Result of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    pub experiment: String,
    /// Parameters after defaults were applied.
    pub parameters: Value,
    pub result: Value,
    /// Agent that requested the run.
    #[serde(default)]
    pub requested_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Whether every expected value lies within `tolerance` (relative) of the
    /// numeric result field of the same name.
    pub fn matches_prediction(&self, expected: &BTreeMap<String, f64>, tolerance: f64) -> bool {
        !expected.is_empty()
            && expected.iter().all(|(field, want)| {
                self.result
                    .get(field)
                    .and_then(Value::as_f64)
                    .is_some_and(|got| {
                        let scale = want.abs().max(f64::EPSILON);
                        (got - want).abs() / scale <= tolerance
                    })
            })
    }
}

/// A canned observational data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub category: String,
    pub summary: String,
    pub data: Value,
}

/// Opaque experiment-execution service.
#[cfg_attr(test, mockall::automock)]
pub trait ExperimentFacade: Send + Sync {
    /// Experiments that can be run.
    fn catalog(&self) -> Vec<ExperimentSpec>;

    /// Observation categories that can be queried.
    fn observation_categories(&self) -> Vec<String>;

    fn run(&self, experiment: &str, parameters: &Value) -> Result<ExperimentRecord, ExperimentError>;

    fn observe(&self, category: &str) -> Result<Observation, ExperimentError>;
}

/// Closed-form mechanics sandbox.
#[derive(Debug, Clone, Default)]
pub struct ToyWorld;

struct Params<'a> {
    raw: &'a Value,
    applied: serde_json::Map<String, Value>,
}

impl<'a> Params<'a> {
    fn new(raw: &'a Value) -> Self {
        Self {
            raw,
            applied: serde_json::Map::new(),
        }
    }

    /// Read `name`, falling back to `default`, and require `valid`.
    fn get(
        &mut self,
        name: &str,
        default: f64,
        valid: impl Fn(f64) -> bool,
        rule: &str,
    ) -> Result<f64, ExperimentError> {
        let value = match self.raw.get(name) {
            None | Some(Value::Null) => default,
            Some(v) => v.as_f64().ok_or_else(|| ExperimentError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a number, got {v}"),
            })?,
        };
        if !value.is_finite() || !valid(value) {
            return Err(ExperimentError::InvalidParameter {
                name: name.to_string(),
                reason: format!("{value} is not {rule}"),
            });
        }
        self.applied.insert(name.to_string(), json!(value));
        Ok(value)
    }

    fn into_value(self) -> Value {
        Value::Object(self.applied)
    }
}

fn positive(v: f64) -> bool {
    v > 0.0
}

fn any(_: f64) -> bool {
    true
}

fn non_negative(v: f64) -> bool {
    v >= 0.0
}

fn spec(id: &str, name: &str, parameters: &[(&str, &str, f64)]) -> ExperimentSpec {
    ExperimentSpec {
        id: id.to_string(),
        name: name.to_string(),
        parameters: parameters
            .iter()
            .map(|(name, unit, default)| ParameterSpec {
                name: name.to_string(),
                unit: unit.to_string(),
                default: *default,
            })
            .collect(),
    }
}

impl ToyWorld {
    pub fn new() -> Self {
        Self
    }

    fn projectile(p: &mut Params) -> Result<Value, ExperimentError> {
        let v = p.get("velocity", 20.0, positive, "positive")?;
        let angle = p.get("angle", 45.0, |a| (0.0..=90.0).contains(&a), "within 0..=90 degrees")?;
        let g = p.get("gravity", 9.81, positive, "positive")?;
        let h = p.get("height", 0.0, non_negative, "non-negative")?;

        let theta = angle.to_radians();
        let (vx, vy) = (v * theta.cos(), v * theta.sin());
        let flight_time = (vy + (vy * vy + 2.0 * g * h).sqrt()) / g;
        Ok(json!({
            "range": vx * flight_time,
            "max_height": h + vy * vy / (2.0 * g),
            "flight_time": flight_time,
        }))
    }

    fn pendulum(p: &mut Params) -> Result<Value, ExperimentError> {
        let length = p.get("length", 1.0, positive, "positive")?;
        let g = p.get("gravity", 9.81, positive, "positive")?;
        let amplitude = p.get("amplitude", 10.0, |a| a > 0.0 && a < 180.0, "within 0..180 degrees")?;

        let small_angle = 2.0 * std::f64::consts::PI * (length / g).sqrt();
        let theta = amplitude.to_radians();
        let period = small_angle * (1.0 + theta * theta / 16.0);
        Ok(json!({
            "period": period,
            "small_angle_period": small_angle,
            "frequency": 1.0 / period,
        }))
    }

    fn buoyancy(p: &mut Params) -> Result<Value, ExperimentError> {
        let object_density = p.get("object_density", 500.0, positive, "positive")?;
        let fluid_density = p.get("fluid_density", 1000.0, positive, "positive")?;
        let volume = p.get("volume", 0.001, positive, "positive")?;
        let g = p.get("gravity", 9.81, positive, "positive")?;

        let weight = object_density * volume * g;
        let max_buoyant_force = fluid_density * volume * g;
        Ok(json!({
            "weight": weight,
            "max_buoyant_force": max_buoyant_force,
            "net_force": max_buoyant_force - weight,
            "floats": object_density < fluid_density,
            "submerged_fraction": (object_density / fluid_density).min(1.0),
        }))
    }

    fn collision(p: &mut Params) -> Result<Value, ExperimentError> {
        let m1 = p.get("m1", 1.0, positive, "positive")?;
        let v1 = p.get("v1", 2.0, any, "finite")?;
        let m2 = p.get("m2", 1.0, positive, "positive")?;
        let v2 = p.get("v2", 0.0, any, "finite")?;
        let e = p.get("restitution", 1.0, |e| (0.0..=1.0).contains(&e), "within 0..=1")?;

        let total = m1 + m2;
        let momentum = m1 * v1 + m2 * v2;
        let v1_final = (momentum + m2 * e * (v2 - v1)) / total;
        let v2_final = (momentum + m1 * e * (v1 - v2)) / total;
        let ke_before = 0.5 * m1 * v1 * v1 + 0.5 * m2 * v2 * v2;
        let ke_after = 0.5 * m1 * v1_final * v1_final + 0.5 * m2 * v2_final * v2_final;
        Ok(json!({
            "v1_final": v1_final,
            "v2_final": v2_final,
            "momentum_before": momentum,
            "momentum_after": m1 * v1_final + m2 * v2_final,
            "kinetic_energy_lost": ke_before - ke_after,
        }))
    }
}

impl ExperimentFacade for ToyWorld {
    fn catalog(&self) -> Vec<ExperimentSpec> {
        vec![
            spec(
                "projectile",
                "Projectile motion",
                &[("velocity", "m/s", 20.0), ("angle", "deg", 45.0), ("gravity", "m/s^2", 9.81), ("height", "m", 0.0)],
            ),
            spec(
                "pendulum",
                "Simple pendulum",
                &[("length", "m", 1.0), ("gravity", "m/s^2", 9.81), ("amplitude", "deg", 10.0)],
            ),
            spec(
                "buoyancy",
                "Archimedes buoyancy",
                &[("object_density", "kg/m^3", 500.0), ("fluid_density", "kg/m^3", 1000.0), ("volume", "m^3", 0.001), ("gravity", "m/s^2", 9.81)],
            ),
            spec(
                "collision",
                "One-dimensional collision",
                &[("m1", "kg", 1.0), ("v1", "m/s", 2.0), ("m2", "kg", 1.0), ("v2", "m/s", 0.0), ("restitution", "", 1.0)],
            ),
        ]
    }

    fn observation_categories(&self) -> Vec<String> {
        OBSERVATIONS.iter().map(|(c, _, _)| c.to_string()).collect()
    }

    fn run(&self, experiment: &str, parameters: &Value) -> Result<ExperimentRecord, ExperimentError> {
        let mut params = Params::new(parameters);
        let result = match experiment {
            "projectile" => Self::projectile(&mut params)?,
            "pendulum" => Self::pendulum(&mut params)?,
            "buoyancy" => Self::buoyancy(&mut params)?,
            "collision" => Self::collision(&mut params)?,
            other => return Err(ExperimentError::UnknownExperiment(other.to_string())),
        };
        Ok(ExperimentRecord {
            id: Uuid::new_v4().to_string(),
            experiment: experiment.to_string(),
            parameters: params.into_value(),
            result,
            requested_by: None,
            timestamp: Utc::now(),
        })
    }

    fn observe(&self, category: &str) -> Result<Observation, ExperimentError> {
        OBSERVATIONS
            .iter()
            .find(|(c, _, _)| *c == category)
            .map(|(category, summary, data)| Observation {
                category: category.to_string(),
                summary: summary.to_string(),
                data: serde_json::from_str(data).unwrap_or(Value::Null),
            })
            .ok_or_else(|| ExperimentError::UnknownObservation(category.to_string()))
    }
}

const OBSERVATIONS: &[(&str, &str, &str)] = &[
    (
        "galaxy_rotation_curves",
        "Outer stars orbit faster than visible mass predicts",
        r#"{"radius_kpc": [2, 5, 10, 20, 30], "velocity_km_s": [150, 210, 220, 222, 221]}"#,
    ),
    (
        "cmb",
        "Cosmic microwave background temperature and anisotropy",
        r#"{"temperature_k": 2.7255, "anisotropy": 1e-5}"#,
    ),
    (
        "muon_g2",
        "Muon anomalous magnetic moment, experiment vs Standard Model",
        r#"{"measured": 0.00116592059, "predicted": 0.00116591810}"#,
    ),
    (
        "hubble_tension",
        "Local and early-universe Hubble constant disagree",
        r#"{"local_km_s_mpc": 73.0, "cmb_km_s_mpc": 67.4}"#,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn run(experiment: &str, parameters: Value) -> ExperimentRecord {
        ToyWorld::new().run(experiment, &parameters).unwrap()
    }

    fn field(record: &ExperimentRecord, name: &str) -> f64 {
        record.result[name].as_f64().unwrap()
    }

    #[test]
    fn test_projectile_range_at_45_degrees() {
        let record = run("projectile", json!({"velocity": 10.0, "gravity": 10.0}));
        assert!((field(&record, "range") - 10.0).abs() < 1e-9);
        assert!((field(&record, "max_height") - 2.5).abs() < 1e-9);
        assert_eq!(record.parameters["angle"], 45.0);
    }

    #[test]
    fn test_pendulum_period() {
        let record = run("pendulum", json!({"length": 9.81, "amplitude": 1.0}));
        let small = field(&record, "small_angle_period");
        assert!((small - 2.0 * std::f64::consts::PI).abs() < 1e-9);
        assert!(field(&record, "period") > small);
    }

    #[test]
    fn test_elastic_collision_swaps_velocities() {
        let record = run("collision", Value::Null);
        assert!((field(&record, "v1_final")).abs() < 1e-9);
        assert!((field(&record, "v2_final") - 2.0).abs() < 1e-9);
        assert!(field(&record, "kinetic_energy_lost").abs() < 1e-9);
    }

    #[test]
    fn test_buoyancy_floats() {
        let record = run("buoyancy", json!({"object_density": 250.0}));
        assert_eq!(record.result["floats"], true);
        assert!((field(&record, "submerged_fraction") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_experiment() {
        let err = ToyWorld::new().run("warp_drive", &Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "Unknown experiment: warp_drive");
    }

    #[test]
    fn test_invalid_parameter() {
        let err = ToyWorld::new()
            .run("pendulum", &json!({"length": -1.0}))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidParameter { ref name, .. } if name == "length"));

        let err = ToyWorld::new()
            .run("projectile", &json!({"velocity": "fast"}))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidParameter { .. }));
    }

    #[test]
    fn test_prediction_matching() {
        let record = run("pendulum", json!({"length": 1.0}));
        let period = field(&record, "period");

        let mut expected = BTreeMap::new();
        expected.insert("period".to_string(), period * 1.03);
        assert!(record.matches_prediction(&expected, 0.05));

        expected.insert("period".to_string(), period * 1.2);
        assert!(!record.matches_prediction(&expected, 0.05));

        expected.clear();
        expected.insert("no_such_field".to_string(), 1.0);
        assert!(!record.matches_prediction(&expected, 0.05));

        assert!(!record.matches_prediction(&BTreeMap::new(), 0.05));
    }

    #[test]
    fn test_observations() {
        let world = ToyWorld::new();
        assert_eq!(world.observation_categories().len(), 4);
        let obs = world.observe("hubble_tension").unwrap();
        assert_eq!(obs.data["local_km_s_mpc"], 73.0);
        assert!(world.observe("aether_wind").is_err());
    }
}
