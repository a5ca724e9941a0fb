//! The pluggable scoring model contract.
//!
//! Model plugins are not dynamically loaded (there is no idiomatic Rust
//! equivalent to dynamic module import); instead each `class_name` named
//! in `models.yaml` must match a variant registered at compile time in
//! [`BuiltinModel`]. An unmatched `class_name` is a per-entry load error,
//! isolated the same way an import failure would be.

use crate::error::{ModelError, ModelResult};

/// One feature row: the fields the reference model set uses.
#[derive(Debug, Clone, Default)]
pub struct FeatureRow {
    pub title: String,
    pub snippet: String,
    pub domain: String,
}

/// A fittable, predictable scoring model.
pub trait Model: Send + Sync {
    fn fit(&mut self, features: &[FeatureRow], labels: &[f64]) -> ModelResult<()>;
    fn predict(&self, features: &[FeatureRow]) -> ModelResult<Vec<f64>>;
    fn version(&self) -> &str;
    fn name(&self) -> &str;
}

/// Assigns a neutral score (0.0) to every row. Never trains; serves as
/// the default fallback when no other model is available or when a
/// selected model's `predict` call fails.
#[derive(Debug, Clone)]
pub struct BaselineModel {
    version: String,
}

impl BaselineModel {
    pub fn new() -> Self {
        Self {
            version: "1.0.0".to_string(),
        }
    }
}

impl Default for BaselineModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for BaselineModel {
    fn fit(&mut self, _features: &[FeatureRow], _labels: &[f64]) -> ModelResult<()> {
        Ok(())
    }

    fn predict(&self, features: &[FeatureRow]) -> ModelResult<Vec<f64>> {
        Ok(vec![0.0; features.len()])
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn name(&self) -> &str {
        "Baseline Model"
    }
}

/// Compile-time registration table of built-in model implementations,
/// selected by `class_name` (replacing dynamic module/class resolution).
#[derive(Debug, Clone)]
pub enum BuiltinModel {
    Baseline(BaselineModel),
}

impl BuiltinModel {
    /// Resolves a `class_name` from `models.yaml` to a constructed
    /// instance, or an `UnknownClass` error if no built-in matches.
    pub fn construct(class_name: &str) -> ModelResult<Self> {
        match class_name {
            "BaselineModel" | "baseline" => Ok(BuiltinModel::Baseline(BaselineModel::new())),
            other => Err(ModelError::UnknownClass {
                class_name: other.to_string(),
            }),
        }
    }
}

impl Model for BuiltinModel {
    fn fit(&mut self, features: &[FeatureRow], labels: &[f64]) -> ModelResult<()> {
        match self {
            BuiltinModel::Baseline(m) => m.fit(features, labels),
        }
    }

    fn predict(&self, features: &[FeatureRow]) -> ModelResult<Vec<f64>> {
        match self {
            BuiltinModel::Baseline(m) => m.predict(features),
        }
    }

    fn version(&self) -> &str {
        match self {
            BuiltinModel::Baseline(m) => m.version(),
        }
    }

    fn name(&self) -> &str {
        match self {
            BuiltinModel::Baseline(m) => m.name(),
        }
    }
}

/// Clamps a raw score into the persisted [-1.0, 1.0] range.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(-1.0, 1.0)
}

/// `predict` output to a binary label using the reference 0.5 threshold.
pub fn to_binary_prediction(value: f64) -> f64 {
    if value >= 0.5 {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_predicts_zero_for_every_row() {
        let model = BaselineModel::new();
        let rows = vec![FeatureRow::default(), FeatureRow::default()];
        let scores = model.predict(&rows).unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn unknown_class_name_is_isolated_error() {
        let err = BuiltinModel::construct("SomeNonexistentModel").unwrap_err();
        assert!(matches!(err, ModelError::UnknownClass { .. }));
    }

    #[test]
    fn clamp_score_bounds_to_unit_interval() {
        assert_eq!(clamp_score(5.0), 1.0);
        assert_eq!(clamp_score(-5.0), -1.0);
        assert_eq!(clamp_score(0.25), 0.25);
    }

    #[test]
    fn to_binary_prediction_uses_half_threshold() {
        assert_eq!(to_binary_prediction(0.5), 1.0);
        assert_eq!(to_binary_prediction(0.49), 0.0);
    }
}
