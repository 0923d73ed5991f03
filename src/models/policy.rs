use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::utils::constants::{
    DEFAULT_MAX_GAP_HOURS, FIELD_HUMIDITY, FIELD_PRECIPITATION, FIELD_TEMPERATURE,
    FIELD_WIND_DIRECTION, FIELD_WIND_SPEED,
};

/// Closed set of gap-filling strategies. The set is small and fixed, so a
/// tagged enum beats per-field polymorphism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImputationStrategy {
    LinearTimeInterpolation,
    NearestNeighborCarry,
    BoundedClamp,
    None,
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// How one field is repaired.
///
/// `bounds` is the clamp range for imputed values; `valid_range` is the hard
/// physical limit beyond which a raw value is upstream garbage and treated
/// as absent. Between the two ranges a raw value survives as suspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FieldPolicy {
    pub strategy: ImputationStrategy,

    #[serde(default)]
    pub bounds: Option<Bounds>,

    #[serde(default)]
    pub valid_range: Option<Bounds>,

    #[validate(range(min = 1, max = 168))]
    pub max_gap_hours: u32,
}

impl FieldPolicy {
    pub fn new(strategy: ImputationStrategy, max_gap_hours: u32) -> Self {
        Self {
            strategy,
            bounds: None,
            valid_range: None,
            max_gap_hours,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(Bounds::new(min, max));
        self
    }

    pub fn with_valid_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(Bounds::new(min, max));
        self
    }
}

/// Static field-name → policy mapping, supplied at startup and never
/// mutated during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    fields: BTreeMap<String, FieldPolicy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Default policies for the ASOS hourly feed: temperature and humidity
    /// are repaired with a 3-hour cap like the upstream pipeline, wind and
    /// direction follow their physical character, precipitation is never
    /// fabricated.
    pub fn asos_default() -> Self {
        let mut set = Self::new();
        set.insert(
            FIELD_TEMPERATURE,
            FieldPolicy::new(
                ImputationStrategy::LinearTimeInterpolation,
                DEFAULT_MAX_GAP_HOURS,
            )
            .with_valid_range(-90.0, 60.0),
        );
        set.insert(
            FIELD_HUMIDITY,
            FieldPolicy::new(ImputationStrategy::BoundedClamp, DEFAULT_MAX_GAP_HOURS)
                .with_bounds(0.0, 100.0)
                .with_valid_range(0.0, 150.0),
        );
        set.insert(
            FIELD_WIND_SPEED,
            FieldPolicy::new(
                ImputationStrategy::LinearTimeInterpolation,
                DEFAULT_MAX_GAP_HOURS,
            )
            .with_bounds(0.0, 100.0)
            .with_valid_range(0.0, 120.0),
        );
        set.insert(
            FIELD_WIND_DIRECTION,
            FieldPolicy::new(
                ImputationStrategy::NearestNeighborCarry,
                DEFAULT_MAX_GAP_HOURS,
            ),
        );
        set.insert(
            FIELD_PRECIPITATION,
            FieldPolicy::new(ImputationStrategy::None, 1).with_valid_range(0.0, 500.0),
        );
        set
    }

    /// Load a policy set from a TOML or JSON file. The file is a flat map of
    /// field name to policy, e.g.
    ///
    /// ```toml
    /// [temperature]
    /// strategy = "linear-time-interpolation"
    /// max_gap_hours = 3
    /// valid_range = { min = -90.0, max = 60.0 }
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let fields: BTreeMap<String, FieldPolicy> = settings.try_deserialize()?;

        let set = Self { fields };
        set.validate_policies()?;
        Ok(set)
    }

    pub fn insert(&mut self, field: &str, policy: FieldPolicy) {
        self.fields.insert(field.to_string(), policy);
    }

    pub fn get(&self, field: &str) -> Option<&FieldPolicy> {
        self.fields.get(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldPolicy)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn validate_policies(&self) -> Result<()> {
        for policy in self.fields.values() {
            policy.validate()?;
        }
        Ok(())
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::asos_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strategy_serde_tags() {
        let tag = serde_json::to_string(&ImputationStrategy::LinearTimeInterpolation).unwrap();
        assert_eq!(tag, "\"linear-time-interpolation\"");

        let parsed: ImputationStrategy = serde_json::from_str("\"nearest-neighbor-carry\"").unwrap();
        assert_eq!(parsed, ImputationStrategy::NearestNeighborCarry);

        let parsed: ImputationStrategy = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, ImputationStrategy::None);
    }

    #[test]
    fn test_bounds() {
        let bounds = Bounds::new(0.0, 100.0);
        assert!(bounds.contains(0.0));
        assert!(bounds.contains(100.0));
        assert!(!bounds.contains(100.1));
        assert_eq!(bounds.clamp(120.0), 100.0);
        assert_eq!(bounds.clamp(-3.0), 0.0);
        assert_eq!(bounds.clamp(55.0), 55.0);
    }

    #[test]
    fn test_default_policy_set() {
        let set = PolicySet::asos_default();
        assert_eq!(
            set.get(FIELD_TEMPERATURE).unwrap().strategy,
            ImputationStrategy::LinearTimeInterpolation
        );
        assert_eq!(
            set.get(FIELD_PRECIPITATION).unwrap().strategy,
            ImputationStrategy::None
        );
        assert_eq!(set.get(FIELD_HUMIDITY).unwrap().max_gap_hours, 3);
        assert!(set.get("pressure").is_none());
    }

    #[test]
    fn test_policy_validation_rejects_zero_gap() {
        let policy = FieldPolicy::new(ImputationStrategy::LinearTimeInterpolation, 0);
        assert!(policy.validate().is_err());

        let policy = FieldPolicy::new(ImputationStrategy::LinearTimeInterpolation, 3);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_set_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[temperature]
strategy = "linear-time-interpolation"
max_gap_hours = 6
valid_range = {{ min = -90.0, max = 60.0 }}

[humidity]
strategy = "bounded-clamp"
max_gap_hours = 2
bounds = {{ min = 0.0, max = 100.0 }}
"#
        )
        .unwrap();

        let set = PolicySet::from_file(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("temperature").unwrap().max_gap_hours, 6);
        assert_eq!(
            set.get("humidity").unwrap().bounds,
            Some(Bounds::new(0.0, 100.0))
        );
    }
}
