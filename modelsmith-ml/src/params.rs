//! Hyperparameter values and typed parsing.
//!
//! A configuration is a loosely typed map so samplers and config files can
//! produce it without knowing the family. Each family reads it through a
//! [`ParamReader`], which turns it into a typed struct and rejects unknown
//! keys, wrong types and out-of-range values.

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view. Ints widen to f64, text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Hyperparameter configuration for one family. Ordered for determinism.
pub type HyperParams = BTreeMap<String, ParamValue>;

/// Build a [`HyperParams`] map from `(name, value)` pairs.
pub fn hyper_params<I, K, V>(pairs: I) -> HyperParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ParamValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Reads typed values out of a [`HyperParams`] map for one family.
///
/// Call [`ParamReader::finish`] once every known key has been read; it fails
/// if the map still holds keys the family does not recognize.
pub struct ParamReader<'a> {
    family: &'a str,
    params: &'a HyperParams,
    seen: BTreeSet<&'a str>,
}

impl<'a> ParamReader<'a> {
    pub fn new(family: &'a str, params: &'a HyperParams) -> Self {
        Self {
            family,
            params,
            seen: BTreeSet::new(),
        }
    }

    fn take(&mut self, key: &'a str) -> Option<&'a ParamValue> {
        self.seen.insert(key);
        self.params.get(key)
    }

    fn invalid(&self, reason: String) -> MlError {
        MlError::invalid_configuration(self.family, reason)
    }

    /// Positive integer, at least `min`.
    pub fn usize_or(&mut self, key: &'a str, default: usize, min: usize) -> Result<usize> {
        let value = match self.take(key) {
            None => return Ok(default),
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) if v.fract() == 0.0 && v.is_finite() => *v as i64,
            Some(other) => {
                return Err(self.invalid(format!("{key} must be an integer, got {other}")));
            }
        };
        if value < min as i64 {
            return Err(self.invalid(format!("{key} must be >= {min}, got {value}")));
        }
        Ok(value as usize)
    }

    fn f64_value(&mut self, key: &'a str) -> Result<Option<f64>> {
        match self.take(key) {
            None => Ok(None),
            Some(ParamValue::Text(t)) => {
                Err(self.invalid(format!("{key} must be numeric, got {t:?}")))
            }
            Some(v) => match v.as_f64() {
                Some(x) if x.is_finite() => Ok(Some(x)),
                _ => Err(self.invalid(format!("{key} must be finite"))),
            },
        }
    }

    /// Float inside `[low, high]`.
    pub fn f64_in(&mut self, key: &'a str, default: f64, low: f64, high: f64) -> Result<f64> {
        let Some(value) = self.f64_value(key)? else {
            return Ok(default);
        };
        if value < low || value > high {
            return Err(self.invalid(format!("{key} must be in [{low}, {high}], got {value}")));
        }
        Ok(value)
    }

    /// Fraction in `(0, 1]`.
    pub fn fraction_or(&mut self, key: &'a str, default: f64) -> Result<f64> {
        let Some(value) = self.f64_value(key)? else {
            return Ok(default);
        };
        if value <= 0.0 || value > 1.0 {
            return Err(self.invalid(format!("{key} must be in (0, 1], got {value}")));
        }
        Ok(value)
    }

    /// Strictly positive float.
    pub fn positive_f64_or(&mut self, key: &'a str, default: f64) -> Result<f64> {
        let Some(value) = self.f64_value(key)? else {
            return Ok(default);
        };
        if value <= 0.0 {
            return Err(self.invalid(format!("{key} must be > 0, got {value}")));
        }
        Ok(value)
    }

    /// Text value restricted to `allowed`.
    pub fn choice_or(
        &mut self,
        key: &'a str,
        default: &'static str,
        allowed: &[&'static str],
    ) -> Result<&'static str> {
        match self.take(key) {
            None => Ok(default),
            Some(ParamValue::Text(t)) => allowed
                .iter()
                .find(|a| **a == t.as_str())
                .copied()
                .ok_or_else(|| {
                    self.invalid(format!("{key} must be one of {allowed:?}, got {t:?}"))
                }),
            Some(other) => Err(self.invalid(format!("{key} must be text, got {other}"))),
        }
    }

    /// Fail on any key that was never read.
    pub fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .params
            .keys()
            .map(String::as_str)
            .filter(|k| !self.seen.contains(k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!("unrecognized parameter(s): {}", unknown.join(", "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_defaults_and_values() {
        let params = hyper_params([("n_estimators", ParamValue::Int(40)), ("rate", 0.5.into())]);
        let mut reader = ParamReader::new("test", &params);
        assert_eq!(reader.usize_or("n_estimators", 10, 1).unwrap(), 40);
        assert_eq!(reader.usize_or("max_depth", 6, 1).unwrap(), 6);
        assert_eq!(reader.fraction_or("rate", 1.0).unwrap(), 0.5);
        reader.finish().unwrap();
    }

    #[test]
    fn test_reader_rejects_unknown_key() {
        let params = hyper_params([("bogus", 1i64)]);
        let reader = ParamReader::new("test", &params);
        let err = reader.finish().unwrap_err();
        assert!(matches!(err, MlError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_reader_rejects_negative_count() {
        let params = hyper_params([("n_estimators", -5i64)]);
        let mut reader = ParamReader::new("random_forest", &params);
        let err = reader.usize_or("n_estimators", 100, 1).unwrap_err();
        assert!(matches!(
            err,
            MlError::InvalidConfiguration { ref family, .. } if family == "random_forest"
        ));
    }

    #[test]
    fn test_reader_type_checks() {
        let params = hyper_params([
            ("alpha", ParamValue::from("big")),
            ("kind", ParamValue::from("rbf")),
        ]);
        let mut reader = ParamReader::new("linear", &params);
        assert!(reader.positive_f64_or("alpha", 1.0).is_err());
        assert_eq!(reader.choice_or("kind", "linear", &["linear", "rbf"]).unwrap(), "rbf");
    }

    #[test]
    fn test_untagged_serde() {
        let params = hyper_params([
            ("a", ParamValue::Int(3)),
            ("b", ParamValue::Float(0.25)),
            ("c", ParamValue::from("x")),
        ]);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"a":3,"b":0.25,"c":"x"}"#);
        let back: HyperParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
