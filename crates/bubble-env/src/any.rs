//! The dynamic value type shuttled between YAML scripts, the expression
//! environment and the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Dynamic, self-describing value produced from YAML (or built in code).
///
/// Conversions mirror the source system: every numeric kind converts to
/// every other, strings parse, and an unsupported conversion is a contract
/// violation rather than a recoverable error — the caller asked for a shape
/// the value cannot have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Any {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Array(Vec<Any>),
    Map(BTreeMap<String, Any>),
}

impl Default for Any {
    fn default() -> Self {
        Any::Nil
    }
}

impl Any {
    pub fn is_nil(&self) -> bool {
        matches!(self, Any::Nil)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Any::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Any::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Any::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Any::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Any::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&[Any]> {
        match self {
            Any::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn map(&self) -> Option<&BTreeMap<String, Any>> {
        match self {
            Any::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert to `i64`. Panics if the value is not numeric or a
    /// numeric-looking string — a conversion failure here is a contract
    /// violation by the caller, not recoverable program state.
    pub fn int(&self) -> i64 {
        match self {
            Any::Int(v) => *v,
            Any::Uint(v) => *v as i64,
            Any::Float(v) => *v as i64,
            Any::Bool(b) => *b as i64,
            Any::String(s) => s.trim().parse::<i64>().unwrap_or(0),
            _ => panic!("Can't convert to int!"),
        }
    }

    /// Convert to `u64`. See [`Any::int`] for the panic contract.
    pub fn uint(&self) -> u64 {
        match self {
            Any::Int(v) => *v as u64,
            Any::Uint(v) => *v,
            Any::Float(v) => *v as u64,
            Any::Bool(b) => *b as u64,
            Any::String(s) => s.trim().parse::<u64>().unwrap_or(0),
            _ => panic!("Can't convert to uint!"),
        }
    }

    /// Convert to `f64`. See [`Any::int`] for the panic contract.
    pub fn float(&self) -> f64 {
        match self {
            Any::Int(v) => *v as f64,
            Any::Uint(v) => *v as f64,
            Any::Float(v) => *v,
            Any::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => panic!("Can't convert to float!"),
        }
    }

    /// Render this value as text the way the expression evaluator embeds
    /// results back into command scripts. Floats print with 5 decimals;
    /// arrays/maps render as `[a,b]` / `{k:v,...}` for debugging visibility.
    pub fn to_display_string(&self) -> String {
        match self {
            Any::Nil => String::new(),
            Any::Bool(b) => b.to_string(),
            Any::Int(v) => v.to_string(),
            Any::Uint(v) => v.to_string(),
            Any::Float(v) => format!("{v:.5}"),
            Any::String(s) => s.clone(),
            Any::Array(items) => {
                let parts: Vec<String> = items.iter().map(Any::to_display_string).collect();
                format!("[{}]", parts.join(","))
            }
            Any::Map(m) => {
                let parts: Vec<String> = m
                    .iter()
                    .map(|(k, v)| format!("{k}:{}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    /// Parse a YAML document into an `Any` tree.
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Any, EnvError> {
        let value: serde_yaml::Value = serde_yaml::from_slice(bytes)?;
        Ok(Any::from_yaml_value(value))
    }

    /// Serialize back to a YAML document.
    pub fn to_yaml_bytes(&self) -> Result<Vec<u8>, EnvError> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    fn from_yaml_value(value: serde_yaml::Value) -> Any {
        match value {
            serde_yaml::Value::Null => Any::Nil,
            serde_yaml::Value::Bool(b) => Any::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Any::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Any::Uint(u)
                } else {
                    Any::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Any::String(s),
            serde_yaml::Value::Sequence(items) => {
                Any::Array(items.into_iter().map(Any::from_yaml_value).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s,
                        other => serde_yaml::to_string(&other).unwrap_or_default(),
                    };
                    out.insert(key, Any::from_yaml_value(v));
                }
                Any::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => Any::from_yaml_value(tagged.value),
        }
    }
}

impl From<&str> for Any {
    fn from(s: &str) -> Self {
        Any::String(s.to_string())
    }
}

impl From<String> for Any {
    fn from(s: String) -> Self {
        Any::String(s)
    }
}

impl From<i64> for Any {
    fn from(v: i64) -> Self {
        Any::Int(v)
    }
}

impl From<u64> for Any {
    fn from(v: u64) -> Self {
        Any::Uint(v)
    }
}

impl From<f64> for Any {
    fn from(v: f64) -> Self {
        Any::Float(v)
    }
}

impl From<bool> for Any {
    fn from(v: bool) -> Self {
        Any::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_displays_with_five_decimals() {
        assert_eq!(Any::Float(30.0).to_display_string(), "30.00000");
    }

    #[test]
    fn string_parses_to_int() {
        assert_eq!(Any::String("42".into()).int(), 42);
    }

    #[test]
    fn yaml_round_trip_preserves_shape() {
        let src = b"a: 1\nb:\n  - x\n  - y\n";
        let any = Any::from_yaml_bytes(src).unwrap();
        let map = any.map().unwrap();
        assert_eq!(map.get("a").unwrap().int(), 1);
        assert_eq!(map.get("b").unwrap().array().unwrap().len(), 2);
    }

    #[test]
    #[should_panic(expected = "Can't convert to int!")]
    fn int_conversion_of_array_panics() {
        Any::Array(vec![]).int();
    }
}
