//! The variable/function namespace expressions are evaluated against.
//!
//! Lookups are case-insensitive and strip a leading `$`, matching the
//! source system exactly (`Get`/`Set` lowercase the key; a miss on a user
//! variable falls through to the builtin sysvar/sysfunc tables rather than
//! erroring).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::any::Any;
use crate::error::EnvError;
use crate::sysfunc;

/// A registered function: takes already-evaluated argument values, returns
/// a value or an evaluation error (rendered as an empty string by the
/// parser, matching the source system's "errors are swallowed at the call
/// site" behavior).
pub type MethodFunc = Arc<dyn Fn(&[Any]) -> Result<Any, EnvError> + Send + Sync>;

/// Variable/function environment used while formatting one command's
/// script lines.
pub struct Env {
    vars: BTreeMap<String, Any>,
    funcs: BTreeMap<String, MethodFunc>,
}

impl Env {
    pub fn new() -> Self {
        Env { vars: BTreeMap::new(), funcs: BTreeMap::new() }
    }

    fn strip_prefix(name: &str) -> &str {
        name.strip_prefix('$').unwrap_or(name)
    }

    /// Render `code` by lexing/parsing it as an expression and evaluating
    /// every `$variable`/`$_FUNC(...)` it contains against this environment.
    pub fn format(&self, code: &Any) -> String {
        let source = code.to_display_string();
        let mut parser = crate::parser::Parser::new();
        crate::lexer::lex(&source, &mut parser);
        parser.execute(self)
    }

    /// Look up a user variable, falling back to the builtin sysvar table.
    pub fn get(&self, name: &str) -> Option<Any> {
        let key = Self::strip_prefix(name).to_lowercase();
        if let Some(v) = self.vars.get(&key) {
            return Some(v.clone());
        }
        sysfunc::get_sysvar(&key)
    }

    pub fn set(&mut self, name: &str, value: Any) {
        let key = Self::strip_prefix(name).to_lowercase();
        self.vars.insert(key, value);
    }

    /// Look up a registered function, falling back to the builtin sysfunc
    /// table if this environment has no override registered.
    pub fn get_func(&self, name: &str) -> Option<MethodFunc> {
        let key = Self::strip_prefix(name).to_lowercase();
        if let Some(f) = self.funcs.get(&key) {
            return Some(f.clone());
        }
        sysfunc::get_sysfunc(&key)
    }

    pub fn set_func(&mut self, name: &str, f: MethodFunc) {
        let key = Self::strip_prefix(name).to_lowercase();
        self.funcs.insert(key, f);
    }

    /// Replace the whole variable table from a serialized YAML map, as
    /// when restoring per-runner state from disk.
    pub fn from_bytes(&mut self, bytes: &[u8]) -> Result<(), EnvError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let any = Any::from_yaml_bytes(bytes)?;
        let map = any.map().ok_or_else(|| {
            EnvError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "env data is not a map"))
        })?;
        self.vars = map.clone().into_iter().collect();
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvError> {
        Any::Map(self.vars.clone().into_iter().collect()).to_yaml_bytes()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive_and_strips_prefix() {
        let mut env = Env::new();
        env.set("Target", Any::from("worker-1"));
        assert_eq!(env.get("$TARGET").unwrap().as_str(), Some("worker-1"));
    }

    #[test]
    fn unset_variable_with_no_matching_sysvar_is_none() {
        let env = Env::new();
        assert!(env.get("nonexistent").is_none());
    }

    #[test]
    fn date_is_a_sysfunc_not_a_variable() {
        let env = Env::new();
        let f = env.get_func("_date").unwrap();
        let v = f(&[]).unwrap();
        assert!(v.as_str().unwrap().len() >= "YYYY-MM-DD".len());
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut env = Env::new();
        env.set("retries", Any::from(3i64));
        let bytes = env.to_bytes().unwrap();
        let mut restored = Env::new();
        restored.from_bytes(&bytes).unwrap();
        assert_eq!(restored.get("retries").unwrap().int(), 3);
    }
}
