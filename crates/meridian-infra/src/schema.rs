//! Per-infrastructure configuration descriptors.
//!
//! Each infrastructure declares its parameters once at construction as an
//! ordered list of [`ParameterSpec`] entries. `configure` accepts all
//! declared parameters; `reconfigure` accepts only dynamic-tagged ones.
//! Validation runs before any value is applied, so a rejected call has no
//! partial effect.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{InfraError, InfraResult};

/// Whether a parameter may change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Fixed at configure time; a reconfigure attempt fails the whole call.
    Static,
    /// Changeable at runtime without redeploying nodes.
    Dynamic,
}

/// Declaration of one configuration parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    name: String,
    description: String,
    kind: ParameterKind,
}

impl ParameterSpec {
    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Static or dynamic tag.
    #[must_use]
    pub const fn kind(&self) -> ParameterKind {
        self.kind
    }
}

/// Ordered parameter declarations for one infrastructure instance.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    specs: Vec<ParameterSpec>,
}

impl ParameterSchema {
    /// Start building a schema.
    #[must_use]
    pub fn builder() -> ParameterSchemaBuilder {
        ParameterSchemaBuilder::default()
    }

    /// The declarations, in declaration order.
    #[must_use]
    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Validate a full parameter set for `configure`.
    ///
    /// Every supplied name must be declared.
    pub fn check_configure(&self, params: &Parameters) -> InfraResult<()> {
        for name in params.names() {
            if self.spec(name).is_none() {
                return Err(InfraError::configuration(format!(
                    "unknown parameter: {name}"
                )));
            }
        }
        Ok(())
    }

    /// Apply supplied parameters in declaration order.
    ///
    /// Callers validate first; application itself can still fail on a
    /// malformed value, in which case earlier parameters of the same call
    /// remain applied (validation is what guarantees whole-call rejection
    /// for disallowed names).
    pub fn apply(
        &self,
        params: &Parameters,
        mut f: impl FnMut(&str, &Value) -> InfraResult<()>,
    ) -> InfraResult<()> {
        for spec in &self.specs {
            if let Some(value) = params.get(&spec.name) {
                f(&spec.name, value)?;
            }
        }
        Ok(())
    }

    /// Validate a parameter set for `reconfigure`.
    ///
    /// Every supplied name must be declared *and* dynamic. The whole call is
    /// rejected on the first violation, before anything is applied.
    pub fn check_reconfigure(&self, params: &Parameters) -> InfraResult<()> {
        for name in params.names() {
            match self.spec(name) {
                None => {
                    return Err(InfraError::configuration(format!(
                        "unknown parameter: {name}"
                    )))
                }
                Some(spec) if spec.kind == ParameterKind::Static => {
                    return Err(InfraError::StaticParameter {
                        name: name.to_owned(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Builder for [`ParameterSchema`].
#[derive(Debug, Default)]
pub struct ParameterSchemaBuilder {
    specs: Vec<ParameterSpec>,
}

impl ParameterSchemaBuilder {
    /// Declare a static parameter.
    #[must_use]
    pub fn static_param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.specs.push(ParameterSpec {
            name: name.into(),
            description: description.into(),
            kind: ParameterKind::Static,
        });
        self
    }

    /// Declare a dynamic parameter.
    #[must_use]
    pub fn dynamic_param(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.specs.push(ParameterSpec {
            name: name.into(),
            description: description.into(),
            kind: ParameterKind::Dynamic,
        });
        self
    }

    /// Finish the schema.
    #[must_use]
    pub fn build(self) -> ParameterSchema {
        ParameterSchema { specs: self.specs }
    }
}

/// A named parameter set handed to `configure`/`reconfigure`.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: HashMap<String, Value>,
}

impl Parameters {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Look up a value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Supplied parameter names, in no particular order. Application order
    /// is the schema's declaration order, not this one.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of supplied parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no parameters were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decode a value into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self, name: &str) -> InfraResult<Option<T>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                InfraError::configuration(format!("invalid value for {name}: {e}"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParameterSchema {
        ParameterSchema::builder()
            .static_param("hosts", "host list")
            .dynamic_param("max_nodes", "node cap")
            .build()
    }

    #[test]
    fn configure_accepts_all_declared_parameters() {
        let params = Parameters::new().with("hosts", "a,b").with("max_nodes", 4);
        schema().check_configure(&params).unwrap();
    }

    #[test]
    fn configure_rejects_unknown_parameter() {
        let params = Parameters::new().with("bogus", 1);
        assert!(matches!(
            schema().check_configure(&params),
            Err(InfraError::Configuration(_))
        ));
    }

    #[test]
    fn reconfigure_rejects_static_parameter() {
        let params = Parameters::new().with("max_nodes", 8).with("hosts", "c");
        assert!(matches!(
            schema().check_reconfigure(&params),
            Err(InfraError::StaticParameter { name }) if name == "hosts"
        ));
    }

    #[test]
    fn reconfigure_accepts_dynamic_parameter() {
        let params = Parameters::new().with("max_nodes", 8);
        schema().check_reconfigure(&params).unwrap();
    }

    #[test]
    fn decode_reports_type_mismatch() {
        let params = Parameters::new().with("max_nodes", "not a number");
        let decoded: InfraResult<Option<u32>> = params.decode("max_nodes");
        assert!(decoded.is_err());
    }

    #[test]
    fn decode_missing_is_none() {
        let params = Parameters::new();
        let decoded: Option<u32> = params.decode("max_nodes").unwrap();
        assert!(decoded.is_none());
    }
}
