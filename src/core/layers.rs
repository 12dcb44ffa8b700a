//! # Layered Variables
//!
//! A stack of variable scopes. The most recently pushed layer has the highest
//! priority; a lookup scans from the top layer down and returns the first definition.
//!
//! The stack is rebuilt from scratch for every resolution (`clear_layers` + `layer`)
//! because the set of contributing layers depends on the target environment.

use crate::models::{Variable, VariableInfo};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while following references between variables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// A reference points to a name no layer defines.
    #[error("Variable '{referenced_by}' references '{name}', which is not defined.")]
    UndefinedReference {
        /// The missing name.
        name: String,
        /// The variable holding the dangling reference.
        referenced_by: String,
    },
    /// Following references came back to a variable already visited.
    #[error("Circular variable reference: {}.", .chain.join(" -> "))]
    ReferenceCycle {
        /// The names visited, ending with the repeated one.
        chain: Vec<String>,
    },
}

/// One scope's worth of variable definitions.
///
/// The variable list is shared with the Info object it comes from. When a name occurs
/// several times in one layer, the last entry wins: later assignments supersede
/// earlier ones.
#[derive(Debug, Clone)]
pub struct Layer {
    origin: String,
    variables: Arc<Vec<VariableInfo>>,
}

impl Layer {
    /// Wraps a shared variable list. `origin` labels the layer in explanations.
    pub fn new(origin: impl Into<String>, variables: Arc<Vec<VariableInfo>>) -> Self {
        Self {
            origin: origin.into(),
            variables,
        }
    }

    /// Builds a layer from an owned list.
    pub fn from_variables(origin: impl Into<String>, variables: Vec<VariableInfo>) -> Self {
        Self::new(origin, Arc::new(variables))
    }

    /// Where this layer comes from, e.g. `project:app@staging`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The definition of `name` in this layer.
    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().rev().find(|entry| entry.name == name)
    }

    /// The raw entries, in list order.
    pub fn entries(&self) -> &[VariableInfo] {
        &self.variables
    }
}

/// A variable of the resolved view together with the layer that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedVariable {
    /// The winning layer.
    pub origin: String,
    /// The winning definition.
    pub variable: VariableInfo,
}

/// The stack of layers.
#[derive(Debug, Clone, Default)]
pub struct LayeredVariables {
    layers: Vec<Layer>,
}

impl LayeredVariables {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `layer` on top of the stack.
    pub fn layer(&mut self, layer: Layer) -> &mut Self {
        log::trace!(
            "Layering '{}' ({} entries) at depth {}.",
            layer.origin,
            layer.variables.len(),
            self.layers.len()
        );
        self.layers.push(layer);
        self
    }

    /// Empties the stack.
    pub fn clear_layers(&mut self) {
        self.layers.clear();
    }

    /// Number of stacked layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Layer origins, bottom (least specific) first.
    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(Layer::origin)
    }

    /// The most specific definition of `name`, or `None` when no layer defines it.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.get_info(name).map(|info| &info.variable)
    }

    /// Like [`get`](Self::get), returning the whole entry.
    pub fn get_info(&self, name: &str) -> Option<&VariableInfo> {
        self.get_with_origin(name).map(|(info, _)| info)
    }

    /// The most specific definition of `name` and the origin of its layer.
    pub fn get_with_origin(&self, name: &str) -> Option<(&VariableInfo, &str)> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name).map(|info| (info, layer.origin())))
    }

    /// Resolves `name`, following `Reference` variables until a non-reference value.
    ///
    /// Each hop is a fresh top-down lookup. Returns `Ok(None)` when `name` itself is
    /// not defined.
    ///
    /// # Errors
    /// `UndefinedReference` for a dangling reference, `ReferenceCycle` for a loop.
    pub fn dereference(&self, name: &str) -> Result<Option<&Variable>, LayerError> {
        let Some(mut variable) = self.get(name) else {
            return Ok(None);
        };
        let mut chain = vec![name.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([name]);

        while let Variable::Reference(target) = variable {
            if !seen.insert(target.as_str()) {
                chain.push(target.clone());
                return Err(LayerError::ReferenceCycle { chain });
            }
            variable = self
                .get(target)
                .ok_or_else(|| LayerError::UndefinedReference {
                    name: target.clone(),
                    referenced_by: chain.last().cloned().unwrap_or_default(),
                })?;
            chain.push(target.clone());
        }
        Ok(Some(variable))
    }

    /// Materializes the read-only resolved view: every defined name with its most
    /// specific definition.
    pub fn materialize(&self) -> BTreeMap<String, ResolvedVariable> {
        let mut view = BTreeMap::new();
        // Bottom-up, so higher layers (and later entries) overwrite lower ones.
        for layer in &self.layers {
            for entry in layer.entries() {
                view.insert(
                    entry.name.clone(),
                    ResolvedVariable {
                        origin: layer.origin.clone(),
                        variable: entry.clone(),
                    },
                );
            }
        }
        view
    }
}
