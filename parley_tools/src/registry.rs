use std::collections::HashMap;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use parley_core::ToolSpec;
use tracing::info;

use crate::{ToolDescriptor, ToolError};

/// External supplier of tool descriptors (e.g. a discovery protocol client).
#[async_trait]
pub trait ToolSource: Send + Sync {
    fn name(&self) -> &str;
    async fn discover(&self) -> anyhow::Result<Vec<ToolDescriptor>>;
}

pub(crate) struct RegisteredTool {
    pub(crate) descriptor: ToolDescriptor,
    pub(crate) validator: JSONSchema,
}

/// Name-indexed tool registry.
///
/// Registration compiles each parameter schema once; lookups at call time
/// resolve by name only.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(ToolError::Duplicate(descriptor.name));
        }
        let validator = JSONSchema::compile(&descriptor.parameter_schema).map_err(|e| {
            ToolError::InvalidSchema {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            }
        })?;

        info!("Registering tool: {}", descriptor.name);
        self.order.push(descriptor.name.clone());
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                validator,
            },
        );
        Ok(())
    }

    /// Register every descriptor offered by `source`.
    ///
    /// Returns the number of tools added; a name clash aborts with the
    /// tools registered so far kept.
    pub async fn discover_from(&mut self, source: &dyn ToolSource) -> anyhow::Result<usize> {
        let descriptors = source.discover().await?;
        let count = descriptors.len();
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        info!("Discovered {count} tools from {}", source.name());
        Ok(count)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// Tool specs in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.descriptor.spec())
            .collect()
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
