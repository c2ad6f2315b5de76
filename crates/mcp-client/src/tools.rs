//! Registry of the tools the worker exposes.

use std::collections::HashMap;

use serde_json::Value;
use tw_domain::tool::{ToolDefinition, ToolDescriptor};

use crate::error::McpError;

/// Protocol methods that can never be registered as tools.
const RESERVED_METHODS: &[&str] = &["initialize", "ping"];

/// Validated, ordered set of tool descriptors.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Validate every descriptor once and build the registry.
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Result<Self, McpError> {
        let mut registry = Self::default();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), McpError> {
        descriptor.validate().map_err(McpError::Protocol)?;
        if RESERVED_METHODS.contains(&descriptor.name.as_str()) {
            return Err(McpError::Protocol(format!(
                "'{}' is a reserved protocol method",
                descriptor.name
            )));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(McpError::Protocol(format!(
                "tool '{}' registered twice",
                descriptor.name
            )));
        }
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    /// JSON Schema definitions for the completion engine, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::to_definition).collect()
    }

    /// Check that `name` is registered and `arguments` satisfy its descriptor.
    pub fn check_call(&self, name: &str, arguments: &Value) -> Result<&ToolDescriptor, McpError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        let args = match arguments {
            Value::Object(map) => map,
            other => {
                return Err(McpError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("arguments must be an object, got {other}"),
                })
            }
        };

        let missing: Vec<&str> = descriptor
            .required
            .iter()
            .filter(|r| args.get(r.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(McpError::InvalidArguments {
                tool: name.to_string(),
                reason: format!("missing required parameter(s): {}", missing.join(", ")),
            });
        }

        Ok(descriptor)
    }
}
