//! Tool Registry - name to tool definition, in registration order.
//!
//! This module provides:
//! - [`ToolDefinition`]: a tool's descriptor plus its handler
//! - [`ToolRegistry`]: registration, lookup and ordered listing
//! - [`builtin_registry`]: the registry served by the binary

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::definitions::{CountdownTool, GreetTool};
use super::handlers::ToolHandler;
use super::RegistryError;
use crate::core::protocol::{ParamSpec, ToolDescriptor};

// ============================================================================
// Tool Definition
// ============================================================================

/// A registered tool: name, parameter schema and handler.
///
/// Immutable once registered; the registry hands out shared references.
#[derive(Clone)]
pub struct ToolDefinition {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Create a definition with no description and no parameters.
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: name.into(),
                description: None,
                params: Vec::new(),
            },
            handler: Arc::new(handler),
        }
    }

    /// Set the description shown to clients.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = Some(description.into());
        self
    }

    /// Append a parameter to the ordered schema.
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.descriptor.params.push(param);
        self
    }

    /// The tool name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The wire descriptor.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// The handler invoked for calls.
    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of tools keyed by name, remembering registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDefinition>>,
    index: HashMap<String, usize>,
}

/// Iterator over registered tools in registration order.
///
/// A clone replays the remaining tools; a fresh call to
/// [`ToolRegistry::list`] always starts from the first tool.
#[derive(Clone)]
pub struct ToolIter<'a> {
    inner: std::slice::Iter<'a, Arc<ToolDefinition>>,
}

impl<'a> Iterator for ToolIter<'a> {
    type Item = &'a ToolDefinition;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Arc::as_ref)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ToolIter<'_> {}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the name is taken.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        debug!(tool = %name, position = self.tools.len(), "registered tool");
        self.index.insert(name, self.tools.len());
        self.tools.push(Arc::new(definition));
        Ok(())
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDefinition>, RegistryError> {
        self.index
            .get(name)
            .map(|&position| Arc::clone(&self.tools[position]))
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// All tools in registration order.
    pub fn list(&self) -> ToolIter<'_> {
        ToolIter {
            inner: self.tools.iter(),
        }
    }

    /// Wire descriptors for discovery, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.list().map(|tool| tool.descriptor().clone()).collect()
    }

    /// Get all tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        self.list().map(ToolDefinition::name).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.tool_names())
            .finish()
    }
}

/// Build the registry with all built-in tools.
///
/// This is the central place where built-in tools are registered.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for definition in [GreetTool::definition(), CountdownTool::definition()] {
        if let Err(e) = registry.register(definition) {
            tracing::warn!("Skipping built-in tool: {}", e);
        }
    }
    registry
}
