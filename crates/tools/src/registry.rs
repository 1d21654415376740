//! Per-session tool registry.
//!
//! Tools are registered once at session start. Names are unique; lookup is
//! O(1); descriptor order is registration order so the tool surface shown
//! to the model is stable across calls.

use std::collections::HashMap;
use std::sync::Arc;

use ad_domain::error::{Error, Result};
use ad_domain::tool::{Tool, ToolDescriptor};

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names fail fast at startup.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().name;
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].clone())
            .ok_or_else(|| Error::UnknownTool(name.to_owned()))
    }

    /// Descriptors in registration order, ready for the model request.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
