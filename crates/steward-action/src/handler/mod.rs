//! Tool handler registry and trait definition.
//!
//! Defines the `ToolHandler` async trait implemented by the concrete tools
//! (click, type, navigate, ...) and the registry the tool controller uses to
//! dispatch a request to the handler for its kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::types::{ObservedContent, ToolKind, ToolRequest};

/// A concrete tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool kind this handler performs.
    fn kind(&self) -> ToolKind;

    /// Perform `request`. `observation` is the task's last observed content.
    async fn execute(
        &self,
        request: &ToolRequest,
        observation: Option<&ObservedContent>,
    ) -> Result<(), ToolError>;

    /// Human-readable description of what `request` will do.
    fn describe(&self, request: &ToolRequest) -> String {
        match request.tab {
            Some(tab) => format!("{} on {}", request.kind(), tab),
            None => request.kind().to_string(),
        }
    }
}

/// Maps tool kinds to their handlers. Registering a kind twice replaces the
/// earlier handler.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<ToolKind, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            tracing::debug!(tool = %kind, "Replaced tool handler");
        }
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ToolKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
