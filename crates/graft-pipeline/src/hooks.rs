//! Category-specific pre/post processing, wired in at construction time and
//! resolved per request by category.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use graft_core::PipelineError;

use crate::request::MutationContext;

/// Custom processing around a category's mutations. `pre_process` runs after
/// field assignment and before statement building; `post_process` runs after
/// the primary commit and before secondary propagation. Errors from either
/// are fatal for the current item.
#[async_trait]
pub trait CategoryHook: Send + Sync {
    async fn pre_process(&self, _ctx: &mut MutationContext) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn post_process(&self, _ctx: &mut MutationContext) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Hook lookup by category.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn CategoryHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, category: impl Into<String>, hook: Arc<dyn CategoryHook>) {
        self.hooks.insert(category.into(), hook);
    }

    pub fn get(&self, category: &str) -> Option<&Arc<dyn CategoryHook>> {
        self.hooks.get(category)
    }
}
