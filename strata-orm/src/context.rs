//! # Context Module
//!
//! Explicit per-call context for the builders and the pipeline. There is no
//! ambient request state anywhere in the crate: language, the acting user,
//! hook bypassing, custom caller data and an optionally shared population
//! cache all travel through [`QueryContext`], which keeps the core testable
//! without a web server in front of it.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::populate::PopulationCache;

/// A function that localizes validation messages.
pub type Translator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Caller-supplied state threaded through one builder invocation.
#[derive(Clone, Default)]
pub struct QueryContext {
    /// Language used for translatable collections and message localization.
    pub language: Option<String>,
    /// The acting user's id, available to guards and hooks.
    pub user_id: Option<i64>,
    /// Skip the collection's lifecycle hooks for this call.
    pub bypass_hooks: bool,
    /// Free-form caller data, readable by hooks and custom populators.
    pub custom: serde_json::Map<String, Value>,
    /// Localizer for validator messages; identity when unset.
    pub(crate) translator: Option<Translator>,
    /// A population cache shared across builders within one request.
    /// Must never outlive the request; a fresh one is created per terminal
    /// call when unset.
    pub(crate) shared_cache: Option<Arc<Mutex<PopulationCache>>>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn bypassing_hooks(mut self) -> Self {
        self.bypass_hooks = true;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Shares one population cache across every builder this context is
    /// attached to. Scope it to a single request.
    pub fn with_shared_cache(mut self) -> Self {
        self.shared_cache = Some(Arc::new(Mutex::new(PopulationCache::default())));
        self
    }

    pub(crate) fn translate(&self, message: &str) -> String {
        match &self.translator {
            Some(translator) => translator(message),
            None => message.to_string(),
        }
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("language", &self.language)
            .field("user_id", &self.user_id)
            .field("bypass_hooks", &self.bypass_hooks)
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}
