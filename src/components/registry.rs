//! Component factories keyed by kind name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppResult, SdrmError};
use crate::lifecycle::Component;

use super::{
    AirspyComponent, ComponentContext, ConsoleDisplay, FftComponent, AIRSPY_COMPONENT,
    CONSOLE_DISPLAY, FFT_COMPONENT,
};

/// Builds one component from its context.
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentContext) -> AppResult<Box<dyn Component>> + Send + Sync>;

/// Factories keyed by component kind.
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    /// Registry with the built-in kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(AIRSPY_COMPONENT, |ctx| {
            Ok(Box::new(AirspyComponent::new(ctx)?) as Box<dyn Component>)
        });
        registry.register(FFT_COMPONENT, |ctx| {
            Ok(Box::new(FftComponent::new(ctx)?) as Box<dyn Component>)
        });
        registry.register(CONSOLE_DISPLAY, |ctx| {
            Ok(Box::new(ConsoleDisplay::new(ctx)?) as Box<dyn Component>)
        });

        registry
    }

    /// Registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Adds or replaces the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentContext) -> AppResult<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// True when `kind` has a factory.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiates the component described by `ctx.definition`.
    pub fn create(&self, ctx: &ComponentContext) -> AppResult<Box<dyn Component>> {
        let kind = &ctx.definition.kind;
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| SdrmError::UnknownComponentKind(kind.clone()))?;
        factory(ctx)
    }
}
