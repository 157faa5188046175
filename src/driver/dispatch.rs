use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::session::Session;
use crate::driver::steps::StepExecutor;
use crate::error::{HarvestError, Result};
use crate::schema::Parameter;

/// A parameter step: applies a job's values for one parameter to a session.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(
        &self,
        steps: &StepExecutor,
        session: &mut Session,
        values: &[String],
    ) -> Result<()>;
}

/// Generic labeled-option selection with checkbox/radio semantics.
#[derive(Debug, Clone, Copy)]
pub struct ParameterStep {
    pub parameter: Parameter,
}

#[async_trait]
impl StepHandler for ParameterStep {
    async fn run(
        &self,
        steps: &StepExecutor,
        session: &mut Session,
        values: &[String],
    ) -> Result<()> {
        steps.select_parameter(session, self.parameter, values).await
    }
}

/// Parameter → handler table consulted for every schema step.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<Parameter, Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("DispatchTable")
            .field("parameters", &keys)
            .finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every parameter handled by [`ParameterStep`].
    pub fn standard() -> Self {
        let mut table = Self::new();
        for parameter in Parameter::ALL {
            table.register(parameter, Arc::new(ParameterStep { parameter }));
        }
        table
    }

    /// Install a handler, replacing any previous one for `parameter`.
    pub fn register(&mut self, parameter: Parameter, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(parameter, handler);
    }

    pub fn with_handler(mut self, parameter: Parameter, handler: Arc<dyn StepHandler>) -> Self {
        self.register(parameter, handler);
        self
    }

    pub fn handler(&self, parameter: Parameter) -> Result<Arc<dyn StepHandler>> {
        self.handlers.get(&parameter).cloned().ok_or_else(|| {
            HarvestError::Config(format!("no step handler registered for {}", parameter))
        })
    }
}
