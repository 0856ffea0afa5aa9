//! Builds [`DataProcessor`]s from configuration definitions.
//!
//! The set of triggers and actions is closed: every definition variant maps to one concrete
//! type, and wrapper definitions become nested values around their inner action.

use crate::config::{ActionDefinition, ActionsConfig, ProcessorDefinition, TriggerDefinition};
use crate::error::AppResult;
use crate::pipeline::action::{
    Action, LoggingAction, RefeedAction, SaveToStoreAction, WebhookAction,
};
use crate::pipeline::context::RunContext;
use crate::pipeline::processor::{DataProcessor, ProcessorOptions};
use crate::pipeline::trigger::{ValueDifferenceTrigger, ValueThresholdTrigger};
use crate::pipeline::wrappers::{OnlyAfterDate, OnlyOnChange, OnlyOnValue};

pub struct ProcessorRegistry {
    context: RunContext,
    options: ProcessorOptions,
}

impl ProcessorRegistry {
    /// Registry whose actions share `context`'s store and feedback queue.
    pub fn new(context: RunContext, options: ProcessorOptions) -> Self {
        Self { context, options }
    }

    /// One processor per definition in `config`, in file order.
    pub fn create_all(&self, config: &ActionsConfig) -> AppResult<Vec<DataProcessor>> {
        config
            .processors
            .iter()
            .map(|definition| self.create(definition))
            .collect()
    }

    pub fn create(&self, definition: &ProcessorDefinition) -> AppResult<DataProcessor> {
        let action = self.create_action(&definition.action)?;
        let trigger_name = definition
            .trigger
            .name()
            .unwrap_or(&definition.name)
            .to_string();

        let processor = match &definition.trigger {
            TriggerDefinition::Threshold {
                sensor_name,
                comparator,
                threshold,
                deployment_id,
                ..
            } => {
                let mut trigger =
                    ValueThresholdTrigger::new(trigger_name, sensor_name, *comparator, *threshold);
                if let Some(deployment_id) = deployment_id {
                    trigger = trigger.for_deployment(*deployment_id);
                }
                DataProcessor::with_options(&definition.name, trigger, action, self.options)
            }
            TriggerDefinition::Difference {
                sensor_name,
                target_deployment_id,
                reference_deployment_id,
                ..
            } => {
                let trigger = ValueDifferenceTrigger::new(
                    trigger_name,
                    sensor_name,
                    *target_deployment_id,
                    *reference_deployment_id,
                );
                DataProcessor::with_options(&definition.name, trigger, action, self.options)
            }
        };

        tracing::debug!(
            processor = %definition.name,
            action = %definition.action.describe(),
            "Built processor"
        );
        Ok(processor)
    }

    pub fn create_action(&self, definition: &ActionDefinition) -> AppResult<Box<dyn Action>> {
        let action: Box<dyn Action> = match definition {
            ActionDefinition::Save => Box::new(SaveToStoreAction::new(&self.context)),
            ActionDefinition::Log => Box::new(LoggingAction),
            ActionDefinition::Refeed => Box::new(RefeedAction::new(&self.context)),
            ActionDefinition::Webhook { uri } => Box::new(WebhookAction::new(uri.as_str())?),
            ActionDefinition::OnlyOnChange { inner } => {
                Box::new(OnlyOnChange::new(self.create_action(inner)?))
            }
            ActionDefinition::OnlyOnValue { value, inner } => {
                Box::new(OnlyOnValue::new(self.create_action(inner)?, value.clone()))
            }
            ActionDefinition::OnlyAfterDate { after, inner } => {
                Box::new(OnlyAfterDate::new(self.create_action(inner)?, *after))
            }
        };
        Ok(action)
    }
}
