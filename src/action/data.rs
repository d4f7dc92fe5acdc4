//! data.rs
//! Parameter data providers: one value per parameter per iteration.

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ActionRequest, ArgumentValue};
use std::collections::HashMap;

pub trait DataProvider: Send {
    fn parameter_name(&self) -> &str;

    /// Next value. `already_generated` holds the values produced by the
    /// providers before this one in the same batch.
    fn next_value(&mut self, already_generated: &[ArgumentValue]) -> ArgumentValue;
}

/// Cycles through a fixed list of values.
pub struct ListDataProvider {
    parameter: String,
    values: Vec<String>,
    next: usize,
}

impl ListDataProvider {
    pub fn new(parameter: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            parameter: parameter.into(),
            values,
            next: 0,
        }
    }
}

impl DataProvider for ListDataProvider {
    fn parameter_name(&self) -> &str {
        &self.parameter
    }

    fn next_value(&mut self, _already_generated: &[ArgumentValue]) -> ArgumentValue {
        let value = if self.values.is_empty() {
            String::new()
        } else {
            let value = self.values[self.next % self.values.len()].clone();
            self.next = (self.next + 1) % self.values.len();
            value
        };
        ArgumentValue::new(self.parameter.clone(), value)
    }
}

/// Integers from `start` to `end` inclusive, wrapping back to `start`.
/// With a template, `{}` is replaced by the number (`user{}` -> `user7`).
pub struct RangeDataProvider {
    parameter: String,
    start: i64,
    end: i64,
    template: Option<String>,
    current: i64,
}

impl RangeDataProvider {
    pub fn new(parameter: impl Into<String>, start: i64, end: i64, template: Option<String>) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            parameter: parameter.into(),
            start,
            end,
            template,
            current: start,
        }
    }
}

impl DataProvider for RangeDataProvider {
    fn parameter_name(&self) -> &str {
        &self.parameter
    }

    fn next_value(&mut self, _already_generated: &[ArgumentValue]) -> ArgumentValue {
        let number = self.current;
        self.current = if number >= self.end { self.start } else { number + 1 };
        let value = match &self.template {
            Some(template) => template.replace("{}", &number.to_string()),
            None => number.to_string(),
        };
        ArgumentValue::new(self.parameter.clone(), value)
    }
}

/// Serialisable provider description, as found in a queue definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataProviderDefinition {
    List {
        parameter: String,
        values: Vec<String>,
    },
    Range {
        parameter: String,
        start: i64,
        end: i64,
        #[serde(default)]
        template: Option<String>,
    },
}

impl DataProviderDefinition {
    pub fn build(&self) -> Box<dyn DataProvider> {
        match self {
            DataProviderDefinition::List { parameter, values } => {
                Box::new(ListDataProvider::new(parameter.clone(), values.clone()))
            }
            DataProviderDefinition::Range {
                parameter,
                start,
                end,
                template,
            } => Box::new(RangeDataProvider::new(
                parameter.clone(),
                *start,
                *end,
                template.clone(),
            )),
        }
    }
}

/// Providers shared by all workers of a queue. Generation of a batch is
/// serialised so every worker gets a consistent set of values.
#[derive(Default)]
pub struct SharedProviders {
    providers: Mutex<Vec<Box<dyn DataProvider>>>,
}

impl SharedProviders {
    pub fn new(providers: Vec<Box<dyn DataProvider>>) -> Self {
        Self {
            providers: Mutex::new(providers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }

    pub fn generate(&self) -> Vec<ArgumentValue> {
        let mut providers = self.providers.lock();
        let mut values = Vec::with_capacity(providers.len());
        for provider in providers.iter_mut() {
            let value = provider.next_value(&values);
            values.push(value);
        }
        values
    }

    /// Warn about parameters that more providers supply than actions use.
    /// Returns the offending parameter names, sorted.
    pub fn warn_unused_parameters(&self, requests: &[ActionRequest]) -> Vec<String> {
        let mut provided: HashMap<String, usize> = HashMap::new();
        for provider in self.providers.lock().iter() {
            *provided.entry(provider.parameter_name().to_string()).or_insert(0) += 1;
        }
        let mut used: HashMap<&str, usize> = HashMap::new();
        for name in requests.iter().flat_map(|r| r.parameter_names()) {
            *used.entry(name).or_insert(0) += 1;
        }

        let mut unused: Vec<String> = provided
            .into_iter()
            .filter_map(|(name, in_providers)| {
                let in_actions = used.get(name.as_str()).copied().unwrap_or(0);
                (in_providers > in_actions).then(|| {
                    warn!(
                        "'{name}' parameter is provided by {in_providers} data providers while it is used in only {in_actions} actions"
                    );
                    name
                })
            })
            .collect();
        unused.sort();
        unused
    }
}
