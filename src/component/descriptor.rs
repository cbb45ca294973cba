//! Data-driven component descriptors and the named preset registry
//!
//! A descriptor is a command template plus the configuration keys it needs.
//! Templates use `{{ key }}` placeholders, resolved in this order:
//! builtins (`id`, `name`, `exe`), the component's own `values`, the run
//! configuration, then the descriptor's `defaults`.

use crate::core::{ComponentId, Configuration, HarnessError};
use crate::process::executable_suffix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A command as written in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandTemplate {
    /// Rendered, then split on whitespace
    Line(String),
    /// Each element rendered on its own, never split
    Args(Vec<String>),
}

impl CommandTemplate {
    fn render<F>(&self, lookup: &F) -> Result<Vec<String>, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            CommandTemplate::Line(line) => Ok(render_text(line, lookup)?
                .split_whitespace()
                .map(str::to_string)
                .collect()),
            CommandTemplate::Args(args) => args.iter().map(|arg| render_text(arg, lookup)).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            CommandTemplate::Line(line) => line.trim().is_empty(),
            CommandTemplate::Args(args) => args.is_empty(),
        }
    }
}

/// Description of one kind of worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Base name; the output prefix is the name followed by the component id
    #[serde(default)]
    pub name: String,

    /// Command to launch
    pub command: CommandTemplate,

    /// Keys that must be provided by `values` or the run configuration
    #[serde(default)]
    pub required_keys: Vec<String>,

    /// Fallback values for placeholders
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,

    /// Per-instance values, taking precedence over the run configuration
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Commands run best-effort when the component is terminated
    #[serde(default)]
    pub teardown: Vec<CommandTemplate>,
}

/// A descriptor rendered for one registered component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    /// Output prefix, e.g. `adapter2`
    pub name: String,
    pub command: Vec<String>,
    pub teardown: Vec<Vec<String>>,
}

impl ComponentDescriptor {
    /// Descriptor for a fixed argument list
    pub fn from_args<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            command: CommandTemplate::Args(args.into_iter().map(Into::into).collect()),
            required_keys: Vec::new(),
            defaults: BTreeMap::new(),
            values: BTreeMap::new(),
            teardown: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_teardown(mut self, command: CommandTemplate) -> Self {
        self.teardown.push(command);
        self
    }

    /// Check the descriptor itself, independent of any configuration
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.command.is_empty() {
            return Err(HarnessError::InvalidDefinition(format!(
                "component '{}' has an empty command",
                self.name
            )));
        }
        Ok(())
    }

    /// Render the command and teardown commands for component `id`
    pub fn render(
        &self,
        id: ComponentId,
        configuration: &Configuration,
    ) -> Result<RenderedCommand, HarnessError> {
        for key in &self.required_keys {
            if !self.values.contains_key(key) && !configuration.contains(key) {
                return Err(HarnessError::ConfigurationMissing(key.clone()));
            }
        }

        let name = format!("{}{}", self.name, id);
        let lookup = |key: &str| -> Option<String> {
            match key {
                "id" => Some(id.to_string()),
                "name" => Some(name.clone()),
                "exe" => Some(executable_suffix().to_string()),
                _ => self
                    .values
                    .get(key)
                    .cloned()
                    .or_else(|| configuration.get(key).ok().map(str::to_string))
                    .or_else(|| self.defaults.get(key).cloned()),
            }
        };

        let command = self.command.render(&lookup)?;
        let teardown = self
            .teardown
            .iter()
            .map(|template| template.render(&lookup))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderedCommand {
            name,
            command,
            teardown,
        })
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replace every `{{ key }}` in `template`
fn render_text<F>(template: &str, lookup: &F) -> Result<String, HarnessError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder().captures_iter(template) {
        let whole = captures.get(0).expect("capture 0 is the whole match");
        let key = &captures[1];
        let value = lookup(key).ok_or_else(|| HarnessError::ConfigurationMissing(key.to_string()))?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&value);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Named descriptors available to harness definitions
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, ComponentDescriptor>,
}

impl PresetRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in presets
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let shell = if cfg!(windows) {
            ["cmd", "/C", "{{ script }}"]
        } else {
            ["sh", "-c", "{{ script }}"]
        };
        let mut descriptor = ComponentDescriptor::from_args("shell", shell);
        descriptor.required_keys.push("script".to_string());
        registry.register("shell", descriptor);
        registry
    }

    /// Add or replace a preset; an empty descriptor name takes the preset name
    pub fn register(&mut self, name: &str, mut descriptor: ComponentDescriptor) {
        if descriptor.name.is_empty() {
            descriptor.name = name.to_string();
        }
        self.presets.insert(name.to_string(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.presets.get(name)
    }

    /// Copy of a preset, or `InvalidDefinition` if it does not exist
    pub fn resolve(&self, name: &str) -> Result<ComponentDescriptor, HarnessError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| HarnessError::InvalidDefinition(format!("unknown preset '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentDescriptor)> {
        self.presets.iter().map(|(name, d)| (name.as_str(), d))
    }
}
