//! Harness definitions from YAML

use crate::component::{CommandTemplate, ComponentDescriptor, PresetRegistry};
use crate::core::Configuration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Configuration value - either a plain string or a file reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDefinition {
    /// Simple string value
    String(String),
    /// File reference with validation flag
    File { path: String, validate_exists: bool },
}

impl ValueDefinition {
    /// The string handed to components
    pub fn render_value(&self) -> String {
        match self {
            ValueDefinition::String(s) => s.clone(),
            ValueDefinition::File { path, .. } => path.clone(),
        }
    }
}

/// Top-level harness definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Test name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Delay between component launches in milliseconds
    #[serde(default)]
    pub stagger_ms: Option<u64>,

    /// Bound on waiting for the run to settle
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,

    /// Bound on each component's teardown
    #[serde(default)]
    pub teardown_timeout_secs: Option<u64>,

    /// Operating systems the test runs on; empty means all
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Configuration values shared by every component
    #[serde(default)]
    values: BTreeMap<String, Value>,

    /// Prefixes prepended to inherited environment variables
    #[serde(default)]
    pub prepend_env: BTreeMap<String, String>,

    /// Named component descriptors local to this file
    #[serde(default)]
    pub presets: BTreeMap<String, ComponentDescriptor>,

    /// Components, launched in this order
    pub components: Vec<ComponentConfig>,

    /// Output check racing the components
    #[serde(default)]
    pub verification: Option<VerificationConfig>,
}

/// Component entry: a preset reference or an inline command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Preset to instantiate
    #[serde(default)]
    pub preset: Option<String>,

    /// Name; overrides the preset's name when both are given
    #[serde(default)]
    pub name: Option<String>,

    /// Inline command, used when no preset is given
    #[serde(default)]
    pub command: Option<CommandTemplate>,

    /// Per-instance template values
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Additional teardown commands
    #[serde(default)]
    pub teardown: Vec<CommandTemplate>,
}

impl ComponentConfig {
    /// Resolve into a descriptor against `registry`
    pub fn to_descriptor(&self, registry: &PresetRegistry) -> Result<ComponentDescriptor> {
        let mut descriptor = match (&self.preset, &self.command) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Component cannot have both a preset and a command")
            }
            (Some(preset), None) => registry.resolve(preset)?,
            (None, Some(command)) => ComponentDescriptor {
                name: self.name.clone().unwrap_or_else(|| "component".to_string()),
                command: command.clone(),
                required_keys: Vec::new(),
                defaults: BTreeMap::new(),
                values: BTreeMap::new(),
                teardown: Vec::new(),
            },
            (None, None) => anyhow::bail!("Component needs either a preset or a command"),
        };

        if let Some(name) = &self.name {
            descriptor.name = name.clone();
        }
        descriptor.values.extend(self.values.clone());
        descriptor.teardown.extend(self.teardown.iter().cloned());
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Which bus of the watched component the verification reads
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamSelector {
    /// stdout and stderr combined
    #[default]
    Output,
    Stdout,
    Stderr,
}

/// Pattern-count verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Id of the component whose output is watched (1-based)
    pub component: usize,

    /// Stream to watch
    #[serde(default)]
    pub stream: StreamSelector,

    /// Text or regex to look for
    pub pattern: String,

    /// Whether to use regex pattern matching
    #[serde(default)]
    pub use_regex: bool,

    /// Capture group 1 must parse as a number above this value
    #[serde(default)]
    pub min_value: Option<f64>,

    /// Number of matching lines required
    #[serde(default = "default_count")]
    pub count: usize,

    /// Time allowed to observe them
    #[serde(default = "default_verification_timeout")]
    pub timeout_secs: u64,

    /// Remove color escape sequences before matching
    #[serde(default)]
    pub strip_colors: bool,
}

fn default_count() -> usize {
    1
}

fn default_verification_timeout() -> u64 {
    30
}

impl HarnessConfig {
    /// Load a harness definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a harness definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: HarnessConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the harness definition
    pub fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            anyhow::bail!("Harness '{}' has no components", self.name);
        }

        let mut seen_names = HashSet::new();
        for component in &self.components {
            if let Some(name) = &component.name {
                if !seen_names.insert(name) {
                    anyhow::bail!("Duplicate component name: {}", name);
                }
            }
        }

        let registry = self.preset_registry();
        for (index, component) in self.components.iter().enumerate() {
            component
                .to_descriptor(&registry)
                .with_context(|| format!("Invalid component {}", index + 1))?;
        }

        if let Some(verification) = &self.verification {
            if verification.component == 0 || verification.component > self.components.len() {
                anyhow::bail!(
                    "Verification watches component {} but only {} are defined",
                    verification.component,
                    self.components.len()
                );
            }
            if verification.count == 0 {
                anyhow::bail!("Verification count must be at least 1");
            }
            if verification.min_value.is_some() && !verification.use_regex {
                anyhow::bail!("Verification min_value requires use_regex with a capture group");
            }
            if verification.use_regex {
                regex::Regex::new(&verification.pattern).with_context(|| {
                    format!("Invalid verification pattern: {}", verification.pattern)
                })?;
            }
        }

        for (name, value) in self.get_values() {
            if let ValueDefinition::File {
                path,
                validate_exists: true,
            } = &value
            {
                if !Path::new(path).exists() {
                    anyhow::bail!("Missing file: {} (value '{}')", path, name);
                }
            }
        }

        Ok(())
    }

    /// Get values as parsed `ValueDefinition`s
    pub fn get_values(&self) -> BTreeMap<String, ValueDefinition> {
        self.values
            .iter()
            .map(|(key, value)| {
                let definition = match value {
                    Value::String(s) => ValueDefinition::String(s.clone()),
                    Value::Mapping(map) => {
                        let path = map
                            .get(&Value::String("path".to_string()))
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        let validate_exists = map
                            .get(&Value::String("validate_exists".to_string()))
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        ValueDefinition::File {
                            path,
                            validate_exists,
                        }
                    }
                    Value::Number(n) => ValueDefinition::String(n.to_string()),
                    Value::Bool(b) => ValueDefinition::String(b.to_string()),
                    other => ValueDefinition::String(
                        serde_yaml::to_string(other)
                            .unwrap_or_default()
                            .trim()
                            .to_string(),
                    ),
                };
                (key.clone(), definition)
            })
            .collect()
    }

    /// Built-in presets plus the ones defined in this file
    pub fn preset_registry(&self) -> PresetRegistry {
        let mut registry = PresetRegistry::with_builtins();
        for (name, descriptor) in &self.presets {
            registry.register(name, descriptor.clone());
        }
        registry
    }

    /// Run configuration built from `values` and `prepend_env`
    pub fn configuration(&self) -> Configuration {
        let mut configuration = Configuration::new();
        for (key, value) in self.get_values() {
            configuration.set(key, value.render_value());
        }
        for (key, prefix) in &self.prepend_env {
            configuration.prepend_environment_variable(key.clone(), prefix);
        }
        configuration
    }

    /// Descriptors for every component, in launch order
    pub fn descriptors(&self) -> Result<Vec<ComponentDescriptor>> {
        let registry = self.preset_registry();
        self.components
            .iter()
            .map(|component| component.to_descriptor(&registry))
            .collect()
    }

    /// Whether the test applies to the host operating system
    pub fn runs_on_this_platform(&self) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|platform| platform.eq_ignore_ascii_case(std::env::consts::OS))
    }
}
