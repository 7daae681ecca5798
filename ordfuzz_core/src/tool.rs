use crate::level::Level;
use crate::option::{ConfigOption, OptionType, SpaceError};
use crate::order::{OrderType, PartialOrder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The configuration space of one analysis tool: a named collection of options.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    options: BTreeMap<String, Arc<ConfigOption>>,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn add_option(&mut self, option: ConfigOption) -> Result<(), SpaceError> {
        if self.options.contains_key(&option.name) {
            return Err(SpaceError::DuplicateOption(option.name));
        }
        self.options.insert(option.name.clone(), Arc::new(option));
        Ok(())
    }

    pub fn get_option(&self, name: &str) -> Result<&Arc<ConfigOption>, SpaceError> {
        self.options
            .get(name)
            .ok_or_else(|| SpaceError::UnknownOption(name.to_string()))
    }

    /// Options in name order.
    pub fn options(&self) -> impl Iterator<Item = &Arc<ConfigOption>> {
        self.options.values()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Every directly declared order across all options.
    pub fn partial_orders(&self) -> Vec<PartialOrder> {
        self.options().flat_map(|o| o.declared_orders()).collect()
    }

    /// Loads a configuration space from its JSON artifact.
    pub fn load_from_file(path: &Path) -> Result<Self, SpaceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpaceError::Artifact(format!("Failed to read artifact at {path:?}: {e}"))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SpaceError> {
        let artifact: ToolArtifact = serde_json::from_str(content)
            .map_err(|e| SpaceError::Artifact(format!("Failed to parse artifact: {e}")))?;
        artifact.build()
    }
}

/// A level value as written in the artifact.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum RawLevel {
    Bool(bool),
    Int(i64),
    Name(String),
}

impl RawLevel {
    fn into_name(self) -> String {
        match self {
            RawLevel::Bool(true) => "TRUE".to_string(),
            RawLevel::Bool(false) => "FALSE".to_string(),
            RawLevel::Int(value) => value.to_string(),
            RawLevel::Name(name) => name,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrderEntry {
    order: OrderType,
    left: RawLevel,
    right: RawLevel,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OptionEntry {
    name: String,
    #[serde(rename = "type")]
    option_type: OptionType,
    #[serde(default)]
    levels: Vec<RawLevel>,
    min_value: Option<i64>,
    max_value: Option<i64>,
    default: Option<RawLevel>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    orders: Vec<OrderEntry>,
}

#[derive(Deserialize, Debug)]
struct ToolArtifact {
    name: String,
    options: Vec<OptionEntry>,
}

impl ToolArtifact {
    fn build(self) -> Result<Tool, SpaceError> {
        let mut tool = Tool::new(self.name);
        let mut edge_count = 0usize;
        for entry in self.options {
            let (option, edges) = entry.build()?;
            edge_count += edges;
            tool.add_option(option)?;
        }
        debug!(
            tool = %tool.name,
            options = tool.len(),
            edges = edge_count,
            "Configuration space built"
        );
        Ok(tool)
    }
}

impl OptionEntry {
    fn build(self) -> Result<(ConfigOption, usize), SpaceError> {
        let mut option = match self.option_type {
            OptionType::Enum => ConfigOption::new_enum(self.name.clone()),
            OptionType::Integer => {
                let (Some(min), Some(max)) = (self.min_value, self.max_value) else {
                    return Err(SpaceError::Artifact(format!(
                        "Integer option '{}' needs minValue and maxValue",
                        self.name
                    )));
                };
                ConfigOption::new_integer(self.name.clone(), min, max)?
            }
        };
        option.tags = self.tags;
        for raw in self.levels {
            option.add_level(raw.into_name());
        }

        let mut orders = Vec::with_capacity(self.orders.len());
        for order in self.orders {
            let left = order.left.into_name();
            let right = order.right.into_name();
            if option.is_integer() {
                // Endpoints of integer orders describe the shape of the range.
                option.add_level(left.clone());
                option.add_level(right.clone());
            }
            orders.push((order.order, left, right));
        }

        let default = self
            .default
            .ok_or_else(|| SpaceError::MissingDefault(self.name.clone()))?;
        option.set_default(&default.into_name())?;

        let edges = orders.len();
        for (order_type, left, right) in orders {
            let left = Level::new(option.name.clone(), left);
            let right = Level::new(option.name.clone(), right);
            match order_type {
                OrderType::MoreSoundThan => option.set_more_sound_than(&left, &right)?,
                OrderType::MorePreciseThan => option.set_more_precise_than(&left, &right)?,
            }
        }
        Ok((option, edges))
    }
}
