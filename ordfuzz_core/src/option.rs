use crate::level::{Level, LevelRef};
use crate::order::{OrderType, PartialOrder};
use rand::Rng;
use serde::{Deserialize, Serialize};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building or querying a configuration space.
///
/// These are modeling errors: an inconsistent space is useless, so callers
/// surface them instead of recovering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("Level '{level}' is not registered on option '{option}'")]
    UnregisteredLevel { option: String, level: String },
    #[error("Level {level} belongs to option '{level_option}', not '{option}'")]
    ForeignLevel {
        option: String,
        level_option: String,
        level: String,
    },
    #[error("Option '{0}' has no registered levels")]
    NoLevels(String),
    #[error("Value {value} is outside the range [{min}, {max}] of option '{option}'")]
    OutOfRange {
        option: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("Option '{0}' declares no default level")]
    MissingDefault(String),
    #[error("Unknown option '{0}'")]
    UnknownOption(String),
    #[error("Option '{0}' is declared more than once")]
    DuplicateOption(String),
    #[error("Integer option '{option}' has an invalid range [{min}, {max}]")]
    InvalidRange { option: String, min: i64, max: i64 },
    #[error("Configuration space artifact error: {0}")]
    Artifact(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Enum,
    Integer,
}

/// Provenance of an order-graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Explicit,
    Implicit,
}

/// Directed graph over level names, each edge tagged with its provenance.
#[derive(Debug, Clone, Default)]
struct OrderGraph {
    graph: DiGraph<String, EdgeKind>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl OrderGraph {
    fn node_or_insert(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.nodes.get(name) {
            return *index;
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        index
    }

    /// An implicit insertion never downgrades an existing explicit edge.
    fn insert(&mut self, from: &str, to: &str, kind: EdgeKind) {
        let a = self.node_or_insert(from);
        let b = self.node_or_insert(to);
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                if kind == EdgeKind::Explicit {
                    self.graph[edge] = EdgeKind::Explicit;
                }
            }
            None => {
                self.graph.add_edge(a, b, kind);
            }
        }
    }

    fn contains_node(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    fn edge(&self, from: &str, to: &str) -> Option<EdgeKind> {
        let a = *self.nodes.get(from)?;
        let b = *self.nodes.get(to)?;
        self.graph.find_edge(a, b).map(|edge| self.graph[edge])
    }

    /// Reachability, reflexive for known nodes. With `explicit_only` every
    /// hop must be explicit.
    fn reaches(&self, from: &str, to: &str, explicit_only: bool) -> bool {
        let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return false;
        };
        if explicit_only {
            let explicit = EdgeFiltered::from_fn(&self.graph, |e: EdgeReference<'_, EdgeKind>| {
                *e.weight() == EdgeKind::Explicit
            });
            has_path_connecting(&explicit, a, b, None)
        } else {
            has_path_connecting(&self.graph, a, b, None)
        }
    }

    /// Explicit edges, sorted by endpoint names.
    fn explicit_edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .graph
            .edge_references()
            .filter(|e| *e.weight() == EdgeKind::Explicit)
            .map(|e| {
                (
                    self.graph[e.source()].as_str(),
                    self.graph[e.target()].as_str(),
                )
            })
            .collect();
        edges.sort_unstable();
        edges
    }
}

/// A named configuration dimension with its soundness and precision graphs.
///
/// Options are assembled once at start-up and are read-only afterwards.
#[derive(Debug, Clone)]
pub struct ConfigOption {
    pub name: String,
    pub option_type: OptionType,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub tags: Vec<String>,
    default: Option<Level>,
    levels: Vec<Level>,
    soundness: OrderGraph,
    precision: OrderGraph,
}

impl ConfigOption {
    pub fn new_enum(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            option_type: OptionType::Enum,
            min_value: None,
            max_value: None,
            tags: Vec::new(),
            default: None,
            levels: Vec::new(),
            soundness: OrderGraph::default(),
            precision: OrderGraph::default(),
        }
    }

    pub fn new_integer(name: impl Into<String>, min: i64, max: i64) -> Result<Self, SpaceError> {
        let name = name.into();
        if min > max {
            return Err(SpaceError::InvalidRange {
                option: name,
                min,
                max,
            });
        }
        let mut option = Self::new_enum(name);
        option.option_type = OptionType::Integer;
        option.min_value = Some(min);
        option.max_value = Some(max);
        Ok(option)
    }

    pub fn is_integer(&self) -> bool {
        self.option_type == OptionType::Integer
    }

    /// Registers a level (idempotent) and returns it.
    pub fn add_level(&mut self, level_name: impl Into<String>) -> Level {
        let level = Level::new(self.name.clone(), level_name);
        if !self.levels.contains(&level) {
            self.levels.push(level.clone());
        }
        level
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn set_default(&mut self, level_name: &str) -> Result<(), SpaceError> {
        let level = self.get_level(level_name)?;
        if !self.levels.contains(&level) {
            self.levels.push(level.clone());
        }
        self.default = Some(level);
        Ok(())
    }

    pub fn default_level(&self) -> Result<&Level, SpaceError> {
        self.default
            .as_ref()
            .ok_or_else(|| SpaceError::MissingDefault(self.name.clone()))
    }

    /// Resolves a raw value to a level of this option.
    ///
    /// Integer options synthesize levels for in-range literals; anything
    /// else must have been registered.
    pub fn get_level(&self, raw: &str) -> Result<Level, SpaceError> {
        if let Some(level) = self.levels.iter().find(|l| l.level_name == raw) {
            return Ok(level.clone());
        }
        if let Some(level) = self
            .levels
            .iter()
            .find(|l| l.level_name.eq_ignore_ascii_case(raw))
        {
            return Ok(level.clone());
        }
        if self.is_integer() {
            if let Ok(value) = raw.parse::<i64>() {
                let (min, max) = self.range();
                if value < min || value > max {
                    return Err(SpaceError::OutOfRange {
                        option: self.name.clone(),
                        value,
                        min,
                        max,
                    });
                }
                return Ok(Level::new(self.name.clone(), value.to_string()));
            }
            if self.levels.is_empty() {
                return Err(SpaceError::NoLevels(self.name.clone()));
            }
        }
        Err(SpaceError::UnregisteredLevel {
            option: self.name.clone(),
            level: raw.to_string(),
        })
    }

    fn range(&self) -> (i64, i64) {
        (
            self.min_value.unwrap_or(i64::MIN),
            self.max_value.unwrap_or(i64::MAX),
        )
    }

    /// Draws a value uniformly from `[min_value, max_value]`.
    pub fn sample_value<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<i64> {
        match (self.min_value, self.max_value) {
            (Some(min), Some(max)) => Some(rng.random_range(min..=max)),
            _ => None,
        }
    }

    fn ensure_registered(&self, level: &Level) -> Result<(), SpaceError> {
        if level.option_name != self.name {
            return Err(SpaceError::ForeignLevel {
                option: self.name.clone(),
                level_option: level.option_name.clone(),
                level: level.level_name.clone(),
            });
        }
        if !self.levels.contains(level) {
            return Err(SpaceError::UnregisteredLevel {
                option: self.name.clone(),
                level: level.level_name.clone(),
            });
        }
        Ok(())
    }

    /// `a` is at least as sound as `b`; `b` becomes implicitly at least as precise as `a`.
    pub fn set_more_sound_than(&mut self, a: &Level, b: &Level) -> Result<(), SpaceError> {
        self.ensure_registered(a)?;
        self.ensure_registered(b)?;
        self.soundness
            .insert(&a.level_name, &b.level_name, EdgeKind::Explicit);
        self.precision
            .insert(&b.level_name, &a.level_name, EdgeKind::Implicit);
        Ok(())
    }

    /// `a` is at least as precise as `b`; precision differences are assumed
    /// soundness-neutral, so both soundness directions are added implicitly.
    pub fn set_more_precise_than(&mut self, a: &Level, b: &Level) -> Result<(), SpaceError> {
        self.ensure_registered(a)?;
        self.ensure_registered(b)?;
        self.precision
            .insert(&a.level_name, &b.level_name, EdgeKind::Explicit);
        self.soundness
            .insert(&a.level_name, &b.level_name, EdgeKind::Implicit);
        self.soundness
            .insert(&b.level_name, &a.level_name, EdgeKind::Implicit);
        Ok(())
    }

    fn graph(&self, order_type: OrderType) -> &OrderGraph {
        match order_type {
            OrderType::MoreSoundThan => &self.soundness,
            OrderType::MorePreciseThan => &self.precision,
        }
    }

    fn is_node(&self, name: &str) -> bool {
        self.soundness.contains_node(name) || self.precision.contains_node(name)
    }

    fn resolve_one(&self, level: &Level) -> Result<(LevelRef, bool), SpaceError> {
        if level.option_name != self.name {
            return Err(SpaceError::ForeignLevel {
                option: self.name.clone(),
                level_option: level.option_name.clone(),
                level: level.level_name.clone(),
            });
        }
        if self.is_node(&level.level_name) {
            return Ok((LevelRef::parse(&level.level_name), false));
        }
        if self.is_integer() && level.is_numeric() {
            return Ok((LevelRef::NumericSentinel { offset: 0 }, true));
        }
        if self.levels.contains(level) {
            // Registered but never ordered: resolves, and relates to nothing.
            return Ok((LevelRef::Exact(level.level_name.clone()), false));
        }
        Err(SpaceError::UnregisteredLevel {
            option: self.name.clone(),
            level: level.level_name.clone(),
        })
    }

    /// Maps two levels onto graph nodes. Two distinct concrete integers that
    /// would both land on `i` are split, the smaller one becoming `i-1`.
    pub fn resolve(&self, a: &Level, b: &Level) -> Result<(LevelRef, LevelRef), SpaceError> {
        let (mut ra, a_mapped) = self.resolve_one(a)?;
        let (mut rb, b_mapped) = self.resolve_one(b)?;
        if a_mapped && b_mapped {
            if let (Some(va), Some(vb)) = (a.as_int(), b.as_int()) {
                if va < vb {
                    ra = LevelRef::NumericSentinel { offset: 1 };
                } else if vb < va {
                    rb = LevelRef::NumericSentinel { offset: 1 };
                }
            }
        }
        Ok((ra, rb))
    }

    pub fn is_more(
        &self,
        order_type: OrderType,
        a: &Level,
        b: &Level,
        allow_implicit: bool,
    ) -> Result<bool, SpaceError> {
        let (ra, rb) = self.resolve(a, b)?;
        Ok(self
            .graph(order_type)
            .reaches(ra.node(), rb.node(), !allow_implicit))
    }

    pub fn is_more_sound(&self, a: &Level, b: &Level, allow_implicit: bool) -> Result<bool, SpaceError> {
        self.is_more(OrderType::MoreSoundThan, a, b, allow_implicit)
    }

    pub fn is_more_precise(
        &self,
        a: &Level,
        b: &Level,
        allow_implicit: bool,
    ) -> Result<bool, SpaceError> {
        self.is_more(OrderType::MorePreciseThan, a, b, allow_implicit)
    }

    /// Builds the [`PartialOrder`] `left order_type right`, recording whether it
    /// is anchored on explicit edges and whether it needed more than one hop.
    /// Returns `None` when the relation does not hold.
    pub fn order(
        &self,
        order_type: OrderType,
        left: &Level,
        right: &Level,
    ) -> Result<Option<PartialOrder>, SpaceError> {
        let (rl, rr) = self.resolve(left, right)?;
        let graph = self.graph(order_type);
        if !graph.reaches(rl.node(), rr.node(), false) {
            return Ok(None);
        }
        let explicit = graph.reaches(rl.node(), rr.node(), true);
        let transitive = rl != rr && graph.edge(rl.node(), rr.node()).is_none();
        Ok(Some(PartialOrder::new(
            left.clone(),
            order_type,
            right.clone(),
            self.name.clone(),
            explicit,
            transitive,
        )))
    }

    /// Every registered level that takes part in at least one order edge.
    pub fn get_levels_involved_in_partial_orders(&self) -> Vec<Level> {
        self.levels
            .iter()
            .filter(|level| self.is_node(&level.level_name))
            .cloned()
            .collect()
    }

    /// The directly declared orders of this option.
    pub fn declared_orders(&self) -> Vec<PartialOrder> {
        let mut orders = Vec::new();
        for order_type in [OrderType::MoreSoundThan, OrderType::MorePreciseThan] {
            for (from, to) in self.graph(order_type).explicit_edges() {
                orders.push(PartialOrder::new(
                    Level::new(self.name.clone(), from),
                    order_type,
                    Level::new(self.name.clone(), to),
                    self.name.clone(),
                    true,
                    false,
                ));
            }
        }
        orders
    }
}
