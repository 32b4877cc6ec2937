//! Import node model
//!
//! A parsed hierarchy is held in a [`Forest`]: an arena of [`ImportNode`]s with
//! children referenced by [`NodeId`]. Nodes are immutable once parsed except for
//! the server id assigned when they are committed.

use locimport_models::{LocationMode, LocationStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Bed status code for a location nobody occupies (v2-0116 `U`).
pub const DEFAULT_OPERATIONAL_STATUS: &str = "U";

pub const DEFAULT_AVAILABILITY_STATUS: &str = "available";

/// Identifier assigned by the server when a location is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical type of a location, resolved from the type column of the import file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Bed,
    Building,
    Cabinet,
    Corridor,
    House,
    Jurisdiction,
    Level,
    Road,
    #[default]
    Room,
    Site,
    Vehicle,
    Virtual,
    Ward,
    Wing,
}

impl LocationKind {
    pub const ALL: [LocationKind; 14] = [
        LocationKind::Bed,
        LocationKind::Building,
        LocationKind::Cabinet,
        LocationKind::Corridor,
        LocationKind::House,
        LocationKind::Jurisdiction,
        LocationKind::Level,
        LocationKind::Road,
        LocationKind::Room,
        LocationKind::Site,
        LocationKind::Vehicle,
        LocationKind::Virtual,
        LocationKind::Ward,
        LocationKind::Wing,
    ];

    /// Case-insensitive lookup of a type label. `None` for anything outside the vocabulary.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(label))
    }

    pub fn label(self) -> &'static str {
        match self {
            LocationKind::Bed => "bed",
            LocationKind::Building => "building",
            LocationKind::Cabinet => "cabinet",
            LocationKind::Corridor => "corridor",
            LocationKind::House => "house",
            LocationKind::Jurisdiction => "jurisdiction",
            LocationKind::Level => "level",
            LocationKind::Road => "road",
            LocationKind::Room => "room",
            LocationKind::Site => "site",
            LocationKind::Vehicle => "vehicle",
            LocationKind::Virtual => "virtual",
            LocationKind::Ward => "ward",
            LocationKind::Wing => "wing",
        }
    }

    /// Code in the HL7 location-physical-type code system.
    pub fn code(self) -> &'static str {
        match self {
            LocationKind::Bed => "bd",
            LocationKind::Building => "bu",
            LocationKind::Cabinet => "ca",
            LocationKind::Corridor => "co",
            LocationKind::House => "ho",
            LocationKind::Jurisdiction => "jdn",
            LocationKind::Level => "lvl",
            LocationKind::Road => "rd",
            LocationKind::Room => "ro",
            LocationKind::Site => "si",
            LocationKind::Vehicle => "ve",
            LocationKind::Virtual => "vi",
            LocationKind::Ward => "wa",
            LocationKind::Wing => "wi",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            LocationKind::Bed => "Bed",
            LocationKind::Building => "Building",
            LocationKind::Cabinet => "Cabinet",
            LocationKind::Corridor => "Corridor",
            LocationKind::House => "House",
            LocationKind::Jurisdiction => "Jurisdiction",
            LocationKind::Level => "Level",
            LocationKind::Road => "Road",
            LocationKind::Room => "Room",
            LocationKind::Site => "Site",
            LocationKind::Vehicle => "Vehicle",
            LocationKind::Virtual => "Virtual",
            LocationKind::Ward => "Ward",
            LocationKind::Wing => "Wing",
        }
    }

    /// Beds are individual places; every other kind describes a category.
    pub fn mode(self) -> LocationMode {
        match self {
            LocationKind::Bed => LocationMode::Instance,
            _ => LocationMode::Kind,
        }
    }
}

/// Index of a node inside its [`Forest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct ImportNode {
    pub name: String,
    pub kind: LocationKind,
    pub mode: LocationMode,
    pub description: Option<String>,
    pub status: LocationStatus,
    pub operational_status: String,
    pub availability_status: String,
    pub children: Vec<NodeId>,
    pub server_id: Option<ServerId>,
}

impl ImportNode {
    pub fn new(name: impl Into<String>, kind: LocationKind, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            mode: kind.mode(),
            description,
            status: LocationStatus::Active,
            operational_status: DEFAULT_OPERATIONAL_STATUS.to_string(),
            availability_status: DEFAULT_AVAILABILITY_STATUS.to_string(),
            children: Vec::new(),
            server_id: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.server_id.is_some()
    }
}

/// Arena of import nodes with an ordered list of roots.
///
/// Serializes as a nested tree so saved forests are readable and can be edited
/// before being fed back in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<NestedNode>", try_from = "Vec<NestedNode>")]
pub struct Forest {
    nodes: Vec<ImportNode>,
    roots: Vec<NodeId>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &ImportNode {
        &self.nodes[id.0]
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.nodes[id.0].children,
            None => &self.roots,
        }
    }

    pub fn find_child(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        self.children_of(parent)
            .iter()
            .copied()
            .find(|id| self.nodes[id.0].name == name)
    }

    /// Follow a path of names from a root. `None` if any segment is missing.
    pub fn find_path(&self, names: &[&str]) -> Option<NodeId> {
        let mut current = None;
        for name in names {
            current = Some(self.find_child(current, name)?);
        }
        current
    }

    /// Append `node` as the last child of `parent` (or as a new root).
    pub fn insert(&mut self, parent: Option<NodeId>, node: ImportNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn assign_server_id(&mut self, id: NodeId, server_id: ServerId) {
        self.nodes[id.0].server_id = Some(server_id);
    }

    /// Nodes in pre-order with their depth (roots are depth 0).
    pub fn iter_depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            forest: self,
            stack: self.roots.iter().rev().map(|id| (0, *id)).collect(),
        }
    }

    pub fn committed_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_committed()).count()
    }
}

pub struct DepthFirst<'a> {
    forest: &'a Forest,
    stack: Vec<(usize, NodeId)>,
}

impl Iterator for DepthFirst<'_> {
    type Item = (usize, NodeId);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, id) = self.stack.pop()?;
        let children = &self.forest.node(id).children;
        self.stack
            .extend(children.iter().rev().map(|child| (depth + 1, *child)));
        Some((depth, id))
    }
}

/// Serialized form of a node and its subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedNode {
    pub name: String,
    pub kind: LocationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<LocationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: LocationStatus,
    #[serde(default = "default_operational_status")]
    pub operational_status: String,
    #[serde(default = "default_availability_status")]
    pub availability_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NestedNode>,
}

fn default_operational_status() -> String {
    DEFAULT_OPERATIONAL_STATUS.to_string()
}

fn default_availability_status() -> String {
    DEFAULT_AVAILABILITY_STATUS.to_string()
}

impl From<Forest> for Vec<NestedNode> {
    fn from(forest: Forest) -> Self {
        fn nest(forest: &Forest, id: NodeId) -> NestedNode {
            let node = forest.node(id);
            NestedNode {
                name: node.name.clone(),
                kind: node.kind,
                mode: Some(node.mode),
                description: node.description.clone(),
                status: node.status,
                operational_status: node.operational_status.clone(),
                availability_status: node.availability_status.clone(),
                server_id: node.server_id.clone(),
                children: node.children.iter().map(|c| nest(forest, *c)).collect(),
            }
        }

        forest.roots.iter().map(|id| nest(&forest, *id)).collect()
    }
}

impl TryFrom<Vec<NestedNode>> for Forest {
    type Error = String;

    fn try_from(roots: Vec<NestedNode>) -> Result<Self, Self::Error> {
        fn add(
            forest: &mut Forest,
            parent: Option<NodeId>,
            nested: Vec<NestedNode>,
        ) -> Result<(), String> {
            let mut seen = HashSet::new();
            for n in nested {
                if !seen.insert(n.name.clone()) {
                    return Err(format!("duplicate sibling location name '{}'", n.name));
                }
                let id = forest.insert(
                    parent,
                    ImportNode {
                        mode: n.mode.unwrap_or_else(|| n.kind.mode()),
                        name: n.name,
                        kind: n.kind,
                        description: n.description,
                        status: n.status,
                        operational_status: n.operational_status,
                        availability_status: n.availability_status,
                        children: Vec::new(),
                        server_id: n.server_id,
                    },
                );
                add(forest, Some(id), n.children)?;
            }
            Ok(())
        }

        let mut forest = Forest::new();
        add(&mut forest, None, roots)?;
        Ok(forest)
    }
}
