//! Road-network graph for the geography of a single cell.
//!
//! `CellGraph` is the ordinary, unpartitioned graph: vertices are OSM nodes,
//! edges are directed road segments, relations are turn restrictions and
//! places are labelled settlements. It is built once during extraction,
//! persisted by [`crate::store::CellStore`] and loaded back on demand.

use crate::geography::{Distance, Location, Rectangle};
use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Constants for memory estimation
const VERTEX_BASE_SIZE: usize = 48; // Vertex + index map entry
const EDGE_BASE_SIZE: usize = 96; // Edge + adjacency links
const RELATION_BASE_SIZE: usize = 64;
const PLACE_BASE_SIZE: usize = 96; // Place + typical name
const GRAPH_OVERHEAD: f64 = 1.4; // petgraph internal overhead factor

type VertexPoint = GeomWithData<[f64; 2], NodeIndex>;

// ============================================================================
// Elements
// ============================================================================

/// A road-network node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// OSM node identifier
    pub id: i64,
    pub location: Location,
}

/// A directed road segment between two consecutive way nodes.
///
/// An edge is identified within its cell by `(way_id, segment, reverse)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// OSM way the segment belongs to
    pub way_id: i64,
    /// Position of the segment along the way, starting at 0
    pub segment: u32,
    /// True when the edge runs against the way's node order
    pub reverse: bool,
    pub length_meters: f64,
    pub road_name: Option<String>,
    /// Historical-traffic table referenced by this segment
    pub tmc_table: Option<u32>,
}

/// Turn-restriction kinds, following the OSM `restriction` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    NoLeftTurn,
    NoRightTurn,
    NoStraightOn,
    NoUTurn,
    NoEntry,
    NoExit,
    OnlyLeftTurn,
    OnlyRightTurn,
    OnlyStraightOn,
    OnlyUTurn,
}

impl RestrictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLeftTurn => "no_left_turn",
            Self::NoRightTurn => "no_right_turn",
            Self::NoStraightOn => "no_straight_on",
            Self::NoUTurn => "no_u_turn",
            Self::NoEntry => "no_entry",
            Self::NoExit => "no_exit",
            Self::OnlyLeftTurn => "only_left_turn",
            Self::OnlyRightTurn => "only_right_turn",
            Self::OnlyStraightOn => "only_straight_on",
            Self::OnlyUTurn => "only_u_turn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "no_left_turn" => Self::NoLeftTurn,
            "no_right_turn" => Self::NoRightTurn,
            "no_straight_on" => Self::NoStraightOn,
            "no_u_turn" => Self::NoUTurn,
            "no_entry" => Self::NoEntry,
            "no_exit" => Self::NoExit,
            "only_left_turn" => Self::OnlyLeftTurn,
            "only_right_turn" => Self::OnlyRightTurn,
            "only_straight_on" => Self::OnlyStraightOn,
            "only_u_turn" => Self::OnlyUTurn,
            _ => return None,
        })
    }

    /// True for `only_*` restrictions.
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            Self::OnlyLeftTurn | Self::OnlyRightTurn | Self::OnlyStraightOn | Self::OnlyUTurn
        )
    }
}

/// A turn restriction between two ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// OSM relation identifier
    pub id: i64,
    pub kind: RestrictionKind,
    pub from_way: i64,
    /// Node where the manoeuvre happens; some restrictions only name ways
    pub via_node: Option<i64>,
    pub to_way: i64,
}

/// A labelled settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub location: Location,
    pub population: Option<u64>,
    /// OSM `place` value (city, town, village, ...)
    pub place_type: String,
}

// ============================================================================
// CellGraph
// ============================================================================

/// Graph of one cell, backed by `petgraph::StableGraph`.
///
/// Element indices stay valid for the lifetime of a loaded graph, which is
/// what the cross-cell wrappers in [`crate::world::cell_list`] rely on.
#[derive(Default)]
pub struct CellGraph {
    graph: StableGraph<Vertex, Edge, petgraph::Directed>,
    vertex_index: HashMap<i64, NodeIndex>,
    relations: Vec<Relation>,
    relations_by_way: HashMap<i64, Vec<usize>>,
    places: Vec<Place>,
    /// Built on the first nearest-vertex query, released by `unload()`
    spatial: RwLock<Option<RTree<VertexPoint>>>,
}

impl std::fmt::Debug for CellGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellGraph")
            .field("vertices", &self.vertex_count())
            .field("edges", &self.edge_count())
            .field("relations", &self.relation_count())
            .field("places", &self.place_count())
            .finish()
    }
}

impl CellGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Add a vertex, returning the existing index if the id is already present.
    pub fn add_vertex(&mut self, vertex: Vertex) -> NodeIndex {
        if let Some(&existing) = self.vertex_index.get(&vertex.id) {
            return existing;
        }
        let id = vertex.id;
        let idx = self.graph.add_node(vertex);
        self.vertex_index.insert(id, idx);
        *self.spatial.get_mut() = None;
        idx
    }

    /// Add an edge between two known vertex ids.
    ///
    /// Returns `None` when either endpoint has not been added.
    pub fn add_edge(&mut self, from: i64, to: i64, edge: Edge) -> Option<EdgeIndex> {
        let source = *self.vertex_index.get(&from)?;
        let target = *self.vertex_index.get(&to)?;
        Some(self.graph.add_edge(source, target, edge))
    }

    pub fn add_relation(&mut self, relation: Relation) {
        let position = self.relations.len();
        self.relations_by_way
            .entry(relation.from_way)
            .or_default()
            .push(position);
        self.relations.push(relation);
    }

    pub fn add_place(&mut self, place: Place) {
        self.places.push(place);
    }

    // ------------------------------------------------------------------------
    // Counts
    // ------------------------------------------------------------------------

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0 && self.relations.is_empty() && self.places.is_empty()
    }

    // ------------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------------

    pub fn vertices(&self) -> impl Iterator<Item = (NodeIndex, &Vertex)> + '_ {
        self.graph
            .node_indices()
            .filter_map(move |idx| Some((idx, self.graph.node_weight(idx)?)))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeIndex, &Edge)> + '_ {
        self.graph
            .edge_indices()
            .filter_map(move |idx| Some((idx, self.graph.edge_weight(idx)?)))
    }

    pub fn relations(&self) -> impl Iterator<Item = (usize, &Relation)> + '_ {
        self.relations.iter().enumerate()
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn vertex(&self, idx: NodeIndex) -> Option<&Vertex> {
        self.graph.node_weight(idx)
    }

    pub fn vertex_index(&self, id: i64) -> Option<NodeIndex> {
        self.vertex_index.get(&id).copied()
    }

    pub fn vertex_by_id(&self, id: i64) -> Option<&Vertex> {
        self.vertex_index(id).and_then(|idx| self.graph.node_weight(idx))
    }

    pub fn edge(&self, idx: EdgeIndex) -> Option<&Edge> {
        self.graph.edge_weight(idx)
    }

    /// `(from, to)` vertices of an edge.
    pub fn edge_endpoints(&self, idx: EdgeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.graph.edge_endpoints(idx)
    }

    pub fn relation(&self, position: usize) -> Option<&Relation> {
        self.relations.get(position)
    }

    /// Edges leaving a vertex.
    pub fn out_edges(&self, idx: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge_ref| edge_ref.id())
    }

    /// Edges arriving at a vertex.
    pub fn in_edges(&self, idx: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge_ref| edge_ref.id())
    }

    /// Restrictions whose `from` way is `way_id`.
    pub fn relations_from_way(&self, way_id: i64) -> impl Iterator<Item = usize> + '_ {
        self.relations_by_way
            .get(&way_id)
            .into_iter()
            .flat_map(|positions| positions.iter().copied())
    }

    /// Location of a relation's via node.
    ///
    /// [`Location::ORIGIN`] when the relation has no via node, `None` when
    /// the via node is not part of this graph.
    pub fn via_location(&self, relation: &Relation) -> Option<Location> {
        match relation.via_node {
            None => Some(Location::ORIGIN),
            Some(id) => self.vertex_by_id(id).map(|vertex| vertex.location),
        }
    }

    /// Distinct OSM way ids referenced by edges.
    pub fn way_ids(&self) -> BTreeSet<i64> {
        self.graph.edge_weights().map(|edge| edge.way_id).collect()
    }

    /// Distinct TMC tables referenced by edges.
    pub fn tmc_tables(&self) -> BTreeSet<u32> {
        self.graph
            .edge_weights()
            .filter_map(|edge| edge.tmc_table)
            .collect()
    }

    /// Bounding rectangle of all vertices, if any.
    pub fn bounds(&self) -> Option<Rectangle> {
        let mut vertices = self.graph.node_weights();
        let first = vertices.next()?.location;
        Some(vertices.fold(Rectangle::from_corners(first, first), |rect, v| {
            Rectangle::from_corners(
                Location::new(
                    rect.min.latitude.min(v.location.latitude),
                    rect.min.longitude.min(v.location.longitude),
                ),
                Location::new(
                    rect.max.latitude.max(v.location.latitude),
                    rect.max.longitude.max(v.location.longitude),
                ),
            )
        }))
    }

    // ------------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------------

    /// Closest vertex to `location`, if one lies within `within`.
    pub fn nearest_vertex(
        &self,
        location: Location,
        within: Distance,
    ) -> Option<(NodeIndex, Distance)> {
        self.ensure_spatial_index();
        let spatial = self.spatial.read();
        let tree = spatial.as_ref()?;
        let window = Rectangle::around(location, within).as_envelope();
        tree.locate_in_envelope(&window)
            .filter_map(|point| {
                let vertex = self.graph.node_weight(point.data)?;
                Some((point.data, location.distance_to(&vertex.location)))
            })
            .filter(|(_, distance)| *distance <= within)
            .min_by(|a, b| a.1.as_meters().total_cmp(&b.1.as_meters()))
    }

    fn ensure_spatial_index(&self) {
        if self.spatial.read().is_some() {
            return;
        }
        let mut spatial = self.spatial.write();
        if spatial.is_none() {
            let points = self
                .vertices()
                .map(|(idx, vertex)| GeomWithData::new(vertex.location.as_point(), idx))
                .collect();
            *spatial = Some(RTree::bulk_load(points));
        }
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    /// Approximate heap footprint in bytes.
    pub fn estimated_memory_size(&self) -> usize {
        let names: usize = self
            .places
            .iter()
            .map(|place| place.name.len() + place.place_type.len())
            .sum::<usize>()
            + self
                .graph
                .edge_weights()
                .filter_map(|edge| edge.road_name.as_ref().map(String::len))
                .sum::<usize>();
        let base = self.vertex_count() * VERTEX_BASE_SIZE
            + self.edge_count() * EDGE_BASE_SIZE
            + self.relation_count() * RELATION_BASE_SIZE
            + self.place_count() * PLACE_BASE_SIZE
            + names;
        (base as f64 * GRAPH_OVERHEAD) as usize
    }

    /// Release derived structures held alongside the graph.
    pub fn unload(&self) {
        self.spatial.write().take();
    }

    /// True when the derived spatial index is currently built.
    pub fn has_spatial_index(&self) -> bool {
        self.spatial.read().is_some()
    }
}

impl std::ops::Index<NodeIndex> for CellGraph {
    type Output = Vertex;

    /// Panics if `idx` does not belong to this graph, like petgraph indexing.
    fn index(&self, idx: NodeIndex) -> &Vertex {
        &self.graph[idx]
    }
}

impl std::ops::Index<EdgeIndex> for CellGraph {
    type Output = Edge;

    fn index(&self, idx: EdgeIndex) -> &Edge {
        &self.graph[idx]
    }
}
