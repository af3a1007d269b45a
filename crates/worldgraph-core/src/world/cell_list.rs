//! World Cell List: an ordered view over several cells.
//!
//! Element sequences are built by draining each cell in order. Every element
//! is wrapped together with its cell and that cell's graph, so navigation
//! from it stays within the cell it came from.
//!
//! Aggregates load every cell in the list; narrow the list with
//! [`WorldCellList::within`] before calling them.

use super::cell::WorldCell;
use super::repository::{DataKind, Repository};
use crate::geography::{Distance, Location, Rectangle};
use crate::graph::{CellGraph, Edge, Relation, Vertex};
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use std::sync::Arc;
use tracing::warn;

// ============================================================================
// Cell-scoped elements
// ============================================================================

/// A directed edge of one cell's graph
#[derive(Debug, Clone)]
pub struct WorldEdge {
    cell: Arc<WorldCell>,
    graph: Arc<CellGraph>,
    index: EdgeIndex,
    source: NodeIndex,
    target: NodeIndex,
}

impl WorldEdge {
    pub fn cell(&self) -> &Arc<WorldCell> {
        &self.cell
    }

    pub fn index(&self) -> EdgeIndex {
        self.index
    }

    pub fn edge(&self) -> &Edge {
        &self.graph[self.index]
    }

    pub fn way_id(&self) -> i64 {
        self.edge().way_id
    }

    /// Position of the segment along its way
    pub fn segment(&self) -> u32 {
        self.edge().segment
    }

    pub fn is_reverse(&self) -> bool {
        self.edge().reverse
    }

    pub fn from(&self) -> WorldVertex {
        WorldVertex::new(&self.cell, &self.graph, self.source)
    }

    pub fn to(&self) -> WorldVertex {
        WorldVertex::new(&self.cell, &self.graph, self.target)
    }

    /// Turn restrictions starting on this edge's way, in the same cell
    pub fn relations(&self) -> Vec<WorldRelation> {
        self.graph
            .relations_from_way(self.way_id())
            .filter_map(|pos| WorldRelation::new(&self.cell, &self.graph, pos))
            .collect()
    }

    fn new(cell: &Arc<WorldCell>, graph: &Arc<CellGraph>, index: EdgeIndex) -> Option<Self> {
        let (source, target) = graph.edge_endpoints(index)?;
        Some(Self {
            cell: Arc::clone(cell),
            graph: Arc::clone(graph),
            index,
            source,
            target,
        })
    }
}

/// A vertex of one cell's graph
#[derive(Debug, Clone)]
pub struct WorldVertex {
    cell: Arc<WorldCell>,
    graph: Arc<CellGraph>,
    index: NodeIndex,
}

impl WorldVertex {
    fn new(cell: &Arc<WorldCell>, graph: &Arc<CellGraph>, index: NodeIndex) -> Self {
        Self {
            cell: Arc::clone(cell),
            graph: Arc::clone(graph),
            index,
        }
    }

    pub fn cell(&self) -> &Arc<WorldCell> {
        &self.cell
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn vertex(&self) -> &Vertex {
        &self.graph[self.index]
    }

    pub fn id(&self) -> i64 {
        self.vertex().id
    }

    pub fn location(&self) -> Location {
        self.vertex().location
    }

    /// True when the vertex lies in its cell rather than in the overlap
    /// copied from a neighbour
    pub fn is_owned(&self) -> bool {
        self.cell.contains(self.location())
    }

    pub fn out_edges(&self) -> Vec<WorldEdge> {
        self.graph
            .out_edges(self.index)
            .filter_map(|edge| WorldEdge::new(&self.cell, &self.graph, edge))
            .collect()
    }

    pub fn in_edges(&self) -> Vec<WorldEdge> {
        self.graph
            .in_edges(self.index)
            .filter_map(|edge| WorldEdge::new(&self.cell, &self.graph, edge))
            .collect()
    }
}

/// A turn restriction of one cell's graph
#[derive(Debug, Clone)]
pub struct WorldRelation {
    cell: Arc<WorldCell>,
    graph: Arc<CellGraph>,
    position: usize,
    relation: Relation,
}

impl WorldRelation {
    fn new(cell: &Arc<WorldCell>, graph: &Arc<CellGraph>, position: usize) -> Option<Self> {
        let relation = graph.relation(position)?.clone();
        Some(Self {
            cell: Arc::clone(cell),
            graph: Arc::clone(graph),
            position,
            relation,
        })
    }

    pub fn cell(&self) -> &Arc<WorldCell> {
        &self.cell
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn id(&self) -> i64 {
        self.relation.id
    }

    /// Location of the via node: the origin when there is none, `None`
    /// when it is not part of this cell's graph
    pub fn via(&self) -> Option<Location> {
        self.graph.via_location(&self.relation)
    }

    /// Edges of the `from` way in this cell
    pub fn from(&self) -> Vec<WorldEdge> {
        self.way_edges(self.relation.from_way)
    }

    /// Edges of the `to` way in this cell
    pub fn to(&self) -> Vec<WorldEdge> {
        self.way_edges(self.relation.to_way)
    }

    fn way_edges(&self, way_id: i64) -> Vec<WorldEdge> {
        self.graph
            .edges()
            .filter(|(_, edge)| edge.way_id == way_id)
            .filter_map(|(idx, _)| WorldEdge::new(&self.cell, &self.graph, idx))
            .collect()
    }

    /// True when this occurrence is the one reported for the relation:
    /// the via node lies in this cell, or there is no via node.
    ///
    /// A copy whose via node is missing from this cell's graph is never
    /// owned; the cell holding the node reports it.
    pub fn is_owned(&self) -> bool {
        match self.via() {
            Some(via) => via.is_origin() || self.cell.contains(via),
            None => false,
        }
    }

    /// Position of the relation in its cell graph
    pub fn position(&self) -> usize {
        self.position
    }
}

// ============================================================================
// WorldCellList
// ============================================================================

/// Ordered collection of cells
#[derive(Debug, Clone, Default)]
pub struct WorldCellList {
    cells: Vec<Arc<WorldCell>>,
}

impl WorldCellList {
    pub fn new(cells: Vec<Arc<WorldCell>>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Arc<WorldCell>] {
        &self.cells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<WorldCell>> {
        self.cells.iter()
    }

    pub fn push(&mut self, cell: Arc<WorldCell>) {
        self.cells.push(cell);
    }

    pub fn contains(&self, cell: &WorldCell) -> bool {
        self.cells.iter().any(|c| c.as_ref() == cell)
    }

    /// Cells whose bounds intersect `bounds`
    pub fn within(&self, bounds: &Rectangle) -> WorldCellList {
        self.cells
            .iter()
            .filter(|cell| cell.bounds().intersects(bounds))
            .cloned()
            .collect()
    }

    // =========================================================================
    // Sequences
    // =========================================================================

    /// Drain each loadable cell in order; cells that fail to load are skipped
    fn chained<'a, T: 'a>(
        &'a self,
        local: impl Fn(&Arc<WorldCell>, &Arc<CellGraph>) -> Vec<T> + 'a,
    ) -> impl Iterator<Item = T> + 'a {
        self.cells
            .iter()
            .flat_map(move |cell| match cell.cell_graph() {
                Ok(graph) => local(cell, &graph),
                Err(e) => {
                    warn!("Skipping {}: {}", cell, e);
                    Vec::new()
                }
            })
    }

    pub fn edges(&self) -> impl Iterator<Item = WorldEdge> + '_ {
        self.chained(|cell, graph| {
            graph
                .edges()
                .filter_map(|(idx, _)| WorldEdge::new(cell, graph, idx))
                .collect::<Vec<WorldEdge>>()
        })
    }

    /// Every vertex of every cell, including the boundary overlap
    pub fn vertices(&self) -> impl Iterator<Item = WorldVertex> + '_ {
        self.chained(|cell, graph| {
            graph
                .vertices()
                .map(|(idx, _)| WorldVertex::new(cell, graph, idx))
                .collect::<Vec<WorldVertex>>()
        })
    }

    /// Vertices reported once each, by the cell they lie in
    pub fn owned_vertices(&self) -> impl Iterator<Item = WorldVertex> + '_ {
        self.vertices().filter(WorldVertex::is_owned)
    }

    /// Turn restrictions, each reported by the cell holding its via node
    pub fn relations(&self) -> impl Iterator<Item = WorldRelation> + '_ {
        self.chained(|cell, graph| {
            graph
                .relations()
                .filter_map(|(pos, _)| WorldRelation::new(cell, graph, pos))
                .filter(WorldRelation::is_owned)
                .collect::<Vec<WorldRelation>>()
        })
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn loaded_graphs(&self) -> impl Iterator<Item = (&Arc<WorldCell>, Arc<CellGraph>)> + '_ {
        self.cells.iter().filter_map(|cell| match cell.cell_graph() {
            Ok(graph) => Some((cell, graph)),
            Err(e) => {
                warn!("Skipping {}: {}", cell, e);
                None
            }
        })
    }

    pub fn edge_count(&self) -> usize {
        self.loaded_graphs().map(|(_, graph)| graph.edge_count()).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.loaded_graphs()
            .map(|(_, graph)| graph.vertex_count())
            .sum()
    }

    /// Number of relations after boundary de-duplication
    pub fn relation_count(&self) -> usize {
        self.relations().count()
    }

    /// Cell with the largest graph file in `repository`
    pub fn biggest(&self, repository: &Repository) -> Option<Arc<WorldCell>> {
        self.cells
            .iter()
            .filter_map(|cell| Some((cell, cell.disk_size(repository, DataKind::Graph)?)))
            .max_by_key(|(_, size)| *size)
            .map(|(cell, _)| Arc::clone(cell))
    }

    /// Cell with the smallest graph file in `repository`
    pub fn smallest(&self, repository: &Repository) -> Option<Arc<WorldCell>> {
        self.cells
            .iter()
            .filter_map(|cell| Some((cell, cell.disk_size(repository, DataKind::Graph)?)))
            .min_by_key(|(_, size)| *size)
            .map(|(cell, _)| Arc::clone(cell))
    }

    /// Bytes of graph files in `repository` over the list
    pub fn total_file_size(&self, repository: &Repository) -> u64 {
        self.cells
            .iter()
            .filter_map(|cell| cell.disk_size(repository, DataKind::Graph))
            .sum()
    }

    /// Sum of the known in-memory size estimates
    pub fn estimated_memory_size(&self) -> u64 {
        self.cells
            .iter()
            .filter_map(|cell| cell.estimated_memory_size())
            .sum()
    }

    /// Closest vertex to `location` within `within`, over all cells
    pub fn nearest_vertex(
        &self,
        location: Location,
        within: Distance,
    ) -> Option<(WorldVertex, Distance)> {
        self.loaded_graphs()
            .filter_map(|(cell, graph)| {
                let (idx, distance) = graph.nearest_vertex(location, within)?;
                Some((WorldVertex::new(cell, &graph, idx), distance))
            })
            .min_by(|a, b| a.1.as_meters().total_cmp(&b.1.as_meters()))
    }

    /// Release every cell's graph
    pub fn unload_all(&self) {
        for cell in &self.cells {
            cell.unload();
        }
    }
}

impl FromIterator<Arc<WorldCell>> for WorldCellList {
    fn from_iter<I: IntoIterator<Item = Arc<WorldCell>>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl Extend<Arc<WorldCell>> for WorldCellList {
    fn extend<I: IntoIterator<Item = Arc<WorldCell>>>(&mut self, iter: I) {
        self.cells.extend(iter);
    }
}

impl IntoIterator for WorldCellList {
    type Item = Arc<WorldCell>;
    type IntoIter = std::vec::IntoIter<Arc<WorldCell>>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_iter()
    }
}

impl<'a> IntoIterator for &'a WorldCellList {
    type Item = &'a Arc<WorldCell>;
    type IntoIter = std::slice::Iter<'a, Arc<WorldCell>>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.iter()
    }
}
