//! Property-based tests for grid geometry.

use proptest::prelude::*;
use worldgraph_core::{Grid, GridCellCoordinate, Location};

/// Cell sizes that divide the world evenly
fn grid_strategy() -> impl Strategy<Value = Grid> {
    prop::sample::select(vec![0.25, 0.5, 1.0, 2.0, 4.0])
        .prop_map(|size| Grid::new(size).expect("valid cell size"))
}

fn location_strategy() -> impl Strategy<Value = Location> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| Location::new(lat, lon))
}

fn cell_strategy() -> impl Strategy<Value = (Grid, GridCellCoordinate)> {
    grid_strategy().prop_flat_map(|grid| {
        (0..grid.rows(), 0..grid.columns())
            .prop_map(move |(row, column)| (grid, GridCellCoordinate::new(row, column)))
    })
}

proptest! {
    /// Every valid location falls in exactly the cell whose bounds hold it.
    #[test]
    fn location_lies_in_its_cell(grid in grid_strategy(), location in location_strategy()) {
        let coordinate = grid.coordinate_for(location);
        prop_assert!(coordinate.is_some());
        let coordinate = coordinate.unwrap();
        prop_assert!(grid.contains(coordinate));
        prop_assert!(grid.bounds(coordinate).expanded(1e-9).contains(&location));
    }

    /// Name, identifier and center all lead back to the same cell.
    #[test]
    fn cell_addressing_is_consistent((grid, coordinate) in cell_strategy()) {
        prop_assert_eq!(GridCellCoordinate::parse(&coordinate.name()), Ok(coordinate));
        prop_assert_eq!(grid.coordinate_of(grid.identifier(coordinate)), Some(coordinate));
        prop_assert!(grid.identifier(coordinate) < grid.cell_count());
        prop_assert_eq!(grid.coordinate_for(grid.location_for(coordinate)), Some(coordinate));
    }

    /// Neighbourhood is symmetric and never includes the cell itself.
    #[test]
    fn neighbors_are_symmetric((grid, coordinate) in cell_strategy()) {
        let ring = grid.neighbors(coordinate);
        prop_assert!(ring.len() <= 8);
        prop_assert!(!ring.contains(&coordinate));
        for neighbor in ring {
            prop_assert!(grid.neighbors(neighbor).contains(&coordinate));
        }
    }

    /// Locations outside WGS84 have no cell.
    #[test]
    fn out_of_range_has_no_cell(grid in grid_strategy(), excess in 0.001f64..1000.0) {
        prop_assert_eq!(grid.coordinate_for(Location::new(90.0 + excess, 0.0)), None);
        prop_assert_eq!(grid.coordinate_for(Location::new(0.0, -180.0 - excess)), None);
    }
}
