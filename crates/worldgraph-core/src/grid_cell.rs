//! Grid geometry: maps locations to integer cell coordinates and back.
//!
//! The world is cut into square cells of a configured angular size. Rows
//! count up from the south pole, columns count east from the antimeridian.
//! Cells on the northern and eastern edges are clamped so that +90° and
//! +180° fall in the last row and column instead of outside the grid.

use crate::geography::{Location, Rectangle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix shared by every cell name and cell file.
pub const CELL_NAME_PREFIX: &str = "cell";

/// Errors from grid construction and cell-name parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("cell size must be within (0, 180] degrees, got {0}")]
    InvalidCellSize(f64),

    #[error("unknown cell name '{0}'")]
    UnknownCellName(String),
}

/// Integer position of one cell in the grid.
///
/// Ordered by latitude index, then longitude index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridCellCoordinate {
    pub latitude_index: u32,
    pub longitude_index: u32,
}

impl GridCellCoordinate {
    pub const fn new(latitude_index: u32, longitude_index: u32) -> Self {
        Self {
            latitude_index,
            longitude_index,
        }
    }

    /// `cell-<latitudeIndex>-<longitudeIndex>`
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Parse a cell name produced by [`GridCellCoordinate::name`].
    ///
    /// Exactly three hyphen-separated tokens are accepted: the literal
    /// `cell` and two natural numbers written without sign or leading zeros.
    pub fn parse(name: &str) -> Result<Self, GridError> {
        let unknown = || GridError::UnknownCellName(name.to_string());
        let tokens: Vec<&str> = name.split('-').collect();
        let [prefix, lat, lon] = tokens.as_slice() else {
            return Err(unknown());
        };
        if *prefix != CELL_NAME_PREFIX {
            return Err(unknown());
        }
        let latitude_index = parse_index(lat).ok_or_else(unknown)?;
        let longitude_index = parse_index(lon).ok_or_else(unknown)?;
        Ok(Self::new(latitude_index, longitude_index))
    }
}

fn parse_index(token: &str) -> Option<u32> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok()
}

impl fmt::Display for GridCellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            CELL_NAME_PREFIX, self.latitude_index, self.longitude_index
        )
    }
}

impl FromStr for GridCellCoordinate {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Immutable grid geometry for one cell size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    cell_size: f64,
    rows: u32,
    columns: u32,
}

impl Grid {
    pub fn new(cell_size_degrees: f64) -> Result<Self, GridError> {
        if !(cell_size_degrees > 0.0 && cell_size_degrees <= 180.0) {
            return Err(GridError::InvalidCellSize(cell_size_degrees));
        }
        let rows = (180.0 / cell_size_degrees).ceil() as u32;
        let columns = (360.0 / cell_size_degrees).ceil() as u32;
        Ok(Self {
            cell_size: cell_size_degrees,
            rows,
            columns,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.rows) * u64::from(self.columns)
    }

    /// True when `coordinate` addresses a cell of this grid.
    pub fn contains(&self, coordinate: GridCellCoordinate) -> bool {
        coordinate.latitude_index < self.rows && coordinate.longitude_index < self.columns
    }

    /// The one cell containing `location`, or `None` outside WGS84.
    pub fn coordinate_for(&self, location: Location) -> Option<GridCellCoordinate> {
        if !location.is_valid() {
            return None;
        }
        let row = ((location.latitude + 90.0) / self.cell_size).floor() as u32;
        let column = ((location.longitude + 180.0) / self.cell_size).floor() as u32;
        Some(GridCellCoordinate::new(
            row.min(self.rows - 1),
            column.min(self.columns - 1),
        ))
    }

    /// Representative location of a cell: the center of its bounds.
    pub fn location_for(&self, coordinate: GridCellCoordinate) -> Location {
        self.bounds(coordinate).center()
    }

    /// Bounding rectangle of a cell, clamped to the world extent.
    pub fn bounds(&self, coordinate: GridCellCoordinate) -> Rectangle {
        let south = -90.0 + f64::from(coordinate.latitude_index) * self.cell_size;
        let west = -180.0 + f64::from(coordinate.longitude_index) * self.cell_size;
        Rectangle {
            min: Location::new(south.min(90.0), west.min(180.0)),
            max: Location::new(
                (south + self.cell_size).min(90.0),
                (west + self.cell_size).min(180.0),
            ),
        }
    }

    /// Dense integer identifier of a cell (row-major).
    pub fn identifier(&self, coordinate: GridCellCoordinate) -> u64 {
        u64::from(coordinate.latitude_index) * u64::from(self.columns)
            + u64::from(coordinate.longitude_index)
    }

    /// Inverse of [`Grid::identifier`].
    pub fn coordinate_of(&self, identifier: u64) -> Option<GridCellCoordinate> {
        if identifier >= self.cell_count() {
            return None;
        }
        let columns = u64::from(self.columns);
        Some(GridCellCoordinate::new(
            (identifier / columns) as u32,
            (identifier % columns) as u32,
        ))
    }

    /// All coordinates whose cells intersect `bounds`, in row-major order.
    pub fn coordinates_intersecting(
        &self,
        bounds: &Rectangle,
    ) -> impl Iterator<Item = GridCellCoordinate> {
        let clamped = Rectangle::from_corners(bounds.min, bounds.max).expanded(0.0);
        let lower = self.coordinate_for(clamped.min);
        let upper = self.coordinate_for(clamped.max);
        let (lower, upper) = match (lower, upper) {
            (Some(lower), Some(upper)) => (lower, upper),
            _ => (GridCellCoordinate::new(1, 1), GridCellCoordinate::new(0, 0)),
        };
        (lower.latitude_index..=upper.latitude_index).flat_map(move |row| {
            (lower.longitude_index..=upper.longitude_index)
                .map(move |column| GridCellCoordinate::new(row, column))
        })
    }

    /// The ring of up to eight cells around `coordinate`.
    ///
    /// Does not wrap across the antimeridian.
    pub fn neighbors(&self, coordinate: GridCellCoordinate) -> Vec<GridCellCoordinate> {
        let mut ring = Vec::with_capacity(8);
        for d_row in -1i64..=1 {
            for d_col in -1i64..=1 {
                if d_row == 0 && d_col == 0 {
                    continue;
                }
                let row = i64::from(coordinate.latitude_index) + d_row;
                let column = i64::from(coordinate.longitude_index) + d_col;
                if row < 0 || column < 0 {
                    continue;
                }
                let candidate = GridCellCoordinate::new(row as u32, column as u32);
                if self.contains(candidate) {
                    ring.push(candidate);
                }
            }
        }
        ring
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            rows: 180,
            columns: 360,
        }
    }
}
