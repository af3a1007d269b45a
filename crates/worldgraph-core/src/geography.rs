//! Geographic primitives: locations, rectangles and great-circle distance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// The (0, 0) location, also used for "no location".
    pub const ORIGIN: Location = Location {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_origin(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// True when the position lies inside the WGS84 extent.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Haversine distance to `other`.
    pub fn distance_to(&self, other: &Location) -> Distance {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let lat_diff_sin = ((lat1 - lat2) / 2.0).sin();
        let lon_diff_sin =
            ((self.longitude.to_radians() - other.longitude.to_radians()) / 2.0).sin();
        let h = lat_diff_sin * lat_diff_sin + lat1.cos() * lat2.cos() * lon_diff_sin * lon_diff_sin;
        Distance::meters(2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin())
    }

    /// `[longitude, latitude]`, the point layout used by the spatial indexes.
    pub(crate) fn as_point(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A length along the Earth's surface.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Distance(f64);

impl Distance {
    pub const ZERO: Distance = Distance(0.0);

    pub fn meters(meters: f64) -> Self {
        Self(meters)
    }

    pub fn kilometers(km: f64) -> Self {
        Self(km * 1000.0)
    }

    pub fn as_meters(&self) -> f64 {
        self.0
    }

    /// Latitude span covered by this distance, used to size search windows.
    pub(crate) fn as_latitude_degrees(&self) -> f64 {
        (self.0 / EARTH_RADIUS_METERS).to_degrees()
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000.0 {
            write!(f, "{:.3} km", self.0 / 1000.0)
        } else {
            write!(f, "{:.1} m", self.0)
        }
    }
}

/// An axis-aligned latitude/longitude rectangle.
///
/// Bounds are inclusive on every side; rectangles never wrap the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub min: Location,
    pub max: Location,
}

impl Rectangle {
    /// The whole WGS84 extent.
    pub const WORLD: Rectangle = Rectangle {
        min: Location::new(-90.0, -180.0),
        max: Location::new(90.0, 180.0),
    };

    /// Build a rectangle from two opposite corners in any order.
    pub fn from_corners(a: Location, b: Location) -> Self {
        Self {
            min: Location::new(a.latitude.min(b.latitude), a.longitude.min(b.longitude)),
            max: Location::new(a.latitude.max(b.latitude), a.longitude.max(b.longitude)),
        }
    }

    pub fn contains(&self, location: &Location) -> bool {
        location.latitude >= self.min.latitude
            && location.latitude <= self.max.latitude
            && location.longitude >= self.min.longitude
            && location.longitude <= self.max.longitude
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.min.latitude <= other.max.latitude
            && self.max.latitude >= other.min.latitude
            && self.min.longitude <= other.max.longitude
            && self.max.longitude >= other.min.longitude
    }

    /// Grow every side by `degrees`, clamped to the world extent.
    pub fn expanded(&self, degrees: f64) -> Rectangle {
        Rectangle {
            min: Location::new(
                (self.min.latitude - degrees).max(-90.0),
                (self.min.longitude - degrees).max(-180.0),
            ),
            max: Location::new(
                (self.max.latitude + degrees).min(90.0),
                (self.max.longitude + degrees).min(180.0),
            ),
        }
    }

    /// Smallest rectangle covering `location` at `distance` in every direction.
    pub fn around(location: Location, distance: Distance) -> Rectangle {
        let lat_span = distance.as_latitude_degrees();
        let cos_lat = location.latitude.to_radians().cos().abs().max(1e-6);
        let lon_span = (lat_span / cos_lat).min(360.0);
        Rectangle::from_corners(
            Location::new(location.latitude - lat_span, location.longitude - lon_span),
            Location::new(location.latitude + lat_span, location.longitude + lon_span),
        )
        .expanded(0.0)
    }

    pub fn center(&self) -> Location {
        Location::new(
            (self.min.latitude + self.max.latitude) / 2.0,
            (self.min.longitude + self.max.longitude) / 2.0,
        )
    }

    pub(crate) fn as_envelope(&self) -> rstar::AABB<[f64; 2]> {
        rstar::AABB::from_corners(self.min.as_point(), self.max.as_point())
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.min, self.max)
    }
}
