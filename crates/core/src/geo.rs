//! Geographic primitives: affine pixel-to-geo transform and AOI polygon
//! containment. Coordinates are (lon, lat) in the run's CRS, f64 throughout
//! so exported precision stays well past six decimal places.

use serde::{Deserialize, Serialize};

/// Row-major affine transform, same coefficient layout rasterio uses:
/// lon = c + a*col + b*row, lat = f + d*col + e*row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// Transform mapping a (width x height) pixel grid onto a geographic
    /// bounding box, north-up (row 0 at max_lat).
    pub fn from_bounds(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        width: usize,
        height: usize,
    ) -> Self {
        let px_w = (max_lon - min_lon) / width as f64;
        let px_h = (max_lat - min_lat) / height as f64;
        Self {
            a: px_w,
            b: 0.0,
            c: min_lon,
            d: 0.0,
            e: -px_h,
            f: max_lat,
        }
    }

    /// Geographic coordinates of a (possibly fractional) pixel center.
    pub fn xy(&self, row: f64, col: f64) -> (f64, f64) {
        let lon = self.c + self.a * (col + 0.5) + self.b * (row + 0.5);
        let lat = self.f + self.d * (col + 0.5) + self.e * (row + 0.5);
        (lon, lat)
    }

    /// Signed area of one pixel in transform units squared.
    pub fn pixel_area(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }
}

/// Closed polygon used as the area-of-interest filter. Vertices are
/// (lon, lat); the ring does not need an explicit closing vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiPolygon {
    pub ring: Vec<(f64, f64)>,
}

impl AoiPolygon {
    pub fn new(ring: Vec<(f64, f64)>) -> Self {
        Self { ring }
    }

    /// Axis-aligned rectangle AOI.
    pub fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self::new(vec![
            (min_lon, min_lat),
            (max_lon, min_lat),
            (max_lon, max_lat),
            (min_lon, max_lat),
        ])
    }

    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let mut min_lon = f64::INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        for &(lon, lat) in &self.ring {
            min_lon = min_lon.min(lon);
            min_lat = min_lat.min(lat);
            max_lon = max_lon.max(lon);
            max_lat = max_lat.max(lat);
        }
        (min_lon, min_lat, max_lon, max_lat)
    }

    /// Ray-casting point-in-polygon test. Points exactly on an edge count
    /// as inside, which keeps centroid filtering stable at AOI borders.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let n = self.ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.ring[i];
            let (xj, yj) = self.ring[j];
            if (yi > lat) != (yj > lat) {
                let x_cross = (xj - xi) * (lat - yi) / (yj - yi) + xi;
                if (lon - x_cross).abs() < 1e-12 {
                    return true;
                }
                if lon < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}
