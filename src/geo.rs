use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// MapLibre-style vector tiles are 512px at zoom 0.
pub const TILE_SIZE: f64 = 512.0;
pub const MAX_ZOOM: f64 = 18.0;
pub const MIN_ZOOM: f64 = 0.0;
/// Latitude limit of the Web Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn distance_squared(&self, other: &ScreenPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Axis-aligned extent of a set of positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: LngLat,
    pub north_east: LngLat,
}

impl Bounds {
    pub fn from_points<I: IntoIterator<Item = LngLat>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Bounds { south_west: first, north_east: first };
        for p in iter {
            bounds.south_west.lng = bounds.south_west.lng.min(p.lng);
            bounds.south_west.lat = bounds.south_west.lat.min(p.lat);
            bounds.north_east.lng = bounds.north_east.lng.max(p.lng);
            bounds.north_east.lat = bounds.north_east.lat.max(p.lat);
        }
        Some(bounds)
    }

    pub fn is_point(&self) -> bool {
        self.south_west == self.north_east
    }
}

fn mercator_x(lng: f64) -> f64 {
    (lng + 180.0) / 360.0
}

fn mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    (1.0 - (PI / 4.0 + lat / 2.0).tan().ln() / PI) / 2.0
}

fn lng_from_mercator(x: f64) -> f64 {
    x * 360.0 - 180.0
}

fn lat_from_mercator(y: f64) -> f64 {
    let n = PI * (1.0 - 2.0 * y);
    n.sinh().atan().to_degrees()
}

/// The live map camera: a Web Mercator transform from geographic to pixel
/// coordinates for a canvas of `width` x `height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: LngLat,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            center: LngLat::new(-98.5795, 39.8283),
            zoom: 4.0,
            width: 1280.0,
            height: 800.0,
        }
    }
}

impl Viewport {
    fn world_size(&self) -> f64 {
        TILE_SIZE * 2f64.powf(self.zoom)
    }

    pub fn project(&self, p: LngLat) -> ScreenPoint {
        let scale = self.world_size();
        ScreenPoint {
            x: (mercator_x(p.lng) - mercator_x(self.center.lng)) * scale + self.width / 2.0,
            y: (mercator_y(p.lat) - mercator_y(self.center.lat)) * scale + self.height / 2.0,
        }
    }

    pub fn unproject(&self, s: ScreenPoint) -> LngLat {
        let scale = self.world_size();
        let x = mercator_x(self.center.lng) + (s.x - self.width / 2.0) / scale;
        let y = mercator_y(self.center.lat) + (s.y - self.height / 2.0) / scale;
        LngLat::new(lng_from_mercator(x), lat_from_mercator(y))
    }

    pub fn with_center(self, center: LngLat, zoom: f64) -> Self {
        Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            ..self
        }
    }

    /// Camera centered on `center` that shows all of `bounds` inside the
    /// padded canvas, zooming in by at least `min_step`.
    pub fn fit_around(&self, center: LngLat, bounds: &Bounds, padding: f64, min_step: f64) -> Self {
        let floor = (self.zoom + min_step).min(MAX_ZOOM);
        if bounds.is_point() {
            return self.with_center(center, floor);
        }

        // Half-extents measured from the center so the whole box stays on screen.
        let cx = mercator_x(center.lng);
        let cy = mercator_y(center.lat);
        let half_w = (mercator_x(bounds.south_west.lng) - cx)
            .abs()
            .max((mercator_x(bounds.north_east.lng) - cx).abs());
        let half_h = (mercator_y(bounds.south_west.lat) - cy)
            .abs()
            .max((mercator_y(bounds.north_east.lat) - cy).abs());

        let avail_w = (self.width / 2.0 - padding).max(1.0);
        let avail_h = (self.height / 2.0 - padding).max(1.0);
        let mut zoom = MAX_ZOOM;
        if half_w > 0.0 {
            zoom = zoom.min((avail_w / (half_w * TILE_SIZE)).log2());
        }
        if half_h > 0.0 {
            zoom = zoom.min((avail_h / (half_h * TILE_SIZE)).log2());
        }
        self.with_center(center, zoom.max(floor))
    }
}
