//! Geospatial projection from (lat, lon) to canvas coordinates
//!
//! Linear fit of the point set's bounding box onto the padded canvas:
//! - `x = P + (lon - lon_min) / lon_range * (W - 2P)`
//! - `y = H - P - (lat - lat_min) / lat_range * (H - 2P)` (latitude grows up, y grows down)
//!
//! Spans narrower than [`MIN_SPAN_DEG`] are widened to that span around
//! their midpoint, so single points and collinear sets stay well-defined.

/// Smallest lat/lon span (degrees) used for projection
pub const MIN_SPAN_DEG: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Target drawing surface in virtual pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Canvas {
    pub fn new(width: f64, height: f64, padding: f64) -> Self {
        Self { width, height, padding }
    }

    fn inner_width(&self) -> f64 {
        (self.width - 2.0 * self.padding).max(0.0)
    }

    fn inner_height(&self) -> f64 {
        (self.height - 2.0 * self.padding).max(0.0)
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint { x: self.width / 2.0, y: self.height / 2.0 }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self { width: 800.0, height: 600.0, padding: 40.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Min/max bounds of a point set, with degenerate spans widened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl GeoBounds {
    /// Bounds of the points, or `None` for an empty set
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a GeoPoint>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            lat_min: first.lat,
            lat_max: first.lat,
            lon_min: first.lon,
            lon_max: first.lon,
        };
        for p in iter {
            bounds.lat_min = bounds.lat_min.min(p.lat);
            bounds.lat_max = bounds.lat_max.max(p.lat);
            bounds.lon_min = bounds.lon_min.min(p.lon);
            bounds.lon_max = bounds.lon_max.max(p.lon);
        }
        Some(bounds.widened())
    }

    fn widened(self) -> Self {
        let (lat_min, lat_max) = widen_span(self.lat_min, self.lat_max);
        let (lon_min, lon_max) = widen_span(self.lon_min, self.lon_max);
        Self { lat_min, lat_max, lon_min, lon_max }
    }

    pub fn lat_range(&self) -> f64 {
        (self.lat_max - self.lat_min).max(MIN_SPAN_DEG)
    }

    pub fn lon_range(&self) -> f64 {
        (self.lon_max - self.lon_min).max(MIN_SPAN_DEG)
    }
}

fn widen_span(min: f64, max: f64) -> (f64, f64) {
    if max - min >= MIN_SPAN_DEG {
        return (min, max);
    }
    let mid = (min + max) / 2.0;
    (mid - MIN_SPAN_DEG / 2.0, mid + MIN_SPAN_DEG / 2.0)
}

/// A fitted projection; re-fit whenever the point set changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    bounds: GeoBounds,
    canvas: Canvas,
}

impl Projection {
    pub fn fit(points: &[GeoPoint], canvas: Canvas) -> Option<Self> {
        let bounds = GeoBounds::from_points(points)?;
        Some(Self { bounds, canvas })
    }

    pub fn bounds(&self) -> &GeoBounds {
        &self.bounds
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn project(&self, point: GeoPoint) -> ScreenPoint {
        let c = &self.canvas;
        let b = &self.bounds;
        let x = c.padding + (point.lon - b.lon_min) / b.lon_range() * c.inner_width();
        let y = c.height - c.padding - (point.lat - b.lat_min) / b.lat_range() * c.inner_height();
        ScreenPoint { x, y }
    }
}

/// Project every point against the bounds of the whole set
pub fn project_all(points: &[GeoPoint], canvas: Canvas) -> Vec<ScreenPoint> {
    match Projection::fit(points, canvas) {
        Some(projection) => points.iter().map(|p| projection.project(*p)).collect(),
        None => Vec::new(),
    }
}
