//! Drawable scenes for the overview and detail maps
//!
//! Scenes are plain data in the canvas's virtual pixel space (origin top-left,
//! y grows down). Nothing here knows about the terminal; the TUI maps shapes
//! onto its own canvas.

use crate::domain::projection::{Canvas, GeoPoint, Projection, ScreenPoint};
use crate::domain::types::{Direction, Intersection, IntersectionId, Vehicle, VehicleState};
use crate::render::palette::{self, junction_style, JunctionStyle, Rgb};
use std::f64::consts::TAU;

/// Road width on the detail map
pub const ROAD_WIDTH: f64 = 40.0;
/// Offset of the dashed lane markings from the road centre line
pub const LANE_MARK_OFFSET: f64 = 10.0;
pub const VEHICLE_WIDTH: f64 = 20.0;
pub const VEHICLE_HEIGHT: f64 = 16.0;
/// Lane length the position scale assumes (metres)
pub const LANE_LENGTH_M: f64 = 100.0;
const GRID_DIVISIONS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect { x: f64, y: f64, width: f64, height: f64, fill: Rgb },
    Line { from: ScreenPoint, to: ScreenPoint, color: Rgb, width: f64, dashed: bool },
    Circle { center: ScreenPoint, radius: f64, fill: Option<Rgb>, stroke: Rgb, stroke_width: f64 },
    Text { at: ScreenPoint, text: String, color: Rgb },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegendEntry {
    pub label: &'static str,
    pub color: Rgb,
}

/// A junction drawn on the overview map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub intersection: IntersectionId,
    pub at: ScreenPoint,
    pub style: JunctionStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: f64,
    pub height: f64,
    pub background: Rgb,
    /// Back to front
    pub shapes: Vec<Shape>,
    pub markers: Vec<Marker>,
    pub legend: Vec<LegendEntry>,
}

impl Scene {
    fn new(canvas: Canvas, background: Rgb) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            background,
            shapes: Vec::new(),
            markers: Vec::new(),
            legend: Vec::new(),
        }
    }

    /// Closest marker whose radius plus `slack` contains `point`
    pub fn hit_test(&self, point: ScreenPoint, slack: f64) -> Option<IntersectionId> {
        self.markers
            .iter()
            .map(|m| (m, distance(m.at, point)))
            .filter(|(m, d)| *d <= m.style.radius + slack)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(m, _)| m.intersection)
    }

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64, fill: Rgb) {
        self.shapes.push(Shape::Rect { x, y, width, height, fill });
    }

    fn line(&mut self, from: ScreenPoint, to: ScreenPoint, color: Rgb, width: f64, dashed: bool) {
        self.shapes.push(Shape::Line { from, to, color, width, dashed });
    }

    fn text(&mut self, x: f64, y: f64, text: impl Into<String>, color: Rgb) {
        self.shapes.push(Shape::Text { at: ScreenPoint { x, y }, text: text.into(), color });
    }
}

fn distance(a: ScreenPoint, b: ScreenPoint) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn point(x: f64, y: f64) -> ScreenPoint {
    ScreenPoint { x, y }
}

/// City overview: grid, connectors between consecutive junctions, markers
pub fn overview_scene(
    intersections: &[Intersection],
    selected: Option<IntersectionId>,
    hovered: Option<IntersectionId>,
    canvas: Canvas,
) -> Scene {
    let mut scene = Scene::new(canvas, palette::OVERVIEW_BACKGROUND);
    let (w, h, p) = (canvas.width, canvas.height, canvas.padding);

    for i in 0..=GRID_DIVISIONS {
        let f = i as f64 / GRID_DIVISIONS as f64;
        let x = p + f * (w - 2.0 * p);
        let y = p + f * (h - 2.0 * p);
        scene.line(point(x, p), point(x, h - p), palette::GRID, 1.0, false);
        scene.line(point(p, y), point(w - p, y), palette::GRID, 1.0, false);
    }
    scene.text(w / 2.0, h - 10.0, "Longitude", palette::MUTED);
    scene.text(15.0, h / 2.0, "Latitude", palette::MUTED);

    scene.legend = vec![
        LegendEntry { label: "Traffic Junction", color: palette::ACCENT },
        LegendEntry { label: "Selected", color: palette::SELECTED_LEGEND },
    ];

    let points: Vec<GeoPoint> =
        intersections.iter().map(|i| GeoPoint::new(i.latitude, i.longitude)).collect();
    let Some(projection) = Projection::fit(&points, canvas) else {
        return scene;
    };
    let projected: Vec<ScreenPoint> = points.iter().map(|p| projection.project(*p)).collect();

    // Cosmetic only; list order, not a road graph
    for pair in projected.windows(2) {
        scene.line(pair[0], pair[1], palette::ACCENT, 2.0, false);
    }

    for (intersection, at) in intersections.iter().zip(&projected) {
        let style = junction_style(selected == Some(intersection.id), hovered == Some(intersection.id));
        if style.glow {
            scene.shapes.push(Shape::Circle {
                center: *at,
                radius: palette::GLOW_RADIUS,
                fill: None,
                stroke: palette::ACCENT,
                stroke_width: 2.0,
            });
        }
        scene.shapes.push(Shape::Circle {
            center: *at,
            radius: style.radius,
            fill: Some(style.fill),
            stroke: style.stroke,
            stroke_width: style.stroke_width,
        });
        scene.markers.push(Marker { intersection: intersection.id, at: *at, style });
    }
    scene
}

/// Where a vehicle sits on the detail map, or `None` if it is not drawn
///
/// A lane picks the approach arm and `position` (metres from the lane entry)
/// the distance from the junction box. Lane-less vehicles ring the box by id.
pub fn vehicle_anchor(vehicle: &Vehicle, canvas: Canvas) -> Option<ScreenPoint> {
    if vehicle.state == VehicleState::Exited {
        return None;
    }
    let center = canvas.center();
    let box_half = ROAD_WIDTH / 2.0;
    let stop_gap = box_half + VEHICLE_WIDTH;

    let Some(lane) = vehicle.lane_id else {
        let slot = vehicle.id.rem_euclid(8) as f64;
        let ring = vehicle.id.div_euclid(8).rem_euclid(3) as f64;
        let angle = slot / 8.0 * TAU;
        let radius = stop_gap + ring * VEHICLE_WIDTH;
        return Some(point(center.x + radius * angle.cos(), center.y + radius * angle.sin()));
    };

    let reach = (center.x.min(center.y) - stop_gap - VEHICLE_WIDTH / 2.0).max(0.0);
    let remaining = 1.0 - (vehicle.position / LANE_LENGTH_M).clamp(0.0, 1.0);
    let d = stop_gap + remaining * reach;
    Some(match Direction::for_lane(lane) {
        Direction::North => point(center.x, center.y - d),
        Direction::South => point(center.x, center.y + d),
        Direction::East => point(center.x + d, center.y),
        Direction::West => point(center.x - d, center.y),
    })
}

/// Intersection detail: crossing roads, lane markings, title and vehicles
pub fn detail_scene(name: &str, vehicles: &[Vehicle], canvas: Canvas) -> Scene {
    let mut scene = Scene::new(canvas, palette::DETAIL_BACKGROUND);
    let (w, h) = (canvas.width, canvas.height);
    let c = canvas.center();
    let half = ROAD_WIDTH / 2.0;

    scene.rect(0.0, c.y - half, w, ROAD_WIDTH, palette::ROAD);
    scene.rect(c.x - half, 0.0, ROAD_WIDTH, h, palette::ROAD);
    scene.rect(c.x - half, c.y - half, ROAD_WIDTH, ROAD_WIDTH, palette::JUNCTION_BOX);

    for offset in [-LANE_MARK_OFFSET, LANE_MARK_OFFSET] {
        scene.line(point(0.0, c.y + offset), point(w, c.y + offset), palette::LANE_MARKING, 2.0, true);
        scene.line(point(c.x + offset, 0.0), point(c.x + offset, h), palette::LANE_MARKING, 2.0, true);
    }

    scene.text(c.x, 30.0, name, palette::BLACK);

    for vehicle in vehicles {
        let Some(at) = vehicle_anchor(vehicle, canvas) else {
            continue;
        };
        scene.rect(
            at.x - VEHICLE_WIDTH / 2.0,
            at.y - VEHICLE_HEIGHT / 2.0,
            VEHICLE_WIDTH,
            VEHICLE_HEIGHT,
            palette::vehicle_color(vehicle),
        );
        scene.text(at.x, at.y, vehicle.vehicle_type.glyph().to_string(), palette::WHITE);
    }

    scene.legend = vec![
        LegendEntry { label: "Moving", color: palette::VEHICLE_MOVING },
        LegendEntry { label: "Stopped", color: palette::VEHICLE_STOPPED },
        LegendEntry { label: "Waiting", color: palette::VEHICLE_OTHER },
        LegendEntry { label: "Emergency", color: palette::VEHICLE_EMERGENCY },
    ];
    scene
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CityId, LaneId, VehicleType};

    fn canvas() -> Canvas {
        Canvas::new(800.0, 600.0, 40.0)
    }

    fn junction(id: i64, lat: f64, lon: f64) -> Intersection {
        Intersection {
            id: IntersectionId(id),
            name: format!("Junction {id}"),
            city_id: CityId(1),
            latitude: lat,
            longitude: lon,
            num_lanes: 4,
            description: None,
        }
    }

    fn vehicle(id: i64, lane: Option<i64>, position: f64, state: VehicleState) -> Vehicle {
        Vehicle {
            id,
            vehicle_id: format!("V-{id}"),
            vehicle_type: VehicleType::Bus,
            intersection_id: Some(IntersectionId(1)),
            lane_id: lane.map(LaneId),
            position,
            speed: 0.0,
            state,
            is_emergency: false,
            waiting_time: 0.0,
        }
    }

    fn circles(scene: &Scene) -> usize {
        scene.shapes.iter().filter(|s| matches!(s, Shape::Circle { .. })).count()
    }

    #[test]
    fn test_overview_markers_and_connectors() {
        let list = [junction(1, 12.9, 77.5), junction(2, 13.0, 77.6), junction(3, 13.1, 77.7)];
        let scene = overview_scene(&list, Some(IntersectionId(2)), None, canvas());

        assert_eq!(scene.markers.len(), 3);
        // One marker each plus the glow ring around the selected one
        assert_eq!(circles(&scene), 4);
        let connectors = scene
            .shapes
            .iter()
            .filter(|s| matches!(s, Shape::Line { color, .. } if *color == palette::ACCENT))
            .count();
        assert_eq!(connectors, 2);
        assert_eq!(scene.markers[1].style.radius, 8.0);
        assert_eq!(scene.markers[0].at, point(40.0, 560.0));
    }

    #[test]
    fn test_overview_without_intersections_has_no_markers() {
        let scene = overview_scene(&[], None, None, canvas());
        assert!(scene.markers.is_empty());
        assert_eq!(scene.legend.len(), 2);
    }

    #[test]
    fn test_hit_test_picks_nearest_marker() {
        let list = [junction(1, 12.9, 77.5), junction(2, 13.1, 77.7)];
        let scene = overview_scene(&list, None, None, canvas());
        assert_eq!(scene.hit_test(point(42.0, 558.0), 4.0), Some(IntersectionId(1)));
        assert_eq!(scene.hit_test(point(400.0, 300.0), 4.0), None);
    }

    #[test]
    fn test_vehicle_placement_follows_lane_and_position() {
        let c = canvas();
        let entering = vehicle_anchor(&vehicle(1, Some(1), 0.0, VehicleState::Moving), c).unwrap();
        let at_line = vehicle_anchor(&vehicle(2, Some(1), 100.0, VehicleState::Stopped), c).unwrap();
        // North arm: above the centre, closer once further along the lane
        assert_eq!(entering.x, 400.0);
        assert!(entering.y < at_line.y && at_line.y < 300.0);

        let east = vehicle_anchor(&vehicle(3, Some(3), 50.0, VehicleState::Moving), c).unwrap();
        assert!(east.x > 400.0);
        assert_eq!(east.y, 300.0);
    }

    #[test]
    fn test_placement_is_deterministic() {
        let v = vehicle(17, None, 0.0, VehicleState::Waiting);
        assert_eq!(vehicle_anchor(&v, canvas()), vehicle_anchor(&v, canvas()));
    }

    #[test]
    fn test_exited_vehicles_are_not_drawn() {
        let vehicles = [
            vehicle(1, Some(1), 10.0, VehicleState::Moving),
            vehicle(2, Some(2), 10.0, VehicleState::Exited),
        ];
        let scene = detail_scene("MG Road", &vehicles, canvas());
        let glyphs = scene
            .shapes
            .iter()
            .filter(|s| matches!(s, Shape::Text { text, .. } if text == "B"))
            .count();
        assert_eq!(glyphs, 1);
        assert!(scene
            .shapes
            .iter()
            .any(|s| matches!(s, Shape::Text { text, at, .. } if text == "MG Road" && at.y == 30.0)));
        assert_eq!(scene.legend.len(), 4);
    }
}
