//! Colours and marker styles for both maps and the metrics panel

use crate::domain::types::{Severity, Vehicle, VehicleState};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const fn from_hex(hex: u32) -> Self {
        Self(((hex >> 16) & 0xff) as u8, ((hex >> 8) & 0xff) as u8, (hex & 0xff) as u8)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

pub const WHITE: Rgb = Rgb::from_hex(0xffffff);
pub const BLACK: Rgb = Rgb::from_hex(0x000000);

// Overview map
pub const ACCENT: Rgb = Rgb::from_hex(0x0071e3);
pub const SURFACE: Rgb = Rgb::from_hex(0xf5f5f7);
pub const SELECTED_LEGEND: Rgb = Rgb::from_hex(0x34c759);
pub const GRID: Rgb = Rgb::from_hex(0xe5e5e7);
pub const MUTED: Rgb = Rgb::from_hex(0x86868b);
pub const OVERVIEW_BACKGROUND: Rgb = Rgb::from_hex(0xf9f9fb);

// Detail map
pub const DETAIL_BACKGROUND: Rgb = Rgb::from_hex(0xf0f0f0);
pub const ROAD: Rgb = Rgb::from_hex(0x333333);
pub const JUNCTION_BOX: Rgb = Rgb::from_hex(0x666666);
pub const LANE_MARKING: Rgb = Rgb::from_hex(0xffff00);

// Vehicles
pub const VEHICLE_EMERGENCY: Rgb = Rgb::from_hex(0xff4444);
pub const VEHICLE_STOPPED: Rgb = Rgb::from_hex(0xffaa00);
pub const VEHICLE_MOVING: Rgb = Rgb::from_hex(0x44aa44);
pub const VEHICLE_OTHER: Rgb = Rgb::from_hex(0x4444ff);

// Congestion bands
pub const SEVERITY_LOW: Rgb = Rgb::from_hex(0x28a745);
pub const SEVERITY_MEDIUM: Rgb = Rgb::from_hex(0xffc107);
pub const SEVERITY_HIGH: Rgb = Rgb::from_hex(0xdc3545);

/// Emergency wins over state; anything neither moving nor stopped is "other"
pub fn vehicle_color(vehicle: &Vehicle) -> Rgb {
    if vehicle.is_emergency {
        return VEHICLE_EMERGENCY;
    }
    match vehicle.state {
        VehicleState::Stopped => VEHICLE_STOPPED,
        VehicleState::Moving => VEHICLE_MOVING,
        VehicleState::Waiting | VehicleState::Exited => VEHICLE_OTHER,
    }
}

pub fn severity_color(severity: Severity) -> Rgb {
    match severity {
        Severity::Low => SEVERITY_LOW,
        Severity::Medium => SEVERITY_MEDIUM,
        Severity::High => SEVERITY_HIGH,
    }
}

/// Radius of the halo drawn around the selected junction
pub const GLOW_RADIUS: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JunctionStyle {
    pub radius: f64,
    pub fill: Rgb,
    pub stroke: Rgb,
    pub stroke_width: f64,
    pub glow: bool,
}

/// Marker style for one junction on the overview map
pub fn junction_style(selected: bool, hovered: bool) -> JunctionStyle {
    let radius = if selected {
        8.0
    } else if hovered {
        7.0
    } else {
        6.0
    };
    JunctionStyle {
        radius,
        fill: if selected || hovered { ACCENT } else { SURFACE },
        stroke: if selected { WHITE } else { ACCENT },
        stroke_width: if selected { 3.0 } else { 2.0 },
        glow: selected,
    }
}
