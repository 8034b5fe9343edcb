//! Hand-off to an external route planner.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::geo::{Coordinate, Region};
use crate::server::events::MapEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionsMode {
    Driving,
}

impl DirectionsMode {
    fn flag(self) -> &'static str {
        match self {
            Self::Driving => "d",
        }
    }
}

/// Destination plus display options for the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub destination: Coordinate,
    pub name: String,
    pub region: Region,
    pub mode: DirectionsMode,
}

impl RouteRequest {
    pub fn driving_to(destination: Coordinate, name: impl Into<String>, span_meters: f64) -> Self {
        Self {
            destination,
            name: name.into(),
            region: Region::with_distance(destination, span_meters, span_meters),
            mode: DirectionsMode::Driving,
        }
    }
}

/// Opens a route independently of the app. Nothing comes back.
pub trait RoutePlanner: Send + Sync {
    fn open(&self, request: RouteRequest);
}

/// Renders requests as maps deep links and asks connected pages to open them.
pub struct MapsLinkPlanner {
    event_sender: broadcast::Sender<MapEvent>,
}

impl MapsLinkPlanner {
    pub fn new(event_sender: broadcast::Sender<MapEvent>) -> Self {
        Self { event_sender }
    }

    pub fn link(request: &RouteRequest) -> String {
        let name: String = request
            .name
            .bytes()
            .map(|b| if b.is_ascii_alphanumeric() { char::from(b).to_string() } else { format!("%{b:02X}") })
            .collect();
        format!(
            "https://maps.apple.com/?daddr={},{}&q={}&dirflg={}&sll={},{}&spn={:.6},{:.6}",
            request.destination.lat,
            request.destination.lng,
            name,
            request.mode.flag(),
            request.region.center.lat,
            request.region.center.lng,
            request.region.span.lat_delta,
            request.region.span.lng_delta,
        )
    }
}

impl RoutePlanner for MapsLinkPlanner {
    fn open(&self, request: RouteRequest) {
        let url = Self::link(&request);
        info!(destination = %request.destination, "opening route planner");
        if self.event_sender.send(MapEvent::OpenRoute { url, request }).is_err() {
            debug!("no page connected to open the route");
        }
    }
}
