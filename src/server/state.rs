use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::events::MapEvent;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::controller::SightingController;
use crate::geo_index::MemoryGeoIndex;
use crate::permission::{BrowserLocationService, LocationPermissionGate};
use crate::route::MapsLinkPlanner;
use crate::settings::Settings;
use crate::viewport::MapViewport;

// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SightingController<MemoryGeoIndex>>,
    pub viewport: Arc<Mutex<MapViewport>>,
    pub gate: LocationPermissionGate,
    pub location: Arc<BrowserLocationService>,
    pub planner: Arc<MapsLinkPlanner>,
    pub settings: Arc<Mutex<Settings>>,
    pub event_sender: broadcast::Sender<MapEvent>,
}

impl AppState {
    pub fn new(settings: Settings, index: MemoryGeoIndex) -> Self {
        let (event_sender, _event_receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let viewport = Arc::new(Mutex::new(MapViewport::new(
            settings.viewport_config(),
            event_sender.clone(),
        )));
        let controller = SightingController::new(
            Arc::new(index),
            Arc::clone(&viewport),
            settings.controller_config(),
        );

        Self {
            controller: Arc::new(controller),
            viewport,
            gate: LocationPermissionGate,
            location: Arc::new(BrowserLocationService::new(event_sender.clone())),
            planner: Arc::new(MapsLinkPlanner::new(event_sender.clone())),
            settings: Arc::new(Mutex::new(settings)),
            event_sender,
        }
    }
}
