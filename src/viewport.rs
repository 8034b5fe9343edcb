//! The visible map region and the markers placed on it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::constants::{
    CENTER_REGION_METERS, CREATURE_REUSE_ID, ROUTE_ACTION_ICON, ROUTE_ACTION_SIZE,
    ROUTE_SPAN_METERS, SIGHTING_DISPLAY_NAME, USER_ICON, USER_REUSE_ID,
};
use crate::creature::CreatureId;
use crate::geo::{Coordinate, Region};
use crate::route::{RoutePlanner, RouteRequest};
use crate::server::events::MapEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AnnotationKind {
    User,
    Creature(CreatureId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub coordinate: Coordinate,
}

impl Annotation {
    pub fn user(coordinate: Coordinate) -> Self {
        Self {
            kind: AnnotationKind::User,
            coordinate,
        }
    }

    pub fn creature(id: CreatureId, coordinate: Coordinate) -> Self {
        Self {
            kind: AnnotationKind::Creature(id),
            coordinate,
        }
    }

    pub fn creature_id(&self) -> Option<CreatureId> {
        match self.kind {
            AnnotationKind::Creature(id) => Some(id),
            AnnotationKind::User => None,
        }
    }
}

/// Control attached to the right side of a marker callout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalloutAction {
    pub icon: String,
    pub width: u32,
    pub height: u32,
}

/// Renderable description of an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationView {
    pub reuse_id: String,
    pub icon: String,
    pub title: Option<String>,
    pub can_show_callout: bool,
    pub action: Option<CalloutAction>,
}

impl AnnotationView {
    pub fn resolve(annotation: &Annotation) -> Self {
        match annotation.kind {
            AnnotationKind::User => Self {
                reuse_id: USER_REUSE_ID.to_string(),
                icon: USER_ICON.to_string(),
                title: None,
                can_show_callout: false,
                action: None,
            },
            AnnotationKind::Creature(id) => Self {
                reuse_id: CREATURE_REUSE_ID.to_string(),
                icon: id.icon(),
                title: Some(SIGHTING_DISPLAY_NAME.to_string()),
                can_show_callout: true,
                action: Some(CalloutAction {
                    icon: ROUTE_ACTION_ICON.to_string(),
                    width: ROUTE_ACTION_SIZE,
                    height: ROUTE_ACTION_SIZE,
                }),
            },
        }
    }
}

/// One-shot auto-centering on the first location fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenteringState {
    AwaitingFix,
    Centered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportSnapshot {
    pub region: Region,
    pub centering: CenteringState,
    pub shows_user_location: bool,
    pub user_location: Option<Coordinate>,
    pub annotation_count: usize,
}

#[derive(Debug, Clone)]
pub struct ViewportConfig {
    pub center_region_meters: f64,
    pub route_span_meters: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            center_region_meters: CENTER_REGION_METERS,
            route_span_meters: ROUTE_SPAN_METERS,
        }
    }
}

/// Map state mirrored from the page: region, user location and markers.
///
/// Every mutation is published on the event channel so connected pages can
/// follow along.
pub struct MapViewport {
    region: Region,
    centering: CenteringState,
    shows_user_location: bool,
    user_location: Option<Coordinate>,
    annotations: Vec<Annotation>,
    config: ViewportConfig,
    event_sender: broadcast::Sender<MapEvent>,
}

impl MapViewport {
    pub fn new(config: ViewportConfig, event_sender: broadcast::Sender<MapEvent>) -> Self {
        Self {
            region: Region::default(),
            centering: CenteringState::AwaitingFix,
            shows_user_location: false,
            user_location: None,
            annotations: Vec::new(),
            config,
            event_sender,
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn center(&self) -> Coordinate {
        self.region.center
    }

    pub fn centering(&self) -> CenteringState {
        self.centering
    }

    pub fn shows_user_location(&self) -> bool {
        self.shows_user_location
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, index: usize) -> Option<&Annotation> {
        self.annotations.get(index)
    }

    /// The user marker, once location is both allowed and known.
    pub fn user_annotation(&self) -> Option<Annotation> {
        self.user_location
            .filter(|_| self.shows_user_location)
            .map(Annotation::user)
    }

    pub fn snapshot(&self) -> ViewportSnapshot {
        ViewportSnapshot {
            region: self.region,
            centering: self.centering,
            shows_user_location: self.shows_user_location,
            user_location: self.user_location,
            annotation_count: self.annotations.len(),
        }
    }

    pub fn set_shows_user_location(&mut self, visible: bool) {
        if self.shows_user_location == visible {
            return;
        }
        self.shows_user_location = visible;
        debug!(visible, "user location visibility changed");
        self.publish(MapEvent::UserLocationVisibility { visible });
    }

    /// Handles a device location update. Returns true when this update
    /// centered the map, which only ever happens once.
    pub fn on_location_update(&mut self, location: Coordinate) -> bool {
        self.user_location = Some(location);
        self.publish(MapEvent::UserLocationUpdated { location });

        if self.centering == CenteringState::Centered {
            return false;
        }

        let meters = self.config.center_region_meters;
        self.set_region(Region::with_distance(location, meters, meters), true);
        self.centering = CenteringState::Centered;
        info!(%location, "map centered on user location");
        true
    }

    /// Records a user-driven pan or zoom and returns the new center, which is
    /// where sightings should be refreshed.
    pub fn on_region_will_change(&mut self, region: Region) -> Coordinate {
        self.set_region(region, false);
        region.center
    }

    /// Appends a marker and returns its index. Markers are never merged.
    pub fn add_annotation(&mut self, annotation: Annotation) -> usize {
        let index = self.annotations.len();
        let view = self.resolve_annotation_view(&annotation);
        self.annotations.push(annotation.clone());
        self.publish(MapEvent::AnnotationAdded {
            index,
            annotation,
            view,
        });
        index
    }

    pub fn resolve_annotation_view(&self, annotation: &Annotation) -> AnnotationView {
        AnnotationView::resolve(annotation)
    }

    /// Hands a creature marker to the route planner. User markers have no
    /// action; returns whether a request was sent.
    pub fn on_annotation_action_tapped(&self, annotation: &Annotation, planner: &dyn RoutePlanner) -> bool {
        if annotation.creature_id().is_none() {
            return false;
        }
        planner.open(RouteRequest::driving_to(
            annotation.coordinate,
            SIGHTING_DISPLAY_NAME,
            self.config.route_span_meters,
        ));
        true
    }

    fn set_region(&mut self, region: Region, animated: bool) {
        self.region = region;
        self.publish(MapEvent::RegionChanged { region, animated });
    }

    fn publish(&self, event: MapEvent) {
        // No subscribers simply means no page is open
        let _ = self.event_sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn viewport() -> (MapViewport, broadcast::Receiver<MapEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (MapViewport::new(ViewportConfig::default(), tx), rx)
    }

    #[derive(Default)]
    struct RecordingPlanner {
        requests: Mutex<Vec<RouteRequest>>,
    }

    impl RoutePlanner for RecordingPlanner {
        fn open(&self, request: RouteRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    #[test]
    fn centers_only_on_first_location_update() {
        let (mut viewport, _rx) = viewport();
        let first = Coordinate::new(40.0, -73.0);

        assert!(viewport.on_location_update(first));
        let centered = viewport.region();
        assert_eq!(centered, Region::with_distance(first, 2000.0, 2000.0));
        assert_eq!(viewport.centering(), CenteringState::Centered);

        assert!(!viewport.on_location_update(Coordinate::new(41.0, -74.0)));
        assert!(!viewport.on_location_update(Coordinate::new(10.0, 10.0)));
        assert_eq!(viewport.region(), centered);
        assert_eq!(viewport.snapshot().user_location, Some(Coordinate::new(10.0, 10.0)));
    }

    #[test]
    fn region_change_moves_center() {
        let (mut viewport, _rx) = viewport();
        let region = Region::with_distance(Coordinate::new(1.0, 2.0), 500.0, 500.0);
        assert_eq!(viewport.on_region_will_change(region), Coordinate::new(1.0, 2.0));
        assert_eq!(viewport.center(), Coordinate::new(1.0, 2.0));
    }

    #[test]
    fn annotations_are_not_deduplicated() {
        let (mut viewport, mut rx) = viewport();
        let id = CreatureId::new(5).unwrap();
        let at = Coordinate::new(40.0, -73.0);

        assert_eq!(viewport.add_annotation(Annotation::creature(id, at)), 0);
        assert_eq!(viewport.add_annotation(Annotation::creature(id, at)), 1);
        assert_eq!(viewport.annotations().len(), 2);

        let added = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, MapEvent::AnnotationAdded { .. }))
            .count();
        assert_eq!(added, 2);
    }

    #[test]
    fn resolves_user_and_creature_views() {
        let (viewport, _rx) = viewport();
        let user = viewport.resolve_annotation_view(&Annotation::user(Coordinate::new(0.0, 0.0)));
        assert_eq!(user.reuse_id, "User");
        assert_eq!(user.icon, "ash");
        assert!(user.action.is_none());

        let creature = viewport.resolve_annotation_view(&Annotation::creature(
            CreatureId::new(25).unwrap(),
            Coordinate::new(0.0, 0.0),
        ));
        assert_eq!(creature.reuse_id, "Pokemon");
        assert_eq!(creature.icon, "25");
        assert!(creature.can_show_callout);
        assert_eq!(creature.title.as_deref(), Some("Pokemon Sighting"));
        let action = creature.action.unwrap();
        assert_eq!((action.icon.as_str(), action.width, action.height), ("map", 30, 30));
    }

    #[test]
    fn action_tap_routes_to_creature_only() {
        let (viewport, _rx) = viewport();
        let planner = RecordingPlanner::default();
        let at = Coordinate::new(40.0, -73.0);

        assert!(!viewport.on_annotation_action_tapped(&Annotation::user(at), &planner));
        assert!(viewport.on_annotation_action_tapped(
            &Annotation::creature(CreatureId::new(1).unwrap(), at),
            &planner
        ));

        let requests = planner.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].destination, at);
        assert_eq!(requests[0].name, "Pokemon Sighting");
        assert_eq!(requests[0].region, Region::with_distance(at, 1000.0, 1000.0));
    }

    #[test]
    fn user_annotation_requires_permission_and_fix() {
        let (mut viewport, _rx) = viewport();
        viewport.on_location_update(Coordinate::new(3.0, 4.0));
        assert!(viewport.user_annotation().is_none());

        viewport.set_shows_user_location(true);
        assert_eq!(
            viewport.user_annotation(),
            Some(Annotation::user(Coordinate::new(3.0, 4.0)))
        );
    }
}
