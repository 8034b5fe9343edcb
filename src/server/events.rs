use serde::{Deserialize, Serialize};

use crate::geo::{Coordinate, Region};
use crate::route::RouteRequest;
use crate::viewport::{Annotation, AnnotationView};

// SSE event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum MapEvent {
    RegionChanged {
        region: Region,
        animated: bool,
    },
    UserLocationUpdated {
        location: Coordinate,
    },
    UserLocationVisibility {
        visible: bool,
    },
    RequestLocationPermission,
    AnnotationAdded {
        index: usize,
        annotation: Annotation,
        view: AnnotationView,
    },
    OpenRoute {
        url: String,
        request: RouteRequest,
    },
    Heartbeat {
        message: String,
    },
}
