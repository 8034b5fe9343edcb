//! Location authorization.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::server::events::MapEvent;
use crate::viewport::MapViewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

/// Device-side location service.
pub trait LocationService: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Asks for when-in-use access. The answer arrives later through
    /// [`LocationPermissionGate::on_authorization_changed`].
    fn request_when_in_use_authorization(&self);
}

/// Decides whether the viewport may show the user's location.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocationPermissionGate;

impl LocationPermissionGate {
    pub fn check_and_request(&self, service: &dyn LocationService, viewport: &mut MapViewport) {
        match service.authorization_status() {
            AuthorizationStatus::AuthorizedWhenInUse => viewport.set_shows_user_location(true),
            status => {
                debug!(?status, "requesting when-in-use location access");
                service.request_when_in_use_authorization();
            }
        }
    }

    pub fn on_authorization_changed(&self, status: AuthorizationStatus, viewport: &mut MapViewport) {
        if status == AuthorizationStatus::AuthorizedWhenInUse {
            info!("location access granted");
            viewport.set_shows_user_location(true);
        } else {
            debug!(?status, "ignoring authorization change");
        }
    }
}

/// Location service backed by the map page's geolocation API.
///
/// The page reports its permission state; a request is forwarded to the page
/// as a map event.
pub struct BrowserLocationService {
    status: Mutex<AuthorizationStatus>,
    event_sender: broadcast::Sender<MapEvent>,
}

impl BrowserLocationService {
    pub fn new(event_sender: broadcast::Sender<MapEvent>) -> Self {
        Self {
            status: Mutex::new(AuthorizationStatus::NotDetermined),
            event_sender,
        }
    }

    pub fn record_status(&self, status: AuthorizationStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

impl LocationService for BrowserLocationService {
    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_when_in_use_authorization(&self) {
        if self.event_sender.send(MapEvent::RequestLocationPermission).is_err() {
            debug!("no page connected to prompt for location access");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::ViewportConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedService {
        status: AuthorizationStatus,
        requests: AtomicUsize,
    }

    impl FixedService {
        fn new(status: AuthorizationStatus) -> Self {
            Self {
                status,
                requests: AtomicUsize::new(0),
            }
        }
    }

    impl LocationService for FixedService {
        fn authorization_status(&self) -> AuthorizationStatus {
            self.status
        }

        fn request_when_in_use_authorization(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn viewport() -> MapViewport {
        let (tx, _rx) = broadcast::channel(16);
        MapViewport::new(ViewportConfig::default(), tx)
    }

    #[test]
    fn authorized_shows_location_without_prompt() {
        let service = FixedService::new(AuthorizationStatus::AuthorizedWhenInUse);
        let mut viewport = viewport();
        LocationPermissionGate.check_and_request(&service, &mut viewport);
        assert!(viewport.shows_user_location());
        assert_eq!(service.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn denied_then_granted_shows_location_only_after_change() {
        let service = FixedService::new(AuthorizationStatus::Denied);
        let mut viewport = viewport();
        let gate = LocationPermissionGate;

        gate.check_and_request(&service, &mut viewport);
        assert!(!viewport.shows_user_location());
        assert_eq!(service.requests.load(Ordering::SeqCst), 1);

        gate.on_authorization_changed(AuthorizationStatus::Denied, &mut viewport);
        assert!(!viewport.shows_user_location());

        gate.on_authorization_changed(AuthorizationStatus::AuthorizedWhenInUse, &mut viewport);
        assert!(viewport.shows_user_location());
    }

    #[test]
    fn other_statuses_are_ignored() {
        let mut viewport = viewport();
        for status in [
            AuthorizationStatus::NotDetermined,
            AuthorizationStatus::Restricted,
            AuthorizationStatus::AuthorizedAlways,
        ] {
            LocationPermissionGate.on_authorization_changed(status, &mut viewport);
        }
        assert!(!viewport.shows_user_location());
    }

    #[tokio::test]
    async fn browser_service_prompts_through_event() {
        let (tx, mut rx) = broadcast::channel(4);
        let service = BrowserLocationService::new(tx);
        assert_eq!(service.authorization_status(), AuthorizationStatus::NotDetermined);

        service.request_when_in_use_authorization();
        assert_eq!(rx.recv().await.unwrap(), MapEvent::RequestLocationPermission);

        service.record_status(AuthorizationStatus::AuthorizedWhenInUse);
        assert_eq!(service.authorization_status(), AuthorizationStatus::AuthorizedWhenInUse);
    }
}
