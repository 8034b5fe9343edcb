//! Geospatial key-value index seam.
//!
//! The controller only talks to [`GeoIndexClient`]. [`MemoryGeoIndex`] is the
//! in-process implementation the server runs with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::GeoIndexError;
use crate::geo::Coordinate;

pub mod memory;

pub use memory::MemoryGeoIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    /// The key's location now matches the query.
    Entered,
    /// The key left the query circle.
    Exited,
    /// The key moved but stayed inside the query circle.
    Moved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: String,
    pub location: Coordinate,
}

impl KeyEvent {
    pub fn entered(key: impl Into<String>, location: Coordinate) -> Self {
        Self {
            kind: KeyEventKind::Entered,
            key: key.into(),
            location,
        }
    }
}

/// A live radius query.
///
/// Events arrive until the index closes the stream or the query is
/// cancelled. Dropping the query cancels it.
pub struct GeoQuery {
    events: mpsc::UnboundedReceiver<KeyEvent>,
    on_cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl GeoQuery {
    pub fn new(events: mpsc::UnboundedReceiver<KeyEvent>) -> Self {
        Self {
            events,
            on_cancel: None,
        }
    }

    /// Runs `hook` once when the query is cancelled or dropped.
    pub fn with_cancel_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Next discovered event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<KeyEvent> {
        self.events.recv().await
    }

    #[cfg(test)]
    pub fn cancel(mut self) {
        self.run_cancel_hook();
    }

    fn run_cancel_hook(&mut self) {
        self.events.close();
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl Drop for GeoQuery {
    fn drop(&mut self) {
        self.run_cancel_hook();
    }
}

impl fmt::Debug for GeoQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoQuery")
            .field("has_cancel_hook", &self.on_cancel.is_some())
            .finish()
    }
}

/// External geospatial store keyed by opaque strings.
pub trait GeoIndexClient: Send + Sync + 'static {
    /// Stores `location` under `key`, replacing any previous location.
    fn set_location(
        &self,
        key: &str,
        location: Coordinate,
    ) -> impl Future<Output = Result<(), GeoIndexError>> + Send;

    /// Opens a subscription over every key within `radius_km` of `center`.
    fn query(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> impl Future<Output = Result<GeoQuery, GeoIndexError>> + Send;
}
