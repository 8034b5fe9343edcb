//! Turns map and button events into index traffic, and index results into
//! map markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{INDEX_RETRIES, INDEX_RETRY_BACKOFF_MS, INDEX_TIMEOUT_MS, QUERY_RADIUS_KM};
use crate::creature::CreatureId;
use crate::error::{GeoIndexError, SightingError};
use crate::geo::Coordinate;
use crate::geo_index::{GeoIndexClient, GeoQuery, KeyEvent, KeyEventKind};
use crate::viewport::{Annotation, MapViewport};

/// A creature recorded at a coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub creature: CreatureId,
    pub location: Coordinate,
    pub spotted_at: DateTime<Utc>,
}

/// Timeout and retry budget for index calls.
#[derive(Debug, Clone, Copy)]
pub struct IndexCallPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for IndexCallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(INDEX_TIMEOUT_MS),
            retries: INDEX_RETRIES,
            backoff: Duration::from_millis(INDEX_RETRY_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub query_radius_km: f64,
    pub policy: IndexCallPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            query_radius_km: QUERY_RADIUS_KM,
            policy: IndexCallPolicy::default(),
        }
    }
}

/// Background task applying one query's discoveries to the viewport.
///
/// Dropping the subscription aborts the task, which in turn cancels the
/// underlying query.
#[derive(Debug)]
pub struct SightingSubscription {
    center: Coordinate,
    task: Option<JoinHandle<usize>>,
}

impl SightingSubscription {
    pub fn center(&self) -> Coordinate {
        self.center
    }

    /// Waits for the query stream to end and returns how many markers it added.
    #[cfg(test)]
    pub async fn finished(mut self) -> usize {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for SightingSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct SightingController<G> {
    index: Arc<G>,
    viewport: Arc<Mutex<MapViewport>>,
    config: ControllerConfig,
    active: Mutex<Option<SightingSubscription>>,
}

impl<G: GeoIndexClient> SightingController<G> {
    pub fn new(index: Arc<G>, viewport: Arc<Mutex<MapViewport>>, config: ControllerConfig) -> Self {
        Self {
            index,
            viewport,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn index(&self) -> &Arc<G> {
        &self.index
    }

    /// Drops a random creature at the current map center.
    pub async fn spawn_random_sighting(&self) -> Result<Sighting, SightingError> {
        let location = lock(&self.viewport).center();
        let creature = CreatureId::random(&mut rand::thread_rng());
        let key = creature.key();

        let index = &self.index;
        self.with_retry("set_location", || index.set_location(&key, location))
            .await?;

        info!(%creature, %location, "sighting created");
        Ok(Sighting {
            creature,
            location,
            spotted_at: Utc::now(),
        })
    }

    /// Replaces the active query with one centered on `center`. Discovered
    /// sightings are added to the viewport in the background.
    pub async fn refresh_sightings(&self, center: Coordinate) -> Result<(), SightingError> {
        self.cancel_active();

        let index = &self.index;
        let radius_km = self.config.query_radius_km;
        let query = self.with_retry("query", || index.query(center, radius_km)).await?;
        debug!(%center, radius_km, "sighting query opened");

        let task = tokio::spawn(apply_discoveries(query, Arc::clone(&self.viewport)));
        let subscription = SightingSubscription {
            center,
            task: Some(task),
        };
        // A concurrent refresh may have slipped in while the query was opening
        if let Some(previous) = lock(&self.active).replace(subscription) {
            debug!(center = %previous.center(), "superseded sighting query");
        }
        Ok(())
    }

    /// Center of the query currently feeding the viewport.
    pub fn active_center(&self) -> Option<Coordinate> {
        lock(&self.active).as_ref().map(SightingSubscription::center)
    }

    pub fn cancel_active(&self) {
        let previous = lock(&self.active).take();
        if let Some(previous) = previous {
            debug!(center = %previous.center(), "cancelling sighting query");
        }
    }

    /// Detaches the active subscription and waits for its stream to end.
    #[cfg(test)]
    pub async fn finish_active(&self) -> Option<usize> {
        let subscription = lock(&self.active).take()?;
        Some(subscription.finished().await)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, GeoIndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GeoIndexError>>,
    {
        let policy = self.config.policy;
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GeoIndexError::Timeout {
                    operation,
                    after: policy.timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < policy.retries => {
                    attempt += 1;
                    warn!(operation, attempt, "index call failed, retrying: {e}");
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Annotation for an index event, if it reports a newly discovered sighting.
pub fn annotation_for(event: &KeyEvent) -> Result<Option<Annotation>, SightingError> {
    if event.kind != KeyEventKind::Entered {
        return Ok(None);
    }
    let creature: CreatureId = event.key.parse()?;
    Ok(Some(Annotation::creature(creature, event.location)))
}

async fn apply_discoveries(mut query: GeoQuery, viewport: Arc<Mutex<MapViewport>>) -> usize {
    let mut added = 0;
    while let Some(event) = query.next().await {
        match annotation_for(&event) {
            Ok(Some(annotation)) => {
                lock(&viewport).add_annotation(annotation);
                added += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("skipping sighting: {e}"),
        }
    }
    added
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_index::MemoryGeoIndex;
    use crate::viewport::ViewportConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{broadcast, mpsc};

    /// Index double that records writes and replays a fixed query result.
    #[derive(Default)]
    struct ScriptedIndex {
        writes: Mutex<Vec<(String, Coordinate)>>,
        queries: Mutex<Vec<(Coordinate, f64)>>,
        results: Vec<KeyEvent>,
        failures_left: AtomicUsize,
        cancellations: Arc<AtomicUsize>,
        hold_open: bool,
        // query attempts never resolve
        stall_queries: bool,
        query_attempts: AtomicUsize,
    }

    impl ScriptedIndex {
        fn with_results(results: Vec<KeyEvent>) -> Self {
            Self {
                results,
                ..Self::default()
            }
        }

        fn fail_first(self, n: usize) -> Self {
            self.failures_left.store(n, Ordering::SeqCst);
            self
        }

        fn take_failure(&self) -> Result<(), GeoIndexError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(GeoIndexError::Unavailable("scripted outage".into()));
            }
            Ok(())
        }
    }

    impl GeoIndexClient for ScriptedIndex {
        fn set_location(
            &self,
            key: &str,
            location: Coordinate,
        ) -> impl Future<Output = Result<(), GeoIndexError>> + Send {
            let result = self.take_failure().map(|()| {
                self.writes.lock().unwrap().push((key.to_string(), location));
            });
            std::future::ready(result)
        }

        fn query(
            &self,
            center: Coordinate,
            radius_km: f64,
        ) -> impl Future<Output = Result<GeoQuery, GeoIndexError>> + Send {
            self.query_attempts.fetch_add(1, Ordering::SeqCst);
            let result = (!self.stall_queries).then(|| {
                self.take_failure().map(|()| {
                    self.queries.lock().unwrap().push((center, radius_km));
                    let (tx, rx) = mpsc::unbounded_channel();
                    for event in &self.results {
                        tx.send(event.clone()).unwrap();
                    }
                    let cancellations = Arc::clone(&self.cancellations);
                    let keep_alive = self.hold_open.then_some(tx);
                    GeoQuery::new(rx).with_cancel_hook(move || {
                        drop(keep_alive);
                        cancellations.fetch_add(1, Ordering::SeqCst);
                    })
                })
            });
            async move {
                match result {
                    Some(result) => result,
                    None => std::future::pending().await,
                }
            }
        }
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            query_radius_km: QUERY_RADIUS_KM,
            policy: IndexCallPolicy {
                timeout: Duration::from_millis(200),
                retries: 2,
                backoff: Duration::from_millis(1),
            },
        }
    }

    fn controller<G: GeoIndexClient>(index: G) -> SightingController<G> {
        let (tx, _rx) = broadcast::channel(64);
        let viewport = MapViewport::new(ViewportConfig::default(), tx);
        SightingController::new(Arc::new(index), Arc::new(Mutex::new(viewport)), fast_config())
    }

    fn annotations<G>(controller: &SightingController<G>) -> Vec<Annotation> {
        lock(&controller.viewport).annotations().to_vec()
    }

    #[tokio::test]
    async fn spawn_writes_map_center_with_catalog_id() {
        let controller = controller(ScriptedIndex::default());
        let center = Coordinate::new(40.0, -73.0);
        lock(&controller.viewport).on_location_update(center);

        let sighting = controller.spawn_random_sighting().await.unwrap();
        assert_eq!(sighting.location, center);

        let writes = controller.index().writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 1);
        let (key, location) = &writes[0];
        assert_eq!(*location, center);
        let id: u16 = key.parse().unwrap();
        assert!((1..=151).contains(&id));
        assert_eq!(id, sighting.creature.get());
    }

    #[tokio::test]
    async fn spawned_ids_always_in_range() {
        let controller = controller(ScriptedIndex::default());
        for _ in 0..500 {
            let sighting = controller.spawn_random_sighting().await.unwrap();
            assert!((1..=151).contains(&sighting.creature.get()));
        }
    }

    #[tokio::test]
    async fn refresh_adds_one_annotation_per_entered_key() {
        let first = Coordinate::new(40.001, -73.0);
        let second = Coordinate::new(40.0, -73.002);
        let index = ScriptedIndex::with_results(vec![
            KeyEvent::entered("5", first),
            KeyEvent::entered("25", second),
        ]);
        let controller = controller(index);
        let center = Coordinate::new(40.0, -73.0);

        controller.refresh_sightings(center).await.unwrap();
        assert_eq!(controller.finish_active().await, Some(2));

        assert_eq!(
            controller.index().queries.lock().unwrap().as_slice(),
            &[(center, 2.5)]
        );
        assert_eq!(
            annotations(&controller),
            vec![
                Annotation::creature(CreatureId::new(5).unwrap(), first),
                Annotation::creature(CreatureId::new(25).unwrap(), second),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_keys_are_skipped() {
        let at = Coordinate::new(40.0, -73.0);
        let index = ScriptedIndex::with_results(vec![
            KeyEvent::entered("pikachu", at),
            KeyEvent::entered("7", at),
            KeyEvent::entered("999", at),
            KeyEvent {
                kind: KeyEventKind::Exited,
                key: "8".into(),
                location: at,
            },
        ]);
        let controller = controller(index);

        controller.refresh_sightings(at).await.unwrap();
        assert_eq!(controller.finish_active().await, Some(1));
        assert_eq!(
            annotations(&controller),
            vec![Annotation::creature(CreatureId::new(7).unwrap(), at)]
        );
    }

    #[tokio::test]
    async fn new_refresh_cancels_previous_query() {
        let index = ScriptedIndex {
            hold_open: true,
            ..ScriptedIndex::default()
        };
        let controller = controller(index);

        controller.refresh_sightings(Coordinate::new(1.0, 1.0)).await.unwrap();
        controller.refresh_sightings(Coordinate::new(2.0, 2.0)).await.unwrap();
        assert_eq!(controller.active_center(), Some(Coordinate::new(2.0, 2.0)));

        // Aborted task drops its query, which runs the cancel hook
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.index().cancellations.load(Ordering::SeqCst), 1);

        controller.cancel_active();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.index().cancellations.load(Ordering::SeqCst), 2);
        assert_eq!(controller.active_center(), None);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let controller = controller(ScriptedIndex::default().fail_first(2));
        controller.spawn_random_sighting().await.unwrap();
        assert_eq!(controller.index().writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let controller = controller(ScriptedIndex::default().fail_first(3));
        let err = controller.refresh_sightings(Coordinate::new(0.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, SightingError::Index(GeoIndexError::Unavailable(_))));
        assert!(controller.active_center().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_index_times_out_after_every_attempt() {
        let index = ScriptedIndex {
            stall_queries: true,
            ..ScriptedIndex::default()
        };
        let controller = controller(index);

        let started = tokio::time::Instant::now();
        let err = controller.refresh_sightings(Coordinate::new(0.0, 0.0)).await.unwrap_err();
        match err {
            SightingError::Index(GeoIndexError::Timeout { operation, after }) => {
                assert_eq!(operation, "query");
                assert_eq!(after, Duration::from_millis(200));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        // first try plus two retries, each waiting out the full timeout
        assert_eq!(controller.index().query_attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert!(controller.active_center().is_none());
    }

    #[tokio::test]
    async fn spawn_then_refresh_against_memory_index() {
        let controller = controller(MemoryGeoIndex::new());
        let center = Coordinate::new(40.0, -73.0);
        lock(&controller.viewport).on_location_update(center);

        let sighting = controller.spawn_random_sighting().await.unwrap();
        controller.refresh_sightings(center).await.unwrap();
        assert_eq!(controller.index().active_queries(), 1);

        // Memory queries stay live, so poll until the discovery lands
        for _ in 0..50 {
            if !annotations(&controller).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            annotations(&controller),
            vec![Annotation::creature(sighting.creature, center)]
        );

        controller.cancel_active();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.index().active_queries(), 0);
    }

    #[test]
    fn only_entered_events_become_annotations() {
        let at = Coordinate::new(0.0, 0.0);
        let moved = KeyEvent {
            kind: KeyEventKind::Moved,
            key: "3".into(),
            location: at,
        };
        assert_eq!(annotation_for(&moved).unwrap(), None);
        assert!(annotation_for(&KeyEvent::entered("x", at)).is_err());
    }
}
