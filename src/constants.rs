// Port configuration
pub const DEFAULT_PORT: u16 = 3001;

// Creature catalog: ids are 1..=CREATURE_CATALOG_SIZE
pub const CREATURE_CATALOG_SIZE: u16 = 151;

// Distances
pub const CENTER_REGION_METERS: f64 = 2000.0;
pub const QUERY_RADIUS_KM: f64 = 2.5;
pub const ROUTE_SPAN_METERS: f64 = 1000.0;
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

// Geospatial index calls
pub const INDEX_TIMEOUT_MS: u64 = 5000;
pub const INDEX_RETRIES: u32 = 2;
pub const MAX_INDEX_RETRIES: u32 = 10;
pub const INDEX_RETRY_BACKOFF_MS: u64 = 250;

// Annotation views
pub const USER_REUSE_ID: &str = "User";
pub const CREATURE_REUSE_ID: &str = "Pokemon";
pub const USER_ICON: &str = "ash";
pub const ROUTE_ACTION_ICON: &str = "map";
pub const ROUTE_ACTION_SIZE: u32 = 30;
pub const SIGHTING_DISPLAY_NAME: &str = "Pokemon Sighting";

// Snapshot of the in-process index
pub const SNAPSHOT_FILE: &str = "sightings_v1.bin";
pub const SNAPSHOT_VERSION: u32 = 1;

// SSE
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
pub const HEARTBEAT_SECS: u64 = 30;
