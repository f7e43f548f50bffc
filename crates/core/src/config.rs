use crate::types::GeoPoint;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPUS_PRESENCE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub campus: CampusConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Fixed session lifetime; 4 hours.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_spot_radius_m")]
    pub spot_radius_m: f64,
    #[serde(default = "default_spot_window_secs")]
    pub spot_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_nearby_radius_m")]
    pub nearby_radius_m: f64,
    #[serde(default = "default_security_recipient")]
    pub campus_security: String,
    #[serde(default = "default_union_recipient")]
    pub student_union: String,
    #[serde(default = "default_clinic_recipient")]
    pub clinic: String,
    #[serde(default = "default_sms_sender_id")]
    pub sms_sender_id: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CryptoConfig {
    /// 32-byte hex key for sealing emergency contacts. Random per process
    /// when absent.
    #[serde(default)]
    pub contact_key_hex: Option<String>,
}

// Default functions
fn default_node_id() -> String {
    "presence-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_session_ttl_secs() -> u64 {
    4 * 60 * 60
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_retention_secs() -> u64 {
    24 * 60 * 60
}
fn default_spot_radius_m() -> f64 {
    150.0
}
fn default_spot_window_secs() -> u64 {
    600
}
fn default_queue_capacity() -> usize {
    64
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    90
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_attempt_timeout_ms() -> u64 {
    5000
}
fn default_dedup_window_secs() -> u64 {
    600
}
fn default_nearby_radius_m() -> f64 {
    500.0
}
fn default_security_recipient() -> String {
    "security@oauife.edu.ng".to_string()
}
fn default_union_recipient() -> String {
    "studentaffairs@oauife.edu.ng".to_string()
}
fn default_clinic_recipient() -> String {
    "healthcentre@oauife.edu.ng".to_string()
}
fn default_sms_sender_id() -> String {
    "OAU-BIKE".to_string()
}
fn default_email_from() -> String {
    "emergency@oauife.edu.ng".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            spot_radius_m: default_spot_radius_m(),
            spot_window_secs: default_spot_window_secs(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            dedup_window_secs: default_dedup_window_secs(),
            nearby_radius_m: default_nearby_radius_m(),
            campus_security: default_security_recipient(),
            student_union: default_union_recipient(),
            clinic: default_clinic_recipient(),
            sms_sender_id: default_sms_sender_id(),
            email_from: default_email_from(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            session: SessionConfig::default(),
            presence: PresenceConfig::default(),
            live: LiveConfig::default(),
            emergency: EmergencyConfig::default(),
            campus: CampusConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

// ─── Campus Geometry ────────────────────────────────────────────────────

/// A region on the map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeConfig {
    Circle { center: GeoPoint, radius_m: f64 },
    Polygon { vertices: Vec<GeoPoint> },
    /// Latitude/longitude box, inclusive on all sides.
    Rect { south_west: GeoPoint, north_east: GeoPoint },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub shape: ShapeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LandmarkConfig {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampusConfig {
    #[serde(default = "default_campus_name")]
    pub name: String,
    #[serde(default = "default_boundary")]
    pub boundary: ShapeConfig,
    /// Checked in order; the first match labels the point.
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,
    #[serde(default = "default_landmarks")]
    pub landmarks: Vec<LandmarkConfig>,
    /// Landmark ids where bike availability is rolled up.
    #[serde(default = "default_pickup_spots")]
    pub pickup_spots: Vec<String>,
}

fn default_campus_name() -> String { "Obafemi Awolowo University".to_string() }

fn default_boundary() -> ShapeConfig {
    ShapeConfig::Circle {
        center: GeoPoint::new(7.5227, 4.5198),
        radius_m: 5000.0,
    }
}

fn rect_zone(name: &str, south: f64, west: f64, north: f64, east: f64) -> ZoneConfig {
    ZoneConfig {
        name: name.to_string(),
        shape: ShapeConfig::Rect {
            south_west: GeoPoint::new(south, west),
            north_east: GeoPoint::new(north, east),
        },
    }
}

fn default_zones() -> Vec<ZoneConfig> {
    vec![
        rect_zone("Academic Zone", 7.5200, 4.5180, 7.5260, 4.5230),
        rect_zone("Student Residential Zone", 7.5260, 4.5120, 7.5320, 4.5180),
        rect_zone("Medical Zone", 7.5320, 4.5100, 7.5380, 4.5150),
        rect_zone("Sports & Recreation Zone", 7.5180, 4.5220, 7.5220, 4.5280),
    ]
}

fn landmark(id: &str, name: &str, kind: &str, lat: f64, lng: f64, description: &str) -> LandmarkConfig {
    LandmarkConfig {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        location: GeoPoint::new(lat, lng),
        description: description.to_string(),
    }
}

fn default_landmarks() -> Vec<LandmarkConfig> {
    vec![
        landmark("main_gate", "Main Gate", "entrance", 7.5227, 4.5198, "Primary campus entrance"),
        landmark("sub", "Student Union Building (SUB)", "building", 7.5245, 4.5203, "Student activities center"),
        landmark("oduduwa_hall", "Oduduwa Hall", "hall", 7.5234, 4.5189, "Main auditorium"),
        landmark("futa", "Faculty of Technology", "faculty", 7.5256, 4.5210, "Engineering and Technology faculty"),
        landmark("science_complex", "Science Complex", "faculty", 7.5240, 4.5220, "Pure and Applied Sciences"),
        landmark("arts_theatre", "Arts Theatre", "theatre", 7.5230, 4.5180, "Creative Arts faculty"),
        landmark("mozambique_hostel", "Mozambique Hostel", "hostel", 7.5280, 4.5167, "Student accommodation"),
        landmark("angola_hostel", "Angola Hostel", "hostel", 7.5289, 4.5134, "Student accommodation"),
        landmark("madagascar_hostel", "Madagascar Hostel", "hostel", 7.5295, 4.5145, "Student accommodation"),
        landmark("awolowo_hall", "Awolowo Hall", "hostel", 7.5270, 4.5150, "Premier student hall"),
        landmark("sports_complex", "Sports Complex", "sports", 7.5198, 4.5234, "Sports and recreational facilities"),
        landmark("teaching_hospital", "OAU Teaching Hospital (OAUTHC)", "hospital", 7.5345, 4.5123, "Medical center"),
        landmark("central_library", "Hezekiah Oluwasanmi Library", "library", 7.5250, 4.5200, "Main university library"),
        landmark("back_gate", "Back Gate", "entrance", 7.5320, 4.5180, "Secondary campus entrance"),
        landmark("coop_gate", "Cooperative Gate", "entrance", 7.5200, 4.5280, "Residential area entrance"),
        landmark("buka_junction", "Buka Junction", "food", 7.5260, 4.5190, "Popular food court area"),
        landmark("atm_point", "Banking Complex", "service", 7.5235, 4.5195, "ATMs and banking services"),
        landmark("chapel_of_wisdom", "Chapel of Wisdom", "religious", 7.5225, 4.5175, "University chapel"),
    ]
}

fn default_pickup_spots() -> Vec<String> {
    ["main_gate", "sub", "back_gate", "coop_gate", "buka_junction", "mozambique_hostel"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for CampusConfig {
    fn default() -> Self {
        Self {
            name: default_campus_name(),
            boundary: default_boundary(),
            zones: default_zones(),
            landmarks: default_landmarks(),
            pickup_spots: default_pickup_spots(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional
    /// TOML file. Environment values win over the file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CAMPUS_PRESENCE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;
        config.try_deserialize()
    }
}
