//! Playback scenarios for deterministic simulation.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// PLAY-001: Full preload, select a rover, follow it
    Nominal,

    /// PLAY-002: One model fails to load; the rest still plays
    MissingModel,

    /// PLAY-003: A second selection lands before the first
    FlightSupersession,

    /// PLAY-004: Reload served from the session cache, quota exhaustion tolerated
    CacheReload,

    /// PLAY-005: Frozen clock leaves armed proxies in place
    ClockPause,

    /// PLAY-006: Clock outside a track's availability hides its proxy
    OutOfRange,

    /// PLAY-007: The scene cannot be created
    SceneFailure,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nominal,
            ScenarioId::MissingModel,
            ScenarioId::FlightSupersession,
            ScenarioId::CacheReload,
            ScenarioId::ClockPause,
            ScenarioId::OutOfRange,
            ScenarioId::SceneFailure,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::MissingModel => "missing_model",
            ScenarioId::FlightSupersession => "flight_supersession",
            ScenarioId::CacheReload => "cache_reload",
            ScenarioId::ClockPause => "clock_pause",
            ScenarioId::OutOfRange => "out_of_range",
            ScenarioId::SceneFailure => "scene_failure",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "Preload to 100%, select a rover and track it frame by frame",
            ScenarioId::MissingModel => "One vehicle model rejects; progress still reaches 100%",
            ScenarioId::FlightSupersession => "Select A then B mid-flight; only B arms",
            ScenarioId::CacheReload => "Second preload fetches nothing; quota misses stay non-fatal",
            ScenarioId::ClockPause => "Paused clock freezes poses, resume continues playback",
            ScenarioId::OutOfRange => "Proxy hides outside availability and keeps its last pose",
            ScenarioId::SceneFailure => "Scene factory fails; viewer reports a fatal error",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominal" | "play-001" => Ok(ScenarioId::Nominal),
            "missing_model" | "missingmodel" | "play-002" => Ok(ScenarioId::MissingModel),
            "flight_supersession" | "supersession" | "play-003" => {
                Ok(ScenarioId::FlightSupersession)
            }
            "cache_reload" | "cachereload" | "play-004" => Ok(ScenarioId::CacheReload),
            "clock_pause" | "clockpause" | "play-005" => Ok(ScenarioId::ClockPause),
            "out_of_range" | "outofrange" | "play-006" => Ok(ScenarioId::OutOfRange),
            "scene_failure" | "scenefailure" | "play-007" => Ok(ScenarioId::SceneFailure),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
