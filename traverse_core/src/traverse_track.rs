//! The "TIME" Engine - Track Model & Time Interpolation
//!
//! Holds every loaded trajectory as an immutable, time-ordered Track and
//! answers "where is entity E, and how is it oriented, at time T".
//!
//! The Track Model's job is only to pick the bounding samples for a query
//! time; the interpolation kernel itself sits behind the `Interpolator` trait
//! so a scene can supply its own.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use traverse_env::{EntityId, Pose, Timestamp};

/// Length of one Martian solar day in seconds.
pub const SOL_SECONDS: f64 = 88_775.244;

// ============================================================================
// DATA MODEL
// ============================================================================

/// Closed time interval `[start, stop]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Timestamp,
    pub stop: Timestamp,
}

impl TimeInterval {
    /// Creates an interval, rejecting `start > stop` and non-finite bounds.
    pub fn new(start: Timestamp, stop: Timestamp) -> Result<Self, TrackError> {
        if !start.is_finite() || !stop.is_finite() || start > stop {
            return Err(TrackError::InvalidInterval { start, stop });
        }
        Ok(Self { start, stop })
    }

    /// Whether `time` lies inside the interval (bounds included).
    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && time <= self.stop
    }

    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }
}

/// One recorded trajectory point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: Timestamp,
    pub position: Vector3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
}

impl Sample {
    pub fn new(time: Timestamp, position: Vector3<f64>) -> Self {
        Self {
            time,
            position,
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// The sample's pose, unmodified.
    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            orientation: self.orientation,
        }
    }
}

/// Origin used to convert elapsed time into mission day labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolOrigin {
    /// Time at which `start_index` begins
    pub start_time: Timestamp,

    /// Index of the day starting at `start_time`
    pub start_index: i64,
}

/// Continuous pose function for analytic tracks.
pub type PoseFn = Arc<dyn Fn(Timestamp) -> Pose + Send + Sync>;

/// How a Track stores its path.
#[derive(Clone)]
pub enum TrackPath {
    /// Discrete samples, strictly increasing in time
    Sampled(Vec<Sample>),

    /// Continuous function of time
    Analytic(PoseFn),
}

impl std::fmt::Debug for TrackPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackPath::Sampled(samples) => write!(f, "Sampled({} samples)", samples.len()),
            TrackPath::Analytic(_) => f.write_str("Analytic(..)"),
        }
    }
}

/// The samples bounding a query time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket<'a> {
    /// The query time equals a sample time (or lies beyond the end samples)
    Exact(&'a Sample),

    /// The query time lies strictly between two samples
    Between(&'a Sample, &'a Sample),
}

/// Immutable trajectory of one animated entity.
#[derive(Debug, Clone)]
pub struct Track {
    entity_id: EntityId,
    availability: TimeInterval,
    path: TrackPath,
    sol_origin: Option<SolOrigin>,
}

impl Track {
    /// Builds a sampled track.
    ///
    /// When `availability` is `None` it spans the first to the last sample.
    /// Samples must be finite, strictly increasing in time, and inside the
    /// availability interval.
    pub fn sampled(
        entity_id: EntityId,
        availability: Option<TimeInterval>,
        samples: Vec<Sample>,
    ) -> Result<Self, TrackError> {
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => return Err(TrackError::EmptyTrack(entity_id)),
        };

        for (index, sample) in samples.iter().enumerate() {
            let finite = sample.time.is_finite() && sample.position.iter().all(|c| c.is_finite());
            if !finite {
                return Err(TrackError::NonFiniteSample { entity_id, index });
            }
        }

        if let Some(index) = samples
            .windows(2)
            .position(|pair| pair[1].time <= pair[0].time)
        {
            return Err(TrackError::NonMonotonicSamples {
                entity_id,
                index: index + 1,
            });
        }

        // Fields are public, so a hand-built interval is checked again here
        let availability = match availability {
            Some(interval) => TimeInterval::new(interval.start, interval.stop)?,
            None => TimeInterval::new(first, last)?,
        };

        if let Some(outside) = samples.iter().find(|s| !availability.contains(s.time)) {
            return Err(TrackError::SampleOutsideAvailability {
                entity_id,
                time: outside.time,
            });
        }

        Ok(Self {
            entity_id,
            availability,
            path: TrackPath::Sampled(samples),
            sol_origin: None,
        })
    }

    /// Builds a track from a continuous pose function.
    pub fn analytic(
        entity_id: EntityId,
        availability: TimeInterval,
        pose_fn: PoseFn,
    ) -> Result<Self, TrackError> {
        let availability = TimeInterval::new(availability.start, availability.stop)?;
        Ok(Self {
            entity_id,
            availability,
            path: TrackPath::Analytic(pose_fn),
            sol_origin: None,
        })
    }

    /// Sets the origin used for day labels.
    pub fn with_sol_origin(mut self, origin: SolOrigin) -> Self {
        self.sol_origin = Some(origin);
        self
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn availability(&self) -> TimeInterval {
        self.availability
    }

    pub fn path(&self) -> &TrackPath {
        &self.path
    }

    /// Recorded samples (empty for analytic tracks).
    pub fn samples(&self) -> &[Sample] {
        match &self.path {
            TrackPath::Sampled(samples) => samples,
            TrackPath::Analytic(_) => &[],
        }
    }

    /// Label origin, defaulting to day 0 at `availability.start`.
    pub fn sol_origin(&self) -> SolOrigin {
        self.sol_origin.unwrap_or(SolOrigin {
            start_time: self.availability.start,
            start_index: 0,
        })
    }

    /// Finds the samples bounding `time`.
    ///
    /// Times before the first (after the last) sample bracket to that sample.
    /// Returns `None` outside availability or for analytic tracks.
    pub fn bracket(&self, time: Timestamp) -> Option<Bracket<'_>> {
        if !self.availability.contains(time) {
            return None;
        }

        let samples = match &self.path {
            TrackPath::Sampled(samples) => samples,
            TrackPath::Analytic(_) => return None,
        };

        // First index whose time is >= query
        let idx = samples.partition_point(|s| s.time < time);

        if idx == samples.len() {
            return samples.last().map(Bracket::Exact);
        }
        if samples[idx].time == time || idx == 0 {
            return Some(Bracket::Exact(&samples[idx]));
        }
        Some(Bracket::Between(&samples[idx - 1], &samples[idx]))
    }

    /// Pose valid at `time`, or `None` when `time` is outside availability.
    ///
    /// `None` is not an error: the caller must skip the pose update for this
    /// tick.
    pub fn sample_at(&self, time: Timestamp, interpolator: &dyn Interpolator) -> Option<Pose> {
        if !self.availability.contains(time) {
            return None;
        }

        match &self.path {
            TrackPath::Analytic(pose_fn) => Some(pose_fn(time)),
            TrackPath::Sampled(_) => match self.bracket(time)? {
                Bracket::Exact(sample) => Some(sample.pose()),
                Bracket::Between(before, after) => {
                    Some(interpolator.interpolate(before, after, time))
                }
            },
        }
    }

    /// Mission day index at `time`.
    ///
    /// `start_index + floor(elapsed / SOL_SECONDS)`, with elapsed time before
    /// the origin clamped to zero.
    pub fn time_to_index(&self, time: Timestamp) -> i64 {
        let origin = self.sol_origin();
        let elapsed = (time - origin.start_time).max(0.0);
        origin.start_index + (elapsed / SOL_SECONDS).floor() as i64
    }

    /// Human-readable day label, e.g. `"Sol 42"`.
    pub fn time_to_label(&self, time: Timestamp) -> String {
        format!("Sol {}", self.time_to_index(time))
    }
}

// ============================================================================
// INTERPOLATION
// ============================================================================

/// Interpolation kernel applied between two bounding samples.
pub trait Interpolator: Send + Sync {
    /// Computes the pose at `time`, where `before.time < time < after.time`.
    fn interpolate(&self, before: &Sample, after: &Sample, time: Timestamp) -> Pose;
}

/// Linear position, spherical-linear orientation.
///
/// When only one of the bounding samples carries an orientation, the
/// earlier sample's orientation is held.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl Interpolator for LinearInterpolator {
    fn interpolate(&self, before: &Sample, after: &Sample, time: Timestamp) -> Pose {
        let span = after.time - before.time;
        let t = if span > 0.0 {
            ((time - before.time) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let position = before.position.lerp(&after.position, t);
        let orientation = match (before.orientation, after.orientation) {
            (Some(a), Some(b)) => Some(a.try_slerp(&b, t, 1e-9).unwrap_or(a)),
            (a, _) => a,
        };

        Pose {
            position,
            orientation,
        }
    }
}

// ============================================================================
// TRACK MODEL
// ============================================================================

/// Owner of every loaded Track, keyed by entity.
///
/// Tracks are handed out as `Arc<Track>` so that the Synchronizer references
/// them without copying.
pub struct TrackModel {
    tracks: HashMap<EntityId, Arc<Track>>,
    interpolator: Arc<dyn Interpolator>,
}

impl TrackModel {
    /// Creates an empty model with the linear kernel.
    pub fn new() -> Self {
        Self::with_interpolator(Arc::new(LinearInterpolator))
    }

    /// Creates an empty model using a scene-supplied kernel.
    pub fn with_interpolator(interpolator: Arc<dyn Interpolator>) -> Self {
        Self {
            tracks: HashMap::new(),
            interpolator,
        }
    }

    /// Registers a track, returning the one it replaced.
    pub fn insert(&mut self, track: Track) -> Option<Arc<Track>> {
        self.tracks
            .insert(track.entity_id().clone(), Arc::new(track))
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<Arc<Track>> {
        self.tracks.get(entity_id).cloned()
    }

    pub fn interpolator(&self) -> Arc<dyn Interpolator> {
        Arc::clone(&self.interpolator)
    }

    /// Pose of `entity_id` at `time`; `None` for unknown entities or times
    /// outside availability.
    pub fn sample_at(&self, entity_id: &EntityId, time: Timestamp) -> Option<Pose> {
        self.tracks
            .get(entity_id)?
            .sample_at(time, self.interpolator.as_ref())
    }

    /// Day label of `entity_id` at `time`.
    pub fn time_to_label(&self, entity_id: &EntityId, time: Timestamp) -> Result<String, TrackError> {
        self.tracks
            .get(entity_id)
            .map(|track| track.time_to_label(time))
            .ok_or_else(|| TrackError::UnknownEntity(entity_id.clone()))
    }

    /// Entity ids in sorted order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.tracks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drops every track (viewer unmount).
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

impl Default for TrackModel {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while building or querying tracks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("Invalid interval: start {start} > stop {stop}")]
    InvalidInterval { start: Timestamp, stop: Timestamp },

    #[error("Track {0} has no samples")]
    EmptyTrack(EntityId),

    #[error("Track {entity_id}: sample {index} is not after its predecessor")]
    NonMonotonicSamples { entity_id: EntityId, index: usize },

    #[error("Track {entity_id}: sample {index} is not finite")]
    NonFiniteSample { entity_id: EntityId, index: usize },

    #[error("Track {entity_id}: sample at {time} lies outside availability")]
    SampleOutsideAvailability { entity_id: EntityId, time: Timestamp },

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::FRAC_PI_2;

    fn rover() -> EntityId {
        EntityId::from("curiosity")
    }

    fn straight_track() -> Track {
        let samples = vec![
            Sample::new(10.0, Vector3::new(0.0, 0.0, 0.0))
                .with_orientation(UnitQuaternion::identity()),
            Sample::new(20.0, Vector3::new(10.0, 0.0, 0.0))
                .with_orientation(UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2)),
            Sample::new(30.0, Vector3::new(10.0, 10.0, 0.0)),
        ];
        Track::sampled(rover(), None, samples).unwrap()
    }

    #[test]
    fn test_availability_derived_from_samples() {
        let track = straight_track();
        assert_eq!(track.availability(), TimeInterval { start: 10.0, stop: 30.0 });
    }

    #[test]
    fn test_sample_at_start_is_first_sample_unmodified() {
        let track = straight_track();
        let pose = track.sample_at(10.0, &LinearInterpolator).unwrap();
        assert_eq!(pose, track.samples()[0].pose());
    }

    #[test]
    fn test_sample_at_exact_interior_time() {
        let track = straight_track();
        let pose = track.sample_at(20.0, &LinearInterpolator).unwrap();
        assert_eq!(pose, track.samples()[1].pose());
    }

    #[test]
    fn test_sample_at_stop() {
        let track = straight_track();
        let pose = track.sample_at(30.0, &LinearInterpolator).unwrap();
        assert_eq!(pose.position, Vector3::new(10.0, 10.0, 0.0));
    }

    #[test]
    fn test_sample_outside_availability_is_none() {
        let track = straight_track();
        assert!(track.sample_at(9.999, &LinearInterpolator).is_none());
        assert!(track.sample_at(30.001, &LinearInterpolator).is_none());
    }

    #[test]
    fn test_linear_interpolation_between_samples() {
        let track = straight_track();
        let pose = track.sample_at(15.0, &LinearInterpolator).unwrap();
        assert_relative_eq!(pose.position.x, 5.0, epsilon = 1e-12);

        let yaw = pose.orientation.unwrap().euler_angles().2;
        assert_relative_eq!(yaw, FRAC_PI_2 / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_orientation_held_when_one_side_missing() {
        let track = straight_track();
        let pose = track.sample_at(25.0, &LinearInterpolator).unwrap();
        assert_eq!(pose.orientation, track.samples()[1].orientation);
        assert_relative_eq!(pose.position.y, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bracket_selection() {
        let track = straight_track();
        match track.bracket(12.0).unwrap() {
            Bracket::Between(a, b) => {
                assert_eq!(a.time, 10.0);
                assert_eq!(b.time, 20.0);
            }
            other => panic!("expected Between, got {other:?}"),
        }
        assert!(matches!(track.bracket(20.0), Some(Bracket::Exact(s)) if s.time == 20.0));
    }

    #[test]
    fn test_wider_availability_holds_end_samples() {
        let samples = vec![
            Sample::new(5.0, Vector3::new(1.0, 0.0, 0.0)),
            Sample::new(6.0, Vector3::new(2.0, 0.0, 0.0)),
        ];
        let availability = TimeInterval::new(0.0, 10.0).unwrap();
        let track = Track::sampled(rover(), Some(availability), samples).unwrap();

        assert_eq!(track.sample_at(0.0, &LinearInterpolator).unwrap().position.x, 1.0);
        assert_eq!(track.sample_at(9.0, &LinearInterpolator).unwrap().position.x, 2.0);
    }

    #[test]
    fn test_rejects_non_monotonic_samples() {
        let samples = vec![
            Sample::new(1.0, Vector3::zeros()),
            Sample::new(1.0, Vector3::zeros()),
        ];
        let err = Track::sampled(rover(), None, samples).unwrap_err();
        assert_eq!(err, TrackError::NonMonotonicSamples { entity_id: rover(), index: 1 });
    }

    #[test]
    fn test_rejects_sample_outside_availability() {
        let samples = vec![Sample::new(50.0, Vector3::zeros())];
        let availability = TimeInterval::new(0.0, 10.0).unwrap();
        let err = Track::sampled(rover(), Some(availability), samples).unwrap_err();
        assert!(matches!(err, TrackError::SampleOutsideAvailability { time, .. } if time == 50.0));
    }

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert_eq!(
            Track::sampled(rover(), None, vec![]).unwrap_err(),
            TrackError::EmptyTrack(rover())
        );
        assert!(TimeInterval::new(2.0, 1.0).is_err());
    }

    #[test]
    fn test_constructors_reject_hand_built_inverted_interval() {
        let inverted = TimeInterval {
            start: 5.0,
            stop: 1.0,
        };
        let samples = vec![Sample::new(2.0, Vector3::zeros())];
        assert_eq!(
            Track::sampled(rover(), Some(inverted), samples).unwrap_err(),
            TrackError::InvalidInterval { start: 5.0, stop: 1.0 }
        );

        let err = Track::analytic(rover(), inverted, Arc::new(|_| Pose::new(Vector3::zeros())))
            .unwrap_err();
        assert_eq!(err, TrackError::InvalidInterval { start: 5.0, stop: 1.0 });
    }

    #[test]
    fn test_analytic_track() {
        let availability = TimeInterval::new(0.0, 100.0).unwrap();
        let track = Track::analytic(
            rover(),
            availability,
            Arc::new(|t| Pose::new(Vector3::new(t * 2.0, 0.0, 0.0))),
        )
        .unwrap();

        let pose = track.sample_at(21.0, &LinearInterpolator).unwrap();
        assert_eq!(pose.position.x, 42.0);
        assert!(track.sample_at(101.0, &LinearInterpolator).is_none());
        assert!(track.samples().is_empty());
    }

    #[test]
    fn test_time_to_label_boundaries() {
        let track = straight_track().with_sol_origin(SolOrigin {
            start_time: 0.0,
            start_index: 42,
        });

        assert_eq!(track.time_to_label(0.0), "Sol 42");
        assert_eq!(track.time_to_label(SOL_SECONDS - 0.001), "Sol 42");
        assert_eq!(track.time_to_label(SOL_SECONDS), "Sol 43");
        assert_eq!(track.time_to_label(2.5 * SOL_SECONDS), "Sol 44");
        // Before the origin clamps to the origin
        assert_eq!(track.time_to_label(-5.0), "Sol 42");
    }

    #[test]
    fn test_default_origin_is_day_zero_at_start() {
        let track = straight_track();
        assert_eq!(track.time_to_label(10.0), "Sol 0");
    }

    #[test]
    fn test_model_lookup() {
        let mut model = TrackModel::new();
        assert!(model.insert(straight_track()).is_none());
        assert!(model.insert(straight_track()).is_some());

        assert_eq!(model.len(), 1);
        assert!(model.sample_at(&rover(), 15.0).is_some());
        assert!(model.sample_at(&EntityId::from("spirit"), 15.0).is_none());
        assert_eq!(
            model.time_to_label(&EntityId::from("spirit"), 15.0),
            Err(TrackError::UnknownEntity(EntityId::from("spirit")))
        );

        model.clear();
        assert!(model.is_empty());
    }

    fn arb_track() -> impl Strategy<Value = Track> {
        (
            -1.0e6..1.0e6f64,
            prop::collection::vec((0.5..5_000.0f64, -1.0e3..1.0e3f64), 1..32),
            -100i64..5_000,
        )
            .prop_map(|(start, steps, start_index)| {
                let mut time = start;
                let samples = steps
                    .into_iter()
                    .map(|(dt, x)| {
                        time += dt;
                        Sample::new(time, Vector3::new(x, -x, 0.5 * x))
                    })
                    .collect();
                let track = Track::sampled(rover(), None, samples).unwrap();
                let origin = SolOrigin {
                    start_time: track.availability().start,
                    start_index,
                };
                track.with_sol_origin(origin)
            })
    }

    proptest! {
        #[test]
        fn prop_outside_availability_is_none(track in arb_track(), offset in 1.0e-3..1.0e7f64) {
            let availability = track.availability();
            prop_assert!(track.sample_at(availability.start - offset, &LinearInterpolator).is_none());
            prop_assert!(track.sample_at(availability.stop + offset, &LinearInterpolator).is_none());
        }

        #[test]
        fn prop_inside_availability_is_some(track in arb_track(), frac in 0.0..=1.0f64) {
            let availability = track.availability();
            let time = availability.start + frac * availability.duration();
            prop_assume!(availability.contains(time));
            prop_assert!(track.sample_at(time, &LinearInterpolator).is_some());
        }

        #[test]
        fn prop_labels_monotonic(
            track in arb_track(),
            mut times in prop::collection::vec(-1.0e7..1.0e8f64, 2..16),
        ) {
            times.sort_by(|a, b| a.total_cmp(b));
            let indices: Vec<i64> = times.iter().map(|t| track.time_to_index(*t)).collect();
            prop_assert!(indices.windows(2).all(|w| w[0] <= w[1]));

            let origin = track.sol_origin();
            prop_assert_eq!(
                track.time_to_label(track.availability().start),
                format!("Sol {}", origin.start_index)
            );
        }
    }
}
