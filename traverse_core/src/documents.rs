//! Decoding of trajectory documents and landmark collections.
//!
//! Trajectories arrive as CZML-like packet arrays with flat sampled
//! properties:
//!
//! ```text
//! [
//!   { "id": "document" },
//!   { "id": "curiosity",
//!     "availability": [0.0, 3600.0],
//!     "position":    { "epoch": 0.0, "cartesian":      [t, x, y, z, t, x, y, z, ...] },
//!     "orientation": { "epoch": 0.0, "unitQuaternion": [t, x, y, z, w, ...] },
//!     "solOrigin":   { "startTime": 0.0, "startIndex": 1 } }
//! ]
//! ```
//!
//! Landmarks arrive as a GeoJSON-like feature collection of points.

use crate::traverse_track::{Sample, SolOrigin, TimeInterval, Track, TrackError};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::borrow::Cow;
use tracing::debug;
use traverse_env::{AssetPayload, EntityId, Timestamp};

const POSITION_STRIDE: usize = 4;
const ORIENTATION_STRIDE: usize = 5;

// ============================================================================
// TRAJECTORIES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PacketList {
    Many(Vec<Packet>),
    One(Box<Packet>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Packet {
    id: String,
    #[serde(default)]
    availability: Option<[f64; 2]>,
    #[serde(default)]
    position: Option<SampledPosition>,
    #[serde(default)]
    orientation: Option<SampledOrientation>,
    #[serde(default)]
    sol_origin: Option<SolOrigin>,
}

#[derive(Debug, Deserialize)]
struct SampledPosition {
    #[serde(default)]
    epoch: f64,
    cartesian: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampledOrientation {
    #[serde(default)]
    epoch: f64,
    unit_quaternion: Vec<f64>,
}

/// Decodes every track in a trajectory document.
///
/// Packets without a `position` property (such as the leading `document`
/// packet) are skipped.
pub fn decode_trajectory_document(doc: &Value) -> Result<Vec<Track>, DocumentError> {
    let packets = match PacketList::deserialize(doc) {
        Ok(PacketList::Many(packets)) => packets,
        Ok(PacketList::One(packet)) => vec![*packet],
        Err(e) => return Err(DocumentError::Malformed(e.to_string())),
    };

    let mut tracks = Vec::new();
    for packet in packets {
        let Some(position) = &packet.position else {
            debug!("Skipping packet {} without position", packet.id);
            continue;
        };
        tracks.push(decode_packet(&packet, position)?);
    }
    Ok(tracks)
}

fn decode_packet(packet: &Packet, position: &SampledPosition) -> Result<Track, DocumentError> {
    let entity_id = EntityId::new(packet.id.clone());

    if position.cartesian.len() % POSITION_STRIDE != 0 {
        return Err(DocumentError::BadStride {
            id: packet.id.clone(),
            property: "position.cartesian",
            len: position.cartesian.len(),
            stride: POSITION_STRIDE,
        });
    }

    let orientations = match &packet.orientation {
        Some(orientation) => decode_orientations(&packet.id, orientation)?,
        None => Vec::new(),
    };

    let samples = position
        .cartesian
        .chunks_exact(POSITION_STRIDE)
        .map(|c| {
            let time = position.epoch + c[0];
            let sample = Sample::new(time, Vector3::new(c[1], c[2], c[3]));
            match orientation_at(&orientations, time) {
                Some(q) => sample.with_orientation(q),
                None => sample,
            }
        })
        .collect();

    let availability = packet
        .availability
        .map(|[start, stop]| TimeInterval::new(start, stop))
        .transpose()?;

    let track = Track::sampled(entity_id, availability, samples)?;
    Ok(match packet.sol_origin {
        Some(origin) => track.with_sol_origin(origin),
        None => track,
    })
}

fn decode_orientations(
    id: &str,
    orientation: &SampledOrientation,
) -> Result<Vec<(Timestamp, UnitQuaternion<f64>)>, DocumentError> {
    if orientation.unit_quaternion.len() % ORIENTATION_STRIDE != 0 {
        return Err(DocumentError::BadStride {
            id: id.to_string(),
            property: "orientation.unitQuaternion",
            len: orientation.unit_quaternion.len(),
            stride: ORIENTATION_STRIDE,
        });
    }

    Ok(orientation
        .unit_quaternion
        .chunks_exact(ORIENTATION_STRIDE)
        .map(|c| {
            // Stored as [t, x, y, z, w]
            let q = Quaternion::new(c[4], c[1], c[2], c[3]);
            (orientation.epoch + c[0], UnitQuaternion::from_quaternion(q))
        })
        .collect())
}

/// Orientation at `time`, slerped between the bounding orientation samples
/// and held beyond either end.
fn orientation_at(
    orientations: &[(Timestamp, UnitQuaternion<f64>)],
    time: Timestamp,
) -> Option<UnitQuaternion<f64>> {
    let idx = orientations.partition_point(|(t, _)| *t < time);
    if idx == orientations.len() {
        return orientations.last().map(|(_, q)| *q);
    }

    let (t1, q1) = orientations[idx];
    if t1 == time || idx == 0 {
        return Some(q1);
    }

    let (t0, q0) = orientations[idx - 1];
    let t = (time - t0) / (t1 - t0);
    Some(q0.try_slerp(&q1, t, 1e-9).unwrap_or(q0))
}

/// Encodes tracks into a trajectory document that
/// `decode_trajectory_document` accepts.
pub fn encode_trajectory_document(tracks: &[Track]) -> Value {
    let mut packets = vec![json!({ "id": "document", "version": "1.0" })];

    for track in tracks {
        let availability = track.availability();
        let samples = track.samples();

        let cartesian: Vec<f64> = samples
            .iter()
            .flat_map(|s| [s.time, s.position.x, s.position.y, s.position.z])
            .collect();

        let mut packet = json!({
            "id": track.entity_id().as_str(),
            "availability": [availability.start, availability.stop],
            "position": { "epoch": 0.0, "cartesian": cartesian },
            "solOrigin": track.sol_origin(),
        });

        let unit_quaternion: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.orientation.map(|q| (s.time, q)))
            .flat_map(|(t, q)| [t, q.i, q.j, q.k, q.w])
            .collect();
        if !unit_quaternion.is_empty() {
            packet["orientation"] = json!({ "epoch": 0.0, "unitQuaternion": unit_quaternion });
        }

        packets.push(packet);
    }

    Value::Array(packets)
}

// ============================================================================
// LANDMARKS
// ============================================================================

/// A named point of interest the camera can fly to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: String,
    pub name: String,
    pub position: Vector3<f64>,

    /// Radius of the bounding sphere framed by the camera (meters)
    pub radius: f64,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

/// Decodes the point features of a feature collection into landmarks.
///
/// Non-point features are skipped. Features without a `radius` property get
/// `default_radius`.
pub fn decode_landmark_collection(
    doc: &Value,
    default_radius: f64,
) -> Result<Vec<Landmark>, DocumentError> {
    let collection = FeatureCollection::deserialize(doc)
        .map_err(|e| DocumentError::Malformed(e.to_string()))?;

    let mut landmarks = Vec::new();
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        if geometry.kind != "Point" {
            debug!("Skipping {} feature at index {}", geometry.kind, index);
            continue;
        }

        let coords: Vec<f64> = serde_json::from_value(geometry.coordinates)
            .map_err(|e| DocumentError::Malformed(format!("feature {index}: {e}")))?;
        let position = match coords.as_slice() {
            [x, y] => Vector3::new(*x, *y, 0.0),
            [x, y, z, ..] => Vector3::new(*x, *y, *z),
            _ => {
                return Err(DocumentError::Malformed(format!(
                    "feature {index}: point needs 2 or 3 coordinates"
                )))
            }
        };

        let id = feature
            .properties
            .get("id")
            .or(feature.id.as_ref())
            .map(value_to_string)
            .unwrap_or_else(|| format!("landmark-{index}"));
        let name = feature
            .properties
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());
        let radius = feature
            .properties
            .get("radius")
            .and_then(Value::as_f64)
            .unwrap_or(default_radius);

        landmarks.push(Landmark {
            id,
            name,
            position,
            radius,
        });
    }
    Ok(landmarks)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads a payload as JSON, parsing raw bytes if needed.
pub fn payload_json<'a>(
    key: &str,
    payload: &'a AssetPayload,
) -> Result<Cow<'a, Value>, DocumentError> {
    match payload {
        AssetPayload::Json(value) => Ok(Cow::Borrowed(value)),
        AssetPayload::Bytes(bytes) => serde_json::from_slice(bytes)
            .map(Cow::Owned)
            .map_err(|_| DocumentError::NotJson(key.to_string())),
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while decoding documents.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Packet {id}: {property} has {len} values, not a multiple of {stride}")]
    BadStride {
        id: String,
        property: &'static str,
        len: usize,
        stride: usize,
    },

    #[error("Asset {0} is not a JSON document")]
    NotJson(String),

    #[error(transparent)]
    Track(#[from] TrackError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::traverse_track::LinearInterpolator;

    fn sample_doc() -> Value {
        json!([
            { "id": "document", "version": "1.0" },
            {
                "id": "curiosity",
                "availability": [100.0, 400.0],
                "position": {
                    "epoch": 100.0,
                    "cartesian": [0.0, 0.0, 0.0, 0.0, 100.0, 10.0, 0.0, 0.0, 300.0, 10.0, 20.0, 0.0]
                },
                "orientation": {
                    "epoch": 100.0,
                    "unitQuaternion": [0.0, 0.0, 0.0, 0.0, 1.0]
                },
                "solOrigin": { "startTime": 100.0, "startIndex": 7 }
            },
            {
                "id": "perseverance",
                "position": { "cartesian": [5.0, 1.0, 1.0, 1.0, 6.0, 2.0, 2.0, 2.0] }
            }
        ])
    }

    #[test]
    fn test_decode_trajectory_document() {
        let tracks = decode_trajectory_document(&sample_doc()).unwrap();
        assert_eq!(tracks.len(), 2);

        let curiosity = &tracks[0];
        assert_eq!(curiosity.entity_id().as_str(), "curiosity");
        assert_eq!(curiosity.availability(), TimeInterval { start: 100.0, stop: 400.0 });
        assert_eq!(curiosity.samples().len(), 3);
        assert_eq!(curiosity.samples()[1].time, 200.0);
        assert_eq!(curiosity.samples()[2].orientation, Some(UnitQuaternion::identity()));
        assert_eq!(curiosity.time_to_label(100.0), "Sol 7");

        let perseverance = &tracks[1];
        assert_eq!(perseverance.availability(), TimeInterval { start: 5.0, stop: 6.0 });
        assert!(perseverance.samples()[0].orientation.is_none());
    }

    #[test]
    fn test_decode_single_packet() {
        let doc = json!({
            "id": "sojourner",
            "position": { "cartesian": [0.0, 1.0, 2.0, 3.0] }
        });
        let tracks = decode_trajectory_document(&doc).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].samples()[0].position, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_decode_rejects_bad_stride() {
        let doc = json!([{ "id": "x", "position": { "cartesian": [0.0, 1.0, 2.0] } }]);
        let err = decode_trajectory_document(&doc).unwrap_err();
        assert!(matches!(err, DocumentError::BadStride { len: 3, stride: 4, .. }));
    }

    #[test]
    fn test_decode_propagates_track_errors() {
        let doc = json!([{
            "id": "x",
            "position": { "cartesian": [5.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0] }
        }]);
        let err = decode_trajectory_document(&doc).unwrap_err();
        assert!(matches!(err, DocumentError::Track(TrackError::NonMonotonicSamples { .. })));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_trajectory_document(&json!("not a document")),
            Err(DocumentError::Malformed(_))
        ));
    }

    #[test]
    fn test_orientation_resampled_onto_position_times() {
        let doc = json!([{
            "id": "rover",
            "position": { "cartesian": [0.0, 0.0, 0.0, 0.0, 5.0, 1.0, 0.0, 0.0, 10.0, 2.0, 0.0, 0.0] },
            "orientation": {
                "unitQuaternion": [
                    0.0, 0.0, 0.0, 0.0, 1.0,
                    10.0, 0.0, 0.0, 0.7071067811865476, 0.7071067811865476
                ]
            }
        }]);
        let tracks = decode_trajectory_document(&doc).unwrap();
        let mid = tracks[0].samples()[1].orientation.unwrap();
        assert_relative_eq!(mid.angle(), std::f64::consts::FRAC_PI_4, epsilon = 1e-9);
    }

    #[test]
    fn test_encode_decode_preserves_poses() {
        let tracks = decode_trajectory_document(&sample_doc()).unwrap();
        let reencoded = decode_trajectory_document(&encode_trajectory_document(&tracks)).unwrap();

        assert_eq!(reencoded.len(), tracks.len());
        for (a, b) in tracks.iter().zip(&reencoded) {
            assert_eq!(a.availability(), b.availability());
            assert_eq!(a.sol_origin(), b.sol_origin());
            for t in [a.availability().start, a.availability().stop] {
                let pa = a.sample_at(t, &LinearInterpolator).unwrap();
                let pb = b.sample_at(t, &LinearInterpolator).unwrap();
                assert_relative_eq!(pa.position, pb.position, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_payload_json() {
        let json = AssetPayload::Json(json!({ "a": 1 }));
        assert_eq!(payload_json("a", &json).unwrap().as_ref(), &json!({ "a": 1 }));

        let bytes = AssetPayload::bytes(br#"[{"id":"x"}]"#.to_vec());
        assert_eq!(payload_json("b", &bytes).unwrap().as_ref(), &json!([{ "id": "x" }]));

        let glb = AssetPayload::bytes(vec![0x67, 0x6c, 0x54, 0x46, 0xff]);
        assert_eq!(
            payload_json("model", &glb).unwrap_err(),
            DocumentError::NotJson("model".to_string())
        );
    }

    #[test]
    fn test_decode_landmarks() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "id": "mount-sharp", "name": "Mount Sharp", "radius": 5000.0 },
                    "geometry": { "type": "Point", "coordinates": [137.8, -5.1, 5500.0] }
                },
                {
                    "type": "Feature",
                    "id": 17,
                    "properties": {},
                    "geometry": { "type": "Point", "coordinates": [1.0, 2.0] }
                },
                {
                    "type": "Feature",
                    "properties": { "id": "route" },
                    "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] }
                }
            ]
        });

        let landmarks = decode_landmark_collection(&doc, 250.0).unwrap();
        assert_eq!(landmarks.len(), 2);
        assert_eq!(landmarks[0].name, "Mount Sharp");
        assert_eq!(landmarks[0].radius, 5000.0);
        assert_eq!(landmarks[1].id, "17");
        assert_eq!(landmarks[1].name, "17");
        assert_eq!(landmarks[1].position, Vector3::new(1.0, 2.0, 0.0));
        assert_eq!(landmarks[1].radius, 250.0);
    }
}
