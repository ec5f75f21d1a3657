use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::foundation::core::GeoPoint;

/// One planned leg of a vehicle, as an ordered polyline of geographic points.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(pub Vec<GeoPoint>);

impl Route {
    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A vehicle as logged in one frame. Its identity is its index in [`FrameRecord::vehicles`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    #[serde(alias = "position")]
    pub pos: GeoPoint,
    /// Planned legs in visiting order. `null` and a missing key both mean "no plan".
    #[serde(default, alias = "routes")]
    pub waypoints: Option<Vec<Route>>,
}

impl VehicleSnapshot {
    pub fn routes(&self) -> &[Route] {
        self.waypoints.as_deref().unwrap_or(&[])
    }
}

/// Trip lifecycle state.
///
/// The simulator has written two vocabularies over time; the older names are accepted as
/// aliases and normalized here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    #[serde(alias = "REQUESTED")]
    Waiting,
    #[serde(alias = "PICKING_UP")]
    Dispatched,
    #[serde(alias = "WALKED_AWAY")]
    Walkaway,
    #[serde(alias = "PICKEDUP")]
    PickedUp,
    #[serde(alias = "COMPLETED", alias = "DROPPED_OFF")]
    Complete,
}

impl TripStatus {
    /// Counted as accepted unless the passenger walked away.
    pub fn is_accepted(self) -> bool {
        self != Self::Walkaway
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripEvent {
    #[serde(alias = "request_time")]
    pub request_time_s: f64,
    pub origin: GeoPoint,
    pub status: TripStatus,
    #[serde(default, alias = "pickup_time", skip_serializing_if = "Option::is_none")]
    pub pickup_time_s: Option<f64>,
    #[serde(default, alias = "dropoff_time", skip_serializing_if = "Option::is_none")]
    pub dropoff_time_s: Option<f64>,
}

impl TripEvent {
    /// Resolve a trip from a terminal trip list to the state it was in at `system_time_s`.
    ///
    /// Returns `None` for trips that had not been requested yet. Walkaways keep their status;
    /// other trips move through dispatched, picked up and complete according to their recorded
    /// timestamps.
    pub fn as_of(&self, system_time_s: f64) -> Option<TripEvent> {
        if self.request_time_s > system_time_s {
            return None;
        }
        let status = match self.status {
            TripStatus::Walkaway => TripStatus::Walkaway,
            TripStatus::Waiting => TripStatus::Waiting,
            terminal => {
                let reached = |t: Option<f64>| t.is_some_and(|t| t <= system_time_s);
                if reached(self.dropoff_time_s) && terminal == TripStatus::Complete {
                    TripStatus::Complete
                } else if reached(self.pickup_time_s)
                    && matches!(terminal, TripStatus::PickedUp | TripStatus::Complete)
                {
                    TripStatus::PickedUp
                } else {
                    TripStatus::Dispatched
                }
            }
        };
        Some(TripEvent {
            status,
            ..self.clone()
        })
    }
}

/// One simulation snapshot, rendered as exactly one output frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(alias = "system_time")]
    pub system_time_s: f64,
    #[serde(default)]
    pub vehicles: Vec<VehicleSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trips: Option<Vec<TripEvent>>,
}

impl FrameRecord {
    pub fn trips(&self) -> &[TripEvent] {
        self.trips.as_deref().unwrap_or(&[])
    }

    /// Fill in `trips` from a terminal trip list when the frame carries none of its own.
    pub fn attach_terminal_trips(&mut self, terminal: &[TripEvent]) {
        if self.trips.is_some() {
            return;
        }
        let t = self.system_time_s;
        self.trips = Some(terminal.iter().filter_map(|trip| trip.as_of(t)).collect());
    }
}

/// The first few routes of a vehicle, in order. Used where at most three legs matter.
pub(crate) fn leading_routes(vehicle: &VehicleSnapshot, n: usize) -> SmallVec<[&Route; 3]> {
    vehicle.routes().iter().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_decodes_simulator_field_names() {
        let yaml = r#"
system_time_s: 30
vehicles:
  - pos: { lon: 114.0, lat: 22.3 }
    waypoints:
      - [{ lon: 114.0, lat: 22.3 }, { lon: 114.1, lat: 22.4 }]
  - pos: { lon: 114.2, lat: 22.5 }
    waypoints: ~
trips:
  - request_time_s: 12.5
    origin: { lon: 114.05, lat: 22.35 }
    status: REQUESTED
"#;
        let frame: FrameRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(frame.system_time_s, 30.0);
        assert_eq!(frame.vehicles.len(), 2);
        assert_eq!(frame.vehicles[0].routes().len(), 1);
        assert_eq!(frame.vehicles[0].routes()[0].points().len(), 2);
        assert!(frame.vehicles[1].routes().is_empty());
        assert_eq!(frame.trips()[0].status, TripStatus::Waiting);
    }

    #[test]
    fn frame_decodes_generic_field_names() {
        let json = r#"{
            "system_time": 60,
            "vehicles": [{ "position": { "lon": 1, "lat": 2 }, "routes": [] }],
            "trips": [{
                "request_time": 40,
                "origin": { "lon": 1, "lat": 1 },
                "status": "PICKED_UP",
                "pickup_time": 55
            }]
        }"#;
        let frame: FrameRecord = serde_json::from_str(json).unwrap();
        assert_eq!(frame.vehicles[0].pos, GeoPoint::new(1.0, 2.0));
        assert_eq!(frame.trips()[0].pickup_time_s, Some(55.0));
        assert!(frame.vehicles[0].routes().is_empty());
    }

    #[test]
    fn both_status_vocabularies_normalize() {
        let cases = [
            ("WAITING", TripStatus::Waiting),
            ("REQUESTED", TripStatus::Waiting),
            ("DISPATCHED", TripStatus::Dispatched),
            ("PICKING_UP", TripStatus::Dispatched),
            ("WALKAWAY", TripStatus::Walkaway),
            ("WALKED_AWAY", TripStatus::Walkaway),
            ("PICKED_UP", TripStatus::PickedUp),
            ("COMPLETE", TripStatus::Complete),
            ("COMPLETED", TripStatus::Complete),
            ("DROPPED_OFF", TripStatus::Complete),
        ];
        for (raw, want) in cases {
            let got: TripStatus = serde_yaml::from_str(raw).unwrap();
            assert_eq!(got, want, "{raw}");
        }
        assert!(serde_yaml::from_str::<TripStatus>("LOST").is_err());
    }

    #[test]
    fn terminal_trip_resolves_against_frame_time() {
        let trip = TripEvent {
            request_time_s: 10.0,
            origin: GeoPoint::new(0.0, 0.0),
            status: TripStatus::Complete,
            pickup_time_s: Some(20.0),
            dropoff_time_s: Some(30.0),
        };
        assert!(trip.as_of(5.0).is_none());
        assert_eq!(trip.as_of(10.0).unwrap().status, TripStatus::Dispatched);
        assert_eq!(trip.as_of(25.0).unwrap().status, TripStatus::PickedUp);
        assert_eq!(trip.as_of(30.0).unwrap().status, TripStatus::Complete);

        let walked = TripEvent {
            status: TripStatus::Walkaway,
            pickup_time_s: None,
            dropoff_time_s: None,
            ..trip.clone()
        };
        assert_eq!(walked.as_of(11.0).unwrap().status, TripStatus::Walkaway);
    }

    #[test]
    fn frame_with_own_trips_ignores_terminal_list() {
        let own = TripEvent {
            request_time_s: 1.0,
            origin: GeoPoint::new(0.0, 0.0),
            status: TripStatus::Waiting,
            pickup_time_s: None,
            dropoff_time_s: None,
        };
        let mut frame = FrameRecord {
            system_time_s: 5.0,
            vehicles: vec![],
            trips: Some(vec![own.clone()]),
        };
        let terminal = vec![TripEvent {
            status: TripStatus::Complete,
            ..own.clone()
        }];
        frame.attach_terminal_trips(&terminal);
        assert_eq!(frame.trips(), &[own]);

        let mut bare = FrameRecord {
            system_time_s: 5.0,
            vehicles: vec![],
            trips: None,
        };
        bare.attach_terminal_trips(&terminal);
        assert_eq!(bare.trips().len(), 1);
        assert_eq!(bare.trips()[0].status, TripStatus::Dispatched);
    }
}
