//! Per-frame visual state and cumulative trip statistics.
//!
//! Aggregation is a pure function of one [`FrameRecord`] and the previous frame's counters, so
//! frames can be aggregated on any thread in any order and reassembled afterwards.

use smallvec::SmallVec;

use crate::{
    foundation::core::{FrameIndex, PixelPoint},
    log::model::{FrameRecord, TripEvent, TripStatus, leading_routes},
    projection::Projector,
};

/// Number of planned legs drawn per vehicle. Later legs are not rendered.
pub const MAX_ROUTE_PREVIEWS: usize = 3;

/// Stroke pattern of a route preview, fixed by its position in the vehicle's plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

impl LineStyle {
    /// Style for preview slot 0, 1 and 2.
    pub const BY_SLOT: [LineStyle; MAX_ROUTE_PREVIEWS] =
        [LineStyle::Solid, LineStyle::Dashed, LineStyle::Dotted];
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutePreview {
    pub style: LineStyle,
    pub points: Vec<PixelPoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VehicleMarker {
    /// Index of the vehicle in the frame; selects its palette color.
    pub slot: usize,
    pub position: PixelPoint,
    pub previews: SmallVec<[RoutePreview; MAX_ROUTE_PREVIEWS]>,
}

/// Cumulative trip statistics, counting only trips requested after the warm-up cutoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TripCounters {
    pub total_requested: u64,
    pub accepted: u64,
    pub completed: u64,
}

impl TripCounters {
    /// Count from scratch over every trip requested by `system_time_s`.
    pub fn recount(trips: &[TripEvent], system_time_s: f64, warmup_cutoff_s: f64) -> Self {
        let mut out = Self::default();
        for trip in trips {
            if trip.request_time_s > system_time_s || trip.request_time_s < warmup_cutoff_s {
                continue;
            }
            out.total_requested += 1;
            if trip.status.is_accepted() {
                out.accepted += 1;
            }
            if trip.status == TripStatus::Complete {
                out.completed += 1;
            }
        }
        out
    }

    /// Component-wise maximum; keeps the sequence non-decreasing.
    pub fn merge_max(self, other: Self) -> Self {
        Self {
            total_requested: self.total_requested.max(other.total_requested),
            accepted: self.accepted.max(other.accepted),
            completed: self.completed.max(other.completed),
        }
    }
}

/// Everything the compositor needs to draw one frame, in pixel space.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderableFrame {
    pub index: FrameIndex,
    pub system_time_s: f64,
    pub vehicles: Vec<VehicleMarker>,
    /// Origins of trips currently assigned but not yet picked up.
    pub dispatched: Vec<PixelPoint>,
    /// Origins of trips abandoned during this frame interval.
    pub walkaways: Vec<PixelPoint>,
    pub counters: TripCounters,
}

impl RenderableFrame {
    pub fn status_text(&self) -> String {
        format!(
            "T = {:.0} s   requested: {}   accepted: {}   completed: {}",
            self.system_time_s,
            self.counters.total_requested,
            self.counters.accepted,
            self.counters.completed
        )
    }

    pub fn preview_count(&self) -> usize {
        self.vehicles.iter().map(|v| v.previews.len()).sum()
    }
}

/// Stateless frame aggregator: projection plus the timing parameters trip handling depends on.
#[derive(Clone, Copy, Debug)]
pub struct FrameAggregator {
    projector: Projector,
    frame_interval_s: f64,
    warmup_cutoff_s: f64,
}

impl FrameAggregator {
    pub fn new(projector: Projector, frame_interval_s: f64, warmup_cutoff_s: f64) -> Self {
        Self {
            projector,
            frame_interval_s,
            warmup_cutoff_s,
        }
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn frame_interval_s(&self) -> f64 {
        self.frame_interval_s
    }

    /// Build the renderable state of `record` and the counters as of its timestamp.
    ///
    /// Counters are recounted from the frame's trip list and then merged with `prior`, so the
    /// result equals a full recount whenever trip states only move forward.
    pub fn aggregate(
        &self,
        index: FrameIndex,
        record: &FrameRecord,
        prior: TripCounters,
    ) -> (RenderableFrame, TripCounters) {
        let t = record.system_time_s;
        let trips = record.trips();

        let vehicles = record
            .vehicles
            .iter()
            .enumerate()
            .map(|(slot, vehicle)| VehicleMarker {
                slot,
                position: self.projector.project(vehicle.pos),
                previews: leading_routes(vehicle, MAX_ROUTE_PREVIEWS)
                    .into_iter()
                    .zip(LineStyle::BY_SLOT)
                    .map(|(route, style)| RoutePreview {
                        style,
                        points: self.projector.project_all(route.points()),
                    })
                    .collect(),
            })
            .collect();

        let dispatched = trips
            .iter()
            .filter(|trip| trip.status == TripStatus::Dispatched && trip.request_time_s <= t)
            .map(|trip| self.projector.project(trip.origin))
            .collect();

        let walkaways = trips
            .iter()
            .filter(|trip| self.walkaway_visible(trip, t))
            .map(|trip| self.projector.project(trip.origin))
            .collect();

        let counters = prior.merge_max(TripCounters::recount(trips, t, self.warmup_cutoff_s));

        (
            RenderableFrame {
                index,
                system_time_s: t,
                vehicles,
                dispatched,
                walkaways,
                counters,
            },
            counters,
        )
    }

    /// A walkaway is drawn only in the one frame interval that starts at its request time.
    fn walkaway_visible(&self, trip: &TripEvent, system_time_s: f64) -> bool {
        trip.status == TripStatus::Walkaway
            && trip.request_time_s <= system_time_s
            && system_time_s < trip.request_time_s + self.frame_interval_s
    }
}
