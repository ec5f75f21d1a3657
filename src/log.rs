//! Simulation log decoding: the frame data model and a forward-only reader over both log shapes.

pub mod model;
pub mod reader;
