// Copyright (c) 2024 Mike Tsao

#![deny(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]

//! Ostinato is the real-time core of a pattern-based sequencer: a graph of
//! reusable processing units ("recalls") that produce and transform sound,
//! the buffer layer that carries samples between them, and a tic-synchronized
//! step sequencer that drives playback against a master tempo.
//!
//! The design centers on a template/instance split. Topology editing builds
//! an inert graph of *template* recalls; starting playback duplicates the
//! reachable templates into per-run instances, all stamped with the same
//! process-unique group id. Several runs can coexist on the same channels
//! because each run's instances see only peers of their own group lineage.
//!
//! * [EngineContext](crate::engine::EngineContext) owns everything and is the
//! entry point for offline/rendering use.
//! * [DevoutService](crate::engine::DevoutService) wraps an [EngineContext]
//! in a realtime producer thread fed by a cross-thread task queue, for live
//! use.
//! * The individual layers ([topology], [buffer], [recall], [sequencer]) are
//! public for callers that assemble their own main loop.

/// A collection of imports that are useful to users of this crate. `use
/// ostinato::prelude::*;` for easier onboarding.
pub mod prelude {
    pub use super::{
        buffer::prelude::*, engine::prelude::*, recall::prelude::*, sequencer::prelude::*,
        topology::prelude::*, traits::prelude::*, types::prelude::*,
    };
}

pub use engine::{DevoutService, EngineContext};

pub mod buffer;
pub mod engine;
pub mod recall;
pub mod sequencer;
pub mod topology;
pub mod traits;
pub mod types;
pub mod util;
