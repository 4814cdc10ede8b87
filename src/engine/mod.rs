// Copyright (c) 2024 Mike Tsao

//! The realtime engine: the [Devout] sink state, the [EngineContext] that
//! owns everything, the cross-thread [Task] queue, and the
//! [DevoutService] producer thread.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{
        Devout, DevoutService, DevoutServiceEvent, DevoutServiceInput, EngineContext, PlayEntry,
        PlayScope, Task,
    };
}

pub use {
    context::EngineContext,
    devout::{Attack, DeviceBuffer, Devout, PlayEntry, PlayScope},
    service::{DevoutService, DevoutServiceEvent, DevoutServiceInput},
    tasks::Task,
};

#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;

mod context;
mod devout;
mod playback;
mod service;
mod tasks;

#[cfg(feature = "cpal")]
mod cpal_sink;
