// Copyright (c) 2024 Mike Tsao

//! The buffer layer: [AudioSignal] streams of fixed-size sample buffers, and
//! the [Recycling] containers that hold them on behalf of channels.
//!
//! A recycling is the unit of audio storage attached to a channel. It holds
//! at most one *template* signal (persistent, looped: the held note or
//! loaded sample) plus any number of transient signals, each created for one
//! playback run and destroyed when its stream is exhausted.

/// The most commonly used imports.
pub mod prelude {
    pub use super::{AudioSignal, Recycling, RecyclingArena, RecyclingUid, SignalUid};
}

pub use {
    recycling::{Recycling, RecyclingArena, RecyclingUid},
    signal::{AudioSignal, SignalUid},
};

mod recycling;
mod signal;
