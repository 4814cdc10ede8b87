// Copyright (c) 2024 Mike Tsao

//! The traits that define many characteristics and relationships among parts
//! of the system.

use crate::prelude::*;
use crossbeam::channel::{Receiver, Sender};

/// Quick import of all important traits.
pub mod prelude {
    pub use super::{BridgeHooks, Configurable, Configurables, GenerationBuffer, ProvidesService};
}

/// A convenience struct for the fields implied by [Configurable]. Note that
/// this struct is not serde-compliant, because these fields typically aren't
/// meant to be serialized.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Configurables {
    sample_rate: SampleRate,
    tempo: Tempo,
    buffer_size: BufferSize,
    tic_unit: TicUnit,
}
impl Configurable for Configurables {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate
    }

    fn tempo(&self) -> Tempo {
        self.tempo
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo
    }

    fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    fn update_buffer_size(&mut self, buffer_size: BufferSize) {
        self.buffer_size = buffer_size
    }

    fn tic_unit(&self) -> TicUnit {
        self.tic_unit
    }

    fn update_tic_unit(&mut self, tic_unit: TicUnit) {
        self.tic_unit = tic_unit
    }
}

/// Something that is [Configurable] is interested in staying in sync with
/// global configuration. The four values here are exactly the inputs of the
/// tic-interval formula, so anything that derives timing from them should
/// recompute on every update.
pub trait Configurable {
    /// Returns this item's sample rate.
    fn sample_rate(&self) -> SampleRate {
        unimplemented!("Someone asked for a SampleRate but we provided default");
    }

    /// The sample rate changed.
    #[allow(unused_variables)]
    fn update_sample_rate(&mut self, sample_rate: SampleRate) {}

    /// Returns this item's [Tempo].
    fn tempo(&self) -> Tempo {
        unimplemented!("Someone forgot to implement tempo()")
    }

    /// Tempo (beats per minute) changed.
    #[allow(unused_variables)]
    fn update_tempo(&mut self, tempo: Tempo) {}

    /// Returns this item's [BufferSize].
    fn buffer_size(&self) -> BufferSize {
        unimplemented!("Someone forgot to implement buffer_size()")
    }

    /// The device period size changed.
    #[allow(unused_variables)]
    fn update_buffer_size(&mut self, buffer_size: BufferSize) {}

    /// Returns this item's [TicUnit].
    fn tic_unit(&self) -> TicUnit {
        unimplemented!("Someone forgot to implement tic_unit()")
    }

    /// The editor zoom changed.
    #[allow(unused_variables)]
    fn update_tic_unit(&mut self, tic_unit: TicUnit) {}

    /// Sent to indicate that it's time to reset internal state. Counters
    /// should rewind, cursors should go back to the start, etc.
    fn reset(&mut self) {}
}

/// A convenience struct for fixed-size sample buffers. This buffer ensures
/// that capacity and len, in Vec terms, are always the same. We call it
/// "size."
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GenerationBuffer<V: Default + Clone + core::ops::AddAssign> {
    vec: Vec<V>,
}
impl<V: Default + Clone + Copy + core::ops::AddAssign> GenerationBuffer<V> {
    /// Returns the current size of the buffer.
    pub fn buffer_size(&self) -> usize {
        self.vec.len()
    }

    /// Sets the buffer size. Does nothing if the buffer is already this size.
    pub fn resize(&mut self, size: usize) {
        if size != self.buffer_size() {
            self.vec.resize(size, V::default());
        }
    }

    /// Returns a reference to the buffer.
    pub fn buffer(&self) -> &[V] {
        &self.vec
    }

    /// Returns a mutable reference to the buffer.
    pub fn buffer_mut(&mut self) -> &mut [V] {
        &mut self.vec
    }

    /// Sets the buffer's contents to the default value. Does not change its
    /// size.
    pub fn clear(&mut self) {
        self.vec.fill(V::default());
    }

    /// Merges (adds) a slice of the same size/type to this one.
    pub fn merge(&mut self, other: &[V]) {
        assert_eq!(self.buffer_size(), other.len());
        for (src, dst) in other.iter().zip(self.buffer_mut().iter_mut()) {
            *dst += *src;
        }
    }

    /// Creates a buffer of the specified size.
    pub fn new_with(size: usize) -> Self {
        let mut r = GenerationBuffer::default();
        r.resize(size);
        r
    }
}

/// Service methods.
///
/// A service is something that usually runs in its own thread as a daemon and
/// that communicates with clients by crossbeam channels. It accepts Inputs
/// and produces Events.
pub trait ProvidesService<I: core::fmt::Debug, E: core::fmt::Debug> {
    /// The sender side of the Input channel. Use this to send commands to the
    /// service.
    fn sender(&self) -> &Sender<I>;

    /// A convenience method to send Inputs to the service. Calling this
    /// implies that the caller has kept a reference to the service, which is
    /// uncommon, as the main value of services is to be able to clone senders
    /// with reckless abandon.
    fn send_input(&self, input: I) {
        if let Err(e) = self.sender().try_send(input) {
            log::warn!("While sending: {e:?}");
        }
    }

    /// The receiver side of the Event channel. Integrate this into a listener
    /// loop to respond to events.
    fn receiver(&self) -> &Receiver<E>;

    /// A convenience method to receive either Inputs or Events inside a
    /// crossbeam select loop. Unlike send_input(), this one is used
    /// frequently because it doesn't require use of &self.
    fn recv_operation<T>(
        oper: crossbeam::channel::SelectedOperation,
        r: &Receiver<T>,
    ) -> Result<T, crossbeam::channel::RecvError> {
        let input_result = oper.recv(r);
        if let Err(e) = input_result {
            log::warn!(
                "ProvidesService: While attempting to receive from {:?}: {}",
                *r,
                e
            );
        }
        input_result
    }
}

/// The seam through which an external effect host (a VST3 bridge, a native
/// effect shim) participates in the recall graph. The host registers a boxed
/// [BridgeHooks] as a bridge recall and then receives the same lifecycle
/// callbacks as any built-in recall. Buffers are per audio channel and sized
/// to the device period; the core neither loads plugins nor discovers ports.
pub trait BridgeHooks: Send + core::fmt::Debug {
    /// Creates the per-run instance of this hook set. Called when the bridge
    /// recall's template is duplicated for a new playback pass.
    fn spawn(&self) -> Box<dyn BridgeHooks>;

    /// One-time setup for this run. Called once per audio channel before the
    /// first run stage.
    #[allow(unused_variables)]
    fn run_init(&mut self, audio_channel: usize) {}

    /// Called every tic with the channel's working buffer during the inter
    /// stage. The hook transforms the buffer in place.
    fn run(&mut self, audio_channel: usize, buffer: &mut [Sample]);

    /// The run completed or was cancelled. Always called exactly once per
    /// run_init.
    fn done(&mut self) {}
}
