// Copyright (c) 2024 Mike Tsao

use super::{devout::Devout, tasks::Task, EngineContext};
use crate::{prelude::*, util::CrossbeamChannel};
use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;

/// A [DevoutServiceInput] tells [DevoutService] what to do.
#[derive(Debug)]
pub enum DevoutServiceInput {
    /// Queue a mutation for the next between-tics drain.
    Task(Task),
    /// Asks the service to exit.
    Quit,
}

/// A [DevoutServiceEvent] informs clients what's going on.
#[derive(Debug)]
pub enum DevoutServiceEvent {
    /// The service has started. Provides the sample rate and channel count.
    Reset(SampleRate, usize),
    /// One period was produced.
    Tic,
    /// A queued task failed to apply and was dropped.
    TaskFailed(String),
    /// The play lists drained; the realtime loop is idle until new work
    /// arrives.
    Stopped,
}

/// Wraps an [EngineContext] in a dedicated realtime producer thread.
///
/// The thread owns the context outright, with no locks. Everything else talks
/// to it through channels: control inputs in, events out, and a bounded
/// frame channel whose backpressure is the period wait (the producer blocks
/// on `send` while the consumer, a device sink or a file writer, drains at
/// device speed).
#[derive(Debug)]
pub struct DevoutService {
    inputs: CrossbeamChannel<DevoutServiceInput>,
    events: CrossbeamChannel<DevoutServiceEvent>,
    frames: Receiver<Arc<Vec<Sample>>>,
    task_sender: Sender<Task>,
}
impl Default for DevoutService {
    fn default() -> Self {
        Self::new_with(EngineContext::default())
    }
}
impl DevoutService {
    /// Spawns the producer thread around the given context.
    pub fn new_with(context: EngineContext) -> Self {
        let inputs: CrossbeamChannel<DevoutServiceInput> = Default::default();
        let events: CrossbeamChannel<DevoutServiceEvent> = Default::default();
        let (frame_sender, frame_receiver) =
            crossbeam::channel::bounded(Devout::FLIP_BUFFER_COUNT - 1);

        let task_sender = context.task_sender();
        let input_receiver = inputs.receiver.clone();
        let event_sender = events.sender.clone();
        std::thread::spawn(move || {
            Self::run_loop(context, input_receiver, event_sender, frame_sender);
        });

        Self {
            inputs,
            events,
            frames: frame_receiver,
            task_sender,
        }
    }

    /// The consumer side of the frame stream: one `Arc<Vec<Sample>>` of
    /// interleaved samples per period.
    pub fn frames(&self) -> &Receiver<Arc<Vec<Sample>>> {
        &self.frames
    }

    /// A direct task handle, equivalent to sending
    /// [DevoutServiceInput::Task].
    pub fn task_sender(&self) -> Sender<Task> {
        self.task_sender.clone()
    }

    fn run_loop(
        mut context: EngineContext,
        inputs: Receiver<DevoutServiceInput>,
        events: Sender<DevoutServiceEvent>,
        frames: Sender<Arc<Vec<Sample>>>,
    ) {
        let _ = events.send(DevoutServiceEvent::Reset(
            context.devout.sample_rate(),
            context.devout.dsp_channels(),
        ));
        let task_sender = context.task_sender();
        let mut was_playing = false;

        loop {
            if context.devout.is_playing() {
                // Never block on control traffic while producing.
                loop {
                    match inputs.try_recv() {
                        Ok(DevoutServiceInput::Task(task)) => {
                            let _ = task_sender.send(task);
                        }
                        Ok(DevoutServiceInput::Quit) => return,
                        Err(_) => break,
                    }
                }
            } else {
                if was_playing {
                    let _ = events.send(DevoutServiceEvent::Stopped);
                    was_playing = false;
                }
                // Idle: park until someone gives us work.
                match inputs.recv() {
                    Ok(DevoutServiceInput::Task(task)) => {
                        let _ = task_sender.send(task);
                    }
                    Ok(DevoutServiceInput::Quit) | Err(_) => return,
                }
            }

            let failures = context.run_tic();
            for failure in failures {
                let _ = events.send(DevoutServiceEvent::TaskFailed(failure));
            }

            if context.devout.is_playing() {
                was_playing = true;
                // The bounded channel is the period wait: this blocks while
                // the consumer is still working through earlier periods.
                if frames
                    .send_timeout(
                        Arc::new(context.last_period()),
                        core::time::Duration::from_secs(1),
                    )
                    .is_err()
                {
                    log::warn!("frame consumer stalled; dropping one period");
                }
                let _ = events.send(DevoutServiceEvent::Tic);
            }
        }
    }
}
impl ProvidesService<DevoutServiceInput, DevoutServiceEvent> for DevoutService {
    fn sender(&self) -> &Sender<DevoutServiceInput> {
        &self.inputs.sender
    }

    fn receiver(&self) -> &Receiver<DevoutServiceEvent> {
        &self.events.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::AudioConfigBuilder;
    use std::time::Duration;

    #[test]
    fn service_round_trip() {
        let mut context = EngineContext::default();
        let config = AudioConfigBuilder::default()
            .input_pads(2)
            .input_has_recycling(true)
            .is_async(true)
            .build()
            .unwrap();
        let (audio, _) = context.topology.create_audio(&config);
        context
            .install_pattern_sequencer(audio, 1, 1, 4, false)
            .unwrap();
        context.install_playback(audio).unwrap();

        let service = DevoutService::new_with(context);
        assert!(matches!(
            service.receiver().recv_timeout(Duration::from_secs(5)),
            Ok(DevoutServiceEvent::Reset(_, _))
        ));

        service.send_input(DevoutServiceInput::Task(Task::StartAudio { audio }));

        // The pattern is empty, so the pass plays out quickly; we should
        // see at least one tic and then a stop.
        let mut saw_tic = false;
        let mut saw_stop = false;
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while std::time::Instant::now() < deadline {
            // Keep the frame channel drained so the producer never stalls.
            while service.frames().try_recv().is_ok() {}
            match service.receiver().recv_timeout(Duration::from_millis(100)) {
                Ok(DevoutServiceEvent::Tic) => saw_tic = true,
                Ok(DevoutServiceEvent::Stopped) => {
                    saw_stop = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_tic, "the producer should emit tics while playing");
        assert!(saw_stop, "a drained play list should stop the producer");

        service.send_input(DevoutServiceInput::Quit);
    }
}
