// Copyright (c) 2024 Mike Tsao

//! Feeds a [DevoutService](super::DevoutService)'s frame stream to the
//! system audio device via [cpal](https://crates.io/crates/cpal).

use crate::types::Sample;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SizedSample, Stream, StreamConfig,
};
use crossbeam::{channel::Receiver, queue::ArrayQueue};
use std::sync::Arc;

/// Connects the engine's interleaved frame stream to the default output
/// device. The sink keeps a small lock-free ring between the frame channel
/// and the device callback so the callback never blocks.
pub struct CpalSink {
    /// The cpal stream. Held so the stream stays alive.
    #[allow(dead_code)]
    stream: Stream,
    sample_rate: usize,
    channel_count: usize,
}
impl core::fmt::Debug for CpalSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CpalSink")
            .field("stream", &"(skipped)")
            .field("sample_rate", &self.sample_rate)
            .field("channel_count", &self.channel_count)
            .finish()
    }
}
impl CpalSink {
    /// Opens the default output device and starts consuming `frames`.
    pub fn new_with(frames: Receiver<Arc<Vec<Sample>>>) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::Error::msg("Default output device is not available"))?;
        let config = device.default_output_config()?;
        let sample_format = config.sample_format();
        let config: StreamConfig = config.into();
        let sample_rate = config.sample_rate.0 as usize;
        let channel_count = config.channels as usize;

        let queue = Arc::new(ArrayQueue::<Sample>::new(sample_rate));
        let feeder = Arc::clone(&queue);
        std::thread::spawn(move || {
            while let Ok(frame) = frames.recv() {
                for sample in frame.iter() {
                    // Spin briefly rather than dropping audio; the queue is
                    // a second deep.
                    while feeder.push(*sample).is_err() {
                        std::thread::yield_now();
                    }
                }
            }
        });

        let stream = match sample_format {
            cpal::SampleFormat::I16 => Self::stream_make::<i16>(&device, &config, queue),
            cpal::SampleFormat::U16 => Self::stream_make::<u16>(&device, &config, queue),
            cpal::SampleFormat::F32 => Self::stream_make::<f32>(&device, &config, queue),
            _ => return Err(anyhow::Error::msg("Unsupported device sample format")),
        }?;
        stream.play()?;

        Ok(Self {
            stream,
            sample_rate,
            channel_count,
        })
    }

    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    #[allow(missing_docs)]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn stream_make<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        queue: Arc<ArrayQueue<Sample>>,
    ) -> anyhow::Result<Stream>
    where
        T: SizedSample + FromSample<Sample>,
    {
        let err_fn = |err| log::error!("Error building output sound stream: {}", err);
        let stream = device.build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in output.iter_mut() {
                    *sample = T::from_sample(queue.pop().unwrap_or_default());
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}
