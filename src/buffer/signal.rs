// Copyright (c) 2024 Mike Tsao

use crate::{prelude::*, recall::GroupId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use synonym::Synonym;

/// An identifier for an [AudioSignal] within its owning recycling.
#[derive(Synonym, Serialize, Deserialize, Eq, PartialEq)]
#[synonym(skip(PartialEq))]
#[serde(rename_all = "kebab-case")]
pub struct SignalUid(pub usize);
impl IsUid for SignalUid {
    fn as_usize(&self) -> usize {
        self.0
    }
}

/// One stream of generated or decoded sample data.
///
/// A template signal is persistent and loops its stream forever; there is at
/// most one per recycling, and it represents the sound the recycling plays
/// when triggered. A transient signal is created from the template for a
/// single playback run, tagged with the run's group id, consumed
/// buffer-by-buffer, and destroyed once exhausted.
#[derive(Debug, Clone)]
pub struct AudioSignal {
    uid: SignalUid,
    template: bool,
    group_id: Option<GroupId>,
    buffer_size: BufferSize,
    stream: VecDeque<GenerationBuffer<Sample>>,
    /// The number of valid frames in the stream's final buffer.
    last_frame: usize,
    /// The frame offset at which playback begins within the first buffer.
    attack: usize,
    attack_pending: bool,
    loop_cursor: usize,
}
impl AudioSignal {
    /// Creates a silent template signal of the given length, in buffers.
    pub fn new_template(uid: SignalUid, buffer_size: BufferSize, length: usize) -> Self {
        let mut r = Self {
            uid,
            template: true,
            group_id: None,
            buffer_size,
            stream: Default::default(),
            last_frame: buffer_size.0,
            attack: 0,
            attack_pending: false,
            loop_cursor: 0,
        };
        r.stream_resize(length);
        r
    }

    /// Creates an empty transient signal owned by the given playback run.
    /// External decoders use this, then append buffers, then hand the result
    /// to a recycling.
    pub fn new_with(uid: SignalUid, buffer_size: BufferSize, group_id: GroupId) -> Self {
        Self {
            uid,
            template: false,
            group_id: Some(group_id),
            buffer_size,
            stream: Default::default(),
            last_frame: buffer_size.0,
            attack: 0,
            attack_pending: false,
            loop_cursor: 0,
        }
    }

    /// Creates a transient signal that plays a copy of the given template's
    /// stream, starting at the given frame offset within its first buffer.
    pub fn from_template(
        uid: SignalUid,
        template: &AudioSignal,
        group_id: GroupId,
        attack: usize,
    ) -> Self {
        Self {
            uid,
            template: false,
            group_id: Some(group_id),
            buffer_size: template.buffer_size,
            stream: template.stream.clone(),
            last_frame: template.last_frame,
            attack,
            attack_pending: attack != 0,
            loop_cursor: 0,
        }
    }

    #[allow(missing_docs)]
    pub fn uid(&self) -> SignalUid {
        self.uid
    }

    /// Whether this is the recycling's persistent template signal.
    pub fn is_template(&self) -> bool {
        self.template
    }

    /// The playback run that produced this signal, if transient.
    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    #[allow(missing_docs)]
    pub fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    /// The stream length, in buffers.
    pub fn length(&self) -> usize {
        self.stream.len()
    }

    #[allow(missing_docs)]
    pub fn last_frame(&self) -> usize {
        self.last_frame
    }

    /// Grows the stream with silent buffers, or truncates it. Growing keeps
    /// existing content; truncation discards from the tail.
    pub fn stream_resize(&mut self, length: usize) {
        while self.stream.len() < length {
            self.stream
                .push_back(GenerationBuffer::new_with(self.buffer_size.0));
        }
        self.stream.truncate(length);
        if self.loop_cursor >= length {
            self.loop_cursor = 0;
        }
    }

    /// Appends one buffer of sample data. The slice is padded or truncated to
    /// the signal's buffer size; a short final slice also records
    /// `last_frame`.
    pub fn append_buffer(&mut self, samples: &[Sample]) {
        let mut buffer = GenerationBuffer::new_with(self.buffer_size.0);
        let n = samples.len().min(self.buffer_size.0);
        buffer.buffer_mut()[..n].copy_from_slice(&samples[..n]);
        self.last_frame = n;
        self.stream.push_back(buffer);
    }

    /// The buffer that plays this period, or None if the stream is exhausted.
    pub fn current_buffer(&self) -> Option<&[Sample]> {
        if self.template {
            self.stream.get(self.loop_cursor).map(|b| b.buffer())
        } else {
            self.stream.front().map(|b| b.buffer())
        }
    }

    /// Mutable access to the buffer that plays this period, for in-place
    /// effects (gain, external bridges).
    pub fn current_buffer_mut(&mut self) -> Option<&mut [Sample]> {
        if self.template {
            self.stream.get_mut(self.loop_cursor).map(|b| b.buffer_mut())
        } else {
            self.stream.front_mut().map(|b| b.buffer_mut())
        }
    }

    /// Rewinds playback to the start of the stream.
    pub fn rewind(&mut self) {
        self.loop_cursor = 0;
    }

    /// Advances the stream by one buffer. Templates loop; transient signals
    /// consume their front buffer, eventually becoming exhausted.
    pub fn advance(&mut self) {
        if self.template {
            if !self.stream.is_empty() {
                self.loop_cursor = (self.loop_cursor + 1) % self.stream.len();
            }
        } else {
            self.stream.pop_front();
        }
        self.attack_pending = false;
    }

    /// The frame offset to apply to the next played buffer. Nonzero only for
    /// the first buffer of a transient signal whose run started mid-period.
    pub fn pending_attack(&self) -> usize {
        if self.attack_pending {
            self.attack
        } else {
            0
        }
    }

    /// True when a transient signal has consumed its whole stream. Templates
    /// are never exhausted.
    pub fn is_exhausted(&self) -> bool {
        !self.template && self.stream.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_uid(n: usize) -> SignalUid {
        SignalUid(n)
    }

    #[test]
    fn template_loops_forever() {
        let mut signal = AudioSignal::new_template(test_uid(1), BufferSize::new(4), 2);
        assert!(signal.is_template());
        assert_eq!(signal.length(), 2);

        for _ in 0..10 {
            assert!(
                signal.current_buffer().is_some(),
                "template should always have a current buffer"
            );
            signal.advance();
        }
        assert!(!signal.is_exhausted(), "templates never exhaust");
    }

    #[test]
    fn transient_consumes_and_exhausts() {
        let template = AudioSignal::new_template(test_uid(1), BufferSize::new(4), 3);
        let mut signal = AudioSignal::from_template(test_uid(2), &template, GroupId(7), 0);

        assert_eq!(signal.group_id(), Some(GroupId(7)));
        let mut played = 0;
        while signal.current_buffer().is_some() {
            signal.advance();
            played += 1;
        }
        assert_eq!(played, 3, "transient should play each buffer exactly once");
        assert!(signal.is_exhausted());
    }

    #[test]
    fn attack_applies_only_to_first_buffer() {
        let template = AudioSignal::new_template(test_uid(1), BufferSize::new(8), 2);
        let mut signal = AudioSignal::from_template(test_uid(2), &template, GroupId(1), 3);

        assert_eq!(signal.pending_attack(), 3);
        signal.advance();
        assert_eq!(
            signal.pending_attack(),
            0,
            "attack offset should be consumed by the first advance"
        );
    }

    #[test]
    fn stream_resize_grows_and_truncates() {
        let mut signal = AudioSignal::new_template(test_uid(1), BufferSize::new(4), 1);
        signal.stream_resize(5);
        assert_eq!(signal.length(), 5);
        signal.stream_resize(2);
        assert_eq!(signal.length(), 2);
    }

    #[test]
    fn append_buffer_records_last_frame() {
        let mut signal = AudioSignal::new_with(test_uid(1), BufferSize::new(4), GroupId(1));
        signal.append_buffer(&[0.1, 0.2, 0.3, 0.4]);
        signal.append_buffer(&[0.5, 0.6]);
        assert_eq!(signal.length(), 2);
        assert_eq!(
            signal.last_frame(),
            2,
            "a short final slice should set last_frame"
        );
    }
}
