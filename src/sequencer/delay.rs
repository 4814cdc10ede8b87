// Copyright (c) 2024 Mike Tsao

use crate::{prelude::*, recall::RecallUid};

/// Computes the tic interval, in device periods:
/// `round((rate / buffer_size) * (60 / bpm) * tic_unit)`, floored at one
/// period so a degenerate configuration can't stall the counter.
pub fn delay_periods(
    sample_rate: SampleRate,
    buffer_size: BufferSize,
    tempo: Tempo,
    tic_unit: TicUnit,
) -> usize {
    let periods_per_second = sample_rate.0 as f64 / buffer_size.0 as f64;
    let seconds_per_beat = 60.0 / tempo.0.clamp(Tempo::MIN_VALUE, Tempo::MAX_VALUE);
    (periods_per_second * seconds_per_beat * tic_unit.factor())
        .round()
        .max(1.0) as usize
}

/// The audio-scope tempo state of the delay: the current tic interval,
/// recomputed whenever any of its four inputs changes. The interval is an
/// integer number of device periods, which is what makes tic emission
/// sample-accurate: every tic lands exactly on a period boundary.
#[derive(Debug, Clone)]
pub struct DelayAudio {
    c: Configurables,
    delay: usize,
}
impl Default for DelayAudio {
    fn default() -> Self {
        let mut r = Self {
            c: Default::default(),
            delay: 1,
        };
        r.recompute();
        r
    }
}
impl DelayAudio {
    /// The current tic interval, in device periods.
    pub fn delay(&self) -> usize {
        self.delay
    }

    fn recompute(&mut self) {
        self.delay = delay_periods(
            self.c.sample_rate(),
            self.c.buffer_size(),
            self.c.tempo(),
            self.c.tic_unit(),
        );
    }
}
impl Configurable for DelayAudio {
    fn sample_rate(&self) -> SampleRate {
        self.c.sample_rate()
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.c.update_sample_rate(sample_rate);
        self.recompute();
    }

    fn tempo(&self) -> Tempo {
        self.c.tempo()
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.c.update_tempo(tempo);
        self.recompute();
    }

    fn buffer_size(&self) -> BufferSize {
        self.c.buffer_size()
    }

    fn update_buffer_size(&mut self, buffer_size: BufferSize) {
        self.c.update_buffer_size(buffer_size);
        self.recompute();
    }

    fn tic_unit(&self) -> TicUnit {
        self.c.tic_unit()
    }

    fn update_tic_unit(&mut self, tic_unit: TicUnit) {
        self.c.update_tic_unit(tic_unit);
        self.recompute();
    }
}

/// The per-pass state of the delay: the period counter that turns
/// buffer-fills into tics, the dependency count that decides when the pass
/// may stop, and the listeners that receive each tic.
///
/// Listeners come in two groups delivered in a fixed order: alloc listeners
/// (which act on the current step) first, then count listeners (which
/// advance cursors). Keeping them separate is what lets every channel-run of
/// a pass see the same step value on the same tic.
#[derive(Debug, Default, Clone)]
pub struct DelayAudioRun {
    /// The delay-audio recall this run reads its interval from.
    pub(crate) delay_audio: Option<RecallUid>,
    pub(crate) counter: usize,
    pub(crate) recall_ref: usize,
    pub(crate) hide_ref: usize,
    pub(crate) hide_ref_counter: usize,
    pub(crate) alloc_listeners: Vec<RecallUid>,
    pub(crate) count_listeners: Vec<RecallUid>,
}
impl DelayAudioRun {
    /// Creates a run that reads its interval from the given delay-audio
    /// recall.
    pub fn new_with(delay_audio: RecallUid) -> Self {
        Self {
            delay_audio: Some(delay_audio),
            ..Default::default()
        }
    }

    /// Counts one device period. Returns true when the counter reached the
    /// interval and reset, which is the moment a tic fires.
    pub fn advance(&mut self, delay: usize) -> bool {
        self.counter += 1;
        if self.counter >= delay.max(1) {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    #[allow(missing_docs)]
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// How many dependents currently require this delay to keep running.
    pub fn recall_ref(&self) -> usize {
        self.recall_ref
    }

    /// Registers a dependent. Every call must be balanced by exactly one
    /// [DelayAudioRun::remove_dependency].
    pub fn add_dependency(&mut self) {
        self.recall_ref += 1;
        self.hide_ref += 1;
    }

    /// Releases a dependent. An unbalanced release is a lifecycle bug: fatal
    /// in debug builds, a logged no-op in release.
    pub fn remove_dependency(&mut self) {
        if self.recall_ref == 0 {
            debug_assert!(false, "delay dependency count underflow");
            log::warn!("ignoring delay dependency release with no matching acquire");
            return;
        }
        self.recall_ref -= 1;
        self.hide_ref -= 1;
    }

    /// Records that one attached channel-run finished its stage work for
    /// this pass. The delay only re-evaluates whether it may stop once every
    /// attached run of the pass has reported, so it can't stop mid-pass.
    pub fn report_pass(&mut self) {
        if self.hide_ref == 0 {
            self.hide_ref_counter = 0;
            return;
        }
        self.hide_ref_counter = (self.hide_ref_counter + 1) % self.hide_ref;
    }

    /// Whether the delay may transition itself to done: nobody depends on it
    /// and no pass is mid-report.
    pub fn is_idle(&self) -> bool {
        self.recall_ref == 0 && self.hide_ref_counter == 0
    }

    /// Rewinds the period counter without touching dependency state.
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_formula() {
        // 44100 / 512 periods per second, 0.5 seconds per beat, x1.
        assert_eq!(
            delay_periods(
                SampleRate::DEFAULT,
                BufferSize::DEFAULT,
                Tempo(120.0),
                TicUnit(4)
            ),
            43
        );
        // Doubling the tempo halves the interval.
        assert_eq!(
            delay_periods(
                SampleRate::DEFAULT,
                BufferSize::DEFAULT,
                Tempo(240.0),
                TicUnit(4)
            ),
            22
        );
        // Zooming out stretches it by powers of two.
        assert_eq!(
            delay_periods(
                SampleRate::DEFAULT,
                BufferSize::DEFAULT,
                Tempo(120.0),
                TicUnit(3)
            ),
            86
        );
    }

    #[test]
    fn delay_audio_recomputes_on_update() {
        let mut delay_audio = DelayAudio::default();
        let before = delay_audio.delay();
        delay_audio.update_tempo(Tempo(240.0));
        assert!(
            delay_audio.delay() < before,
            "faster tempo should shorten the interval"
        );
    }

    #[test]
    fn counter_fires_at_constant_intervals() {
        let mut run = DelayAudioRun::default();
        let delay = 4;
        let mut fired_at = Vec::default();
        for period in 0..12 {
            if run.advance(delay) {
                fired_at.push(period);
            }
        }
        assert_eq!(
            fired_at,
            vec![3, 7, 11],
            "tics should land every `delay` periods"
        );
    }

    #[test]
    fn dependency_balance_is_enforced() {
        let mut run = DelayAudioRun::default();
        run.add_dependency();
        run.add_dependency();
        assert_eq!(run.recall_ref(), 2);
        assert!(!run.is_idle());

        run.remove_dependency();
        run.remove_dependency();
        assert!(run.is_idle());
    }

    #[test]
    fn pass_reporting_gates_idleness() {
        let mut run = DelayAudioRun::default();
        run.add_dependency();
        run.add_dependency();

        run.report_pass();
        run.remove_dependency();
        run.remove_dependency();
        assert!(
            !run.is_idle(),
            "one of two attached runs mid-report should hold the delay open"
        );
        // hide_ref dropped to zero with the dependencies, so the gate clears.
        run.report_pass();
        assert!(run.is_idle());
    }
}
