// Copyright (c) 2024 Mike Tsao

use more_asserts::assert_gt;
use ostinato::{buffer::AudioSignal, prelude::*};

// A period size equal to the sample rate plus 60 BPM at one tic per beat
// makes every produced period exactly one tic, which keeps the arithmetic
// in these scenarios readable.
fn tic_per_period_engine() -> (EngineContext, AudioUid, ChannelUid) {
    let mut context = EngineContext::new_with(SampleRate::DEFAULT, BufferSize::new(44100), 1);
    context.set_tempo(Tempo(60.0));
    context.set_tic_unit(TicUnit(4));

    let config = AudioConfigBuilder::default()
        .audio_channels(1)
        .output_pads(1)
        .input_pads(2)
        .input_has_recycling(true)
        .is_async(true)
        .build()
        .unwrap();
    let (audio, _) = context.topology.create_audio(&config);
    context
        .install_pattern_sequencer(audio, 2, 1, 16, false)
        .unwrap();
    context.install_playback(audio).unwrap();

    let input = context
        .topology
        .audio(audio)
        .unwrap()
        .channel_at(ChannelKind::Input, 0, 0)
        .unwrap();

    // Replace the first pad's silent template with something audible so the
    // step trigger is observable at the device output.
    let recycling = context
        .topology
        .channel(input)
        .unwrap()
        .first_recycling()
        .unwrap();
    let signal_uid = context.topology.recyclings.mint_signal_uid();
    let mut template = AudioSignal::new_template(signal_uid, BufferSize::new(44100), 0);
    template.append_buffer(&vec![0.5; 44100]);
    context
        .topology
        .recyclings
        .get_mut(recycling)
        .unwrap()
        .add_audio_signal(template);

    (context, audio, input)
}

fn peak(samples: &[Sample]) -> Sample {
    samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
}

// The canonical one-shot scenario: a 2-kit, 16-step pattern, all bits clear
// except (0, 0, 3). Exactly one step is audible, the pass completes after
// the pattern plays out, and everything the pass created is torn down.
#[test]
fn single_step_triggers_once_then_pass_completes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut context, audio, input) = tic_per_period_engine();

    assert!(!context.pattern_bit(input, 0, 0, 3).unwrap());
    assert!(context.toggle_pattern_bit(input, 0, 0, 3).unwrap());

    let group_id = context.start_audio(audio).unwrap();
    assert!(context.devout.is_playing());

    let mut audible_tics = Vec::default();
    for tic in 0..=16 {
        context.run_tic();
        if peak(&context.last_period()) > 0.0 {
            audible_tics.push(tic);
        }
    }
    assert_eq!(
        audible_tics,
        vec![3],
        "only the toggled step should produce output"
    );

    // The wrap tic marked the workers done and released the delay; the next
    // drain finishes the pass.
    context.run_tic();
    assert!(
        !context.devout.is_playing(),
        "a played-out one-shot pattern should stop the engine"
    );
    assert!(
        context.recalls.instances_of_group(group_id).is_empty(),
        "a finished pass should leave no instances behind"
    );
    assert!(
        context
            .topology
            .channel(input)
            .unwrap()
            .recall_ids()
            .is_empty(),
        "a finished pass should withdraw its recall ids"
    );
}

// Tic intervals are integer period counts derived from tempo; changing the
// tempo changes only future intervals, never retroactively.
#[test]
fn tic_intervals_are_constant_until_tempo_changes() {
    let mut context = EngineContext::new_with(SampleRate::DEFAULT, BufferSize::DEFAULT, 1);
    context.set_tempo(Tempo(960.0));
    context.set_tic_unit(TicUnit(4));
    let config = AudioConfigBuilder::default()
        .input_pads(1)
        .input_has_recycling(true)
        .is_async(true)
        .build()
        .unwrap();
    let (audio, _) = context.topology.create_audio(&config);
    context
        .install_pattern_sequencer(audio, 1, 1, 64, true)
        .unwrap();
    let input = context
        .topology
        .audio(audio)
        .unwrap()
        .channel_at(ChannelKind::Input, 0, 0)
        .unwrap();
    // Every step audible so every tic creates a signal. Without a playback
    // recall nothing consumes them, so each tic grows the recycling by one.
    for step in 0..64 {
        context.toggle_pattern_bit(input, 0, 0, step).unwrap();
    }
    context.start_audio(audio).unwrap();

    let recycling = context
        .topology
        .channel(input)
        .unwrap()
        .first_recycling()
        .unwrap();
    let mut trigger_periods = Vec::default();
    let mut last_count = 0;
    for period in 0..200 {
        if period == 100 {
            context.set_tempo(Tempo(480.0));
        }
        context.run_tic();
        let transients = context
            .topology
            .recyclings
            .get(recycling)
            .unwrap()
            .signals()
            .iter()
            .filter(|s| !s.is_template())
            .count();
        if transients > last_count {
            trigger_periods.push(period);
            last_count = transients;
        }
    }

    // Intervals wholly before and wholly after the tempo change; the pair
    // straddling it is neither.
    let before: Vec<usize> = trigger_periods
        .windows(2)
        .filter(|w| w[1] < 100)
        .map(|w| w[1] - w[0])
        .collect();
    let after: Vec<usize> = trigger_periods
        .windows(2)
        .filter(|w| w[0] >= 100)
        .map(|w| w[1] - w[0])
        .collect();
    assert!(before.len() > 2 && after.len() > 2);
    assert!(
        before.windows(2).all(|w| w[0] == w[1]),
        "tic spacing should be constant at a fixed tempo, got {before:?}"
    );
    assert!(
        after.windows(2).all(|w| w[0] == w[1]),
        "tic spacing should settle at the new tempo, got {after:?}"
    );
    assert!(
        after[0] > before[0],
        "halving the tempo should widen the interval"
    );
}

// Two concurrently started passes never share a group id, and cancelling
// one leaves the other running.
#[test]
fn concurrent_passes_are_isolated() {
    let (mut context, audio, input) = tic_per_period_engine();
    context.toggle_pattern_bit(input, 0, 0, 0).unwrap();

    let group_a = context.start_audio(audio).unwrap();
    let group_b = context.start_audio(audio).unwrap();
    assert_ne!(group_a, group_b, "concurrent passes must get unique groups");

    let count_a = context.recalls.instances_of_group(group_a).len();
    let count_b = context.recalls.instances_of_group(group_b).len();
    assert_eq!(count_a, count_b, "both passes duplicate the same templates");
    assert_gt!(count_a, 0);

    for _ in 0..3 {
        context.run_tic();
    }
    context.cancel_group(group_a);
    context.run_tic();

    assert!(
        context.recalls.instances_of_group(group_a).is_empty(),
        "a cancelled pass should wind down completely"
    );
    assert!(
        !context.recalls.instances_of_group(group_b).is_empty(),
        "cancelling one pass must not touch its sibling"
    );
}

// A looping pattern keeps its pass alive indefinitely; cancellation is the
// only way out, and it still balances the books.
#[test]
fn looping_pass_runs_until_cancelled() {
    let mut context = EngineContext::new_with(SampleRate::DEFAULT, BufferSize::new(44100), 1);
    context.set_tempo(Tempo(60.0));
    context.set_tic_unit(TicUnit(4));
    let config = AudioConfigBuilder::default()
        .input_pads(1)
        .input_has_recycling(true)
        .is_async(true)
        .build()
        .unwrap();
    let (audio, _) = context.topology.create_audio(&config);
    context
        .install_pattern_sequencer(audio, 1, 1, 4, true)
        .unwrap();
    context.install_playback(audio).unwrap();

    let group_id = context.start_audio(audio).unwrap();
    for _ in 0..24 {
        context.run_tic();
    }
    assert!(
        context.devout.is_playing(),
        "a looping pattern should still be running after several rounds"
    );

    context.cancel_group(group_id);
    context.run_tic();
    assert!(!context.devout.is_playing());
    assert!(context.recalls.instances_of_group(group_id).is_empty());
}
