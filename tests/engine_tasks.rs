// Copyright (c) 2024 Mike Tsao

use ostinato::prelude::*;

fn drum_and_master(context: &mut EngineContext) -> (AudioUid, AudioUid, ChannelUid, ChannelUid) {
    let drum_config = AudioConfigBuilder::default()
        .input_pads(2)
        .input_has_recycling(true)
        .is_async(true)
        .build()
        .unwrap();
    let (drums, _) = context.topology.create_audio(&drum_config);
    context
        .install_pattern_sequencer(drums, 1, 1, 8, false)
        .unwrap();

    let master_config = AudioConfigBuilder::default().input_pads(1).build().unwrap();
    let (master, _) = context.topology.create_audio(&master_config);
    context.install_playback(master).unwrap();

    let drum_out = context
        .topology
        .audio(drums)
        .unwrap()
        .channel_at(ChannelKind::Output, 0, 0)
        .unwrap();
    let master_in = context
        .topology
        .audio(master)
        .unwrap()
        .channel_at(ChannelKind::Input, 0, 0)
        .unwrap();
    (drums, master, drum_out, master_in)
}

// Tasks are the only mutation path from other threads: they apply in FIFO
// order between tics, and a failing task is reported and dropped without
// stalling the ones behind it.
#[test]
fn tasks_apply_in_order_and_failures_are_dropped() {
    let mut context = EngineContext::default();
    let (drums, _master, drum_out, master_in) = drum_and_master(&mut context);
    let drum_in = context
        .topology
        .audio(drums)
        .unwrap()
        .channel_at(ChannelKind::Input, 0, 0)
        .unwrap();

    let sender = context.task_sender();
    sender
        .send(Task::SetLink {
            channel: master_in,
            link: Some(drum_out),
        })
        .unwrap();
    // Bogus target: fails, gets dropped, must not block the queue.
    sender
        .send(Task::SetLink {
            channel: ChannelUid(99999),
            link: Some(drum_out),
        })
        .unwrap();
    sender
        .send(Task::TogglePatternBit {
            channel: drum_in,
            i: 0,
            j: 0,
            step: 5,
        })
        .unwrap();

    let failures = context.run_tic();
    assert_eq!(failures.len(), 1, "exactly one task should have failed");

    assert_eq!(
        context.topology.channel(master_in).unwrap().link(),
        Some(drum_out),
        "the link task ahead of the failure should have applied"
    );
    assert!(
        context.pattern_bit(drum_in, 0, 0, 5).unwrap(),
        "the toggle task behind the failure should have applied"
    );
}

// A linked chain carries the drum machine's recycling range through the
// master strip, so a pass started on the drums is audible at the master
// output.
#[test]
fn linked_master_sees_upstream_range() {
    let mut context = EngineContext::default();
    let (_drums, _master, drum_out, master_in) = drum_and_master(&mut context);

    context.topology.set_link(master_in, Some(drum_out)).unwrap();
    assert_eq!(
        context.topology.channel(master_in).unwrap().recycling_range(),
        context.topology.channel(drum_out).unwrap().recycling_range(),
        "a linked input should adopt its peer's recycling range"
    );
}

// Start/cancel round trip through the queue.
#[test]
fn playback_tasks_round_trip() {
    let mut context = EngineContext::default();
    let (drums, _master, _drum_out, _master_in) = drum_and_master(&mut context);
    let drum_in = context
        .topology
        .audio(drums)
        .unwrap()
        .channel_at(ChannelKind::Input, 0, 0)
        .unwrap();
    context.toggle_pattern_bit(drum_in, 0, 0, 0).unwrap();

    let sender = context.task_sender();
    sender.send(Task::StartAudio { audio: drums }).unwrap();
    let failures = context.run_tic();
    assert!(failures.is_empty(), "start task should apply: {failures:?}");
    assert!(context.devout.is_playing());

    let group_id = context
        .topology
        .audio(drums)
        .unwrap()
        .recall_ids()
        .first()
        .unwrap()
        .group_id;
    sender.send(Task::CancelGroup { group_id }).unwrap();
    context.run_tic();
    context.run_tic();
    assert!(
        !context.devout.is_playing(),
        "cancelling the only pass should stop playback"
    );
}
