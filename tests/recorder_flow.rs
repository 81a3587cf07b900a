mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use airlift_recorder::RecorderError;
use airlift_recorder::recorder::{
    Mode, OutputFormat, Recorder, RecorderConfig, RecorderEvent, SegmentStatus,
};
use airlift_recorder::testing::mocks::{ScriptedEncoder, ScriptedSource, SourceFeed};

use common::*;

fn recorder(cfg: RecorderConfig) -> (Recorder, SourceFeed, Arc<ScriptedEncoder>) {
    let (source, feed) = ScriptedSource::new();
    let encoder = Arc::new(ScriptedEncoder::new());
    let rec = Recorder::new(cfg, Arc::new(source), encoder.clone()).expect("recorder");
    (rec, feed, encoder)
}

#[test]
fn every_sample_lands_in_exactly_one_segment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(config(dir.path()));
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 25, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 25));
    rec.stop()?;

    let segments = finalized(&events);
    assert_eq!(segments.len(), 3);

    let lens: Vec<usize> = segments.iter().map(|(_, p)| read_samples(p).len()).collect();
    assert_eq!(lens, vec![1000, 1000, 500]);

    let all: Vec<i16> = segments.iter().flat_map(|(_, p)| read_samples(p)).collect();
    assert_eq!(all, (0..2500).collect::<Vec<i16>>());
    assert!(files_with_ext(dir.path(), "part").is_empty());
    Ok(())
}

#[test]
fn rotation_overshoots_by_less_than_one_frame() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(RecorderConfig {
        chunk_size: 300,
        ..config(dir.path())
    });
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 10, 300);
    assert!(wait_until(WAIT, || feed.delivered() == 10));
    rec.stop()?;

    // Target 1000 samples: the 4th frame (1200) triggers rotation.
    let lens: Vec<usize> = finalized(&events)
        .iter()
        .map(|(_, p)| read_samples(p).len())
        .collect();
    assert_eq!(lens, vec![1200, 1200, 600]);
    Ok(())
}

#[test]
fn paused_audio_is_discarded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(RecorderConfig {
        segment_duration: Duration::from_secs(60),
        ..config(dir.path())
    });
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 5, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 5));

    rec.pause()?;
    assert_eq!(rec.mode(), Mode::Paused);
    feed.push_ramp(500, 5, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 10));
    let elapsed = rec.status().elapsed_in_segment_secs;
    assert!((elapsed - 0.5).abs() < 1e-9, "elapsed {}", elapsed);

    rec.resume()?;
    assert_eq!(rec.mode(), Mode::Recording);
    feed.push_ramp(1000, 5, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 15));
    rec.stop()?;

    let segments = finalized(&events);
    assert_eq!(segments.len(), 1);
    let expected: Vec<i16> = (0..500).chain(1000..1500).collect();
    assert_eq!(read_samples(&segments[0].1), expected);
    Ok(())
}

#[test]
fn stop_waits_for_the_final_artifact() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (source, feed) = ScriptedSource::new();
    let encoder = Arc::new(ScriptedEncoder::with_delay(Duration::from_millis(50)));
    let rec = Recorder::new(
        RecorderConfig {
            format: OutputFormat::Mp3,
            ..config(dir.path())
        },
        Arc::new(source),
        encoder.clone(),
    )?;

    rec.start()?;
    feed.push_ramp(0, 15, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 15));
    rec.stop()?;

    assert_eq!(rec.mode(), Mode::Idle);
    assert!(rec.status().current_file.is_none());
    assert_eq!(rec.status().segments_completed, 2);

    // The scripted encoder copies, so the "mp3" is still readable WAV.
    let mp3s = files_with_ext(dir.path(), "mp3");
    assert_eq!(mp3s.len(), 2);
    assert!(files_with_ext(dir.path(), "wav").is_empty());
    let total: usize = mp3s.iter().map(|p| read_samples(p).len()).sum();
    assert_eq!(total, 1500);
    assert_eq!(encoder.calls().len(), 2);
    Ok(())
}

#[test]
fn encode_failure_keeps_raw_and_keeps_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, encoder) = recorder(RecorderConfig {
        format: OutputFormat::Mp3,
        ..config(dir.path())
    });
    let events = rec.events();
    encoder.fail_next("exit status 1");

    rec.start()?;
    feed.push_ramp(0, 10, 100);
    let failed = wait_event(&events, WAIT, |e| matches!(e, RecorderEvent::EncodeFailed { .. }))
        .expect("encode failure event");
    let RecorderEvent::EncodeFailed { segment, detail } = failed else {
        unreachable!()
    };
    assert_eq!(detail, "exit status 1");
    assert!(segment.path.exists(), "raw file must be retained");

    let status = rec.status();
    assert_eq!(status.mode, Mode::Recording);
    assert!(status.last_error.unwrap().contains("exit status 1"));

    feed.push_ramp(1000, 10, 100);
    assert!(wait_until(WAIT, || files_with_ext(dir.path(), "mp3").len() == 1));
    rec.stop()?;

    assert_eq!(read_samples(&segment.path), (0..1000).collect::<Vec<i16>>());
    Ok(())
}

#[test]
fn invalid_transitions_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, _feed, _) = recorder(config(dir.path()));

    assert!(matches!(rec.pause(), Err(RecorderError::InvalidState { .. })));
    assert!(matches!(rec.resume(), Err(RecorderError::InvalidState { .. })));
    assert!(matches!(rec.stop(), Err(RecorderError::InvalidState { .. })));

    rec.start()?;
    assert!(matches!(rec.start(), Err(RecorderError::InvalidState { .. })));
    assert!(matches!(rec.resume(), Err(RecorderError::InvalidState { .. })));
    assert!(matches!(
        rec.set_device("hw:2,0"),
        Err(RecorderError::InvalidState { .. })
    ));
    assert!(matches!(
        rec.set_format(OutputFormat::Flac),
        Err(RecorderError::InvalidState { .. })
    ));

    // Retention and duration are accepted in any mode.
    rec.set_retention(14)?;
    rec.set_segment_duration(Duration::from_secs(30))?;
    assert_eq!(rec.status().retention_days, 14);

    rec.pause()?;
    assert!(matches!(rec.pause(), Err(RecorderError::InvalidState { .. })));
    rec.stop()?;
    assert_eq!(rec.mode(), Mode::Idle);
    rec.set_device("hw:2,0")?;
    Ok(())
}

#[test]
fn unavailable_device_fails_start_synchronously() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(config(dir.path()));
    feed.fail_opens(1);

    let err = rec.start().unwrap_err();
    assert!(matches!(err, RecorderError::DeviceUnavailable { .. }));
    assert_eq!(rec.mode(), Mode::Idle);
    assert!(rec.status().last_error.is_some());
    assert!(files_with_ext(dir.path(), "part").is_empty());

    rec.start()?;
    assert_eq!(rec.mode(), Mode::Recording);
    rec.stop()?;
    Ok(())
}

#[test]
fn capture_error_reconnects_into_the_same_segment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(RecorderConfig {
        segment_duration: Duration::from_secs(60),
        ..config(dir.path())
    });
    let events = rec.events();

    rec.start()?;
    let next = feed.push_ramp(0, 3, 100);
    feed.fail("overrun");
    feed.push_ramp(next, 3, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 6));
    assert_eq!(rec.mode(), Mode::Recording);
    rec.stop()?;

    assert_eq!(feed.opens(), 2);
    let segments = finalized(&events);
    assert_eq!(segments.len(), 1);
    assert_eq!(read_samples(&segments[0].1), (0..600).collect::<Vec<i16>>());
    Ok(())
}

#[test]
fn failed_reconnect_halts_and_keeps_captured_audio() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(RecorderConfig {
        segment_duration: Duration::from_secs(60),
        ..config(dir.path())
    });
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 2, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 2));
    feed.fail_opens(1);
    feed.fail("device unplugged");

    let halted = wait_event(&events, WAIT, |e| matches!(e, RecorderEvent::CaptureHalted { .. }));
    assert!(halted.is_some());
    assert!(wait_until(WAIT, || rec.mode() == Mode::Idle));

    let status = rec.status();
    let last = status.last_error.expect("last error");
    assert!(last.contains("reconnect failed"), "{}", last);
    assert!(matches!(rec.stop(), Err(RecorderError::InvalidState { .. })));

    assert!(wait_until(WAIT, || files_with_ext(dir.path(), "wav").len() == 1));
    let wav = &files_with_ext(dir.path(), "wav")[0];
    assert_eq!(read_samples(wav).len(), 200);

    // A fresh start after the halt works.
    rec.start()?;
    rec.stop()?;
    Ok(())
}

#[test]
fn duration_change_applies_from_next_segment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(config(dir.path()));
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 5, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 5));
    rec.set_segment_duration(Duration::from_secs(2))?;
    feed.push_ramp(500, 25, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 30));
    rec.stop()?;

    let lens: Vec<usize> = finalized(&events)
        .iter()
        .map(|(_, p)| read_samples(p).len())
        .collect();
    // The segment opened by the last rotation had no audio and is dropped.
    assert_eq!(lens, vec![1000, 2000]);
    assert_eq!(files_with_ext(dir.path(), "wav").len(), 2);
    assert!(files_with_ext(dir.path(), "part").is_empty());
    Ok(())
}

#[test]
fn storage_failure_halts_and_marks_segment_failed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("rec");
    let (rec, feed, _) = recorder(config(&out));
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 3, 100);
    assert!(wait_until(WAIT, || feed.delivered() == 3));

    // The open file keeps taking writes; closing it at rotation fails.
    std::fs::remove_dir_all(&out)?;
    feed.push_ramp(300, 10, 100);

    let failed = wait_event(&events, WAIT, |e| matches!(e, RecorderEvent::SegmentFailed { .. }))
        .expect("segment failure event");
    let RecorderEvent::SegmentFailed { segment, error } = failed else {
        unreachable!()
    };
    assert_eq!(segment.status, SegmentStatus::Failed);
    assert!(error.contains("storage"), "{}", error);

    let halted = wait_event(&events, WAIT, |e| matches!(e, RecorderEvent::CaptureHalted { .. }));
    assert!(halted.is_some());
    assert!(wait_until(WAIT, || rec.mode() == Mode::Idle));

    let status = rec.status();
    assert!(status.current_file.is_none());
    assert!(status.last_error.expect("last error").contains("storage"));

    assert!(matches!(rec.start(), Err(RecorderError::Storage { .. })));
    assert_eq!(rec.mode(), Mode::Idle);
    Ok(())
}

#[test]
fn stop_during_reconnect_delay_returns_promptly() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (rec, feed, _) = recorder(RecorderConfig {
        segment_duration: Duration::from_secs(60),
        reconnect_delay: Duration::from_secs(30),
        ..config(dir.path())
    });
    let events = rec.events();

    rec.start()?;
    feed.push_ramp(0, 2, 100);
    feed.fail("device unplugged");
    assert!(wait_until(WAIT, || feed.pending() == 0));

    let started = Instant::now();
    rec.stop()?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(rec.mode(), Mode::Idle);
    assert_eq!(feed.opens(), 1);

    let segments = finalized(&events);
    assert_eq!(segments.len(), 1);
    assert_eq!(read_samples(&segments[0].1), (0..200).collect::<Vec<i16>>());
    Ok(())
}

#[test]
fn second_recorder_on_same_directory_is_refused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_rec, _feed, _) = recorder(config(dir.path()));

    let (source, _) = ScriptedSource::new();
    let second = Recorder::new(
        config(dir.path()),
        Arc::new(source),
        Arc::new(ScriptedEncoder::new()),
    );
    assert!(matches!(second, Err(RecorderError::Locked { .. })));
    Ok(())
}
