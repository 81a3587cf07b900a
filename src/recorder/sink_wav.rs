// src/recorder/sink_wav.rs
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{RecorderError, RecorderResult};
use crate::recorder::segment::{PART_SUFFIX, Segment, SegmentStatus, unique_segment_path};
use crate::source::Frame;

const BITS: u16 = 16;
// Header sizes are rewritten this often so a crash loses at most this much.
const FLUSH_EVERY_SECS: u64 = 10;

/// Streaming writer for the currently open segment.
///
/// Audio goes to `<stem>.wav.part`; `finish` writes the final header and
/// renames it to `<stem>.wav`.
pub struct WavSink {
    segment: Segment,
    writer: Option<WavWriter<BufWriter<File>>>,
    mono: bool,
    flush_every: u64,
    since_flush: u64,
}

impl WavSink {
    pub fn create(mut segment: Segment, channels: u16, mono: bool) -> RecorderResult<Self> {
        let spec = WavSpec {
            channels: if mono { 1 } else { channels },
            sample_rate: segment.clock.sample_rate(),
            bits_per_sample: BITS,
            sample_format: SampleFormat::Int,
        };

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&segment.part_path)
            .map_err(|e| RecorderError::storage(&segment.part_path, e))?;
        let writer = WavWriter::new(BufWriter::new(file), spec)
            .map_err(|e| hound_error(&segment.part_path, e))?;

        segment.status = SegmentStatus::Open;
        log::info!("[wav_sink] new file {:?}", segment.part_path);

        Ok(Self {
            flush_every: segment.clock.sample_rate() as u64 * FLUSH_EVERY_SECS,
            segment,
            writer: Some(writer),
            mono,
            since_flush: 0,
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }

    /// Writes one frame. Sample accounting is left to the caller.
    pub fn write_frame(&mut self, frame: &Frame) -> RecorderResult<()> {
        let path = &self.segment.part_path;
        let Some(w) = self.writer.as_mut() else {
            return Err(RecorderError::storage_other(path, "segment already closed"));
        };

        if self.mono && frame.channels > 1 {
            for s in frame.downmix_mono() {
                w.write_sample(s).map_err(|e| hound_error(path, e))?;
            }
        } else {
            for s in frame.samples.iter() {
                w.write_sample(*s).map_err(|e| hound_error(path, e))?;
            }
        }

        self.since_flush += frame.len_per_channel();
        if self.since_flush >= self.flush_every {
            w.flush().map_err(|e| hound_error(path, e))?;
            self.since_flush = 0;
        }
        Ok(())
    }

    /// Finalizes the header, releases the handle and moves the file to its
    /// final name. The segment becomes `Finalizing`, or `Failed` if any
    /// step fails; it stays available through `into_segment` either way.
    pub fn finish(&mut self) -> RecorderResult<()> {
        let result = self.close_writer().and_then(|()| {
            fs::rename(&self.segment.part_path, &self.segment.path)
                .map_err(|e| RecorderError::storage(&self.segment.path, e))
        });
        match result {
            Ok(()) => {
                self.segment.status = SegmentStatus::Finalizing;
                log::info!(
                    "[wav_sink] closed {:?} ({} samples)",
                    self.segment.path,
                    self.segment.clock.samples()
                );
            }
            Err(_) => self.segment.status = SegmentStatus::Failed,
        }
        result
    }

    pub fn into_segment(self) -> Segment {
        self.segment
    }

    fn close_writer(&mut self) -> RecorderResult<()> {
        match self.writer.take() {
            Some(w) => w
                .finalize()
                .map_err(|e| hound_error(&self.segment.part_path, e)),
            None => Ok(()),
        }
    }

    /// Drops a segment that never received audio and removes its file.
    pub fn discard(mut self) -> Segment {
        if let Err(e) = self.close_writer() {
            log::warn!("[wav_sink] closing empty {:?}: {}", self.segment.part_path, e);
        }
        match fs::remove_file(&self.segment.part_path) {
            Ok(()) => log::info!("[wav_sink] discarded empty {:?}", self.segment.part_path),
            Err(e) => log::warn!("[wav_sink] removing {:?}: {}", self.segment.part_path, e),
        }
        self.segment.status = SegmentStatus::Closed;
        self.segment
    }

    /// Best-effort close after a write failure. Whatever reached the disk is
    /// kept; the `.part` file is left for recovery if the header can't be
    /// written.
    pub fn abandon(mut self) -> Segment {
        self.segment.status = SegmentStatus::Failed;
        if let Some(w) = self.writer.take() {
            match w.finalize() {
                Ok(()) => {
                    if let Err(e) = fs::rename(&self.segment.part_path, &self.segment.path) {
                        log::warn!("[wav_sink] keeping {:?}: {}", self.segment.part_path, e);
                    }
                }
                Err(e) => {
                    log::warn!("[wav_sink] keeping {:?}: {}", self.segment.part_path, e);
                }
            }
        }
        self.segment
    }
}

fn hound_error(path: &Path, err: hound::Error) -> RecorderError {
    match err {
        hound::Error::IoError(io) => RecorderError::storage(path, io),
        other => RecorderError::storage_other(path, other),
    }
}

/// Turns `.wav.part` leftovers from an unclean shutdown into valid `.wav`
/// files. Returns the recovered paths.
pub fn recover_partials(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut recovered = Vec::new();
    for entry in entries.flatten() {
        let part = entry.path();
        if part.extension().and_then(|e| e.to_str()) != Some(PART_SUFFIX) {
            continue;
        }
        let raw = part.with_extension("");
        let Some(stem) = raw.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match repair_wav_header(&part) {
            Ok(bytes) => {
                let target = if raw.exists() {
                    unique_segment_path(dir, stem)
                } else {
                    raw.clone()
                };
                match fs::rename(&part, &target) {
                    Ok(()) => {
                        log::info!("[wav_sink] recovered {:?} ({} data bytes)", target, bytes);
                        recovered.push(target);
                    }
                    Err(e) => log::warn!("[wav_sink] recover rename {:?} failed: {}", part, e),
                }
            }
            Err(e) => log::warn!("[wav_sink] cannot recover {:?}: {}", part, e),
        }
    }
    recovered.sort();
    recovered
}

/// Rewrites the RIFF and data chunk sizes from the file length.
/// Returns the resulting data chunk size in bytes.
pub fn repair_wav_header(path: &Path) -> std::io::Result<u32> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_size = file.metadata()?.len();
    if file_size < 44 {
        return Err(std::io::Error::other("too small to be a WAV file"));
    }

    let mut header = [0u8; 12];
    file.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(std::io::Error::other("missing RIFF/WAVE header"));
    }

    let mut block_align: u64 = 0;
    let mut data_offset: Option<u64> = None;
    let mut pos: u64 = 12;
    while pos + 8 <= file_size {
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = [0u8; 8];
        file.read_exact(&mut chunk)?;
        let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;

        if &chunk[0..4] == b"fmt " {
            let mut fmt = [0u8; 16];
            file.read_exact(&mut fmt)?;
            block_align = u16::from_le_bytes([fmt[12], fmt[13]]) as u64;
        } else if &chunk[0..4] == b"data" {
            data_offset = Some(pos);
            break;
        }
        pos += 8 + size + (size % 2);
    }

    let Some(data_offset) = data_offset else {
        return Err(std::io::Error::other("no data chunk"));
    };
    if block_align == 0 {
        return Err(std::io::Error::other("no fmt chunk"));
    }

    let mut data_size = file_size - data_offset - 8;
    data_size -= data_size % block_align;
    let end = data_offset + 8 + data_size;
    file.set_len(end)?;

    let riff_size = (end - 8) as u32;
    let data_size = data_size as u32;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.seek(SeekFrom::Start(data_offset + 4))?;
    file.write_all(&data_size.to_le_bytes())?;
    file.flush()?;
    Ok(data_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::segment::part_path_for;
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn segment(dir: &Path) -> Segment {
        let t = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        Segment::new(1, dir, t, Duration::from_secs(60), 8_000)
    }

    fn frame(seq: u64, samples: Vec<i16>, channels: u16) -> Frame {
        Frame {
            seq,
            sample_rate: 8_000,
            channels,
            samples,
        }
    }

    #[test]
    fn writes_part_then_renames_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(dir.path());
        let part = seg.part_path.clone();
        let mut sink = WavSink::create(seg, 2, false).unwrap();
        sink.write_frame(&frame(1, vec![1, 2, 3, 4], 2)).unwrap();
        assert!(part.exists());

        sink.finish().unwrap();
        let seg = sink.into_segment();
        assert!(!part.exists());
        assert_eq!(seg.status, SegmentStatus::Finalizing);

        let mut reader = hound::WavReader::open(&seg.path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn failed_rename_marks_segment_failed() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(dir.path());
        let part = seg.part_path.clone();
        let mut sink = WavSink::create(seg, 1, false).unwrap();
        sink.write_frame(&frame(1, vec![1, 2], 1)).unwrap();
        fs::remove_file(&part).unwrap();

        assert!(matches!(sink.finish(), Err(RecorderError::Storage { .. })));
        let seg = sink.into_segment();
        assert_eq!(seg.status, SegmentStatus::Failed);
        assert!(!seg.path.exists());
    }

    #[test]
    fn discard_removes_the_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(dir.path());
        let part = seg.part_path.clone();
        let sink = WavSink::create(seg, 1, false).unwrap();
        assert!(part.exists());

        let seg = sink.discard();
        assert!(!part.exists());
        assert!(!seg.path.exists());
    }

    #[test]
    fn mono_sink_downmixes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavSink::create(segment(dir.path()), 2, true).unwrap();
        sink.write_frame(&frame(1, vec![10, 30, -10, -30], 2)).unwrap();
        sink.finish().unwrap();
        let seg = sink.into_segment();

        let mut reader = hound::WavReader::open(&seg.path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![20, -20]);
    }

    #[test]
    fn recovers_truncated_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(dir.path());
        let raw = seg.path.clone();
        let part = part_path_for(&raw);

        // Simulate a crash: flush samples without finalizing the header.
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(&part, spec).unwrap();
        for s in 0..100i16 {
            w.write_sample(s).unwrap();
        }
        w.flush().unwrap();
        std::mem::forget(w);
        // A torn trailing byte must be cut off.
        let mut f = OpenOptions::new().append(true).open(&part).unwrap();
        f.write_all(&[0x7f]).unwrap();
        drop(f);

        let recovered = recover_partials(dir.path());
        assert_eq!(recovered, vec![raw.clone()]);
        assert!(!part.exists());

        let mut reader = hound::WavReader::open(&raw).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, (0..100).collect::<Vec<i16>>());
    }

    #[test]
    fn repair_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav.part");
        fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(repair_wav_header(&path).is_err());
        assert!(recover_partials(dir.path()).is_empty());
        assert!(path.exists());
    }
}
