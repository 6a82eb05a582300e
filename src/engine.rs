//! Audio decode, harmonization and concatenation for one variation set.
//!
//! Members are decoded in full, brought to a common sample rate and channel
//! count, and written out as one file with a block of silence between every
//! consecutive pair.

use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::{EngineError, Error};

/// Sample format and bit depth of a member, kept so the output can be
/// written back the way the inputs were stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTag {
    pub format: SampleFormat,
    pub bits_per_sample: u16,
}

/// Decoded PCM for one input file. Planar, normalized to [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Vec<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    tag: SampleTag,
}

impl AudioBlock {
    fn frames(&self) -> usize {
        self.samples.first().map(|plane| plane.len()).unwrap_or(0)
    }
}

/// Per-member record of the original and harmonized layout, for the report.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub path: PathBuf,
    pub channels: u16,
    pub sample_rate: u32,
    pub harmonized_channels: u16,
    pub harmonized_sample_rate: u32,
}

/// Result of one conversion unit, before metadata assembly.
#[derive(Debug)]
pub struct ConcatOutcome {
    pub output_path: PathBuf,
    pub duration_secs: f64,
    pub members: Vec<MemberInfo>,
}

/// Reads a file's duration in seconds from its header, without decoding.
pub fn probe_duration(path: &Path) -> Result<f64, EngineError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Decodes a whole WAV file into an [`AudioBlock`].
pub fn decode(path: &Path) -> Result<AudioBlock, EngineError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(reader.duration() as usize); channels];

    match spec.sample_format {
        SampleFormat::Float => {
            for (i, sample) in reader.samples::<f32>().enumerate() {
                planes[i % channels].push(sample?);
            }
        }
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for (i, sample) in reader.samples::<i32>().enumerate() {
                planes[i % channels].push(sample? as f32 / scale);
            }
        }
    }

    Ok(AudioBlock {
        samples: planes,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        tag: SampleTag {
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
        },
    })
}

/// Brings a block up to `target_rate` with a sinc resampler, processing the
/// whole buffer as a single chunk.
fn resample_block(block: &mut AudioBlock, target_rate: u32) -> Result<(), EngineError> {
    if block.sample_rate == target_rate || block.frames() == 0 {
        block.sample_rate = target_rate;
        return Ok(());
    }

    debug!(
        "Resampling {} Hz -> {} Hz ({} channels)",
        block.sample_rate, target_rate, block.channels
    );

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / block.sample_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        params,
        block.frames(),
        block.samples.len(),
    )?;

    block.samples = resampler.process(&block.samples, None)?;
    block.sample_rate = target_rate;
    Ok(())
}

/// Duplicates a mono block's single channel into both stereo channels.
fn upmix_to_stereo(block: &mut AudioBlock) {
    debug_assert_eq!(block.channels, 1);
    let plane = block.samples[0].clone();
    block.samples.push(plane);
    block.channels = 2;
}

/// Concatenates the members of one variation group into `output_path`.
///
/// The target sample rate and channel count are the maxima across members;
/// channel harmonization only supports mono and stereo, and all members must
/// share one sample format and bit depth. `round(rate * silence_duration)`
/// frames of silence go between every consecutive pair of members.
pub fn concatenate_variations(
    members: &[PathBuf],
    silence_duration: f64,
    output_path: &Path,
) -> Result<ConcatOutcome, Error> {
    let mut blocks = Vec::with_capacity(members.len());
    for member in members {
        let block = decode(member).map_err(|e| Error::Engine {
            path: member.clone(),
            source: e,
        })?;
        blocks.push(block);
    }

    let first = members[0].clone();
    let group_error = |source: EngineError| Error::Engine {
        path: first.clone(),
        source,
    };

    let target_rate = blocks.iter().map(|b| b.sample_rate).max().unwrap_or(0);
    let target_channels = blocks.iter().map(|b| b.channels).max().unwrap_or(0);

    let tag = blocks[0].tag;
    if blocks.iter().any(|b| b.tag != tag) {
        return Err(group_error(EngineError::BitDepthMismatch));
    }
    if target_channels > 2 {
        return Err(group_error(EngineError::ChannelCountUnsupported));
    }

    let member_infos: Vec<MemberInfo> = members
        .iter()
        .zip(blocks.iter())
        .map(|(path, block)| MemberInfo {
            path: path.clone(),
            channels: block.channels,
            sample_rate: block.sample_rate,
            harmonized_channels: target_channels,
            harmonized_sample_rate: target_rate,
        })
        .collect();

    for block in &mut blocks {
        if block.sample_rate < target_rate {
            resample_block(block, target_rate).map_err(|e| group_error(e))?;
        }
        if block.channels != target_channels {
            if block.channels == 1 && target_channels == 2 {
                upmix_to_stereo(block);
            } else {
                return Err(group_error(EngineError::ChannelCountUnsupported));
            }
        }
    }

    let silence_frames = (target_rate as f64 * silence_duration).round() as usize;

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let spec = WavSpec {
        channels: target_channels,
        sample_rate: target_rate,
        bits_per_sample: tag.bits_per_sample,
        sample_format: tag.format,
    };
    let write_error = |source: EngineError| Error::Engine {
        path: output_path.to_path_buf(),
        source,
    };

    let mut total_frames = 0usize;
    let mut writer = WavWriter::create(output_path, spec)
        .map_err(|e| write_error(EngineError::Wav(e)))?;
    for (index, block) in blocks.iter().enumerate() {
        if index > 0 {
            write_silence(&mut writer, silence_frames, target_channels, tag)
                .map_err(|e| write_error(e))?;
            total_frames += silence_frames;
        }
        write_block(&mut writer, block, tag).map_err(|e| write_error(e))?;
        total_frames += block.frames();
    }
    writer
        .finalize()
        .map_err(|e| write_error(EngineError::Wav(e)))?;

    Ok(ConcatOutcome {
        output_path: output_path.to_path_buf(),
        duration_secs: total_frames as f64 / target_rate as f64,
        members: member_infos,
    })
}

fn write_block<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    block: &AudioBlock,
    tag: SampleTag,
) -> Result<(), EngineError> {
    let frames = block.frames();
    match tag.format {
        SampleFormat::Float => {
            for frame in 0..frames {
                for plane in &block.samples {
                    writer.write_sample(plane[frame])?;
                }
            }
        }
        SampleFormat::Int => {
            let scale = (1i64 << (tag.bits_per_sample - 1)) as f32;
            let max = scale - 1.0;
            for frame in 0..frames {
                for plane in &block.samples {
                    let sample = (plane[frame] * scale).round().clamp(-scale, max);
                    writer.write_sample(sample as i32)?;
                }
            }
        }
    }
    Ok(())
}

fn write_silence<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    frames: usize,
    channels: u16,
    tag: SampleTag,
) -> Result<(), EngineError> {
    for _ in 0..frames * channels as usize {
        match tag.format {
            SampleFormat::Float => writer.write_sample(0.0f32)?,
            SampleFormat::Int => writer.write_sample(0i32)?,
        }
    }
    Ok(())
}
