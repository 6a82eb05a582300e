use std::path::PathBuf;

/// Errors raised while parsing the RIFF/WAVE container.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("File does not contain any bytes")]
    EmptyFile,
    #[error("Not a RIFF file")]
    MissingRiffMagic,
    #[error("Not a WAVE file")]
    MissingWaveTag,
    #[error("Truncated or invalid size field")]
    MalformedSize,
    #[error("Malformed format chunk")]
    MalformedFormatChunk,
    #[error("Malformed chunk id {0:?}")]
    MalformedChunkId(String),
}

/// Errors raised while decoding, harmonizing or writing audio.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Variations are not of the same bit depth")]
    BitDepthMismatch,
    #[error("Variations have different channel counts that are not mono or stereo")]
    ChannelCountUnsupported,
    #[error("Wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Resampler construction error: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("Resample error: {0}")]
    Resample(#[from] rubato::ResampleError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Container parsing failed for {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("Audio processing failed for {path}: {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error("Report writing failed for {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("I/O error during processing of {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
