//! RIFF/WAVE container parsing and metadata re-assembly.
//!
//! The parser splits a file into header, format chunk, data chunk and a
//! verbatim blob of every other chunk. The assembler grafts that blob from an
//! original file onto a freshly written one, so vendor metadata (`bext`,
//! `iXML`, Soundminer chunks and friends) survives the rewrite.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, ParseError};

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_CHUNK_ID: &[u8; 4] = b"fmt ";
const DATA_CHUNK_ID: &[u8; 4] = b"data";
/// Avid writes a DGDA chunk that is different for each file, so it is read
/// and discarded rather than carried over.
const VENDOR_CHUNK_ID: &[u8; 4] = b"DGDA";

/// Fixed fields of the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// Parsed representation of one WAV file.
#[derive(Debug, Clone)]
pub struct WavDocument {
    /// Declared RIFF size, i.e. total length minus 8.
    pub declared_size: u32,
    pub format: Option<FormatInfo>,
    header: Vec<u8>,
    fmt: Vec<u8>,
    data: Vec<u8>,
    generic_metadata: Vec<u8>,
    /// Chunk id mapped to its declared size, for every generic chunk seen.
    pub generic_metadata_info: BTreeMap<String, u32>,
}

impl WavDocument {
    /// Raw magic + size + format tag bytes.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    /// Raw `fmt ` chunk bytes (the 16 fixed fields; extension bytes are not
    /// carried).
    pub fn fmt_bytes(&self) -> &[u8] {
        &self.fmt
    }

    /// Raw `data` chunk bytes, word-aligned.
    pub fn data_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Every non-format, non-data, non-vendor chunk, verbatim and in file
    /// order.
    pub fn generic_metadata(&self) -> &[u8] {
        &self.generic_metadata
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }
}

/// Parses a complete WAV file from memory.
pub fn parse(bytes: &[u8]) -> Result<WavDocument, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyFile);
    }

    let mut reader = Reader::new(bytes);

    let magic = reader.take(4).ok_or(ParseError::MissingRiffMagic)?;
    if magic != RIFF_MAGIC {
        return Err(ParseError::MissingRiffMagic);
    }
    let declared_size = reader.read_u32().ok_or(ParseError::MalformedSize)?;
    let tag = reader.take(4).ok_or(ParseError::MissingWaveTag)?;
    if tag != WAVE_TAG {
        return Err(ParseError::MissingWaveTag);
    }

    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(RIFF_MAGIC);
    header.extend_from_slice(&declared_size.to_le_bytes());
    header.extend_from_slice(WAVE_TAG);

    let mut document = WavDocument {
        declared_size,
        format: None,
        header,
        fmt: Vec::new(),
        data: Vec::new(),
        generic_metadata: Vec::new(),
        generic_metadata_info: BTreeMap::new(),
    };

    loop {
        let chunk_id = match read_chunk_id(&mut reader)? {
            Some(id) => id,
            None => break,
        };

        if &chunk_id == FMT_CHUNK_ID {
            read_fmt(&mut reader, &chunk_id, &mut document)?;
        } else if &chunk_id == DATA_CHUNK_ID {
            read_data(&mut reader, &chunk_id, &mut document)?;
        } else if &chunk_id == VENDOR_CHUNK_ID {
            skip_vendor(&mut reader)?;
        } else {
            read_generic(&mut reader, &chunk_id, &mut document)?;
        }
    }

    Ok(document)
}

/// Reads and validates the next chunk id. Returns `None` at end of input.
///
/// Ids must decode as exactly four alphanumeric, space or underscore bytes.
/// Some files declare wrong chunk sizes (a 40-byte `fmt ` that really holds
/// 16), which makes the cursor drift into payload bytes; the validation turns
/// that into a parse error instead of nonsense chunks.
fn read_chunk_id(reader: &mut Reader<'_>) -> Result<Option<[u8; 4]>, ParseError> {
    if reader.remaining() == 0 {
        return Ok(None);
    }
    let raw = reader
        .take(4)
        .ok_or_else(|| ParseError::MalformedChunkId(String::new()))?;

    let valid = raw
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b' ' || b == b'_');
    if !valid {
        return Err(ParseError::MalformedChunkId(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    }

    Ok(Some([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_fmt(
    reader: &mut Reader<'_>,
    chunk_id: &[u8; 4],
    document: &mut WavDocument,
) -> Result<(), ParseError> {
    let chunk_size = reader.read_u32().ok_or(ParseError::MalformedFormatChunk)?;
    if chunk_size < 16 {
        return Err(ParseError::MalformedFormatChunk);
    }

    let audio_format = reader.read_u16().ok_or(ParseError::MalformedFormatChunk)?;
    let channels = reader.read_u16().ok_or(ParseError::MalformedFormatChunk)?;
    let sample_rate = reader.read_u32().ok_or(ParseError::MalformedFormatChunk)?;
    let byte_rate = reader.read_u32().ok_or(ParseError::MalformedFormatChunk)?;
    let block_align = reader.read_u16().ok_or(ParseError::MalformedFormatChunk)?;
    let bits_per_sample = reader.read_u16().ok_or(ParseError::MalformedFormatChunk)?;

    // fmt carries 16 bytes of fields but the chunk can be 18 or 40 bytes;
    // the extension is ignored.
    reader
        .take(chunk_size as usize - 16)
        .ok_or(ParseError::MalformedFormatChunk)?;

    document.format = Some(FormatInfo {
        audio_format,
        channels,
        sample_rate,
        byte_rate,
        block_align,
        bits_per_sample,
    });

    // The rebuilt chunk holds exactly the 16 fixed fields, so it declares 16
    // even when the source chunk was 18 or 40 bytes.
    document.fmt.clear();
    document.fmt.extend_from_slice(chunk_id);
    document.fmt.extend_from_slice(&16u32.to_le_bytes());
    document.fmt.extend_from_slice(&audio_format.to_le_bytes());
    document.fmt.extend_from_slice(&channels.to_le_bytes());
    document.fmt.extend_from_slice(&sample_rate.to_le_bytes());
    document.fmt.extend_from_slice(&byte_rate.to_le_bytes());
    document.fmt.extend_from_slice(&block_align.to_le_bytes());
    document
        .fmt
        .extend_from_slice(&bits_per_sample.to_le_bytes());

    Ok(())
}

fn read_data(
    reader: &mut Reader<'_>,
    chunk_id: &[u8; 4],
    document: &mut WavDocument,
) -> Result<(), ParseError> {
    let chunk_size = reader.read_u32().ok_or(ParseError::MalformedSize)?;
    let content = reader
        .take(chunk_size as usize)
        .ok_or(ParseError::MalformedSize)?;

    document.data.clear();
    document.data.extend_from_slice(chunk_id);
    document.data.extend_from_slice(&chunk_size.to_le_bytes());
    document.data.extend_from_slice(content);

    // Chunks must be an even length. Odd payloads carry one padding byte in
    // the stream and are stored with one extra zero byte.
    if chunk_size % 2 != 0 {
        let _ = reader.take(1);
        document.data.push(0);
    }

    Ok(())
}

fn skip_vendor(reader: &mut Reader<'_>) -> Result<(), ParseError> {
    let chunk_size = reader.read_u32().ok_or(ParseError::MalformedSize)?;
    reader
        .take(chunk_size as usize)
        .ok_or(ParseError::MalformedSize)?;
    if chunk_size % 2 != 0 {
        let _ = reader.take(1);
    }
    Ok(())
}

fn read_generic(
    reader: &mut Reader<'_>,
    chunk_id: &[u8; 4],
    document: &mut WavDocument,
) -> Result<(), ParseError> {
    let chunk_size = reader.read_u32().ok_or(ParseError::MalformedSize)?;
    let content = reader
        .take(chunk_size as usize)
        .ok_or(ParseError::MalformedSize)?;

    document
        .generic_metadata_info
        .insert(String::from_utf8_lossy(chunk_id).into_owned(), chunk_size);

    document.generic_metadata.extend_from_slice(chunk_id);
    document
        .generic_metadata
        .extend_from_slice(&chunk_size.to_le_bytes());
    document.generic_metadata.extend_from_slice(content);
    if chunk_size % 2 != 0 {
        let _ = reader.take(1);
        document.generic_metadata.push(0);
    }

    Ok(())
}

/// Parses a WAV file from disk, attaching the path to any error.
pub fn parse_file(path: &Path) -> Result<WavDocument, Error> {
    let bytes = fs::read(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&bytes).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Rewrites `new_path` with its own header, format and data chunks followed
/// by the generic metadata of `original_path`, patching the RIFF size field
/// to the combined length minus 8.
///
/// On failure after `new_path` was written by the engine, the caller is
/// expected to delete the file to avoid leaving a half-assembled artifact.
pub fn assemble_metadata(original_path: &Path, new_path: &Path) -> Result<(), Error> {
    let original = parse_file(original_path)?;
    let new_document = parse_file(new_path)?;

    let mut blob = Vec::with_capacity(
        new_document.header_bytes().len()
            + new_document.fmt_bytes().len()
            + new_document.data_bytes().len()
            + original.generic_metadata().len(),
    );
    blob.extend_from_slice(new_document.header_bytes());
    blob.extend_from_slice(new_document.fmt_bytes());
    blob.extend_from_slice(new_document.data_bytes());
    blob.extend_from_slice(original.generic_metadata());

    patch_declared_size(&mut blob);

    fs::write(new_path, &blob).map_err(|e| Error::Io {
        path: new_path.to_path_buf(),
        source: e,
    })
}

/// Overwrites the size field at bytes 4..8 with `length - 8`.
fn patch_declared_size(blob: &mut [u8]) {
    let size = (blob.len() as u32).saturating_sub(8);
    blob[4..8].copy_from_slice(&size.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
        out.extend_from_slice(id);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 != 0 {
            out.push(0);
        }
    }

    fn fmt_payload(channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * block_align as u32;
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&channels.to_le_bytes());
        payload.extend_from_slice(&sample_rate.to_le_bytes());
        payload.extend_from_slice(&byte_rate.to_le_bytes());
        payload.extend_from_slice(&block_align.to_le_bytes());
        payload.extend_from_slice(&bits.to_le_bytes());
        payload
    }

    /// A minimal WAV with the given extra chunks appended after `data`.
    fn build_wav(data: &[u8], extra: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        push_chunk(&mut body, FMT_CHUNK_ID, &fmt_payload(1, 48_000, 16));
        push_chunk(&mut body, DATA_CHUNK_ID, data);
        for (id, payload) in extra {
            push_chunk(&mut body, id, payload);
        }

        let mut out = Vec::new();
        out.extend_from_slice(RIFF_MAGIC);
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(WAVE_TAG);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn empty_input_is_a_distinct_error() {
        assert!(matches!(parse(&[]), Err(ParseError::EmptyFile)));
    }

    #[test]
    fn non_riff_input_is_rejected() {
        assert!(matches!(
            parse(b"OggS\x00\x00\x00\x00"),
            Err(ParseError::MissingRiffMagic)
        ));
    }

    #[test]
    fn non_wave_riff_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"AVI ");
        assert!(matches!(parse(&bytes), Err(ParseError::MissingWaveTag)));
    }

    #[test]
    fn header_fmt_data_round_trip_is_byte_identical() {
        let fixture = build_wav(&[1, 2, 3, 4, 5, 6], &[]);
        let document = parse(&fixture).unwrap();

        let mut rebuilt = Vec::new();
        rebuilt.extend_from_slice(document.header_bytes());
        rebuilt.extend_from_slice(document.fmt_bytes());
        rebuilt.extend_from_slice(document.data_bytes());
        assert_eq!(rebuilt, fixture);

        let format = document.format.unwrap();
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 48_000);
        assert_eq!(format.bits_per_sample, 16);
    }

    #[test]
    fn odd_data_chunk_is_padded_to_even_length() {
        let fixture = build_wav(&[9, 9, 9], &[]);
        let document = parse(&fixture).unwrap();
        // id + size + 3 payload bytes + 1 pad byte
        assert_eq!(document.data_bytes().len(), 12);
        assert_eq!(document.data_bytes()[11], 0);
        // Declared size stays odd.
        assert_eq!(&document.data_bytes()[4..8], &3u32.to_le_bytes());
    }

    #[test]
    fn fmt_extension_bytes_are_skipped() {
        let mut body = Vec::new();
        let mut payload = fmt_payload(2, 44_100, 24);
        payload.extend_from_slice(&[0xAA; 24]); // 40-byte extensible fmt
        push_chunk(&mut body, FMT_CHUNK_ID, &payload);
        push_chunk(&mut body, DATA_CHUNK_ID, &[0, 0]);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(&body);

        let document = parse(&bytes).unwrap();
        let format = document.format.unwrap();
        assert_eq!(format.channels, 2);
        assert_eq!(format.sample_rate, 44_100);
        assert!(document.generic_metadata().is_empty());
    }

    #[test]
    fn vendor_chunk_is_discarded() {
        let fixture = build_wav(&[0, 0], &[(b"DGDA", vec![7; 33])]);
        let document = parse(&fixture).unwrap();
        assert!(document.generic_metadata().is_empty());
        assert!(document.generic_metadata_info.is_empty());
    }

    #[test]
    fn generic_chunks_are_preserved_verbatim_with_info_map() {
        let extra: Vec<(&[u8; 4], Vec<u8>)> = vec![
            (b"bext", vec![1; 604]),
            (b"ID3 ", vec![2; 40960]),
            (b"SMED", vec![3; 110276]),
            (b"LIST", vec![4; 218]),
            (b"iXML", vec![5; 669]),
            (b"_PMX", vec![6; 3658]),
        ];
        let fixture = build_wav(&[0, 0, 0, 0], &extra);
        let document = parse(&fixture).unwrap();

        let expected: BTreeMap<String, u32> = [
            ("bext", 604),
            ("ID3 ", 40960),
            ("SMED", 110276),
            ("LIST", 218),
            ("iXML", 669),
            ("_PMX", 3658),
        ]
        .into_iter()
        .map(|(id, size)| (id.to_string(), size as u32))
        .collect();
        assert_eq!(document.generic_metadata_info, expected);

        // Blob carries the chunks byte-for-byte in file order.
        let mut expected_blob = Vec::new();
        for (id, payload) in &extra {
            push_chunk(&mut expected_blob, id, payload);
        }
        assert_eq!(document.generic_metadata(), expected_blob.as_slice());
    }

    #[test]
    fn garbage_chunk_id_is_a_parse_error() {
        let mut fixture = build_wav(&[0, 0], &[]);
        fixture.extend_from_slice(&[0xFF, 0x00, 0x01, 0x02]);
        fixture.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            parse(&fixture),
            Err(ParseError::MalformedChunkId(_))
        ));
    }

    #[test]
    fn assemble_merges_new_audio_with_original_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let original_path = dir.path().join("original.wav");
        let new_path = dir.path().join("new.wav");

        let original = build_wav(
            &[1, 1, 1, 1],
            &[(b"bext", vec![8; 604]), (b"iXML", vec![9; 669])],
        );
        let fresh = build_wav(&[2, 2, 2, 2, 2, 2, 2, 2], &[]);
        std::fs::write(&original_path, &original).unwrap();
        std::fs::write(&new_path, &fresh).unwrap();

        assemble_metadata(&original_path, &new_path).unwrap();

        let merged_bytes = std::fs::read(&new_path).unwrap();
        let merged = parse(&merged_bytes).unwrap();

        assert_eq!(merged.declared_size as usize, merged_bytes.len() - 8);
        assert_eq!(
            merged.generic_metadata_info,
            [("bext".to_string(), 604u32), ("iXML".to_string(), 669u32)]
                .into_iter()
                .collect()
        );
        // The audio itself comes from the new file.
        let fresh_document = parse(&fresh).unwrap();
        assert_eq!(merged.data_bytes(), fresh_document.data_bytes());
    }
}
