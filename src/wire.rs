//! On-disk layout: log block framing and the format sidecar.
//!
//! Everything is little-endian. A log file is a concatenation of blocks
//! `<streamIndex: u64><blockSize: u64><payload>`; the sidecar next to it
//! (`<log path>.fmt`) is `<streamCount: u64><orderingEnabled: u8>` followed
//! by one entry per registered format.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::format::{FormatDescriptor, RegisteredFormat};
use crate::key::{self, MessageKey, ParameterKey};

/// Bytes taken by a block header: stream index + block size.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Suffix appended to the log path to name the sidecar.
pub const FORMAT_FILE_SUFFIX: &str = ".fmt";

pub fn format_file_path(log_path: &Path) -> std::path::PathBuf {
    let mut p = log_path.as_os_str().to_owned();
    p.push(FORMAT_FILE_SUFFIX);
    p.into()
}

/// Bounds-checked little-endian cursor over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.read_bytes(1)?;
        Ok(b[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::MalformedLog(format!(
                "unexpected end of data: need {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Decoded sidecar: stream count, ordering flag and the format table.
#[derive(Debug)]
pub struct FormatFile {
    pub stream_count: usize,
    pub ordering: bool,
    pub formats: HashMap<MessageKey, FormatDescriptor>,
}

/// Serializes the registry snapshot next to the log. Entry layout:
/// `<key: u32><stringLen: u64><stringBytes + NUL><category: u32>` followed
/// by one `u32` per parameter.
pub fn write_format_file(
    log_path: &Path,
    stream_count: u64,
    ordering: bool,
    formats: &[(MessageKey, RegisteredFormat)],
) -> Result<()> {
    let path = format_file_path(log_path);
    let mut out = Vec::new();

    out.extend_from_slice(&stream_count.to_le_bytes());
    out.push(ordering as u8);

    for (message_key, format) in formats {
        out.extend_from_slice(&message_key.0.to_le_bytes());
        // The string length includes the trailing NUL.
        let len = format.message.len() as u64 + 1;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(format.message.as_bytes());
        out.push(0);
        out.extend_from_slice(&format.category.to_le_bytes());
        for p in &format.parameters {
            out.extend_from_slice(&p.0.to_le_bytes());
        }
    }

    let mut file = fs::File::create(&path).map_err(|source| Error::IoOpen {
        path: path.clone(),
        source,
    })?;
    file.write_all(&out)
        .map_err(|source| Error::IoWrite { path, source })
}

/// Decodes a sidecar byte image into resolved descriptors. `parameters`
/// maps known parameter keys to their sizes.
pub fn decode_format_file(
    data: &[u8],
    parameters: &HashMap<ParameterKey, usize>,
) -> Result<FormatFile> {
    let mut reader = ByteReader::new(data);

    let stream_count = reader.read_u64()? as usize;
    let ordering = reader.read_u8()? != 0;

    let mut formats = HashMap::new();
    while !reader.is_empty() {
        let message_key = MessageKey(reader.read_u32()?);

        let len = reader.read_u64()? as usize;
        if len == 0 {
            return Err(Error::MalformedLog(
                "format entry with empty string".into(),
            ));
        }
        let bytes = reader.read_bytes(len)?;
        let message = std::str::from_utf8(&bytes[..len - 1])
            .map_err(|_| Error::MalformedLog("format string is not valid UTF-8".into()))?
            .to_owned();

        let category = reader.read_u32()?;

        let count = key::count_parameters(&message);
        let mut keys = Vec::with_capacity(count);
        let mut sizes = Vec::with_capacity(count);
        let mut message_size = 0;
        for _ in 0..count {
            let param = ParameterKey(reader.read_u32()?);
            let size = *parameters
                .get(&param)
                .ok_or(Error::UnregisteredParameter(param.0))?;
            keys.push(param);
            sizes.push(size);
            message_size += size;
        }

        let descriptor = FormatDescriptor {
            key: message_key,
            message_hash: key::hash_message(&message),
            message,
            category,
            parameters: keys,
            parameter_sizes: sizes,
            message_size,
        };
        if formats.insert(message_key, descriptor).is_some() {
            return Err(Error::DuplicateFormat(message_key.0));
        }
    }

    Ok(FormatFile {
        stream_count,
        ordering,
        formats,
    })
}

/// Reads and decodes the sidecar belonging to `log_path`.
pub fn read_format_file(
    log_path: &Path,
    parameters: &HashMap<ParameterKey, usize>,
) -> Result<FormatFile> {
    let path = format_file_path(log_path);
    let data = fs::read(&path).map_err(|source| Error::IoRead { path, source })?;
    decode_format_file(&data, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{default_parameters, Parameter};

    fn known_parameters() -> HashMap<ParameterKey, usize> {
        default_parameters().into_iter().collect()
    }

    fn sample_formats() -> Vec<(MessageKey, RegisteredFormat)> {
        vec![
            (
                MessageKey(40),
                RegisteredFormat {
                    message: "value = {}",
                    category: 1,
                    parameters: vec![<u32 as Parameter>::key()],
                },
            ),
            (
                MessageKey(41),
                RegisteredFormat {
                    message: "plain",
                    category: 2,
                    parameters: vec![],
                },
            ),
        ]
    }

    #[test]
    fn test_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.log");

        write_format_file(&log_path, 3, true, &sample_formats()).unwrap();
        let decoded = read_format_file(&log_path, &known_parameters()).unwrap();

        assert_eq!(decoded.stream_count, 3);
        assert!(decoded.ordering);
        assert_eq!(decoded.formats.len(), 2);

        let value = &decoded.formats[&MessageKey(40)];
        assert_eq!(value.message, "value = {}");
        assert_eq!(value.category, 1);
        assert_eq!(value.message_size, 4);
        assert_eq!(value.message_hash, key::hash_message("value = {}"));

        let plain = &decoded.formats[&MessageKey(41)];
        assert_eq!(plain.message_size, 0);
        assert!(plain.parameters.is_empty());
    }

    #[test]
    fn test_duplicate_format_rejected() {
        let mut formats = sample_formats();
        formats.push(formats[0].clone());

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.log");
        write_format_file(&log_path, 1, false, &formats).unwrap();

        let err = read_format_file(&log_path, &known_parameters()).unwrap_err();
        assert!(matches!(err, Error::DuplicateFormat(_)));
    }

    #[test]
    fn test_unregistered_parameter_rejected() {
        let formats = vec![(
            MessageKey(50),
            RegisteredFormat {
                message: "v {}",
                category: 0,
                parameters: vec![ParameterKey(0xdead)],
            },
        )];

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.log");
        write_format_file(&log_path, 1, false, &formats).unwrap();

        let err = read_format_file(&log_path, &known_parameters()).unwrap_err();
        assert!(matches!(err, Error::UnregisteredParameter(0xdead)));
    }

    #[test]
    fn test_truncated_sidecar_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.log");
        write_format_file(&log_path, 1, false, &sample_formats()).unwrap();

        let path = format_file_path(&log_path);
        let mut data = fs::read(&path).unwrap();
        data.truncate(data.len() - 2);

        let err = decode_format_file(&data, &known_parameters()).unwrap_err();
        assert!(matches!(err, Error::MalformedLog(_)));
    }
}
