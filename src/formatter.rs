//! Offline pretty-printing: turn a binary log and its sidecar into one text
//! file per stream.
//!
//! Parameter rendering is pluggable: a formatter is a callback that gets
//! the parameter's raw bytes and an output sink. Defaults cover the
//! primitive types; the prefix hooks for indices, categories and region
//! markers are replaceable fields.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::format::Parameter;
use crate::key::{
    parameter_indices, MessageKey, ParameterKey, ANON_REGION_START, NAMED_REGION_START, REGION_END,
};
use crate::wire::{self, ByteReader};

/// Renders one parameter: raw little-endian bytes in, text out.
pub type ParameterFn = Box<dyn Fn(&[u8], &mut dyn Write) -> io::Result<()>>;

struct ParameterFormatter {
    size: usize,
    func: ParameterFn,
}

/// Converts a binary log into per-stream text files.
pub struct Formatter {
    parameters: HashMap<ParameterKey, ParameterFormatter>,

    /// Names the output file for a stream. Default: the log's file name
    /// with `_<index>.txt` appended to the stem, next to the log.
    pub filename: Box<dyn Fn(&Path, u64) -> PathBuf>,
    /// Writes the category prefix. Default: `<category> | `.
    pub category: Box<dyn Fn(&mut dyn Write, u32) -> io::Result<()>>,
    /// Writes the ordering-index prefix. Default: zero-padded to 8 digits
    /// followed by ` | `.
    pub index: Box<dyn Fn(&mut dyn Write, u64) -> io::Result<()>>,
    /// Writes an anonymous region marker; the flag distinguishes start from
    /// end.
    pub anonymous_region: Box<dyn Fn(&mut dyn Write, bool) -> io::Result<()>>,
    /// Writes a named region marker.
    pub named_region: Box<dyn Fn(&mut dyn Write, bool, &str) -> io::Result<()>>,
    /// Spaces added per open region. Default: 2.
    pub region_indent: usize,
}

impl Formatter {
    pub fn new() -> Self {
        let mut formatter = Self {
            parameters: HashMap::new(),
            filename: Box::new(|path, index| {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "log".into());
                path.with_file_name(format!("{stem}_{index}.txt"))
            }),
            category: Box::new(|out, c| write!(out, "{c} | ")),
            index: Box::new(|out, i| write!(out, "{i:08} | ")),
            anonymous_region: Box::new(|out, start| {
                if start {
                    write!(out, "-- REGION START: ANONYMOUS --")
                } else {
                    write!(out, "-- REGION END: ANONYMOUS --")
                }
            }),
            named_region: Box::new(|out, start, name| {
                if start {
                    write!(out, "-- REGION START: {name} --")
                } else {
                    write!(out, "-- REGION END: {name} --")
                }
            }),
            region_indent: 2,
        };

        formatter.register_parameter::<i8>();
        formatter.register_parameter::<u8>();
        formatter.register_parameter::<i16>();
        formatter.register_parameter::<u16>();
        formatter.register_parameter::<i32>();
        formatter.register_parameter::<u32>();
        formatter.register_parameter::<i64>();
        formatter.register_parameter::<u64>();
        formatter.register_parameter::<f32>();
        formatter.register_parameter::<f64>();
        formatter
    }

    /// Registers the default rendering for a parameter type: decode and
    /// `Display`.
    pub fn register_parameter<T: Parameter + Display>(&mut self) {
        self.register_parameter_with::<T>(|bytes, out| write!(out, "{}", T::read_le(bytes)));
    }

    /// Registers a custom rendering callback for a parameter type. The
    /// first registration for a key wins.
    pub fn register_parameter_with<T: Parameter>(
        &mut self,
        f: impl Fn(&[u8], &mut dyn Write) -> io::Result<()> + 'static,
    ) {
        self.parameters
            .entry(T::key())
            .or_insert(ParameterFormatter {
                size: T::SIZE,
                func: Box::new(f),
            });
    }

    /// Formats the log at `log_path`, writing one text file per stream.
    pub fn format(&self, log_path: impl AsRef<Path>) -> Result<()> {
        let log_path = log_path.as_ref();

        let sizes: HashMap<ParameterKey, usize> = self
            .parameters
            .iter()
            .map(|(key, p)| (*key, p.size))
            .collect();
        let sidecar = wire::read_format_file(log_path, &sizes)?;

        // Split every format string once, around its `{}` occurrences.
        let mut printers: HashMap<MessageKey, MessagePrinter<'_>> = HashMap::new();
        for (key, desc) in &sidecar.formats {
            let indices = parameter_indices(&desc.message);
            let mut substrings = Vec::with_capacity(indices.len() + 1);
            for i in 0..=indices.len() {
                let start = if i == 0 { 0 } else { indices[i - 1] + 2 };
                let end = if i == indices.len() {
                    desc.message.len()
                } else {
                    indices[i]
                };
                substrings.push(&desc.message[start..end]);
            }
            let mut formatters = Vec::with_capacity(desc.parameters.len());
            for p in &desc.parameters {
                formatters.push(
                    self.parameters
                        .get(p)
                        .ok_or(Error::UnregisteredParameter(p.0))?,
                );
            }
            printers.insert(
                *key,
                MessagePrinter {
                    message: &desc.message,
                    category: desc.category,
                    substrings,
                    formatters,
                },
            );
        }

        let data = fs::read(log_path).map_err(|source| Error::IoRead {
            path: log_path.to_owned(),
            source,
        })?;

        let mut outputs: HashMap<u64, StreamOutput> = HashMap::new();
        let mut reader = ByteReader::new(&data);

        while !reader.is_empty() {
            let stream_index = reader.read_u64()?;
            let block_size = reader.read_u64()? as usize;
            if block_size > reader.remaining() {
                return Err(Error::MalformedLog(format!(
                    "block of {block_size} bytes exceeds the remaining {}",
                    reader.remaining()
                )));
            }
            let block_end = reader.pos() + block_size;

            let state = match outputs.entry(stream_index) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let path = (self.filename)(log_path, stream_index);
                    let file = File::create(&path).map_err(|source| Error::IoOpen {
                        path: path.clone(),
                        source,
                    })?;
                    entry.insert(StreamOutput {
                        out: BufWriter::new(file),
                        path,
                        regions: Vec::new(),
                        prefix: String::new(),
                    })
                }
            };

            while reader.pos() < block_end {
                let key = MessageKey(reader.read_u32()?);
                match key {
                    ANON_REGION_START => {
                        state
                            .line(|out, prefix| {
                                write!(out, "{prefix}")?;
                                (self.anonymous_region)(out, true)
                            })
                            .map_err(|e| state.write_error(e))?;
                        state.push_region(String::new(), self.region_indent);
                    }
                    NAMED_REGION_START => {
                        let inner = MessageKey(reader.read_u32()?);
                        let printer =
                            printers.get(&inner).ok_or(Error::UnknownFormat(inner.0))?;
                        state
                            .line(|out, prefix| {
                                write!(out, "{prefix}")?;
                                (self.named_region)(out, true, printer.message)
                            })
                            .map_err(|e| state.write_error(e))?;
                        state.push_region(printer.message.to_owned(), self.region_indent);
                    }
                    REGION_END => {
                        let name = state.pop_region(self.region_indent).ok_or_else(|| {
                            Error::MalformedLog(format!(
                                "unbalanced region end in stream {stream_index}"
                            ))
                        })?;
                        state
                            .line(|out, prefix| {
                                write!(out, "{prefix}")?;
                                if name.is_empty() {
                                    (self.anonymous_region)(out, false)
                                } else {
                                    (self.named_region)(out, false, &name)
                                }
                            })
                            .map_err(|e| state.write_error(e))?;
                    }
                    _ => {
                        let printer = printers.get(&key).ok_or(Error::UnknownFormat(key.0))?;
                        let index = if sidecar.ordering {
                            Some(reader.read_u64()?)
                        } else {
                            None
                        };
                        let mut params = Vec::with_capacity(printer.formatters.len());
                        for p in &printer.formatters {
                            params.push(reader.read_bytes(p.size)?);
                        }
                        state
                            .line(|out, prefix| {
                                write!(out, "{prefix}")?;
                                if let Some(index) = index {
                                    (self.index)(out, index)?;
                                }
                                (self.category)(out, printer.category)?;
                                for (i, sub) in printer.substrings.iter().enumerate() {
                                    write!(out, "{sub}")?;
                                    if i < printer.formatters.len() {
                                        (printer.formatters[i].func)(params[i], out)?;
                                    }
                                }
                                Ok(())
                            })
                            .map_err(|e| state.write_error(e))?;
                    }
                }
            }

            if reader.pos() != block_end {
                return Err(Error::MalformedLog(format!(
                    "message crosses block boundary at byte {}",
                    reader.pos()
                )));
            }
        }

        for state in outputs.values_mut() {
            state.out.flush().map_err(|e| state.write_error(e))?;
        }
        Ok(())
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

struct MessagePrinter<'a> {
    message: &'a str,
    category: u32,
    substrings: Vec<&'a str>,
    formatters: Vec<&'a ParameterFormatter>,
}

struct StreamOutput {
    out: BufWriter<File>,
    path: PathBuf,
    regions: Vec<String>,
    prefix: String,
}

impl StreamOutput {
    fn line(
        &mut self,
        body: impl FnOnce(&mut dyn Write, &str) -> io::Result<()>,
    ) -> io::Result<()> {
        body(&mut self.out, &self.prefix)?;
        writeln!(self.out)
    }

    fn write_error(&self, source: io::Error) -> Error {
        Error::IoWrite {
            path: self.path.clone(),
            source,
        }
    }

    fn push_region(&mut self, name: String, indent: usize) {
        self.regions.push(name);
        self.prefix.extend(std::iter::repeat(' ').take(indent));
    }

    fn pop_region(&mut self, indent: usize) -> Option<String> {
        let name = self.regions.pop()?;
        let keep = self.prefix.len().saturating_sub(indent);
        self.prefix.truncate(keep);
        Some(name)
    }
}
