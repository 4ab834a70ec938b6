//! Text formatter tests: substring splicing, prefixes, region indentation.

use std::fs;

use blocklog::{format_type, Formatter, Log, Parameter};

format_type! {
    struct Value = ("value = {}", 1);
    struct Pair = ("a={} b={}", 3);
    struct Phase = ("phase", 0);
}

#[test]
fn test_per_stream_text_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.log");

    {
        let log: Log = Log::new(&path, 1024, false).unwrap();
        let value = log.register_format::<Value, (u32,)>();
        let phase = log.register_format::<Phase, ()>();

        let mut first = log.create_stream(512);
        first.emit(value, (7u32,));
        {
            let mut region = first.region_named(phase);
            region.emit(value, (8u32,));
        }

        let mut second = log.create_stream(512);
        second.emit(value, (9u32,));
    }

    Formatter::new().format(&path).unwrap();

    let first = fs::read_to_string(dir.path().join("scenario_0.txt")).unwrap();
    assert_eq!(
        first,
        "1 | value = 7\n\
         -- REGION START: phase --\n\
         \x20\x201 | value = 8\n\
         -- REGION END: phase --\n"
    );

    let second = fs::read_to_string(dir.path().join("scenario_1.txt")).unwrap();
    assert_eq!(second, "1 | value = 9\n");
}

#[test]
fn test_multiple_parameters_and_nested_anonymous_regions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested.log");

    {
        let log: Log = Log::new(&path, 1024, false).unwrap();
        let pair = log.register_format::<Pair, (u32, i64)>();
        let mut stream = log.create_stream(512);
        let mut outer = stream.region();
        let mut inner = outer.region();
        inner.emit(pair, (1u32, -2i64));
    }

    Formatter::new().format(&path).unwrap();

    let text = fs::read_to_string(dir.path().join("nested_0.txt")).unwrap();
    assert_eq!(
        text,
        "-- REGION START: ANONYMOUS --\n\
         \x20\x20-- REGION START: ANONYMOUS --\n\
         \x20\x20\x20\x203 | a=1 b=-2\n\
         \x20\x20-- REGION END: ANONYMOUS --\n\
         -- REGION END: ANONYMOUS --\n"
    );
}

#[test]
fn test_ordering_index_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ordered.log");

    {
        let log: Log = Log::new(&path, 1024, true).unwrap();
        let value = log.register_format::<Value, (u32,)>();
        let mut stream = log.create_stream(512);
        stream.emit(value, (1u32,));
        stream.emit(value, (2u32,));
    }

    Formatter::new().format(&path).unwrap();

    let text = fs::read_to_string(dir.path().join("ordered_0.txt")).unwrap();
    assert_eq!(
        text,
        "00000000 | 1 | value = 1\n\
         00000001 | 1 | value = 2\n"
    );
}

#[derive(Clone, Copy)]
struct Hex(u32);

impl Parameter for Hex {
    const NAME: &'static str = "formatter-tests::Hex";
    const SIZE: usize = 4;

    fn write_le(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.0.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        Hex(u32::from_le_bytes(bytes[..4].try_into().unwrap()))
    }
}

format_type! {
    struct Color = ("color {}", 1);
}

#[test]
fn test_custom_parameter_formatter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.log");

    {
        let log: Log = Log::new(&path, 1024, false).unwrap();
        let color = log.register_format::<Color, (Hex,)>();
        let mut stream = log.create_stream(512);
        stream.emit(color, (Hex(255),));
    }

    let mut formatter = Formatter::new();
    formatter.register_parameter_with::<Hex>(|bytes, out| {
        write!(out, "0x{:x}", Hex::read_le(bytes).0)
    });
    formatter.format(&path).unwrap();

    let text = fs::read_to_string(dir.path().join("custom_0.txt")).unwrap();
    assert_eq!(text, "1 | color 0xff\n");
}
