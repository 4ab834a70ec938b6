//! Format types, parameter codecs and format descriptors.
//!
//! A format type is a zero-sized marker carrying a format string and a
//! category; [`format_type!`] declares one. Parameters are fixed-size
//! little-endian scalars identified by a key hashed from a stable type
//! name, which is what ties an emitted byte stream back to typed access in
//! the analyzer.

use crate::key::{self, MessageKey, ParameterKey};

/// A message format: a static format string plus a category.
///
/// Each `{}` occurrence in [`MESSAGE`](Self::MESSAGE) is one dynamic
/// parameter; the emit macro checks the count against the supplied values
/// at compile time.
pub trait FormatType {
    const MESSAGE: &'static str;
    const CATEGORY: u32;
}

/// Declares one or more unit structs implementing [`FormatType`].
///
/// ```
/// blocklog::format_type! {
///     pub struct FrameTime = ("frame took {} ms", 1);
///     pub struct CacheMiss = ("cache miss at {}", 2);
/// }
/// ```
#[macro_export]
macro_rules! format_type {
    ($($(#[$meta:meta])* $vis:vis struct $name:ident = ($message:expr, $category:expr);)+) => {
        $(
            $(#[$meta])*
            $vis struct $name;

            impl $crate::FormatType for $name {
                const MESSAGE: &'static str = $message;
                const CATEGORY: u32 = $category;
            }
        )+
    };
}

/// A fixed-size value that can travel through the log as raw bytes.
///
/// `NAME` must be unique per type; the parameter key is its hash, and the
/// analyzer resolves sizes and typed access through it.
pub trait Parameter: Copy {
    const NAME: &'static str;
    const SIZE: usize;

    fn write_le(&self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;

    #[inline]
    fn key() -> ParameterKey {
        ParameterKey(key::hash_str(Self::NAME))
    }
}

macro_rules! impl_parameter {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl Parameter for $ty {
                const NAME: &'static str = $name;
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_le(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }
            }

            impl ParamMatch for $ty {
                #[inline]
                fn match_key() -> ParameterKey {
                    <$ty as Parameter>::key()
                }
            }
        )+
    };
}

impl_parameter! {
    i8 => "i8",
    u8 => "u8",
    i16 => "i16",
    u16 => "u16",
    i32 => "i32",
    u32 => "u32",
    i64 => "i64",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
}

/// The parameter types every analyzer and formatter knows out of the box.
pub(crate) fn default_parameters() -> Vec<(ParameterKey, usize)> {
    vec![
        (<i8 as Parameter>::key(), <i8 as Parameter>::SIZE),
        (<u8 as Parameter>::key(), <u8 as Parameter>::SIZE),
        (<i16 as Parameter>::key(), <i16 as Parameter>::SIZE),
        (<u16 as Parameter>::key(), <u16 as Parameter>::SIZE),
        (<i32 as Parameter>::key(), <i32 as Parameter>::SIZE),
        (<u32 as Parameter>::key(), <u32 as Parameter>::SIZE),
        (<i64 as Parameter>::key(), <i64 as Parameter>::SIZE),
        (<u64 as Parameter>::key(), <u64 as Parameter>::SIZE),
        (<f32 as Parameter>::key(), <f32 as Parameter>::SIZE),
        (<f64 as Parameter>::key(), <f64 as Parameter>::SIZE),
    ]
}

/// A tuple of [`Parameter`]s, serialized in declaration order by the emit
/// path.
pub trait ParameterPack {
    const SIZE: usize;

    fn keys() -> Vec<ParameterKey>;

    fn write_le(&self, out: &mut [u8]);
}

macro_rules! impl_pack {
    ($($name:ident : $idx:tt),*) => {
        impl<$($name: Parameter),*> ParameterPack for ($($name,)*) {
            const SIZE: usize = 0 $(+ $name::SIZE)*;

            fn keys() -> Vec<ParameterKey> {
                vec![$($name::key()),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn write_le(&self, out: &mut [u8]) {
                let mut offset = 0;
                $(
                    self.$idx.write_le(&mut out[offset..offset + $name::SIZE]);
                    offset += $name::SIZE;
                )*
            }
        }
    };
}

impl_pack!();
impl_pack!(A: 0);
impl_pack!(A: 0, B: 1);
impl_pack!(A: 0, B: 1, C: 2);
impl_pack!(A: 0, B: 1, C: 2, D: 3);
impl_pack!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_pack!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_pack!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_pack!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// A position in a message-filter parameter list: either a concrete
/// [`Parameter`] type or [`Any`].
///
/// Implemented for the primitive parameters; custom [`Parameter`] types
/// that want to appear in message filters implement it the same one-line
/// way, delegating to `Parameter::key`.
pub trait ParamMatch {
    fn match_key() -> ParameterKey;
}

/// Wildcard matcher: accepts any parameter type at its position.
pub struct Any;

impl ParamMatch for Any {
    #[inline]
    fn match_key() -> ParameterKey {
        ParameterKey::WILDCARD
    }
}

/// A tuple of [`ParamMatch`] positions used by `Tree::filter_message`.
pub trait MatchList {
    fn match_keys() -> Vec<ParameterKey>;
}

macro_rules! impl_match_list {
    ($($name:ident),*) => {
        impl<$($name: ParamMatch),*> MatchList for ($($name,)*) {
            fn match_keys() -> Vec<ParameterKey> {
                vec![$($name::match_key()),*]
            }
        }
    };
}

impl_match_list!();
impl_match_list!(A);
impl_match_list!(A, B);
impl_match_list!(A, B, C);
impl_match_list!(A, B, C, D);
impl_match_list!(A, B, C, D, E);
impl_match_list!(A, B, C, D, E, F);
impl_match_list!(A, B, C, D, E, F, G);
impl_match_list!(A, B, C, D, E, F, G, H);

/// What the logging side knows about a registered format; serialized to the
/// sidecar at shutdown.
#[derive(Debug, Clone)]
pub struct RegisteredFormat {
    pub message: &'static str,
    pub category: u32,
    pub parameters: Vec<ParameterKey>,
}

/// A fully resolved format on the analyzer side: the sidecar entry plus the
/// parameter sizes needed to walk message payloads.
#[derive(Debug, Clone)]
pub struct FormatDescriptor {
    pub key: MessageKey,
    /// Hash of the format string alone, for category/type-independent
    /// matching.
    pub message_hash: MessageKey,
    pub message: String,
    pub category: u32,
    pub parameters: Vec<ParameterKey>,
    pub parameter_sizes: Vec<usize>,
    /// Sum of all parameter sizes.
    pub message_size: usize,
}

impl FormatDescriptor {
    /// Positional parameter match; a key of 0 matches any type. The list
    /// length must equal the declared parameter count.
    pub fn matches(&self, params: &[ParameterKey]) -> bool {
        if params.len() != self.parameters.len() {
            return false;
        }
        params
            .iter()
            .zip(&self.parameters)
            .all(|(want, have)| want.0 == 0 || want == have)
    }

    /// Byte offset of parameter `i` inside a message payload.
    pub fn parameter_offset(&self, i: usize) -> usize {
        self.parameter_sizes[..i].iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    format_type! {
        struct TwoParams = ("a {} b {}", 3);
    }

    #[test]
    fn test_format_type_decl() {
        assert_eq!(TwoParams::MESSAGE, "a {} b {}");
        assert_eq!(TwoParams::CATEGORY, 3);
        assert_eq!(key::count_parameters(TwoParams::MESSAGE), 2);
    }

    #[test]
    fn test_parameter_round_trip() {
        let mut buf = [0u8; 8];
        0x1234_5678_u32.write_le(&mut buf);
        assert_eq!(u32::read_le(&buf), 0x1234_5678);
        (-1.5f64).write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), -1.5);
    }

    #[test]
    fn test_pack_layout() {
        let pack = (7u32, 1.5f64);
        assert_eq!(<(u32, f64) as ParameterPack>::SIZE, 12);
        let mut buf = [0u8; 12];
        pack.write_le(&mut buf);
        assert_eq!(u32::read_le(&buf[..4]), 7);
        assert_eq!(f64::read_le(&buf[4..]), 1.5);
    }

    #[test]
    fn test_parameter_keys_distinct() {
        assert_ne!(<u32 as Parameter>::key(), <i32 as Parameter>::key());
        assert_ne!(<u32 as Parameter>::key(), ParameterKey::WILDCARD);
    }

    #[test]
    fn test_descriptor_matching() {
        let desc = FormatDescriptor {
            key: MessageKey(10),
            message_hash: key::hash_message("a {} b {}"),
            message: "a {} b {}".into(),
            category: 3,
            parameters: vec![<u32 as Parameter>::key(), <f64 as Parameter>::key()],
            parameter_sizes: vec![4, 8],
            message_size: 12,
        };
        assert!(desc.matches(&[<u32 as Parameter>::key(), <f64 as Parameter>::key()]));
        assert!(desc.matches(&[ParameterKey::WILDCARD, <f64 as Parameter>::key()]));
        assert!(!desc.matches(&[<f64 as Parameter>::key(), <u32 as Parameter>::key()]));
        assert!(!desc.matches(&[ParameterKey::WILDCARD]));
        assert_eq!(desc.parameter_offset(1), 4);
    }
}
