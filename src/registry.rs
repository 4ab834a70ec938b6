//! Per-log format registry.
//!
//! Each emit call site registers its format exactly once and keeps the
//! returned [`MessageToken`]; the registry itself only sees rare
//! first-registration traffic, so a single mutex is enough.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::format::{FormatType, ParameterPack, RegisteredFormat};
use crate::key::{self, MessageKey, ParameterKey};

/// Proof that a format has been registered with a log; carries the wire key
/// the emit path writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageToken {
    pub(crate) key: MessageKey,
}

impl MessageToken {
    #[inline]
    pub fn key(self) -> MessageKey {
        self.key
    }
}

/// Process-wide-unique map from message key to format metadata for one log.
pub struct FormatRegistry {
    formats: Mutex<HashMap<MessageKey, RegisteredFormat>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            formats: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `F` with the parameter types of `P`. Idempotent: a second
    /// call with the same resulting key is a no-op.
    pub fn register<F: FormatType, P: ParameterPack>(&self) -> MessageToken {
        self.register_raw(F::MESSAGE, F::CATEGORY, P::keys())
    }

    /// Like [`register`](Self::register), with the pack type inferred from
    /// a value. Lets the emit macro register without naming the tuple type.
    #[doc(hidden)]
    pub fn register_for<F: FormatType, P: ParameterPack>(&self, _params: &P) -> MessageToken {
        self.register::<F, P>()
    }

    /// Non-generic registration path, used for source-location messages
    /// whose format string is built by the call-site macro.
    pub fn register_raw(
        &self,
        message: &'static str,
        category: u32,
        parameters: Vec<ParameterKey>,
    ) -> MessageToken {
        assert_eq!(
            parameters.len(),
            key::count_parameters(message),
            "parameter count must match the {{}} count of the format string"
        );
        let key = key::mix_message_key(message, category, &parameters);
        self.formats.lock().entry(key).or_insert(RegisteredFormat {
            message,
            category,
            parameters,
        });
        MessageToken { key }
    }

    /// Stable view of everything registered so far, taken at shutdown to
    /// serialize the sidecar.
    pub fn snapshot(&self) -> Vec<(MessageKey, RegisteredFormat)> {
        self.formats
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_type;

    format_type! {
        struct Fmt = ("x = {}", 9);
    }

    #[test]
    fn test_registration_idempotent() {
        let registry = FormatRegistry::new();
        let a = registry.register::<Fmt, (u32,)>();
        let b = registry.register::<Fmt, (u32,)>();
        assert_eq!(a, b);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_parameter_types_change_key() {
        let registry = FormatRegistry::new();
        let a = registry.register::<Fmt, (u32,)>();
        let b = registry.register::<Fmt, (u64,)>();
        assert_ne!(a, b);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_snapshot_contents() {
        let registry = FormatRegistry::new();
        let token = registry.register::<Fmt, (u32,)>();
        let snapshot = registry.snapshot();
        let (key, format) = &snapshot[0];
        assert_eq!(*key, token.key());
        assert_eq!(format.message, "x = {}");
        assert_eq!(format.category, 9);
        assert_eq!(format.parameters.len(), 1);
    }
}
