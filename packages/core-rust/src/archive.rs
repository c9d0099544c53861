//! Backend-neutral structural archives.
//!
//! An [`Archive`] is the minimal capability a backend must offer so that a
//! formatter can walk an object's fields: save one primitive [`Token`], or
//! load the next one. The same `delegate_serialize` routine drives both
//! directions, switching on [`Archive::mode`].
//!
//! [`TokenArchive`] is the in-memory implementation. Its token stream is
//! wrapped in an [`ArchiveRecord`] envelope (type tag + wire version) and
//! encoded either as named `MsgPack` ([`ArchiveEncoding::Binary`]) or JSON
//! ([`ArchiveEncoding::Text`]).

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One primitive field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Bool(bool),
    U32(u32),
    I64(i64),
    F64(#[serde(with = "float_repr")] f64),
    Str(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Token {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Direction an archive is being driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    Saving,
    Loading,
}

impl fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saving => f.write_str("saving"),
            Self::Loading => f.write_str("loading"),
        }
    }
}

/// Errors raised while walking or encoding an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive is {actual}, operation requires {required}")]
    WrongMode {
        required: ArchiveMode,
        actual: ArchiveMode,
    },
    #[error("expected {expected} field, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: &'static str,
    },
    #[error("archive ended while a {expected} field was expected")]
    Truncated { expected: &'static str },
    #[error("{remaining} unread fields left in archive")]
    TrailingFields { remaining: usize },
    #[error("unsupported wire version {version} for {type_tag}")]
    UnsupportedVersion { type_tag: String, version: u32 },
    #[error("invalid archived data: {0}")]
    Invalid(String),
    #[error("binary encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("binary decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("text encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Minimal read/write primitive-field capability.
pub trait Archive {
    fn mode(&self) -> ArchiveMode;

    /// Appends one field. Only valid while saving.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::WrongMode`] when the archive is loading.
    fn save(&mut self, token: Token) -> Result<(), ArchiveError>;

    /// Takes the next field. Only valid while loading.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::WrongMode`] when saving, [`ArchiveError::Truncated`]
    /// when no field is left.
    fn load(&mut self) -> Result<Token, ArchiveError>;
}

macro_rules! typed_load {
    ($name:ident, $variant:ident, $ty:ty, $label:literal) => {
        #[doc = concat!("Loads the next field, which must be a ", $label, ".")]
        ///
        /// # Errors
        ///
        /// Propagates [`Archive::load`] failures and reports a mismatched
        /// field as [`ArchiveError::UnexpectedToken`].
        pub fn $name(&mut self) -> Result<$ty, ArchiveError> {
            match self.load()? {
                Token::$variant(v) => Ok(v),
                other => Err(ArchiveError::UnexpectedToken {
                    expected: $label,
                    found: other.kind_name(),
                }),
            }
        }
    };
}

impl dyn Archive + '_ {
    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_bool(&mut self, v: bool) -> Result<(), ArchiveError> {
        self.save(Token::Bool(v))
    }

    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_u32(&mut self, v: u32) -> Result<(), ArchiveError> {
        self.save(Token::U32(v))
    }

    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_i64(&mut self, v: i64) -> Result<(), ArchiveError> {
        self.save(Token::I64(v))
    }

    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_f64(&mut self, v: f64) -> Result<(), ArchiveError> {
        self.save(Token::F64(v))
    }

    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_str(&mut self, v: &str) -> Result<(), ArchiveError> {
        self.save(Token::Str(v.to_string()))
    }

    /// # Errors
    ///
    /// See [`Archive::save`].
    pub fn save_bytes(&mut self, v: &[u8]) -> Result<(), ArchiveError> {
        self.save(Token::Bytes(v.to_vec()))
    }

    /// Saves a collection length.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::Invalid`] if `len` does not fit the wire's `u32`.
    pub fn save_len(&mut self, len: usize) -> Result<(), ArchiveError> {
        let len = u32::try_from(len)
            .map_err(|_| ArchiveError::Invalid(format!("length {len} exceeds u32")))?;
        self.save_u32(len)
    }

    typed_load!(load_bool, Bool, bool, "bool");
    typed_load!(load_u32, U32, u32, "u32");
    typed_load!(load_i64, I64, i64, "i64");
    typed_load!(load_f64, F64, f64, "f64");
    typed_load!(load_str, Str, String, "string");
    typed_load!(load_bytes, Bytes, Vec<u8>, "bytes");

    /// Loads a collection length saved with [`save_len`](Self::save_len).
    ///
    /// # Errors
    ///
    /// Same as [`load_u32`](Self::load_u32).
    pub fn load_len(&mut self) -> Result<usize, ArchiveError> {
        // u32 always fits usize on supported targets.
        Ok(self.load_u32()? as usize)
    }
}

/// In-memory token-stream archive.
#[derive(Debug, Clone)]
pub struct TokenArchive {
    mode: ArchiveMode,
    tokens: VecDeque<Token>,
}

impl TokenArchive {
    /// An empty archive ready to record fields.
    #[must_use]
    pub fn saving() -> Self {
        Self {
            mode: ArchiveMode::Saving,
            tokens: VecDeque::new(),
        }
    }

    /// An archive that replays `tokens` in order.
    #[must_use]
    pub fn loading(tokens: Vec<Token>) -> Self {
        Self {
            mode: ArchiveMode::Loading,
            tokens: tokens.into(),
        }
    }

    /// Number of fields recorded (saving) or still unread (loading).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Fails if a loading archive still has unread fields.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::TrailingFields`] when fields remain.
    pub fn finish(&self) -> Result<(), ArchiveError> {
        if self.mode == ArchiveMode::Loading && !self.tokens.is_empty() {
            return Err(ArchiveError::TrailingFields {
                remaining: self.tokens.len(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens.into()
    }
}

impl Archive for TokenArchive {
    fn mode(&self) -> ArchiveMode {
        self.mode
    }

    fn save(&mut self, token: Token) -> Result<(), ArchiveError> {
        if self.mode != ArchiveMode::Saving {
            return Err(ArchiveError::WrongMode {
                required: ArchiveMode::Saving,
                actual: self.mode,
            });
        }
        self.tokens.push_back(token);
        Ok(())
    }

    fn load(&mut self) -> Result<Token, ArchiveError> {
        if self.mode != ArchiveMode::Loading {
            return Err(ArchiveError::WrongMode {
                required: ArchiveMode::Loading,
                actual: self.mode,
            });
        }
        self.tokens
            .pop_front()
            .ok_or(ArchiveError::Truncated { expected: "any" })
    }
}

/// Serde adapter for `f64` fields. JSON has no literal for NaN or the
/// infinities, so human-readable formats carry those as the strings `"NaN"`,
/// `"inf"` and `"-inf"`. Binary formats store every value as a float.
pub(crate) mod float_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() || !serializer.is_human_readable() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(FloatVisitor)
        } else {
            deserializer.deserialize_f64(FloatVisitor)
        }
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

/// Byte encoding of an [`ArchiveRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveEncoding {
    /// Named `MsgPack` via `rmp-serde`.
    #[default]
    Binary,
    /// Compact single-line JSON via `serde_json`.
    Text,
}

/// One archived object: its type tag, the wire version its fields were
/// written with, and the field stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub type_tag: String,
    pub version: u32,
    pub tokens: Vec<Token>,
}

impl ArchiveRecord {
    /// # Errors
    ///
    /// Returns the underlying encoder error.
    pub fn encode(&self, encoding: ArchiveEncoding) -> Result<Vec<u8>, ArchiveError> {
        Ok(match encoding {
            ArchiveEncoding::Binary => rmp_serde::to_vec_named(self)?,
            ArchiveEncoding::Text => serde_json::to_vec(self)?,
        })
    }

    /// # Errors
    ///
    /// Returns the underlying decoder error for malformed bytes.
    pub fn decode(encoding: ArchiveEncoding, bytes: &[u8]) -> Result<Self, ArchiveError> {
        Ok(match encoding {
            ArchiveEncoding::Binary => rmp_serde::from_slice(bytes)?,
            ArchiveEncoding::Text => serde_json::from_slice(bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saving_then_loading_replays_fields() {
        let mut saving = TokenArchive::saving();
        {
            let ar: &mut dyn Archive = &mut saving;
            ar.save_u32(2).unwrap();
            ar.save_str("name").unwrap();
            ar.save_i64(-5).unwrap();
            ar.save_bytes(&[1, 2, 3]).unwrap();
        }
        assert_eq!(saving.len(), 4);

        let mut loading = TokenArchive::loading(saving.into_tokens());
        let ar: &mut dyn Archive = &mut loading;
        assert_eq!(ar.load_len().unwrap(), 2);
        assert_eq!(ar.load_str().unwrap(), "name");
        assert_eq!(ar.load_i64().unwrap(), -5);
        assert_eq!(ar.load_bytes().unwrap(), vec![1, 2, 3]);
        assert!(loading.finish().is_ok());
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let mut saving = TokenArchive::saving();
        assert!(matches!(
            saving.load(),
            Err(ArchiveError::WrongMode { required: ArchiveMode::Loading, .. })
        ));
        let mut loading = TokenArchive::loading(Vec::new());
        assert!(matches!(
            loading.save(Token::Bool(true)),
            Err(ArchiveError::WrongMode { required: ArchiveMode::Saving, .. })
        ));
    }

    #[test]
    fn mismatched_field_reports_both_kinds() {
        let mut loading = TokenArchive::loading(vec![Token::Str("x".into())]);
        let ar: &mut dyn Archive = &mut loading;
        let err = ar.load_u32().unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::UnexpectedToken { expected: "u32", found: "string" }
        ));
    }

    #[test]
    fn truncated_and_trailing_fields_are_errors() {
        let mut loading = TokenArchive::loading(vec![Token::Bool(true), Token::Bool(false)]);
        loading.load().unwrap();
        assert!(matches!(
            loading.finish(),
            Err(ArchiveError::TrailingFields { remaining: 1 })
        ));
        loading.load().unwrap();
        assert!(matches!(loading.load(), Err(ArchiveError::Truncated { .. })));
    }

    #[test]
    fn record_encodes_in_both_encodings() {
        let record = ArchiveRecord {
            type_tag: "PropertySet".to_string(),
            version: 2,
            tokens: vec![Token::U32(1), Token::F64(0.25), Token::Bytes(vec![0xff])],
        };
        for encoding in [ArchiveEncoding::Binary, ArchiveEncoding::Text] {
            let bytes = record.encode(encoding).unwrap();
            assert_eq!(ArchiveRecord::decode(encoding, &bytes).unwrap(), record);
        }
        let text = record.encode(ArchiveEncoding::Text).unwrap();
        assert!(!text.contains(&b'\n'), "text frames are single-line");
    }

    #[test]
    fn non_finite_floats_survive_both_encodings() {
        let record = ArchiveRecord {
            type_tag: "PropertySet".to_string(),
            version: 2,
            tokens: vec![
                Token::F64(f64::INFINITY),
                Token::F64(f64::NEG_INFINITY),
                Token::F64(f64::NAN),
                Token::F64(-0.0),
            ],
        };
        for encoding in [ArchiveEncoding::Binary, ArchiveEncoding::Text] {
            let bytes = record.encode(encoding).unwrap();
            let back = ArchiveRecord::decode(encoding, &bytes).unwrap();
            let floats: Vec<f64> = back
                .tokens
                .iter()
                .map(|t| match t {
                    Token::F64(v) => *v,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            assert_eq!(floats[0], f64::INFINITY);
            assert_eq!(floats[1], f64::NEG_INFINITY);
            assert!(floats[2].is_nan());
            assert!(floats[3] == 0.0 && floats[3].is_sign_negative());
        }
        let text = String::from_utf8(record.encode(ArchiveEncoding::Text).unwrap()).unwrap();
        assert!(text.contains(r#"{"F64":"inf"}"#));
        assert!(!text.contains("null"));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(ArchiveRecord::decode(ArchiveEncoding::Binary, &[0xc1, 0x00]).is_err());
        assert!(ArchiveRecord::decode(ArchiveEncoding::Text, b"{oops").is_err());
    }
}
