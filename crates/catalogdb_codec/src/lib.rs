//! # CatalogDB Codec
//!
//! CBOR encoding for everything CatalogDB writes to disk: engine state,
//! catalog headers, collection snapshots and write-ahead log payloads.
//!
//! Any `serde` type can be encoded. The [`Encode`] and [`Decode`] traits
//! are blanket-implemented so call sites read `record.encode()?`.
//!
//! ```
//! use catalogdb_codec::{from_cbor, to_cbor};
//!
//! let bytes = to_cbor(&vec!["PRODUCT", "BRAND"]).unwrap();
//! let decoded: Vec<String> = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, ["PRODUCT", "BRAND"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` as CBOR.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] when serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a CBOR document into `T`.
///
/// Trailing bytes after the first document are rejected.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for malformed input or a shape
/// that does not match `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: reader.len(),
        });
    }
    Ok(value)
}

/// Types that can be written as CBOR.
pub trait Encode {
    /// Encodes `self`.
    ///
    /// # Errors
    ///
    /// See [`to_cbor`].
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be read back from CBOR.
pub trait Decode: Sized {
    /// Decodes an instance from `bytes`.
    ///
    /// # Errors
    ///
    /// See [`from_cbor`].
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: Serialize> Encode for T {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Header {
        name: String,
        version: u64,
        sequences: BTreeMap<String, u32>,
    }

    #[test]
    fn struct_survives_encoding() {
        let header = Header {
            name: "shop".into(),
            version: 7,
            sequences: BTreeMap::from([("PRODUCT".to_string(), 12)]),
        };
        let bytes = header.encode().unwrap();
        assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn garbage_is_rejected() {
        let result: CodecResult<Header> = from_cbor(b"Mangled content!");
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = to_cbor(&42u32).unwrap();
        bytes.push(0x00);
        let result: CodecResult<u32> = from_cbor(&bytes);
        assert_eq!(result, Err(CodecError::TrailingBytes { remaining: 1 }));
    }

    #[test]
    fn encoding_is_deterministic_for_ordered_maps() {
        let a = BTreeMap::from([("b", 2), ("a", 1)]);
        let b = BTreeMap::from([("a", 1), ("b", 2)]);
        assert_eq!(to_cbor(&a).unwrap(), to_cbor(&b).unwrap());
    }
}
