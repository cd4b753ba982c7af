//! Property-list document encoding
//!
//! Outgoing documents are always written as XML property lists, which is
//! what both usbmuxd and lockdown expect. Incoming documents may be XML or
//! binary; pair records saved by other tools are frequently binary.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Serialize a message as an XML property list
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &message)?;
    Ok(buf)
}

/// Deserialize a property list (XML or binary) into a message
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::UnexpectedDocument(
            "empty property list".to_string(),
        ));
    }
    Ok(plist::from_bytes(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Dictionary, Value};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Sample {
        name: String,
        port: u16,
        #[serde(with = "serde_bytes")]
        blob: Vec<u8>,
    }

    #[test]
    fn test_encode_is_xml() {
        let sample = Sample {
            name: "svc".to_string(),
            port: 1234,
            blob: vec![1, 2, 3],
        };
        let xml = String::from_utf8(encode(&sample).unwrap()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<key>Name</key>"));
        assert!(xml.contains("<integer>1234</integer>"));
        assert!(xml.contains("<data>"));

        let decoded: Sample = decode(xml.as_bytes()).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_value_through_document() {
        let mut dict = Dictionary::new();
        dict.insert("Flag".to_string(), Value::Bool(true));
        dict.insert(
            "List".to_string(),
            Value::Array(vec![Value::from("x"), Value::Bytes(vec![9, 9])]),
        );
        let value = Value::Dictionary(dict);

        let decoded: Value = decode(&encode(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_binary_plist() {
        let mut dict = plist::Dictionary::new();
        dict.insert("HostID".to_string(), plist::Value::String("ABC".into()));
        let mut buf = Vec::new();
        plist::Value::Dictionary(dict)
            .to_writer_binary(&mut buf)
            .unwrap();

        let decoded: Value = decode(&buf).unwrap();
        assert_eq!(decoded.get("HostID").and_then(Value::as_str), Some("ABC"));
    }

    #[test]
    fn test_encode_unsized_values() {
        let text = String::from_utf8(encode("ping").unwrap()).unwrap();
        assert!(text.contains("<string>ping</string>"));

        let items: &[i64] = &[1, 2];
        let decoded: Vec<i64> = decode(&encode(items).unwrap()).unwrap();
        assert_eq!(decoded, vec![1, 2]);
    }

    #[test]
    fn test_null_cannot_be_encoded() {
        assert!(encode(&Value::Null).is_err());
    }

    #[test]
    fn test_malformed_document() {
        let result: Result<Value, _> = decode(b"<plist><dict><key>oops");
        assert!(matches!(result, Err(ProtocolError::Document(_))));
        let empty: Result<Value, _> = decode(b"");
        assert!(matches!(empty, Err(ProtocolError::UnexpectedDocument(_))));
    }
}
