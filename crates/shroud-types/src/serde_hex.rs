//! Serde helpers that encode byte vectors as hex strings.
//!
//! Use with `#[serde(with = "shroud_types::serde_hex")]` on `Vec<u8>` fields.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "super")]
        data: Vec<u8>,
    }

    #[test]
    fn test_blob_as_hex() {
        let blob = Blob { data: vec![0xde, 0xad, 0x01] };
        let json = serde_json::to_string(&blob).unwrap();
        assert_eq!(json, r#"{"data":"dead01"}"#);
        assert_eq!(serde_json::from_str::<Blob>(&json).unwrap(), blob);
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(serde_json::from_str::<Blob>(r#"{"data":"xyz"}"#).is_err());
    }
}
