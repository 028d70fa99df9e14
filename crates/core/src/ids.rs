use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public identifiers are 16 lowercase hex characters, carved from a v4 UUID.
pub const ID_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier must be exactly {ID_LENGTH} hex characters")]
    Malformed,
}

fn parse_hex_id(raw: &str) -> Result<String, IdError> {
    if raw.len() != ID_LENGTH || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IdError::Malformed);
    }
    Ok(raw.to_ascii_lowercase())
}

fn generate_hex_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..ID_LENGTH].to_owned()
}

/// Per-upload identifier. Distinct uploads of the same file name get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_hex_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_id(s).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(String);

impl ConflictId {
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_hex_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConflictId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_id(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_sixteen_hex_chars() {
        let id = FileId::generate();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = FileId::generate();
        let b = FileId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_accepts_hex_and_normalizes_case() {
        let id: FileId = "0123456789ABCDEF".parse().expect("parse id");
        assert_eq!(id.as_str(), "0123456789abcdef");
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_hex() {
        assert_eq!("abc".parse::<FileId>(), Err(IdError::Malformed));
        assert_eq!(
            "0123456789abcdef0".parse::<FileId>(),
            Err(IdError::Malformed)
        );
        assert_eq!(
            "0123456789abcdeg".parse::<ConflictId>(),
            Err(IdError::Malformed)
        );
    }

    #[test]
    fn serde_round_trips_as_plain_string() {
        let id = ConflictId::generate();
        let json = serde_json::to_string(&id).expect("encode");
        assert_eq!(json, format!("\"{id}\""));
        let back: ConflictId = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, id);
    }
}
