// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// The 16-byte identity of a stored document.
///
/// KV keys carry the raw bytes; JSON payloads carry the canonical
/// 36-character text form. Ordering is byte-wise lexicographic, which is
/// the order of the primary table when the identity itself is the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey(Uuid);

impl ObjectKey {
    pub fn generate() -> Self {
        ObjectKey(Uuid::new_v4())
    }

    /// The all-zero identity, used as the low sentinel when building range
    /// seek keys.
    pub fn nil() -> Self {
        ObjectKey(Uuid::nil())
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 16] = bytes.try_into().ok()?;
        Some(ObjectKey(Uuid::from_bytes(raw)))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_text(text: &str) -> Option<Self> {
        Uuid::try_parse(text).ok().map(ObjectKey)
    }

    pub fn to_text(&self) -> String {
        self.0.as_hyphenated().to_string()
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.0.as_hyphenated(), f)
    }
}
