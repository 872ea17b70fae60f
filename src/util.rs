use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ObjectIdString(#[serde(with = "object_id_string")] pub ObjectId);

impl From<ObjectId> for ObjectIdString {
    fn from(value: ObjectId) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for ObjectIdString {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::cmp::PartialEq for ObjectIdString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl std::cmp::Eq for ObjectIdString {}

impl std::cmp::PartialEq<ObjectId> for ObjectIdString {
    fn eq(&self, other: &ObjectId) -> bool {
        self.0 == *other
    }
}

impl From<ObjectIdString> for bson::Bson {
    fn from(value: ObjectIdString) -> Self {
        value.0.into()
    }
}

impl std::fmt::Display for ObjectIdString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

mod object_id_string {
    use bson::oid::ObjectId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl From<bson::DateTime> for FormattedDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self(value.into())
    }
}

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

/// Substring filters must not let callers inject regex syntax into the
/// store's `$regex` operator.
pub fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Path segment parsed as an ObjectId, rejecting malformed ids as a missing
/// resource instead of a raw extractor failure.
#[derive(Debug, Clone, Copy)]
pub struct PathObjectId(pub ObjectId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathObjectId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| Error::NoResource)?;

        id.parse().map(Self).map_err(|_| Error::NoResource)
    }
}
