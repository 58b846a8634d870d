use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A read/write quorum setting: a symbolic level or an explicit node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumValue {
    Quorum,
    All,
    One,
    Count(u32),
}

impl Serialize for QuorumValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QuorumValue::Quorum => serializer.serialize_str("quorum"),
            QuorumValue::All => serializer.serialize_str("all"),
            QuorumValue::One => serializer.serialize_str("one"),
            QuorumValue::Count(n) => serializer.serialize_u32(*n),
        }
    }
}

struct QuorumValueVisitor;

impl Visitor<'_> for QuorumValueVisitor {
    type Value = QuorumValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("\"quorum\", \"all\", \"one\" or a non-negative integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<QuorumValue, E> {
        match v {
            "quorum" => Ok(QuorumValue::Quorum),
            "all" => Ok(QuorumValue::All),
            "one" => Ok(QuorumValue::One),
            other => Err(E::custom(format!("unexpected quorum value: {other}"))),
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<QuorumValue, E> {
        u32::try_from(v)
            .map(QuorumValue::Count)
            .map_err(|_| E::custom(format!("quorum value out of range: {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<QuorumValue, E> {
        u32::try_from(v)
            .map(QuorumValue::Count)
            .map_err(|_| E::custom(format!("quorum value out of range: {v}")))
    }
}

impl<'de> Deserialize<'de> for QuorumValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuorumValueVisitor)
    }
}

/// Bucket properties.
///
/// Unset fields are omitted when encoding so a partial update only touches
/// what the caller set. `name` and the vclock pruning fields are reported by
/// the store but never sent back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_val: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_mult: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_wins: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<QuorumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<QuorumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dw: Option<QuorumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rw: Option<QuorumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precommit: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcommit: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    #[serde(default, skip_serializing)]
    pub big_vclock: Option<u64>,
    #[serde(default, skip_serializing)]
    pub small_vclock: Option<u64>,
    #[serde(default, skip_serializing)]
    pub old_vclock: Option<u64>,
    #[serde(default, skip_serializing)]
    pub young_vclock: Option<u64>,
}

impl Properties {
    /// Replication factor a new bucket gets from the store.
    pub const DEFAULT_N_VAL: u32 = 3;

    /// `n_val` of 3 with everything else left to the store.
    ///
    /// ```
    /// use riakrm_rs::protocol::Properties;
    ///
    /// let props = Properties::defaults();
    /// assert_eq!(props.n_val, Some(3));
    /// assert_eq!(props.allow_mult, None);
    /// ```
    pub fn defaults() -> Self {
        Properties {
            n_val: Some(Self::DEFAULT_N_VAL),
            ..Default::default()
        }
    }
}

/// Response of a bucket query: properties and/or the full key list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BucketDetails {
    #[serde(default)]
    pub props: Option<Properties>,
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BucketList {
    #[serde(default)]
    pub buckets: Vec<String>,
}
