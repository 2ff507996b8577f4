//! Domain types shared by the embedding, vector and retrieval layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

pub type RecordId = String;
pub type Metadata = Map<String, Value>;

/// A cleaned catalogue record ready to be embedded and upserted.
///
/// The sparse representation is never carried here: the index derives it
/// from `text` on write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// One ranked hit after normalization.
///
/// `distance` is the fused score reported by the index. Higher means a
/// better match for the weighted ranker; treat it as a relative signal only.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchItem {
    pub id: Uuid,
    pub text: String,
    pub distance: Option<f32>,
    pub metadata: Option<Metadata>,
}

impl SearchItem {
    /// Shortens `text` to at most `max_len` characters, keeping both ends
    /// around a `...` marker when there is room for one.
    pub fn snippet(&self, max_len: usize) -> String {
        snippet(&self.text, max_len)
    }
}

pub fn snippet(text: &str, max_len: usize) -> String {
    let total = text.chars().count();
    if total <= max_len {
        return text.to_string();
    }
    if max_len <= 3 {
        return text.chars().take(max_len).collect();
    }
    let budget = max_len - 3;
    let head = budget / 2;
    let tail = budget - head;
    let mut out: String = text.chars().take(head).collect();
    out.push_str("...");
    out.extend(text.chars().skip(total - tail));
    out
}

/// Relative weights of the dense and sparse sub-searches in linear fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankerWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self { dense: 0.5, sparse: 0.5 }
    }
}

impl RankerWeights {
    pub fn new(dense: f32, sparse: f32) -> Result<Self> {
        for (name, w) in [("dense", dense), ("sparse", sparse)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Validation(format!(
                    "{name} ranker weight must be a non-negative number, got {w}"
                )));
            }
        }
        Ok(Self { dense, sparse })
    }

    pub fn as_array(&self) -> [f32; 2] {
        [self.dense, self.sparse]
    }
}

impl TryFrom<&[f32]> for RankerWeights {
    type Error = Error;

    fn try_from(weights: &[f32]) -> Result<Self> {
        match weights {
            [dense, sparse] => Self::new(*dense, *sparse),
            other => Err(Error::Validation(format!(
                "ranker weights must have exactly 2 entries (dense, sparse), got {}",
                other.len()
            ))),
        }
    }
}

/// A hit in whatever shape the index handed back.
///
/// Remote indexes answer with loosely typed JSON rows; embedded ones can
/// build the structured form directly.
#[derive(Debug, Clone, PartialEq)]
pub enum RawHit {
    Map(Map<String, Value>),
    Entity(Hit),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hit {
    pub id: String,
    pub distance: Option<f32>,
    pub text: Option<String>,
    pub metadata: Option<Metadata>,
    pub dense: Option<Vec<f32>>,
}

/// A stored point as read back by id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub text: String,
    pub dense: Vec<f32>,
    pub metadata: Option<Metadata>,
}

/// External projection returned by the search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Runtime view of a collection for operational listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub state: String,
    pub state_code: i32,
    pub n_entities: Option<u64>,
    pub aliases: Vec<String>,
}
