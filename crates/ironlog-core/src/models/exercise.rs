//! Exercise catalog and training history models.

use serde::{Deserialize, Deserializer, Serialize};

/// An exercise from `GET /exercises/bygroup/{group}` or `GET /exercises/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Exercise {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    pub series: u32,
    pub repetitions: u32,
    pub group: String,
    #[serde(default)]
    pub demo: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
}

impl Exercise {
    /// "3 sets x 12 reps" summary line
    pub fn summary(&self) -> String {
        format!("{} sets x {} reps", self.series, self.repetitions)
    }
}

/// One day of the training history, as grouped by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HistoryDay {
    pub title: String,
    pub data: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HistoryEntry {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    pub group: String,
    pub hour: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The API returns numeric ids for some resources and string ids for others.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}
