use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Confirmed presence classification of the user.
///
/// `Distracted` is never produced by the debouncer today; it is kept so that
/// sessions written by richer classifiers still load and aggregate correctly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Studying,
    Distracted,
    Away,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Studying => "studying",
            Status::Distracted => "distracted",
            Status::Away => "away",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "studying" => Ok(Status::Studying),
            "distracted" => Ok(Status::Distracted),
            "away" => Ok(Status::Away),
            other => Err(anyhow!("unknown presence status {other}")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
