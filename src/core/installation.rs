use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::utils::base_path;

/// Marker file inside every installation folder. A folder without it is an
/// interrupted install and stays invisible to the registry.
pub const METADATA_FILE: &str = ".agnes";

/// A span during which an installation was the live `current` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePeriod {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installation {
    pub folder: String,
    pub number: u32,
    pub identification: String,
    pub online_periods: Vec<OnlinePeriod>,
}

#[derive(Serialize, Deserialize)]
struct Metadata {
    number: u32,
    identification: String,
    #[serde(default)]
    online_periods: Vec<OnlinePeriod>,
}

impl Installation {
    pub fn new(folder: impl Into<String>, number: u32, identification: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            number,
            identification: identification.into(),
            online_periods: Vec::new(),
        }
    }

    pub fn from_metadata(folder: impl Into<String>, content: &[u8]) -> Result<Self> {
        let folder = folder.into();
        let metadata: Metadata = serde_json::from_slice(content).map_err(|e| {
            Error::internal_json(
                e.to_string(),
                Some(format!("parse {}/{}", folder, METADATA_FILE)),
            )
        })?;

        Ok(Self {
            folder,
            number: metadata.number,
            identification: metadata.identification,
            online_periods: metadata.online_periods,
        })
    }

    pub fn to_metadata(&self) -> Result<Vec<u8>> {
        let metadata = Metadata {
            number: self.number,
            identification: self.identification.clone(),
            online_periods: self.online_periods.clone(),
        };
        serde_json::to_vec_pretty(&metadata).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize installation".to_string()))
        })
    }

    pub fn metadata_path(&self) -> String {
        base_path::join_remote_path(&self.folder, METADATA_FILE)
    }

    pub fn persist(&self, connection: &Connection) -> Result<()> {
        connection.write_file(&self.metadata_path(), &self.to_metadata()?)
    }

    /// True while the last period is still open.
    pub fn is_online(&self) -> bool {
        self.online_periods
            .last()
            .is_some_and(|period| period.end.is_none())
    }

    /// When the installation last stopped being live; `None` if it never was
    /// or still is.
    pub fn last_online(&self) -> Option<DateTime<Utc>> {
        self.online_periods.last().and_then(|period| period.end)
    }

    pub fn take_online(&mut self, now: DateTime<Utc>) {
        if self.is_online() {
            return;
        }
        self.online_periods.push(OnlinePeriod {
            start: now,
            end: None,
        });
    }

    pub fn take_offline(&mut self, now: DateTime<Utc>) {
        if let Some(period) = self.online_periods.last_mut() {
            if period.end.is_none() {
                period.end = Some(now);
            }
        }
    }

    /// Undo a `take_offline` whose switch never happened.
    pub fn reopen(&mut self) {
        if let Some(period) = self.online_periods.last_mut() {
            period.end = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn online_periods_open_and_close_once() {
        let mut installation = Installation::new("/var/www/installations/v1", 1, "v1");
        assert!(!installation.is_online());
        assert_eq!(installation.last_online(), None);

        installation.take_online(at(1));
        installation.take_online(at(2));
        assert!(installation.is_online());
        assert_eq!(installation.online_periods.len(), 1);

        installation.take_offline(at(3));
        installation.take_offline(at(4));
        assert!(!installation.is_online());
        assert_eq!(installation.last_online(), Some(at(3)));

        installation.take_online(at(5));
        let open = installation
            .online_periods
            .iter()
            .filter(|p| p.end.is_none())
            .count();
        assert_eq!(open, 1);
    }

    #[test]
    fn metadata_keeps_numbers_and_periods() {
        let mut installation = Installation::new("/var/www/installations/v1", 7, "v1.2.0");
        installation.take_online(at(1));
        installation.take_offline(at(2));

        let content = installation.to_metadata().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&content).unwrap();
        assert_eq!(json["number"], 7);
        assert_eq!(json["online_periods"][0]["start"], "2024-03-01T01:00:00Z");

        let loaded = Installation::from_metadata("/var/www/installations/v1", &content).unwrap();
        assert_eq!(loaded, installation);
    }

    #[test]
    fn reopen_restores_the_open_period() {
        let mut installation = Installation::new("/x", 1, "v1");
        installation.take_online(at(1));
        installation.take_offline(at(2));
        installation.reopen();
        assert!(installation.is_online());
        assert_eq!(installation.online_periods.len(), 1);
    }

    #[test]
    fn open_period_omits_end() {
        let mut installation = Installation::new("/x", 1, "v1");
        installation.take_online(at(1));
        let json: serde_json::Value =
            serde_json::from_slice(&installation.to_metadata().unwrap()).unwrap();
        assert!(json["online_periods"][0].get("end").is_none());
    }

    #[test]
    fn corrupt_metadata_is_an_error() {
        let err = Installation::from_metadata("/x", b"not json").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.json_error");
    }
}
