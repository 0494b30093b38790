use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One sleep attempt in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SleepSession {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Nanoseconds on disk. Set once at closure.
    #[serde(default, with = "duration_nanos")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub quality: Option<i32>,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
    pub channel_id: String,
    /// Empty until a poll has been sent.
    #[serde(default)]
    pub poll_message_id: String,
    pub pending: bool,
}

impl SleepSession {
    pub fn new(
        channel_id: impl Into<String>,
        start: DateTime<Utc>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            start,
            end: None,
            duration: None,
            quality: None,
            additional_fields: fields,
            channel_id: channel_id.into(),
            poll_message_id: String::new(),
            pending: true,
        }
    }

    pub fn has_poll(&self) -> bool {
        !self.poll_message_id.is_empty()
    }

    /// Elapsed time as whole hours and the remaining whole minutes, truncated.
    pub fn hours_and_minutes(&self) -> Option<(i64, i64)> {
        self.duration.map(|d| {
            let minutes = d.num_minutes();
            let hours = minutes / 60;
            (hours, minutes - 60 * hours)
        })
    }
}

/// On-disk layout of the backing file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "sleep-sessions", default)]
    pub sleep_sessions: Vec<SleepSession>,
}

mod duration_nanos {
    use chrono::Duration;
    use serde::{ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => {
                let nanos = d
                    .num_nanoseconds()
                    .ok_or_else(|| ser::Error::custom("duration overflows i64 nanoseconds"))?;
                s.serialize_some(&nanos)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::nanoseconds))
    }
}
