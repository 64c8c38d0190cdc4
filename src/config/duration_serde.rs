//! Durations in configuration: `15m`, `500ms` or plain seconds (`900`, `0.5`).

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    FractionalSeconds(f64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Self::FractionalSeconds(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| format!("Invalid duration {secs}: must be a non-negative number of seconds")),
            Self::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| format!("Invalid duration '{text}': {e}")),
        }
    }
}

pub mod duration {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        RawDuration::deserialize(deserializer)?
            .into_duration()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::duration")]
        timeout: Duration,
    }

    #[test]
    fn test_parses_human_readable_and_numeric() {
        let human: Holder = toml::from_str(r#"timeout = "15m""#).unwrap();
        assert_eq!(human.timeout, Duration::from_secs(900));

        let numeric: Holder = toml::from_str("timeout = 7").unwrap();
        assert_eq!(numeric.timeout, Duration::from_secs(7));

        let fractional: Holder = toml::from_str("timeout = 0.5").unwrap();
        assert_eq!(fractional.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_serializes_as_human_readable() {
        let holder = Holder {
            timeout: Duration::from_secs(5),
        };
        let out = toml::to_string(&holder).unwrap();
        assert!(out.contains(r#"timeout = "5s""#), "got: {out}");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(toml::from_str::<Holder>(r#"timeout = "soon""#).is_err());
        assert!(toml::from_str::<Holder>("timeout = -3").is_err());
    }
}
