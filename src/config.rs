use std::env;
use std::time::Duration;

use crate::{
    backend::EnvelopeMode,
    error::Error,
    serial::{LineTerminator, PortSettings, StagePolicy},
};

/// Runtime configuration, read from the environment.
///
/// | Variable              | Meaning                              | Default        |
/// |-----------------------|--------------------------------------|----------------|
/// | `BACKEND_URL`         | Backend base URL (metrics + control) | required       |
/// | `WORKER_DEVICES`      | Comma-separated port paths           | OS enumeration |
/// | `BAUD_RATE`           | Serial baud rate                     | 38400          |
/// | `LINE_TERMINATOR`     | `lf` / `crlf` (or literal `\n`...)   | `lf`           |
/// | `CLASSIFY_TIMEOUT_MS` | Per-stage window in milliseconds     | 30000          |
/// | `MAX_FAILURES`        | Malformed records tolerated          | 5              |
/// | `WORKER_MARKER`       | Expected device-type marker          | `altar-worker` |
/// | `METRICS_ENVELOPE`    | `raw` / `wrapped` POST bodies        | `raw`          |
///
/// A missing `BACKEND_URL` is the one fatal case; everything else has a
/// default. Values that are present but unparseable are errors too, not
/// silent fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backend, e.g. `http://localhost:4000`.
    pub backend_url: String,

    /// Explicit port list; `None` means enumerate the OS.
    pub devices: Option<Vec<String>>,

    /// Baud rate for every worker port.
    pub baud: u32,

    /// Line terminator on the serial wire.
    pub terminator: LineTerminator,

    /// Window for each classification stage.
    pub classify_window: Duration,

    /// Malformed records tolerated per stage.
    pub max_failures: u32,

    /// The device-type marker workers announce.
    pub marker: String,

    /// How metrics bodies are posted.
    pub envelope: EnvelopeMode,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), but over an arbitrary
    /// lookup. Tests use this to avoid touching the real environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = get("BACKEND_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(Error::ConfigMissing("BACKEND_URL"))?
            .trim_end_matches('/')
            .to_string();

        let devices = get("WORKER_DEVICES").and_then(|list| {
            let devices = list
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();

            // An empty list behaves like an unset variable.
            (!devices.is_empty()).then_some(devices)
        });

        let baud = parse_or(&get, "BAUD_RATE", 38_400)?;
        let terminator = parse_or(&get, "LINE_TERMINATOR", LineTerminator::Lf)?;
        let timeout_ms: u64 = parse_or(&get, "CLASSIFY_TIMEOUT_MS", 30_000)?;
        let max_failures = parse_or(&get, "MAX_FAILURES", 5)?;
        let envelope = parse_or(&get, "METRICS_ENVELOPE", EnvelopeMode::Raw)?;

        let marker = get("WORKER_MARKER")
            .filter(|marker| !marker.trim().is_empty())
            .unwrap_or_else(|| "altar-worker".to_string());

        Ok(Self {
            backend_url,
            devices,
            baud,
            terminator,
            classify_window: Duration::from_millis(timeout_ms),
            max_failures,
            marker,
            envelope,
        })
    }

    /// Where telemetry gets POSTed.
    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.backend_url)
    }

    /// Where the control feed websocket lives.
    pub fn control_url(&self) -> String {
        let ws_base = if let Some(rest) = self.backend_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.backend_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.backend_url.clone()
        };

        format!("{ws_base}/updates")
    }

    /// The per-port settings this configuration implies.
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud: self.baud,
            terminator: self.terminator,
        }
    }

    /// The per-stage policy this configuration implies.
    pub fn stage_policy(&self) -> StagePolicy {
        StagePolicy {
            window: self.classify_window,
            max_failures: self.max_failures,
        }
    }
}

fn parse_or<F, T>(get: &F, name: &'static str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| Error::ConfigInvalid {
            name,
            reason: format!("`{raw}`: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |name| vars.get(name).cloned()
    }

    #[test]
    fn backend_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();

        assert!(matches!(err, Error::ConfigMissing("BACKEND_URL")));
    }

    #[test]
    fn defaults_apply() {
        let config =
            Config::from_lookup(lookup(&[("BACKEND_URL", "http://localhost:4000")])).unwrap();

        assert_eq!(config.devices, None);
        assert_eq!(config.baud, 38_400);
        assert_eq!(config.terminator, LineTerminator::Lf);
        assert_eq!(config.classify_window, Duration::from_secs(30));
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.marker, "altar-worker");
        assert_eq!(config.envelope, EnvelopeMode::Raw);
    }

    #[test]
    fn urls_are_derived() {
        let config =
            Config::from_lookup(lookup(&[("BACKEND_URL", "http://localhost:4000/")])).unwrap();

        assert_eq!(config.metrics_url(), "http://localhost:4000/metrics");
        assert_eq!(config.control_url(), "ws://localhost:4000/updates");

        let config =
            Config::from_lookup(lookup(&[("BACKEND_URL", "https://altar.example")])).unwrap();

        assert_eq!(config.control_url(), "wss://altar.example/updates");
    }

    #[test]
    fn device_list_is_split_and_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("BACKEND_URL", "http://x"),
            ("WORKER_DEVICES", "/dev/ttyACM0, /dev/ttyACM1,,"),
        ]))
        .unwrap();

        assert_eq!(
            config.devices,
            Some(vec![
                "/dev/ttyACM0".to_string(),
                "/dev/ttyACM1".to_string()
            ])
        );
    }

    #[test]
    fn empty_device_list_means_enumeration() {
        let config = Config::from_lookup(lookup(&[
            ("BACKEND_URL", "http://x"),
            ("WORKER_DEVICES", " , "),
        ]))
        .unwrap();

        assert_eq!(config.devices, None);
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_lookup(lookup(&[
            ("BACKEND_URL", "http://x"),
            ("BAUD_RATE", "115200"),
            ("LINE_TERMINATOR", "crlf"),
            ("CLASSIFY_TIMEOUT_MS", "5000"),
            ("MAX_FAILURES", "2"),
            ("WORKER_MARKER", "test-worker"),
            ("METRICS_ENVELOPE", "wrapped"),
        ]))
        .unwrap();

        assert_eq!(config.baud, 115_200);
        assert_eq!(config.terminator, LineTerminator::CrLf);
        assert_eq!(config.classify_window, Duration::from_secs(5));
        assert_eq!(config.max_failures, 2);
        assert_eq!(config.marker, "test-worker");
        assert_eq!(config.envelope, EnvelopeMode::Wrapped);
    }

    #[test]
    fn unparseable_values_are_errors_not_defaults() {
        let err = Config::from_lookup(lookup(&[
            ("BACKEND_URL", "http://x"),
            ("BAUD_RATE", "fast"),
        ]))
        .unwrap_err();

        assert!(matches!(err, Error::ConfigInvalid { name: "BAUD_RATE", .. }));
    }
}
