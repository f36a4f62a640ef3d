// SPDX-License-Identifier: MIT
//
// Driver configuration.
//
// Every timing constant the engine depends on lives here instead of being
// buried in the component that uses it. The escape timeout and the click
// interval are heuristics: there is no protocol-level "correct" value, only
// a trade-off between latency and misclassification on slow links.
//
// Defaults suit a local terminal. Environment variables override them at
// startup via [`DriverConfig::from_env`]; the builder methods override them
// programmatically.

use std::time::Duration;

use crate::error::{Error, Result};

/// `N_TERM_ESC_TIMEOUT_MS`: ESC disambiguation window in milliseconds.
pub const ENV_ESC_TIMEOUT: &str = "N_TERM_ESC_TIMEOUT_MS";
/// `N_TERM_DOUBLE_CLICK_MS`: multi-click window in milliseconds.
pub const ENV_DOUBLE_CLICK: &str = "N_TERM_DOUBLE_CLICK_MS";
/// `N_TERM_MOUSE_REPEAT_MS`: continuous-press repeat period in milliseconds.
pub const ENV_MOUSE_REPEAT: &str = "N_TERM_MOUSE_REPEAT_MS";
/// `N_TERM_QUERY_TIMEOUT_MS`: how long a device query waits for its answer.
pub const ENV_QUERY_TIMEOUT: &str = "N_TERM_QUERY_TIMEOUT_MS";
/// `N_TERM_MOUSE`: `0`/`false`/`off` disables mouse reporting.
pub const ENV_MOUSE: &str = "N_TERM_MOUSE";

/// Tunables for the decoder, mouse synthesizer, and startup negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// How long the decoder waits after ESC (and inside a sequence) before
    /// treating what it has as complete.
    pub escape_timeout: Duration,
    /// Maximum gap between two clicks that still counts as a multi-click.
    pub double_click_interval: Duration,
    /// Maximum distance in cells between clicks of one multi-click, and
    /// between a press and its release for the release to count as a click.
    pub click_distance: u16,
    /// Period of the synthetic press events emitted while a button is held
    /// in continuous-press mode.
    pub mouse_repeat_interval: Duration,
    /// Enable mouse reporting (any-event tracking, SGR encoding).
    pub mouse: bool,
    /// Send an XTVERSION query at startup to learn the terminal version.
    pub query_version: bool,
    /// How long a device query stays outstanding. After that its
    /// terminator decodes as ordinary input again.
    pub query_timeout: Duration,
    /// Glyph written in place of a wide glyph that does not fit before the
    /// right edge.
    pub replacement_glyph: char,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            escape_timeout: Duration::from_millis(10),
            double_click_interval: Duration::from_millis(500),
            click_distance: 0,
            mouse_repeat_interval: Duration::from_millis(50),
            mouse: true,
            query_version: true,
            query_timeout: Duration::from_secs(2),
            replacement_glyph: '\u{FFFD}',
        }
    }
}

impl DriverConfig {
    /// Defaults layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when an override is present but cannot be
    /// parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults layered with overrides from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(d) = millis(ENV_ESC_TIMEOUT, lookup(ENV_ESC_TIMEOUT))? {
            config.escape_timeout = d;
        }
        if let Some(d) = millis(ENV_DOUBLE_CLICK, lookup(ENV_DOUBLE_CLICK))? {
            config.double_click_interval = d;
        }
        if let Some(d) = millis(ENV_MOUSE_REPEAT, lookup(ENV_MOUSE_REPEAT))? {
            config.mouse_repeat_interval = d;
        }
        if let Some(d) = millis(ENV_QUERY_TIMEOUT, lookup(ENV_QUERY_TIMEOUT))? {
            config.query_timeout = d;
        }
        if let Some(raw) = lookup(ENV_MOUSE) {
            config.mouse = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(Error::Config {
                        key: ENV_MOUSE,
                        value: raw,
                    });
                }
            };
        }
        Ok(config)
    }

    #[must_use]
    pub const fn with_escape_timeout(mut self, timeout: Duration) -> Self {
        self.escape_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_double_click_interval(mut self, interval: Duration) -> Self {
        self.double_click_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_click_distance(mut self, cells: u16) -> Self {
        self.click_distance = cells;
        self
    }

    #[must_use]
    pub const fn with_mouse_repeat_interval(mut self, interval: Duration) -> Self {
        self.mouse_repeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_mouse(mut self, enabled: bool) -> Self {
        self.mouse = enabled;
        self
    }

    #[must_use]
    pub const fn with_query_version(mut self, enabled: bool) -> Self {
        self.query_version = enabled;
        self
    }

    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_replacement_glyph(mut self, glyph: char) -> Self {
        self.replacement_glyph = glyph;
        self
    }
}

/// Parse an optional millisecond count.
fn millis(key: &'static str, raw: Option<String>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| Error::Config { key, value: raw })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = DriverConfig::default();
        assert_eq!(c.escape_timeout, Duration::from_millis(10));
        assert_eq!(c.double_click_interval, Duration::from_millis(500));
        assert_eq!(c.click_distance, 0);
        assert!(c.mouse);
        assert_eq!(c.query_timeout, Duration::from_secs(2));
        assert_eq!(c.replacement_glyph, '\u{FFFD}');
    }

    #[test]
    fn no_overrides_yields_defaults() {
        let c = DriverConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c, DriverConfig::default());
    }

    #[test]
    fn overrides_apply() {
        let c = DriverConfig::from_lookup(lookup(&[
            (ENV_ESC_TIMEOUT, "25"),
            (ENV_DOUBLE_CLICK, " 300 "),
            (ENV_MOUSE_REPEAT, "16"),
            (ENV_QUERY_TIMEOUT, "750"),
            (ENV_MOUSE, "off"),
        ]))
        .unwrap();
        assert_eq!(c.escape_timeout, Duration::from_millis(25));
        assert_eq!(c.double_click_interval, Duration::from_millis(300));
        assert_eq!(c.mouse_repeat_interval, Duration::from_millis(16));
        assert_eq!(c.query_timeout, Duration::from_millis(750));
        assert!(!c.mouse);
    }

    #[test]
    fn bad_number_is_config_error() {
        let err = DriverConfig::from_lookup(lookup(&[(ENV_ESC_TIMEOUT, "ten")])).unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: ENV_ESC_TIMEOUT, ref value } if value == "ten"
        ));
    }

    #[test]
    fn bad_bool_is_config_error() {
        let err = DriverConfig::from_lookup(lookup(&[(ENV_MOUSE, "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config { key: ENV_MOUSE, .. }));
    }

    #[test]
    fn builders_chain() {
        let c = DriverConfig::default()
            .with_escape_timeout(Duration::from_millis(50))
            .with_click_distance(1)
            .with_query_version(false)
            .with_replacement_glyph('?');
        assert_eq!(c.escape_timeout, Duration::from_millis(50));
        assert_eq!(c.click_distance, 1);
        assert!(!c.query_version);
        assert_eq!(c.replacement_glyph, '?');
    }
}
