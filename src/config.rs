//! Configuration System using Figment
//!
//! Strongly-typed configuration for both controllers, loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `NI660X_`, nested keys separated
//!    by `__`
//!
//! # Example
//! ```no_run
//! use ni660x_ctrl::config::ControllerConfig;
//!
//! let config = ControllerConfig::load_from("config/ni660x.toml")?;
//! config.validate()?;
//! println!("Counters: {:?}", config.counter_timer.channel_names());
//! # Ok::<(), ni660x_ctrl::error::CtrlError>(())
//! ```
//!
//! A minimal file:
//!
//! ```toml
//! log_level = "debug"
//!
//! [counter_timer]
//! channel_dev_names = "dev/ni660x/ctr0,dev/ni660x/ctr1"
//! variant = "count_edges"
//!
//! [counter_timer.connect_terms]
//! "dev/ni660x/card1" = [["/Dev1/ctr0/out", "/Dev1/RTSI0", "DoNotInvertPolarity"]]
//!
//! [trigger_gate]
//! channel_dev_names = "dev/ni660x/ctr7"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::counter::variant::VariantKind;
use crate::error::{CtrlError, CtrlResult};
use crate::hardware::terminals::ConnectTerms;
use crate::timing::HardwareConstants;
use crate::validation::{is_in_range, is_not_empty, is_positive_time};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "NI660X_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Counter/timer controller settings
    #[serde(default)]
    pub counter_timer: CounterTimerConfig,
    /// Trigger/gate controller settings
    #[serde(default)]
    pub trigger_gate: TriggerGateConfig,
    /// Timing constants of the card
    #[serde(default)]
    pub hardware: HardwareConstants,
}

/// Counter/timer controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterTimerConfig {
    /// Comma separated channel device names; axis `n` uses entry `n - 1`
    #[serde(default)]
    pub channel_dev_names: String,
    /// Low time of the software timing pulse, in seconds
    #[serde(default = "default_latency_time")]
    pub latency_time: f64,
    /// Read the buffer only every N polls; the variant decides when unset
    #[serde(default)]
    pub query_filter: Option<u32>,
    /// Acquisition variant of the counter channels
    #[serde(default)]
    pub variant: VariantKind,
    /// Terminal routing per card
    #[serde(default)]
    pub connect_terms: ConnectTerms,
}

/// Trigger/gate controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerGateConfig {
    /// Comma separated channel device names; axis `n` uses entry `n - 1`
    #[serde(default)]
    pub channel_dev_names: String,
    /// Start trigger of slave axes without an override
    #[serde(default = "default_start_trigger_source")]
    pub start_trigger_source: String,
    /// Start trigger type of slave axes without an override
    #[serde(default = "default_start_trigger_type")]
    pub start_trigger_type: String,
    /// Terminal routing per card
    #[serde(default)]
    pub connect_terms: ConnectTerms,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_latency_time() -> f64 {
    25e-7
}

fn default_start_trigger_source() -> String {
    "/Dev1/PFI39".to_string()
}

fn default_start_trigger_type() -> String {
    "DigEdge".to_string()
}

/// Entry `n - 1` belongs to axis `n`, so empty entries keep their slot.
fn split_names(names: &str) -> Vec<String> {
    if names.trim().is_empty() {
        return Vec::new();
    }
    names.split(',').map(|name| name.trim().to_string()).collect()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            counter_timer: CounterTimerConfig::default(),
            trigger_gate: TriggerGateConfig::default(),
            hardware: HardwareConstants::default(),
        }
    }
}

impl Default for CounterTimerConfig {
    fn default() -> Self {
        Self {
            channel_dev_names: String::new(),
            latency_time: default_latency_time(),
            query_filter: None,
            variant: VariantKind::default(),
            connect_terms: ConnectTerms::default(),
        }
    }
}

impl Default for TriggerGateConfig {
    fn default() -> Self {
        Self {
            channel_dev_names: String::new(),
            start_trigger_source: default_start_trigger_source(),
            start_trigger_type: default_start_trigger_type(),
            connect_terms: ConnectTerms::default(),
        }
    }
}

impl CounterTimerConfig {
    /// Channel device names in axis order.
    pub fn channel_names(&self) -> Vec<String> {
        split_names(&self.channel_dev_names)
    }
}

impl TriggerGateConfig {
    /// Channel device names in axis order.
    pub fn channel_names(&self) -> Vec<String> {
        split_names(&self.channel_dev_names)
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file and `NI660X_` environment variables
    ///
    /// Example override: `NI660X_COUNTER_TIMER__LATENCY_TIME=1e-6`
    pub fn load_from<P: AsRef<Path>>(path: P) -> CtrlResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack, exposed so callers can merge further sources
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> CtrlResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(CtrlError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        let invalid = |what: &str, reason: &str| CtrlError::Configuration(format!("{what}: {reason}"));

        is_not_empty(&self.counter_timer.channel_dev_names)
            .map_err(|e| invalid("counter_timer.channel_dev_names", e))?;
        is_not_empty(&self.trigger_gate.channel_dev_names)
            .map_err(|e| invalid("trigger_gate.channel_dev_names", e))?;
        is_positive_time(self.counter_timer.latency_time)
            .map_err(|e| invalid("counter_timer.latency_time", e))?;
        if let Some(filter) = self.counter_timer.query_filter {
            is_in_range(filter, 1..=u32::MAX).map_err(|e| invalid("counter_timer.query_filter", e))?;
        }

        let hw = &self.hardware;
        for (name, value) in [
            ("hardware.clock_tick", hw.clock_tick),
            ("hardware.counter_min_pulse", hw.counter_min_pulse),
            ("hardware.trigger_min_pulse", hw.trigger_min_pulse),
            ("hardware.retrigger_low_time", hw.retrigger_low_time),
        ] {
            is_positive_time(value).map_err(|e| invalid(name, e))?;
        }
        is_in_range(hw.counter_bits, 1..=63).map_err(|e| invalid("hardware.counter_bits", e))?;

        self.counter_timer.connect_terms.validate()?;
        self.trigger_gate.connect_terms.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> ControllerConfig {
        ControllerConfig {
            counter_timer: CounterTimerConfig {
                channel_dev_names: "ct/1, ct/2".to_string(),
                ..CounterTimerConfig::default()
            },
            trigger_gate: TriggerGateConfig {
                channel_dev_names: "tg/1".to_string(),
                ..TriggerGateConfig::default()
            },
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_channel_names_split() {
        let config = valid_config();
        assert_eq!(config.counter_timer.channel_names(), vec!["ct/1", "ct/2"]);
        assert_eq!(config.trigger_gate.channel_names(), vec!["tg/1"]);
    }

    #[test]
    fn test_channel_names_keep_axis_positions() {
        let config = CounterTimerConfig {
            channel_dev_names: "ct/1,, ct/3".to_string(),
            ..CounterTimerConfig::default()
        };
        assert_eq!(config.channel_names(), vec!["ct/1", "", "ct/3"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_query_filter() {
        let mut config = valid_config();
        config.counter_timer.query_filter = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_channel_list() {
        let mut config = valid_config();
        config.trigger_gate.channel_dev_names = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_constant() {
        let mut config = valid_config();
        config.hardware.trigger_min_pulse = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[counter_timer]
channel_dev_names = "ct/1,ct/2"
variant = "position"
query_filter = 4

[counter_timer.connect_terms]
"card/1" = [["/Dev1/ctr0/out", "/Dev1/RTSI0", "DoNotInvertPolarity"]]

[trigger_gate]
channel_dev_names = "tg/1"
start_trigger_source = "/Dev1/PFI38"

[hardware]
trigger_min_pulse = 5e-5
"#
        )
        .unwrap();

        let config = ControllerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.counter_timer.variant, VariantKind::Position);
        assert_eq!(config.counter_timer.query_filter, Some(4));
        assert_eq!(config.counter_timer.latency_time, 25e-7);
        assert_eq!(config.counter_timer.connect_terms.0["card/1"].len(), 1);
        assert_eq!(config.trigger_gate.start_trigger_source, "/Dev1/PFI38");
        assert_eq!(config.trigger_gate.start_trigger_type, "DigEdge");
        assert_eq!(config.hardware.trigger_min_pulse, 5e-5);
        assert_eq!(config.hardware.counter_bits, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = ControllerConfig::load_from("/nonexistent/ni660x.toml").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.counter_timer.channel_names().is_empty());
        assert!(config.validate().is_err());
    }
}
