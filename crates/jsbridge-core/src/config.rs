//! Engine configuration and command-line flags.
//!
//! Flags use the `--name`, `--no-name` and `--name=value` forms. Dashes and
//! underscores in names are interchangeable. A bare `--` ends flag parsing.

use serde::Deserialize;
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};

/// Default source name given to compiled scripts.
pub const DEFAULT_SCRIPT_NAME: &str = "<anonymous>";

/// Settings applied to contexts and scripts created by an isolate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Install a global `gc()` function in new contexts.
    /// Default: false
    pub expose_gc: bool,

    /// Value for `Error.stackTraceLimit` in new contexts.
    /// Default: engine default
    pub stack_trace_limit: Option<u32>,

    /// Source name reported in exception locations.
    /// Default: `<anonymous>`
    pub script_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expose_gc: false,
            stack_trace_limit: None,
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the global `gc()` function.
    pub fn expose_gc(mut self, enabled: bool) -> Self {
        self.expose_gc = enabled;
        self
    }

    /// Set `Error.stackTraceLimit`.
    pub fn stack_trace_limit(mut self, limit: u32) -> Self {
        self.stack_trace_limit = Some(limit);
        self
    }

    /// Set the source name for compiled scripts.
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Apply one flag.
    ///
    /// Returns `Ok(false)` for arguments that are not flags or that name no
    /// known flag, and an error when a known flag has a bad value.
    pub fn apply_flag(&mut self, arg: &str) -> BridgeResult<bool> {
        let Some(body) = arg.strip_prefix("--") else {
            return Ok(false);
        };
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let normalized = name.replace('_', "-");
        let (name, negated) = match normalized.strip_prefix("no-") {
            Some(rest) => (rest, true),
            None => (normalized.as_str(), false),
        };

        let invalid = |reason: &str| BridgeError::InvalidFlag {
            flag: name.to_string(),
            reason: reason.to_string(),
        };

        match name {
            "expose-gc" => {
                self.expose_gc = match (negated, value) {
                    (negated, None) => !negated,
                    (false, Some(value)) => {
                        parse_bool(value).ok_or_else(|| invalid("expected true or false"))?
                    }
                    (true, Some(_)) => return Err(invalid("--no- form takes no value")),
                };
            }
            "stack-trace-limit" => {
                self.stack_trace_limit = match (negated, value) {
                    (true, None) => None,
                    (false, Some(value)) => Some(
                        value
                            .parse()
                            .map_err(|_| invalid("expected a non-negative integer"))?,
                    ),
                    (false, None) => return Err(invalid("missing value")),
                    (true, Some(_)) => return Err(invalid("--no- form takes no value")),
                };
            }
            "script-name" => match (negated, value) {
                (false, Some(value)) => self.script_name = value.to_string(),
                (true, None) => self.script_name = DEFAULT_SCRIPT_NAME.to_string(),
                (false, None) => return Err(invalid("missing value")),
                (true, Some(_)) => return Err(invalid("--no- form takes no value")),
            },
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Apply every flag in `args`, where `args[0]` is the program name.
    ///
    /// Returns the indices of the arguments consumed as engine flags, in
    /// order. Unknown flags and flags with bad values are left in place and
    /// logged.
    pub fn apply_command_line<S: AsRef<str>>(&mut self, args: &[S]) -> Vec<usize> {
        let mut consumed = Vec::new();
        for (index, arg) in args.iter().enumerate().skip(1) {
            let arg = arg.as_ref();
            if arg == "--" {
                break;
            }
            match self.apply_flag(arg) {
                Ok(true) => consumed.push(index),
                Ok(false) => {
                    if arg.starts_with("--") {
                        warn!(target: "jsbridge::config", flag = arg, "unknown engine flag left in argv");
                    }
                }
                Err(e) => warn!(target: "jsbridge::config", flag = arg, "{}", e),
            }
        }
        consumed
    }

    /// Apply flags and remove the consumed ones from `args`.
    pub fn strip_command_line(&mut self, args: &mut Vec<String>) {
        let consumed = self.apply_command_line(args.as_slice());
        let mut index = 0;
        args.retain(|_| {
            let keep = consumed.binary_search(&index).is_err();
            index += 1;
            keep
        });
    }

    /// This configuration as flags, suitable for [`apply_command_line`](Self::apply_command_line).
    pub fn to_flags(&self) -> Vec<String> {
        let expose_gc = if self.expose_gc {
            "--expose-gc".to_string()
        } else {
            "--no-expose-gc".to_string()
        };
        let stack_trace_limit = match self.stack_trace_limit {
            Some(limit) => format!("--stack-trace-limit={limit}"),
            None => "--no-stack-trace-limit".to_string(),
        };
        vec![
            expose_gc,
            stack_trace_limit,
            format!("--script-name={}", self.script_name),
        ]
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.expose_gc);
        assert_eq!(config.stack_trace_limit, None);
        assert_eq!(config.script_name, "<anonymous>");
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .expose_gc(true)
            .stack_trace_limit(5)
            .script_name("main.js");
        assert!(config.expose_gc);
        assert_eq!(config.stack_trace_limit, Some(5));
        assert_eq!(config.script_name, "main.js");
    }

    #[test]
    fn test_flag_forms() {
        let mut config = EngineConfig::default();
        assert!(config.apply_flag("--expose-gc").unwrap());
        assert!(config.expose_gc);
        assert!(config.apply_flag("--no-expose_gc").unwrap());
        assert!(!config.expose_gc);
        assert!(config.apply_flag("--expose_gc=true").unwrap());
        assert!(config.expose_gc);
        assert!(config.apply_flag("--stack_trace_limit=3").unwrap());
        assert_eq!(config.stack_trace_limit, Some(3));
        assert!(config.apply_flag("--no-stack-trace-limit").unwrap());
        assert_eq!(config.stack_trace_limit, None);
    }

    #[test]
    fn test_non_flags_are_ignored() {
        let mut config = EngineConfig::default();
        assert!(!config.apply_flag("print(1)").unwrap());
        assert!(!config.apply_flag("-x").unwrap());
        assert!(!config.apply_flag("--harmony").unwrap());
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_bad_values_are_errors() {
        let mut config = EngineConfig::default();
        assert!(matches!(
            config.apply_flag("--stack-trace-limit=lots"),
            Err(BridgeError::InvalidFlag { .. })
        ));
        assert!(config.apply_flag("--stack-trace-limit").is_err());
        assert!(config.apply_flag("--expose-gc=maybe").is_err());
        assert_eq!(config.stack_trace_limit, None);
    }

    #[test]
    fn test_command_line_stops_at_double_dash() {
        let mut config = EngineConfig::default();
        let consumed = config.apply_command_line(&args(&[
            "prog",
            "--expose-gc",
            "snippet",
            "--",
            "--stack-trace-limit=1",
        ]));
        assert_eq!(consumed, vec![1]);
        assert!(config.expose_gc);
        assert_eq!(config.stack_trace_limit, None);
    }

    #[test]
    fn test_program_name_is_never_a_flag() {
        let mut config = EngineConfig::default();
        assert!(config.apply_command_line(&args(&["--expose-gc"])).is_empty());
        assert!(!config.expose_gc);
    }

    #[test]
    fn test_strip_keeps_unknown_flags_in_order() {
        let mut config = EngineConfig::default();
        let mut argv = args(&["prog", "--unknown", "--expose-gc", "code", "--script-name=a.js"]);
        config.strip_command_line(&mut argv);
        assert_eq!(argv, args(&["prog", "--unknown", "code"]));
        assert_eq!(config.script_name, "a.js");
    }

    #[test]
    fn test_to_flags_round_trip() {
        let config = EngineConfig::new()
            .expose_gc(true)
            .stack_trace_limit(7)
            .script_name("x.js");
        let mut argv = vec!["prog".to_string()];
        argv.extend(config.to_flags());
        let mut parsed = EngineConfig::default();
        parsed.apply_command_line(&argv);
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let config: EngineConfig =
            toml::from_str("expose-gc = true\nstack-trace-limit = 4\n").unwrap();
        assert!(config.expose_gc);
        assert_eq!(config.stack_trace_limit, Some(4));
        assert_eq!(config.script_name, "<anonymous>");
    }
}
