//! Check and hook configuration and results

use crate::{validate_name, Asset, ValidationError};
use serde::{Deserialize, Serialize};

/// Named hook types besides the literal exit codes `"0"`..=`"255"`
pub const NAMED_HOOK_TYPES: [&str; 5] = ["ok", "warning", "critical", "unknown", "non-zero"];

/// Default hook timeout in seconds
pub const DEFAULT_HOOK_TIMEOUT: u32 = 60;

/// Scheduling and execution parameters of a check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Check name
    pub name: String,
    /// Namespace the check belongs to
    #[serde(default)]
    pub namespace: String,
    /// Shell command to run
    #[serde(default)]
    pub command: String,
    /// Interval between executions, seconds
    #[serde(default)]
    pub interval: u32,
    /// Cron schedule, used instead of `interval` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Execution timeout in seconds, zero means none
    #[serde(default)]
    pub timeout: u32,
    /// Subscriptions the check is published to
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Names of assets the command depends on
    #[serde(default)]
    pub runtime_assets: Vec<String>,
    /// Hooks to run depending on the check status
    #[serde(default)]
    pub check_hooks: Vec<HookList>,
    /// Extra `KEY=VALUE` environment entries
    #[serde(default)]
    pub env_vars: Vec<String>,
    /// Write the JSON encoded entity and check to the command's stdin
    #[serde(default)]
    pub stdin: bool,
    /// Truncate output to this many bytes, zero means unlimited
    #[serde(default)]
    pub max_output_size: u64,
    /// Drop the command output entirely
    #[serde(default)]
    pub discard_output: bool,
    /// Handlers the backend should run for events of this check
    #[serde(default)]
    pub handlers: Vec<String>,
}

/// A set of hooks keyed by a status match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookList {
    /// Status match, see [`hook_type_matches`]
    #[serde(rename = "type")]
    pub hook_type: String,
    /// Hook names to run when the type matches
    #[serde(default)]
    pub hooks: Vec<String>,
}

/// Request from the backend to execute a check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Check to execute
    pub config: CheckConfig,
    /// Assets referenced by the check and its hooks, already resolved by the backend
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// Hook definitions referenced by `config.check_hooks`
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    /// When the backend issued the request, unix seconds
    #[serde(default)]
    pub issued: i64,
}

/// Result of a check execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// Configuration the check was executed with
    #[serde(flatten)]
    pub config: CheckConfig,
    /// Exit status
    #[serde(default)]
    pub status: i32,
    /// Combined stdout and stderr
    #[serde(default)]
    pub output: String,
    /// Execution start, unix seconds
    #[serde(default)]
    pub executed: i64,
    /// When the request was issued, unix seconds
    #[serde(default)]
    pub issued: i64,
    /// Wall-clock duration in seconds
    #[serde(default)]
    pub duration: f64,
    /// Results of hooks run after this check
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}

/// Hook definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Hook name
    pub name: String,
    /// Namespace the hook belongs to
    #[serde(default)]
    pub namespace: String,
    /// Shell command to run
    #[serde(default)]
    pub command: String,
    /// Execution timeout in seconds, zero means none
    #[serde(default = "default_hook_timeout")]
    pub timeout: u32,
    /// Write the JSON encoded entity and check to the command's stdin
    #[serde(default)]
    pub stdin: bool,
    /// Names of assets the command depends on
    #[serde(default)]
    pub runtime_assets: Vec<String>,
}

fn default_hook_timeout() -> u32 {
    DEFAULT_HOOK_TIMEOUT
}

/// Result of a hook execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Configuration the hook was executed with
    #[serde(flatten)]
    pub config: HookConfig,
    /// Exit status
    #[serde(default)]
    pub status: i32,
    /// Combined stdout and stderr
    #[serde(default)]
    pub output: String,
    /// Execution start, unix seconds
    #[serde(default)]
    pub executed: i64,
    /// When the parent check request was issued, unix seconds
    #[serde(default)]
    pub issued: i64,
    /// Wall-clock duration in seconds
    #[serde(default)]
    pub duration: f64,
}

impl CheckConfig {
    /// Create a check configuration with a command and interval
    pub fn new(name: impl Into<String>, command: impl Into<String>, interval: u32) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            interval,
            ..Default::default()
        }
    }

    /// Validate the configuration before execution
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("check", &self.name)?;
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                kind: "check",
                field: "command",
            });
        }
        let has_cron = self.cron.as_deref().is_some_and(|c| !c.trim().is_empty());
        if self.interval == 0 && !has_cron {
            return Err(ValidationError::MissingSchedule(self.name.clone()));
        }
        for list in &self.check_hooks {
            if !is_valid_hook_type(&list.hook_type) {
                return Err(ValidationError::InvalidHookType(list.hook_type.clone()));
            }
            for hook in &list.hooks {
                validate_name("hook", hook)?;
            }
        }
        Ok(())
    }

    /// Hook names that should run for the given status, in declaration order
    pub fn hooks_for_status(&self, status: i32) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for list in self.check_hooks.iter().filter(|l| hook_type_matches(&l.hook_type, status)) {
            for name in &list.hooks {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl HookConfig {
    /// Create a hook configuration
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            command: command.into(),
            timeout: DEFAULT_HOOK_TIMEOUT,
            stdin: false,
            runtime_assets: Vec::new(),
        }
    }

    /// Validate the configuration before execution
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("hook", &self.name)?;
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                kind: "hook",
                field: "command",
            });
        }
        Ok(())
    }
}

/// Whether `hook_type` is an exit code `"0"`..=`"255"` or a named type
pub fn is_valid_hook_type(hook_type: &str) -> bool {
    if NAMED_HOOK_TYPES.contains(&hook_type) {
        return true;
    }
    // reject forms like "+1" or "007" that parse but are not canonical
    matches!(hook_type.parse::<u8>(), Ok(code) if code.to_string() == hook_type)
}

/// Whether hooks of `hook_type` run after a check exited with `status`
pub fn hook_type_matches(hook_type: &str, status: i32) -> bool {
    match hook_type {
        "ok" => status == 0,
        "warning" => status == 1,
        "critical" => status == 2,
        "unknown" => !(0..=2).contains(&status),
        "non-zero" => status != 0,
        code => code == status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook_list(hook_type: &str, hooks: &[&str]) -> HookList {
        HookList {
            hook_type: hook_type.to_string(),
            hooks: hooks.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn test_hook_type_matching_table() {
        let cases: &[(&str, i32, bool)] = &[
            ("0", 0, true),
            ("ok", 0, true),
            ("non-zero", 0, false),
            ("1", 1, true),
            ("warning", 1, true),
            ("non-zero", 1, true),
            ("critical", 1, false),
            ("2", 2, true),
            ("critical", 2, true),
            ("unknown", 2, false),
            ("3", 3, true),
            ("unknown", 3, true),
            ("unknown", 127, true),
            ("127", 127, true),
            ("non-zero", 127, true),
            ("ok", 127, false),
            ("unknown", -1, true),
        ];
        for (hook_type, status, expected) in cases {
            assert_eq!(
                hook_type_matches(hook_type, *status),
                *expected,
                "hook type {} with status {}",
                hook_type,
                status
            );
        }
    }

    #[test]
    fn test_valid_hook_types() {
        for t in ["0", "1", "255", "ok", "warning", "critical", "unknown", "non-zero"] {
            assert!(is_valid_hook_type(t), "{}", t);
        }
        for t in ["256", "-1", "007", "+1", "fatal", ""] {
            assert!(!is_valid_hook_type(t), "{}", t);
        }
    }

    #[test]
    fn test_check_validation() {
        let check = CheckConfig::new("disk", "check-disk -w 80", 60);
        assert!(check.validate().is_ok());

        let mut cron = CheckConfig::new("disk", "check-disk", 0);
        assert!(matches!(cron.validate(), Err(ValidationError::MissingSchedule(_))));
        cron.cron = Some("*/5 * * * *".to_string());
        assert!(cron.validate().is_ok());

        let empty = CheckConfig::new("disk", "   ", 60);
        assert!(matches!(empty.validate(), Err(ValidationError::EmptyField { field: "command", .. })));

        let mut bad_hook = CheckConfig::new("disk", "true", 60);
        bad_hook.check_hooks.push(hook_list("fatal", &["dump"]));
        assert!(matches!(bad_hook.validate(), Err(ValidationError::InvalidHookType(_))));
    }

    #[test]
    fn test_hooks_for_status_deduplicates() {
        let mut check = CheckConfig::new("disk", "true", 60);
        check.check_hooks = vec![
            hook_list("critical", &["ps", "df"]),
            hook_list("non-zero", &["df", "uptime"]),
            hook_list("ok", &["noop"]),
        ];
        assert_eq!(check.hooks_for_status(2), vec!["ps", "df", "uptime"]);
        assert_eq!(check.hooks_for_status(0), vec!["noop"]);
        assert_eq!(check.hooks_for_status(1), vec!["df", "uptime"]);
    }

    #[test]
    fn test_hook_default_timeout() {
        let hook: HookConfig = serde_json::from_str(r#"{"name":"ps","command":"ps aux"}"#).unwrap();
        assert_eq!(hook.timeout, DEFAULT_HOOK_TIMEOUT);
        assert!(hook.validate().is_ok());
    }

    #[test]
    fn test_check_result_flattens_config() {
        let check = Check {
            config: CheckConfig::new("disk", "true", 60),
            status: 2,
            output: "CRITICAL".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&check).unwrap();
        assert_eq!(value["name"], "disk");
        assert_eq!(value["status"], 2);

        let decoded: Check = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, check);
    }
}
