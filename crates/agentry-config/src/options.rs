//! Option schema for `subprocess.exec` steps.
//!
//! Step parameters arrive as a loosely typed map. Every recognized option is
//! listed in [`SUBPROCESS_OPTIONS`] with the type it must have; anything else
//! is rejected. Options that are absent (or null) keep the
//! [`CommandSpec::default`] value.

use agentry_core::CommandSpec;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::{ConfigError, ConfigResult};

/// Raw step parameters.
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    StringList,
    StringMap,
    Bool,
}

impl OptionKind {
    fn expected(self) -> &'static str {
        match self {
            OptionKind::String => "a string",
            OptionKind::StringList => "a list of strings",
            OptionKind::StringMap => "a map of strings",
            OptionKind::Bool => "a boolean",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionDef {
    pub name: &'static str,
    pub kind: OptionKind,
}

const fn opt(name: &'static str, kind: OptionKind) -> OptionDef {
    OptionDef { name, kind }
}

pub const SUBPROCESS_OPTIONS: &[OptionDef] = &[
    opt("binary", OptionKind::String),
    opt("args", OptionKind::StringList),
    opt("command", OptionKind::String),
    opt("env", OptionKind::StringMap),
    opt("add_to_path", OptionKind::StringList),
    opt("add_expansions_to_env", OptionKind::Bool),
    opt("include_expansions_in_env", OptionKind::StringList),
    opt("background", OptionKind::Bool),
    opt("silent", OptionKind::Bool),
    opt("system_log", OptionKind::Bool),
    opt("working_dir", OptionKind::String),
    opt("ignore_standard_out", OptionKind::Bool),
    opt("ignore_standard_error", OptionKind::Bool),
    opt("redirect_standard_error_to_output", OptionKind::Bool),
    opt("continue_on_err", OptionKind::Bool),
    opt("keep_empty_args", OptionKind::Bool),
];

pub fn lookup(name: &str) -> Option<&'static OptionDef> {
    SUBPROCESS_OPTIONS.iter().find(|def| def.name == name)
}

/// Decode raw parameters into a command spec.
///
/// The result is not normalized; call [`CommandSpec::normalize`] before use.
pub fn decode_command(params: &Params) -> ConfigResult<CommandSpec> {
    let mut spec = CommandSpec::default();

    for (name, value) in params {
        let def = lookup(name).ok_or_else(|| ConfigError::UnknownOption(name.clone()))?;
        if value.is_null() {
            continue;
        }

        match def.kind {
            OptionKind::String => *string_field(&mut spec, def.name) = as_string(def, value)?,
            OptionKind::StringList => *list_field(&mut spec, def.name) = as_list(def, value)?,
            OptionKind::StringMap => spec.env = as_map(def, value)?,
            OptionKind::Bool => *bool_field(&mut spec, def.name) = as_bool(def, value)?,
        }
    }

    Ok(spec)
}

fn string_field<'a>(spec: &'a mut CommandSpec, name: &str) -> &'a mut String {
    match name {
        "binary" => &mut spec.binary,
        "command" => &mut spec.command,
        _ => &mut spec.working_dir,
    }
}

fn list_field<'a>(spec: &'a mut CommandSpec, name: &str) -> &'a mut Vec<String> {
    match name {
        "args" => &mut spec.args,
        "add_to_path" => &mut spec.add_to_path,
        _ => &mut spec.include_expansions_in_env,
    }
}

fn bool_field<'a>(spec: &'a mut CommandSpec, name: &str) -> &'a mut bool {
    match name {
        "add_expansions_to_env" => &mut spec.add_expansions_to_env,
        "background" => &mut spec.background,
        "silent" => &mut spec.silent,
        "system_log" => &mut spec.system_log,
        "ignore_standard_out" => &mut spec.ignore_stdout,
        "ignore_standard_error" => &mut spec.ignore_stderr,
        "redirect_standard_error_to_output" => &mut spec.redirect_stderr_to_stdout,
        "continue_on_err" => &mut spec.continue_on_error,
        _ => &mut spec.keep_empty_args,
    }
}

fn mismatch(def: &OptionDef, value: &Value) -> ConfigError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    };
    ConfigError::TypeMismatch {
        field: def.name.to_string(),
        expected: def.kind.expected(),
        found: found.to_string(),
    }
}

fn as_string(def: &OptionDef, value: &Value) -> ConfigResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(def, value))
}

fn as_bool(def: &OptionDef, value: &Value) -> ConfigResult<bool> {
    value.as_bool().ok_or_else(|| mismatch(def, value))
}

fn as_list(def: &OptionDef, value: &Value) -> ConfigResult<Vec<String>> {
    let items = value.as_array().ok_or_else(|| mismatch(def, value))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| mismatch(def, item))
        })
        .collect()
}

fn as_map(def: &OptionDef, value: &Value) -> ConfigResult<HashMap<String, String>> {
    let entries = value.as_object().ok_or_else(|| mismatch(def, value))?;
    entries
        .iter()
        .map(|(k, v)| {
            v.as_str()
                .map(|s| (k.clone(), s.to_string()))
                .ok_or_else(|| mismatch(def, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_decode_all_kinds() {
        let spec = decode_command(&params(json!({
            "binary": "make",
            "args": ["-j4", "test"],
            "env": {"GOFLAGS": "-mod=vendor"},
            "add_to_path": ["/opt/go/bin"],
            "working_dir": "src",
            "background": true,
            "continue_on_err": true,
            "redirect_standard_error_to_output": true,
        })))
        .unwrap();

        assert_eq!(spec.binary, "make");
        assert_eq!(spec.args, vec!["-j4", "test"]);
        assert_eq!(spec.env.get("GOFLAGS").map(String::as_str), Some("-mod=vendor"));
        assert_eq!(spec.add_to_path, vec!["/opt/go/bin"]);
        assert_eq!(spec.working_dir, "src");
        assert!(spec.background);
        assert!(spec.continue_on_error);
        assert!(spec.redirect_stderr_to_stdout);
        assert!(!spec.silent);
    }

    #[test]
    fn test_absent_options_use_defaults() {
        let spec = decode_command(&params(json!({"command": "ls"}))).unwrap();

        assert_eq!(spec.command, "ls");
        assert!(spec.env.is_empty());
        assert!(!spec.keep_empty_args);
    }

    #[test]
    fn test_null_is_treated_as_absent() {
        let spec = decode_command(&params(json!({"binary": "ls", "env": null}))).unwrap();
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = decode_command(&params(json!({"binray": "ls"}))).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(ref name) if name == "binray"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = decode_command(&params(json!({"silent": "yes"}))).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { ref field, .. } if field == "silent"));

        let err = decode_command(&params(json!({"args": ["a", 1]}))).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }

    #[test]
    fn test_config_errors_become_configuration_conflicts() {
        let err: agentry_core::Error = decode_command(&params(json!({"nope": true})))
            .unwrap_err()
            .into();
        assert!(matches!(err, agentry_core::Error::ConfigurationConflict(_)));
    }

    #[test]
    fn test_every_option_is_assignable() {
        for def in SUBPROCESS_OPTIONS {
            let value = match def.kind {
                OptionKind::String => json!("x"),
                OptionKind::StringList => json!(["x"]),
                OptionKind::StringMap => json!({"K": "x"}),
                OptionKind::Bool => json!(true),
            };
            let mut raw = Params::new();
            raw.insert(def.name.to_string(), value);
            assert!(decode_command(&raw).is_ok(), "option {} failed", def.name);
        }
    }
}
