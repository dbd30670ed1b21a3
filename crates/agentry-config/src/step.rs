//! Step document parsing.
//!
//! A step document lists one or more `subprocess.exec` nodes:
//!
//! ```kdl
//! subprocess.exec {
//!     command "make test"
//!     working_dir "src"
//!     env {
//!         GOFLAGS "-mod=vendor"
//!     }
//!     continue_on_err #true
//! }
//! ```

use agentry_core::{CommandSpec, STEP_NAME};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::options::{self, OptionKind, Params};
use crate::{ConfigError, ConfigResult};

/// Parse every step in a KDL document into raw parameters.
pub fn parse_step_params(kdl: &str) -> ConfigResult<Vec<Params>> {
    let doc: KdlDocument = kdl.parse()?;

    let mut steps = Vec::new();
    for node in doc.nodes() {
        match node.name().value() {
            STEP_NAME => steps.push(parse_params(node)?),
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField(STEP_NAME.to_string()));
    }

    Ok(steps)
}

/// Parse and decode every step in a KDL document.
pub fn parse_steps(kdl: &str) -> ConfigResult<Vec<CommandSpec>> {
    parse_step_params(kdl)?
        .iter()
        .map(options::decode_command)
        .collect()
}

/// Read and decode a step document from disk.
pub fn load_steps(path: impl AsRef<Path>) -> ConfigResult<Vec<CommandSpec>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let steps = parse_steps(&text)?;
    debug!(path = %path.display(), steps = steps.len(), "Loaded step document");
    Ok(steps)
}

fn parse_params(node: &KdlNode) -> ConfigResult<Params> {
    let mut params = Params::new();

    let Some(children) = node.children() else {
        return Ok(params);
    };

    for child in children.nodes() {
        let name = child.name().value();
        let def = options::lookup(name).ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;

        let value = match def.kind {
            OptionKind::StringList => Value::Array(get_all_args(child)),
            OptionKind::StringMap => Value::Object(get_child_map(child)),
            OptionKind::String | OptionKind::Bool => get_first_arg(child).unwrap_or(Value::Null),
        };

        if params.insert(name.to_string(), value).is_some() {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
    }

    Ok(params)
}

// Helper functions for extracting values from KDL nodes

fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i).map(Value::from).unwrap_or(Value::Null)
    } else if let Some(f) = value.as_float() {
        Value::from(f)
    } else {
        Value::Null
    }
}

fn get_first_arg(node: &KdlNode) -> Option<Value> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| kdl_to_json(e.value()))
}

fn get_all_args(node: &KdlNode) -> Vec<Value> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_to_json(e.value()))
        .collect()
}

fn get_child_map(node: &KdlNode) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_arg(child) {
                map.insert(key, val);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_step() {
        let kdl = r#"
            subprocess.exec {
                binary "go"
                args "test" "./..."
                working_dir "src"
                env {
                    GOFLAGS "-mod=vendor"
                }
                continue_on_err #true
            }
        "#;

        let steps = parse_steps(kdl).unwrap();
        assert_eq!(steps.len(), 1);

        let step = &steps[0];
        assert_eq!(step.binary, "go");
        assert_eq!(step.args, vec!["test", "./..."]);
        assert_eq!(step.working_dir, "src");
        assert_eq!(step.env.get("GOFLAGS").map(String::as_str), Some("-mod=vendor"));
        assert!(step.continue_on_error);
    }

    #[test]
    fn test_single_list_entry_is_a_list() {
        let kdl = r#"
            subprocess.exec {
                command "make"
                add_to_path "/opt/tool"
            }
        "#;

        let steps = parse_steps(kdl).unwrap();
        assert_eq!(steps[0].add_to_path, vec!["/opt/tool"]);
    }

    #[test]
    fn test_multiple_steps() {
        let kdl = r#"
            subprocess.exec {
                command "make build"
            }
            subprocess.exec {
                command "make test"
                background #true
            }
        "#;

        let steps = parse_steps(kdl).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!steps[0].background);
        assert!(steps[1].background);
    }

    #[test]
    fn test_unknown_child_rejected() {
        let kdl = r#"
            subprocess.exec {
                comand "make"
            }
        "#;

        assert!(matches!(
            parse_steps(kdl),
            Err(ConfigError::UnknownOption(ref name)) if name == "comand"
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let kdl = r#"
            subprocess.exec {
                binary "ls"
                silent "yes"
            }
        "#;

        assert!(matches!(
            parse_steps(kdl),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_option_rejected() {
        let kdl = r#"
            subprocess.exec {
                binary "ls"
                binary "cat"
            }
        "#;

        assert!(matches!(parse_steps(kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            parse_steps(""),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let kdl = r#"shell.exec { script "echo hi"; }"#;
        assert!(parse_steps(kdl).is_err());
    }
}
