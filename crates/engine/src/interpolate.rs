//! `${VAR}` interpolation and precondition evaluation.
//!
//! Two small pieces of shared semantics that the scheduler needs before
//! launching a step: substituting published output variables into the
//! step's command/args/env, and deciding whether a precondition passes.

use std::collections::HashMap;
use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;

use crate::model::Precondition;

/// Replace every `${NAME}` occurrence in `input` with the value of `NAME`
/// from `vars`, left untouched if `NAME` is not present.
pub fn interpolate(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Interpolate every value of an env map in place, returning a new map.
pub fn interpolate_env(
    env: &HashMap<String, String>,
    vars: &HashMap<String, String>,
) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| (k.clone(), interpolate(v, vars)))
        .collect()
}

/// Run a precondition's shell `condition` and compare its trimmed stdout
/// against `expected`. `expected` wrapped in `/…/` is matched as a regex;
/// otherwise it must match exactly.
pub async fn check_precondition(pre: &Precondition, vars: &HashMap<String, String>) -> bool {
    let condition = interpolate(&pre.condition, vars);
    let expected = interpolate(&pre.expected, vars);

    let output = match Command::new("sh")
        .arg("-c")
        .arg(&condition)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(_) => return false,
    };

    let actual = String::from_utf8_lossy(&output.stdout);
    let actual = actual.trim();

    if let Some(pattern) = expected.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
        Regex::new(pattern).map(|re| re.is_match(actual)).unwrap_or(false)
    } else {
        actual == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_substitutes_known_vars() {
        let mut vars = HashMap::new();
        vars.insert("NAME".to_string(), "world".to_string());
        assert_eq!(interpolate("hello ${NAME}!", &vars), "hello world!");
    }

    #[test]
    fn interpolate_leaves_unknown_vars_untouched() {
        let vars = HashMap::new();
        assert_eq!(interpolate("hello ${NAME}!", &vars), "hello ${NAME}!");
    }

    #[test]
    fn interpolate_preserves_multibyte_characters() {
        let mut vars = HashMap::new();
        vars.insert("NAME".to_string(), "世界".to_string());
        assert_eq!(interpolate("héllo ${NAME} 🎉", &vars), "héllo 世界 🎉");
    }

    #[tokio::test]
    async fn precondition_exact_match() {
        let pre = Precondition {
            condition: "echo hello".to_string(),
            expected: "hello".to_string(),
        };
        assert!(check_precondition(&pre, &HashMap::new()).await);
    }

    #[tokio::test]
    async fn precondition_regex_match() {
        let pre = Precondition {
            condition: "echo hello123".to_string(),
            expected: "/^hello[0-9]+$/".to_string(),
        };
        assert!(check_precondition(&pre, &HashMap::new()).await);
    }

    #[tokio::test]
    async fn precondition_mismatch_fails() {
        let pre = Precondition {
            condition: "echo goodbye".to_string(),
            expected: "hello".to_string(),
        };
        assert!(!check_precondition(&pre, &HashMap::new()).await);
    }
}
