//! Environment-variable registry: build scripts declare the variables they
//! consume, with defaults, descriptions, and a secret flag. Secret values feed
//! the session's redactor.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

/// Prefix recognized by [`import_env_from_reader`]. Variables without it are
/// skipped so arbitrary process output can be piped in safely.
pub const ENV_IMPORT_PREFIX: &str = "LODESTONE_";

const SECRET_PLACEHOLDER: &str = "<redacted>";

/// Declaration of one environment variable a build script consumes.
#[derive(Debug, Clone, Default)]
pub struct EnvVar {
    pub key: String,
    /// Fallback when neither an import nor the process environment provides a
    /// value. Must stay empty for secrets.
    pub default: String,
    pub short: String,
    pub long: String,
    pub secret: bool,
}

#[derive(Debug, Clone)]
struct RegisteredVar {
    value: String,
    default: String,
    short: String,
    secret: bool,
}

impl RegisteredVar {
    fn resolved(&self) -> &str {
        if self.value.is_empty() {
            &self.default
        } else {
            &self.value
        }
    }
}

/// Explicitly constructed registry of declared variables.
///
/// Resolution precedence: imported overrides, then the process environment,
/// then the declared default.
#[derive(Debug, Default)]
pub struct EnvRegistry {
    imported: HashMap<String, String>,
    vars: Mutex<HashMap<String, RegisteredVar>>,
}

impl EnvRegistry {
    pub fn new(imported: HashMap<String, String>) -> Self {
        Self {
            imported,
            vars: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a variable and returns its current value.
    ///
    /// Panics on an empty key or on a secret declared with a default; both
    /// indicate a programming error in the calling build script.
    pub fn register(&self, spec: EnvVar) -> String {
        assert!(
            !spec.key.trim().is_empty(),
            "environment variable key must not be empty"
        );
        assert!(
            !(spec.secret && !spec.default.is_empty()),
            "secret variables must not embed a default value"
        );

        let value = self
            .imported
            .get(&spec.key)
            .cloned()
            .or_else(|| std::env::var(&spec.key).ok())
            .unwrap_or_default();

        let registered = RegisteredVar {
            value,
            default: spec.default,
            short: spec.short,
            secret: spec.secret,
        };
        let resolved = registered.resolved().to_string();
        self.vars
            .lock()
            .expect("env registry mutex poisoned")
            .insert(spec.key, registered);
        resolved
    }

    /// Current value of a previously registered variable.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.vars
            .lock()
            .expect("env registry mutex poisoned")
            .get(key)
            .map(|var| var.resolved().to_string())
    }

    /// Values of all secret variables that resolved to something non-empty.
    pub fn secrets(&self) -> Vec<String> {
        self.vars
            .lock()
            .expect("env registry mutex poisoned")
            .values()
            .filter(|var| var.secret && !var.resolved().is_empty())
            .map(|var| var.resolved().to_string())
            .collect()
    }

    /// Writes an aligned key/value/default/description table, masking secret
    /// values.
    pub fn write_help(&self, out: &mut dyn Write) -> io::Result<()> {
        let vars = self.vars.lock().expect("env registry mutex poisoned");
        let mut rows: Vec<[String; 4]> = vars
            .iter()
            .map(|(key, var)| {
                let value = if var.secret {
                    SECRET_PLACEHOLDER.to_string()
                } else {
                    var.value.clone()
                };
                [key.clone(), value, var.default.clone(), var.short.clone()]
            })
            .collect();
        drop(vars);
        rows.sort();

        let header = ["KEY", "VALUE", "DEFAULT", "DESCRIPTION"];
        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }

        writeln!(
            out,
            "{:w0$}  {:w1$}  {:w2$}  {}",
            header[0],
            header[1],
            header[2],
            header[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        )?;
        for row in &rows {
            writeln!(
                out,
                "{:w0$}  {:w1$}  {:w2$}  {}",
                row[0],
                row[1],
                row[2],
                row[3],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
            )?;
        }
        Ok(())
    }
}

/// Consumes `key=value` lines from the reader, keeping only variables carrying
/// [`ENV_IMPORT_PREFIX`] (with the prefix stripped).
pub fn import_env_from_reader(reader: impl BufRead) -> Result<HashMap<String, String>> {
    let mut imported = HashMap::new();
    for line in reader.lines() {
        let line = line.context("failed to read environment import line")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::debug!(line, "skipping import line without key=value shape");
            continue;
        };
        let Some(key) = key.strip_prefix(ENV_IMPORT_PREFIX) else {
            tracing::debug!(line, "skipping import line without expected prefix");
            continue;
        };
        imported.insert(key.to_string(), value.to_string());
    }
    Ok(imported)
}
