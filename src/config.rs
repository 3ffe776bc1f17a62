use dirs::home_dir;
use log::{debug, warn};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.ecobee.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const CONFIG_FILE_NAME: &str = ".ecobee.yml";

/// The three credential fields kept in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    /// `None` when the file has no (or an empty) refresh token.
    pub refresh_token: Option<String>,
}

/// Everything read out of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfig {
    pub credentials: Credentials,
    pub thermostat_id: Option<String>,
}

/// Endpoints and network bounds for a session.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base: String,
    pub auth_base: String,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Get the path to the configuration file (~/.ecobee.yml)
pub fn default_config_path() -> Result<PathBuf> {
    let home = home_dir()
        .ok_or_else(|| Error::ConfigInvalid("Failed to determine home directory".to_string()))?;
    Ok(home.join(CONFIG_FILE_NAME))
}

/// Single-file credential store.
///
/// There is no cross-process locking: two invocations refreshing at the same
/// time both rewrite the file and the last writer wins.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Credentials> {
        self.load_config().map(|config| config.credentials)
    }

    pub fn load_config(&self) -> Result<StoredConfig> {
        if !self.path.exists() {
            return Err(Error::ConfigMissing(self.path.clone()));
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            Error::ConfigInvalid(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let config = parse_config(&content)
            .map_err(|msg| Error::ConfigInvalid(format!("{}: {}", self.path.display(), msg)))?;
        debug!(
            "Loaded credentials from {} (refresh token present: {})",
            self.path.display(),
            config.credentials.refresh_token.is_some()
        );
        Ok(config)
    }

    /// Write refreshed tokens back, leaving every other line of the file alone.
    pub fn persist(&self, credentials: &Credentials) -> Result<()> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            Error::ConfigWrite(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let current = parse_config(&content).ok().map(|config| config.credentials);
        let updated = match rewrite_token_lines(&content, current.as_ref(), credentials) {
            Some(updated) => updated,
            None => {
                debug!("Token keys are not plain scalars, rewriting the whole mapping");
                rewrite_mapping(&content, credentials)?
            }
        };

        self.write_atomically(&updated)?;
        debug!("Saved refreshed credentials to {}", self.path.display());
        Ok(())
    }

    fn write_atomically(&self, content: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_err =
            |e: std::io::Error| Error::ConfigWrite(format!("{}: {}", self.path.display(), e));

        let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(content.as_bytes()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;

        match fs::metadata(&self.path) {
            Ok(metadata) => temp
                .as_file()
                .set_permissions(metadata.permissions())
                .map_err(write_err)?,
            Err(e) => warn!(
                "Could not read permissions of {}: {}",
                self.path.display(),
                e
            ),
        }

        temp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn parse_config(content: &str) -> std::result::Result<StoredConfig, String> {
    if content.trim().is_empty() {
        return Err("file is empty".to_string());
    }

    let value: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    let Value::Mapping(map) = value else {
        return Err("expected a mapping of keys to values".to_string());
    };

    let client_id =
        scalar_string(map.get("client_id")).ok_or_else(|| "missing client_id".to_string())?;
    let access_token = scalar_string(map.get("access_token"))
        .ok_or_else(|| "missing access_token".to_string())?;

    Ok(StoredConfig {
        credentials: Credentials {
            client_id,
            access_token,
            refresh_token: scalar_string(map.get("refresh_token")),
        },
        thermostat_id: scalar_string(map.get("thermostat_id")),
    })
}

fn yaml_scalar(text: &str) -> Option<String> {
    serde_yaml::to_string(&Value::String(text.to_string()))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// The `  # comment` tail of a `key: value  # comment` line, if any.
/// `value_part` is everything after `key:`; `current` is the parsed value.
fn trailing_comment<'a>(value_part: &'a str, current: &str) -> &'a str {
    for (idx, _) in value_part.match_indices('#') {
        let before = &value_part[..idx];
        if !before.ends_with(char::is_whitespace) {
            continue;
        }
        let parsed = serde_yaml::from_str::<Value>(before).ok();
        if scalar_string(parsed.as_ref()).as_deref() == Some(current) {
            return &value_part[before.trim_end().len()..];
        }
    }
    ""
}

fn replace_key_line(
    content: &str,
    key: &str,
    current: Option<&str>,
    value: &str,
) -> Option<String> {
    let prefix = format!("{}:", key);
    let mut replaced = false;
    let mut out = String::with_capacity(content.len() + value.len());

    for line in content.split_inclusive('\n') {
        if line.starts_with(&prefix) {
            if replaced {
                return None;
            }
            let ending = if line.ends_with("\r\n") {
                "\r\n"
            } else if line.ends_with('\n') {
                "\n"
            } else {
                ""
            };
            let value_part = line
                .strip_suffix(ending)
                .unwrap_or(line)
                .get(prefix.len()..)
                .unwrap_or_default();
            let comment = current
                .map(|current| trailing_comment(value_part, current))
                .unwrap_or_default();

            out.push_str(&prefix);
            out.push(' ');
            out.push_str(&yaml_scalar(value)?);
            out.push_str(comment);
            out.push_str(ending);
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    replaced.then_some(out)
}

/// Line-level edit of the token keys that actually changed. Returns `None`
/// when the file does not parse, a changed key is missing or duplicated, or
/// the result no longer parses to the expected tokens.
fn rewrite_token_lines(
    content: &str,
    current: Option<&Credentials>,
    credentials: &Credentials,
) -> Option<String> {
    let current = current?;
    let mut updated = content.to_string();

    if current.access_token != credentials.access_token {
        updated = replace_key_line(
            &updated,
            "access_token",
            Some(&current.access_token),
            &credentials.access_token,
        )?;
    }
    if let Some(refresh) = &credentials.refresh_token {
        if current.refresh_token.as_ref() != Some(refresh) {
            updated = replace_key_line(
                &updated,
                "refresh_token",
                current.refresh_token.as_deref(),
                refresh,
            )?;
        }
    }

    let reparsed = parse_config(&updated).ok()?;
    let refresh_matches = credentials.refresh_token.is_none()
        || reparsed.credentials.refresh_token == credentials.refresh_token;
    (reparsed.credentials.access_token == credentials.access_token && refresh_matches)
        .then_some(updated)
}

fn rewrite_mapping(content: &str, credentials: &Credentials) -> Result<String> {
    let mut root: Value = serde_yaml::from_str(content)?;
    let Value::Mapping(ref mut map) = root else {
        return Err(Error::ConfigWrite(
            "configuration root is not a mapping".to_string(),
        ));
    };

    set_key(map, "access_token", &credentials.access_token);
    if let Some(refresh) = &credentials.refresh_token {
        set_key(map, "refresh_token", refresh);
    }

    Ok(serde_yaml::to_string(&root)?)
}

fn set_key(map: &mut Mapping, key: &str, value: &str) {
    map.insert(
        Value::String(key.to_string()),
        Value::String(value.to_string()),
    );
}
