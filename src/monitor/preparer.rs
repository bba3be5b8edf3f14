//! Output-name template expansion and collision-free file preparation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

use crate::platform::models::Metadata;
use crate::utils::filename::sanitize_filename;
use crate::{Error, Result};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"))
}

/// Expand the output template.
///
/// Recognized fields: `ChannelID`, `ChannelName`, `Date` (`YYYY-MM-DD`),
/// `Time` (`HHMMSS`), `Title`, `Ext`, `MetaData`, `Labels.<key>`. Field
/// values are sanitized of path-unsafe characters; unknown fields are an
/// error.
pub fn format_output(
    out_format: &str,
    meta: &Metadata,
    labels: &HashMap<String, String>,
    ext: &str,
) -> Result<String> {
    let now = Local::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H%M%S").to_string();

    let mut unknown: Option<String> = None;
    let expanded = placeholder_regex().replace_all(out_format, |caps: &regex::Captures<'_>| {
        let field = &caps[1];
        match field {
            "ChannelID" => sanitize_filename(&meta.user.username),
            "ChannelName" => sanitize_filename(&meta.user.name),
            "Date" => date.clone(),
            "Time" => time.clone(),
            "Title" => sanitize_filename(&meta.stream.title),
            "Ext" => ext.to_string(),
            "MetaData" => {
                sanitize_filename(&serde_json::to_string(meta).unwrap_or_default())
            }
            _ => match field.strip_prefix("Labels.") {
                Some(key) => labels.get(key).cloned().unwrap_or_default(),
                None => {
                    unknown = Some(field.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(field) = unknown {
        return Err(Error::Template(format!(
            "unknown field {field:?} in output format {out_format:?}"
        )));
    }
    Ok(expanded.into_owned())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Expand the template and pick a non-colliding name by inserting `.1`,
/// `.2`, … before the extension until a free name is found. Parent
/// directories are created.
pub fn prepare_file_auto_rename(
    out_format: &str,
    meta: &Metadata,
    labels: &HashMap<String, String>,
    ext: &str,
) -> Result<PathBuf> {
    let mut n = 0u32;
    let name = loop {
        let extn = if n == 0 {
            ext.to_string()
        } else {
            format!("{n}.{ext}")
        };
        let name = format_output(out_format, meta, labels, &extn)?;
        if !Path::new(&name).exists() {
            break name;
        }
        n += 1;
    };

    let path = PathBuf::from(name);
    ensure_parent(&path)?;
    Ok(path)
}

/// Expand the template without collision avoidance. Parent directories are
/// created.
pub fn prepare_file(
    out_format: &str,
    meta: &Metadata,
    labels: &HashMap<String, String>,
    ext: &str,
) -> Result<PathBuf> {
    let path = PathBuf::from(format_output(out_format, meta, labels, ext)?);
    ensure_parent(&path)?;
    Ok(path)
}
