//! Line-level patching of `NetworkManager.conf`.
//!
//! The directive goes directly under the `[main]` header, preceded by the
//! ownership marker, so removal takes out only what falcon added. A directive
//! already set by the user counts as present and is never removed.

use std::path::Path;

use super::steps::MANAGED_MARKER;
use crate::error::HostError;

pub const MAIN_SECTION: &str = "[main]";
pub const DNSMASQ_DIRECTIVE: &str = "dns=dnsmasq";

fn section_header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    (trimmed.starts_with('[') && trimmed.ends_with(']')).then_some(trimmed)
}

fn is_directive(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, value)) => {
            format!("{}={}", key.trim(), value.trim()) == DNSMASQ_DIRECTIVE
        }
        None => false,
    }
}

/// Whether `[main]` already carries the directive.
pub fn directive_present(contents: &str) -> bool {
    let mut in_main = false;
    for line in contents.lines() {
        if let Some(header) = section_header(line) {
            in_main = header == MAIN_SECTION;
        } else if in_main && is_directive(line) {
            return true;
        }
    }
    false
}

/// Contents with the directive added, or `None` if it is already there.
pub fn enable_directive(path: &Path, contents: &str) -> Result<Option<String>, HostError> {
    if directive_present(contents) {
        return Ok(None);
    }

    let mut out = String::with_capacity(contents.len() + 64);
    let mut inserted = false;
    for line in contents.split_inclusive('\n') {
        out.push_str(line);
        if !inserted && section_header(line) == Some(MAIN_SECTION) {
            // A header on the last line without a newline keeps the file
            // ending without one.
            if line.ends_with('\n') {
                out.push_str(&format!("{MANAGED_MARKER}\n{DNSMASQ_DIRECTIVE}\n"));
            } else {
                out.push_str(&format!("\n{MANAGED_MARKER}\n{DNSMASQ_DIRECTIVE}"));
            }
            inserted = true;
        }
    }

    if !inserted {
        return Err(HostError::MissingSection {
            path: path.to_path_buf(),
            section: MAIN_SECTION.to_string(),
        });
    }
    Ok(Some(out))
}

/// Contents with falcon's directive removed, or `None` if falcon never
/// added one.
pub fn disable_directive(contents: &str) -> Option<String> {
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();
    let at = lines
        .windows(2)
        .position(|pair| pair[0].trim_end() == MANAGED_MARKER && is_directive(pair[1]))?;

    let mut out: String = lines[..at].concat();
    out.push_str(&lines[at + 2..].concat());
    if !lines[at + 1].ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    Some(out)
}
