//! Desktop-entry parsing.
//!
//! Parses `.desktop` files into a group/key model that preserves locale
//! suffixes, so localized values can be resolved at read time against the
//! process locale. The parser is lenient: malformed or duplicate keys are
//! recorded and reported through [`ParseOutcome::OkWithInvalidKeys`] while
//! the well-formed remainder stays usable. Only a missing `[Desktop Entry]`
//! group or an unrecognized `Type` makes a file invalid.

use crate::error::AppsError;
use crate::locale::Locale;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Name of the mandatory main group.
pub const MAIN_GROUP: &str = "Desktop Entry";

/// Result of a successful parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Ok,
    /// The file parsed but some keys were malformed or duplicated.
    /// Callers may still use every well-formed key.
    OkWithInvalidKeys,
}

/// Recognized values of the `Type` key. Anything else is invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    Application,
    Link,
    Directory,
}

impl EntryType {
    fn from_key(value: &str) -> Option<Self> {
        match value {
            "Application" => Some(EntryType::Application),
            "Link" => Some(EntryType::Link),
            "Directory" => Some(EntryType::Directory),
            _ => None,
        }
    }
}

/// One `[...]` group with its raw (locale-suffixed) keys.
#[derive(Clone, Debug, Default)]
pub struct Group {
    entries: HashMap<String, String>,
}

impl Group {
    /// Raw lookup, exact key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Localized lookup with the freedesktop fallback chain, ending at the
    /// unsuffixed key.
    pub fn localized(&self, key: &str, locale: &Locale) -> Option<&str> {
        for candidate in locale.candidates() {
            if let Some(value) = self.entries.get(&format!("{key}[{candidate}]")) {
                return Some(value);
            }
        }
        self.get(key)
    }

    pub fn bool_key(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            "true" => Some(true),
            "false" => Some(false),
            other => {
                debug!("non-boolean value {other:?} for key {key}");
                None
            }
        }
    }

    /// Semicolon-separated list with `\;` escapes.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }
}

/// A parsed desktop-entry file.
#[derive(Clone, Debug)]
pub struct DesktopEntry {
    groups: HashMap<String, Group>,
    entry_type: EntryType,
}

impl DesktopEntry {
    /// Parse a desktop-entry file from disk.
    pub fn parse(path: &Path) -> Result<(Self, ParseOutcome), AppsError> {
        let content = fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Parse desktop-entry text.
    pub fn parse_str(content: &str) -> Result<(Self, ParseOutcome), AppsError> {
        let mut groups: HashMap<String, Group> = HashMap::new();
        let mut current: Option<String> = None;
        let mut invalid_keys = 0usize;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if groups.contains_key(name) {
                    // Duplicate group header; keep merging into the first,
                    // per-key first-wins still applies.
                    invalid_keys += 1;
                }
                groups.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let Some(group_name) = &current else {
                invalid_keys += 1;
                continue;
            };

            let Some((key, value)) = line.split_once('=') else {
                invalid_keys += 1;
                continue;
            };

            let key = key.trim();
            let value = value.trim();
            if !valid_key(key) {
                invalid_keys += 1;
                continue;
            }

            let group = groups.get_mut(group_name).expect("group exists");
            if group.entries.contains_key(key) {
                // First occurrence wins.
                invalid_keys += 1;
                continue;
            }
            group.entries.insert(key.to_string(), value.to_string());
        }

        let Some(main) = groups.get(MAIN_GROUP) else {
            return Err(AppsError::Invalid(format!("missing [{MAIN_GROUP}] group")));
        };

        let entry_type = match main.get("Type") {
            Some(value) => EntryType::from_key(value)
                .ok_or_else(|| AppsError::Invalid(format!("unrecognized Type {value:?}")))?,
            None => return Err(AppsError::Invalid("missing Type key".into())),
        };

        let outcome = if invalid_keys == 0 {
            ParseOutcome::Ok
        } else {
            debug!("desktop entry parsed with {invalid_keys} invalid key(s)");
            ParseOutcome::OkWithInvalidKeys
        };

        Ok((DesktopEntry { groups, entry_type }, outcome))
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_application(&self) -> bool {
        self.entry_type == EntryType::Application
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// The mandatory `[Desktop Entry]` group.
    pub fn main(&self) -> &Group {
        self.groups.get(MAIN_GROUP).expect("validated at parse time")
    }

    pub fn name(&self, locale: &Locale) -> Option<&str> {
        self.main().localized("Name", locale)
    }

    pub fn exec(&self) -> Option<&str> {
        self.main().get("Exec")
    }

    pub fn icon(&self) -> Option<&str> {
        self.main().get("Icon")
    }

    /// Working directory (`Path` key).
    pub fn working_path(&self) -> Option<&str> {
        self.main().get("Path").filter(|p| !p.is_empty())
    }

    pub fn hidden(&self) -> bool {
        self.main().bool_key("Hidden").unwrap_or(false)
    }

    pub fn no_display(&self) -> bool {
        self.main().bool_key("NoDisplay").unwrap_or(false)
    }

    pub fn terminal(&self) -> bool {
        self.main().bool_key("Terminal").unwrap_or(false)
    }

    pub fn dbus_activatable(&self) -> bool {
        self.main().bool_key("DBusActivatable").unwrap_or(false)
    }

    /// Declared action ids, in file order of the `Actions` list.
    pub fn actions(&self) -> Vec<String> {
        self.main().list("Actions")
    }

    /// The `[Desktop Action <id>]` group, if declared and present.
    pub fn action_group(&self, action: &str) -> Option<&Group> {
        if !self.actions().iter().any(|a| a == action) {
            return None;
        }
        self.group(&format!("Desktop Action {action}"))
    }

    /// Evaluate `OnlyShowIn`/`NotShowIn` against the current desktops
    /// (usually `$XDG_CURRENT_DESKTOP` split on `:`).
    pub fn should_show_in(&self, desktops: &[String]) -> bool {
        let only = self.main().list("OnlyShowIn");
        if !only.is_empty() {
            return desktops.iter().any(|d| only.contains(d));
        }
        let not = self.main().list("NotShowIn");
        !desktops.iter().any(|d| not.contains(d))
    }
}

/// Split a semicolon-separated list value, honoring the `\;` escape.
pub fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut item = String::new();
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            if ch != ';' {
                item.push('\\');
            }
            item.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ';' {
            items.push(std::mem::take(&mut item));
        } else {
            item.push(ch);
        }
    }
    if escaped {
        item.push('\\');
    }
    if !item.is_empty() {
        items.push(item);
    }
    items
}

fn valid_key(key: &str) -> bool {
    let (name, suffix) = match key.split_once('[') {
        Some((name, rest)) => match rest.strip_suffix(']') {
            Some(locale) => (name, Some(locale)),
            None => return false,
        },
        None => (key, None),
    };

    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return false;
    }
    suffix.is_none_or(|s| !s.is_empty())
}
