//! Minimal `[section]` / `key = value` reader-writer.
//!
//! This is deliberately small: it only needs to support what §6 of the
//! interface contract describes — UTF-8 text, `[section]` headers,
//! `key = value` lines, and indexed keys written as `name(idx) = value`.
//! Ordering of keys within a section is not semantically meaningful (see
//! the round-trip law in the testable properties), so `Ini` stores each
//! section as an insertion-ordered map but equality ignores key order.

use std::collections::BTreeMap;

/// One section's key/value pairs, insertion order preserved for writing,
/// but compared for equality irrespective of order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Indexed keys, written by this crate's DBs as `name(idx) = value`.
    pub fn set_indexed(&mut self, name: &str, idx: u32, value: impl Into<String>) {
        self.set(&format!("{name}({idx})"), value);
    }

    pub fn get_indexed(&self, name: &str, idx: u32) -> Option<&str> {
        self.get(&format!("{name}({idx})"))
    }
}

/// A whole document: an ordered collection of named sections.
#[derive(Debug, Clone, Default)]
pub struct Ini {
    sections: Vec<(String, Section)>,
}

impl PartialEq for Ini {
    /// Semantic equality: same sections with the same names, each section's
    /// keys compared as sets (order within a section doesn't matter), but
    /// section order and contents otherwise must match.
    fn eq(&self, other: &Self) -> bool {
        if self.sections.len() != other.sections.len() {
            return false;
        }
        let mine: BTreeMap<_, _> = self
            .sections
            .iter()
            .map(|(n, s)| (n.clone(), as_set(s)))
            .collect();
        let theirs: BTreeMap<_, _> = other
            .sections
            .iter()
            .map(|(n, s)| (n.clone(), as_set(s)))
            .collect();
        mine == theirs
    }
}

fn as_set(s: &Section) -> BTreeMap<String, String> {
    s.entries.iter().cloned().collect()
}

impl Ini {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        if let Some(idx) = self.sections.iter().position(|(n, _)| n == name) {
            &mut self.sections[idx].1
        } else {
            self.sections.push((name.to_string(), Section::default()));
            &mut self.sections.last_mut().unwrap().1
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn remove_section(&mut self, name: &str) {
        self.sections.retain(|(n, _)| n != name);
    }

    /// Parse UTF-8 INI text. Malformed lines (no `=`, not a `[section]`
    /// header, not blank, not a `;`/`#` comment) are skipped with a
    /// warning log rather than aborting the parse, per §6: "implementers
    /// must accept unknown keys as warnings (do not abort)."
    pub fn parse(text: &str) -> Self {
        let mut ini = Ini::new();
        let mut current = String::from("");
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(stripped) = line.strip_prefix('[') {
                if let Some(name) = stripped.strip_suffix(']') {
                    current = name.to_string();
                    ini.section_mut(&current);
                    continue;
                }
            }
            match line.split_once('=') {
                Some((k, v)) => {
                    ini.section_mut(&current).set(k.trim(), v.trim().to_string());
                }
                None => {
                    log::warn!("ini: skipping malformed line {}: {raw:?}", lineno + 1);
                }
            }
        }
        ini
    }

    /// Render back to text. Section and key order is insertion order;
    /// semantic equality (`Ini::eq`) does not depend on it.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, section) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (k, v) in section.iter() {
                out.push_str(k);
                out.push_str(" = ");
                out.push_str(v);
                out.push('\n');
            }
        }
        out
    }
}

/// Parse a boolean the way §6 specifies: `1`, `y`, `Y` are true, anything
/// else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "y" | "Y")
}

pub fn render_bool(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}
