//! Parameter bag passed into jobs

use crate::error::{Result, RuneError};
use std::fmt;

/// Separator used to store a list of strings in a single value.
pub const LIST_SEPARATOR: char = '\u{1f}';

/// Ordered string-keyed parameters for a job.
///
/// Every value is stored as a string. The typed setters fix the encoding:
/// booleans are `"1"` or `""`, integers are decimal, lists are joined with
/// [`LIST_SEPARATOR`]. Setting a key twice overwrites it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    entries: Vec<(String, String)>,
}

impl Env {
    /// Create an empty parameter bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw string value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, if value { "1" } else { "" });
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, value.to_string());
    }

    pub fn set_list<S: AsRef<str>>(&mut self, key: &str, values: &[S]) {
        let joined = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(&LIST_SEPARATOR.to_string());
        self.set(key, joined);
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Raw value, or the empty string when unset
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Non-empty value for a key
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Boolean value; unset, "", "0", "no", "false" and "none" are false.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            None => false,
            Some(value) => !matches!(
                value.to_ascii_lowercase().as_str(),
                "" | "0" | "no" | "false" | "none"
            ),
        }
    }

    /// Boolean value with a fallback when the key was never set
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        if self.contains(key) {
            self.get_bool(key)
        } else {
            default
        }
    }

    /// Integer value; unset or empty yields `None`
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get_non_empty(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| RuneError::invalid_parameter(key, format!("{:?} is not an integer", value))),
        }
    }

    /// List value; unset or empty yields an empty list
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get_non_empty(key) {
            None => Vec::new(),
            Some(value) => value.split(LIST_SEPARATOR).map(String::from).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys and values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}={:?}", key, value.replace(LIST_SEPARATOR, ","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites_in_place() {
        let mut env = Env::new();
        env.set("Root", "/var/lib/rune");
        env.set("Pidfile", "/var/run/rune.pid");
        env.set("Root", "/tmp/rune");
        env.set("Root", "/srv/rune");

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("Root"), Some("/srv/rune"));
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Root", "Pidfile"]);
    }

    #[test]
    fn test_bool_encoding() {
        let mut env = Env::new();
        env.set_bool("EnableCors", true);
        env.set_bool("AutoRestart", false);
        assert_eq!(env.get("EnableCors"), Some("1"));
        assert_eq!(env.get("AutoRestart"), Some(""));
        assert!(env.get_bool("EnableCors"));
        assert!(!env.get_bool("AutoRestart"));
        assert!(!env.get_bool("Missing"));

        env.set("Logging", "FALSE");
        assert!(!env.get_bool("Logging"));
        env.set("Logging", "yes");
        assert!(env.get_bool("Logging"));
    }

    #[test]
    fn test_bool_default_only_when_unset() {
        let mut env = Env::new();
        assert!(env.get_bool_or("EnableIptables", true));
        env.set_bool("EnableIptables", false);
        assert!(!env.get_bool_or("EnableIptables", true));
    }

    #[test]
    fn test_int_encoding() {
        let mut env = Env::new();
        env.set_int("Mtu", 1500);
        assert_eq!(env.get("Mtu"), Some("1500"));
        assert_eq!(env.get_int("Mtu").unwrap(), Some(1500));
        assert_eq!(env.get_int("Missing").unwrap(), None);

        env.set("Mtu", "lots");
        assert!(matches!(
            env.get_int("Mtu"),
            Err(RuneError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_list_encoding() {
        let mut env = Env::new();
        env.set_list("Dns", &["8.8.8.8", "8.8.4.4"]);
        assert_eq!(env.get_list("Dns"), vec!["8.8.8.8", "8.8.4.4"]);

        env.set_list::<String>("Dns", &[]);
        assert!(env.get_list("Dns").is_empty());
        assert!(env.get_list("Missing").is_empty());
    }

    #[test]
    fn test_display() {
        let mut env = Env::new();
        env.set("Root", "/r");
        env.set_list("Dns", &["1.1.1.1", "9.9.9.9"]);
        assert_eq!(env.to_string(), "Root=\"/r\" Dns=\"1.1.1.1,9.9.9.9\"");
    }
}
