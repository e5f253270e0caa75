//! Script definitions as handed over by the script store.
//!
//! A [`ScriptEntry`] is a name, a working directory, and an ordered list of
//! shell command lines. The JSON shape (`name`, `workingDir`, `commands`)
//! matches the store's data file so entries deserialize straight from it.

use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// A named script: a working directory plus ordered shell commands.
///
/// Identity is the name: two entries with the same name are equal no matter
/// what they run, which is what the execution registry keys on.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(from = "ScriptEntryRecord")]
pub struct ScriptEntry {
    #[validate(length(min = 1, message = "Script name must not be empty"))]
    name: String,
    /// Not validated here: a missing directory is a runtime fault of the run.
    #[serde(rename = "workingDir")]
    working_dir: String,
    commands: Vec<String>,
}

/// Wire shape of a script entry before command lines are normalized.
#[derive(Deserialize)]
struct ScriptEntryRecord {
    name: String,
    #[serde(rename = "workingDir")]
    working_dir: String,
    #[serde(default)]
    commands: Vec<String>,
}

impl From<ScriptEntryRecord> for ScriptEntry {
    fn from(record: ScriptEntryRecord) -> Self {
        Self::new(record.name, record.working_dir, record.commands)
    }
}

impl ScriptEntry {
    /// Build an entry, trimming every command line and dropping blank ones.
    pub fn new<I, S>(name: impl Into<String>, working_dir: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let commands = commands
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            name: name.into().trim().to_string(),
            working_dir: working_dir.into().trim().to_string(),
            commands,
        }
    }

    /// Parse the multi-line command text a user typed, one command per line.
    pub fn from_command_text(
        name: impl Into<String>,
        working_dir: impl Into<String>,
        text: &str,
    ) -> Self {
        Self::new(name, working_dir, text.lines())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn working_dir(&self) -> &Path {
        Path::new(&self.working_dir)
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Check the entry can be registered: the name must not be empty.
    ///
    /// An entry with no commands is valid; running it completes immediately.
    /// The working directory is checked when the first command spawns.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate().map_err(CoreError::from)
    }
}

impl PartialEq for ScriptEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ScriptEntry {}

impl Hash for ScriptEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn blank_command_lines_are_dropped() {
        let entry = ScriptEntry::new("build", "/tmp", ["cargo build", "", "   ", " cargo test "]);
        assert_eq!(entry.commands(), ["cargo build", "cargo test"]);
    }

    #[test]
    fn command_text_is_split_per_line() {
        let entry = ScriptEntry::from_command_text("deploy", "/srv", "git pull\n\nmake\r\n  \n");
        assert_eq!(entry.commands(), ["git pull", "make"]);
    }

    #[test]
    fn deserializes_store_shape() {
        let json = r#"{"name":"build","workingDir":"/home/me/app","commands":["echo A","","echo B"]}"#;
        let entry: ScriptEntry = serde_json::from_str(json).expect("valid entry");
        assert_eq!(entry.name(), "build");
        assert_eq!(entry.working_dir(), Path::new("/home/me/app"));
        assert_eq!(entry.commands(), ["echo A", "echo B"]);
    }

    #[test]
    fn deserializes_entry_without_commands() {
        let json = r#"{"name":"noop","workingDir":"."}"#;
        let entry: ScriptEntry = serde_json::from_str(json).expect("valid entry");
        assert!(entry.commands().is_empty());
    }

    #[test]
    fn serializes_with_working_dir_key() {
        let entry = ScriptEntry::new("build", "/tmp", ["make"]);
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["name"], "build");
        assert_eq!(value["workingDir"], "/tmp");
        assert_eq!(value["commands"][0], "make");
        assert!(value.get("working_dir").is_none());
    }

    #[test]
    fn identity_is_by_name() {
        let a = ScriptEntry::new("build", "/a", ["make"]);
        let b = ScriptEntry::new("build", "/b", ["ninja"]);
        let c = ScriptEntry::new("test", "/a", ["make"]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_name_fails_check() {
        let entry = ScriptEntry::new("   ", "/tmp", ["ls"]);
        let err = entry.check().expect_err("blank name must be rejected");
        assert!(err.to_string().starts_with("Validation failed:"));
    }

    #[test]
    fn empty_working_dir_passes_check() {
        let entry = ScriptEntry::new("build", "", ["ls"]);
        assert!(entry.check().is_ok());
        assert_eq!(entry.working_dir(), Path::new(""));
    }

    #[test]
    fn entry_without_commands_passes_check() {
        let entry = ScriptEntry::new("noop", "/tmp", Vec::<String>::new());
        assert!(entry.check().is_ok());
    }
}
