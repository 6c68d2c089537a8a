//! Static name → number address book.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
    tracing::{debug, warn},
};

/// A single address book entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(deserialize_with = "number_from_text_or_int")]
    pub number: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
        }
    }
}

/// Failure to read or parse the contacts resource.
#[derive(Debug, Error)]
pub enum DirectoryLoadError {
    #[error("failed to read contacts file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse contacts file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk formats: `[{"name": .., "number": ..}]` or `{"name": "number"}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContactsFile {
    List(Vec<Contact>),
    Map(BTreeMap<String, RawNumber>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Int(u64),
}

impl From<RawNumber> for String {
    fn from(raw: RawNumber) -> Self {
        match raw {
            RawNumber::Text(s) => s,
            RawNumber::Int(n) => n.to_string(),
        }
    }
}

fn number_from_text_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    RawNumber::deserialize(deserializer).map(String::from)
}

enum Slot {
    Unique(usize),
    Ambiguous,
}

/// Lookup key for a contact name: trimmed and lowercased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Immutable contact directory.
///
/// Names match case-insensitively after trimming. Two entries whose names
/// normalize to the same key with different numbers make that key ambiguous,
/// and ambiguous names never resolve.
#[derive(Default)]
pub struct ContactDirectory {
    contacts: Vec<Contact>,
    index: HashMap<String, Slot>,
}

impl ContactDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        let mut dir = Self::default();
        for contact in contacts {
            let key = normalize_name(&contact.name);
            if key.is_empty() {
                warn!(number = %contact.number, "skipping contact with empty name");
                continue;
            }

            let existing = dir.index.get(&key).map(|slot| match slot {
                Slot::Unique(i) => Some(*i),
                Slot::Ambiguous => None,
            });
            match existing {
                None => {
                    dir.index.insert(key, Slot::Unique(dir.contacts.len()));
                    dir.contacts.push(contact);
                },
                Some(Some(i)) => {
                    if dir.contacts[i].number != contact.number {
                        warn!(name = %contact.name, "ambiguous contact name, it will not resolve");
                        dir.index.insert(key, Slot::Ambiguous);
                        dir.contacts.push(contact);
                    }
                },
                Some(None) => dir.contacts.push(contact),
            }
        }
        dir
    }

    /// Parse a contacts document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: ContactsFile = serde_json::from_str(raw)?;
        Ok(match file {
            ContactsFile::List(list) => Self::from_contacts(list),
            ContactsFile::Map(map) => Self::from_contacts(
                map.into_iter()
                    .map(|(name, number)| Contact::new(name, number)),
            ),
        })
    }

    /// Read and parse the contacts file.
    pub fn try_load(path: &Path) -> Result<Self, DirectoryLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DirectoryLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = Self::from_json(&raw).map_err(|source| DirectoryLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), count = dir.len(), "loaded contacts");
        Ok(dir)
    }

    /// Like [`Self::try_load`], but a failure is logged and yields an empty
    /// directory.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "contact directory unavailable, continuing with no contacts");
                Self::empty()
            },
        }
    }

    /// Exact, case-insensitive, trimmed lookup.
    pub fn resolve(&self, name: &str) -> Option<&Contact> {
        match self.index.get(&normalize_name(name))? {
            Slot::Unique(i) => self.contacts.get(*i),
            Slot::Ambiguous => None,
        }
    }

    /// All entries in file order, ambiguous ones included.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn resolves_case_insensitive_and_trimmed() {
        let dir = ContactDirectory::from_contacts([Contact::new("Alice", "111")]);
        assert_eq!(dir.resolve("alice").map(|c| c.number.as_str()), Some("111"));
        assert_eq!(dir.resolve("  ALICE ").map(|c| c.number.as_str()), Some("111"));
        assert!(dir.resolve("Ali").is_none());
        assert!(dir.resolve("Alice Smith").is_none());
    }

    #[test]
    fn conflicting_names_are_ambiguous() {
        let dir = ContactDirectory::from_contacts([
            Contact::new("Bob", "111"),
            Contact::new("bob ", "222"),
            Contact::new("Carol", "333"),
            Contact::new("carol", "333"),
        ]);
        assert!(dir.resolve("Bob").is_none());
        // Same number twice is a plain duplicate, not an ambiguity.
        assert_eq!(dir.resolve("carol").map(|c| c.number.as_str()), Some("333"));
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn parses_list_format() {
        let dir = ContactDirectory::from_json(
            r#"[{"name": "Alice", "number": "111"}, {"name": "Zoe", "number": 15551234567}]"#,
        )
        .unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(
            dir.resolve("zoe").map(|c| c.number.as_str()),
            Some("15551234567")
        );
    }

    #[test]
    fn parses_map_format() {
        let dir = ContactDirectory::from_json(r#"{"Alice": "111", "Bob": "222"}"#).unwrap();
        assert_eq!(dir.resolve("bob").map(|c| c.number.as_str()), Some("222"));
    }

    #[test]
    fn skips_blank_names() {
        let dir = ContactDirectory::from_contacts([Contact::new("  ", "111")]);
        assert!(dir.is_empty());
    }

    #[test]
    fn malformed_file_loads_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(
            ContactDirectory::try_load(file.path()),
            Err(DirectoryLoadError::Parse { .. })
        ));
        assert!(ContactDirectory::load(file.path()).is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        assert!(matches!(
            ContactDirectory::try_load(&path),
            Err(DirectoryLoadError::Read { .. })
        ));
        assert!(ContactDirectory::load(&path).is_empty());
    }
}
