use serde::Serialize;

/// What a task asks to install, before the artifact is fetched or built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum SetupSource {
    Release(String),
    Commitish(String),
}

impl SetupSource {
    /// Identification used by policies before the artifact exists.
    pub fn identification(&self) -> &str {
        match self {
            SetupSource::Release(name) => name,
            SetupSource::Commitish(commitish) => commitish,
        }
    }
}

/// Installable content: a `.tar.gz` archive plus where it came from.
#[derive(Debug, Clone)]
pub struct Setup {
    pub release: Option<String>,
    pub commit_hash: Option<String>,
    pub archive: Vec<u8>,
}

impl Setup {
    pub fn from_release(name: impl Into<String>, archive: Vec<u8>) -> Self {
        Self {
            release: Some(name.into()),
            commit_hash: None,
            archive,
        }
    }

    pub fn from_build(commit_hash: impl Into<String>, archive: Vec<u8>) -> Self {
        Self {
            release: None,
            commit_hash: Some(commit_hash.into()),
            archive,
        }
    }

    /// Release name when present, commit hash otherwise.
    pub fn identification(&self) -> &str {
        self.release
            .as_deref()
            .or(self.commit_hash.as_deref())
            .unwrap_or("unknown")
    }

    /// Identification reduced to characters safe in a folder name.
    pub fn folder_name(&self) -> String {
        self.identification()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}
