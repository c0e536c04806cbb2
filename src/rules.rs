use std::path::{Path, PathBuf};

/// Target-repository declarations, usually loaded from a TOML rules file.
///
/// Path matching (which SVN paths land in which repository and branch) is
/// performed by the caller; the export core only consumes the per-repository
/// declarations below.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rules {
    #[serde(default = "Vec::new")]
    pub repositories: Vec<RepoRule>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoRule {
    pub name: String,
    /// Branch refs known up front. Short names are qualified under
    /// `refs/heads/`.
    #[serde(default = "Vec::new")]
    pub branches: Vec<String>,
    /// Path prepended to every file path written into this repository.
    pub prefix: Option<String>,
    /// Name of the repository that embeds this one as a submodule.
    #[serde(rename = "submodule-in-repo")]
    pub submodule_in_repo: Option<String>,
    #[serde(rename = "submodule-path")]
    pub submodule_path: Option<String>,
}

impl Rules {
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let raw = std::fs::read_to_string(path).map_err(|e| RulesError::Read {
            path: path.to_path_buf(),
            error: e,
        })?;
        toml::from_str(&raw).map_err(|e| RulesError::Parse {
            path: path.to_path_buf(),
            error: e,
        })
    }
}

#[derive(Debug)]
pub enum RulesError {
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },
}

impl std::error::Error for RulesError {}

impl std::fmt::Display for RulesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, error } => {
                write!(f, "failed to read rules file {path:?}: {error}")
            }
            Self::Parse { path, error } => {
                write!(f, "failed to parse rules file {path:?}: {error}")
            }
        }
    }
}

pub(crate) fn qualify_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.into()
    } else {
        format!("refs/heads/{name}")
    }
}
