/// Process-wide export options, shared by every target repository.
#[derive(Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(rename = "dry-run", default = "false_")]
    pub dry_run: bool,
    #[serde(rename = "add-metadata", default = "false_")]
    pub add_metadata: bool,
    #[serde(rename = "add-metadata-notes", default = "false_")]
    pub add_metadata_notes: bool,
    #[serde(rename = "commit-interval", default = "default_commit_interval")]
    pub commit_interval: u64,
    #[serde(default = "false_")]
    pub incremental: bool,
    #[serde(rename = "debug-rules", default = "false_")]
    pub debug_rules: bool,
    #[serde(rename = "git-executable", default = "default_git_executable")]
    pub git_executable: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dry_run: false,
            add_metadata: false,
            add_metadata_notes: false,
            commit_interval: default_commit_interval(),
            incremental: false,
            debug_rules: false,
            git_executable: default_git_executable(),
        }
    }
}

#[inline(always)]
fn false_() -> bool {
    false
}

fn default_commit_interval() -> u64 {
    // flush everything to disk every 10000 commits
    10000
}

fn default_git_executable() -> String {
    "git".into()
}
