//! Revision descriptors: the identity of one side of a comparison.

use crate::error::ConfigError;

/// Which side of the comparison a revision is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionTag {
    Old,
    New,
}

impl VersionTag {
    /// Tag as used in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionTag::Old => "old",
            VersionTag::New => "new",
        }
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pin for a nested sub-component (e.g. a vendored crypto library).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubComponentPin {
    /// Revision the sub-component is re-pointed to.
    pub revision: String,

    /// Repository to fetch the revision from, if not already reachable.
    pub repository: Option<String>,
}

/// One side of the comparison.
///
/// Everything except `resolved_commit` is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionDescriptor {
    tag: VersionTag,
    label: String,
    repository: Option<String>,
    sub_component: Option<SubComponentPin>,
    resolved_commit: Option<String>,
}

impl RevisionDescriptor {
    /// Create a descriptor for `label`, checked out from the local repository.
    pub fn new(tag: VersionTag, label: impl Into<String>) -> Result<Self, ConfigError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(ConfigError::EmptyRevision(tag.as_str()));
        }
        Ok(Self {
            tag,
            label,
            repository: None,
            sub_component: None,
            resolved_commit: None,
        })
    }

    /// Fetch the revision from `repository` instead of the local one.
    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = repository.filter(|r| !r.is_empty());
        self
    }

    /// Pin the nested sub-component. A repository without a revision is ignored.
    pub fn with_sub_component(mut self, revision: Option<String>, repository: Option<String>) -> Self {
        self.sub_component = revision
            .filter(|r| !r.is_empty())
            .map(|revision| SubComponentPin {
                revision,
                repository: repository.filter(|r| !r.is_empty()),
            });
        self
    }

    pub fn tag(&self) -> VersionTag {
        self.tag
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn sub_component(&self) -> Option<&SubComponentPin> {
        self.sub_component.as_ref()
    }

    pub fn resolved_commit(&self) -> Option<&str> {
        self.resolved_commit.as_deref()
    }

    /// Record the commit the label resolved to.
    pub fn set_resolved_commit(&mut self, commit: impl Into<String>) {
        self.resolved_commit = Some(commit.into());
    }

    /// Label made safe for use inside a file name.
    pub fn file_label(&self) -> String {
        self.label.replace(['/', '\\'], "_")
    }

    /// `label`, or `label (commit)` when the label is not the commit itself.
    pub fn pretty(&self) -> String {
        match self.resolved_commit.as_deref() {
            Some(commit) if commit != self.label => format!("{} ({})", self.label, commit),
            _ => self.label.clone(),
        }
    }
}
