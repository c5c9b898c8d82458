use serde::{Deserialize, Serialize};

/// An ordered path into the credential tree; the root group is the empty
/// path. Segments are group names with the final segment (for entries)
/// being the entry title.
pub type EntryPath = Vec<String>;

/// The mutation operations that can be proposed. This is the closed set of
/// things a proposal can carry — adding the wire encoding and the commit
/// dispatch for a new variant are the only two places that need to change
/// together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    AddEntry,
    AddGroup,
    DeleteEntry,
    DeleteGroup,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::AddEntry => "add_entry",
            MutationOp::AddGroup => "add_group",
            MutationOp::DeleteEntry => "delete_entry",
            MutationOp::DeleteGroup => "delete_group",
        }
    }
}

/// The argument payload for a [`MutationOp`]. `path` is always the *parent*
/// group the operation acts within; `title` names the group or entry being
/// added/removed inside it. `username`/`password` are only meaningful for
/// `AddEntry`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationData {
    pub path: EntryPath,
    pub title: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MutationData {
    pub fn for_group(parent: EntryPath, name: String) -> Self {
        Self {
            path: parent,
            title: Some(name),
            username: None,
            password: None,
        }
    }

    pub fn for_entry(parent: EntryPath, title: String, username: String, password: String) -> Self {
        Self {
            path: parent,
            title: Some(title),
            username: Some(username),
            password: Some(password),
        }
    }

    /// Human-readable description used to build the notification message a
    /// voter sees (§4.6.2 step 1). The original source's message for
    /// `ADD_ENTRY` read `titled {username}`, which the spec calls out as
    /// very likely a field mix-up — we use `title` here, the field a reader
    /// actually expects in a sentence like "... titled `foo`".
    pub fn describe(&self, op: &MutationOp) -> String {
        let name = self.title.as_deref().unwrap_or("");
        match op {
            MutationOp::AddEntry => format!(
                "add entry titled `{}` to {}",
                name,
                format_path(&self.path)
            ),
            MutationOp::AddGroup => format!("add group `{}` under {}", name, format_path(&self.path)),
            MutationOp::DeleteEntry => format!("delete entry `{}` from {}", name, format_path(&self.path)),
            MutationOp::DeleteGroup => format!("delete group `{}` from {}", name, format_path(&self.path)),
        }
    }
}

fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        format!("root/{}", path.join("/"))
    }
}
