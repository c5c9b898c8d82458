use serde::{Deserialize, Serialize};

/// A single credential. `path` is the group the entry lives in; the title
/// is the entry's own name within that group, not part of `path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub username: String,
    pub password: String,
}

/// A node in the credential tree. The root group always has an empty name
/// and is never addressed directly — callers address its children by path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub groups: Vec<Group>,
    pub entries: Vec<Entry>,
}

impl Group {
    pub fn root() -> Self {
        Self {
            name: String::new(),
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    /// Walks `path` from this node, returning `None` if any segment is
    /// missing.
    pub fn resolve(&self, path: &[String]) -> Option<&Group> {
        let mut node = self;
        for segment in path {
            node = node.child(segment)?;
        }
        Some(node)
    }

    pub fn resolve_mut(&mut self, path: &[String]) -> Option<&mut Group> {
        let mut node = self;
        for segment in path {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    /// Collects `(path, entry)` pairs for every entry in the tree,
    /// depth-first.
    pub fn all_entries(&self) -> Vec<(Vec<String>, &Entry)> {
        let mut out = Vec::new();
        self.collect_entries(&mut Vec::new(), &mut out);
        out
    }

    fn collect_entries<'a>(&'a self, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, &'a Entry)>) {
        for entry in &self.entries {
            out.push((path.clone(), entry));
        }
        for group in &self.groups {
            path.push(group.name.clone());
            group.collect_entries(path, out);
            path.pop();
        }
    }

    /// Collects the path of every group in the tree (including empty for
    /// root), depth-first.
    pub fn all_group_paths(&self) -> Vec<Vec<String>> {
        let mut out = vec![Vec::new()];
        self.collect_group_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_group_paths(&self, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        for group in &self.groups {
            path.push(group.name.clone());
            out.push(path.clone());
            group.collect_group_paths(path, out);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_finds_nested_group() {
        let mut root = Group::root();
        root.groups.push(Group {
            name: "work".into(),
            groups: vec![Group {
                name: "email".into(),
                groups: vec![],
                entries: vec![],
            }],
            entries: vec![],
        });

        let found = root.resolve(&["work".to_string(), "email".to_string()]);
        assert!(found.is_some());
        assert_eq!(found.unwrap().name, "email");
        assert!(root.resolve(&["missing".to_string()]).is_none());
    }

    #[test]
    fn all_entries_walks_whole_tree() {
        let mut root = Group::root();
        root.entries.push(Entry {
            title: "a".into(),
            username: "u".into(),
            password: "p".into(),
        });
        root.groups.push(Group {
            name: "work".into(),
            groups: vec![],
            entries: vec![Entry {
                title: "b".into(),
                username: "u2".into(),
                password: "p2".into(),
            }],
        });

        let entries = root.all_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|(path, e)| path.is_empty() && e.title == "a"));
        assert!(entries
            .iter()
            .any(|(path, e)| path == &vec!["work".to_string()] && e.title == "b"));
    }
}
