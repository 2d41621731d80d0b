use std::collections::HashSet;
use std::str::FromStr;

use cloudup_core::DirectoryObject;

use super::paths::{join_remote, normalize_remote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    Overwrite,
    Rename,
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "overwrite" => Ok(ConflictStrategy::Overwrite),
            "rename" => Ok(ConflictStrategy::Rename),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub path: String,
    pub objects: Vec<DirectoryObject>,
    full_paths: HashSet<String>,
}

impl DirectoryListing {
    pub fn new(path: impl Into<String>, objects: Vec<DirectoryObject>) -> Self {
        let full_paths = objects
            .iter()
            .map(|object| join_remote(&object.path, &object.name))
            .collect();
        Self {
            path: normalize_remote(&path.into()),
            objects,
            full_paths,
        }
    }

    pub fn contains(&self, full_path: &str) -> bool {
        self.full_paths.contains(full_path)
    }
}

pub fn copy_name(name: &str, suffix: &str) -> String {
    if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
    {
        return format!("{stem}{suffix}.{ext}");
    }
    format!("{name}{suffix}")
}

pub fn renamed_relative_path(
    relative_path: &str,
    suffix: &str,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let (dir, name) = match relative_path.rsplit_once('/') {
        Some((dir, name)) => (format!("{dir}/"), name.to_string()),
        None => (String::new(), relative_path.to_string()),
    };
    let mut name = name;
    loop {
        name = copy_name(&name, suffix);
        let candidate = format!("{dir}{name}");
        if !is_taken(&candidate) {
            return candidate;
        }
    }
}
