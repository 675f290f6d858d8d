use crate::sequence::node::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors raised while reading a sequence document
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("Could not read sequence {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML sequence: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON sequence: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sequence has {} problem(s): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),
}

/// Document formats accepted for sequences
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from the file extension, TOML unless it is `.json`
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

/// Parse the root iterator of a sequence document
pub fn parse_sequence(content: &str, format: DocumentFormat) -> Result<IteratorNode, SequenceError> {
    let root = match format {
        DocumentFormat::Toml => toml::from_str(content)?,
        DocumentFormat::Json => serde_json::from_str(content)?,
    };
    Ok(root)
}

/// Read and parse a sequence document from disk
pub fn load_sequence(path: &Path) -> Result<IteratorNode, SequenceError> {
    let content = fs::read_to_string(path).map_err(|source| SequenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let format = DocumentFormat::from_path(path);
    debug!("Parsing sequence {:?} as {:?}", path, format);
    parse_sequence(&content, format)
}

/// Structural checks that need no instrument registry
pub fn validate_structure(root: &IteratorNode) -> Result<(), SequenceError> {
    let mut problems = Vec::new();
    check_iterator(root, &root.name, &mut problems);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(SequenceError::Invalid(problems))
    }
}

fn check_iterator(node: &IteratorNode, path: &str, problems: &mut Vec<String>) {
    if node.name.trim().is_empty() {
        problems.push(format!("{}: iterator without a name", path));
    }
    for (index, child) in node.children.iter().enumerate() {
        let child_path = format!("{}/{}[{}]", path, child.kind(), index);
        check_node(child, &child_path, problems);
    }
}

fn check_node(node: &SequenceNode, path: &str, problems: &mut Vec<String>) {
    match node {
        SequenceNode::Iterator(iterator) => check_iterator(iterator, path, problems),
        SequenceNode::Branch(branch) => {
            if branch.components.len() != 2 {
                problems.push(format!(
                    "{}: branch '{}' has {} components, exactly 2 required",
                    path,
                    branch.name,
                    branch.components.len()
                ));
            }
            for (index, component) in branch.components.iter().enumerate() {
                check_iterator(component, &format!("{}/{}", path, index), problems);
            }
        }
        SequenceNode::Expose(expose) if expose.count == 0 => {
            problems.push(format!("{}: exposure count must be at least 1", path));
        }
        SequenceNode::Slew(slew) if !(-90.0..=90.0).contains(&slew.target.dec_deg) => {
            problems.push(format!(
                "{}: declination {} of '{}' is out of range",
                path, slew.target.dec_deg, slew.target.name
            ));
        }
        _ => {}
    }
}
