//! package.xml parsing

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// A tag declared inside a manifest's `<export>` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    /// Element name (e.g. `metapackage`, `build_type`)
    pub tagname: String,
    /// Trimmed text content (empty for self-closing tags)
    pub content: String,
}

/// A buildable unit discovered in the source space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Unique package name
    pub name: String,
    /// Package source directory
    pub path: PathBuf,
    /// Path to the manifest file
    pub manifest_path: PathBuf,
    /// Tags from the `<export>` block
    pub exports: Vec<Export>,
}

impl Package {
    /// Load a package from its `package.xml`
    pub fn load(manifest_path: &Path) -> Result<Self, DiscoveryError> {
        let content =
            std::fs::read_to_string(manifest_path).map_err(|e| DiscoveryError::ManifestParse {
                path: manifest_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::parse(&content, manifest_path)
    }

    /// Parse manifest content read from `manifest_path`
    pub fn parse(content: &str, manifest_path: &Path) -> Result<Self, DiscoveryError> {
        let content = strip_comments(content);

        let name = extract_element(&content, "name").ok_or_else(|| DiscoveryError::ManifestParse {
            path: manifest_path.to_path_buf(),
            reason: "missing <name> element".to_string(),
        })?;

        let exports = extract_block(&content, "export")
            .map(|block| parse_exports(&block))
            .unwrap_or_default();

        Ok(Self {
            name,
            path: manifest_path
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            exports,
        })
    }

    /// Whether the package exports a tag with this name
    pub fn has_export(&self, tagname: &str) -> bool {
        self.exports.iter().any(|e| e.tagname == tagname)
    }

    /// Value of the `build_type` export, if declared
    pub fn build_type(&self) -> Option<&str> {
        self.exports
            .iter()
            .find(|e| e.tagname == "build_type")
            .map(|e| e.content.as_str())
    }

    /// Whether this is a metapackage (groups others, nothing to test)
    pub fn is_metapackage(&self) -> bool {
        self.has_export("metapackage")
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn strip_comments(content: &str) -> String {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    let re = COMMENT.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    re.replace_all(content, "").into_owned()
}

/// Extract a simple element value
fn extract_element(content: &str, element: &str) -> Option<String> {
    let start_tag = format!("<{}>", element);
    let end_tag = format!("</{}>", element);

    let start = content.find(&start_tag)?;
    let end = content[start..].find(&end_tag)?;
    let value = content[start + start_tag.len()..start + end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Extract the inner text of a block element
fn extract_block(content: &str, element: &str) -> Option<String> {
    let start_tag = format!("<{}", element);
    let end_tag = format!("</{}>", element);

    let start = content.find(&start_tag)?;
    let tag_end = content[start..].find('>')? + start + 1;
    if content[..tag_end].ends_with("/>") {
        return Some(String::new());
    }
    let end = content[tag_end..].find(&end_tag)?;
    Some(content[tag_end..tag_end + end].to_string())
}

/// Parse the direct children of an `<export>` block
fn parse_exports(block: &str) -> Vec<Export> {
    let mut exports = Vec::new();
    let mut pos = 0;

    while let Some(offset) = block[pos..].find('<') {
        let start = pos + offset;
        let Some(close) = block[start..].find('>') else {
            break;
        };
        let tag_end = start + close + 1;
        let inner = &block[start + 1..tag_end - 1];

        if inner.starts_with('/') || inner.starts_with('?') || inner.starts_with('!') {
            pos = tag_end;
            continue;
        }

        let self_closing = inner.ends_with('/');
        let tagname: String = inner
            .trim_end_matches('/')
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_string();

        if tagname.is_empty() {
            pos = tag_end;
            continue;
        }

        if self_closing {
            exports.push(Export {
                tagname,
                content: String::new(),
            });
            pos = tag_end;
            continue;
        }

        let end_tag = format!("</{}>", tagname);
        match block[tag_end..].find(&end_tag) {
            Some(end) => {
                exports.push(Export {
                    content: block[tag_end..tag_end + end].trim().to_string(),
                    tagname,
                });
                pos = tag_end + end + end_tag.len();
            }
            None => {
                exports.push(Export {
                    tagname,
                    content: String::new(),
                });
                pos = tag_end;
            }
        }
    }

    exports
}
