use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag pulled when no other tag is configured.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `[registry[:port]/]repository[:tag][@digest]` image reference.
///
/// `repository` keeps the registry prefix, so `localhost:5000/app:1.2`
/// parses to repository `localhost:5000/app` and tag `1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (reference, None),
        };

        // A colon only separates a tag when it appears after the last '/',
        // otherwise it belongs to a registry port.
        let last_slash = name.rfind('/');
        let (repository, tag) = match name.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                (&name[..colon], Some(name[colon + 1..].to_string()))
            }
            _ => (name, None),
        };

        Self {
            repository: repository.to_string(),
            tag: tag.filter(|t| !t.is_empty()),
            digest,
        }
    }

    /// Same repository at `tag`, digest dropped.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// True when the listed image is a bare content ID rather than a name.
    pub fn is_image_id(&self) -> bool {
        self.repository == "sha256"
            || (self.repository.len() == 64
                && self.repository.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
