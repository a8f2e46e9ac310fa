use std::fmt;
use std::path::PathBuf;

use anyhow::anyhow;

const DEFAULT_REGISTRY_HOST: &str = "registry.ollama.ai";
const DEFAULT_NAMESPACE: &str = "library";
const DEFAULT_TAG: &str = "latest";

/// A model identifier as the registry understands it: `[namespace/]name[:tag]`.
///
/// The orchestrator never negotiates versions; the literal tag is what gets pulled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    namespace: String,
    name: String,
    tag: String,
}

impl ModelRef {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("model identifier must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(anyhow!(
                "model identifier must not contain whitespace: '{trimmed}'"
            ));
        }

        let (path, tag) = match trimmed.rsplit_once(':') {
            Some((path, tag)) => (path, tag),
            None => (trimmed, DEFAULT_TAG),
        };
        if tag.is_empty() || tag.contains('/') {
            return Err(anyhow!("model identifier has an invalid tag: '{trimmed}'"));
        }

        let (namespace, name) = match path.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (DEFAULT_NAMESPACE, path),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(anyhow!(
                "model identifier has an invalid name: '{trimmed}'"
            ));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Manifest location relative to the models root, e.g.
    /// `manifests/registry.ollama.ai/library/deepseek-ocr/3b`.
    pub fn manifest_rel_path(&self) -> PathBuf {
        PathBuf::from("manifests")
            .join(DEFAULT_REGISTRY_HOST)
            .join(&self.namespace)
            .join(&self.name)
            .join(&self.tag)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == DEFAULT_NAMESPACE {
            write!(f, "{}:{}", self.name, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.namespace, self.name, self.tag)
        }
    }
}
