use std::fmt;
use thiserror::Error;

/// Separator between repository and content digest in a pinned image identifier.
pub const DIGEST_SEPARATOR: char = '@';

/// An image identifier as reported by the kubelet in `containerStatuses[].imageID`,
/// e.g. `quay.io/acme/api@sha256:4f2a...`.
#[derive(Debug, PartialEq, Eq)]
pub struct DigestReference {
    pub repository: String,
    pub algorithm: Option<String>,
    pub digest: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image is not pinned by digest")]
    MissingDigest,
    #[error("repository is missing")]
    MissingRepository,
    #[error("digest is empty")]
    EmptyDigest,
}

impl fmt::Display for DigestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.algorithm {
            Some(algorithm) => write!(f, "{}@{}:{}", self.repository, algorithm, self.digest),
            None => write!(f, "{}@{}", self.repository, self.digest),
        }
    }
}

impl DigestReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        // container runtimes may prefix the identifier, e.g. docker-pullable://
        let s = s.split_once("://").map_or(s, |(_, rest)| rest);

        let (repository, digest) = s
            .rsplit_once(DIGEST_SEPARATOR)
            .ok_or(ParseError::MissingDigest)?;

        if repository.is_empty() {
            return Err(ParseError::MissingRepository);
        }

        let (algorithm, digest) = match digest.split_once(':') {
            Some((algorithm, digest)) => (Some(algorithm.to_string()), digest),
            None => (None, digest),
        };
        if digest.is_empty() {
            return Err(ParseError::EmptyDigest);
        }

        Ok(Self {
            repository: repository.to_string(),
            algorithm,
            digest: digest.to_string(),
        })
    }
}

/// Recognises images belonging to the cluster platform itself, which are never tracked.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    patterns: Vec<String>,
}

impl ImageFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    pub fn is_internal(&self, image: &str) -> bool {
        self.patterns.iter().any(|p| image.contains(p.as_str()))
    }

    /// Returns the first identifier that marks the whole image set as internal.
    pub fn find_internal<'a, I>(&self, images: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        images
            .into_iter()
            .map(String::as_str)
            .find(|image| self.is_internal(image))
    }
}
