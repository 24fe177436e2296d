// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Response paths

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a response path: a response name or a list index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Location of a value inside the response tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsePath(Vec<PathSegment>);

impl ResponsePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn with_field(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.to_string()));
        Self(segments)
    }

    pub fn with_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => write!(f, "/{}", name)?,
                PathSegment::Index(index) => write!(f, "/{}", index)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_serializes_as_mixed_array() {
        let path = ResponsePath::root()
            .with_field("users")
            .with_index(2)
            .with_field("name");

        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            serde_json::json!(["users", 2, "name"])
        );
        assert_eq!(path.to_string(), "/users/2/name");
    }
}
