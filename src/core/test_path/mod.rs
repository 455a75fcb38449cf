//! Test paths: executed original-source lines per invocation.

mod builder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::invoked::InvocationRecord;
use crate::error::Result;

pub use builder::TestPathBuilder;

/// Original lines executed during one invocation, in execution order.
/// Lines repeated by loops are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPath {
    pub lines: Vec<usize>,
    /// The invocation had not returned when the session ended
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// An element left out of the results and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedElement {
    pub signature: String,
    pub reason: String,
}

/// Test paths of every element one test method exercised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPathCollection {
    pub test_method: String,
    /// Element signature -> one path per invocation, in call order
    pub paths: BTreeMap<String, Vec<TestPath>>,
    /// Element signature -> methods it called that were stepped into
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub invoked_by_tested: BTreeMap<String, Vec<String>>,
    /// Invocations behind the paths, in call order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<InvocationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ExcludedElement>,
    /// The debugger session did not run to completion
    pub truncated: bool,
    pub generated_at: DateTime<Utc>,
}

impl TestPathCollection {
    pub fn new(test_method: impl Into<String>) -> Self {
        Self {
            test_method: test_method.into(),
            paths: BTreeMap::new(),
            invoked_by_tested: BTreeMap::new(),
            invocations: Vec::new(),
            excluded: Vec::new(),
            truncated: false,
            generated_at: Utc::now(),
        }
    }

    /// Paths recorded for `signature`; empty when it never ran
    pub fn paths_of(&self, signature: &str) -> &[TestPath] {
        self.paths.get(signature).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exclude(&mut self, signature: impl Into<String>, reason: impl ToString) {
        let signature = signature.into();
        self.paths.remove(&signature);
        self.invoked_by_tested.remove(&signature);
        self.invocations.retain(|i| i.element.signature != signature);
        self.excluded.push(ExcludedElement {
            signature,
            reason: reason.to_string(),
        });
    }

    pub fn is_excluded(&self, signature: &str) -> bool {
        self.excluded.iter().any(|e| e.signature == signature)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
