// src/core/invoked/element.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ExecFlowError, Result};

/// Name the debugger reports for constructors
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Descriptor of a method or constructor as handed over by discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Fully qualified signature, e.g. `demo.Calc.add(int)` or `demo.Calc(int)`
    pub signature: String,

    /// Source file declaring the element
    pub source_path: PathBuf,

    /// Compiled class file of the declaring class
    pub binary_path: PathBuf,

    /// Whether the element is a constructor
    #[serde(default)]
    pub is_constructor: bool,

    /// Line of the declaration in the original source (1-based)
    pub declaration_line: usize,
}

/// Identifies the frames of an element in debugger reports.
///
/// Reports carry no parameter types, so overloads share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementKey {
    pub class_name: String,
    pub method_name: String,
}

impl ElementKey {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl std::fmt::Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}()", self.class_name, self.method_name)
    }
}

/// A method or constructor whose execution is traced
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvokedElement {
    pub signature: String,
    pub class_name: String,
    pub method_name: String,
    pub source_path: PathBuf,
    pub binary_path: PathBuf,
    pub is_constructor: bool,
    pub declaration_line: usize,
}

impl InvokedElement {
    /// Validate a descriptor and derive class and method names from its signature
    pub fn from_descriptor(descriptor: ElementDescriptor) -> Result<Self> {
        let invalid = |reason: &str| {
            ExecFlowError::Configuration(format!(
                "invalid invoked element '{}': {}",
                descriptor.signature, reason
            ))
        };

        let signature = descriptor.signature.trim();
        let open = signature
            .find('(')
            .filter(|_| signature.ends_with(')'))
            .ok_or_else(|| invalid("signature must end with a parameter list"))?;

        let qualified = &signature[..open];
        let split = match qualified.rsplit_once('.') {
            Some(split) => split,
            // Constructor of a class in the default package, e.g. `Calc(int)`
            None if descriptor.is_constructor => (qualified, qualified),
            None => return Err(invalid("signature must be fully qualified")),
        };
        let (prefix, name) = split;
        if name.is_empty() || prefix.is_empty() {
            return Err(invalid("empty class or method name"));
        }

        let (class_name, method_name) = if descriptor.is_constructor {
            let simple_prefix = simple_name(prefix);
            if simple_prefix == name {
                (prefix.to_string(), CONSTRUCTOR_NAME.to_string())
            } else {
                (qualified.to_string(), CONSTRUCTOR_NAME.to_string())
            }
        } else {
            (prefix.to_string(), name.to_string())
        };

        if descriptor.declaration_line == 0 {
            return Err(invalid("declaration line must be 1 or greater"));
        }
        if descriptor.source_path.extension().and_then(|e| e.to_str()) != Some("java") {
            return Err(invalid("source path must point to a .java file"));
        }
        if descriptor.binary_path.as_os_str().is_empty() {
            return Err(invalid("binary path is empty"));
        }

        Ok(Self {
            signature: signature.to_string(),
            class_name,
            method_name,
            source_path: descriptor.source_path,
            binary_path: descriptor.binary_path,
            is_constructor: descriptor.is_constructor,
            declaration_line: descriptor.declaration_line,
        })
    }

    pub fn key(&self) -> ElementKey {
        ElementKey::new(&self.class_name, &self.method_name)
    }

    /// Class without package, e.g. `Outer$Inner`
    pub fn simple_class_name(&self) -> &str {
        simple_name(&self.class_name)
    }

    /// Outermost class, the one the source file is named after
    pub fn top_level_class(&self) -> &str {
        self.class_name
            .split_once('$')
            .map(|(outer, _)| outer)
            .unwrap_or(&self.class_name)
    }

    /// Package of the declaring class, if any
    pub fn package(&self) -> Option<&str> {
        self.top_level_class().rsplit_once('.').map(|(package, _)| package)
    }

    /// Class file `javac -d output_dir` writes for the top-level class
    pub fn class_file_in(&self, output_dir: &Path) -> PathBuf {
        let mut path = output_dir.to_path_buf();
        if let Some(package) = self.package() {
            path.extend(package.split('.'));
        }
        path.push(format!("{}.class", simple_name(self.top_level_class())));
        path
    }
}

impl std::fmt::Display for InvokedElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.signature)
    }
}

fn simple_name(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map(|(_, simple)| simple)
        .unwrap_or(class_name)
}

/// One call of an invoked element made by a test method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub element: InvokedElement,
    /// Signature of the test method performing the call
    pub test_method: String,
    /// Line of the call in the test method's original source, when the
    /// test method itself made the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_site_line: Option<usize>,
    /// Step into other project classes called by the element
    pub collect_calls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(signature: &str, is_constructor: bool) -> ElementDescriptor {
        ElementDescriptor {
            signature: signature.to_string(),
            source_path: PathBuf::from("src/demo/Calc.java"),
            binary_path: PathBuf::from("target/classes/demo/Calc.class"),
            is_constructor,
            declaration_line: 7,
        }
    }

    #[test]
    fn test_method_signature() {
        let element = InvokedElement::from_descriptor(descriptor("demo.Calc.add(int, int)", false)).unwrap();
        assert_eq!(element.class_name, "demo.Calc");
        assert_eq!(element.method_name, "add");
        assert_eq!(element.key().to_string(), "demo.Calc.add()");
        assert_eq!(element.package(), Some("demo"));
    }

    #[test]
    fn test_constructor_signatures() {
        let short = InvokedElement::from_descriptor(descriptor("demo.Calc(int)", true)).unwrap();
        assert_eq!(short.class_name, "demo.Calc");
        assert_eq!(short.method_name, CONSTRUCTOR_NAME);

        let long = InvokedElement::from_descriptor(descriptor("demo.Calc.Calc()", true)).unwrap();
        assert_eq!(long.key(), short.key());
    }

    #[test]
    fn test_class_file_follows_package_layout() {
        let inner = InvokedElement::from_descriptor(descriptor("demo.util.Outer$Inner.run()", false)).unwrap();
        assert_eq!(
            inner.class_file_in(Path::new("out")),
            Path::new("out").join("demo").join("util").join("Outer.class")
        );

        let bare = InvokedElement::from_descriptor(descriptor("Calc(int)", true)).unwrap();
        assert_eq!(bare.class_file_in(Path::new("out")), Path::new("out").join("Calc.class"));
    }

    #[test]
    fn test_default_package_constructor() {
        let bare = InvokedElement::from_descriptor(descriptor("Calc(int)", true)).unwrap();
        assert_eq!(bare.class_name, "Calc");
        assert_eq!(bare.method_name, CONSTRUCTOR_NAME);
        assert_eq!(bare.package(), None);

        let long = InvokedElement::from_descriptor(descriptor("Calc.Calc(int)", true)).unwrap();
        assert_eq!(long.key(), bare.key());

        assert!(InvokedElement::from_descriptor(descriptor("run()", false)).is_err());
    }

    #[test]
    fn test_inner_class_names() {
        let element = InvokedElement::from_descriptor(descriptor("demo.Outer$Inner.run()", false)).unwrap();
        assert_eq!(element.simple_class_name(), "Outer$Inner");
        assert_eq!(element.top_level_class(), "demo.Outer");
    }

    #[test]
    fn test_invalid_descriptors_are_configuration_errors() {
        for signature in ["demo.Calc.add", "add()", "demo.Calc.()"] {
            let err = InvokedElement::from_descriptor(descriptor(signature, false)).unwrap_err();
            assert!(err.is_fatal(), "{signature} should be rejected");
        }

        let mut no_line = descriptor("demo.Calc.add()", false);
        no_line.declaration_line = 0;
        assert!(InvokedElement::from_descriptor(no_line).is_err());

        let mut not_java = descriptor("demo.Calc.add()", false);
        not_java.source_path = PathBuf::from("Calc.kt");
        assert!(InvokedElement::from_descriptor(not_java).is_err());
    }
}
