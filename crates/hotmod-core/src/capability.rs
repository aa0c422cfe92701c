//! Structural capabilities
//!
//! A capability is a named set of method signatures. An instance satisfies a
//! capability when it responds to every listed `(name, arity)` pair; there is
//! no type hierarchy involved.

use std::fmt;

/// A method name together with its parameter count
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub name: String,
    pub arity: usize,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Behavioural contract an instance may or may not satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    name: String,
    methods: Vec<MethodSignature>,
}

impl Capability {
    /// Create a capability with no required methods (satisfied by anything)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// The capability every instance satisfies
    pub fn any() -> Self {
        Self::new("Any")
    }

    /// Require a method with the given arity
    pub fn requires(mut self, method: impl Into<String>, arity: usize) -> Self {
        let signature = MethodSignature::new(method, arity);
        if !self.methods.contains(&signature) {
            self.methods.push(signature);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    /// Check the capability against a set of provided signatures
    pub fn is_satisfied_by<'a, I>(&self, provided: I) -> bool
    where
        I: IntoIterator<Item = &'a MethodSignature>,
    {
        let provided: Vec<&MethodSignature> = provided.into_iter().collect();
        self.methods.iter().all(|required| provided.contains(&required))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.methods.is_empty() {
            let methods: Vec<String> = self.methods.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", methods.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_satisfaction() {
        let calculator = Capability::new("Calculator")
            .requires("calculate", 2)
            .requires("describe", 0);

        let provided = vec![
            MethodSignature::new("calculate", 2),
            MethodSignature::new("describe", 0),
            MethodSignature::new("extra", 1),
        ];
        assert!(calculator.is_satisfied_by(&provided));

        let wrong_arity = vec![
            MethodSignature::new("calculate", 1),
            MethodSignature::new("describe", 0),
        ];
        assert!(!calculator.is_satisfied_by(&wrong_arity));
    }

    #[test]
    fn test_any_is_always_satisfied() {
        assert!(Capability::any().is_satisfied_by(&[]));
    }

    #[test]
    fn test_duplicate_requirements_collapse() {
        let cap = Capability::new("C").requires("run", 0).requires("run", 0);
        assert_eq!(cap.methods().len(), 1);
        assert_eq!(cap.to_string(), "C[run/0]");
    }
}
