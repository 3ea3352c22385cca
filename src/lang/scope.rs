use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("'{name}' is already bound in this scope")]
    AlreadyBound { name: String },
    #[error("'{name}' does not exist")]
    Missing { name: String },
    #[error("no open scope to close")]
    NoScope,
}

/// Lexically scoped name table.
///
/// Bindings live in one flat vector; each open scope remembers where it
/// started. Lookups walk from the newest binding backwards, so inner names
/// shadow outer ones and vanish when their scope closes.
#[derive(Debug, Clone)]
pub struct ScopeChain<T> {
    bindings: Vec<(String, T)>,
    marks: Vec<usize>,
}

impl<T> Default for ScopeChain<T> {
    fn default() -> Self {
        ScopeChain {
            bindings: Vec::new(),
            marks: Vec::new(),
        }
    }
}

impl<T> ScopeChain<T> {
    /// A chain holding only the global scope.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) {
        self.marks.push(self.bindings.len());
    }

    pub fn close(&mut self) -> Result<(), ScopeError> {
        let start = self.marks.pop().ok_or(ScopeError::NoScope)?;
        self.bindings.truncate(start);
        Ok(())
    }

    /// Nesting depth; `0` is the global scope.
    pub fn depth(&self) -> usize {
        self.marks.len()
    }

    pub fn bind(&mut self, name: &str, value: T) -> Result<(), ScopeError> {
        let start = self.marks.last().copied().unwrap_or(0);
        if self.bindings[start..].iter().any(|(n, _)| n == name) {
            return Err(ScopeError::AlreadyBound {
                name: name.to_string(),
            });
        }
        self.bindings.push((name.to_string(), value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn lookup(&self, name: &str) -> Result<&T, ScopeError> {
        self.get(name).ok_or_else(|| ScopeError::Missing {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_then_vanishes() {
        let mut scopes = ScopeChain::new();
        scopes.bind("a", 1).unwrap();
        scopes.open();
        scopes.bind("a", 2).unwrap();
        assert_eq!(scopes.lookup("a"), Ok(&2));
        scopes.close().unwrap();
        assert_eq!(scopes.lookup("a"), Ok(&1));
        assert_eq!(scopes.depth(), 0);
    }

    #[test]
    fn duplicate_in_same_scope_rejected() {
        let mut scopes = ScopeChain::new();
        scopes.open();
        scopes.bind("x", ()).unwrap();
        assert_eq!(
            scopes.bind("x", ()),
            Err(ScopeError::AlreadyBound { name: "x".into() })
        );
    }

    #[test]
    fn missing_names_and_unbalanced_close() {
        let mut scopes: ScopeChain<i32> = ScopeChain::new();
        assert!(scopes.get("nope").is_none());
        assert_eq!(
            scopes.lookup("nope"),
            Err(ScopeError::Missing { name: "nope".into() })
        );
        assert_eq!(scopes.close(), Err(ScopeError::NoScope));
    }

    #[test]
    fn outer_names_visible_from_nested_scopes() {
        let mut scopes = ScopeChain::new();
        scopes.bind("g", 'g').unwrap();
        scopes.open();
        scopes.open();
        assert_eq!(scopes.depth(), 2);
        assert_eq!(scopes.lookup("g"), Ok(&'g'));
    }
}
