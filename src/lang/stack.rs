use thiserror::Error;

use super::types::Type;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("stack underflow")]
    Underflow,
    #[error("cannot unwind stack to offset {target}, current offset is {current}")]
    Unwind { target: i64, current: i64 },
}

/// Compile-time mirror of the emulated stack, in words.
///
/// Every push the generated code performs is recorded here with its type so
/// the compiler always knows where each value sits relative to `sp`.
#[derive(Debug, Clone, Default)]
pub struct StackManager {
    offset: i64,
    entries: Vec<usize>,
}

impl StackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> i64 {
        self.offset
    }

    /// Number of tracked entries.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, ty: &Type) {
        let words = ty.words();
        self.offset += words as i64;
        self.entries.push(words);
    }

    /// Drop the newest entry, returning its size in words.
    pub fn pop(&mut self) -> Result<usize, StackError> {
        let words = self.entries.pop().ok_or(StackError::Underflow)?;
        if self.offset < words as i64 {
            return Err(StackError::Underflow);
        }
        self.offset -= words as i64;
        Ok(words)
    }

    pub fn pop_items(&mut self, n: usize) -> Result<usize, StackError> {
        let mut total = 0;
        for _ in 0..n {
            total += self.pop()?;
        }
        Ok(total)
    }

    /// Pop entries until the offset is back at `target`. Returns the words freed.
    pub fn pop_until(&mut self, target: i64) -> Result<usize, StackError> {
        let mut total = 0;
        while self.offset > target {
            total += self.pop()?;
        }
        if self.offset != target {
            return Err(StackError::Unwind {
                target,
                current: self.offset,
            });
        }
        Ok(total)
    }
}
