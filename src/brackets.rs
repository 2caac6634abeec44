//! Per-line bracket bookkeeping for the translator.
//!
//! Both `(` and `[` open a bracket. The kind recorded on push decides what the matching closer
//! emits, so a degree-mode trigonometric call can insert the `Degree*(` conversion on open and
//! close it again on the matching bracket.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketKind {
    /// Grouping bracket
    Plain,
    /// Argument list of a function call
    Function,
    /// Argument list of a trigonometric call in degree mode
    DegreeWrap,
}

impl BracketKind {
    pub fn opener(self) -> &'static str {
        match self {
            BracketKind::Plain | BracketKind::Function => "(",
            BracketKind::DegreeWrap => "(Degree*(",
        }
    }

    pub fn closer(self) -> &'static str {
        match self {
            BracketKind::Plain | BracketKind::Function => ")",
            BracketKind::DegreeWrap => "))",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("closing bracket without a matching opener")]
pub struct StackUnderflow;

#[derive(Debug, Default)]
pub struct BracketStack {
    stack: Vec<BracketKind>,
}

impl BracketStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: BracketKind) {
        self.stack.push(kind);
    }

    pub fn pop(&mut self) -> Result<BracketKind, StackUnderflow> {
        self.stack.pop().ok_or(StackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = BracketStack::new();
        stack.push(BracketKind::Plain);
        stack.push(BracketKind::DegreeWrap);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop(), Ok(BracketKind::DegreeWrap));
        assert_eq!(stack.pop(), Ok(BracketKind::Plain));
        assert!(stack.is_balanced());
        assert_eq!(stack.pop(), Err(StackUnderflow));
    }

    #[test]
    fn test_emitted_syntax() {
        assert_eq!(BracketKind::Function.opener(), "(");
        assert_eq!(BracketKind::DegreeWrap.opener(), "(Degree*(");
        assert_eq!(BracketKind::DegreeWrap.closer(), "))");
    }
}
