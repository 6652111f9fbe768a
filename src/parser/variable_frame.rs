//! Compile-time model of frames and scopes
//!
//! The parser tracks which variable names are visible at each point so it can
//! distinguish variables from property names and function name parts. A frame
//! corresponds to a function boundary (names are never visible across it); a
//! scope corresponds to a lexical block inside a frame.

use std::collections::HashSet;

/// Stack of frames, each holding a stack of scopes of variable names.
#[derive(Debug)]
pub struct VariableStackFrame {
    frames: Vec<Frame>,
}

#[derive(Debug, Default)]
struct Frame {
    scopes: Vec<HashSet<String>>,
}

impl VariableStackFrame {
    /// Starts with the root frame and its root scope in place.
    pub fn new() -> Self {
        VariableStackFrame {
            frames: vec![Frame {
                scopes: vec![HashSet::new()],
            }],
        }
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("root frame always present")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("root frame always present")
    }

    /// Enter a function body.
    pub fn frame_begin(&mut self) {
        self.frames.push(Frame {
            scopes: vec![HashSet::new()],
        });
    }

    /// Leave a function body. Fails on unbalanced calls.
    pub fn frame_end(&mut self) -> Result<(), &'static str> {
        if self.frames.len() <= 1 {
            return Err("mismatched frame end");
        }
        self.frames.pop();
        Ok(())
    }

    /// Enter a lexical block.
    pub fn scope_begin(&mut self) {
        self.current_frame_mut().scopes.push(HashSet::new());
    }

    /// Leave a lexical block, dropping its variable names. Fails on
    /// unbalanced calls.
    pub fn scope_end(&mut self) -> Result<(), &'static str> {
        let frame = self.current_frame_mut();
        if frame.scopes.len() <= 1 {
            return Err("mismatched scope end");
        }
        frame.scopes.pop();
        Ok(())
    }

    /// True when no function body is open.
    pub fn is_root_frame(&self) -> bool {
        self.frames.len() == 1
    }

    /// True when the current frame has no nested block open.
    pub fn is_root_scope(&self) -> bool {
        self.current_frame().scopes.len() == 1
    }

    /// Record an assignment. Adding a name already present in the nearest
    /// scope that holds it is a no-op.
    pub fn assign(&mut self, name: &str) {
        if self.exists(name) {
            return;
        }
        self.current_frame_mut()
            .scopes
            .last_mut()
            .expect("root scope always present")
            .insert(name.to_string());
    }

    /// Whether a name is visible in the current frame.
    pub fn exists(&self, name: &str) -> bool {
        self.current_frame()
            .scopes
            .iter()
            .any(|scope| scope.contains(name))
    }

    /// Largest word count among the names visible in the current frame,
    /// bounding the parser's greedy multi-word match.
    pub fn max_parts(&self) -> usize {
        self.current_frame()
            .scopes
            .iter()
            .flat_map(|scope| scope.iter())
            .map(|name| name.split(' ').count())
            .max()
            .unwrap_or(0)
    }
}

impl Default for VariableStackFrame {
    fn default() -> Self {
        VariableStackFrame::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_visibility() {
        let mut vsf = VariableStackFrame::new();
        vsf.assign("outer");
        vsf.scope_begin();
        vsf.assign("inner");
        assert!(vsf.exists("outer"));
        assert!(vsf.exists("inner"));
        vsf.scope_end().unwrap();
        assert!(vsf.exists("outer"));
        assert!(!vsf.exists("inner"));
    }

    #[test]
    fn test_frame_hides_outer_names() {
        let mut vsf = VariableStackFrame::new();
        vsf.assign("script var");
        vsf.frame_begin();
        assert!(!vsf.exists("script var"));
        vsf.assign("param");
        assert!(vsf.exists("param"));
        vsf.frame_end().unwrap();
        assert!(vsf.exists("script var"));
        assert!(!vsf.exists("param"));
    }

    #[test]
    fn test_assign_is_idempotent() {
        let mut vsf = VariableStackFrame::new();
        vsf.assign("x");
        vsf.scope_begin();
        vsf.assign("x");
        vsf.scope_end().unwrap();
        assert!(vsf.exists("x"));
    }

    #[test]
    fn test_max_parts() {
        let mut vsf = VariableStackFrame::new();
        assert_eq!(vsf.max_parts(), 0);
        vsf.assign("x");
        assert_eq!(vsf.max_parts(), 1);
        vsf.scope_begin();
        vsf.assign("a much longer name");
        assert_eq!(vsf.max_parts(), 4);
        vsf.scope_end().unwrap();
        assert_eq!(vsf.max_parts(), 1);
    }

    #[test]
    fn test_unbalanced_end_fails() {
        let mut vsf = VariableStackFrame::new();
        assert!(vsf.scope_end().is_err());
        assert!(vsf.frame_end().is_err());
    }

    #[test]
    fn test_root_checks() {
        let mut vsf = VariableStackFrame::new();
        assert!(vsf.is_root_frame());
        assert!(vsf.is_root_scope());
        vsf.scope_begin();
        assert!(!vsf.is_root_scope());
        vsf.scope_end().unwrap();
        vsf.frame_begin();
        assert!(!vsf.is_root_frame());
        assert!(vsf.is_root_scope());
    }
}
