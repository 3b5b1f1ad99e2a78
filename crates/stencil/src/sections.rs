//! Section composition.
//!
//! [`Sections`] holds the state shared by every view in one render tree: the
//! stack of sections currently capturing output and the map of completed
//! sections. Each open frame remembers the render depth that opened it, so
//! output from a nested render is captured only by frames opened at that
//! depth, and a failing render can discard exactly the frames it opened.

use std::collections::HashMap;

use crate::error::SectionStackError;
use crate::program::CloseMode;

/// Stands in for an escaped placeholder while real placeholders are replaced.
const SENTINEL: &str = "\u{0}STENCIL_PARENT\u{0}";

#[derive(Debug)]
struct Frame {
    name: String,
    buffer: String,
    /// Yield the section in place when it closes.
    show: bool,
    depth: usize,
}

/// Section stack and completed sections for one render tree.
#[derive(Debug)]
pub struct Sections {
    placeholder: String,
    escaped: String,
    stack: Vec<Frame>,
    completed: HashMap<String, String>,
}

impl Default for Sections {
    fn default() -> Self {
        Self::new('@')
    }
}

impl Sections {
    /// Creates an empty engine whose placeholder uses `marker`.
    pub fn new(marker: char) -> Self {
        Self {
            placeholder: format!("{marker}parent"),
            escaped: format!("{marker}{marker}parent"),
            stack: Vec::new(),
            completed: HashMap::new(),
        }
    }

    /// The parent placeholder token.
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Starts capturing output into section `name`.
    pub fn open(&mut self, name: &str, depth: usize) -> Result<(), SectionStackError> {
        self.push(name, depth, false)
    }

    /// Like [`Sections::open`], but closing the section also yields it.
    pub fn show(&mut self, name: &str, depth: usize) -> Result<(), SectionStackError> {
        self.push(name, depth, true)
    }

    fn push(&mut self, name: &str, depth: usize, show: bool) -> Result<(), SectionStackError> {
        if self.stack.iter().any(|frame| frame.name == name) {
            return Err(SectionStackError::AlreadyOpen { name: name.to_string() });
        }
        log::trace!("section {:?} opened at depth {}", name, depth);
        self.stack.push(Frame {
            name: name.to_string(),
            buffer: String::new(),
            show,
            depth,
        });
        Ok(())
    }

    /// Closes the innermost section.
    ///
    /// Returns the section's yielded content if it was opened with
    /// [`Sections::show`].
    pub fn close(&mut self, mode: CloseMode) -> Result<Option<String>, SectionStackError> {
        let operation = match mode {
            CloseMode::Extend => "endsection",
            CloseMode::Overwrite => "overwrite",
        };
        let frame = self
            .stack
            .pop()
            .ok_or(SectionStackError::EmptyStack { operation })?;
        log::trace!("section {:?} closed ({:?})", frame.name, mode);

        match mode {
            CloseMode::Extend => self.extend(&frame.name, &frame.buffer),
            CloseMode::Overwrite => {
                self.completed.insert(frame.name.clone(), frame.buffer);
            }
        }

        Ok(frame.show.then(|| self.yield_content(&frame.name, "")))
    }

    /// Closes the innermost section, adding its content after any existing
    /// content of the same name.
    pub fn append(&mut self) -> Result<(), SectionStackError> {
        let frame = self
            .stack
            .pop()
            .ok_or(SectionStackError::EmptyStack { operation: "append" })?;
        log::trace!("section {:?} appended", frame.name);
        self.completed
            .entry(frame.name)
            .or_default()
            .push_str(&frame.buffer);
        Ok(())
    }

    /// Defines `name` with `content` directly, merging like an extending close.
    pub fn inject(&mut self, name: &str, content: &str) {
        self.extend(name, content);
    }

    /// Merges `content` into the section `name`.
    ///
    /// Content already stored for `name` was defined first (by a child view)
    /// and keeps its place; its placeholders are replaced by `content`.
    fn extend(&mut self, name: &str, content: &str) {
        let merged = match self.completed.get(name) {
            Some(existing) => {
                let protected = existing.replace(&self.escaped, SENTINEL);
                replace_placeholder(&protected, &self.placeholder, content).replace(SENTINEL, &self.escaped)
            }
            None => content.to_string(),
        };
        self.completed.insert(name.to_string(), merged);
    }

    /// Content of section `name`, or `default` when it is not defined.
    ///
    /// Placeholders left in the content have no parent to fill them and are
    /// removed; escaped placeholders become literal placeholder text.
    pub fn yield_content(&self, name: &str, default: &str) -> String {
        let content = self.completed.get(name).map(String::as_str).unwrap_or(default);
        let protected = content.replace(&self.escaped, SENTINEL);
        replace_placeholder(&protected, &self.placeholder, "").replace(SENTINEL, &self.placeholder)
    }

    /// Turns escaped placeholders in finished output into literal
    /// placeholder text.
    pub(crate) fn unescape(&self, text: &str) -> String {
        text.replace(&self.escaped, &self.placeholder)
    }

    /// Buffer of the innermost section if it was opened at `depth`.
    pub(crate) fn capture(&mut self, depth: usize) -> Option<&mut String> {
        self.stack
            .last_mut()
            .filter(|frame| frame.depth == depth)
            .map(|frame| &mut frame.buffer)
    }

    /// Discards open sections opened at `depth` or deeper, returning their
    /// names outermost first.
    pub(crate) fn discard_from(&mut self, depth: usize) -> Vec<String> {
        let keep = self
            .stack
            .iter()
            .position(|frame| frame.depth >= depth)
            .unwrap_or(self.stack.len());
        let discarded: Vec<String> = self.stack.drain(keep..).map(|frame| frame.name).collect();
        if !discarded.is_empty() {
            log::debug!("discarded open sections {:?}", discarded);
        }
        discarded
    }

    /// True if a section named `name` has completed.
    pub fn has(&self, name: &str) -> bool {
        self.completed.contains_key(name)
    }

    pub fn completed(&self) -> &HashMap<String, String> {
        &self.completed
    }

    /// True while any section is capturing.
    pub fn is_capturing(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Names of open sections, outermost first.
    pub fn open_names(&self) -> Vec<&str> {
        self.stack.iter().map(|frame| frame.name.as_str()).collect()
    }

    /// Clears both the stack and the completed sections.
    pub fn flush(&mut self) {
        log::debug!(
            "flushing {} completed and {} open sections",
            self.completed.len(),
            self.stack.len()
        );
        self.stack.clear();
        self.completed.clear();
    }
}

/// Replaces `placeholder` where it is not followed by an identifier character.
fn replace_placeholder(text: &str, placeholder: &str, with: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find(placeholder) {
        let end = at + placeholder.len();
        let continues = rest[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        out.push_str(&rest[..at]);
        out.push_str(if continues { placeholder } else { with });
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}
