//! The compiled form of a template.
//!
//! A [`CompiledProgram`] is a flat instruction list. Block instructions carry
//! the indices of their partners (`next`, `end`) so the executor can jump
//! without searching. Expressions are stored as source text and evaluated at
//! render time.

use serde::{Deserialize, Serialize};

/// Whether an echo's value passes through the escape function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscapeMode {
    Escaped,
    Raw,
}

/// How a closing section merges with an existing section of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseMode {
    /// Earlier content keeps its place; its parent placeholders receive the
    /// new content.
    Extend,
    /// The new content replaces the earlier content.
    Overwrite,
}

/// `name = expr` and the compound forms used by `@for` steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    /// Expression producing the new value. Compound steps are rewritten
    /// (`i += 2` is stored as `i + (2)`).
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Template text, output verbatim.
    Literal(String),
    /// Text produced by a custom directive expansion, output verbatim.
    Raw(String),
    Echo {
        expression: String,
        escape: EscapeMode,
    },

    /// Start of a conditional chain. `next` is the following `ElseIf`/`Else`
    /// or the `EndIf`; `end` is the `EndIf`.
    If {
        condition: String,
        next: usize,
        end: usize,
    },
    ElseIf {
        condition: String,
        next: usize,
    },
    Else {
        end: usize,
    },
    EndIf,

    ForEach {
        source: String,
        key: Option<String>,
        value: String,
        end: usize,
    },
    EndForEach,
    For {
        init: Option<Assignment>,
        condition: Option<String>,
        step: Option<Assignment>,
        end: usize,
    },
    EndFor,
    While {
        condition: String,
        end: usize,
    },
    EndWhile,
    Set(Assignment),

    SectionOpen {
        name: String,
    },
    /// Opens a section that is yielded in place when it closes.
    SectionShow {
        name: String,
    },
    SectionClose(CloseMode),
    SectionAppend,
    /// `@section(name, content)`: defines a section without a body.
    SectionInject {
        name: String,
        content: String,
    },
    Yield {
        name: String,
        default: Option<String>,
    },
    ParentPlaceholder,

    Extends {
        name: String,
    },
    Include {
        name: String,
        data: Option<String>,
    },
    Each {
        view: String,
        items: String,
        iterator: String,
        empty: Option<String>,
    },
}

/// An executable template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgram {
    instructions: Vec<Instruction>,
}

impl CompiledProgram {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Accumulates instructions, merging adjacent literal text.
#[derive(Debug, Default)]
pub(crate) struct ProgramBuilder {
    instructions: Vec<Instruction>,
}

impl ProgramBuilder {
    /// Index the next pushed instruction will get.
    pub(crate) fn position(&self) -> usize {
        self.instructions.len()
    }

    pub(crate) fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub(crate) fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Instruction::Literal(last)) = self.instructions.last_mut() {
            last.push_str(text);
        } else {
            self.instructions.push(Instruction::Literal(text.to_string()));
        }
    }

    pub(crate) fn raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Instruction::Raw(last)) = self.instructions.last_mut() {
            last.push_str(text);
        } else {
            self.instructions.push(Instruction::Raw(text.to_string()));
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    pub(crate) fn finish(self) -> CompiledProgram {
        CompiledProgram::new(self.instructions)
    }
}
