//! Template compiler.
//!
//! Source is tokenized by [`stencil_lexer::Tokenizer`] and each token is turned
//! into instructions. Control blocks are matched with a stack and their jump
//! targets patched once the closing directive is seen. Custom directives are
//! expanded in place: the handler's text is compiled with the same state, so
//! an expansion may open a block that a later directive closes.

use stencil_lexer::{is_identifier, split_arguments, strip_parens, EchoKind, TagConfig, Token, Tokenizer};

use crate::directive::{Builtin, DirectiveRegistry};
use crate::error::CompileError;
use crate::program::{Assignment, CloseMode, CompiledProgram, EscapeMode, Instruction, ProgramBuilder};

/// Default nesting limit for custom directive expansions.
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 8;

/// Compiles template source into [`CompiledProgram`]s.
///
/// # Example
///
/// ```rust
/// use stencil::{Compiler, DirectiveRegistry, Instruction};
/// use stencil_lexer::TagConfig;
///
/// let tags = TagConfig::default();
/// let directives = DirectiveRegistry::new();
/// let program = Compiler::new(&tags, &directives).compile("Hi {{ name }}").unwrap();
/// assert_eq!(program.instructions()[0], Instruction::Literal("Hi ".into()));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'a> {
    tags: &'a TagConfig,
    directives: &'a DirectiveRegistry,
    max_expansion_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Unless,
    ForEach,
    For,
    While,
}

impl BlockKind {
    fn opener(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::ForEach => "foreach",
            BlockKind::For => "for",
            BlockKind::While => "while",
        }
    }

    fn closer(self) -> &'static str {
        match self {
            BlockKind::If => "endif",
            BlockKind::Unless => "endunless",
            BlockKind::ForEach => "endforeach",
            BlockKind::For => "endfor",
            BlockKind::While => "endwhile",
        }
    }
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    /// Index of the opening instruction.
    start: usize,
    /// Most recent branch of a conditional, whose jump target is pending.
    branch: usize,
    has_else: bool,
    offset: usize,
}

#[derive(Debug, Default)]
struct State {
    builder: ProgramBuilder,
    blocks: Vec<Block>,
    /// Indices of `SectionOpen` instructions not yet closed in this template.
    sections: Vec<usize>,
}

impl<'a> Compiler<'a> {
    pub fn new(tags: &'a TagConfig, directives: &'a DirectiveRegistry) -> Self {
        Self {
            tags,
            directives,
            max_expansion_depth: DEFAULT_MAX_EXPANSION_DEPTH,
        }
    }

    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    /// Compiles `source` into a program.
    pub fn compile(&self, source: &str) -> Result<CompiledProgram, CompileError> {
        let mut state = State::default();
        self.compile_into(source, 0, &mut state)?;

        if let Some(block) = state.blocks.last() {
            return Err(CompileError::UnclosedBlock {
                directive: block.kind.opener().to_string(),
                offset: block.offset,
            });
        }

        let program = state.builder.finish();
        log::debug!(
            "compiled {} bytes into {} instructions",
            source.len(),
            program.len()
        );
        Ok(program)
    }

    fn compile_into(&self, source: &str, depth: usize, state: &mut State) -> Result<(), CompileError> {
        let tokens = Tokenizer::new(self.tags).tokenize(source, |name| self.directives.contains(name))?;
        let marker = self.tags.statement_marker;

        for spanned in tokens {
            let offset = spanned.offset;
            match spanned.token {
                Token::Text(text) if depth == 0 => state.builder.literal(text),
                Token::Text(text) => state.builder.raw(text),
                Token::Echo { expression, kind } => {
                    if expression.is_empty() {
                        return Err(CompileError::EmptyEcho { offset });
                    }
                    let escape = match kind {
                        EchoKind::Raw => EscapeMode::Raw,
                        EchoKind::Escaped | EchoKind::Content => EscapeMode::Escaped,
                    };
                    state.builder.push(Instruction::Echo {
                        expression: expression.to_string(),
                        escape,
                    });
                }
                Token::EscapedStatement(name) => {
                    // Kept doubled so section merging can tell it from a placeholder.
                    let text = if name == "parent" {
                        format!("{marker}{marker}{name}")
                    } else {
                        format!("{marker}{name}")
                    };
                    state.builder.literal(&text);
                }
                Token::Statement { name, args } => match Builtin::from_name(name) {
                    Some(builtin) => self.builtin(builtin, args, offset, state)?,
                    None => self.expand(name, args, offset, depth, state)?,
                },
            }
        }
        Ok(())
    }

    fn expand(
        &self,
        name: &str,
        args: Option<&str>,
        offset: usize,
        depth: usize,
        state: &mut State,
    ) -> Result<(), CompileError> {
        let Some(handler) = self.directives.get(name) else {
            // The tokenizer only reports registered names.
            state.builder.literal(&format!("{}{}{}", self.tags.statement_marker, name, args.unwrap_or("")));
            return Ok(());
        };
        if depth >= self.max_expansion_depth {
            return Err(CompileError::ExpansionTooDeep {
                directive: name.to_string(),
                offset,
                limit: self.max_expansion_depth,
            });
        }

        let expanded = handler(args.unwrap_or(""));
        log::trace!("@{} expanded to {:?}", name, expanded);
        self.compile_into(&expanded, depth + 1, state)
            .map_err(|source| CompileError::Expansion {
                directive: name.to_string(),
                offset,
                source: Box::new(source),
            })
    }

    fn builtin(
        &self,
        builtin: Builtin,
        args: Option<&str>,
        offset: usize,
        state: &mut State,
    ) -> Result<(), CompileError> {
        let name = builtin.name();
        let inner = args.map(strip_parens).unwrap_or("");
        let required = || require_expression(inner, name, offset);

        match builtin {
            Builtin::If | Builtin::Unless => {
                let condition = required()?;
                let (kind, condition) = if builtin == Builtin::If {
                    (BlockKind::If, condition.to_string())
                } else {
                    (BlockKind::Unless, format!("not ({})", condition))
                };
                let start = state.builder.push(Instruction::If { condition, next: 0, end: 0 });
                state.blocks.push(Block {
                    kind,
                    start,
                    branch: start,
                    has_else: false,
                    offset,
                });
            }
            Builtin::ElseIf => {
                let condition = required()?.to_string();
                let index = state.builder.position();
                let block = conditional_block(state, name, offset)?;
                if block.has_else {
                    return Err(CompileError::malformed(name, offset, "@elseif after @else"));
                }
                let pending = block.branch;
                block.branch = index;
                patch_next(&mut state.builder, pending, index);
                state.builder.push(Instruction::ElseIf { condition, next: 0 });
            }
            Builtin::Else => {
                let index = state.builder.position();
                let block = conditional_block(state, name, offset)?;
                if block.has_else {
                    return Err(CompileError::malformed(name, offset, "duplicate @else"));
                }
                let pending = block.branch;
                block.branch = index;
                block.has_else = true;
                patch_next(&mut state.builder, pending, index);
                state.builder.push(Instruction::Else { end: 0 });
            }
            Builtin::EndIf | Builtin::EndUnless => {
                let kind = if builtin == Builtin::EndIf {
                    BlockKind::If
                } else {
                    BlockKind::Unless
                };
                let block = close_block(state, kind, name, offset)?;
                let end = state.builder.position();
                patch_next(&mut state.builder, block.branch, end);
                if let Some(Instruction::If { end: target, .. }) = state.builder.get_mut(block.start) {
                    *target = end;
                }
                state.builder.push(Instruction::EndIf);
            }
            Builtin::ForEach => {
                let (source, key, value) = parse_foreach(required()?, offset)?;
                let start = state.builder.push(Instruction::ForEach { source, key, value, end: 0 });
                open_block(state, BlockKind::ForEach, start, offset);
            }
            Builtin::For => {
                let (init, condition, step) = parse_for(required()?, offset)?;
                let start = state.builder.push(Instruction::For { init, condition, step, end: 0 });
                open_block(state, BlockKind::For, start, offset);
            }
            Builtin::While => {
                let condition = required()?.to_string();
                let start = state.builder.push(Instruction::While { condition, end: 0 });
                open_block(state, BlockKind::While, start, offset);
            }
            Builtin::EndForEach | Builtin::EndFor | Builtin::EndWhile => {
                let (kind, closing) = match builtin {
                    Builtin::EndForEach => (BlockKind::ForEach, Instruction::EndForEach),
                    Builtin::EndFor => (BlockKind::For, Instruction::EndFor),
                    _ => (BlockKind::While, Instruction::EndWhile),
                };
                let block = close_block(state, kind, name, offset)?;
                let end = state.builder.position();
                match state.builder.get_mut(block.start) {
                    Some(Instruction::ForEach { end: target, .. })
                    | Some(Instruction::For { end: target, .. })
                    | Some(Instruction::While { end: target, .. }) => *target = end,
                    _ => {}
                }
                state.builder.push(closing);
            }
            Builtin::Set => {
                let assignment = parse_assignment(required()?)
                    .ok_or_else(|| CompileError::malformed(name, offset, "expected `name = expression`"))?;
                state.builder.push(Instruction::Set(assignment));
            }

            Builtin::Section => {
                let arguments = split_arguments(required()?);
                match arguments.as_slice() {
                    [section] => {
                        let index = state.builder.push(Instruction::SectionOpen {
                            name: section.to_string(),
                        });
                        state.sections.push(index);
                    }
                    [section, content] => {
                        state.builder.push(Instruction::SectionInject {
                            name: section.to_string(),
                            content: content.to_string(),
                        });
                    }
                    _ => {
                        return Err(CompileError::malformed(name, offset, "expected a name and optional content"))
                    }
                }
            }
            Builtin::EndSection | Builtin::Stop => {
                state.sections.pop();
                state.builder.push(Instruction::SectionClose(CloseMode::Extend));
            }
            Builtin::Overwrite => {
                state.sections.pop();
                state.builder.push(Instruction::SectionClose(CloseMode::Overwrite));
            }
            Builtin::Append => {
                state.sections.pop();
                state.builder.push(Instruction::SectionAppend);
            }
            Builtin::Show => {
                let index = state
                    .sections
                    .pop()
                    .ok_or(CompileError::ShowWithoutSection { offset })?;
                if let Some(instruction) = state.builder.get_mut(index) {
                    if let Instruction::SectionOpen { name } = instruction {
                        let name = std::mem::take(name);
                        *instruction = Instruction::SectionShow { name };
                    }
                }
                state.builder.push(Instruction::SectionClose(CloseMode::Extend));
            }
            Builtin::Yield => {
                let arguments = split_arguments(required()?);
                let (section, default) = match arguments.as_slice() {
                    [section] => (section.to_string(), None),
                    [section, default] => (section.to_string(), Some(default.to_string())),
                    _ => {
                        return Err(CompileError::malformed(name, offset, "expected a name and optional default"))
                    }
                };
                state.builder.push(Instruction::Yield { name: section, default });
            }
            Builtin::Parent => {
                state.builder.push(Instruction::ParentPlaceholder);
            }

            Builtin::Extends => {
                let arguments = split_arguments(required()?);
                let [view] = arguments.as_slice() else {
                    return Err(CompileError::malformed(name, offset, "expected a single view name"));
                };
                state.builder.push(Instruction::Extends { name: view.to_string() });
            }
            Builtin::Include => {
                let arguments = split_arguments(required()?);
                let (view, data) = match arguments.as_slice() {
                    [view] => (view.to_string(), None),
                    [view, data] => (view.to_string(), Some(data.to_string())),
                    _ => return Err(CompileError::malformed(name, offset, "expected a view name and optional data")),
                };
                state.builder.push(Instruction::Include { name: view, data });
            }
            Builtin::Each => {
                let arguments = split_arguments(required()?);
                let (view, items, iterator, empty) = match arguments.as_slice() {
                    [view, items, iterator] => (view, items, iterator, None),
                    [view, items, iterator, empty] => (view, items, iterator, Some(empty.to_string())),
                    _ => {
                        return Err(CompileError::malformed(
                            name,
                            offset,
                            "expected view, items, iterator and optional empty view",
                        ))
                    }
                };
                state.builder.push(Instruction::Each {
                    view: view.to_string(),
                    items: items.to_string(),
                    iterator: iterator.to_string(),
                    empty,
                });
            }
        }
        Ok(())
    }
}

fn require_expression<'s>(inner: &'s str, directive: &str, offset: usize) -> Result<&'s str, CompileError> {
    if inner.is_empty() {
        Err(CompileError::malformed(directive, offset, "expected an expression"))
    } else {
        Ok(inner)
    }
}

fn open_block(state: &mut State, kind: BlockKind, start: usize, offset: usize) {
    state.blocks.push(Block {
        kind,
        start,
        branch: start,
        has_else: false,
        offset,
    });
}

fn close_block(state: &mut State, kind: BlockKind, found: &str, offset: usize) -> Result<Block, CompileError> {
    let expected = match state.blocks.last() {
        Some(block) if block.kind == kind => None,
        Some(block) => Some(format!("@{}", block.kind.closer())),
        None => Some("no closing directive".to_string()),
    };
    match (expected, state.blocks.pop()) {
        (None, Some(block)) => Ok(block),
        (expected, _) => Err(CompileError::UnexpectedClose {
            found: found.to_string(),
            expected: expected.unwrap_or_default(),
            offset,
        }),
    }
}

fn conditional_block<'s>(state: &'s mut State, found: &str, offset: usize) -> Result<&'s mut Block, CompileError> {
    match state.blocks.last_mut() {
        Some(block) if matches!(block.kind, BlockKind::If | BlockKind::Unless) => Ok(block),
        _ => Err(CompileError::malformed(found, offset, "not inside @if or @unless")),
    }
}

/// Points the pending branch of a conditional at `target`.
fn patch_next(builder: &mut ProgramBuilder, branch: usize, target: usize) {
    match builder.get_mut(branch) {
        Some(Instruction::If { next, .. }) | Some(Instruction::ElseIf { next, .. }) => *next = target,
        Some(Instruction::Else { end }) => *end = target,
        _ => {}
    }
}

/// Parses `source as value` or `source as key => value`.
fn parse_foreach(header: &str, offset: usize) -> Result<(String, Option<String>, String), CompileError> {
    let malformed = |message: &str| CompileError::malformed("foreach", offset, message);

    let (source, bindings) = header
        .rsplit_once(" as ")
        .ok_or_else(|| malformed("expected `items as item`"))?;
    let source = source.trim();
    if source.is_empty() {
        return Err(malformed("missing items expression"));
    }

    let (key, value) = match bindings.split_once("=>") {
        Some((key, value)) => (Some(key.trim()), value.trim()),
        None => (None, bindings.trim()),
    };
    if !is_identifier(value) || key.is_some_and(|key| !is_identifier(key)) {
        return Err(malformed("loop variables must be identifiers"));
    }
    Ok((source.to_string(), key.map(str::to_string), value.to_string()))
}

type ForHeader = (Option<Assignment>, Option<String>, Option<Assignment>);

/// Parses `init; condition; step`, each part optional.
fn parse_for(header: &str, offset: usize) -> Result<ForHeader, CompileError> {
    let parts: Vec<&str> = header.split(';').map(str::trim).collect();
    let [init, condition, step] = parts.as_slice() else {
        return Err(CompileError::malformed("for", offset, "expected `init; condition; step`"));
    };

    let assignment = |text: &str, what: &str| -> Result<Option<Assignment>, CompileError> {
        if text.is_empty() {
            return Ok(None);
        }
        parse_assignment(text)
            .map(Some)
            .ok_or_else(|| CompileError::malformed("for", offset, format!("invalid {} `{}`", what, text)))
    };

    let init = assignment(init, "initializer")?;
    let step = assignment(step, "step")?;
    let condition = (!condition.is_empty()).then(|| condition.to_string());
    Ok((init, condition, step))
}

/// Parses `name = expr`, `name += expr`, `name -= expr`, `name++` or `name--`.
fn parse_assignment(text: &str) -> Option<Assignment> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let target = &text[..split];
    if !is_identifier(target) {
        return None;
    }
    let rest = text[split..].trim_start();

    let value = if rest == "++" {
        format!("{} + 1", target)
    } else if rest == "--" {
        format!("{} - 1", target)
    } else if let Some(expr) = rest.strip_prefix("+=") {
        format!("{} + ({})", target, non_empty(expr)?)
    } else if let Some(expr) = rest.strip_prefix("-=") {
        format!("{} - ({})", target, non_empty(expr)?)
    } else if let Some(expr) = rest.strip_prefix('=').filter(|expr| !expr.starts_with('=')) {
        non_empty(expr)?.to_string()
    } else {
        return None;
    };

    Some(Assignment {
        target: target.to_string(),
        value,
    })
}

fn non_empty(expr: &str) -> Option<&str> {
    let expr = expr.trim();
    (!expr.is_empty()).then_some(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_with(source: &str, directives: &DirectiveRegistry) -> Result<CompiledProgram, CompileError> {
        let tags = TagConfig::default();
        Compiler::new(&tags, directives).compile(source)
    }

    fn compile(source: &str) -> Vec<Instruction> {
        compile_with(source, &DirectiveRegistry::new())
            .unwrap()
            .instructions()
            .to_vec()
    }

    fn compile_err(source: &str) -> CompileError {
        compile_with(source, &DirectiveRegistry::new()).unwrap_err()
    }

    mod output {
        use super::*;

        #[test]
        fn text_and_echoes() {
            assert_eq!(
                compile("a {{ x }} {!! y !!}{{{ z }}}"),
                vec![
                    Instruction::Literal("a ".into()),
                    Instruction::Echo { expression: "x".into(), escape: EscapeMode::Escaped },
                    Instruction::Literal(" ".into()),
                    Instruction::Echo { expression: "y".into(), escape: EscapeMode::Raw },
                    Instruction::Echo { expression: "z".into(), escape: EscapeMode::Escaped },
                ]
            );
        }

        #[test]
        fn comments_vanish() {
            assert_eq!(compile("a{{-- @if(x) --}}b"), vec![Instruction::Literal("ab".into())]);
        }

        #[test]
        fn escaped_statement_is_literal() {
            assert_eq!(compile("@@if(x)"), vec![Instruction::Literal("@if(x)".into())]);
        }

        #[test]
        fn escaped_parent_stays_doubled() {
            assert_eq!(compile("@@parent"), vec![Instruction::Literal("@@parent".into())]);
        }

        #[test]
        fn unknown_directive_is_literal() {
            assert_eq!(
                compile("@media (x) { }"),
                vec![Instruction::Literal("@media (x) { }".into())]
            );
        }

        #[test]
        fn empty_echo_is_error() {
            assert_eq!(compile_err("x {{ }}"), CompileError::EmptyEcho { offset: 2 });
        }

        #[test]
        fn lexer_errors_surface() {
            assert!(matches!(compile_err("{{ open"), CompileError::Lex(_)));
        }
    }

    mod control {
        use super::*;

        #[test]
        fn if_chain_targets() {
            let program = compile("@if(a) A @elseif(b) B @else C @endif");
            assert_eq!(
                program,
                vec![
                    Instruction::If { condition: "a".into(), next: 2, end: 6 },
                    Instruction::Literal(" A ".into()),
                    Instruction::ElseIf { condition: "b".into(), next: 4 },
                    Instruction::Literal(" B ".into()),
                    Instruction::Else { end: 6 },
                    Instruction::Literal(" C ".into()),
                    Instruction::EndIf,
                ]
            );
        }

        #[test]
        fn unless_negates() {
            let program = compile("@unless(a) x @endunless");
            assert_eq!(
                program[0],
                Instruction::If { condition: "not (a)".into(), next: 2, end: 2 }
            );
        }

        #[test]
        fn foreach_with_key() {
            let program = compile("@foreach(items as k => v){{ v }}@endforeach");
            assert_eq!(
                program[0],
                Instruction::ForEach {
                    source: "items".into(),
                    key: Some("k".into()),
                    value: "v".into(),
                    end: 2,
                }
            );
            assert_eq!(program[2], Instruction::EndForEach);
        }

        #[test]
        fn for_header() {
            let program = compile("@for(i = 0; i < 3; i++) x @endfor");
            assert_eq!(
                program[0],
                Instruction::For {
                    init: Some(Assignment { target: "i".into(), value: "0".into() }),
                    condition: Some("i < 3".into()),
                    step: Some(Assignment { target: "i".into(), value: "i + 1".into() }),
                    end: 2,
                }
            );
        }

        #[test]
        fn nested_blocks() {
            let program = compile("@while(a)@if(b) x @endif@endwhile");
            assert_eq!(program[0], Instruction::While { condition: "a".into(), end: 4 });
            assert_eq!(program[1], Instruction::If { condition: "b".into(), next: 3, end: 3 });
        }

        #[test]
        fn mismatched_close() {
            assert_eq!(
                compile_err("@if(a)@endforeach"),
                CompileError::UnexpectedClose {
                    found: "endforeach".into(),
                    expected: "@endif".into(),
                    offset: 6,
                }
            );
        }

        #[test]
        fn stray_close() {
            assert!(matches!(compile_err("@endif"), CompileError::UnexpectedClose { .. }));
        }

        #[test]
        fn unclosed_block() {
            assert_eq!(
                compile_err("x @foreach(a as b)"),
                CompileError::UnclosedBlock { directive: "foreach".into(), offset: 2 }
            );
        }

        #[test]
        fn else_outside_if() {
            assert!(matches!(compile_err("@else"), CompileError::Malformed { .. }));
        }

        #[test]
        fn malformed_foreach() {
            assert!(matches!(compile_err("@foreach(items)@endforeach"), CompileError::Malformed { .. }));
            assert!(matches!(
                compile_err("@foreach(items as 1x)@endforeach"),
                CompileError::Malformed { .. }
            ));
        }

        #[test]
        fn missing_condition() {
            assert!(matches!(compile_err("@if @endif"), CompileError::Malformed { .. }));
        }

        #[test]
        fn set_assignment() {
            assert_eq!(
                compile("@set(total += price)"),
                vec![Instruction::Set(Assignment {
                    target: "total".into(),
                    value: "total + (price)".into(),
                })]
            );
        }
    }

    mod sections {
        use super::*;

        #[test]
        fn section_and_endsection() {
            assert_eq!(
                compile("@section('a') x @endsection"),
                vec![
                    Instruction::SectionOpen { name: "'a'".into() },
                    Instruction::Literal(" x ".into()),
                    Instruction::SectionClose(CloseMode::Extend),
                ]
            );
        }

        #[test]
        fn show_rewrites_open() {
            let program = compile("@section('s') A @show");
            assert_eq!(program[0], Instruction::SectionShow { name: "'s'".into() });
            assert_eq!(program[2], Instruction::SectionClose(CloseMode::Extend));
        }

        #[test]
        fn show_without_section() {
            assert_eq!(compile_err("x @show"), CompileError::ShowWithoutSection { offset: 2 });
        }

        #[test]
        fn inject_and_yield() {
            assert_eq!(
                compile("@section('title', 'Home')@yield('title', 'x, y')"),
                vec![
                    Instruction::SectionInject { name: "'title'".into(), content: "'Home'".into() },
                    Instruction::Yield { name: "'title'".into(), default: Some("'x, y'".into()) },
                ]
            );
        }

        #[test]
        fn close_modes() {
            let program = compile("@section('a')@overwrite@section('b')@append@section('c')@stop");
            assert_eq!(program[1], Instruction::SectionClose(CloseMode::Overwrite));
            assert_eq!(program[3], Instruction::SectionAppend);
            assert_eq!(program[5], Instruction::SectionClose(CloseMode::Extend));
        }

        #[test]
        fn view_directives() {
            assert_eq!(
                compile("@extends('layout')@include('nav', {'a': 1})@each('row', rows, 'r', 'raw|none')"),
                vec![
                    Instruction::Extends { name: "'layout'".into() },
                    Instruction::Include { name: "'nav'".into(), data: Some("{'a': 1}".into()) },
                    Instruction::Each {
                        view: "'row'".into(),
                        items: "rows".into(),
                        iterator: "'r'".into(),
                        empty: Some("'raw|none'".into()),
                    },
                ]
            );
        }
    }

    mod custom {
        use super::*;

        #[test]
        fn expansion_is_compiled() {
            let mut directives = DirectiveRegistry::new();
            directives
                .register("upper", |args| format!("<{{{{ {} | upper }}}}>", strip_parens(args)))
                .unwrap();
            let program = compile_with("@upper('hi')", &directives).unwrap();
            assert_eq!(
                program.instructions(),
                &[
                    Instruction::Raw("<".into()),
                    Instruction::Echo { expression: "'hi' | upper".into(), escape: EscapeMode::Escaped },
                    Instruction::Raw(">".into()),
                ]
            );
        }

        #[test]
        fn handler_receives_parens() {
            let mut directives = DirectiveRegistry::new();
            directives.register("args", |args| format!("[{}]", args)).unwrap();
            let program = compile_with("@args(1, 2) @args", &directives).unwrap();
            assert_eq!(
                program.instructions(),
                &[
                    Instruction::Raw("[(1, 2)]".into()),
                    Instruction::Literal(" ".into()),
                    Instruction::Raw("[]".into()),
                ]
            );
        }

        #[test]
        fn expansion_may_open_blocks() {
            let mut directives = DirectiveRegistry::new();
            directives
                .register("admin", |_| "@if(user.admin)".to_string())
                .unwrap();
            directives.register("endadmin", |_| "@endif".to_string()).unwrap();
            let program = compile_with("@admin yes @endadmin", &directives).unwrap();
            assert!(matches!(program.instructions()[0], Instruction::If { .. }));
            assert_eq!(program.instructions().last(), Some(&Instruction::EndIf));
        }

        #[test]
        fn self_expansion_is_bounded() {
            let mut directives = DirectiveRegistry::new();
            directives.register("loop", |_| "@loop".to_string()).unwrap();
            let tags = TagConfig::default();
            let err = Compiler::new(&tags, &directives)
                .with_max_expansion_depth(3)
                .compile("@loop")
                .unwrap_err();
            let mut depth = 0;
            let mut current = &err;
            while let CompileError::Expansion { source, .. } = current {
                depth += 1;
                current = source.as_ref();
            }
            assert_eq!(depth, 3);
            assert!(matches!(current, CompileError::ExpansionTooDeep { limit: 3, .. }));
        }
    }

    mod assignments {
        use super::*;

        #[test]
        fn forms() {
            let value = |text: &str| parse_assignment(text).map(|a| a.value);
            assert_eq!(value("i = 1"), Some("1".into()));
            assert_eq!(value("i-- "), Some("i - 1".into()));
            assert_eq!(value("i -= 2"), Some("i - (2)".into()));
            assert_eq!(value("i == 2"), None);
            assert_eq!(value("i ="), None);
            assert_eq!(value("= 2"), None);
        }
    }
}
