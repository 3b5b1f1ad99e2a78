//! Render executor.
//!
//! Runs a [`CompiledProgram`] against a [`Scope`]. Output goes to the section
//! being captured when that section was opened by this render, otherwise to
//! the render's own buffer. When execution fails, sections this render
//! opened are discarded with its buffer and the error is annotated with the
//! view.

use std::collections::HashMap;

use minijinja::value::Value;
use minijinja::Expression;

use crate::cache::{is_stale, CompiledCache};
use crate::compiler::Compiler;
use crate::error::{Error, Result, SectionStackError};
use crate::expr::{self, Scope};
use crate::factory::{Factory, RAW_FALLBACK_PREFIX};
use crate::finder::{self, TemplateSource};
use crate::program::{Assignment, CompiledProgram, EscapeMode, Instruction};
use crate::view::{Data, View};

/// Returns the cached program for `source`, compiling and storing it when
/// the cache has none or it is stale.
///
/// Artifacts are keyed by `source.identity` only; a program compiled with
/// other tags or directives is served as long as it is newer than the source.
pub fn get_or_compile(compiler: &Compiler<'_>, cache: &dyn CompiledCache, source: &TemplateSource) -> Result<CompiledProgram> {
    let identity = source.identity.as_str();

    if !is_stale(cache, identity, source.last_modified) {
        match cache.read(identity) {
            Ok(program) => {
                log::debug!("cache hit for {}", identity);
                return Ok(program);
            }
            Err(err) => log::warn!("recompiling {}: {}", identity, err),
        }
    } else {
        log::debug!("cache miss for {}", identity);
    }

    let program = compiler.compile(&source.text).map_err(|source| Error::Compile {
        view: identity.to_string(),
        source,
    })?;
    cache.write(identity, &program)?;
    Ok(program)
}

/// Loads, compiles and runs `view` with `scope`.
pub(crate) fn evaluate(env: &Factory, view: &View, scope: Scope) -> Result<String> {
    let program = load_program(env, view)?;
    let depth = env.render_count();

    let mut run = Run::new(env, &program, scope, depth);

    if let Err(err) = run.exec(0, program.len()) {
        env.section_state().borrow_mut().discard_from(depth);
        return Err(err.in_view(view.name()));
    }

    let unclosed = env.section_state().borrow_mut().discard_from(depth);
    if !unclosed.is_empty() {
        return Err(Error::from(SectionStackError::Unclosed { names: unclosed }).in_view(view.name()));
    }

    let Run {
        mut output,
        scope,
        parent,
        ..
    } = run;
    if let Some(parent) = parent {
        let layout = env
            .make(&parent, Data::from_scope(&scope))
            .map_err(|err| err.in_view(view.name()))?;
        output.push_str(&layout.render(env)?);
    }

    let output = output.trim_start();
    if depth == 1 {
        Ok(env.section_state().borrow().unescape(output))
    } else {
        Ok(output.to_string())
    }
}

fn load_program(env: &Factory, view: &View) -> Result<CompiledProgram> {
    let mut source = if view.is_file() {
        finder::load_file(view.path())?
    } else {
        env.finder().load(view.path())?
    };
    source.last_modified = source.last_modified.max(env.directives_changed());

    if env.config().compile_cache {
        get_or_compile(&env.compiler(), env.cache(), &source)
    } else {
        env.compiler().compile(&source.text).map_err(|err| Error::Compile {
            view: source.identity.clone(),
            source: err,
        })
    }
}

/// One execution of a program.
struct Run<'a> {
    env: &'a Factory,
    program: &'a CompiledProgram,
    scope: Scope,
    output: String,
    /// Render depth this program runs at.
    depth: usize,
    /// Layout named by `@extends`.
    parent: Option<String>,
    /// Expressions compiled so far, by source text.
    expressions: HashMap<String, Expression<'a, 'static>>,
}

impl<'a> Run<'a> {
    fn new(env: &'a Factory, program: &'a CompiledProgram, scope: Scope, depth: usize) -> Self {
        Self {
            env,
            program,
            scope,
            output: String::new(),
            depth,
            parent: None,
            expressions: HashMap::new(),
        }
    }

    /// Executes instructions in `start..end`.
    fn exec(&mut self, start: usize, end: usize) -> Result<()> {
        let program = self.program;
        let mut pc = start;

        while pc < end {
            let Some(instruction) = program.instructions().get(pc) else {
                break;
            };
            match instruction {
                Instruction::Literal(text) | Instruction::Raw(text) => self.write(text),
                Instruction::Echo { expression, escape } => {
                    let text = self.eval_string(expression)?;
                    let text = match escape {
                        EscapeMode::Escaped => (self.env.escaper())(&text),
                        EscapeMode::Raw => text,
                    };
                    self.write(&text);
                }

                Instruction::If { .. } => {
                    pc = self.exec_if(pc)?;
                    continue;
                }
                Instruction::ForEach { source, key, value, end } => {
                    self.exec_foreach(pc, source, key.as_deref(), value, *end)?;
                    pc = end + 1;
                    continue;
                }
                Instruction::For { init, condition, step, end } => {
                    self.exec_for(pc, init.as_ref(), condition.as_deref(), step.as_ref(), *end)?;
                    pc = end + 1;
                    continue;
                }
                Instruction::While { condition, end } => {
                    let mut iterations = 0;
                    while self.eval(condition)?.is_true() {
                        self.tick(&mut iterations)?;
                        self.exec(pc + 1, *end)?;
                    }
                    pc = end + 1;
                    continue;
                }
                Instruction::Set(assignment) => self.assign(assignment)?,
                Instruction::ElseIf { .. }
                | Instruction::Else { .. }
                | Instruction::EndIf
                | Instruction::EndForEach
                | Instruction::EndFor
                | Instruction::EndWhile => {}

                Instruction::SectionOpen { name } => {
                    let name = self.eval_string(name)?;
                    self.env.section_state().borrow_mut().open(&name, self.depth)?;
                }
                Instruction::SectionShow { name } => {
                    let name = self.eval_string(name)?;
                    self.env.section_state().borrow_mut().show(&name, self.depth)?;
                }
                Instruction::SectionClose(mode) => {
                    let shown = self.env.section_state().borrow_mut().close(*mode)?;
                    if let Some(text) = shown {
                        self.write(&text);
                    }
                }
                Instruction::SectionAppend => {
                    self.env.section_state().borrow_mut().append()?;
                }
                Instruction::SectionInject { name, content } => {
                    let name = self.eval_string(name)?;
                    let content = self.eval_string(content)?;
                    self.env.section_state().borrow_mut().inject(&name, &content);
                }
                Instruction::Yield { name, default } => {
                    let name = self.eval_string(name)?;
                    let default = match default {
                        Some(default) => self.eval_string(default)?,
                        None => String::new(),
                    };
                    let text = self.env.section_state().borrow().yield_content(&name, &default);
                    self.write(&text);
                }
                Instruction::ParentPlaceholder => {
                    let placeholder = self.env.section_state().borrow().placeholder().to_string();
                    self.write(&placeholder);
                }

                Instruction::Extends { name } => {
                    self.parent = Some(self.eval_string(name)?);
                }
                Instruction::Include { name, data } => {
                    let name = self.eval_string(name)?;
                    let mut bindings = Data::from_scope(&self.scope);
                    if let Some(data) = data {
                        let extra = self.eval(data)?;
                        bindings
                            .extend_from_value(&extra)
                            .map_err(|err| Error::expression(data, err))?;
                    }
                    let text = self.env.make(&name, bindings)?.render(self.env)?;
                    self.write(&text);
                }
                Instruction::Each { view, items, iterator, empty } => {
                    let view = self.eval_string(view)?;
                    let items = self.eval(items)?;
                    let iterator = self.eval_string(iterator)?;
                    let empty = match empty {
                        Some(empty) => self.eval_string(empty)?,
                        None => RAW_FALLBACK_PREFIX.to_string(),
                    };
                    let text = self.env.render_each_value(&view, &items, &iterator, &empty)?;
                    self.write(&text);
                }
            }
            pc += 1;
        }
        Ok(())
    }

    /// Runs the taken branch of the conditional at `pc`, returning the index
    /// after its `EndIf`.
    fn exec_if(&mut self, pc: usize) -> Result<usize> {
        let program = self.program;
        let Some(Instruction::If { end, .. }) = program.instructions().get(pc) else {
            return Ok(pc + 1);
        };
        let after = end + 1;

        let mut at = pc;
        loop {
            match program.instructions().get(at) {
                Some(Instruction::If { condition, next, .. }) | Some(Instruction::ElseIf { condition, next }) => {
                    if self.eval(condition)?.is_true() {
                        self.exec(at + 1, *next)?;
                        return Ok(after);
                    }
                    at = *next;
                }
                Some(Instruction::Else { end }) => {
                    self.exec(at + 1, *end)?;
                    return Ok(after);
                }
                _ => return Ok(after),
            }
        }
    }

    fn exec_foreach(&mut self, pc: usize, source: &str, key: Option<&str>, value: &str, end: usize) -> Result<()> {
        let items = self.eval(source)?;
        let entries = expr::entries(&items).map_err(|err| Error::expression(source, err))?;

        let mut names = vec![value];
        names.extend(key);
        let saved = self.scope.save(&names);

        for (entry_key, entry_value) in entries {
            if let Some(key) = key {
                self.scope.set(key, entry_key);
            }
            self.scope.set(value, entry_value);
            self.exec(pc + 1, end)?;
        }

        self.scope.restore(saved);
        Ok(())
    }

    fn exec_for(
        &mut self,
        pc: usize,
        init: Option<&Assignment>,
        condition: Option<&str>,
        step: Option<&Assignment>,
        end: usize,
    ) -> Result<()> {
        let saved = init.map(|init| self.scope.save(&[init.target.as_str()]));
        if let Some(init) = init {
            self.assign(init)?;
        }

        let mut iterations = 0;
        loop {
            if let Some(condition) = condition {
                if !self.eval(condition)?.is_true() {
                    break;
                }
            }
            self.tick(&mut iterations)?;
            self.exec(pc + 1, end)?;
            if let Some(step) = step {
                self.assign(step)?;
            }
        }

        if let Some(saved) = saved {
            self.scope.restore(saved);
        }
        Ok(())
    }

    fn tick(&self, iterations: &mut usize) -> Result<()> {
        *iterations += 1;
        let limit = self.env.config().max_loop_iterations;
        if *iterations > limit {
            return Err(Error::LoopLimit { limit });
        }
        Ok(())
    }

    fn assign(&mut self, assignment: &Assignment) -> Result<()> {
        let value = self.eval(&assignment.value)?;
        self.scope.set(assignment.target.as_str(), value);
        Ok(())
    }

    fn eval(&mut self, expression: &str) -> Result<Value> {
        let env = self.env;
        let evaluator = env.evaluator();
        if !self.expressions.contains_key(expression) {
            let compiled = evaluator.compile(expression)?;
            self.expressions.insert(expression.to_string(), compiled);
        }
        match self.expressions.get(expression) {
            Some(compiled) => evaluator.eval_compiled(compiled, expression, &self.scope),
            None => evaluator.eval(expression, &self.scope),
        }
    }

    fn eval_string(&mut self, expression: &str) -> Result<String> {
        self.eval(expression).map(|value| expr::display(&value))
    }

    fn write(&mut self, text: &str) {
        let env = self.env;
        let mut sections = env.section_state().borrow_mut();
        match sections.capture(self.depth) {
            Some(buffer) => buffer.push_str(text),
            None => self.output.push_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::directive::DirectiveRegistry;
    use crate::finder::MemoryFinder;
    use stencil_lexer::TagConfig;

    fn render(views: &[(&str, &str)], name: &str, data: serde_json::Value) -> Result<String> {
        let mut finder = MemoryFinder::new();
        for (view, text) in views {
            finder.add(*view, *text);
        }
        let env = Factory::new(finder);
        env.make(name, data)?.render(&env)
    }

    fn render_one(text: &str, data: serde_json::Value) -> Result<String> {
        render(&[("main", text)], "main", data)
    }

    mod control {
        use super::*;

        #[test]
        fn if_chain() {
            let text = "@if(n > 1) many @elseif(n == 1) one @else none @endif";
            assert_eq!(render_one(text, json!({"n": 5})).unwrap(), "many ");
            assert_eq!(render_one(text, json!({"n": 1})).unwrap(), "one ");
            assert_eq!(render_one(text, json!({"n": 0})).unwrap(), "none ");
        }

        #[test]
        fn unless() {
            let text = "@unless(admin)guest @endunless";
            assert_eq!(render_one(text, json!({"admin": false})).unwrap(), "guest ");
            assert_eq!(render_one(text, json!({"admin": true})).unwrap(), "");
        }

        #[test]
        fn foreach_sequence_and_map() {
            assert_eq!(
                render_one("@foreach(items as i => v){{ i }}={{ v }} @endforeach", json!({"items": ["a", "b"]})).unwrap(),
                "0=a 1=b "
            );
            assert_eq!(
                render_one("@foreach(m as k => v){{ k }}:{{ v }};@endforeach", json!({"m": {"x": 1}})).unwrap(),
                "x:1;"
            );
        }

        #[test]
        fn foreach_restores_loop_variable() {
            let text = "@foreach(items as item){{ item }}@endforeach[{{ item }}]";
            assert_eq!(render_one(text, json!({"items": [1, 2], "item": "outer"})).unwrap(), "12[outer]");
        }

        #[test]
        fn foreach_over_missing_is_empty() {
            assert_eq!(render_one("a @foreach(nothing as x) x @endforeach", json!({})).unwrap(), "a ");
        }

        #[test]
        fn for_loop() {
            assert_eq!(render_one("@for(i = 0; i < 3; i++){{ i }}@endfor", json!({})).unwrap(), "012");
        }

        #[test]
        fn while_with_set() {
            let text = "@set(n = 3)@while(n > 0){{ n }}@set(n -= 1)@endwhile";
            assert_eq!(render_one(text, json!({})).unwrap(), "321");
        }

        #[test]
        fn expressions_compiled_once_per_run() {
            let env = Factory::new(MemoryFinder::new());
            let program = env
                .compile("@foreach(items as item){{ item }}{{ item | upper }}@endforeach")
                .unwrap();
            let scope: Scope = [("items".to_string(), Value::from_serialize(json!(["a", "b", "c"])))]
                .into_iter()
                .collect();

            let mut run = Run::new(&env, &program, scope, 0);
            run.exec(0, program.len()).unwrap();
            assert_eq!(run.output, "aAbBcC");
            let mut compiled: Vec<&str> = run.expressions.keys().map(String::as_str).collect();
            compiled.sort_unstable();
            assert_eq!(compiled, ["item", "item | upper", "items"]);
        }

        #[test]
        fn loop_limit() {
            let mut finder = MemoryFinder::new();
            finder.add("main", "@while(true)x @endwhile");
            let config = Config {
                max_loop_iterations: 5,
                ..Config::default()
            };
            let env = Factory::from_config(config, finder).unwrap();
            let err = env.make("main", Data::new()).unwrap().render(&env).unwrap_err();
            assert!(matches!(err.root_cause(), Error::LoopLimit { limit: 5 }));
        }
    }

    mod output {
        use super::*;

        #[test]
        fn escaping() {
            let data = json!({"v": "<b>"});
            assert_eq!(render_one("{{ v }}", data.clone()).unwrap(), "&lt;b&gt;");
            assert_eq!(render_one("{{{ v }}}", data.clone()).unwrap(), "&lt;b&gt;");
            assert_eq!(render_one("{!! v !!}", data).unwrap(), "<b>");
        }

        #[test]
        fn custom_escaper() {
            let mut env = Factory::new(MemoryFinder::new().with("main", "{{ v }}"));
            env.set_escaper(|text| text.to_uppercase());
            let out = env.make("main", json!({"v": "abc"})).unwrap().render(&env).unwrap();
            assert_eq!(out, "ABC");
        }

        #[test]
        fn output_left_trimmed() {
            assert_eq!(render_one("\n\n  hi \n", json!({})).unwrap(), "hi \n");
        }

        #[test]
        fn shared_data_visible() {
            let mut env = Factory::new(MemoryFinder::new().with("main", "{{ app }}/{{ page }}"));
            env.share("app", "site");
            env.share("page", "shared");
            let out = env.make("main", json!({"page": "own"})).unwrap().render(&env).unwrap();
            assert_eq!(out, "site/own");
        }

        #[test]
        fn sub_view_binding_rendered() {
            let env = Factory::new(
                MemoryFinder::new()
                    .with("main", "<main>{!! body !!}</main>")
                    .with("body", "hello {{ who }}"),
            );
            let view = env
                .make("main", Data::new())
                .unwrap()
                .nest(&env, "body", "body", json!({"who": "you"}))
                .unwrap();
            assert_eq!(view.render(&env).unwrap(), "<main>hello you</main>");
            assert_eq!(view.last_output().as_deref(), Some("<main>hello you</main>"));
        }
    }

    mod composition {
        use super::*;

        #[test]
        fn show_yields_inline() {
            assert_eq!(render_one("[@section('a')<x>@show]", json!({})).unwrap(), "[<x>]");
        }

        #[test]
        fn include_sees_scope_and_extra_data() {
            let out = render(
                &[
                    ("main", "@include('partial', {'extra': 2}) after"),
                    ("partial", "{{ base }}+{{ extra }}"),
                ],
                "main",
                json!({"base": 1}),
            )
            .unwrap();
            assert_eq!(out, "1+2 after");
        }

        #[test]
        fn each_renders_entries() {
            let out = render(
                &[("main", "@each('row', rows, 'row')"), ("row", "<{{ key }}:{{ row }}>")],
                "main",
                json!({"rows": ["a", "b"]}),
            )
            .unwrap();
            assert_eq!(out, "<0:a><1:b>");
        }

        #[test]
        fn each_empty_fallbacks() {
            let views = [
                ("raw", "@each('row', rows, 'row', 'raw|nothing')"),
                ("view", "@each('row', rows, 'row', 'empty')"),
                ("row", "{{ row }}"),
                ("empty", "no rows"),
            ];
            assert_eq!(render(&views, "raw", json!({"rows": []})).unwrap(), "nothing");
            assert_eq!(render(&views, "view", json!({"rows": []})).unwrap(), "no rows");
        }

        #[test]
        fn failure_discards_open_sections() {
            let mut finder = MemoryFinder::new();
            finder.add("main", "@section('a') {{ 1 + }} @endsection");
            let env = Factory::new(finder);
            let err = env.make("main", Data::new()).unwrap().render(&env).unwrap_err();
            assert!(matches!(err, Error::Render { ref view, .. } if view == "main"));
            assert!(matches!(err.root_cause(), Error::Expression { .. }));
            assert!(!env.section_state().borrow().is_capturing());
            assert_eq!(env.render_count(), 0);
        }

        #[test]
        fn unclosed_section_is_error() {
            let err = render_one("@section('x') body", json!({})).unwrap_err();
            match err.root_cause() {
                Error::Section(SectionStackError::Unclosed { names }) => assert_eq!(names, &vec!["x".to_string()]),
                other => panic!("unexpected error {other:?}"),
            }
        }

        #[test]
        fn endsection_without_section() {
            let err = render_one("@endsection", json!({})).unwrap_err();
            assert!(matches!(
                err.root_cause(),
                Error::Section(SectionStackError::EmptyStack { operation: "endsection" })
            ));
        }

        #[test]
        fn nested_error_keeps_inner_view() {
            let err = render(&[("main", "@include('bad')"), ("bad", "{{ 1 + }}")], "main", json!({})).unwrap_err();
            assert_eq!(err.view(), Some("bad"));
        }

        #[test]
        fn missing_include_annotated_with_includer() {
            let err = render(&[("main", "@include('gone')")], "main", json!({})).unwrap_err();
            assert_eq!(err.view(), Some("main"));
            assert!(matches!(err.root_cause(), Error::ViewNotFound { .. }));
        }
    }

    mod caching {
        use super::*;

        #[test]
        fn fresh_artifact_reused() {
            let tags = TagConfig::default();
            let directives = DirectiveRegistry::new();
            let compiler = Compiler::new(&tags, &directives);
            let cache = MemoryCache::new();
            let source = TemplateSource {
                identity: "a".into(),
                text: "hi {{ x }}".into(),
                last_modified: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
            };

            let first = get_or_compile(&compiler, &cache, &source).unwrap();
            let written = cache.last_modified("a").unwrap();
            assert!(!is_stale(&cache, "a", source.last_modified));

            let second = get_or_compile(&compiler, &cache, &source).unwrap();
            assert_eq!(first, second);
            assert_eq!(cache.last_modified("a"), Some(written));
        }

        #[test]
        fn newer_source_recompiles() {
            let tags = TagConfig::default();
            let directives = DirectiveRegistry::new();
            let compiler = Compiler::new(&tags, &directives);
            let cache = MemoryCache::new();
            let old = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
            cache.insert_with_mtime("a", CompiledProgram::default(), old);

            let source = TemplateSource {
                identity: "a".into(),
                text: "new".into(),
                last_modified: old + Duration::from_secs(1),
            };
            let program = get_or_compile(&compiler, &cache, &source).unwrap();
            assert_eq!(program.instructions(), &[Instruction::Literal("new".into())]);
        }

        #[test]
        fn compile_error_names_source() {
            let tags = TagConfig::default();
            let directives = DirectiveRegistry::new();
            let compiler = Compiler::new(&tags, &directives);
            let source = TemplateSource {
                identity: "views/broken.html".into(),
                text: "{{ open".into(),
                last_modified: SystemTime::now(),
            };
            let err = get_or_compile(&compiler, &MemoryCache::new(), &source).unwrap_err();
            assert!(matches!(err, Error::Compile { ref view, .. } if view == "views/broken.html"));
        }

        #[test]
        fn cache_disabled_always_compiles() {
            let config = Config {
                compile_cache: false,
                ..Config::default()
            };
            let env = Factory::from_config(config, MemoryFinder::new().with("a", "x")).unwrap();
            env.make("a", Data::new()).unwrap().render(&env).unwrap();
            assert!(!env.cache().exists("a"));
        }
    }
}
