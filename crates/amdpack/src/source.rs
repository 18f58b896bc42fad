//! AMD module definitions and the service that reads and writes them
//!
//! The bundler only needs three facts about a `define(...)` call: its id,
//! its dependency references and where it sits in the source text. The
//! [`SourceModuleService`] trait is the seam between the bundler and whatever
//! produces those facts; [`AmdSourceService`] is the built-in implementation,
//! which parses the source with `parse-js` and walks the syntax tree for
//! `define` calls. Factories are kept as the original source text.

use std::ops::Range;

use derive_visitor::{Drive, Visitor};
use parse_js::ast::{
    expr::{
        CallArg, CallExpr, Expr,
        lit::{LitArrElem, LitArrExpr},
    },
    node::Node,
};
use thiserror::Error;

/// Dependencies implied by the parameters of a factory declared without a
/// dependency array, in parameter order
const IMPLICIT_DEPENDENCIES: [&str; 3] = ["require", "exports", "module"];

/// One `define(...)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    /// Explicit or assigned module id; `None` for an anonymous definition
    pub id: Option<String>,
    /// References exactly as declared in the dependency array
    pub dependencies: Vec<String>,
    /// Declared references followed by those discovered in the factory body
    pub actual_dependencies: Vec<String>,
    pub factory: Factory,
    /// Byte range of the whole call in the source it was parsed from
    pub span: Option<Range<usize>>,
}

/// Opaque factory of a definition, kept as source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factory {
    pub text: String,
}

/// Failure to read module definitions out of a source text
#[derive(Debug, Error)]
#[error("{message} at byte {offset}")]
pub struct SourceError {
    pub message: String,
    pub offset: usize,
}

impl SourceError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Reads module definitions out of source text and writes them back
pub trait SourceModuleService: std::fmt::Debug {
    /// Every `define(...)` call in `source`, in source order
    fn parse(&self, source: &str) -> Result<Vec<ModuleDefinition>, SourceError>;

    /// Source text for `definitions`
    ///
    /// With the original text, each definition is regenerated in place and the
    /// surrounding code is kept; without it, the definitions are emitted one
    /// statement per line.
    fn render(&self, definitions: &[ModuleDefinition], original: Option<&str>) -> String;
}

/// Built-in [`SourceModuleService`] for AMD sources
#[derive(Debug, Clone, Copy, Default)]
pub struct AmdSourceService;

impl SourceModuleService for AmdSourceService {
    fn parse(&self, source: &str) -> Result<Vec<ModuleDefinition>, SourceError> {
        let top_level = parse_js::parse(source.as_bytes())
            .map_err(|error| SourceError::new(error.to_string(), error.loc.0))?;

        let mut collector = DefineCollector::default();
        top_level.drive(&mut collector);
        if let Some(error) = collector.error {
            return Err(error);
        }

        Ok(collector
            .calls
            .into_iter()
            .map(|call| ModuleDefinition {
                id: call.id,
                dependencies: call.dependencies,
                actual_dependencies: call.actual_dependencies,
                factory: Factory {
                    text: source[call.factory].to_owned(),
                },
                span: Some(call.span),
            })
            .collect())
    }

    fn render(&self, definitions: &[ModuleDefinition], original: Option<&str>) -> String {
        let Some(original) = original else {
            return definitions
                .iter()
                .map(|definition| format!("{};", generate_define_call(definition)))
                .collect::<Vec<_>>()
                .join("\n");
        };

        let mut placed: Vec<(&Range<usize>, &ModuleDefinition)> = definitions
            .iter()
            .filter_map(|definition| definition.span.as_ref().map(|span| (span, definition)))
            .filter(|(span, _)| span.end <= original.len())
            .collect();
        placed.sort_by_key(|(span, _)| span.start);

        let mut output = String::with_capacity(original.len());
        let mut cursor = 0;
        for (span, definition) in placed {
            if span.start < cursor {
                continue;
            }
            output.push_str(&original[cursor..span.start]);
            output.push_str(&generate_define_call(definition));
            cursor = span.end;
        }
        output.push_str(&original[cursor..]);

        for definition in definitions.iter().filter(|d| d.span.is_none()) {
            output.push('\n');
            output.push_str(&generate_define_call(definition));
            output.push(';');
        }

        output
    }
}

/// `define('<id>', [<deps>], <factory>)` without trailing semicolon
pub fn generate_define_call(definition: &ModuleDefinition) -> String {
    let mut dependencies: Vec<&str> = definition
        .dependencies
        .iter()
        .map(String::as_str)
        .collect();
    for dependency in &definition.actual_dependencies {
        if !dependencies.contains(&dependency.as_str()) {
            dependencies.push(dependency);
        }
    }

    let mut args = Vec::with_capacity(3);
    if let Some(id) = &definition.id {
        args.push(quote(id));
    }
    args.push(format!(
        "[{}]",
        dependencies
            .iter()
            .map(|dependency| quote(dependency))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    args.push(definition.factory.text.clone());

    format!("define({})", args.join(", "))
}

/// Single-quoted JavaScript string literal
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

type CallExprNode = Node<CallExpr>;

/// Pre-order walk over every call expression, keeping top-level `define` calls
#[derive(Default, Visitor)]
#[visitor(CallExprNode(enter))]
struct DefineCollector {
    calls: Vec<DefineCall>,
    error: Option<SourceError>,
}

/// A `define` call with its factory still as a byte range
struct DefineCall {
    id: Option<String>,
    dependencies: Vec<String>,
    actual_dependencies: Vec<String>,
    factory: Range<usize>,
    span: Range<usize>,
}

impl DefineCollector {
    fn enter_call_expr_node(&mut self, node: &CallExprNode) {
        if self.error.is_some() || !is_call_to(node, "define") {
            return;
        }
        // A define nested in another factory belongs to that factory's text
        if self
            .calls
            .last()
            .is_some_and(|outer| node.loc.0 < outer.span.end)
        {
            return;
        }
        match read_define(node) {
            Ok(call) => self.calls.push(call),
            Err(error) => self.error = Some(error),
        }
    }
}

/// Literal `require('<id>')` calls, in source order, without repeats
#[derive(Default, Visitor)]
#[visitor(CallExprNode(enter))]
struct RequireCollector {
    required: Vec<String>,
}

impl RequireCollector {
    fn enter_call_expr_node(&mut self, node: &CallExprNode) {
        if !is_call_to(node, "require") {
            return;
        }
        let [argument] = node.stx.arguments.as_slice() else {
            return;
        };
        if let Some(value) = string_value(argument) {
            if !self.required.contains(&value) {
                self.required.push(value);
            }
        }
    }
}

/// Plain `<name>(...)` call; member calls such as `foo.define(...)` do not count
fn is_call_to(node: &CallExprNode, name: &str) -> bool {
    matches!(node.stx.callee.stx.as_ref(), Expr::Id(callee) if callee.stx.name == name)
}

fn string_value(argument: &Node<CallArg>) -> Option<String> {
    if argument.stx.spread {
        return None;
    }
    match argument.stx.value.stx.as_ref() {
        Expr::LitStr(literal) => Some(literal.stx.value.clone()),
        _ => None,
    }
}

fn read_define(node: &CallExprNode) -> Result<DefineCall, SourceError> {
    let mut args: &[Node<CallArg>] = &node.stx.arguments;
    if args.is_empty() {
        return Err(SourceError::new("define() without a factory", node.loc.0));
    }
    if let Some(spread) = args.iter().find(|arg| arg.stx.spread) {
        return Err(SourceError::new(
            "spread argument to define()",
            spread.loc.0,
        ));
    }

    let mut id = None;
    if args.len() > 1 {
        if let Some(value) = string_value(&args[0]) {
            id = Some(value);
            args = &args[1..];
        }
    }

    let mut declared = None;
    if args.len() > 1 {
        if let Expr::LitArr(array) = args[0].stx.value.stx.as_ref() {
            declared = Some(dependency_array(array)?);
            args = &args[1..];
        }
    }

    let [factory] = args else {
        return Err(SourceError::new(
            "unexpected arguments to define()",
            args[1].loc.0,
        ));
    };
    let factory = &factory.stx.value;

    let dependencies = match declared {
        Some(declared) => declared,
        None => {
            let params = factory_param_count(factory).min(IMPLICIT_DEPENDENCIES.len());
            IMPLICIT_DEPENDENCIES[..params]
                .iter()
                .map(|dependency| (*dependency).to_owned())
                .collect()
        }
    };

    let mut actual_dependencies = dependencies.clone();
    if dependencies.iter().any(|dependency| dependency == "require") {
        let mut collector = RequireCollector::default();
        factory.drive(&mut collector);
        for required in collector.required {
            if !actual_dependencies.contains(&required) {
                actual_dependencies.push(required);
            }
        }
    }

    Ok(DefineCall {
        id,
        dependencies,
        actual_dependencies,
        factory: factory.loc.0..factory.loc.1,
        span: node.loc.0..node.loc.1,
    })
}

fn dependency_array(array: &Node<LitArrExpr>) -> Result<Vec<String>, SourceError> {
    array
        .stx
        .elements
        .iter()
        .map(|element| match element {
            LitArrElem::Single(value) => match value.stx.as_ref() {
                Expr::LitStr(literal) => Ok(literal.stx.value.clone()),
                _ => Err(value.loc.0),
            },
            LitArrElem::Rest(value) => Err(value.loc.0),
            LitArrElem::Empty => Err(array.loc.0),
        })
        .map(|element| {
            element.map_err(|offset| {
                SourceError::new("dependency array must only contain string literals", offset)
            })
        })
        .collect()
}

/// Parameter count of a function or arrow function factory; 0 otherwise
fn factory_param_count(factory: &Node<Expr>) -> usize {
    match factory.stx.as_ref() {
        Expr::Func(function) => function.stx.func.stx.parameters.len(),
        Expr::ArrowFunc(arrow) => arrow.stx.func.stx.parameters.len(),
        _ => 0,
    }
}
