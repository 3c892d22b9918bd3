//! # Expression Lowering
//!
//! Parses directive snippets with `oxc_parser` and lowers the supported part
//! of the JavaScript AST into the owned tree in [`crate::ast`].
//!
//! oxc nodes live in the parse allocator, while evaluations (suspended ones
//! included) outlive a single parse. Each snippet is therefore lowered once
//! into `Rc`-shared nodes and the allocator is dropped.
//!
//! A snippet is tried as a single expression first and as a statement body
//! second. Both forms are parsed as the body of an `async` arrow so that
//! `await` and `return` are legal at the snippet's top level.

use std::rc::Rc;

use oxc_allocator::{Allocator, Box as OxcBox};
use oxc_ast::ast as js;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_syntax::operator::{AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator};

use crate::ast::{
    ArrowBody, ArrowFunction, AssignOp, BinaryOp, Expr, LogicalOp, Program, PropertyKey, Stmt,
    TemplatePart, UnaryOp,
};
use crate::error::{EvalError, EvalResult};
use crate::value::format_number;
use crate::visitor::{AwaitFinder, FreeIdentifiers, ReturnFinder};

const EXPRESSION_PREFIX: &str = "async () => (\n";
const EXPRESSION_SUFFIX: &str = "\n)";
const BODY_PREFIX: &str = "async () => {\n";
const BODY_SUFFIX: &str = "\n}";

/// A lowered snippet and what static analysis found in it.
#[derive(Debug)]
pub struct Snippet {
    pub program: Program,
    /// Contains `await`.
    pub is_async: bool,
    /// A statement body with its own `return`.
    pub has_return: bool,
    /// Free identifiers in first-use order.
    pub identifiers: Vec<String>,
}

pub fn compile(source: &str) -> EvalResult<Snippet> {
    let allocator = Allocator::default();

    let text = format!("{}{}{}", EXPRESSION_PREFIX, source, EXPRESSION_SUFFIX);
    if let Ok(wrapper) = parse_wrapper(&allocator, &text) {
        let lowerer = Lowerer { text: &text };
        let program = match wrapper.body.statements.first() {
            Some(js::Statement::ExpressionStatement(stmt)) => {
                Program::Expression(lowerer.expression(&stmt.expression)?)
            }
            _ => return Err(lowerer.unsupported(wrapper.span)),
        };
        return Ok(analyze(&wrapper, program));
    }

    let text = format!("{}{}{}", BODY_PREFIX, source, BODY_SUFFIX);
    let wrapper = parse_wrapper(&allocator, &text)?;
    let lowerer = Lowerer { text: &text };
    let program = Program::Statements(lowerer.statements(&wrapper.body.statements)?);
    Ok(analyze(&wrapper, program))
}

fn parse_wrapper<'a>(
    allocator: &'a Allocator,
    text: &'a str,
) -> EvalResult<OxcBox<'a, js::ArrowFunctionExpression<'a>>> {
    let source_type = SourceType::default().with_module(true);
    match Parser::new(allocator, text, source_type).parse_expression() {
        Ok(js::Expression::ArrowFunctionExpression(arrow)) => Ok(arrow),
        Ok(_) => Err(EvalError::Syntax("unexpected trailing input".to_string())),
        Err(errors) => Err(EvalError::Syntax(
            errors
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "invalid expression".to_string()),
        )),
    }
}

fn analyze(wrapper: &js::ArrowFunctionExpression<'_>, program: Program) -> Snippet {
    let mut awaits = AwaitFinder::default();
    awaits.visit_function_body(&wrapper.body);
    let mut returns = ReturnFinder::default();
    returns.visit_function_body(&wrapper.body);
    let mut free = FreeIdentifiers::new();
    free.visit_function_body(&wrapper.body);

    Snippet {
        program,
        is_async: awaits.found,
        has_return: returns.found,
        identifiers: free.names,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERER
// ═══════════════════════════════════════════════════════════════════════════════

struct Lowerer<'s> {
    text: &'s str,
}

impl<'s> Lowerer<'s> {
    fn unsupported(&self, span: Span) -> EvalError {
        let snippet = self
            .text
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default();
        EvalError::Syntax(format!("unsupported syntax `{}`", snippet.trim()))
    }

    fn statements(&self, body: &[js::Statement<'_>]) -> EvalResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            self.statement(stmt, &mut out)?;
        }
        Ok(out)
    }

    fn statement(&self, stmt: &js::Statement<'_>, out: &mut Vec<Stmt>) -> EvalResult<()> {
        match stmt {
            js::Statement::VariableDeclaration(decl)
                if matches!(
                    decl.kind,
                    js::VariableDeclarationKind::Let | js::VariableDeclarationKind::Const
                ) =>
            {
                for declarator in &decl.declarations {
                    let js::BindingPattern::BindingIdentifier(id) = &declarator.id else {
                        return Err(self.unsupported(declarator.span));
                    };
                    let init = match &declarator.init {
                        Some(init) => Some(self.expression(init)?),
                        None => None,
                    };
                    out.push(Stmt::Declare {
                        name: id.name.to_string(),
                        init,
                    });
                }
            }
            js::Statement::ExpressionStatement(expr) => {
                out.push(Stmt::Expr(self.expression(&expr.expression)?));
            }
            js::Statement::ReturnStatement(ret) => {
                let value = match &ret.argument {
                    Some(value) => Some(self.expression(value)?),
                    None => None,
                };
                out.push(Stmt::Return(value));
            }
            js::Statement::EmptyStatement(_) => {}
            other => return Err(self.unsupported(other.span())),
        }
        Ok(())
    }

    fn expression(&self, expr: &js::Expression<'_>) -> EvalResult<Expr> {
        let lowered = match expr {
            js::Expression::NumericLiteral(n) => Expr::Number(n.value),
            js::Expression::StringLiteral(s) => Expr::Str(s.value.to_string()),
            js::Expression::BooleanLiteral(b) => Expr::Bool(b.value),
            js::Expression::NullLiteral(_) => Expr::Null,
            js::Expression::Identifier(id) if id.name == "undefined" => Expr::Undefined,
            js::Expression::Identifier(id) => Expr::Ident(id.name.to_string()),
            js::Expression::TemplateLiteral(tpl) => Expr::Template(self.template(tpl)?),
            js::Expression::ParenthesizedExpression(paren) => self.expression(&paren.expression)?,

            js::Expression::ArrayExpression(array) => {
                let mut items = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    match element.as_expression() {
                        Some(item) => items.push(self.expression(item)?),
                        None => return Err(self.unsupported(array.span)),
                    }
                }
                Expr::Array(items)
            }

            js::Expression::ObjectExpression(object) => self.object(object)?,

            js::Expression::StaticMemberExpression(member) => self.static_member(member)?,
            js::Expression::ComputedMemberExpression(member) => self.computed_member(member)?,
            js::Expression::CallExpression(call) => self.call(call)?,
            js::Expression::ChainExpression(chain) => match &chain.expression {
                js::ChainElement::CallExpression(call) => self.call(call)?,
                js::ChainElement::StaticMemberExpression(member) => self.static_member(member)?,
                js::ChainElement::ComputedMemberExpression(member) => {
                    self.computed_member(member)?
                }
                _ => return Err(self.unsupported(chain.span)),
            },

            js::Expression::UnaryExpression(unary) => {
                let op = match unary.operator {
                    UnaryOperator::LogicalNot => UnaryOp::Not,
                    UnaryOperator::UnaryNegation => UnaryOp::Minus,
                    UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    UnaryOperator::Typeof => UnaryOp::TypeOf,
                    _ => return Err(self.unsupported(unary.span)),
                };
                Expr::Unary {
                    op,
                    operand: Box::new(self.expression(&unary.argument)?),
                }
            }

            js::Expression::BinaryExpression(binary) => {
                let Some(op) = binary_op(binary.operator) else {
                    return Err(self.unsupported(binary.span));
                };
                Expr::Binary {
                    op,
                    left: Box::new(self.expression(&binary.left)?),
                    right: Box::new(self.expression(&binary.right)?),
                }
            }

            js::Expression::LogicalExpression(logical) => Expr::Logical {
                op: match logical.operator {
                    LogicalOperator::And => LogicalOp::And,
                    LogicalOperator::Or => LogicalOp::Or,
                    LogicalOperator::Coalesce => LogicalOp::Nullish,
                },
                left: Box::new(self.expression(&logical.left)?),
                right: Box::new(self.expression(&logical.right)?),
            },

            js::Expression::ConditionalExpression(cond) => Expr::Conditional {
                test: Box::new(self.expression(&cond.test)?),
                consequent: Box::new(self.expression(&cond.consequent)?),
                alternate: Box::new(self.expression(&cond.alternate)?),
            },

            js::Expression::AssignmentExpression(assign) => {
                let op = match assign.operator {
                    AssignmentOperator::Assign => AssignOp::Assign,
                    AssignmentOperator::Addition => AssignOp::Add,
                    AssignmentOperator::Subtraction => AssignOp::Sub,
                    AssignmentOperator::Multiplication => AssignOp::Mul,
                    AssignmentOperator::Division => AssignOp::Div,
                    _ => return Err(self.unsupported(assign.span)),
                };
                let target = match &assign.left {
                    js::AssignmentTarget::AssignmentTargetIdentifier(id) => {
                        Expr::Ident(id.name.to_string())
                    }
                    js::AssignmentTarget::StaticMemberExpression(member) => {
                        self.static_member(member)?
                    }
                    js::AssignmentTarget::ComputedMemberExpression(member) => {
                        self.computed_member(member)?
                    }
                    _ => {
                        return Err(EvalError::InvalidAssignment(
                            self.text_of(assign.span).to_string(),
                        ))
                    }
                };
                Expr::Assign {
                    op,
                    target: Box::new(target),
                    value: Box::new(self.expression(&assign.right)?),
                }
            }

            js::Expression::ArrowFunctionExpression(arrow) => Expr::Arrow(Rc::new(self.arrow(arrow)?)),
            js::Expression::AwaitExpression(await_expr) => {
                Expr::Await(Box::new(self.expression(&await_expr.argument)?))
            }

            other => return Err(self.unsupported(other.span())),
        };
        Ok(lowered)
    }

    fn text_of(&self, span: Span) -> &'s str {
        self.text
            .get(span.start as usize..span.end as usize)
            .unwrap_or_default()
    }

    fn template(&self, tpl: &js::TemplateLiteral<'_>) -> EvalResult<Vec<TemplatePart>> {
        let mut parts = Vec::with_capacity(tpl.quasis.len() + tpl.expressions.len());
        for (i, quasi) in tpl.quasis.iter().enumerate() {
            let text = quasi.value.cooked.as_ref().unwrap_or(&quasi.value.raw).to_string();
            if !text.is_empty() {
                parts.push(TemplatePart::Text(text));
            }
            if let Some(substitution) = tpl.expressions.get(i) {
                parts.push(TemplatePart::Expr(self.expression(substitution)?));
            }
        }
        Ok(parts)
    }

    fn object(&self, object: &js::ObjectExpression<'_>) -> EvalResult<Expr> {
        let mut entries = Vec::with_capacity(object.properties.len());
        for property in &object.properties {
            let js::ObjectPropertyKind::ObjectProperty(prop) = property else {
                return Err(self.unsupported(object.span));
            };
            if prop.method || !matches!(prop.kind, js::PropertyKind::Init) {
                return Err(self.unsupported(prop.span));
            }
            let key = if prop.computed {
                match prop.key.as_expression() {
                    Some(key) => PropertyKey::Computed(self.expression(key)?),
                    None => return Err(self.unsupported(prop.span)),
                }
            } else {
                match &prop.key {
                    js::PropertyKey::StaticIdentifier(id) => PropertyKey::Static(id.name.to_string()),
                    js::PropertyKey::StringLiteral(s) => PropertyKey::Static(s.value.to_string()),
                    js::PropertyKey::NumericLiteral(n) => PropertyKey::Static(format_number(n.value)),
                    _ => return Err(self.unsupported(prop.span)),
                }
            };
            entries.push((key, self.expression(&prop.value)?));
        }
        Ok(Expr::Object(entries))
    }

    fn static_member(&self, member: &js::StaticMemberExpression<'_>) -> EvalResult<Expr> {
        Ok(Expr::Member {
            object: Box::new(self.expression(&member.object)?),
            property: member.property.name.to_string(),
            optional: member.optional,
        })
    }

    fn computed_member(&self, member: &js::ComputedMemberExpression<'_>) -> EvalResult<Expr> {
        Ok(Expr::Index {
            object: Box::new(self.expression(&member.object)?),
            index: Box::new(self.expression(&member.expression)?),
            optional: member.optional,
        })
    }

    fn call(&self, call: &js::CallExpression<'_>) -> EvalResult<Expr> {
        let mut args = Vec::with_capacity(call.arguments.len());
        for arg in &call.arguments {
            match arg.as_expression() {
                Some(arg) => args.push(self.expression(arg)?),
                None => return Err(self.unsupported(call.span)),
            }
        }
        Ok(Expr::Call {
            callee: Box::new(self.expression(&call.callee)?),
            args,
            optional: call.optional,
        })
    }

    fn arrow(&self, arrow: &js::ArrowFunctionExpression<'_>) -> EvalResult<ArrowFunction> {
        if arrow.r#async || arrow.params.rest.is_some() {
            return Err(self.unsupported(arrow.span));
        }

        let mut params = Vec::with_capacity(arrow.params.items.len());
        for param in &arrow.params.items {
            let js::BindingPattern::BindingIdentifier(id) = &param.pattern else {
                return Err(self.unsupported(param.span));
            };
            params.push(id.name.to_string());
        }

        let body = if arrow.expression {
            match arrow.body.statements.first() {
                Some(js::Statement::ExpressionStatement(stmt)) => {
                    ArrowBody::Expr(Box::new(self.expression(&stmt.expression)?))
                }
                _ => return Err(self.unsupported(arrow.span)),
            }
        } else {
            ArrowBody::Block(self.statements(&arrow.body.statements)?)
        };

        Ok(ArrowFunction { params, body })
    }
}

fn binary_op(operator: BinaryOperator) -> Option<BinaryOp> {
    let op = match operator {
        BinaryOperator::Addition => BinaryOp::Add,
        BinaryOperator::Subtraction => BinaryOp::Sub,
        BinaryOperator::Multiplication => BinaryOp::Mul,
        BinaryOperator::Division => BinaryOp::Div,
        BinaryOperator::Remainder => BinaryOp::Rem,
        BinaryOperator::Exponential => BinaryOp::Pow,
        BinaryOperator::Equality => BinaryOp::Eq,
        BinaryOperator::Inequality => BinaryOp::NotEq,
        BinaryOperator::StrictEquality => BinaryOp::StrictEq,
        BinaryOperator::StrictInequality => BinaryOp::StrictNotEq,
        BinaryOperator::LessThan => BinaryOp::Lt,
        BinaryOperator::LessEqualThan => BinaryOp::LtEq,
        BinaryOperator::GreaterThan => BinaryOp::Gt,
        BinaryOperator::GreaterEqualThan => BinaryOp::GtEq,
        BinaryOperator::In => BinaryOp::In,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        match compile(source).unwrap().program {
            Program::Expression(e) => e,
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let parsed = expr("1 + 2 * 3");
        assert_eq!(
            parsed,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::Number(3.0)),
                }),
            }
        );
        // Grouping parentheses leave no trace.
        assert!(matches!(expr("(a + b) * 2"), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_optional_chains() {
        assert!(matches!(expr("user?.name"), Expr::Member { optional: true, .. }));
        assert!(matches!(expr("list?.[0]"), Expr::Index { optional: true, .. }));
        assert!(matches!(expr("run?.()"), Expr::Call { optional: true, .. }));
    }

    #[test]
    fn test_arrow_forms() {
        assert!(matches!(expr("x => x + 1"), Expr::Arrow(_)));
        assert!(matches!(expr("() => 1"), Expr::Arrow(_)));
        let Expr::Arrow(arrow) = expr("(a, b) => { return a + b; }") else {
            panic!("expected arrow");
        };
        assert_eq!(arrow.params, vec!["a", "b"]);
        assert!(matches!(arrow.body, ArrowBody::Block(ref body) if body.len() == 1));
    }

    #[test]
    fn test_object_literal() {
        let Expr::Object(entries) = expr("{ a: 1, 'b': 2, c, [k]: 3 }") else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2], (PropertyKey::Static("c".into()), Expr::Ident("c".into())));
        assert!(matches!(entries[3].0, PropertyKey::Computed(_)));
    }

    #[test]
    fn test_template_literal_parts() {
        assert_eq!(
            expr("`${n} left`"),
            Expr::Template(vec![
                TemplatePart::Expr(Expr::Ident("n".into())),
                TemplatePart::Text(" left".into()),
            ])
        );
    }

    #[test]
    fn test_statement_bodies() {
        let snippet = compile("let x = a * 2; return x + 1").unwrap();
        let Program::Statements(body) = snippet.program else {
            panic!("expected statements");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(body[1], Stmt::Return(Some(_))));

        assert!(matches!(compile("a.set(1); b.set(2)").unwrap().program, Program::Statements(_)));
        assert!(matches!(
            compile("count = count + 1").unwrap().program,
            Program::Expression(Expr::Assign { .. })
        ));
        assert!(matches!(compile("").unwrap().program, Program::Statements(ref b) if b.is_empty()));
    }

    #[test]
    fn test_outside_the_subset_is_rejected() {
        assert!(matches!(compile("a + "), Err(EvalError::Syntax(_))));
        assert!(compile("1 = 2").is_err());
        assert!(compile("a b").is_err());
        assert!(matches!(compile("new Date()"), Err(EvalError::Syntax(ref m)) if m.contains("new Date()")));
        assert!(compile("for (;;) {}").is_err());
        assert!(compile("a << 2").is_err());
    }
}
