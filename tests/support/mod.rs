//! Hand-assembled AST fixtures for the end-to-end tests. The builder hands
//! out fresh node ids the way the real parser would.

#![allow(dead_code)]

use std::cell::Cell;

use silt::frontend::{
    Span,
    ast::{
        ArrowBody, ArrowFunction, ArrayElement, Block, CatchClause, EnumDefinition,
        EnumInitializer, EnumMember, Expression, ExpressionKind, FileId, FunctionDefinition,
        FunctionParameter, Identifier, InterfaceDefinition, Item, ItemKind, Literal, LiteralKind,
        Local, LocalKind, Module, NodeId, ObjectLiteralField, ObjectTypeField, Pattern,
        PatternKind, PropertyKey, Statement, StatementKind, SwitchCase, TypeAlias, TypeAnnotation,
        TypeAnnotationKind, TypeParameter,
    },
    intern::InternedSymbol,
    resolve::ResolutionMap,
};
use silt::index::Index;
use silt::middle::cir;
use silt::diagnostics::Diagnostic;

pub fn sym(name: &str) -> InternedSymbol {
    InternedSymbol::new(name)
}

/// Lowers a single module built from `items` with an empty scope table
pub fn lower(items: Vec<Item>) -> Result<cir::Program, Vec<Diagnostic>> {
    let module = Module {
        file: FileId::new(0),
        items,
    };
    silt::lower_program(&silt::single_module_input(module, ResolutionMap::default()))
}

pub fn lower_expecting(items: Vec<Item>) -> cir::Program {
    match lower(items) {
        Ok(program) => program,
        Err(diagnostics) => panic!("expected lowering to succeed, got {diagnostics:#?}"),
    }
}

pub struct AstBuilder {
    next: Cell<u32>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self { next: Cell::new(0) }
    }

    fn id(&self) -> NodeId {
        let n = self.next.get();
        self.next.set(n + 1);
        NodeId(n)
    }

    pub fn ident(&self, name: &str) -> Identifier {
        Identifier {
            id: self.id(),
            span: Span::DUMMY,
            symbol: sym(name),
        }
    }

    /* Type annotations */

    pub fn ty(&self, name: &str) -> TypeAnnotation {
        self.ty_args(name, Vec::new())
    }

    pub fn ty_args(&self, name: &str, arguments: Vec<TypeAnnotation>) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::Named {
                name: self.ident(name),
                arguments,
            },
        }
    }

    pub fn union_ty(&self, variants: Vec<TypeAnnotation>) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::Union(variants),
        }
    }

    pub fn null_ty(&self) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::Null,
        }
    }

    pub fn string_lit_ty(&self, value: &str) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::StringLiteral(sym(value)),
        }
    }

    pub fn any_ty(&self) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::Rejected(
                silt::frontend::ast::RejectedTypeKeyword::Any,
            ),
        }
    }

    pub fn object_ty(&self, fields: Vec<(&str, TypeAnnotation)>) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::ObjectLiteral(
                fields
                    .into_iter()
                    .map(|(name, ty)| ObjectTypeField {
                        id: self.id(),
                        span: Span::DUMMY,
                        key: PropertyKey::Identifier(self.ident(name)),
                        ty,
                        optional: false,
                        readonly: false,
                    })
                    .collect(),
            ),
        }
    }

    pub fn fn_ty(
        &self,
        parameters: Vec<(&str, TypeAnnotation)>,
        return_type: TypeAnnotation,
    ) -> TypeAnnotation {
        TypeAnnotation {
            id: self.id(),
            span: Span::DUMMY,
            kind: TypeAnnotationKind::Function {
                parameters: parameters
                    .into_iter()
                    .map(|(name, ty)| silt::frontend::ast::FunctionTypeParameter {
                        id: self.id(),
                        span: Span::DUMMY,
                        name: self.ident(name),
                        ty,
                    })
                    .collect(),
                return_type: Box::new(return_type),
            },
        }
    }

    /* Expressions */

    fn expr(&self, kind: ExpressionKind) -> Expression {
        Expression {
            id: self.id(),
            span: Span::DUMMY,
            kind,
        }
    }

    fn literal(&self, kind: LiteralKind, text: &str) -> Expression {
        let literal = Literal {
            id: self.id(),
            span: Span::DUMMY,
            kind,
            symbol: sym(text),
        };
        self.expr(ExpressionKind::Literal(Box::new(literal)))
    }

    pub fn num(&self, text: &str) -> Expression {
        self.literal(LiteralKind::Number, text)
    }

    pub fn str_lit(&self, value: &str) -> Expression {
        self.literal(LiteralKind::String, value)
    }

    pub fn bool_lit(&self, value: bool) -> Expression {
        self.literal(LiteralKind::Boolean, if value { "true" } else { "false" })
    }

    pub fn null_lit(&self) -> Expression {
        self.literal(LiteralKind::Null, "null")
    }

    pub fn var(&self, name: &str) -> Expression {
        let identifier = self.ident(name);
        self.expr(ExpressionKind::Identifier(Box::new(identifier)))
    }

    pub fn member(&self, object: Expression, property: &str) -> Expression {
        let property = self.ident(property);
        self.expr(ExpressionKind::Member {
            object: Box::new(object),
            property,
            optional: false,
        })
    }

    pub fn call(
        &self,
        name: &str,
        type_arguments: Vec<TypeAnnotation>,
        arguments: Vec<Expression>,
    ) -> Expression {
        let callee = self.var(name);
        self.expr(ExpressionKind::Call {
            callee: Box::new(callee),
            type_arguments,
            arguments,
        })
    }

    pub fn method_call(
        &self,
        object: Expression,
        method: &str,
        arguments: Vec<Expression>,
    ) -> Expression {
        let callee = self.member(object, method);
        self.expr(ExpressionKind::Call {
            callee: Box::new(callee),
            type_arguments: Vec::new(),
            arguments,
        })
    }

    pub fn binary(
        &self,
        operator: silt::frontend::ast::BinaryOperatorKind,
        lhs: Expression,
        rhs: Expression,
    ) -> Expression {
        self.expr(ExpressionKind::Binary {
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn assign(&self, target: Expression, value: Expression) -> Expression {
        self.expr(ExpressionKind::Assignment {
            operator: None,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn compound_assign(
        &self,
        operator: silt::frontend::ast::BinaryOperatorKind,
        target: Expression,
        value: Expression,
    ) -> Expression {
        self.expr(ExpressionKind::Assignment {
            operator: Some(operator),
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn arrow_block(
        &self,
        parameters: Vec<(&str, Option<TypeAnnotation>)>,
        return_type: Option<TypeAnnotation>,
        body: Vec<Statement>,
    ) -> Expression {
        let arrow = ArrowFunction {
            id: self.id(),
            span: Span::DUMMY,
            parameters: parameters
                .into_iter()
                .map(|(name, ty)| FunctionParameter {
                    id: self.id(),
                    span: Span::DUMMY,
                    name: self.ident(name),
                    ty,
                })
                .collect(),
            return_type,
            body: ArrowBody::Block(self.block(body)),
            is_async: false,
        };
        self.expr(ExpressionKind::Arrow(Box::new(arrow)))
    }

    pub fn object_lit(&self, fields: Vec<(&str, Expression)>) -> Expression {
        self.expr(ExpressionKind::ObjectLiteral(
            fields
                .into_iter()
                .map(|(name, value)| ObjectLiteralField {
                    id: self.id(),
                    span: Span::DUMMY,
                    key: PropertyKey::Identifier(self.ident(name)),
                    value,
                })
                .collect(),
        ))
    }

    pub fn array_lit(&self, elements: Vec<Expression>) -> Expression {
        self.expr(ExpressionKind::ArrayLiteral(
            elements.into_iter().map(ArrayElement::Expression).collect(),
        ))
    }

    /* Statements */

    fn stmt(&self, kind: StatementKind) -> Statement {
        Statement {
            id: self.id(),
            span: Span::DUMMY,
            kind,
        }
    }

    pub fn expr_stmt(&self, expression: Expression) -> Statement {
        self.stmt(StatementKind::Expression(Box::new(expression)))
    }

    pub fn ret(&self, value: Option<Expression>) -> Statement {
        self.stmt(StatementKind::Return(value.map(Box::new)))
    }

    pub fn let_stmt(
        &self,
        name: &str,
        ty: Option<TypeAnnotation>,
        initializer: Option<Expression>,
    ) -> Statement {
        let pattern = Pattern {
            id: self.id(),
            span: Span::DUMMY,
            kind: PatternKind::Identifier(self.ident(name)),
        };
        self.stmt(StatementKind::Local(Box::new(Local {
            id: self.id(),
            span: Span::DUMMY,
            kind: LocalKind::Let,
            pattern,
            ty,
            initializer: initializer.map(Box::new),
        })))
    }

    pub fn if_stmt(
        &self,
        condition: Expression,
        then_block: Vec<Statement>,
        else_block: Option<Vec<Statement>>,
    ) -> Statement {
        self.stmt(StatementKind::If {
            condition: Box::new(condition),
            then_block: self.block(then_block),
            else_branch: else_block
                .map(|statements| Box::new(self.stmt(StatementKind::Block(self.block(statements))))),
        })
    }

    pub fn throw(&self, value: Expression) -> Statement {
        self.stmt(StatementKind::Throw(Box::new(value)))
    }

    pub fn try_stmt(
        &self,
        body: Vec<Statement>,
        catch: Option<(&str, Vec<Statement>)>,
        finally: Option<Vec<Statement>>,
    ) -> Statement {
        self.stmt(StatementKind::Try {
            block: self.block(body),
            catch: catch.map(|(binding, statements)| CatchClause {
                id: self.id(),
                span: Span::DUMMY,
                binding: Some(self.ident(binding)),
                block: self.block(statements),
            }),
            finally: finally.map(|statements| self.block(statements)),
        })
    }

    pub fn switch(
        &self,
        discriminant: Expression,
        cases: Vec<(Option<Expression>, Vec<Statement>)>,
    ) -> Statement {
        self.stmt(StatementKind::Switch {
            discriminant: Box::new(discriminant),
            cases: cases
                .into_iter()
                .map(|(test, body)| SwitchCase {
                    id: self.id(),
                    span: Span::DUMMY,
                    test,
                    body,
                })
                .collect(),
        })
    }

    pub fn block(&self, statements: Vec<Statement>) -> Block {
        Block {
            id: self.id(),
            span: Span::DUMMY,
            statements,
        }
    }

    /* Items */

    fn item(&self, kind: ItemKind) -> Item {
        Item {
            id: self.id(),
            span: Span::DUMMY,
            is_exported: false,
            kind,
        }
    }

    pub fn type_param(
        &self,
        name: &str,
        constraint: Option<TypeAnnotation>,
        default: Option<TypeAnnotation>,
    ) -> TypeParameter {
        TypeParameter {
            id: self.id(),
            span: Span::DUMMY,
            name: self.ident(name),
            constraint,
            default,
        }
    }

    pub fn function(
        &self,
        name: &str,
        type_parameters: Vec<TypeParameter>,
        parameters: Vec<(&str, TypeAnnotation)>,
        return_type: Option<TypeAnnotation>,
        body: Vec<Statement>,
    ) -> Item {
        self.item(ItemKind::Function(Box::new(FunctionDefinition {
            id: self.id(),
            span: Span::DUMMY,
            name: self.ident(name),
            type_parameters,
            parameters: parameters
                .into_iter()
                .map(|(name, ty)| FunctionParameter {
                    id: self.id(),
                    span: Span::DUMMY,
                    name: self.ident(name),
                    ty: Some(ty),
                })
                .collect(),
            return_type,
            body: self.block(body),
            is_async: false,
            is_generator: false,
            decorators: Vec::new(),
        })))
    }

    pub fn alias(&self, name: &str, ty: TypeAnnotation) -> Item {
        self.item(ItemKind::TypeAlias(Box::new(TypeAlias {
            id: self.id(),
            span: Span::DUMMY,
            name: self.ident(name),
            type_parameters: Vec::new(),
            ty,
        })))
    }

    pub fn interface(&self, name: &str, fields: Vec<(&str, TypeAnnotation)>) -> Item {
        self.item(ItemKind::Interface(Box::new(InterfaceDefinition {
            id: self.id(),
            span: Span::DUMMY,
            name: self.ident(name),
            type_parameters: Vec::new(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| ObjectTypeField {
                    id: self.id(),
                    span: Span::DUMMY,
                    key: PropertyKey::Identifier(self.ident(name)),
                    ty,
                    optional: false,
                    readonly: false,
                })
                .collect(),
        })))
    }

    pub fn enum_item(&self, name: &str, members: Vec<(&str, Option<EnumInitializer>)>) -> Item {
        self.item(ItemKind::Enum(Box::new(EnumDefinition {
            id: self.id(),
            span: Span::DUMMY,
            name: self.ident(name),
            is_const: false,
            members: members
                .into_iter()
                .map(|(name, initializer)| EnumMember {
                    id: self.id(),
                    span: Span::DUMMY,
                    name: self.ident(name),
                    initializer,
                })
                .collect(),
        })))
    }
}

/* Core IR inspection helpers */

/// Depth-first search for a statement satisfying the predicate
pub fn any_stmt(statements: &[cir::Stmt], predicate: &dyn Fn(&cir::Stmt) -> bool) -> bool {
    statements.iter().any(|statement| {
        if predicate(statement) {
            return true;
        }
        match statement {
            cir::Stmt::If {
                then_block,
                else_block,
                ..
            } => any_stmt(then_block, predicate) || any_stmt(else_block, predicate),
            cir::Stmt::Loop { body } => any_stmt(body, predicate),
            cir::Stmt::MatchTag { arms, default, .. } => {
                arms.iter().any(|arm| any_stmt(&arm.body, predicate))
                    || any_stmt(default, predicate)
            }
            _ => false,
        }
    })
}

/// Depth-first search for an expression satisfying the predicate
pub fn any_expr(statements: &[cir::Stmt], predicate: &dyn Fn(&cir::Expr) -> bool) -> bool {
    fn expr_matches(value: &cir::Expr, predicate: &dyn Fn(&cir::Expr) -> bool) -> bool {
        if predicate(value) {
            return true;
        }
        match &value.kind {
            cir::ExprKind::Field { base, .. } | cir::ExprKind::TagOf(base) => {
                expr_matches(base, predicate)
            }
            cir::ExprKind::Index { base, index } => {
                expr_matches(base, predicate) || expr_matches(index, predicate)
            }
            cir::ExprKind::Call { arguments, callee } => {
                let in_callee = match callee {
                    cir::Callee::Value(target) => expr_matches(target, predicate),
                    _ => false,
                };
                in_callee || arguments.iter().any(|a| expr_matches(a, predicate))
            }
            cir::ExprKind::Unary { operand, .. } => expr_matches(operand, predicate),
            cir::ExprKind::Binary { lhs, rhs, .. } => {
                expr_matches(lhs, predicate) || expr_matches(rhs, predicate)
            }
            cir::ExprKind::StructLiteral { fields, .. } => {
                fields.iter().any(|f| expr_matches(f, predicate))
            }
            cir::ExprKind::ArrayLiteral { elements, .. }
            | cir::ExprKind::TupleLiteral(elements) => {
                elements.iter().any(|e| expr_matches(e, predicate))
            }
            cir::ExprKind::UnionLiteral { payload, .. } => expr_matches(payload, predicate),
            cir::ExprKind::OptionLiteral(inner) => inner
                .as_ref()
                .map(|inner| expr_matches(inner, predicate))
                .unwrap_or(false),
            cir::ExprKind::ResultLiteral { value, .. } => value
                .as_ref()
                .map(|value| expr_matches(value, predicate))
                .unwrap_or(false),
            cir::ExprKind::PayloadOf { value, .. } => expr_matches(value, predicate),
            cir::ExprKind::StringConcat(parts) => {
                parts.iter().any(|p| expr_matches(p, predicate))
            }
            _ => false,
        }
    }

    any_stmt(statements, &|statement| {
        let values: Vec<&cir::Expr> = match statement {
            cir::Stmt::Let { value: Some(v), .. } => vec![v],
            cir::Stmt::Assign { value, .. } => vec![value],
            cir::Stmt::Expr(value) => vec![value],
            cir::Stmt::Return(Some(value)) => vec![value],
            cir::Stmt::If { condition, .. } => vec![condition],
            cir::Stmt::MatchTag { scrutinee, .. } => vec![scrutinee],
            _ => Vec::new(),
        };
        values.into_iter().any(|value| expr_matches(value, predicate))
    })
}
