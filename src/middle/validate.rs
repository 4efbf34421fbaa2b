//! Subset validation. The validator walks each module and rejects syntax and
//! type forms outside the compilable fragment, before any type resolution
//! happens. It uses the scope table only to recognize references to banned
//! ambient globals. A rejected declaration is skipped by the later phases;
//! the rest of the program continues.

use std::collections::BTreeSet;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    frontend::{
        Span, ast,
        resolve::{AmbientSymbol, ResolutionMap, ValueDefinitionKind, ValueNameResolution},
    },
};

pub struct ValidationOutcome {
    pub diagnostics: Vec<Diagnostic>,
    /// Top level items that produced at least one diagnostic. Later phases
    /// skip these but keep processing everything else
    pub rejected: BTreeSet<ast::NodeId>,
}

pub fn validate_module(
    module: &ast::Module,
    resolutions: &ResolutionMap,
) -> ValidationOutcome {
    let mut validator = Validator {
        resolutions,
        diagnostics: Vec::new(),
        rejected: BTreeSet::new(),
        current_item: None,
    };

    for item in &module.items {
        validator.current_item = Some(item.id);
        validator.validate_item(item);
    }

    ValidationOutcome {
        diagnostics: validator.diagnostics,
        rejected: validator.rejected,
    }
}

struct Validator<'ast> {
    resolutions: &'ast ResolutionMap,
    diagnostics: Vec<Diagnostic>,
    rejected: BTreeSet<ast::NodeId>,
    current_item: Option<ast::NodeId>,
}

impl<'ast> Validator<'ast> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(
            span,
            DiagnosticKind::UnsupportedConstruct,
            message,
        ));
        if let Some(item) = self.current_item {
            self.rejected.insert(item);
        }
    }

    fn validate_item(&mut self, item: &ast::Item) {
        match &item.kind {
            ast::ItemKind::Function(function) => self.validate_function(function, true),
            ast::ItemKind::Class(class) => self.validate_class(class),
            ast::ItemKind::Interface(interface) => {
                for field in &interface.fields {
                    self.validate_object_type_field(field);
                }
            }
            ast::ItemKind::TypeAlias(alias) => self.validate_type_annotation(&alias.ty),
            ast::ItemKind::Enum(enum_def) => self.validate_enum(enum_def),
            ast::ItemKind::Import(_) => {}
        }
    }

    fn validate_function(&mut self, function: &ast::FunctionDefinition, require_return: bool) {
        if function.is_async {
            self.error(
                function.span,
                format!(
                    "`async` functions are deferred to a later version; `{}` cannot be compiled",
                    function.name.symbol
                ),
            );
        }

        if function.is_generator {
            self.error(
                function.span,
                format!(
                    "generator functions are deferred to a later version; `{}` cannot be compiled",
                    function.name.symbol
                ),
            );
        }

        for decorator in &function.decorators {
            self.error(decorator.span, "decorators are not supported");
        }

        for parameter in &function.parameters {
            match &parameter.ty {
                None => self.error(
                    parameter.span,
                    format!("parameter `{}` must have a type annotation", parameter.name.symbol),
                ),
                Some(ty) => self.validate_type_annotation(ty),
            }
        }

        match &function.return_type {
            None if require_return => self.error(
                function.span,
                format!(
                    "function `{}` must have an explicit return type",
                    function.name.symbol
                ),
            ),
            Some(ty) => self.validate_type_annotation(ty),
            None => {}
        }

        for type_parameter in &function.type_parameters {
            if let Some(constraint) = &type_parameter.constraint {
                self.validate_type_annotation(constraint);
            }
            if let Some(default) = &type_parameter.default {
                self.validate_type_annotation(default);
            }
        }

        self.validate_block(&function.body);
    }

    fn validate_class(&mut self, class: &ast::ClassDefinition) {
        for decorator in &class.decorators {
            self.error(decorator.span, "decorators are not supported");
        }

        for field in &class.fields {
            for decorator in &field.decorators {
                self.error(decorator.span, "decorators are not supported");
            }

            if matches!(field.key, ast::PropertyKey::Computed(_)) {
                self.error(
                    field.key.span(),
                    "class field keys must be identifiers or string literals",
                );
            }

            match &field.ty {
                None => self.error(
                    field.span,
                    "class fields must have a type annotation",
                ),
                Some(ty) => self.validate_type_annotation(ty),
            }

            if let Some(initializer) = &field.initializer {
                self.validate_expression(initializer);
            }
        }

        for method in &class.methods {
            // Constructors and setters return nothing; getters and plain
            // methods need the annotation
            let require_return = matches!(
                method.kind,
                ast::MethodKind::Method | ast::MethodKind::Getter
            );
            self.validate_function(&method.function, require_return);
        }
    }

    fn validate_enum(&mut self, enum_def: &ast::EnumDefinition) {
        let mut saw_number = false;
        let mut saw_string = false;

        for member in &enum_def.members {
            match &member.initializer {
                Some(ast::EnumInitializer::Number(_)) => saw_number = true,
                Some(ast::EnumInitializer::String(_)) => saw_string = true,
                Some(ast::EnumInitializer::Computed(expr)) => {
                    self.error(
                        expr.span,
                        format!(
                            "enum member `{}` has a computed initializer; only literal values compile",
                            member.name.symbol
                        ),
                    );
                }
                // Omitted initializers auto-increment, which is numeric
                None => saw_number = true,
            }
        }

        if saw_number && saw_string {
            self.error(
                enum_def.span,
                format!(
                    "enum `{}` mixes numeric and string members",
                    enum_def.name.symbol
                ),
            );
        }
    }

    fn validate_block(&mut self, block: &ast::Block) {
        for statement in &block.statements {
            self.validate_statement(statement);
        }
    }

    fn validate_statement(&mut self, statement: &ast::Statement) {
        match &statement.kind {
            ast::StatementKind::Local(local) => self.validate_local(local),
            ast::StatementKind::Expression(expression) => self.validate_expression(expression),
            ast::StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.validate_expression(value);
                }
            }
            ast::StatementKind::If {
                condition,
                then_block,
                else_branch,
            } => {
                self.validate_expression(condition);
                self.validate_block(then_block);
                if let Some(else_branch) = else_branch {
                    self.validate_statement(else_branch);
                }
            }
            ast::StatementKind::While { condition, block } => {
                self.validate_expression(condition);
                self.validate_block(block);
            }
            ast::StatementKind::For {
                initializer,
                condition,
                update,
                block,
            } => {
                if let Some(initializer) = initializer {
                    self.validate_statement(initializer);
                }
                if let Some(condition) = condition {
                    self.validate_expression(condition);
                }
                if let Some(update) = update {
                    self.validate_expression(update);
                }
                self.validate_block(block);
            }
            ast::StatementKind::ForOf {
                binding,
                iterable,
                block,
            } => {
                self.validate_local(binding);
                self.validate_expression(iterable);
                self.validate_block(block);
            }
            ast::StatementKind::Switch {
                discriminant,
                cases,
            } => {
                self.validate_expression(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.validate_expression(test);
                    }
                    for statement in &case.body {
                        self.validate_statement(statement);
                    }
                }
            }
            ast::StatementKind::Throw(value) => self.validate_expression(value),
            ast::StatementKind::Try {
                block,
                catch,
                finally,
            } => {
                self.validate_block(block);
                if let Some(catch) = catch {
                    self.validate_block(&catch.block);
                }
                if let Some(finally) = finally {
                    self.validate_block(finally);
                }
            }
            ast::StatementKind::Block(block) => self.validate_block(block),
            ast::StatementKind::With { object, .. } => {
                self.error(statement.span, "`with` statements are not allowed");
                self.validate_expression(object);
            }
            ast::StatementKind::Break
            | ast::StatementKind::Continue
            | ast::StatementKind::Empty => {}
        }
    }

    fn validate_local(&mut self, local: &ast::Local) {
        if local.kind == ast::LocalKind::Var {
            self.error(local.span, "use `let` or `const` instead of `var`");
        }

        if let Some(ty) = &local.ty {
            self.validate_type_annotation(ty);
        }

        if let Some(initializer) = &local.initializer {
            self.validate_expression(initializer);
        }
    }

    fn validate_expression(&mut self, expression: &ast::Expression) {
        match &expression.kind {
            ast::ExpressionKind::Identifier(identifier) => {
                self.check_ambient_reference(identifier);
            }
            ast::ExpressionKind::Member {
                object, property, ..
            } => {
                let name = property.symbol.value();
                if name == "__proto__" || name == "prototype" {
                    self.error(expression.span, "prototype manipulation is not allowed");
                }

                if let Some(AmbientSymbol::Object) = self.ambient_of(object) {
                    if matches!(
                        name,
                        "defineProperty" | "setPrototypeOf" | "getPrototypeOf" | "assign"
                    ) {
                        self.error(
                            expression.span,
                            format!("`Object.{name}` has no compiled equivalent"),
                        );
                    }
                }

                self.validate_expression(object);
            }
            ast::ExpressionKind::Index { object, index } => {
                // Reverse-map lookups on enums have no runtime representation
                if let ast::ExpressionKind::Identifier(identifier) = &object.kind {
                    if let Some(ValueNameResolution::Definition(ValueDefinitionKind::Enum, _)) =
                        self.resolutions.value_name_resolutions.get(&identifier.id)
                    {
                        self.error(
                            expression.span,
                            format!(
                                "reverse lookup on enum `{}` is not supported",
                                identifier.symbol
                            ),
                        );
                    }
                }

                // String-literal keys are dynamic member access in disguise
                if let ast::ExpressionKind::Literal(literal) = &index.kind {
                    if literal.kind == ast::LiteralKind::String {
                        self.error(
                            expression.span,
                            "dynamic member access with a string key is not allowed; \
                             use a static member access",
                        );
                    }
                }

                self.validate_expression(object);
                self.validate_expression(index);
            }
            ast::ExpressionKind::Call {
                callee, arguments, ..
            } => {
                self.validate_expression(callee);
                for argument in arguments {
                    self.validate_expression(argument);
                }
            }
            ast::ExpressionKind::New { arguments, .. } => {
                for argument in arguments {
                    self.validate_expression(argument);
                }
            }
            ast::ExpressionKind::Unary { operator, operand } => {
                if *operator == ast::UnaryOperatorKind::TypeOf {
                    // Valid uses are consumed by the equality case below
                    self.error(
                        expression.span,
                        "`typeof` is only allowed when compared against a type name literal",
                    );
                }
                self.validate_expression(operand);
            }
            ast::ExpressionKind::Binary { operator, lhs, rhs } => {
                if matches!(
                    operator,
                    ast::BinaryOperatorKind::Equals | ast::BinaryOperatorKind::NotEquals
                ) {
                    // `typeof v === "..."` is the supported narrowing form;
                    // any other use of typeof falls through and is rejected
                    // by the unary case
                    let narrowing = (typeof_operand(lhs).map(|op| (op, &**rhs)))
                        .or_else(|| typeof_operand(rhs).map(|op| (op, &**lhs)));
                    if let Some((operand, other)) = narrowing {
                        if matches!(
                            &other.kind,
                            ast::ExpressionKind::Literal(lit)
                                if lit.kind == ast::LiteralKind::String
                        ) {
                            self.validate_expression(operand);
                            return;
                        }
                    }
                }

                self.validate_expression(lhs);
                self.validate_expression(rhs);
            }
            ast::ExpressionKind::Logical { lhs, rhs, .. } => {
                self.validate_expression(lhs);
                self.validate_expression(rhs);
            }
            ast::ExpressionKind::Assignment { target, value, .. } => {
                self.validate_expression(target);
                self.validate_expression(value);
            }
            ast::ExpressionKind::Conditional {
                condition,
                positive,
                negative,
            } => {
                self.validate_expression(condition);
                self.validate_expression(positive);
                self.validate_expression(negative);
            }
            ast::ExpressionKind::Arrow(arrow) => {
                if arrow.is_async {
                    self.error(arrow.span, "`async` arrow functions cannot be compiled");
                }

                for parameter in &arrow.parameters {
                    match &parameter.ty {
                        None => self.error(
                            parameter.span,
                            format!(
                                "parameter `{}` must have a type annotation",
                                parameter.name.symbol
                            ),
                        ),
                        Some(ty) => self.validate_type_annotation(ty),
                    }
                }

                match &arrow.body {
                    ast::ArrowBody::Expression(expression) => {
                        self.validate_expression(expression)
                    }
                    ast::ArrowBody::Block(block) => self.validate_block(block),
                }
            }
            ast::ExpressionKind::Template { expressions, .. } => {
                for expression in expressions {
                    self.validate_expression(expression);
                }
            }
            ast::ExpressionKind::ObjectLiteral(fields) => {
                for field in fields {
                    if matches!(field.key, ast::PropertyKey::Computed(_)) {
                        self.error(
                            field.key.span(),
                            "object literal keys must be identifiers or string literals",
                        );
                    }
                    self.validate_expression(&field.value);
                }
            }
            ast::ExpressionKind::ArrayLiteral(elements) => {
                for element in elements {
                    match element {
                        ast::ArrayElement::Expression(expression)
                        | ast::ArrayElement::Spread(expression) => {
                            self.validate_expression(expression)
                        }
                    }
                }
            }
            ast::ExpressionKind::Literal(_) | ast::ExpressionKind::This => {}
        }
    }

    fn validate_type_annotation(&mut self, ty: &ast::TypeAnnotation) {
        match &ty.kind {
            ast::TypeAnnotationKind::Rejected(keyword) => {
                self.error(ty.span, format!("the `{keyword}` type cannot be compiled"));
            }
            ast::TypeAnnotationKind::Named { arguments, .. } => {
                for argument in arguments {
                    self.validate_type_annotation(argument);
                }
            }
            ast::TypeAnnotationKind::Union(variants) => {
                for variant in variants {
                    self.validate_type_annotation(variant);
                }
            }
            ast::TypeAnnotationKind::ObjectLiteral(fields) => {
                for field in fields {
                    self.validate_object_type_field(field);
                }
            }
            ast::TypeAnnotationKind::Tuple(elements) => {
                for element in elements {
                    self.validate_type_annotation(element);
                }
            }
            ast::TypeAnnotationKind::Array(element) => self.validate_type_annotation(element),
            ast::TypeAnnotationKind::Function {
                parameters,
                return_type,
            } => {
                for parameter in parameters {
                    self.validate_type_annotation(&parameter.ty);
                }
                self.validate_type_annotation(return_type);
            }
            ast::TypeAnnotationKind::StringLiteral(_)
            | ast::TypeAnnotationKind::Null
            | ast::TypeAnnotationKind::Undefined => {}
        }
    }

    fn validate_object_type_field(&mut self, field: &ast::ObjectTypeField) {
        if matches!(field.key, ast::PropertyKey::Computed(_)) {
            self.error(
                field.key.span(),
                "object type keys must be identifiers or string literals",
            );
        }
        self.validate_type_annotation(&field.ty);
    }

    fn check_ambient_reference(&mut self, identifier: &ast::Identifier) {
        let Some(ValueNameResolution::Ambient(ambient)) =
            self.resolutions.value_name_resolutions.get(&identifier.id)
        else {
            return;
        };

        let message = match ambient {
            AmbientSymbol::Eval => "`eval` is not allowed",
            AmbientSymbol::Proxy => "`Proxy` is not supported",
            AmbientSymbol::Reflect => "`Reflect` is not supported",
            // Math/console lower to intrinsics; bare Object is harmless until
            // a banned member is accessed, which the member case catches
            AmbientSymbol::Object | AmbientSymbol::Math | AmbientSymbol::Console => return,
        };

        self.error(identifier.span, message);
    }

    fn ambient_of(&self, expression: &ast::Expression) -> Option<AmbientSymbol> {
        if let ast::ExpressionKind::Identifier(identifier) = &expression.kind {
            if let Some(ValueNameResolution::Ambient(ambient)) =
                self.resolutions.value_name_resolutions.get(&identifier.id)
            {
                return Some(*ambient);
            }
        }
        None
    }
}

/// `typeof x === "number"`: returns `x` when the comparison is the supported
/// narrowing shape
fn typeof_operand<'a>(expression: &'a ast::Expression) -> Option<&'a ast::Expression> {
    if let ast::ExpressionKind::Unary {
        operator: ast::UnaryOperatorKind::TypeOf,
        operand,
    } = &expression.kind
    {
        return Some(operand);
    }
    None
}
