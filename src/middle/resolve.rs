//! Type resolution: walks surface type annotations and produces Core IR
//! types, registering structs, unions, and enums into the shared tables along
//! the way.
//!
//! Structural identity is enforced at the struct table: two shapes with the
//! same canonical field signature share one entry. Union annotations are
//! classified into options, string-literal enums, widened numerics,
//! discriminated unions, and auto-tagged unions, in that order. Cycles among
//! named types are tolerated only when the cycle crosses a `Weak` edge.

use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::Itertools;
use strum::{Display, EnumString};

use crate::{
    diagnostics::DiagnosticKind,
    frontend::{Span, ast, intern::InternedSymbol},
    middle::{
        context::{GenericTypeDef, LoweringContext, TypeItemAst},
        monomorph,
        ty::{
            FloatWidth, IntWidth, StructField, StructId, Type, TypeKind, UnionDef, UnionVariant,
            widen_numeric,
        },
    },
};

/// Bindings from type parameter names to concrete types, in effect while
/// resolving inside an instantiated generic definition
pub type TypeParamEnv = BTreeMap<InternedSymbol, Type>;

/// What surrounds an anonymous object shape; decides its synthesized name
#[derive(Debug, Clone, Copy)]
pub enum NameContext {
    UnionVariant {
        union: InternedSymbol,
        index: usize,
    },
    FunctionParam {
        function: InternedSymbol,
        param: InternedSymbol,
    },
    VariableInit {
        variable: InternedSymbol,
    },
    None,
}

/// The surface spellings of primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SurfacePrimitive {
    Number,
    Boolean,
    String,
    Void,
    Never,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

pub struct TypeResolver<'ctx, 'ast> {
    pub ctx: &'ctx mut LoweringContext<'ast>,
    /// Named types currently being resolved, with the weak depth at entry;
    /// how cycles are caught
    resolving: Vec<(InternedSymbol, u32)>,
    /// Number of `Weak` wrappers crossed on the current resolution path
    weak_depth: u32,
    /// Structs pre-allocated to break weak cycles; their fields are patched
    /// once resolution of the cycle completes
    placeholders: BTreeMap<InternedSymbol, StructId>,
}

/// Registers every named type declaration of a module: generic definitions
/// are retained as raw AST, the rest resolve eagerly in declaration order
pub fn register_module_types<'ast>(
    ctx: &mut LoweringContext<'ast>,
    module: &'ast ast::Module,
    rejected: &std::collections::BTreeSet<ast::NodeId>,
) {
    // First pass: collect raw ASTs so forward references resolve on demand
    for item in &module.items {
        if rejected.contains(&item.id) {
            continue;
        }

        match &item.kind {
            ast::ItemKind::Interface(interface) => {
                if interface.type_parameters.is_empty() {
                    ctx.type_item_asts
                        .insert(interface.name.symbol, TypeItemAst::Interface(interface));
                } else {
                    ctx.generic_types
                        .insert(interface.name.symbol, GenericTypeDef::Interface(interface));
                }
            }
            ast::ItemKind::TypeAlias(alias) => {
                if alias.type_parameters.is_empty() {
                    ctx.type_item_asts
                        .insert(alias.name.symbol, TypeItemAst::Alias(alias));
                } else {
                    ctx.generic_types
                        .insert(alias.name.symbol, GenericTypeDef::Alias(alias));
                }
            }
            ast::ItemKind::Class(class) => {
                ctx.type_item_asts
                    .insert(class.name.symbol, TypeItemAst::Class(class));
            }
            ast::ItemKind::Enum(enum_def) => register_enum(ctx, enum_def),
            ast::ItemKind::Function(function) => {
                if !function.type_parameters.is_empty() {
                    ctx.generic_functions
                        .insert(function.name.symbol, function);
                } else {
                    ctx.function_asts.insert(function.name.symbol, function);
                }
            }
            ast::ItemKind::Import(_) => {}
        }
    }

    // Second pass: force every non-generic named type
    for item in &module.items {
        if rejected.contains(&item.id) {
            continue;
        }

        let name = match &item.kind {
            ast::ItemKind::Interface(i) if i.type_parameters.is_empty() => i.name.symbol,
            ast::ItemKind::TypeAlias(a) if a.type_parameters.is_empty() => a.name.symbol,
            ast::ItemKind::Class(c) => c.name.symbol,
            _ => continue,
        };

        let mut resolver = TypeResolver::new(ctx);
        resolver.resolve_named(name, item.span);
    }
}

/// Enums compile to `Integer(32)`. Numeric members use their literal value,
/// auto-incrementing after the previous explicit one; string members get
/// sequential tags with the string retained for compile-time equality only
fn register_enum<'ast>(ctx: &mut LoweringContext<'ast>, enum_def: &'ast ast::EnumDefinition) {
    use crate::middle::ty::{EnumDef, EnumVariantDef};

    let mut variants = Vec::new();
    let mut next_numeric: i64 = 0;

    for (index, member) in enum_def.members.iter().enumerate() {
        let (tag, string_value) = match &member.initializer {
            Some(ast::EnumInitializer::Number(value)) => {
                next_numeric = *value;
                (*value, None)
            }
            Some(ast::EnumInitializer::String(value)) => (index as i64, Some(*value)),
            // Computed initializers were rejected by the validator
            Some(ast::EnumInitializer::Computed(_)) => continue,
            None => (next_numeric, None),
        };
        next_numeric = tag + 1;

        variants.push(EnumVariantDef {
            name: member.name.symbol,
            tag,
            string_value,
        });
    }

    ctx.enums.insert(
        enum_def.name.symbol,
        EnumDef {
            name: enum_def.name.symbol,
            variants,
            is_const: enum_def.is_const,
        },
    );

    let tag_type = ctx.get_tag_type();
    ctx.named_types.insert(enum_def.name.symbol, tag_type);
}

impl<'ctx, 'ast> TypeResolver<'ctx, 'ast> {
    pub fn new(ctx: &'ctx mut LoweringContext<'ast>) -> Self {
        Self {
            ctx,
            resolving: Vec::new(),
            weak_depth: 0,
            placeholders: BTreeMap::new(),
        }
    }

    /// Resolves a surface annotation to a Core IR type
    pub fn resolve_annotation(
        &mut self,
        ty: &ast::TypeAnnotation,
        env: &TypeParamEnv,
        name_ctx: NameContext,
    ) -> Type {
        match &ty.kind {
            ast::TypeAnnotationKind::Named { name, arguments } => {
                self.resolve_named_annotation(ty.span, name, arguments, env)
            }
            ast::TypeAnnotationKind::Union(variants) => {
                self.resolve_union(ty.span, variants, env, name_ctx)
            }
            ast::TypeAnnotationKind::ObjectLiteral(fields) => {
                let ty = self.resolve_object_shape(fields, env, name_ctx);
                self.ctx.intern_type(ty)
            }
            ast::TypeAnnotationKind::Tuple(elements) => {
                let elements: Vec<Type> = elements
                    .iter()
                    .map(|e| self.resolve_annotation(e, env, NameContext::None))
                    .collect();
                self.ctx.intern_type(TypeKind::Tuple(elements.into()))
            }
            ast::TypeAnnotationKind::Array(element) => {
                let element = self.resolve_annotation(element, env, NameContext::None);
                self.ctx.get_array_type(element)
            }
            ast::TypeAnnotationKind::Function {
                parameters,
                return_type,
            } => {
                let parameters: Vec<Type> = parameters
                    .iter()
                    .map(|p| self.resolve_annotation(&p.ty, env, NameContext::None))
                    .collect();
                let return_type = self.resolve_annotation(return_type, env, NameContext::None);
                self.ctx.get_function_type(parameters, return_type)
            }
            // A string-literal type outside a union or discriminant position
            // is just a string
            ast::TypeAnnotationKind::StringLiteral(_) => self.ctx.get_string_type(),
            // Bare null/undefined only make sense inside unions; alone they
            // carry no value
            ast::TypeAnnotationKind::Null | ast::TypeAnnotationKind::Undefined => {
                self.ctx.get_void_type()
            }
            // The validator already rejected these; poison so lowering can
            // continue over the rest of the program
            ast::TypeAnnotationKind::Rejected(_) => self.ctx.get_error_type(),
        }
    }

    fn resolve_named_annotation(
        &mut self,
        span: Span,
        name: &ast::Identifier,
        arguments: &[ast::TypeAnnotation],
        env: &TypeParamEnv,
    ) -> Type {
        // Type parameters in scope shadow everything
        if let Some(bound) = env.get(&name.symbol) {
            return bound.clone();
        }

        if let Ok(primitive) = SurfacePrimitive::from_str(name.symbol.value()) {
            return self.primitive_type(primitive);
        }

        match name.symbol.value() {
            "Array" => {
                let element = self.resolve_single_argument(span, arguments, env);
                return self.ctx.get_array_type(element);
            }
            "Option" => {
                let inner = self.resolve_single_argument(span, arguments, env);
                return self.ctx.get_option_type(inner);
            }
            "Result" => {
                let resolved: Vec<_> = arguments
                    .iter()
                    .map(|a| self.resolve_annotation(a, env, NameContext::None))
                    .collect();
                let mut args = resolved.into_iter();
                let ok = args.next().unwrap_or_else(|| self.ctx.get_void_type());
                let err = args.next().unwrap_or_else(|| self.ctx.get_void_type());
                return self.ctx.get_result_type(ok, err);
            }
            // Read-only is a borrow contract, not a distinct representation
            "Readonly" => return self.resolve_single_argument(span, arguments, env),
            // Weakness is recorded on the enclosing field; the pointee type
            // is unchanged. Crossing the wrapper legitimizes cycles
            "Weak" => {
                self.weak_depth += 1;
                let inner = self.resolve_single_argument(span, arguments, env);
                self.weak_depth -= 1;
                return inner;
            }
            _ => {}
        }

        if self.ctx.generic_types.contains_key(&name.symbol) {
            return self.instantiate_generic_type(span, name.symbol, arguments, env);
        }

        self.resolve_named(name.symbol, span)
    }

    fn resolve_single_argument(
        &mut self,
        span: Span,
        arguments: &[ast::TypeAnnotation],
        env: &TypeParamEnv,
    ) -> Type {
        match arguments.first() {
            Some(argument) => self.resolve_annotation(argument, env, NameContext::None),
            None => {
                self.ctx.error(
                    span,
                    DiagnosticKind::TypeMismatch,
                    "expected exactly one type argument",
                );
                self.ctx.get_error_type()
            }
        }
    }

    fn primitive_type(&mut self, primitive: SurfacePrimitive) -> Type {
        match primitive {
            SurfacePrimitive::Number | SurfacePrimitive::F64 => {
                self.ctx.get_float_type(FloatWidth::W64)
            }
            SurfacePrimitive::F32 => self.ctx.get_float_type(FloatWidth::W32),
            SurfacePrimitive::Boolean => self.ctx.get_bool_type(),
            SurfacePrimitive::String => self.ctx.get_string_type(),
            SurfacePrimitive::Void => self.ctx.get_void_type(),
            SurfacePrimitive::Never => self.ctx.intern_type(TypeKind::Never),
            SurfacePrimitive::I8 => self.ctx.get_int_type(IntWidth::W8, true),
            SurfacePrimitive::I16 => self.ctx.get_int_type(IntWidth::W16, true),
            SurfacePrimitive::I32 => self.ctx.get_int_type(IntWidth::W32, true),
            SurfacePrimitive::I64 => self.ctx.get_int_type(IntWidth::W64, true),
            SurfacePrimitive::U8 => self.ctx.get_int_type(IntWidth::W8, false),
            SurfacePrimitive::U16 => self.ctx.get_int_type(IntWidth::W16, false),
            SurfacePrimitive::U32 => self.ctx.get_int_type(IntWidth::W32, false),
            SurfacePrimitive::U64 => self.ctx.get_int_type(IntWidth::W64, false),
        }
    }

    /// Resolves a reference to a named, non-generic type declaration
    pub fn resolve_named(&mut self, name: InternedSymbol, span: Span) -> Type {
        if let Some(ty) = self.ctx.named_types.get(&name) {
            return ty.clone();
        }

        if let Some(position) = self.resolving.iter().position(|(n, _)| *n == name) {
            let weak_at_entry = self.resolving[position].1;
            if self.weak_depth > weak_at_entry {
                // The cycle crosses a Weak edge: pre-allocate the struct so
                // the back-edge has a handle, and patch its fields later
                let id = self.ctx.struct_defs.push(crate::middle::ty::StructDef {
                    name,
                    fields: Vec::new(),
                });
                self.placeholders.insert(name, id);
                let ty = self.ctx.struct_type(id);
                self.ctx.named_types.insert(name, ty.clone());
                return ty;
            }

            self.ctx.error(
                span,
                DiagnosticKind::CycleError,
                format!("type `{name}` is part of a cycle with no `Weak` edge"),
            );
            return self.ctx.get_error_type();
        }

        let Some(item) = self.ctx.type_item_asts.get(&name).copied() else {
            self.ctx.error(
                span,
                DiagnosticKind::UnknownSymbol,
                format!("unknown type `{name}`"),
            );
            return self.ctx.get_error_type();
        };

        self.resolving.push((name, self.weak_depth));
        let resolved = self.resolve_type_item(name, item);
        self.resolving.pop();

        // A weak cycle through this name allocated a placeholder; patch its
        // fields with the now-complete shape and keep that handle
        if let Some(placeholder) = self.placeholders.remove(&name) {
            if let TypeKind::Struct(resolved_id) = &*resolved {
                let fields = self.ctx.struct_defs[*resolved_id].fields.clone();
                self.ctx.struct_defs[placeholder].fields = fields;
            }
            return self.ctx.named_types[&name].clone();
        }

        self.ctx.named_types.insert(name, resolved.clone());
        resolved
    }

    fn resolve_type_item(&mut self, name: InternedSymbol, item: TypeItemAst<'ast>) -> Type {
        let env = TypeParamEnv::new();

        match item {
            TypeItemAst::Interface(interface) => {
                let kind = self.resolve_named_shape(name, &interface.fields, &env);
                self.ctx.intern_type(kind)
            }
            TypeItemAst::Class(class) => {
                let mut fields = Vec::with_capacity(class.fields.len());
                let mut literal_fields = Vec::new();

                for field in &class.fields {
                    let Some(field_name) = field.key.symbol() else {
                        continue;
                    };

                    let ty = match &field.ty {
                        Some(ast::TypeAnnotation {
                            kind: ast::TypeAnnotationKind::StringLiteral(value),
                            ..
                        }) => {
                            literal_fields.push((field_name, *value));
                            self.ctx.get_string_type()
                        }
                        Some(ty) => self.resolve_annotation(ty, &env, NameContext::None),
                        None => self.ctx.get_error_type(),
                    };

                    fields.push(StructField {
                        name: field_name,
                        ty,
                        weak: field
                            .ty
                            .as_ref()
                            .map(is_weak_annotation)
                            .unwrap_or(false),
                        readonly: field.readonly,
                    });
                }

                let id = self.ctx.intern_struct(name, fields);
                self.record_literal_fields(id, literal_fields);
                self.ctx.struct_type(id)
            }
            // An alias of an object shape or union donates its name to the
            // entity; anything else resolves transparently
            TypeItemAst::Alias(alias) => match &alias.ty.kind {
                ast::TypeAnnotationKind::ObjectLiteral(fields) => {
                    let kind = self.resolve_named_shape(name, fields, &env);
                    self.ctx.intern_type(kind)
                }
                _ => self.resolve_annotation(
                    &alias.ty,
                    &env,
                    NameContext::VariableInit { variable: name },
                ),
            },
        }
    }

    /// Resolves an object shape that carries a declared name
    fn resolve_named_shape(
        &mut self,
        name: InternedSymbol,
        fields: &[ast::ObjectTypeField],
        env: &TypeParamEnv,
    ) -> TypeKind {
        let (resolved, literal_fields) = self.resolve_shape_fields(fields, env);
        let id = self.ctx.intern_struct(name, resolved);
        self.record_literal_fields(id, literal_fields);
        TypeKind::Struct(id)
    }

    /// Resolves an anonymous object shape, synthesizing its name from context
    fn resolve_object_shape(
        &mut self,
        fields: &[ast::ObjectTypeField],
        env: &TypeParamEnv,
        name_ctx: NameContext,
    ) -> TypeKind {
        let (resolved, literal_fields) = self.resolve_shape_fields(fields, env);

        let name = match name_ctx {
            NameContext::UnionVariant { union, index } => {
                InternedSymbol::new(&format!("{union}${index}"))
            }
            NameContext::FunctionParam { function, param } => {
                InternedSymbol::new(&format!("{function}${param}"))
            }
            NameContext::VariableInit { variable } => {
                InternedSymbol::new(&format!("{variable}$type"))
            }
            NameContext::None => {
                let description = resolved
                    .iter()
                    .map(|f| {
                        format!(
                            "{}_{}",
                            f.name,
                            monomorph::type_segment(&f.ty, self.ctx)
                        )
                    })
                    .join("$");
                InternedSymbol::new(&format!("__anon${description}"))
            }
        };

        let id = self.ctx.intern_struct(name, resolved);
        self.record_literal_fields(id, literal_fields);
        TypeKind::Struct(id)
    }

    fn resolve_shape_fields(
        &mut self,
        fields: &[ast::ObjectTypeField],
        env: &TypeParamEnv,
    ) -> (Vec<StructField>, Vec<(InternedSymbol, InternedSymbol)>) {
        let mut resolved = Vec::with_capacity(fields.len());
        let mut literal_fields = Vec::new();

        for field in fields {
            let Some(field_name) = field.key.symbol() else {
                // Computed keys were rejected by the validator
                continue;
            };

            // A string-literal field type is a discriminant candidate: the
            // runtime type is string, the value is compile-time data
            let mut ty = match &field.ty.kind {
                ast::TypeAnnotationKind::StringLiteral(value) => {
                    literal_fields.push((field_name, *value));
                    self.ctx.get_string_type()
                }
                _ => self.resolve_annotation(&field.ty, env, NameContext::None),
            };
            if field.optional {
                ty = self.ctx.get_option_type(ty);
            }

            resolved.push(StructField {
                name: field_name,
                ty,
                weak: is_weak_annotation(&field.ty),
                readonly: field.readonly,
            });
        }

        (resolved, literal_fields)
    }

    fn record_literal_fields(
        &mut self,
        id: StructId,
        literal_fields: Vec<(InternedSymbol, InternedSymbol)>,
    ) {
        for (field, value) in literal_fields {
            self.ctx.string_literal_fields.insert((id, field), value);
        }
    }

    /* Union classification */

    fn resolve_union(
        &mut self,
        span: Span,
        variants: &[ast::TypeAnnotation],
        env: &TypeParamEnv,
        name_ctx: NameContext,
    ) -> Type {
        let union_name = match name_ctx {
            NameContext::VariableInit { variable } => Some(variable),
            _ => None,
        };

        // Rule 1: collapse nullability into Option
        let mut has_null = false;
        let mut value_variants: Vec<&ast::TypeAnnotation> = Vec::new();

        for variant in variants {
            match &variant.kind {
                ast::TypeAnnotationKind::Null | ast::TypeAnnotationKind::Undefined => {
                    has_null = true
                }
                _ => value_variants.push(variant),
            }
        }

        if value_variants.is_empty() {
            return self.ctx.get_void_type();
        }

        if has_null && value_variants.len() == 1 {
            let inner = self.resolve_annotation(value_variants[0], env, NameContext::None);
            return self.ctx.get_option_type(inner);
        }

        if value_variants.len() == 1 {
            return self.resolve_annotation(value_variants[0], env, name_ctx);
        }

        // Rule 2: all string literals compile to i32 with a retained mapping
        if value_variants
            .iter()
            .all(|v| matches!(v.kind, ast::TypeAnnotationKind::StringLiteral(_)))
        {
            for variant in &value_variants {
                if let ast::TypeAnnotationKind::StringLiteral(value) = &variant.kind {
                    self.ctx.string_tag(*value);
                }
            }
            let ty = self.ctx.get_tag_type();
            return if has_null {
                self.ctx.get_option_type(ty)
            } else {
                ty
            };
        }

        let resolved: Vec<(Type, Span)> = value_variants
            .iter()
            .enumerate()
            .map(|(index, variant)| {
                let name_ctx = match union_name {
                    Some(union) => NameContext::UnionVariant { union, index },
                    None => NameContext::None,
                };
                (self.resolve_annotation(variant, env, name_ctx), variant.span)
            })
            .collect();

        // Rule 3: numeric unions widen with no tag stored
        if resolved.iter().all(|(ty, _)| ty.is_numeric()) {
            let mut widened = (*resolved[0].0).clone();
            for (ty, _) in &resolved[1..] {
                widened = widen_numeric(&widened, ty)
                    .expect("all variants are numeric, so widening cannot fail");
            }
            let ty = self.ctx.intern_type(widened);
            return if has_null {
                self.ctx.get_option_type(ty)
            } else {
                ty
            };
        }

        let union_name = union_name.unwrap_or_else(|| {
            let description = resolved
                .iter()
                .map(|(ty, _)| monomorph::type_segment(ty, self.ctx))
                .join("$");
            InternedSymbol::new(&format!("__union${description}"))
        });

        // Rule 4: discriminated union over struct variants
        match self.try_discriminated_union(span, union_name, &resolved) {
            DiscriminantSearch::Found(ty) => return ty,
            DiscriminantSearch::Ambiguous => {
                // Diagnostic already emitted; fall through to auto-tagging so
                // lowering can continue
            }
            DiscriminantSearch::NotApplicable => {}
        }

        // Rule 5: auto-tagged union, fresh tags in declaration order
        let variants = resolved
            .iter()
            .enumerate()
            .map(|(index, (ty, _))| UnionVariant {
                tag: index as u32,
                discriminant: None,
                payload: ty.clone(),
            })
            .collect();

        let id = self.ctx.register_union(UnionDef {
            name: union_name,
            tag_width: IntWidth::W32,
            variants,
            discriminant_field: None,
        });

        let ty = self.ctx.union_type(id);
        if has_null {
            self.ctx.get_option_type(ty)
        } else {
            ty
        }
    }

    /// Rule 4: if every variant is a struct and exactly one field is a
    /// string-literal discriminant unique per variant, produce a tagged union
    /// with the discriminant stripped from each payload
    fn try_discriminated_union(
        &mut self,
        span: Span,
        union_name: InternedSymbol,
        resolved: &[(Type, Span)],
    ) -> DiscriminantSearch {
        let mut struct_ids = Vec::with_capacity(resolved.len());
        for (ty, _) in resolved {
            match &**ty {
                TypeKind::Struct(id) => struct_ids.push(*id),
                _ => return DiscriminantSearch::NotApplicable,
            }
        }

        // Candidate fields: string-literal typed in every variant
        let first_fields: Vec<InternedSymbol> = self.ctx.struct_defs[struct_ids[0]]
            .fields
            .iter()
            .map(|f| f.name)
            .filter(|name| {
                self.ctx
                    .string_literal_fields
                    .contains_key(&(struct_ids[0], *name))
            })
            .collect();

        let mut candidates = Vec::new();
        'field: for field_name in first_fields {
            let mut seen = Vec::new();
            for id in &struct_ids {
                match self.ctx.string_literal_fields.get(&(*id, field_name)) {
                    Some(value) => {
                        if seen.contains(value) {
                            self.ctx.error(
                                span,
                                DiagnosticKind::DiscriminantAmbiguous,
                                format!(
                                    "discriminant field `{field_name}` has the duplicate \
                                     value \"{value}\" in union `{union_name}`"
                                ),
                            );
                            return DiscriminantSearch::Ambiguous;
                        }
                        seen.push(*value);
                    }
                    None => continue 'field,
                }
            }
            candidates.push(field_name);
        }

        let discriminant_field = match candidates.as_slice() {
            [] => return DiscriminantSearch::NotApplicable,
            [single] => *single,
            _ => {
                self.ctx.error(
                    span,
                    DiagnosticKind::DiscriminantAmbiguous,
                    format!(
                        "union `{union_name}` has more than one candidate discriminant \
                         field ({})",
                        candidates.iter().join(", ")
                    ),
                );
                return DiscriminantSearch::Ambiguous;
            }
        };

        // Build payload structs with the discriminant stripped
        let mut variants = Vec::with_capacity(struct_ids.len());
        for (index, id) in struct_ids.iter().enumerate() {
            let discriminant = self.ctx.string_literal_fields[&(*id, discriminant_field)];
            let payload_fields: Vec<StructField> = self.ctx.struct_defs[*id]
                .fields
                .iter()
                .filter(|f| f.name != discriminant_field)
                .cloned()
                .collect();

            let payload_name = InternedSymbol::new(&format!("{union_name}${index}"));
            let payload_id = self.ctx.intern_struct(payload_name, payload_fields);
            let payload = self.ctx.struct_type(payload_id);

            variants.push(UnionVariant {
                tag: index as u32,
                discriminant: Some(discriminant),
                payload,
            });
        }

        let id = self.ctx.register_union(UnionDef {
            name: union_name,
            tag_width: IntWidth::W32,
            variants,
            discriminant_field: Some(discriminant_field),
        });

        DiscriminantSearch::Found(self.ctx.union_type(id))
    }

    /* Generic type instantiation */

    fn instantiate_generic_type(
        &mut self,
        span: Span,
        name: InternedSymbol,
        arguments: &[ast::TypeAnnotation],
        env: &TypeParamEnv,
    ) -> Type {
        let def = self.ctx.generic_types[&name];

        let type_parameters: &[ast::TypeParameter] = match def {
            GenericTypeDef::Alias(alias) => &alias.type_parameters,
            GenericTypeDef::Interface(interface) => &interface.type_parameters,
        };

        let resolved_arguments: Vec<Type> = arguments
            .iter()
            .map(|a| self.resolve_annotation(a, env, NameContext::None))
            .collect();

        let Some(bindings) = monomorph::bind_type_parameters(
            self.ctx,
            span,
            name,
            type_parameters,
            &resolved_arguments,
        ) else {
            return self.ctx.get_error_type();
        };

        let mangled = InternedSymbol::new(&monomorph::mangle(
            name.value(),
            &resolved_arguments,
            self.ctx,
        ));

        if let Some(existing) = self.ctx.named_types.get(&mangled) {
            return existing.clone();
        }

        if self.ctx.mono_depth >= monomorph::MAX_INSTANTIATION_DEPTH {
            self.ctx.error(
                span,
                DiagnosticKind::RecursiveGenericDepth,
                format!(
                    "instantiating `{name}` exceeds the maximum nesting depth of {}",
                    monomorph::MAX_INSTANTIATION_DEPTH
                ),
            );
            return self.ctx.get_error_type();
        }

        self.ctx.mono_depth += 1;
        let resolved = match def {
            GenericTypeDef::Alias(alias) => match &alias.ty.kind {
                ast::TypeAnnotationKind::ObjectLiteral(fields) => {
                    let kind = self.resolve_named_shape(mangled, fields, &bindings);
                    self.ctx.intern_type(kind)
                }
                _ => self.resolve_annotation(
                    &alias.ty,
                    &bindings,
                    NameContext::VariableInit { variable: mangled },
                ),
            },
            GenericTypeDef::Interface(interface) => {
                let kind = self.resolve_named_shape(mangled, &interface.fields, &bindings);
                self.ctx.intern_type(kind)
            }
        };
        self.ctx.mono_depth -= 1;

        self.ctx.named_types.insert(mangled, resolved.clone());
        resolved
    }
}

enum DiscriminantSearch {
    Found(Type),
    Ambiguous,
    NotApplicable,
}

/// Whether an annotation is a `Weak<...>` wrapper at the top level
fn is_weak_annotation(ty: &ast::TypeAnnotation) -> bool {
    matches!(
        &ty.kind,
        ast::TypeAnnotationKind::Named { name, .. } if name.symbol.value() == "Weak"
    )
}

/// Whether an annotation is a `Readonly<...>` wrapper at the top level
pub fn is_readonly_annotation(ty: &ast::TypeAnnotation) -> bool {
    matches!(
        &ty.kind,
        ast::TypeAnnotationKind::Named { name, .. } if name.symbol.value() == "Readonly"
    )
}
