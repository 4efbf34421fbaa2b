//! Generic monomorphization: every use of a type-parameterized definition is
//! resolved to a concrete instance with a mangled name. Instances are created
//! on demand — a generic that is never applied leaves nothing behind — and
//! appended to a FIFO work queue that the pipeline drains, so instantiation
//! order is deterministic. Instantiating a body can trigger further
//! instantiations; the shared depth counter bounds the recursion.
//!
//! The mangled-name grammar is part of the ABI contract with the backend:
//!
//! ```text
//! Name     := Ident ("$" Segment)*
//! Segment  := Ident | PrimitiveTag | "Array" "$" Segment | Ident ("$" Segment)+
//! ```
//!
//! `$` is forbidden in source identifiers, so mangled names can never collide
//! with user names.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    diagnostics::DiagnosticKind,
    frontend::{Span, ast, intern::InternedSymbol},
    middle::{
        context::{LoweringContext, MonoWorkItem},
        desugar,
        resolve::{NameContext, TypeParamEnv, TypeResolver},
        ty::{FloatWidth, Type, TypeKind, widen_numeric},
    },
};

/// Nested instantiation depth limit; prevents infinite expansion from
/// definitions like `f<T>(x) = f<Array<T>>(...)`
pub const MAX_INSTANTIATION_DEPTH: u32 = 64;

/// Computes the mangled name for `base` instantiated at `args`
pub fn mangle(base: &str, args: &[Type], ctx: &LoweringContext<'_>) -> String {
    if args.is_empty() {
        return base.to_string();
    }

    let segments = args.iter().map(|arg| type_segment(arg, ctx)).join("$");
    format!("{base}${segments}")
}

/// The mangled segment for one type argument, recursing through nested
/// generic shapes (`Map<String, Array<Int32>>` becomes `Map$String$Array$Int32`)
pub fn type_segment(ty: &Type, ctx: &LoweringContext<'_>) -> String {
    match &**ty {
        TypeKind::Bool => "Bool".to_string(),
        TypeKind::Void => "Void".to_string(),
        TypeKind::Never => "Never".to_string(),
        TypeKind::String => "String".to_string(),
        TypeKind::Integer { width, signed } => {
            if *signed {
                format!("Int{}", width.bits())
            } else {
                format!("UInt{}", width.bits())
            }
        }
        TypeKind::Float(FloatWidth::W32) => "Float32".to_string(),
        TypeKind::Float(FloatWidth::W64) => "Float64".to_string(),
        TypeKind::Struct(id) => ctx.struct_defs[*id].name.value().to_string(),
        TypeKind::Union(id) => ctx.union_defs[*id].name.value().to_string(),
        TypeKind::Array(element) => format!("Array${}", type_segment(element, ctx)),
        TypeKind::Option(inner) => format!("Option${}", type_segment(inner, ctx)),
        TypeKind::Result { ok, err } => format!(
            "Result${}${}",
            type_segment(ok, ctx),
            type_segment(err, ctx)
        ),
        TypeKind::Tuple(elements) => {
            let segments = elements.iter().map(|e| type_segment(e, ctx)).join("$");
            format!("Tuple${segments}")
        }
        TypeKind::Function {
            parameters,
            return_type,
        } => {
            let segments = parameters
                .iter()
                .chain(std::iter::once(return_type))
                .map(|p| type_segment(p, ctx))
                .join("$");
            format!("Fn${segments}")
        }
        // Only reachable after a diagnostic was already emitted
        TypeKind::Error => "error".to_string(),
    }
}

/// Binds every type parameter to a concrete type: explicit/inferred arguments
/// first, then declared defaults. An unbound parameter or a violated
/// constraint fails the instantiation with a diagnostic
pub fn bind_type_parameters<'ast>(
    ctx: &mut LoweringContext<'ast>,
    span: Span,
    name: InternedSymbol,
    parameters: &'ast [ast::TypeParameter],
    arguments: &[Type],
) -> Option<TypeParamEnv> {
    let mut bindings = TypeParamEnv::new();

    for (index, parameter) in parameters.iter().enumerate() {
        let bound = match arguments.get(index) {
            Some(ty) if !matches!(&**ty, TypeKind::Error) => ty.clone(),
            _ => match &parameter.default {
                Some(default) => {
                    let mut resolver = TypeResolver::new(ctx);
                    resolver.resolve_annotation(default, &bindings, NameContext::None)
                }
                None => {
                    ctx.error(
                        span,
                        DiagnosticKind::UnresolvedTypeParameter,
                        format!(
                            "type parameter `{}` of `{name}` could not be inferred and \
                             has no default",
                            parameter.name.symbol
                        ),
                    );
                    return None;
                }
            },
        };

        if let Some(constraint) = &parameter.constraint {
            let mut resolver = TypeResolver::new(ctx);
            let constraint_ty = resolver.resolve_annotation(constraint, &bindings, NameContext::None);

            if !satisfies_constraint(ctx, &bound, &constraint_ty) {
                let message = format!(
                    "`{}` does not satisfy the `extends` constraint on type \
                     parameter `{}` of `{name}`",
                    type_segment(&bound, ctx),
                    parameter.name.symbol
                );
                ctx.error(span, DiagnosticKind::ConstraintViolation, message);
                return None;
            }
        }

        bindings.insert(parameter.name.symbol, bound);
    }

    Some(bindings)
}

/// Object constraints are satisfied structurally (the concrete type carries
/// at least the constraint's fields with equal types); union constraints by
/// membership; everything else by type equality
fn satisfies_constraint(ctx: &LoweringContext<'_>, concrete: &Type, constraint: &Type) -> bool {
    if concrete == constraint {
        return true;
    }

    match &**constraint {
        TypeKind::Struct(constraint_id) => {
            let TypeKind::Struct(concrete_id) = &**concrete else {
                return false;
            };

            let concrete_def = &ctx.struct_defs[*concrete_id];
            ctx.struct_defs[*constraint_id].fields.iter().all(|needed| {
                concrete_def
                    .fields
                    .iter()
                    .any(|have| have.name == needed.name && have.ty == needed.ty)
            })
        }
        TypeKind::Union(id) => ctx.union_defs[*id]
            .variants
            .iter()
            .any(|variant| &variant.payload == concrete),
        _ => false,
    }
}

/// Infers type arguments for a generic function application by unifying each
/// declared parameter annotation against the corresponding argument's
/// resolved type. Numeric conflicts widen; anything still unbound is left for
/// defaults
pub fn infer_type_arguments<'ast>(
    ctx: &mut LoweringContext<'ast>,
    function: &'ast ast::FunctionDefinition,
    argument_types: &[Type],
) -> Vec<Type> {
    let parameter_names: Vec<InternedSymbol> = function
        .type_parameters
        .iter()
        .map(|p| p.name.symbol)
        .collect();

    let mut bindings = BTreeMap::new();

    for (parameter, actual) in function.parameters.iter().zip(argument_types) {
        if let Some(annotation) = &parameter.ty {
            unify(ctx, annotation, actual, &parameter_names, &mut bindings);
        }
    }

    // Positions stay aligned with the declared parameter list; unbound slots
    // poison to Error, which binding treats as missing (defaults still apply)
    function
        .type_parameters
        .iter()
        .map(|p| {
            bindings
                .get(&p.name.symbol)
                .cloned()
                .unwrap_or_else(|| ctx.get_error_type())
        })
        .collect()
}

fn unify<'ast>(
    ctx: &mut LoweringContext<'ast>,
    annotation: &ast::TypeAnnotation,
    actual: &Type,
    parameters: &[InternedSymbol],
    bindings: &mut BTreeMap<InternedSymbol, Type>,
) {
    match (&annotation.kind, &**actual) {
        (ast::TypeAnnotationKind::Named { name, arguments }, _) => {
            if parameters.contains(&name.symbol) {
                match bindings.get(&name.symbol) {
                    Some(existing) if existing != actual => {
                        // Conflicting numeric bindings widen per the lattice;
                        // other conflicts keep the first binding and surface
                        // later as an argument type mismatch
                        if let Some(widened) = widen_numeric(existing, actual) {
                            let widened = ctx.intern_type(widened);
                            bindings.insert(name.symbol, widened);
                        }
                    }
                    Some(_) => {}
                    None => {
                        bindings.insert(name.symbol, actual.clone());
                    }
                }
                return;
            }

            // Walk through built-in generic shapes
            match (name.symbol.value(), &**actual) {
                ("Array", TypeKind::Array(element)) => {
                    if let Some(argument) = arguments.first() {
                        unify(ctx, argument, element, parameters, bindings);
                    }
                }
                ("Option", TypeKind::Option(inner)) => {
                    if let Some(argument) = arguments.first() {
                        unify(ctx, argument, inner, parameters, bindings);
                    }
                }
                ("Result", TypeKind::Result { ok, err }) => {
                    if let Some(argument) = arguments.first() {
                        unify(ctx, argument, ok, parameters, bindings);
                    }
                    if let Some(argument) = arguments.get(1) {
                        unify(ctx, argument, err, parameters, bindings);
                    }
                }
                ("Readonly" | "Weak", _) => {
                    if let Some(argument) = arguments.first() {
                        unify(ctx, argument, actual, parameters, bindings);
                    }
                }
                _ => {}
            }
        }
        (ast::TypeAnnotationKind::Array(element), TypeKind::Array(actual_element)) => {
            unify(ctx, element, actual_element, parameters, bindings);
        }
        (ast::TypeAnnotationKind::Union(variants), TypeKind::Option(inner)) => {
            // `T | null` against Option<U> unifies T with U
            for variant in variants {
                if !matches!(
                    variant.kind,
                    ast::TypeAnnotationKind::Null | ast::TypeAnnotationKind::Undefined
                ) {
                    unify(ctx, variant, inner, parameters, bindings);
                }
            }
        }
        (ast::TypeAnnotationKind::ObjectLiteral(fields), TypeKind::Struct(id)) => {
            let def_fields = ctx.struct_defs[*id].fields.clone();
            for field in fields {
                let Some(field_name) = field.key.symbol() else {
                    continue;
                };
                if let Some(actual_field) = def_fields.iter().find(|f| f.name == field_name) {
                    let actual_ty = actual_field.ty.clone();
                    unify(ctx, &field.ty, &actual_ty, parameters, bindings);
                }
            }
        }
        (
            ast::TypeAnnotationKind::Function {
                parameters: declared_parameters,
                return_type,
            },
            TypeKind::Function {
                parameters: actual_parameters,
                return_type: actual_return,
            },
        ) => {
            for (declared, actual) in declared_parameters.iter().zip(actual_parameters.iter()) {
                unify(ctx, &declared.ty, actual, parameters, bindings);
            }
            unify(ctx, return_type, actual_return, parameters, bindings);
        }
        (ast::TypeAnnotationKind::Tuple(elements), TypeKind::Tuple(actual_elements)) => {
            for (declared, actual) in elements.iter().zip(actual_elements.iter()) {
                unify(ctx, declared, actual, parameters, bindings);
            }
        }
        _ => {}
    }
}

/// Resolves a generic function application to its monomorphized instance,
/// registering the instance signature and queueing its body for lowering on
/// first use. Returns the mangled name the call site should reference
pub fn instantiate_function<'ast>(
    ctx: &mut LoweringContext<'ast>,
    span: Span,
    name: InternedSymbol,
    explicit_arguments: &[Type],
    argument_types: &[Type],
) -> Option<InternedSymbol> {
    let function = *ctx.generic_functions.get(&name)?;

    let arguments = if explicit_arguments.is_empty() {
        infer_type_arguments(ctx, function, argument_types)
    } else {
        explicit_arguments.to_vec()
    };

    let bindings = bind_type_parameters(ctx, span, name, &function.type_parameters, &arguments)?;

    // The final argument list in declared parameter order, defaults included,
    // is what the mangled name is a pure function of
    let effective: Vec<Type> = function
        .type_parameters
        .iter()
        .map(|p| bindings[&p.name.symbol].clone())
        .collect();

    let mangled = InternedSymbol::new(&mangle(name.value(), &effective, ctx));

    if ctx.mono_cache.contains(&mangled) {
        return Some(mangled);
    }

    let depth = ctx.mono_depth + 1;
    if depth > MAX_INSTANTIATION_DEPTH {
        ctx.error(
            span,
            DiagnosticKind::RecursiveGenericDepth,
            format!(
                "instantiating `{name}` exceeds the maximum nesting depth of \
                 {MAX_INSTANTIATION_DEPTH}"
            ),
        );
        return None;
    }

    ctx.mono_cache.insert(mangled);
    desugar::register_signature(ctx, function, mangled, &bindings);
    ctx.mono_queue.push_back(MonoWorkItem {
        ast: function,
        mangled,
        bindings,
        depth,
    });

    Some(mangled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ty::IntWidth;

    #[test]
    fn mangling_is_flat_and_recursive() {
        let mut ctx = LoweringContext::new();
        let int32 = ctx.get_int_type(IntWidth::W32, true);
        let string = ctx.get_string_type();
        let array_of_int = ctx.get_array_type(int32.clone());

        assert_eq!(mangle("identity", &[int32.clone()], &ctx), "identity$Int32");
        assert_eq!(
            mangle("map", &[string, array_of_int], &ctx),
            "map$String$Array$Int32"
        );
        assert_eq!(mangle("plain", &[], &ctx), "plain");
    }

    #[test]
    fn mangling_distinguishes_signedness_and_width() {
        let mut ctx = LoweringContext::new();
        let u8 = ctx.get_int_type(IntWidth::W8, false);
        let i64 = ctx.get_int_type(IntWidth::W64, true);

        assert_eq!(mangle("f", &[u8], &ctx), "f$UInt8");
        assert_eq!(mangle("f", &[i64], &ctx), "f$Int64");
    }

    #[test]
    fn option_and_result_segments_nest() {
        let mut ctx = LoweringContext::new();
        let int32 = ctx.get_int_type(IntWidth::W32, true);
        let string = ctx.get_string_type();
        let opt = ctx.get_option_type(string.clone());
        let res = ctx.get_result_type(int32, string);

        assert_eq!(type_segment(&opt, &ctx), "Option$String");
        assert_eq!(type_segment(&res, &ctx), "Result$Int32$String");
    }
}
