//! Property tests for the order-independent parts of the middle end: the
//! numeric widening lattice and the mangled-name surface.

use proptest::prelude::*;

use silt::middle::context::LoweringContext;
use silt::middle::monomorph::type_segment;
use silt::middle::ty::{FloatWidth, IntWidth, Type, TypeKind, widen_numeric};

fn numeric_kinds() -> Vec<TypeKind> {
    let mut kinds = Vec::new();
    for width in [IntWidth::W8, IntWidth::W16, IntWidth::W32, IntWidth::W64] {
        for signed in [false, true] {
            kinds.push(TypeKind::Integer { width, signed });
        }
    }
    kinds.push(TypeKind::Float(FloatWidth::W32));
    kinds.push(TypeKind::Float(FloatWidth::W64));
    kinds
}

fn widen_all(kinds: &[TypeKind]) -> TypeKind {
    let mut result = kinds[0].clone();
    for kind in &kinds[1..] {
        result = widen_numeric(&result, kind).expect("numeric operands widen");
    }
    result
}

proptest! {
    /// Reordering the variants of a numeric union must not change the
    /// widened type
    #[test]
    fn widening_is_order_invariant(
        indices in proptest::collection::vec(0usize..10, 1..8)
    ) {
        let kinds = numeric_kinds();
        let selection: Vec<TypeKind> =
            indices.iter().map(|i| kinds[*i].clone()).collect();
        let mut reversed = selection.clone();
        reversed.reverse();

        prop_assert_eq!(widen_all(&selection), widen_all(&reversed));
    }
}

/// A structure-only description of a type, so the same shape can be rebuilt
/// in independent contexts
#[derive(Debug, Clone, PartialEq)]
enum Proto {
    I8,
    I32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Array(Box<Proto>),
    Option(Box<Proto>),
    Result(Box<Proto>, Box<Proto>),
}

fn proto_strategy() -> impl Strategy<Value = Proto> {
    let leaf = prop_oneof![
        Just(Proto::I8),
        Just(Proto::I32),
        Just(Proto::U64),
        Just(Proto::F32),
        Just(Proto::F64),
        Just(Proto::Bool),
        Just(Proto::Str),
    ];

    leaf.prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|p| Proto::Array(Box::new(p))),
            inner.clone().prop_map(|p| Proto::Option(Box::new(p))),
            (inner.clone(), inner)
                .prop_map(|(a, b)| Proto::Result(Box::new(a), Box::new(b))),
        ]
    })
}

fn build(ctx: &mut LoweringContext<'_>, proto: &Proto) -> Type {
    match proto {
        Proto::I8 => ctx.get_int_type(IntWidth::W8, true),
        Proto::I32 => ctx.get_int_type(IntWidth::W32, true),
        Proto::U64 => ctx.get_int_type(IntWidth::W64, false),
        Proto::F32 => ctx.get_float_type(FloatWidth::W32),
        Proto::F64 => ctx.get_float_type(FloatWidth::W64),
        Proto::Bool => ctx.get_bool_type(),
        Proto::Str => ctx.get_string_type(),
        Proto::Array(element) => {
            let element = build(ctx, element);
            ctx.get_array_type(element)
        }
        Proto::Option(inner) => {
            let inner = build(ctx, inner);
            ctx.get_option_type(inner)
        }
        Proto::Result(ok, err) => {
            let ok = build(ctx, ok);
            let err = build(ctx, err);
            ctx.get_result_type(ok, err)
        }
    }
}

proptest! {
    /// Mangled segments are a pure function of the type's structure
    #[test]
    fn mangled_segments_are_deterministic(proto in proto_strategy()) {
        let mut first = LoweringContext::new();
        let mut second = LoweringContext::new();

        let a = build(&mut first, &proto);
        let b = build(&mut second, &proto);

        prop_assert_eq!(type_segment(&a, &first), type_segment(&b, &second));
    }

    /// Structurally different types mangle to different names, so mangled
    /// instance names cannot collide
    #[test]
    fn distinct_types_mangle_distinctly(
        first_proto in proto_strategy(),
        second_proto in proto_strategy()
    ) {
        prop_assume!(first_proto != second_proto);

        let mut ctx = LoweringContext::new();
        let a = build(&mut ctx, &first_proto);
        let b = build(&mut ctx, &second_proto);

        prop_assert_ne!(type_segment(&a, &ctx), type_segment(&b, &ctx));
    }
}
