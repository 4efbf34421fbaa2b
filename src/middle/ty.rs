//! The Core IR type system: a closed sum of machine-representable types. Every
//! expression the middle end emits carries exactly one of these. Struct and
//! union bodies live in tables on the lowering context; the type itself holds
//! only the handle, which is what makes structural identity cheap to enforce
//! (two identical shapes resolve to the same handle).

use std::rc::Rc;

use crate::{frontend::intern::InternedSymbol, index::simple_index};

#[doc(hidden)]
mod private {
    #[doc(hidden)]
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct PrivateZst;
}

/// Thin pointer to an interned type kind. Do not construct directly. Instead,
/// use [`LoweringContext::intern_type`](crate::middle::context::LoweringContext::intern_type)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Rc<TypeKind>, private::PrivateZst);

impl Type {
    pub fn new_from_reference_only_for_interning(kind: Rc<TypeKind>) -> Self {
        Self(kind, private::PrivateZst)
    }
}

impl std::ops::Deref for Type {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

simple_index! {
    /// Handle into the struct table
    pub struct StructId;
}

simple_index! {
    /// Handle into the union table
    pub struct UnionId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool,
    Void,
    Never,
    /// Fat pointer `{ data, byte_length }` over UTF-8
    String,
    Integer {
        width: IntWidth,
        signed: bool,
    },
    Float(FloatWidth),
    Struct(StructId),
    /// `{ data, length, capacity }`
    Array(Type),
    Tuple(Rc<[Type]>),
    Union(UnionId),
    /// Distinguished from a two-variant union because of the null-pointer
    /// optimization on pointer-shaped inners
    Option(Type),
    Result {
        ok: Type,
        err: Type,
    },
    /// `{ code_pointer, environment_pointer }`. The capture strategy is a
    /// property of the closure value, not the type, so that structurally
    /// equal signatures unify
    Function {
        parameters: Rc<[Type]>,
        return_type: Type,
    },
    /// The type produced by an illegal operation after a diagnostic has been
    /// emitted. Never present in successful output
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatWidth {
    W32,
    W64,
}

impl TypeKind {
    pub fn is_integer(&self) -> bool {
        matches!(self, TypeKind::Integer { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeKind::Float(_))
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Primitives are passed by value; ownership labels on them are advisory
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypeKind::Bool
                | TypeKind::Void
                | TypeKind::Never
                | TypeKind::Integer { .. }
                | TypeKind::Float(_)
        )
    }

    /// Whether the representation of this type begins with a pointer, which
    /// is the precondition for the null-pointer optimization on `Option`
    pub fn is_pointer_shaped(&self) -> bool {
        matches!(
            self,
            TypeKind::String
                | TypeKind::Array(_)
                | TypeKind::Struct(_)
                | TypeKind::Function { .. }
        )
    }

    /// Heap-representable types participate in reference counting
    pub fn needs_heap(&self) -> bool {
        self.is_pointer_shaped()
    }
}

/// Whether `Option<inner>` is laid out as a nullable pointer with no tag word
pub fn option_uses_null_pointer(inner: &TypeKind) -> bool {
    inner.is_pointer_shaped()
}

/* Named-entity table entries */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: InternedSymbol,
    pub ty: Type,
    /// From a `Weak<T>` annotation: a non-owning pointer that never keeps its
    /// referent alive
    pub weak: bool,
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    /// The first declared name, or a synthesized one for anonymous shapes
    pub name: InternedSymbol,
    /// Fields in source order; the canonical signature for structural identity
    pub fields: Vec<StructField>,
}

impl StructDef {
    pub fn field_index(&self, name: InternedSymbol) -> Option<u32> {
        self.fields.iter().position(|f| f.name == name).map(|i| i as u32)
    }
}

#[derive(Debug, Clone)]
pub struct UnionDef {
    pub name: InternedSymbol,
    pub tag_width: IntWidth,
    /// Tag values are dense integers starting at 0 in declaration order
    pub variants: Vec<UnionVariant>,
    /// `Some` for discriminated unions: the shared string-literal field that
    /// was stripped from every variant's payload
    pub discriminant_field: Option<InternedSymbol>,
}

#[derive(Debug, Clone)]
pub struct UnionVariant {
    pub tag: u32,
    /// The discriminant string for this variant of a discriminated union
    pub discriminant: Option<InternedSymbol>,
    pub payload: Type,
}

impl UnionDef {
    pub fn variant_by_discriminant(&self, value: InternedSymbol) -> Option<&UnionVariant> {
        self.variants
            .iter()
            .find(|v| v.discriminant == Some(value))
    }

    /// The tag of the variant whose payload matches `ty`, if exactly one does
    pub fn variant_by_payload(&self, ty: &Type) -> Option<&UnionVariant> {
        self.variants.iter().find(|v| &v.payload == ty)
    }
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: InternedSymbol,
    pub variants: Vec<EnumVariantDef>,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct EnumVariantDef {
    pub name: InternedSymbol,
    pub tag: i64,
    /// Retained for compile-time equality checks on string enums; not stored
    /// at runtime
    pub string_value: Option<InternedSymbol>,
}

impl EnumDef {
    pub fn variant(&self, name: InternedSymbol) -> Option<&EnumVariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/* The numeric widening lattice */

/// The smallest type that can represent every member of a numeric union:
/// any float + int widens to the widest float; all ints widen to the widest
/// int; signed + unsigned of equal width widens to signed. Commutative and
/// associative by construction
pub fn widen_numeric(a: &TypeKind, b: &TypeKind) -> Option<TypeKind> {
    match (a, b) {
        (TypeKind::Float(fa), TypeKind::Float(fb)) => Some(TypeKind::Float((*fa).max(*fb))),
        (TypeKind::Float(fa), TypeKind::Integer { .. })
        | (TypeKind::Integer { .. }, TypeKind::Float(fa)) => Some(TypeKind::Float(*fa)),
        (
            TypeKind::Integer {
                width: wa,
                signed: sa,
            },
            TypeKind::Integer {
                width: wb,
                signed: sb,
            },
        ) => Some(TypeKind::Integer {
            width: (*wa).max(*wb),
            signed: *sa || *sb,
        }),
        _ => None,
    }
}

/// Whether a value of type `from` may implicitly widen to `to`
pub fn can_widen(from: &TypeKind, to: &TypeKind) -> bool {
    match (from, to) {
        (
            TypeKind::Integer {
                width: wf,
                signed: sf,
            },
            TypeKind::Integer {
                width: wt,
                signed: st,
            },
        ) => wf <= wt && (sf == st || (*st && wf < wt)),
        (TypeKind::Float(ff), TypeKind::Float(ft)) => ff <= ft,
        (TypeKind::Integer { .. }, TypeKind::Float(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(width: IntWidth, signed: bool) -> TypeKind {
        TypeKind::Integer { width, signed }
    }

    #[test]
    fn widening_prefers_floats() {
        let widened = widen_numeric(&int(IntWidth::W64, true), &TypeKind::Float(FloatWidth::W32));
        assert_eq!(widened, Some(TypeKind::Float(FloatWidth::W32)));

        let widened = widen_numeric(
            &TypeKind::Float(FloatWidth::W32),
            &TypeKind::Float(FloatWidth::W64),
        );
        assert_eq!(widened, Some(TypeKind::Float(FloatWidth::W64)));
    }

    #[test]
    fn equal_width_signed_unsigned_widens_to_signed() {
        let widened = widen_numeric(&int(IntWidth::W32, false), &int(IntWidth::W32, true));
        assert_eq!(widened, Some(int(IntWidth::W32, true)));
    }

    #[test]
    fn widening_is_commutative() {
        let cases = [
            int(IntWidth::W8, true),
            int(IntWidth::W16, false),
            int(IntWidth::W32, true),
            int(IntWidth::W64, false),
            TypeKind::Float(FloatWidth::W32),
            TypeKind::Float(FloatWidth::W64),
        ];

        for a in &cases {
            for b in &cases {
                assert_eq!(widen_numeric(a, b), widen_numeric(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn widening_rejects_non_numeric_operands() {
        assert_eq!(widen_numeric(&TypeKind::Bool, &int(IntWidth::W32, true)), None);
    }

    #[test]
    fn null_pointer_optimization_applies_to_pointer_shaped_inners() {
        assert!(option_uses_null_pointer(&TypeKind::String));
        assert!(option_uses_null_pointer(&TypeKind::Struct(StructId(0))));
        assert!(!option_uses_null_pointer(&int(IntWidth::W32, true)));
        assert!(!option_uses_null_pointer(&TypeKind::Bool));
    }
}
