//! The Lowering Context: every table shared between pipeline phases. Types
//! and named entities are registered during type resolution and stay stable
//! afterwards; monomorphized instances are appended mid-pipeline through the
//! work queue; ownership labels are appended last. All maps that can influence
//! output order are `BTreeMap`s so two runs over the same program produce
//! identical Core IR.

use std::{collections::BTreeMap, collections::VecDeque, rc::Rc};

use hashbrown::{HashMap, HashSet};

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    frontend::{Span, ast, intern::InternedSymbol},
    index::IndexVec,
    middle::{
        cir,
        ty::{
            EnumDef, FloatWidth, IntWidth, StructDef, StructField, StructId, Type, TypeKind,
            UnionDef, UnionId,
        },
    },
};

/// A generic definition retained as raw AST until a use site instantiates it
#[derive(Debug, Clone, Copy)]
pub enum GenericTypeDef<'ast> {
    Alias(&'ast ast::TypeAlias),
    Interface(&'ast ast::InterfaceDefinition),
}

/// A named type declaration kept as raw AST for on-demand resolution
#[derive(Debug, Clone, Copy)]
pub enum TypeItemAst<'ast> {
    Interface(&'ast ast::InterfaceDefinition),
    Alias(&'ast ast::TypeAlias),
    Class(&'ast ast::ClassDefinition),
}

/// One pending monomorphization: drained FIFO so instantiation order is
/// deterministic
#[derive(Debug)]
pub struct MonoWorkItem<'ast> {
    pub ast: &'ast ast::FunctionDefinition,
    pub mangled: InternedSymbol,
    pub bindings: BTreeMap<InternedSymbol, Type>,
    pub depth: u32,
}


#[derive(Debug, Default)]
pub struct LoweringContext<'ast> {
    /// Type interning table to prevent duplicate types
    type_table: HashSet<Rc<TypeKind>>,

    /// Struct table, unique by canonical field signature
    pub struct_defs: IndexVec<StructId, StructDef>,
    /// Canonical field signature -> existing entry (structural identity)
    struct_signatures: HashMap<Vec<StructField>, StructId>,

    /// Union table, keyed by (synthesized) name
    pub union_defs: IndexVec<UnionId, UnionDef>,
    union_names: BTreeMap<InternedSymbol, UnionId>,

    /// Fully resolved named types (aliases, interfaces, classes, enums)
    pub named_types: BTreeMap<InternedSymbol, Type>,
    /// Enum definitions; compile to Integer(32) plus this compile-time data
    pub enums: BTreeMap<InternedSymbol, EnumDef>,

    /// The global tag table for string-literal enums: first-seen order over
    /// discriminant strings, used when lowering comparisons against them
    string_tags: Vec<InternedSymbol>,

    /// `(struct, field) -> literal` for fields declared with a string-literal
    /// type; how discriminated unions are detected after their variants have
    /// been resolved to structs
    pub string_literal_fields: BTreeMap<(StructId, InternedSymbol), InternedSymbol>,

    /// Raw ASTs of named type declarations, so forward references resolve on
    /// demand
    pub type_item_asts: BTreeMap<InternedSymbol, TypeItemAst<'ast>>,

    /// Generic definitions held as raw AST
    pub generic_functions: BTreeMap<InternedSymbol, &'ast ast::FunctionDefinition>,
    pub generic_types: BTreeMap<InternedSymbol, GenericTypeDef<'ast>>,

    /// Monomorphization cache: mangled instance names already registered
    pub mono_cache: HashSet<InternedSymbol>,
    pub mono_queue: VecDeque<MonoWorkItem<'ast>>,
    /// Current nested instantiation depth; bounded by the monomorphizer
    pub mono_depth: u32,

    /// Non-generic function bodies pending lowering, keyed by name
    pub function_asts: BTreeMap<InternedSymbol, &'ast ast::FunctionDefinition>,

    /// Method dispatch: `(struct, surface name) -> lowered free function`.
    /// Getters and setters live in their own namespaces because a property
    /// can have both
    pub methods: BTreeMap<(StructId, InternedSymbol), InternedSymbol>,
    pub getters: BTreeMap<(StructId, InternedSymbol), InternedSymbol>,
    pub setters: BTreeMap<(StructId, InternedSymbol), InternedSymbol>,
    /// Constructor symbol per class struct
    pub constructors: BTreeMap<StructId, InternedSymbol>,

    /// The function table (bodies in Core IR) and the signature map
    pub functions: BTreeMap<InternedSymbol, cir::FunctionDefinition>,
    pub signatures: BTreeMap<InternedSymbol, cir::FunctionSig>,

    pub diagnostics: Vec<Diagnostic>,
    /// Set when a diagnostic that aborts compilation was emitted
    pub fatal: bool,
}

impl<'ast> LoweringContext<'ast> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, span: Span, kind: DiagnosticKind, message: impl Into<String>) {
        if kind.aborts_compilation() {
            self.fatal = true;
        }
        self.diagnostics.push(Diagnostic::new(span, kind, message));
    }

    /* Type interning */

    pub fn intern_type(&mut self, kind: TypeKind) -> Type {
        let rc = self.type_table.get_or_insert(Rc::new(kind));
        Type::new_from_reference_only_for_interning(rc.clone())
    }

    pub fn get_error_type(&mut self) -> Type {
        self.intern_type(TypeKind::Error)
    }

    pub fn get_void_type(&mut self) -> Type {
        self.intern_type(TypeKind::Void)
    }

    pub fn get_bool_type(&mut self) -> Type {
        self.intern_type(TypeKind::Bool)
    }

    pub fn get_string_type(&mut self) -> Type {
        self.intern_type(TypeKind::String)
    }

    pub fn get_float_type(&mut self, width: FloatWidth) -> Type {
        self.intern_type(TypeKind::Float(width))
    }

    pub fn get_int_type(&mut self, width: IntWidth, signed: bool) -> Type {
        self.intern_type(TypeKind::Integer { width, signed })
    }

    /// The `i32` every enum and string-literal enum compiles to
    pub fn get_tag_type(&mut self) -> Type {
        self.get_int_type(IntWidth::W32, true)
    }

    pub fn get_option_type(&mut self, inner: Type) -> Type {
        self.intern_type(TypeKind::Option(inner))
    }

    pub fn get_result_type(&mut self, ok: Type, err: Type) -> Type {
        self.intern_type(TypeKind::Result { ok, err })
    }

    pub fn get_array_type(&mut self, element: Type) -> Type {
        self.intern_type(TypeKind::Array(element))
    }

    pub fn get_function_type(&mut self, parameters: Vec<Type>, return_type: Type) -> Type {
        self.intern_type(TypeKind::Function {
            parameters: parameters.into(),
            return_type,
        })
    }

    /* Struct table */

    /// Registers a struct shape, reusing the existing entry when an identical
    /// canonical signature was seen before. The first declared name wins
    pub fn intern_struct(&mut self, name: InternedSymbol, fields: Vec<StructField>) -> StructId {
        if let Some(id) = self.struct_signatures.get(&fields) {
            return *id;
        }

        let id = self.struct_defs.push(StructDef {
            name,
            fields: fields.clone(),
        });
        self.struct_signatures.insert(fields, id);
        id
    }

    pub fn struct_type(&mut self, id: StructId) -> Type {
        self.intern_type(TypeKind::Struct(id))
    }

    pub fn struct_named(&self, name: InternedSymbol) -> Option<StructId> {
        match self.named_types.get(&name).map(|ty| &**ty) {
            Some(TypeKind::Struct(id)) => Some(*id),
            _ => None,
        }
    }

    /* Union table */

    pub fn register_union(&mut self, def: UnionDef) -> UnionId {
        if let Some(existing) = self.union_names.get(&def.name) {
            return *existing;
        }

        let name = def.name;
        let id = self.union_defs.push(def);
        self.union_names.insert(name, id);
        id
    }

    pub fn union_type(&mut self, id: UnionId) -> Type {
        self.intern_type(TypeKind::Union(id))
    }

    /* String-literal enum tags */

    /// The compile-time tag for a discriminant string, assigned first-seen
    pub fn string_tag(&mut self, value: InternedSymbol) -> u32 {
        if let Some(position) = self.string_tags.iter().position(|s| *s == value) {
            return position as u32;
        }
        self.string_tags.push(value);
        (self.string_tags.len() - 1) as u32
    }

    pub fn lookup_string_tag(&self, value: InternedSymbol) -> Option<u32> {
        self.string_tags
            .iter()
            .position(|s| *s == value)
            .map(|p| p as u32)
    }

    /* Output assembly */

    /// Consumes the context into the Core IR program handed to the backend
    pub fn into_program(self) -> cir::Program {
        cir::Program {
            structs: self.struct_defs,
            unions: self.union_defs,
            enums: self.enums.into_values().collect(),
            functions: self.functions,
            signatures: self.signatures,
        }
    }
}
