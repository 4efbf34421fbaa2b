//! The surface AST the external parser and semantic analyzer hand to the
//! middle end. One [`Module`] per source file. Every node carries a [`NodeId`]
//! (unique within the program) and a [`Span`] into its file.
//!
//! The tree deliberately carries constructs the compilable subset rejects
//! (`with`, decorators, `async`, the `any` keyword, ...) so the validator can
//! point at them instead of the parser silently dropping them.

use crate::{
    frontend::{Span, intern::InternedSymbol},
    index::simple_index,
};

simple_index! {
    /// Identifies a source file within the program being compiled
    pub struct FileId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug)]
pub struct Module {
    pub file: FileId,
    /// Top level items in the module
    pub items: Vec<Item>,
}

#[derive(Debug)]
pub struct Item {
    pub id: NodeId,
    pub span: Span,
    pub is_exported: bool,
    pub kind: ItemKind,
}

#[derive(Debug)]
pub enum ItemKind {
    Function(Box<FunctionDefinition>),
    Class(Box<ClassDefinition>),
    Interface(Box<InterfaceDefinition>),
    TypeAlias(Box<TypeAlias>),
    Enum(Box<EnumDefinition>),
    Import(Box<ImportDeclaration>),
}

impl Item {
    /// The declared name of the item, if it introduces one
    pub fn name(&self) -> Option<InternedSymbol> {
        match &self.kind {
            ItemKind::Function(f) => Some(f.name.symbol),
            ItemKind::Class(c) => Some(c.name.symbol),
            ItemKind::Interface(i) => Some(i.name.symbol),
            ItemKind::TypeAlias(a) => Some(a.name.symbol),
            ItemKind::Enum(e) => Some(e.name.symbol),
            ItemKind::Import(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub type_parameters: Vec<TypeParameter>,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Block,
    pub is_async: bool,
    pub is_generator: bool,
    pub decorators: Vec<Decorator>,
}

#[derive(Debug)]
pub struct TypeParameter {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub constraint: Option<TypeAnnotation>,
    pub default: Option<TypeAnnotation>,
}

#[derive(Debug)]
pub struct FunctionParameter {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    /// `None` when the source omitted the annotation; the validator rejects
    /// that case
    pub ty: Option<TypeAnnotation>,
}

#[derive(Debug)]
pub struct ClassDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub type_parameters: Vec<TypeParameter>,
    pub fields: Vec<ClassField>,
    pub methods: Vec<ClassMethod>,
    pub decorators: Vec<Decorator>,
}

#[derive(Debug)]
pub struct ClassField {
    pub id: NodeId,
    pub span: Span,
    pub key: PropertyKey,
    pub ty: Option<TypeAnnotation>,
    pub readonly: bool,
    pub initializer: Option<Expression>,
    pub decorators: Vec<Decorator>,
}

#[derive(Debug)]
pub struct ClassMethod {
    pub id: NodeId,
    pub span: Span,
    pub kind: MethodKind,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Constructor,
    Method,
    Getter,
    Setter,
}

/// Decorator payloads are irrelevant to the middle end: the validator rejects
/// every occurrence, so only the span survives
#[derive(Debug)]
pub struct Decorator {
    pub id: NodeId,
    pub span: Span,
}

#[derive(Debug)]
pub struct InterfaceDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub type_parameters: Vec<TypeParameter>,
    pub fields: Vec<ObjectTypeField>,
}

#[derive(Debug)]
pub struct TypeAlias {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub type_parameters: Vec<TypeParameter>,
    pub ty: TypeAnnotation,
}

#[derive(Debug)]
pub struct EnumDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub is_const: bool,
    pub members: Vec<EnumMember>,
}

#[derive(Debug)]
pub struct EnumMember {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub initializer: Option<EnumInitializer>,
}

#[derive(Debug)]
pub enum EnumInitializer {
    Number(i64),
    String(InternedSymbol),
    /// Anything else; always rejected
    Computed(Box<Expression>),
}

#[derive(Debug)]
pub struct ImportDeclaration {
    pub id: NodeId,
    pub span: Span,
    pub symbols: Vec<Identifier>,
    pub source: FileId,
}

#[derive(Debug)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub symbol: InternedSymbol,
}

/* Type annotations */

#[derive(Debug)]
pub struct TypeAnnotation {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeAnnotationKind,
}

#[derive(Debug)]
pub enum TypeAnnotationKind {
    /// `number`, `i32`, `Point`, `Array<T>`, `Weak<T>`, `Map<K, V>`, ...
    Named {
        name: Identifier,
        arguments: Vec<TypeAnnotation>,
    },
    /// `A | B | null`
    Union(Vec<TypeAnnotation>),
    /// `{ x: f64; y: f64 }`
    ObjectLiteral(Vec<ObjectTypeField>),
    /// `[A, B, C]`
    Tuple(Vec<TypeAnnotation>),
    /// `T[]`
    Array(Box<TypeAnnotation>),
    /// `(a: A, b: B) => R`
    Function {
        parameters: Vec<FunctionTypeParameter>,
        return_type: Box<TypeAnnotation>,
    },
    /// `"circle"` — only meaningful inside unions and discriminant fields
    StringLiteral(InternedSymbol),
    Null,
    Undefined,
    /// `any`, `unknown`, `object`, `symbol`, `bigint` — carried so the
    /// validator can reject them with a span
    Rejected(RejectedTypeKeyword),
}

#[derive(Debug)]
pub struct FunctionTypeParameter {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub ty: TypeAnnotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RejectedTypeKeyword {
    Any,
    Unknown,
    Object,
    Symbol,
    BigInt,
}

#[derive(Debug)]
pub struct ObjectTypeField {
    pub id: NodeId,
    pub span: Span,
    pub key: PropertyKey,
    pub ty: TypeAnnotation,
    pub optional: bool,
    pub readonly: bool,
}

/// Object keys appear on type shapes, object literals, and class fields.
/// Identifier and string-literal keys are the compilable cases
#[derive(Debug)]
pub enum PropertyKey {
    Identifier(Identifier),
    StringLiteral(Identifier),
    Computed(Box<Expression>),
}

impl PropertyKey {
    pub fn symbol(&self) -> Option<InternedSymbol> {
        match self {
            PropertyKey::Identifier(i) | PropertyKey::StringLiteral(i) => Some(i.symbol),
            PropertyKey::Computed(_) => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            PropertyKey::Identifier(i) | PropertyKey::StringLiteral(i) => i.span,
            PropertyKey::Computed(e) => e.span,
        }
    }
}

/* Statements */

#[derive(Debug)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    Local(Box<Local>),
    Expression(Box<Expression>),
    Return(Option<Box<Expression>>),
    If {
        condition: Box<Expression>,
        then_block: Block,
        /// Either a block statement or another `If`
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Box<Expression>,
        block: Block,
    },
    For {
        initializer: Option<Box<Statement>>,
        condition: Option<Box<Expression>>,
        update: Option<Box<Expression>>,
        block: Block,
    },
    ForOf {
        binding: Box<Local>,
        iterable: Box<Expression>,
        block: Block,
    },
    Switch {
        discriminant: Box<Expression>,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Throw(Box<Expression>),
    Try {
        block: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
    },
    Block(Block),
    /// Carried so the validator can reject it
    With {
        object: Box<Expression>,
        block: Block,
    },
    Empty,
}

#[derive(Debug)]
pub struct Local {
    pub id: NodeId,
    pub span: Span,
    pub kind: LocalKind,
    pub pattern: Pattern,
    pub ty: Option<TypeAnnotation>,
    pub initializer: Option<Box<Expression>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Let,
    Const,
    /// Rejected by the validator
    Var,
}

#[derive(Debug)]
pub struct Pattern {
    pub id: NodeId,
    pub span: Span,
    pub kind: PatternKind,
}

#[derive(Debug)]
pub enum PatternKind {
    Identifier(Identifier),
    /// `const { x, y: renamed } = e`
    Object(Vec<ObjectPatternField>),
    /// `const [a, , b] = e` — `None` marks an elision
    Array(Vec<Option<Identifier>>),
}

#[derive(Debug)]
pub struct ObjectPatternField {
    pub id: NodeId,
    pub span: Span,
    pub key: Identifier,
    pub binding: Identifier,
}

#[derive(Debug)]
pub struct SwitchCase {
    pub id: NodeId,
    pub span: Span,
    /// `None` for the `default` case
    pub test: Option<Expression>,
    pub body: Vec<Statement>,
}

#[derive(Debug)]
pub struct CatchClause {
    pub id: NodeId,
    pub span: Span,
    pub binding: Option<Identifier>,
    pub block: Block,
}

/* Expressions */

#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Box<Literal>),
    Identifier(Box<Identifier>),
    This,
    Member {
        object: Box<Expression>,
        property: Identifier,
        /// `o?.f` optional chaining
        optional: bool,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        type_arguments: Vec<TypeAnnotation>,
        arguments: Vec<Expression>,
    },
    New {
        callee: Identifier,
        type_arguments: Vec<TypeAnnotation>,
        arguments: Vec<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperatorKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Logical {
        operator: LogicalOperatorKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Assignment {
        /// `None` is plain `=`; `Some` is a compound `op=`
        operator: Option<BinaryOperatorKind>,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Conditional {
        condition: Box<Expression>,
        positive: Box<Expression>,
        negative: Box<Expression>,
    },
    Arrow(Box<ArrowFunction>),
    /// `` `a ${b} c` `` — `quasis.len() == expressions.len() + 1`
    Template {
        quasis: Vec<InternedSymbol>,
        expressions: Vec<Expression>,
    },
    ObjectLiteral(Vec<ObjectLiteralField>),
    ArrayLiteral(Vec<ArrayElement>),
}

#[derive(Debug)]
pub struct ArrowFunction {
    pub id: NodeId,
    pub span: Span,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Option<TypeAnnotation>,
    pub body: ArrowBody,
    pub is_async: bool,
}

#[derive(Debug)]
pub enum ArrowBody {
    Expression(Box<Expression>),
    Block(Block),
}

#[derive(Debug)]
pub struct ObjectLiteralField {
    pub id: NodeId,
    pub span: Span,
    pub key: PropertyKey,
    pub value: Expression,
}

#[derive(Debug)]
pub enum ArrayElement {
    Expression(Expression),
    Spread(Expression),
}

#[derive(Debug)]
pub struct Literal {
    pub id: NodeId,
    pub span: Span,
    pub kind: LiteralKind,
    /// The raw source text of the literal
    pub symbol: InternedSymbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Boolean,
    Number,
    String,
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperatorKind {
    Negate,     // -
    LogicalNot, // !
    BitwiseNot, // ~
    TypeOf,     // typeof
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Exponent,             // **
    Equals,               // === (loose equality is normalized by the frontend)
    NotEquals,            // !==
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
    InstanceOf,           // instanceof
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Comparison,
    Equality,
    Bitwise,
    TypeTest,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulus
            | Self::Exponent => BinaryOperatorClass::Arithmetic,
            Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Comparison,
            Self::Equals | Self::NotEquals => BinaryOperatorClass::Equality,
            Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => BinaryOperatorClass::Bitwise,
            Self::InstanceOf => BinaryOperatorClass::TypeTest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperatorKind {
    And,      // &&
    Or,       // ||
    Coalesce, // ??
}

impl Expression {
    /// True when the expression is the `null` or `undefined` literal
    pub fn is_null_literal(&self) -> bool {
        matches!(
            &self.kind,
            ExpressionKind::Literal(lit)
                if matches!(lit.kind, LiteralKind::Null | LiteralKind::Undefined)
        )
    }
}
