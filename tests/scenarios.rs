//! End-to-end lowering scenarios: each test feeds a hand-built surface AST
//! through the whole pipeline and inspects the Core IR that comes out.

mod support;

use silt::frontend::ast::BinaryOperatorKind;
use silt::middle::cir::{CaptureKind, ExprKind, ParamMode, Placement, Stmt};
use silt::middle::ty::{FloatWidth, IntWidth, TypeKind};
use support::{AstBuilder, any_expr, any_stmt, lower_expecting, sym};

/// Two instantiations of a generic produce two mangled entries and no entry
/// for the generic base
#[test]
fn generic_identity_monomorphizes_per_instantiation() {
    let b = AstBuilder::new();

    let identity = b.function(
        "identity",
        vec![b.type_param("T", None, None)],
        vec![("x", b.ty("T"))],
        Some(b.ty("T")),
        vec![b.ret(Some(b.var("x")))],
    );
    let main = b.function(
        "main",
        Vec::new(),
        Vec::new(),
        Some(b.ty("void")),
        vec![
            b.expr_stmt(b.call("identity", vec![b.ty("i32")], vec![b.num("42")])),
            b.expr_stmt(b.call("identity", vec![b.ty("f64")], vec![b.num("3.14")])),
        ],
    );

    let program = lower_expecting(vec![identity, main]);

    assert!(program.functions.contains_key(&sym("identity$Int32")));
    assert!(program.functions.contains_key(&sym("identity$Float64")));
    assert!(!program.functions.contains_key(&sym("identity")));

    let int_instance = &program.signatures[&sym("identity$Int32")];
    assert!(matches!(
        &*int_instance.return_type,
        TypeKind::Integer {
            width: IntWidth::W32,
            signed: true
        }
    ));
}

/// A union of struct shapes sharing a string-literal `kind` field becomes a
/// discriminated union; switching on the field becomes a match on the tag
#[test]
fn discriminated_union_switch_lowers_to_match_on_tag() {
    let b = AstBuilder::new();

    let shape = b.alias(
        "Shape",
        b.union_ty(vec![
            b.object_ty(vec![
                ("kind", b.string_lit_ty("circle")),
                ("r", b.ty("f64")),
            ]),
            b.object_ty(vec![
                ("kind", b.string_lit_ty("rect")),
                ("w", b.ty("f64")),
                ("h", b.ty("f64")),
            ]),
        ]),
    );

    let area = b.function(
        "a",
        Vec::new(),
        vec![("s", b.ty("Shape"))],
        Some(b.ty("f64")),
        vec![b.switch(
            b.member(b.var("s"), "kind"),
            vec![
                (
                    Some(b.str_lit("circle")),
                    vec![b.ret(Some(b.binary(
                        BinaryOperatorKind::Multiply,
                        b.member(b.var("s"), "r"),
                        b.member(b.var("s"), "r"),
                    )))],
                ),
                (
                    Some(b.str_lit("rect")),
                    vec![b.ret(Some(b.binary(
                        BinaryOperatorKind::Multiply,
                        b.member(b.var("s"), "w"),
                        b.member(b.var("s"), "h"),
                    )))],
                ),
            ],
        )],
    );

    let program = lower_expecting(vec![shape, area]);

    let union = program
        .unions
        .iter()
        .find(|u| u.name == sym("Shape"))
        .expect("Shape union registered");
    assert_eq!(union.discriminant_field, Some(sym("kind")));
    assert_eq!(union.variants.len(), 2);
    assert_eq!(union.variants[0].tag, 0);
    assert_eq!(union.variants[0].discriminant, Some(sym("circle")));
    assert_eq!(union.variants[1].tag, 1);
    assert_eq!(union.variants[1].discriminant, Some(sym("rect")));

    // The discriminant is stripped from the payload
    let TypeKind::Struct(payload) = &*union.variants[0].payload else {
        panic!("circle payload is a struct");
    };
    let payload = &program.structs[*payload];
    assert_eq!(payload.fields.len(), 1);
    assert_eq!(payload.fields[0].name, sym("r"));

    let area_fn = &program.functions[&sym("a")];
    assert!(any_stmt(&area_fn.body, &|s| matches!(
        s,
        Stmt::MatchTag { arms, .. } if arms.len() == 2
    )));
}

/// `f64 | null` resolves to Option<Float64>; the null test reads the tag
#[test]
fn nullable_parameter_becomes_option_with_tag_test() {
    let b = AstBuilder::new();

    let p = b.function(
        "p",
        Vec::new(),
        vec![("x", b.union_ty(vec![b.ty("f64"), b.null_ty()]))],
        Some(b.ty("f64")),
        vec![
            b.if_stmt(
                b.binary(BinaryOperatorKind::Equals, b.var("x"), b.null_lit()),
                vec![b.ret(Some(b.num("0")))],
                None,
            ),
            b.ret(Some(b.var("x"))),
        ],
    );

    let program = lower_expecting(vec![p]);

    let sig = &program.signatures[&sym("p")];
    assert!(matches!(
        &*sig.parameters[0].ty,
        TypeKind::Option(inner) if matches!(&**inner, TypeKind::Float(FloatWidth::W64))
    ));
    assert!(matches!(
        &*sig.return_type,
        TypeKind::Float(FloatWidth::W64)
    ));

    let body = &program.functions[&sym("p")].body;
    assert!(any_expr(body, &|e| matches!(e.kind, ExprKind::TagOf(_))));
}

/// Parameters that are only read are borrowed and trigger no refcounting
#[test]
fn read_only_struct_parameters_are_borrowed() {
    let b = AstBuilder::new();

    let point = b.interface("Point", vec![("x", b.ty("f64")), ("y", b.ty("f64"))]);

    let dx = b.binary(
        BinaryOperatorKind::Subtract,
        b.member(b.var("a"), "x"),
        b.member(b.var("b"), "x"),
    );
    let dy = b.binary(
        BinaryOperatorKind::Subtract,
        b.member(b.var("a"), "y"),
        b.member(b.var("b"), "y"),
    );
    let sum = b.binary(
        BinaryOperatorKind::Add,
        b.binary(BinaryOperatorKind::Exponent, dx, b.num("2")),
        b.binary(BinaryOperatorKind::Exponent, dy, b.num("2")),
    );
    let distance = b.function(
        "d",
        Vec::new(),
        vec![("a", b.ty("Point")), ("b", b.ty("Point"))],
        Some(b.ty("f64")),
        vec![b.ret(Some(b.method_call(b.var("Math"), "sqrt", vec![sum])))],
    );

    let program = lower_expecting(vec![point, distance]);

    let d = &program.functions[&sym("d")];
    assert_eq!(d.param_modes, vec![ParamMode::Borrowed, ParamMode::Borrowed]);
    assert!(!any_stmt(&d.body, &|s| matches!(
        s,
        Stmt::Retain(_) | Stmt::Release(_)
    )));
}

/// A returned closure escapes: its captures move into a refcounted heap
/// capture box
#[test]
fn escaping_closure_gets_boxed_environment() {
    let b = AstBuilder::new();

    let make = b.function(
        "make",
        Vec::new(),
        Vec::new(),
        Some(b.fn_ty(Vec::new(), b.ty("i32"))),
        vec![
            b.let_stmt("c", Some(b.ty("i32")), Some(b.num("0"))),
            b.ret(Some(b.arrow_block(
                Vec::new(),
                None,
                vec![
                    b.expr_stmt(b.compound_assign(
                        BinaryOperatorKind::Add,
                        b.var("c"),
                        b.num("1"),
                    )),
                    b.ret(Some(b.var("c"))),
                ],
            ))),
        ],
    );

    let program = lower_expecting(vec![make]);

    let lambda = &program.functions[&sym("make$lambda0")];
    assert_eq!(lambda.captures.kind, CaptureKind::BoxedEnv);
    assert_eq!(lambda.captures.fields.len(), 1);
    assert_eq!(lambda.captures.fields[0].0, sym("c"));

    let make_fn = &program.functions[&sym("make")];
    assert!(any_expr(&make_fn.body, &|e| matches!(
        e.kind,
        ExprKind::Closure { .. }
    )));
    assert!(make_fn.placements.values().any(|p| matches!(
        p,
        Placement::Heap {
            needs_refcount: true
        }
    )));
}

/// `throw` turns the function's return type into a Result; `try`/`catch`
/// becomes a match on the call result
#[test]
fn throw_and_try_catch_lower_to_result_values() {
    let b = AstBuilder::new();

    let parse = b.function(
        "parse",
        Vec::new(),
        vec![("s", b.ty("string"))],
        Some(b.ty("i32")),
        vec![
            b.if_stmt(
                b.binary(BinaryOperatorKind::Equals, b.var("s"), b.str_lit("")),
                vec![b.throw(b.str_lit("empty"))],
                None,
            ),
            b.ret(Some(b.num("0"))),
        ],
    );

    let main = b.function(
        "main",
        Vec::new(),
        Vec::new(),
        Some(b.ty("void")),
        vec![b.try_stmt(
            vec![b.expr_stmt(b.call("parse", Vec::new(), vec![b.str_lit("x")]))],
            Some((
                "e",
                vec![b.expr_stmt(b.method_call(
                    b.var("console"),
                    "log",
                    vec![b.var("e")],
                ))],
            )),
            None,
        )],
    );

    let program = lower_expecting(vec![parse, main]);

    let sig = &program.signatures[&sym("parse")];
    assert!(matches!(
        &*sig.return_type,
        TypeKind::Result { ok, err }
            if matches!(&**ok, TypeKind::Integer { width: IntWidth::W32, signed: true })
                && matches!(&**err, TypeKind::String)
    ));
    assert!(sig.throws.is_some());

    // `throw "empty"` became `return Err("empty")`
    let parse_fn = &program.functions[&sym("parse")];
    assert!(any_expr(&parse_fn.body, &|e| matches!(
        e.kind,
        ExprKind::ResultLiteral { is_ok: false, .. }
    )));

    // the try block matches on the callee's result tag
    let main_fn = &program.functions[&sym("main")];
    assert!(any_stmt(&main_fn.body, &|s| matches!(
        s,
        Stmt::MatchTag { arms, .. } if arms.len() == 2
    )));
}
