//! Pipeline-level checks for the individual middle-end guarantees: structural
//! identity, union classification, enum tags, subset rejection, cycle
//! handling, dead generics, ownership labeling, and desugaring idempotence.

mod support;

use silt::diagnostics::DiagnosticKind;
use silt::frontend::ast::{BinaryOperatorKind, EnumInitializer};
use silt::middle::cir::{ExprKind, Literal, ParamMode};
use silt::middle::desugar::redesugar;
use silt::middle::ty::{IntWidth, TypeKind};
use support::{AstBuilder, any_expr, lower, lower_expecting, sym};

#[test]
fn identical_shapes_share_one_struct_entry() {
    let b = AstBuilder::new();

    let first = b.interface("Point2", vec![("x", b.ty("f64")), ("y", b.ty("f64"))]);
    let second = b.interface("Coord", vec![("x", b.ty("f64")), ("y", b.ty("f64"))]);
    let f = b.function(
        "f",
        Vec::new(),
        vec![("p", b.ty("Point2"))],
        Some(b.ty("f64")),
        vec![b.ret(Some(b.member(b.var("p"), "x")))],
    );
    let g = b.function(
        "g",
        Vec::new(),
        vec![("c", b.ty("Coord"))],
        Some(b.ty("f64")),
        vec![b.ret(Some(b.member(b.var("c"), "x")))],
    );

    let program = lower_expecting(vec![first, second, f, g]);

    // Exactly one table entry for the shape, and both users reference it by
    // the same handle
    let matching = program
        .structs
        .iter()
        .filter(|s| {
            s.fields.len() == 2 && s.fields[0].name == sym("x") && s.fields[1].name == sym("y")
        })
        .count();
    assert_eq!(matching, 1);

    let f_param = &program.signatures[&sym("f")].parameters[0].ty;
    let g_param = &program.signatures[&sym("g")].parameters[0].ty;
    assert_eq!(f_param, g_param);

    // The first declared name wins
    let TypeKind::Struct(id) = &**f_param else {
        panic!("parameter is a struct");
    };
    assert_eq!(program.structs[*id].name, sym("Point2"));
}

#[test]
fn string_literal_union_compiles_to_tag_integers() {
    let b = AstBuilder::new();

    let mode = b.alias(
        "Mode",
        b.union_ty(vec![b.string_lit_ty("on"), b.string_lit_ty("off")]),
    );
    let f = b.function(
        "f",
        Vec::new(),
        vec![("m", b.ty("Mode"))],
        Some(b.ty("boolean")),
        vec![b.ret(Some(b.binary(
            BinaryOperatorKind::Equals,
            b.var("m"),
            b.str_lit("on"),
        )))],
    );

    let program = lower_expecting(vec![mode, f]);

    let sig = &program.signatures[&sym("f")];
    assert!(matches!(
        &*sig.parameters[0].ty,
        TypeKind::Integer {
            width: IntWidth::W32,
            signed: true
        }
    ));

    // The comparison is against the compile-time tag, not a string
    let body = &program.functions[&sym("f")].body;
    assert!(any_expr(body, &|e| matches!(
        e.kind,
        ExprKind::Literal(Literal::Int(0))
    )));
    assert!(!any_expr(body, &|e| matches!(
        e.kind,
        ExprKind::Literal(Literal::Str(_))
    )));
}

#[test]
fn enum_members_auto_increment_from_explicit_values() {
    let b = AstBuilder::new();

    let color = b.enum_item(
        "Color",
        vec![
            ("Red", None),
            ("Green", Some(EnumInitializer::Number(5))),
            ("Blue", None),
        ],
    );

    let program = lower_expecting(vec![color]);

    let def = program
        .enums
        .iter()
        .find(|e| e.name == sym("Color"))
        .expect("Color enum registered");
    let tags: Vec<i64> = def.variants.iter().map(|v| v.tag).collect();
    assert_eq!(tags, vec![0, 5, 6]);
}

#[test]
fn any_typed_parameter_is_rejected() {
    let b = AstBuilder::new();

    let bad = b.function(
        "bad",
        Vec::new(),
        vec![("x", b.any_ty())],
        Some(b.ty("void")),
        Vec::new(),
    );
    let good = b.function("good", Vec::new(), Vec::new(), Some(b.ty("void")), Vec::new());

    let diagnostics = lower(vec![bad, good]).expect_err("validation fails");
    assert!(diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::UnsupportedConstruct));
}

#[test]
fn type_cycle_without_weak_edge_is_an_error() {
    let b = AstBuilder::new();

    let node = b.interface("Node", vec![("value", b.ty("f64")), ("next", b.ty("Node"))]);

    let diagnostics = lower(vec![node]).expect_err("cycle detected");
    assert!(diagnostics.iter().any(|d| d.kind == DiagnosticKind::CycleError));
}

#[test]
fn weak_edge_legitimizes_a_type_cycle() {
    let b = AstBuilder::new();

    let node = b.interface(
        "Node",
        vec![
            ("value", b.ty("f64")),
            ("next", b.ty_args("Weak", vec![b.ty("Node")])),
        ],
    );

    let program = lower_expecting(vec![node]);

    let def = program
        .structs
        .iter()
        .find(|s| s.name == sym("Node") && s.fields.len() == 2)
        .expect("Node struct registered");
    assert!(def.fields[1].weak);
    assert!(!def.fields[0].weak);
}

#[test]
fn uncalled_generics_leave_no_code_behind() {
    let b = AstBuilder::new();

    let unused = b.function(
        "unused",
        vec![b.type_param("T", None, None)],
        vec![("x", b.ty("T"))],
        Some(b.ty("T")),
        vec![b.ret(Some(b.var("x")))],
    );
    let main = b.function("main", Vec::new(), Vec::new(), Some(b.ty("void")), Vec::new());

    let program = lower_expecting(vec![unused, main]);

    assert!(program
        .functions
        .keys()
        .all(|name| !name.value().starts_with("unused")));
    assert!(program
        .signatures
        .keys()
        .all(|name| !name.value().starts_with("unused")));
}

#[test]
fn violated_extends_constraint_aborts_compilation() {
    let b = AstBuilder::new();

    let has_id = b.interface("HasId", vec![("id", b.ty("f64"))]);
    let get = b.function(
        "get",
        vec![b.type_param("T", Some(b.ty("HasId")), None)],
        vec![("x", b.ty("T"))],
        Some(b.ty("f64")),
        vec![b.ret(Some(b.num("0")))],
    );
    let main = b.function(
        "main",
        Vec::new(),
        Vec::new(),
        Some(b.ty("void")),
        vec![b.expr_stmt(b.call(
            "get",
            Vec::new(),
            vec![b.object_lit(vec![("name", b.str_lit("a"))])],
        ))],
    );

    let diagnostics = lower(vec![has_id, get, main]).expect_err("constraint violated");
    assert!(diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::ConstraintViolation));
}

#[test]
fn calling_a_throwing_function_outside_try_is_a_propagation_error() {
    let b = AstBuilder::new();

    let fail = b.function(
        "fail",
        Vec::new(),
        Vec::new(),
        Some(b.ty("void")),
        vec![b.throw(b.str_lit("boom"))],
    );
    let main = b.function(
        "main",
        Vec::new(),
        Vec::new(),
        Some(b.ty("void")),
        vec![b.expr_stmt(b.call("fail", Vec::new(), Vec::new()))],
    );

    let diagnostics = lower(vec![fail, main]).expect_err("propagation error");
    assert!(diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::PropagationError));
}

#[test]
fn parameter_modes_follow_usage() {
    let b = AstBuilder::new();

    let point = b.interface("Point", vec![("x", b.ty("f64")), ("y", b.ty("f64"))]);
    let keep = b.function(
        "keep",
        Vec::new(),
        vec![("p", b.ty("Point"))],
        Some(b.ty("Point")),
        vec![b.ret(Some(b.var("p")))],
    );
    let read = b.function(
        "read",
        Vec::new(),
        vec![("p", b.ty("Point"))],
        Some(b.ty("f64")),
        vec![b.ret(Some(b.member(b.var("p"), "x")))],
    );
    let bump = b.function(
        "bump",
        Vec::new(),
        vec![("p", b.ty("Point"))],
        Some(b.ty("void")),
        vec![b.expr_stmt(b.assign(b.member(b.var("p"), "x"), b.num("1")))],
    );

    let program = lower_expecting(vec![point, keep, read, bump]);

    assert_eq!(
        program.functions[&sym("keep")].param_modes,
        vec![ParamMode::Owned]
    );
    assert_eq!(
        program.functions[&sym("read")].param_modes,
        vec![ParamMode::Borrowed]
    );
    assert_eq!(
        program.functions[&sym("bump")].param_modes,
        vec![ParamMode::BorrowedMut]
    );
}

#[test]
fn lowered_output_is_a_fixed_point_of_desugaring() {
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
        "area",
        Vec::new(),
        vec![("s", b.ty("Shape"))],
        Some(b.ty("f64")),
        vec![b.switch(
            b.member(b.var("s"), "kind"),
            vec![
                (
                    Some(b.str_lit("circle")),
                    vec![b.ret(Some(b.member(b.var("s"), "r")))],
                ),
                (
                    Some(b.str_lit("rect")),
                    vec![b.ret(Some(b.member(b.var("s"), "w")))],
                ),
            ],
        )],
    );

    let program = lower_expecting(vec![shape, area]);

    for function in program.functions.values() {
        let again = redesugar(function);
        assert_eq!(again.body, function.body, "{}", function.symbol_name);
        assert_eq!(again.locals, function.locals);
        assert_eq!(again.params, function.params);
    }
}
