//! Ownership analysis: the last pass. Labels every parameter `Owned`,
//! `Borrowed`, or `BorrowedMut`, decides stack/heap placement per allocation
//! site, promotes the environments of escaping closures to heap capture
//! boxes, and inserts the retain/release operations a reference-counting
//! backend needs.
//!
//! Everything here is a pure function of the Core IR: the facts are collected
//! by a flow-insensitive walk per function, parameter modes iterate to a
//! fixed point over the call graph (modes only ever escalate, so the
//! iteration terminates), and every table is ordered. Two runs over the same
//! program produce identical labels.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    frontend::intern::InternedSymbol,
    middle::cir::{
        AllocId, Callee, CaptureKind, Expr, ExprKind, FunctionDefinition, FunctionSig, Intrinsic,
        LocalId, ParamMode, Place, Placement, Stmt,
    },
};

/// Runs the full analysis over the function table in place
pub fn analyze_program(
    functions: &mut BTreeMap<InternedSymbol, FunctionDefinition>,
    signatures: &BTreeMap<InternedSymbol, FunctionSig>,
) {
    // Static facts are mode-independent; collect them once
    let mut all_facts: BTreeMap<InternedSymbol, BodyFacts> = functions
        .iter()
        .map(|(name, function)| (*name, collect_facts(function)))
        .collect();

    let modes = infer_parameter_modes(functions, signatures, &mut all_facts);

    for (name, function_modes) in &modes {
        if let Some(function) = functions.get_mut(name) {
            function.param_modes = function_modes.clone();
        }
    }

    // Escape analysis, placements, and the set of escaping closures
    let mut boxed_lambdas: BTreeSet<InternedSymbol> = BTreeSet::new();

    for (name, facts) in &all_facts {
        let escapes = compute_escapes(facts);
        let placements = decide_placements(facts, &escapes);

        for site in &facts.closures {
            if closure_escapes(site, &escapes) {
                boxed_lambdas.insert(site.function);
            }
        }

        if let Some(function) = functions.get_mut(name) {
            function.placements = placements;
        }
    }

    for name in &boxed_lambdas {
        if let Some(lambda) = functions.get_mut(name) {
            if !lambda.captures.fields.is_empty() {
                lambda.captures.kind = CaptureKind::BoxedEnv;
            }
        }
    }

    insert_refcount_ops(functions, signatures, &modes, &all_facts);
}

/* Fact collection */

/// Where a value produced by an expression ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Sink {
    /// Consumed locally: operands, conditions, discarded results
    Discard,
    /// Flows into a local binding (directly or as part of an aggregate)
    Local(LocalId),
    /// Returned from the function
    Returned,
    /// Passed to a parameter that takes ownership
    OwnedArg,
}

#[derive(Debug, Clone)]
struct ClosureSite {
    function: InternedSymbol,
    captures: Vec<LocalId>,
    sink: Sink,
    alloc: AllocId,
}

#[derive(Debug, Default)]
struct BodyFacts {
    /// Whole-value reads per local; more than one live read means the value
    /// is observably aliased
    whole_reads: BTreeMap<LocalId, u32>,
    /// Locals whose whole value reaches a return
    returned: BTreeSet<LocalId>,
    /// Locals stored into a field or element
    stored: BTreeSet<LocalId>,
    /// Locals written through (`p.f = ...`, `p[i] = ...`, mutating intrinsics)
    written: BTreeSet<LocalId>,
    /// Value-flow edges `from -> to` between locals
    flows: BTreeSet<(LocalId, LocalId)>,
    /// Allocation sites and where their value goes
    allocs: BTreeMap<AllocId, Sink>,
    closures: Vec<ClosureSite>,
    /// `(callee, argument local, argument index)` for every direct call; the
    /// mode-dependent facts are recomputed from these each round
    static_call_args: Vec<(InternedSymbol, LocalId, usize)>,
    /// Mode-dependent escape additions, refreshed per fixed-point round
    owned_args: BTreeSet<LocalId>,
}

fn collect_facts(function: &FunctionDefinition) -> BodyFacts {
    let mut facts = BodyFacts::default();
    collect_stmts(&function.body, &mut facts);
    facts
}

fn collect_stmts(statements: &[Stmt], facts: &mut BodyFacts) {
    for statement in statements {
        match statement {
            Stmt::Let { local, value } => {
                if let Some(value) = value {
                    collect_value(value, Sink::Local(*local), facts);
                }
            }
            Stmt::Assign { place, value } => {
                collect_place(place, facts);
                if place.is_bare_local() {
                    collect_value(value, Sink::Local(place.base), facts);
                } else {
                    // A store into a field or element: the base is written
                    // through and the value is stored
                    facts.written.insert(place.base);
                    mark_stored(value, facts);
                    collect_value(value, Sink::Local(place.base), facts);
                }
            }
            Stmt::Expr(value) => collect_value(value, Sink::Discard, facts),
            Stmt::If {
                condition,
                then_block,
                else_block,
            } => {
                collect_value(condition, Sink::Discard, facts);
                collect_stmts(then_block, facts);
                collect_stmts(else_block, facts);
            }
            Stmt::Loop { body } => collect_stmts(body, facts),
            Stmt::Return(value) => {
                if let Some(value) = value {
                    collect_value(value, Sink::Returned, facts);
                }
            }
            Stmt::MatchTag {
                scrutinee,
                arms,
                default,
            } => {
                collect_value(scrutinee, Sink::Discard, facts);
                for arm in arms {
                    // The payload binding is a copy of part of the scrutinee;
                    // treat it as flowing from the scrutinee local
                    if let (Some(binding), ExprKind::Local(source)) =
                        (arm.binding, &scrutinee.kind)
                    {
                        facts.flows.insert((*source, binding));
                    }
                    collect_stmts(&arm.body, facts);
                }
                collect_stmts(default, facts);
            }
            Stmt::Break | Stmt::Continue => {}
            Stmt::Retain(place) | Stmt::Release(place) => collect_place(place, facts),
        }
    }
}

fn collect_place(place: &Place, facts: &mut BodyFacts) {
    for projection in &place.projections {
        if let crate::middle::cir::Projection::Index(index) = projection {
            collect_value(index, Sink::Discard, facts);
        }
    }
}

/// Marks the locals read by `value` as stored into a field or element
fn mark_stored(value: &Expr, facts: &mut BodyFacts) {
    if let ExprKind::Local(local) = &value.kind {
        facts.stored.insert(*local);
    }
}

fn collect_value(value: &Expr, sink: Sink, facts: &mut BodyFacts) {
    match &value.kind {
        ExprKind::Local(local) => {
            *facts.whole_reads.entry(*local).or_insert(0) += 1;
            match sink {
                Sink::Discard => {}
                Sink::Local(target) => {
                    facts.flows.insert((*local, target));
                }
                Sink::Returned => {
                    facts.returned.insert(*local);
                }
                Sink::OwnedArg => {
                    facts.owned_args.insert(*local);
                }
            }
        }
        ExprKind::Literal(_) | ExprKind::FunctionRef(_) => {}
        // Reading a projection does not consume the base
        ExprKind::Field { base, .. } => collect_value(base, Sink::Discard, facts),
        ExprKind::Index { base, index } => {
            collect_value(base, Sink::Discard, facts);
            collect_value(index, Sink::Discard, facts);
        }
        ExprKind::Call { callee, arguments } => {
            match callee {
                Callee::Static(symbol) => {
                    for (index, argument) in arguments.iter().enumerate() {
                        if let ExprKind::Local(local) = &argument.kind {
                            facts.static_call_args.push((*symbol, *local, index));
                        }
                        collect_value(argument, Sink::Discard, facts);
                    }
                }
                Callee::Value(target) => {
                    collect_value(target, Sink::Discard, facts);
                    for argument in arguments {
                        collect_value(argument, Sink::Discard, facts);
                    }
                }
                Callee::Intrinsic(intrinsic) => {
                    // push mutates its receiver and stores the element into it
                    if matches!(intrinsic, Intrinsic::ArrayPush | Intrinsic::ArrayPop) {
                        if let Some(ExprKind::Local(receiver)) =
                            arguments.first().map(|a| &a.kind)
                        {
                            facts.written.insert(*receiver);

                            if let Some(element) = arguments.get(1) {
                                mark_stored(element, facts);
                                collect_value(element, Sink::Local(*receiver), facts);
                            }
                        }
                        if let Some(receiver) = arguments.first() {
                            collect_value(receiver, Sink::Discard, facts);
                        }
                    } else {
                        for argument in arguments {
                            collect_value(argument, Sink::Discard, facts);
                        }
                    }
                }
            }
        }
        ExprKind::Unary { operand, .. } => collect_value(operand, Sink::Discard, facts),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_value(lhs, Sink::Discard, facts);
            collect_value(rhs, Sink::Discard, facts);
        }
        ExprKind::StructLiteral { fields, alloc, .. } => {
            facts.allocs.insert(*alloc, sink);
            for field in fields {
                mark_stored(field, facts);
                collect_value(field, sink, facts);
            }
        }
        ExprKind::ArrayLiteral { elements, alloc } => {
            facts.allocs.insert(*alloc, sink);
            for element in elements {
                mark_stored(element, facts);
                collect_value(element, sink, facts);
            }
        }
        ExprKind::TupleLiteral(elements) => {
            for element in elements {
                mark_stored(element, facts);
                collect_value(element, sink, facts);
            }
        }
        ExprKind::UnionLiteral { payload, .. } => {
            mark_stored(payload, facts);
            collect_value(payload, sink, facts);
        }
        ExprKind::OptionLiteral(inner) => {
            if let Some(inner) = inner {
                collect_value(inner, sink, facts);
            }
        }
        ExprKind::ResultLiteral { value, .. } => {
            if let Some(value) = value {
                collect_value(value, sink, facts);
            }
        }
        ExprKind::Closure {
            function,
            captures,
            alloc,
        } => {
            facts.allocs.insert(*alloc, sink);
            facts.closures.push(ClosureSite {
                function: *function,
                captures: captures.clone(),
                sink,
                alloc: *alloc,
            });
            for capture in captures {
                *facts.whole_reads.entry(*capture).or_insert(0) += 1;
            }
        }
        ExprKind::TagOf(inner) => collect_value(inner, Sink::Discard, facts),
        ExprKind::PayloadOf { value, .. } => collect_value(value, Sink::Discard, facts),
        ExprKind::StringConcat(parts) => {
            for part in parts {
                collect_value(part, Sink::Discard, facts);
            }
        }
    }
}

/* Parameter modes */

/// Iterates parameter modes to a fixed point. Every function starts fully
/// borrowed; a round can only escalate Borrowed -> Owned/BorrowedMut, so the
/// iteration is monotone and terminates
fn infer_parameter_modes(
    functions: &BTreeMap<InternedSymbol, FunctionDefinition>,
    signatures: &BTreeMap<InternedSymbol, FunctionSig>,
    all_facts: &mut BTreeMap<InternedSymbol, BodyFacts>,
) -> BTreeMap<InternedSymbol, Vec<ParamMode>> {
    let mut modes: BTreeMap<InternedSymbol, Vec<ParamMode>> = functions
        .iter()
        .map(|(name, function)| (*name, vec![ParamMode::Borrowed; function.params.len()]))
        .collect();

    loop {
        let mut changed = false;

        for (name, function) in functions {
            let facts = all_facts.get_mut(name).expect("facts collected");

            // Refresh the mode-dependent facts from the callee modes of the
            // previous round
            facts.owned_args.clear();
            let mut call_written: BTreeSet<LocalId> = BTreeSet::new();
            for (callee, local, index) in &facts.static_call_args {
                let mode = modes
                    .get(callee)
                    .and_then(|callee_modes| callee_modes.get(*index))
                    .copied()
                    .unwrap_or(ParamMode::Borrowed);
                match mode {
                    ParamMode::Owned => {
                        facts.owned_args.insert(*local);
                    }
                    ParamMode::BorrowedMut => {
                        call_written.insert(*local);
                    }
                    ParamMode::Borrowed => {}
                }
            }

            let escapes = compute_escapes(facts);
            let sig = signatures.get(name);

            let new_modes: Vec<ParamMode> = function
                .params
                .iter()
                .enumerate()
                .map(|(index, param)| {
                    let readonly = sig
                        .and_then(|sig| sig.parameters.get(index))
                        .map(|p| p.readonly)
                        .unwrap_or(false);

                    let written =
                        facts.written.contains(param) || call_written.contains(param);
                    let escaping = escapes.contains(param)
                        || facts.stored.contains(param)
                        || facts.returned.contains(param);

                    if written && !readonly {
                        ParamMode::BorrowedMut
                    } else if escaping {
                        ParamMode::Owned
                    } else {
                        ParamMode::Borrowed
                    }
                })
                .collect();

            let entry = modes.get_mut(name).expect("mode entry");
            if *entry != new_modes {
                *entry = new_modes;
                changed = true;
            }
        }

        if !changed {
            return modes;
        }
    }
}

/* Escape analysis */

/// The set of locals whose value may outlive the creating activation:
/// returned, handed to an owning callee, captured by an escaping closure, or
/// flowing into any of those
fn compute_escapes(facts: &BodyFacts) -> BTreeSet<LocalId> {
    let mut escapes: BTreeSet<LocalId> = facts.returned.iter().copied().collect();
    escapes.extend(facts.owned_args.iter().copied());

    loop {
        let mut changed = false;

        for (from, to) in &facts.flows {
            if escapes.contains(to) && escapes.insert(*from) {
                changed = true;
            }
        }

        for site in &facts.closures {
            if closure_escapes(site, &escapes) {
                for capture in &site.captures {
                    if escapes.insert(*capture) {
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            return escapes;
        }
    }
}

fn closure_escapes(site: &ClosureSite, escapes: &BTreeSet<LocalId>) -> bool {
    match site.sink {
        Sink::Returned | Sink::OwnedArg => true,
        Sink::Local(local) => escapes.contains(&local),
        Sink::Discard => false,
    }
}

/// Stack unless the value can outlive the frame. A heap value additionally
/// carries a refcount when it is observably aliased
fn decide_placements(
    facts: &BodyFacts,
    escapes: &BTreeSet<LocalId>,
) -> BTreeMap<AllocId, Placement> {
    let mut placements = BTreeMap::new();

    for (alloc, sink) in &facts.allocs {
        let placement = match sink {
            Sink::Returned | Sink::OwnedArg => Placement::Heap {
                needs_refcount: false,
            },
            Sink::Local(local) => {
                if escapes.contains(local) {
                    let aliased = facts.whole_reads.get(local).copied().unwrap_or(0) > 1;
                    Placement::Heap {
                        needs_refcount: aliased,
                    }
                } else {
                    Placement::Stack
                }
            }
            Sink::Discard => Placement::Stack,
        };
        placements.insert(*alloc, placement);
    }

    // An escaping closure's allocation is the capture box itself
    for site in &facts.closures {
        if closure_escapes(site, escapes) && !site.captures.is_empty() {
            placements.insert(
                site.alloc,
                Placement::Heap {
                    needs_refcount: true,
                },
            );
        }
    }

    placements
}

/* Retain / release insertion */

/// Inserts a retain before every call that passes an owned, pointer-shaped
/// argument the caller keeps using, and a release at function exit for heap
/// values whose refcount this frame owns. Borrowed arguments get neither
fn insert_refcount_ops(
    functions: &mut BTreeMap<InternedSymbol, FunctionDefinition>,
    signatures: &BTreeMap<InternedSymbol, FunctionSig>,
    modes: &BTreeMap<InternedSymbol, Vec<ParamMode>>,
    all_facts: &BTreeMap<InternedSymbol, BodyFacts>,
) {
    let names: Vec<InternedSymbol> = functions.keys().copied().collect();

    for name in names {
        let facts = &all_facts[&name];
        let function = functions.get_mut(&name).expect("function exists");

        let retains = plan_retains(function, signatures, modes, facts);
        let releases = plan_releases(function, facts);

        let body = std::mem::take(&mut function.body);
        let mut body = insert_retains(body, &retains);

        if !releases.is_empty() {
            // The trailing statement of a lowered body is a return whenever
            // one is needed; releases go right before it
            let trailing_return = matches!(body.last(), Some(Stmt::Return(_)));
            let insert_at = if trailing_return {
                body.len() - 1
            } else {
                body.len()
            };
            for local in releases.into_iter().rev() {
                body.insert(insert_at, Stmt::Release(Place::local(local)));
            }
        }

        function.body = body;
    }
}

/// Locals that need a retain immediately before some statement, keyed by a
/// per-body statement ordinal
fn plan_retains(
    function: &FunctionDefinition,
    signatures: &BTreeMap<InternedSymbol, FunctionSig>,
    modes: &BTreeMap<InternedSymbol, Vec<ParamMode>>,
    facts: &BodyFacts,
) -> BTreeSet<(InternedSymbol, LocalId, usize)> {
    let mut retains = BTreeSet::new();

    for (callee, local, index) in &facts.static_call_args {
        let mode = modes
            .get(callee)
            .and_then(|callee_modes| callee_modes.get(*index))
            .copied()
            .unwrap_or(ParamMode::Borrowed);
        if mode != ParamMode::Owned {
            continue;
        }

        // Signature-less callees cannot occur; be conservative if they do
        if signatures.get(callee).is_none() {
            continue;
        }

        let pointer_shaped = function
            .locals
            .get(*local)
            .map(|decl| decl.ty.is_pointer_shaped())
            .unwrap_or(false);
        let reused = facts.whole_reads.get(local).copied().unwrap_or(0) > 1;

        if pointer_shaped && reused {
            retains.insert((*callee, *local, *index));
        }
    }

    retains
}

/// Heap-allocated, refcounted locals this frame still owns at exit
fn plan_releases(function: &FunctionDefinition, facts: &BodyFacts) -> Vec<LocalId> {
    let mut releases = Vec::new();

    for (alloc, placement) in &function.placements {
        if !matches!(
            placement,
            Placement::Heap {
                needs_refcount: true
            }
        ) {
            continue;
        }

        if let Some(Sink::Local(local)) = facts.allocs.get(alloc) {
            // A returned value's ownership moves to the caller
            if !facts.returned.contains(local) && !releases.contains(local) {
                releases.push(*local);
            }
        }
    }

    releases
}

fn insert_retains(
    body: Vec<Stmt>,
    retains: &BTreeSet<(InternedSymbol, LocalId, usize)>,
) -> Vec<Stmt> {
    body.into_iter()
        .flat_map(|statement| {
            let mut emitted = Vec::with_capacity(1);

            let mut wanted: Vec<LocalId> = Vec::new();
            find_retained_args(&statement, retains, &mut wanted);
            for local in wanted {
                emitted.push(Stmt::Retain(Place::local(local)));
            }

            let statement = match statement {
                Stmt::If {
                    condition,
                    then_block,
                    else_block,
                } => Stmt::If {
                    condition,
                    then_block: insert_retains(then_block, retains),
                    else_block: insert_retains(else_block, retains),
                },
                Stmt::Loop { body } => Stmt::Loop {
                    body: insert_retains(body, retains),
                },
                Stmt::MatchTag {
                    scrutinee,
                    arms,
                    default,
                } => Stmt::MatchTag {
                    scrutinee,
                    arms: arms
                        .into_iter()
                        .map(|mut arm| {
                            arm.body = insert_retains(arm.body, retains);
                            arm
                        })
                        .collect(),
                    default: insert_retains(default, retains),
                },
                other => other,
            };

            emitted.push(statement);
            emitted
        })
        .collect()
}

/// Collects the owned arguments of direct calls at the top level of one
/// statement (nested blocks are handled by the recursive rebuild)
fn find_retained_args(
    statement: &Stmt,
    retains: &BTreeSet<(InternedSymbol, LocalId, usize)>,
    wanted: &mut Vec<LocalId>,
) {
    let value = match statement {
        Stmt::Let { value: Some(v), .. } => Some(v),
        Stmt::Assign { value, .. } => Some(value),
        Stmt::Expr(value) => Some(value),
        Stmt::Return(Some(value)) => Some(value),
        _ => None,
    };

    if let Some(value) = value {
        find_retained_args_expr(value, retains, wanted);
    }
}

fn find_retained_args_expr(
    value: &Expr,
    retains: &BTreeSet<(InternedSymbol, LocalId, usize)>,
    wanted: &mut Vec<LocalId>,
) {
    if let ExprKind::Call {
        callee: Callee::Static(symbol),
        arguments,
    } = &value.kind
    {
        for (index, argument) in arguments.iter().enumerate() {
            if let ExprKind::Local(local) = &argument.kind {
                if retains.contains(&(*symbol, *local, index)) && !wanted.contains(local) {
                    wanted.push(*local);
                }
            }
        }
    }

    // Calls can nest inside other expressions
    match &value.kind {
        ExprKind::Call { arguments, .. } => {
            for argument in arguments {
                find_retained_args_expr(argument, retains, wanted);
            }
        }
        ExprKind::Field { base, .. } | ExprKind::TagOf(base) => {
            find_retained_args_expr(base, retains, wanted)
        }
        ExprKind::Index { base, index } => {
            find_retained_args_expr(base, retains, wanted);
            find_retained_args_expr(index, retains, wanted);
        }
        ExprKind::Unary { operand, .. } => find_retained_args_expr(operand, retains, wanted),
        ExprKind::Binary { lhs, rhs, .. } => {
            find_retained_args_expr(lhs, retains, wanted);
            find_retained_args_expr(rhs, retains, wanted);
        }
        ExprKind::StructLiteral { fields, .. } => {
            for field in fields {
                find_retained_args_expr(field, retains, wanted);
            }
        }
        ExprKind::ArrayLiteral { elements, .. } | ExprKind::TupleLiteral(elements) => {
            for element in elements {
                find_retained_args_expr(element, retains, wanted);
            }
        }
        ExprKind::UnionLiteral { payload, .. } => {
            find_retained_args_expr(payload, retains, wanted)
        }
        ExprKind::OptionLiteral(Some(inner)) => find_retained_args_expr(inner, retains, wanted),
        ExprKind::ResultLiteral {
            value: Some(inner), ..
        } => find_retained_args_expr(inner, retains, wanted),
        ExprKind::PayloadOf { value, .. } => find_retained_args_expr(value, retains, wanted),
        ExprKind::StringConcat(parts) => {
            for part in parts {
                find_retained_args_expr(part, retains, wanted);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_set_follows_flow_edges() {
        let mut facts = BodyFacts::default();
        let a = LocalId(0);
        let b = LocalId(1);
        let c = LocalId(2);
        facts.returned.insert(b);
        facts.flows.insert((a, b));

        let escapes = compute_escapes(&facts);
        assert!(escapes.contains(&a));
        assert!(escapes.contains(&b));
        assert!(!escapes.contains(&c));
    }

    #[test]
    fn captured_locals_escape_with_their_closure() {
        let mut facts = BodyFacts::default();
        let captured = LocalId(0);
        facts.closures.push(ClosureSite {
            function: InternedSymbol::new("f$lambda0"),
            captures: vec![captured],
            sink: Sink::Returned,
            alloc: AllocId(0),
        });

        let escapes = compute_escapes(&facts);
        assert!(escapes.contains(&captured));
    }
}
