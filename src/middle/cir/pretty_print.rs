//! Human-readable Core IR dump. Purely for debugging and inspection; the
//! backend consumes the structured form, never this text.

use colored::Colorize;
use itertools::Itertools;

use crate::middle::cir;

pub fn pretty_print_function(function: &cir::FunctionDefinition) {
    print!(
        "{} {}{}",
        "fn".magenta(),
        function.symbol_name.value().blue(),
        "(".white()
    );

    print!(
        "{}",
        function
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let decl = &function.locals[*param];
                match function.param_modes.get(index) {
                    Some(mode) => format!("{} {}", decl.name, mode),
                    None => decl.name.to_string(),
                }
            })
            .join(", ")
            .white()
    );

    println!("{}", ") {".white());

    for statement in &function.body {
        print_stmt(statement, 1);
    }

    println!("{}", "}".white());
}

fn indent(depth: usize) {
    print!("{}", "    ".repeat(depth));
}

fn print_stmt(statement: &cir::Stmt, depth: usize) {
    indent(depth);

    match statement {
        cir::Stmt::Let { local, value } => match value {
            Some(value) => println!("{} _{} = {}", "let".cyan(), local.0, format_expr(value)),
            None => println!("{} _{}", "let".cyan(), local.0),
        },
        cir::Stmt::Assign { place, value } => {
            println!("{} = {}", format_place(place), format_expr(value))
        }
        cir::Stmt::Expr(value) => println!("{}", format_expr(value)),
        cir::Stmt::If {
            condition,
            then_block,
            else_block,
        } => {
            println!("{} {} {{", "if".cyan(), format_expr(condition));
            for statement in then_block {
                print_stmt(statement, depth + 1);
            }
            if !else_block.is_empty() {
                indent(depth);
                println!("{}", "} else {".white());
                for statement in else_block {
                    print_stmt(statement, depth + 1);
                }
            }
            indent(depth);
            println!("{}", "}".white());
        }
        cir::Stmt::Loop { body } => {
            println!("{} {{", "loop".cyan());
            for statement in body {
                print_stmt(statement, depth + 1);
            }
            indent(depth);
            println!("{}", "}".white());
        }
        cir::Stmt::Break => println!("{}", "break".cyan()),
        cir::Stmt::Continue => println!("{}", "continue".cyan()),
        cir::Stmt::Return(value) => match value {
            Some(value) => println!("{} {}", "return".cyan(), format_expr(value)),
            None => println!("{}", "return".cyan()),
        },
        cir::Stmt::MatchTag {
            scrutinee,
            arms,
            default,
        } => {
            println!("{} {} {{", "match-tag".cyan(), format_expr(scrutinee));
            for arm in arms {
                indent(depth + 1);
                match arm.binding {
                    Some(binding) => println!("{} {} _{} {}", arm.tag, "=>".white(), binding.0, "{".white()),
                    None => println!("{} {} {}", arm.tag, "=>".white(), "{".white()),
                }
                for statement in &arm.body {
                    print_stmt(statement, depth + 2);
                }
                indent(depth + 1);
                println!("{}", "}".white());
            }
            if !default.is_empty() {
                indent(depth + 1);
                println!("{} {}", "_ =>".white(), "{".white());
                for statement in default {
                    print_stmt(statement, depth + 2);
                }
                indent(depth + 1);
                println!("{}", "}".white());
            }
            indent(depth);
            println!("{}", "}".white());
        }
        cir::Stmt::Retain(place) => println!("{} {}", "retain".yellow(), format_place(place)),
        cir::Stmt::Release(place) => println!("{} {}", "release".yellow(), format_place(place)),
    }
}

fn format_place(place: &cir::Place) -> String {
    let mut text = format!("_{}", place.base.0);
    for projection in &place.projections {
        match projection {
            cir::Projection::Field(index) => text.push_str(&format!(".{index}")),
            cir::Projection::Index(index) => text.push_str(&format!("[{}]", format_expr(index))),
        }
    }
    text
}

fn format_expr(value: &cir::Expr) -> String {
    match &value.kind {
        cir::ExprKind::Literal(literal) => match literal {
            cir::Literal::Int(value) => value.to_string(),
            cir::Literal::Float(value) => format!("{value:?}"),
            cir::Literal::Bool(value) => value.to_string(),
            cir::Literal::Str(value) => format!("{:?}", value.value()),
        },
        cir::ExprKind::Local(local) => format!("_{}", local.0),
        cir::ExprKind::FunctionRef(name) => format!("&{name}"),
        cir::ExprKind::Field { base, index } => format!("{}.{index}", format_expr(base)),
        cir::ExprKind::Index { base, index } => {
            format!("{}[{}]", format_expr(base), format_expr(index))
        }
        cir::ExprKind::Call { callee, arguments } => {
            let arguments = arguments.iter().map(format_expr).join(", ");
            match callee {
                cir::Callee::Static(name) => format!("{name}({arguments})"),
                cir::Callee::Value(target) => format!("({})({arguments})", format_expr(target)),
                cir::Callee::Intrinsic(intrinsic) => format!("@{intrinsic}({arguments})"),
            }
        }
        cir::ExprKind::Unary { operator, operand } => {
            let symbol = match operator {
                cir::UnaryOp::Negate => "-",
                cir::UnaryOp::Not => "!",
                cir::UnaryOp::BitNot => "~",
            };
            format!("{symbol}{}", format_expr(operand))
        }
        cir::ExprKind::Binary { operator, lhs, rhs } => {
            let symbol = match operator {
                cir::BinOp::Add => "+",
                cir::BinOp::Sub => "-",
                cir::BinOp::Mul => "*",
                cir::BinOp::Div => "/",
                cir::BinOp::Rem => "%",
                cir::BinOp::Eq => "==",
                cir::BinOp::Ne => "!=",
                cir::BinOp::Lt => "<",
                cir::BinOp::Le => "<=",
                cir::BinOp::Gt => ">",
                cir::BinOp::Ge => ">=",
                cir::BinOp::BitAnd => "&",
                cir::BinOp::BitOr => "|",
                cir::BinOp::BitXor => "^",
                cir::BinOp::Shl => "<<",
                cir::BinOp::Shr => ">>",
            };
            format!("({} {symbol} {})", format_expr(lhs), format_expr(rhs))
        }
        cir::ExprKind::StructLiteral { id, fields, .. } => {
            format!(
                "struct#{}{{{}}}",
                id.0,
                fields.iter().map(format_expr).join(", ")
            )
        }
        cir::ExprKind::ArrayLiteral { elements, .. } => {
            format!("[{}]", elements.iter().map(format_expr).join(", "))
        }
        cir::ExprKind::TupleLiteral(elements) => {
            format!("({})", elements.iter().map(format_expr).join(", "))
        }
        cir::ExprKind::UnionLiteral { tag, payload, .. } => {
            format!("union#{tag}({})", format_expr(payload))
        }
        cir::ExprKind::OptionLiteral(inner) => match inner {
            Some(inner) => format!("some({})", format_expr(inner)),
            None => "none".to_string(),
        },
        cir::ExprKind::ResultLiteral { is_ok, value } => {
            let tag = if *is_ok { "ok" } else { "err" };
            match value {
                Some(value) => format!("{tag}({})", format_expr(value)),
                None => format!("{tag}()"),
            }
        }
        cir::ExprKind::Closure {
            function, captures, ..
        } => {
            format!(
                "closure {}[{}]",
                function,
                captures.iter().map(|c| format!("_{}", c.0)).join(", ")
            )
        }
        cir::ExprKind::TagOf(inner) => format!("tag({})", format_expr(inner)),
        cir::ExprKind::PayloadOf { value, tag } => {
            format!("payload#{tag}({})", format_expr(value))
        }
        cir::ExprKind::StringConcat(parts) => {
            format!("concat({})", parts.iter().map(format_expr).join(", "))
        }
    }
}
