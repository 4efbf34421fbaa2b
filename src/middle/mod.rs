//! The middle end proper: types are resolved here and validated surface
//! syntax is desugared, monomorphized, and ownership-analyzed into Core IR
//! ready for a code generation backend.

pub mod cir;
pub mod context;
pub mod desugar;
pub mod monomorph;
pub mod ownership;
pub mod resolve;
pub mod ty;
pub mod validate;
