//! # Quant
//!
//! Portfolio construction on top of prepared return matrices.

pub mod portfolio;
