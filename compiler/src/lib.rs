// swpc — Software pipeline compiler
//
// Library root. Front end (lexer, parser, resolve), the software pipeline
// injection pass and its collaborators, lowering and the reference
// interpreter.

pub mod annotation;
pub mod ast;
pub mod build;
pub mod decompose;
pub mod depend;
pub mod diag;
pub mod dot;
pub mod error;
pub mod footprint;
pub mod id;
pub mod inject;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod print;
pub mod resolve;
pub mod rotation;
pub mod schedule;
pub mod validate;
