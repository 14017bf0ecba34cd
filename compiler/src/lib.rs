// dflow — Dataflow legalization for pipelined regions
//
// Library root. Front end, legalization sub-passes and the pass runner are
// declared here in pipeline order.

pub mod ast;
pub mod diag;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod use_index;

pub mod config;
pub mod error;

pub mod alap;
pub mod bypass;
pub mod compact;
pub mod legalize;
pub mod memflow;
pub mod successors;

pub mod dot;
pub mod pass;
pub mod pipeline;
