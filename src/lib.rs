//! Turnstile: pre-execution admission control for multi-agent workflows.
//!
//! Sits between a multi-agent router and the agents it dispatches to. Before
//! any tool call runs, turnstile orders the workflow's tasks, checks each
//! agent's declared capabilities and tool preconditions, and enforces the
//! agent's policy card (permissions, rate limits, PII redaction, output
//! limits).
//!
//! See `DESIGN.md` for the full architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod logging;
pub mod types;

pub mod catalog;

pub mod policy;
pub mod resolver;
pub mod router;

pub mod bridge;
