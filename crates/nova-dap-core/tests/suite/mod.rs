// Compiled by `tests/engine.rs`; one module per engine surface.
mod breakpoints;
mod source_lookup;
mod stack_trace;
