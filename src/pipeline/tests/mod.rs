//! Test suites for the self-change pipeline.

mod support;
