mod bootstrap;
mod canvas;
mod loop_runner;
mod panels;
mod software_ui;
mod swap_chain;

pub(crate) use bootstrap::{build_app, fatal_reporter, init_tracing};
pub(crate) use loop_runner::run;
