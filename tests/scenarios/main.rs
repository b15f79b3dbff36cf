//! Scenario-based tests for flow

mod helpers;

mod background;
mod config;
mod cycles;
mod drone;
mod graphviz;
mod local_runner;
mod pipelines;
mod resolution;
mod validation;
