//! Installer definition linker library.
//!
//! This library provides the core components for the `ild` linker.
//! It is organized into several modules:
//! - `table`, `row`: Table definitions and typed rows.
//! - `section`: Compiled sections with their symbols and references.
//! - `symbol`: Symbol table management.
//! - `graph`: Reachability and the complex reference graph.
//! - `linker`: The main linking orchestration.
//! - `localization`, `localizer`: Localization documents and their merge.
//! - `output`, `writer`: The linked output and its persistence.
//! - `diagnostic`: Structured diagnostics and the driver-side filter.
//! - `extension`: Extension capabilities.
//! - `intermediate`: Loading intermediates and libraries.
//! - `config`: CLI configuration.

pub mod config;
pub mod diagnostic;
pub mod extension;
pub mod graph;
pub mod intermediate;
pub mod linker;
pub mod localization;
pub mod localizer;
pub mod output;
pub mod row;
pub mod section;
pub mod symbol;
pub mod table;
pub mod utils;
pub mod writer;
