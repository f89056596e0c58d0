//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the linker using `clap`,
//! and maps it onto the library's link options and diagnostic filter.

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::diagnostic::MessageFilter;
use crate::linker::LinkOptions;
use crate::output::OutputType;
use crate::utils::split_cultures;

/// Links compiled installer fragments and libraries into a single output.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Intermediate and library documents, in link order
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output file; its extension selects the expected output type
    #[arg(short, long = "out", default_value = "out.msi")]
    pub output: PathBuf,

    /// Cultures to localize for, in priority order, separated by ';'
    #[arg(long)]
    pub cultures: Option<String>,

    /// Localization (.wxl) files
    #[arg(short = 'l', long = "loc")]
    pub localizations: Vec<PathBuf>,

    /// Libraries to link as extensions, linked in only when referenced
    #[arg(long = "ext")]
    pub extensions: Vec<PathBuf>,

    /// Show pedantic messages
    #[arg(long)]
    pub pedantic: bool,

    /// Report unresolved references as warnings
    #[arg(long = "allow-unresolved")]
    pub allow_unresolved_references: bool,

    /// Accept documents of other format versions
    #[arg(long)]
    pub suppress_version_check: bool,

    /// Suppress the warning with this code
    #[arg(long = "sw", value_name = "CODE")]
    pub suppress_warnings: Vec<u32>,

    /// Suppress all warnings
    #[arg(long = "sw-all")]
    pub suppress_all_warnings: bool,

    /// Treat the warning with this code as an error
    #[arg(long = "wx", value_name = "CODE")]
    pub elevate_warnings: Vec<u32>,

    /// Treat all warnings as errors
    #[arg(long = "wx-all")]
    pub warnings_as_errors: bool,

    /// Show informational messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the symbols of sections that were not linked to this file
    #[arg(long)]
    pub unreferenced_symbols: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", help = "Set the logging level")]
    pub log_level: String,
}

impl Config {
    pub fn cultures(&self) -> Option<Vec<String>> {
        self.cultures
            .as_deref()
            .map(split_cultures)
            .filter(|cultures| !cultures.is_empty())
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            expected_type: OutputType::from_path(&self.output),
            pedantic: self.pedantic,
            allow_unresolved_references: self.allow_unresolved_references,
            tie_break: None,
        }
    }

    pub fn message_filter(&self) -> MessageFilter {
        MessageFilter {
            show_verbose: self.verbose,
            suppress_all_warnings: self.suppress_all_warnings,
            suppressed_warnings: self.suppress_warnings.iter().copied().collect::<HashSet<_>>(),
            warnings_as_errors: self.warnings_as_errors,
            elevated_warnings: self.elevate_warnings.iter().copied().collect(),
        }
    }
}
