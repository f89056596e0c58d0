//! Entry point for the ild linker.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Load extension libraries, then the intermediates and libraries to link.
//! 3. Load localization files and collect library localization.
//! 4. Link, then filter and print the diagnostics.
//! 5. Write the output and, when asked, the unreferenced symbols.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ild::config::Config;
use ild::extension::{ExtensionData, LibraryExtension};
use ild::intermediate::{Loaded, Loader};
use ild::linker::Linker;
use ild::localization::LocalizationSet;
use ild::localizer::Localizer;
use ild::table::TableDefinitions;
use ild::writer;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let config = Config::parse();
    init_logging(&config.log_level);

    let mut loader = Loader::new(TableDefinitions::standard()).suppress_version_check(config.suppress_version_check);

    let mut extensions: Vec<Arc<dyn ExtensionData>> = Vec::new();
    for path in &config.extensions {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let library = loader
            .load_extension(path, &name)
            .with_context(|| format!("failed to load extension {}", path.display()))?;
        extensions.push(Arc::new(LibraryExtension::new(&name, library)));
    }

    let mut localizer = Localizer::new(config.cultures());
    let mut sections = Vec::new();
    for loaded in loader.load_all(&config.inputs).context("failed to load inputs")? {
        match loaded {
            Loaded::Intermediate(found) => sections.extend(found),
            Loaded::Library(library) => {
                localizer.add_library(&library);
                sections.extend(library.sections);
            }
        }
    }

    for set in LocalizationSet::load_all(&config.localizations).context("failed to load localization")? {
        localizer.add_localization(Arc::new(set));
    }

    let linker = Linker::new(config.link_options()).with_extensions(extensions);
    let result = linker.link(&sections, localizer);

    let diagnostics = config.message_filter().apply_all(result.diagnostics);
    for diagnostic in &diagnostics {
        eprintln!("{diagnostic}");
    }

    if let Some(path) = &config.unreferenced_symbols {
        let mut listing = String::new();
        for symbol in &result.unreferenced_symbols {
            listing.push_str(&symbol.to_string());
            listing.push('\n');
        }
        std::fs::write(path, listing).with_context(|| format!("failed to write {}", path.display()))?;
    }

    let failed = diagnostics.iter().any(|d| d.is_error());
    match result.output {
        Some(output) if !failed => {
            writer::write_output(&output, &config.output)?;
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}
