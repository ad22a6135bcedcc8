//! tabrule command line interface
//!
//! `tabrule check` compiles a dictionary file and reports schema errors;
//! `tabrule stream` reads an input table, evaluates derived fields and
//! writes the result table.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tabrule_data::dictionary::Dictionary;
use tabrule_data::evaluator::Evaluator;
use tabrule_data::rule::RuleRegistry;
use tabrule_driver::table::{DataTableDriver, TableFormat, write_header, write_record};
use tabrule_driver::{load_dictionaries, parse_dictionary_file};
use tabrule_io::input::InputOptions;
use tabrule_io::output::{OutputBufferedFile, OutputOptions};
use tabrule_io::system::LocalFileDriver;

#[derive(Parser)]
#[command(name = "tabrule", about = "Tabular derivation rule engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a dictionary file and report schema problems
    Check {
        /// Dictionary JSON file
        dictionary: PathBuf,
    },
    /// Read a table, evaluate derived fields, write the result
    Stream {
        /// Dictionary JSON file
        dictionary: PathBuf,
        /// Input table file
        input: PathBuf,
        /// Dictionary to bind when the file declares several
        #[arg(long)]
        name: Option<String>,
        /// Output table file; records are only counted when absent
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Field separator (single byte)
        #[arg(long, default_value = "\t")]
        separator: String,
        /// The input file has no header line
        #[arg(long)]
        no_header: bool,
        /// Maximum accepted line length in bytes
        #[arg(long)]
        max_line_length: Option<usize>,
        /// TOML file with the same format options
        #[arg(long)]
        format_options: Option<PathBuf>,
    },
}

/// Format options loadable from a TOML file; command-line flags win.
#[derive(Debug, Default, Deserialize)]
struct FormatConfig {
    separator: Option<String>,
    header: Option<bool>,
    max_line_length: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { dictionary } => run_check(&dictionary),
        Commands::Stream {
            dictionary,
            input,
            name,
            output,
            separator,
            no_header,
            max_line_length,
            format_options,
        } => run_stream(
            &dictionary,
            &input,
            name.as_deref(),
            output.as_deref(),
            &separator,
            no_header,
            max_line_length,
            format_options.as_deref(),
        ),
    }
}

fn load_dictionary_file(
    path: &Path,
) -> Result<std::collections::HashMap<String, Arc<Dictionary>>, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|error| format!("cannot read '{}': {}", path.display(), error))?;
    let spec = parse_dictionary_file(&json).map_err(|error| error.to_string())?;
    let registry = RuleRegistry::with_standard_rules();
    load_dictionaries(&spec, &registry).map_err(|error| error.to_string())
}

fn run_check(dictionary_path: &Path) -> ExitCode {
    match load_dictionary_file(dictionary_path) {
        Ok(dictionaries) => {
            for (name, dictionary) in &dictionaries {
                println!(
                    "dictionary '{}': {} attributes, {} blocks, compiled",
                    name,
                    dictionary.attribute_count(),
                    dictionary.block_count()
                );
            }
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_stream(
    dictionary_path: &Path,
    input_path: &Path,
    name: Option<&str>,
    output_path: Option<&Path>,
    separator: &str,
    no_header: bool,
    max_line_length: Option<usize>,
    format_options: Option<&Path>,
) -> ExitCode {
    match stream(
        dictionary_path,
        input_path,
        name,
        output_path,
        separator,
        no_header,
        max_line_length,
        format_options,
    ) {
        Ok((records, warnings)) => {
            println!("{} records, {} warnings", records, warnings);
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn stream(
    dictionary_path: &Path,
    input_path: &Path,
    name: Option<&str>,
    output_path: Option<&Path>,
    separator: &str,
    no_header: bool,
    max_line_length: Option<usize>,
    format_options: Option<&Path>,
) -> Result<(u64, u64), String> {
    let dictionaries = load_dictionary_file(dictionary_path)?;
    let dictionary = select_dictionary(&dictionaries, name)?;

    // TOML options first, command-line flags on top.
    let mut config = FormatConfig::default();
    if let Some(path) = format_options {
        let text = std::fs::read_to_string(path)
            .map_err(|error| format!("cannot read '{}': {}", path.display(), error))?;
        config = toml::from_str(&text).map_err(|error| error.to_string())?;
    }
    let separator = parse_separator(config.separator.as_deref().unwrap_or(separator))?;
    let header_line = config.header.unwrap_or(!no_header);
    let mut input_options = InputOptions::default();
    if let Some(length) = max_line_length.or(config.max_line_length) {
        input_options.max_line_length = length;
    }

    let format = TableFormat { header_line, separator, input: input_options };
    let system = LocalFileDriver;
    let mut driver = DataTableDriver::open(
        &system,
        dictionary.clone(),
        input_path.to_str().unwrap_or_default(),
        &format,
    )
    .map_err(|error| error.to_string())?;
    let mut evaluator = Evaluator::new(dictionary.clone()).map_err(|error| error.to_string())?;

    let mut output = match output_path {
        Some(path) => {
            let mut output = OutputBufferedFile::open(
                &system,
                path.to_str().unwrap_or_default(),
                separator,
                OutputOptions::default(),
            )
            .map_err(|error| error.to_string())?;
            if header_line {
                write_header(&mut output, &dictionary).map_err(|error| error.to_string())?;
            }
            Some(output)
        }
        None => None,
    };

    let mut records = 0u64;
    while let Some(mut record) = driver.read().map_err(|error| error.to_string())? {
        evaluator.evaluate(&mut record);
        if let Some(output) = output.as_mut() {
            write_record(output, &dictionary, &record).map_err(|error| error.to_string())?;
        }
        records += 1;
    }
    if let Some(mut output) = output {
        output.close().map_err(|error| error.to_string())?;
    }
    Ok((records, driver.sink().total()))
}

fn select_dictionary(
    dictionaries: &std::collections::HashMap<String, Arc<Dictionary>>,
    name: Option<&str>,
) -> Result<Arc<Dictionary>, String> {
    if let Some(name) = name {
        return dictionaries
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no dictionary named '{}'", name));
    }
    if dictionaries.len() == 1 {
        return Ok(dictionaries.values().next().expect("one entry").clone());
    }
    // Several dictionaries: a single root disambiguates.
    let roots: Vec<&Arc<Dictionary>> =
        dictionaries.values().filter(|dictionary| dictionary.is_root()).collect();
    match roots.as_slice() {
        [root] => Ok((*root).clone()),
        _ => Err("several dictionaries declared; pick one with --name".to_string()),
    }
}

fn parse_separator(text: &str) -> Result<u8, String> {
    let bytes = text.as_bytes();
    if bytes.len() != 1 {
        return Err(format!("separator must be a single byte, got '{}'", text));
    }
    Ok(bytes[0])
}
