use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::Application;
use crate::compiler::Compiler;
use crate::config::Config;
use crate::engine::RuntimeEngine;
use crate::logging;
use crate::naming::QualifiedName;
use crate::repository::MemoryRepository;
use crate::translator::Translator;
use crate::types::{SemanticType, Value};
use crate::variables::VariableTable;

#[derive(Parser)]
#[command(name = "bfa")]
#[command(about = "Translate, compile and run business scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate one expression into target code
    Translate {
        /// Expression to translate
        expression: String,

        /// Variable in scope (repeatable)
        #[arg(long = "var", value_name = "NAME:TYPE")]
        vars: Vec<String>,

        /// Record type definition (repeatable)
        #[arg(long = "record", value_name = "NAME=FIELDS")]
        records: Vec<String>,
    },

    /// Compile a script file and list the units it produces
    Compile {
        /// Script file
        file: PathBuf,

        /// Script name (default: the file stem)
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Record type definition (repeatable)
        #[arg(long = "record", value_name = "NAME=FIELDS")]
        records: Vec<String>,
    },

    /// Run a script file and print the run as JSON
    Run {
        /// Script file
        file: PathBuf,

        /// Script name (default: the file stem)
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Input value as JSON, bound to input declarations in order (repeatable)
        #[arg(short = 'i', long = "input", value_name = "JSON")]
        inputs: Vec<String>,

        /// Record type definition (repeatable)
        #[arg(long = "record", value_name = "NAME=FIELDS")]
        records: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments and installing the log subscriber
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.logging)?;
    run_cli_with_args(cli, config).await
}

/// Run the CLI with provided arguments. Logging is left to the caller.
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    let config = load_config(&cli)?;
    run_cli_with_args(cli, config).await
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::builder()
        .config_path(cli.config.as_ref().map(PathBuf::from))
        .build()
}

async fn run_cli_with_args(cli: Cli, config: Config) -> Result<()> {
    let output = execute(cli.command, config).await?;
    println!("{}", output);
    Ok(())
}

/// Execute one command, returning what it prints
pub async fn execute(command: Commands, config: Config) -> Result<String> {
    match command {
        Commands::Translate {
            expression,
            vars,
            records,
        } => {
            let engine = RuntimeEngine::standalone();
            define_records(&engine, &records)?;

            let mut table = VariableTable::new();
            for var in &vars {
                let Some((name, type_name)) = var.split_once(':') else {
                    bail!("Invalid variable [{}], expected NAME:TYPE", var);
                };
                table
                    .declare_input(name.trim(), SemanticType::from_type_name(type_name))
                    .with_context(|| format!("Invalid variable [{}]", var))?;
            }

            let code = Translator::new(&engine)
                .translate(&expression, &table)
                .with_context(|| format!("Could not parse expression [{}]", expression))?;
            Ok(format!("{}\nkind: {}", code.text, code.kind))
        }

        Commands::Compile {
            file,
            name,
            records,
        } => {
            let (name, body) = read_script(&file, name)?;
            let engine = RuntimeEngine::standalone();
            define_records(&engine, &records)?;

            let compilation = Compiler::new(&engine).compile_script(&QualifiedName::script(&name), &body)?;
            let units: Vec<_> = compilation
                .units()
                .map(|unit| {
                    serde_json::json!({
                        "name": unit.qualified_name.to_string(),
                        "kind": unit.qualified_name.kind().to_string(),
                        "digest": unit.source_digest,
                        "bytes": unit.payload.len(),
                    })
                })
                .collect();

            let summary = serde_json::json!({
                "script": name,
                "inputs": compilation.input_parameters,
                "units": units,
            });
            serde_json::to_string_pretty(&summary).context("Failed to render compile summary")
        }

        Commands::Run {
            file,
            name,
            inputs,
            records,
        } => {
            let (name, body) = read_script(&file, name)?;
            let inputs = inputs
                .iter()
                .map(|input| parse_input(input))
                .collect::<Result<Vec<_>>>()?;

            let app = Application::new(config, Arc::new(MemoryRepository::new()));
            for record in &records {
                let (record_name, field_spec) = split_record(record)?;
                app.manager.create_record_type(record_name, field_spec)?;
            }

            let run = app
                .engine
                .run_script_source(&QualifiedName::script(&name), &body, inputs);
            if let Some(error) = run.error {
                bail!("Script [{}] failed: {}", run.script, error);
            }

            let locals: serde_json::Map<_, _> = run
                .locals
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            let report = serde_json::json!({
                "run_id": run.id,
                "script": run.script,
                "status": run.status,
                "started_at": run.started_at,
                "finished_at": run.finished_at,
                "locals": locals,
            });
            serde_json::to_string_pretty(&report).context("Failed to render run report")
        }

        Commands::Config => config.to_toml(),
    }
}

fn read_script(file: &Path, name: Option<String>) -> Result<(String, String)> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script file {}", file.display()))?;

    let name = match name {
        Some(name) => name,
        None => file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Cannot derive a script name from {}", file.display()))?,
    };
    Ok((name, body))
}

fn split_record(record: &str) -> Result<(&str, &str)> {
    record
        .split_once('=')
        .map(|(name, fields)| (name.trim(), fields.trim()))
        .ok_or_else(|| anyhow!("Invalid record type [{}], expected NAME=FIELDS", record))
}

fn define_records(engine: &RuntimeEngine, records: &[String]) -> Result<()> {
    for record in records {
        let (name, field_spec) = split_record(record)?;
        engine.define_record_type(&QualifiedName::record(name), field_spec)?;
    }
    Ok(())
}

fn parse_input(input: &str) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(input)
        .with_context(|| format!("Input [{}] is not valid JSON", input))?;
    Value::from_json(json).ok_or_else(|| anyhow!("Input [{}] cannot be bound to a variable", input))
}
