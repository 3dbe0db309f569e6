use crate::core::banner::ProjectMetadata;
use crate::core::models::{BuildOptions, ExportMode, Format};
use crate::core::services::run_build;
use crate::core::watch::{run_watch, WatchOptions};
use crate::infrastructure::default_services;
use crate::utils::{BuildUI, CliOverrides, ConfigLoader, LibpackError, Logger, Result, CONFIG_FILE};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "libpack")]
#[command(about = "Build every module format of a library from one entry point")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bundle the library in every requested format
    Build(BuildArgs),
    /// Write an example libpack.config.json
    Init {
        /// Project root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Entry module (default: src/index.js)
    pub input: Option<PathBuf>,

    /// Output formats
    #[arg(short, long = "format", value_enum, value_delimiter = ',')]
    pub formats: Vec<Format>,

    /// Formats that also get a minified build
    #[arg(short, long, value_enum, value_delimiter = ',', num_args = 0..)]
    pub compress: Option<Vec<Format>>,

    /// Output directory (default: dist)
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Global variable name for iife/umd bundles
    #[arg(short = 'n', long = "name")]
    pub module_name: Option<String>,

    /// How the entry's exports are exposed
    #[arg(long, value_enum)]
    pub exports: Option<ExportMode>,

    /// Module ids left out of the bundle
    #[arg(short, long, value_delimiter = ',')]
    pub external: Vec<String>,

    /// Global variable for an external, as id=Name
    #[arg(short, long = "global", value_parser = parse_global)]
    pub globals: Vec<(String, String)>,

    /// Rebuild on change
    #[arg(short, long)]
    pub watch: bool,

    /// Maximum number of targets built at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Add package contributors to the banner
    #[arg(long)]
    pub contributors: bool,

    /// Config file (default: libpack.config.json, then package.json "libpack")
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl BuildArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            input: self.input.clone(),
            outdir: self.outdir.clone(),
            module_name: self.module_name.clone(),
            formats: self.formats.clone(),
            compress: self.compress.clone(),
            exports: self.exports,
            external: self.external.clone(),
            globals: self.globals.clone(),
            watch: self.watch,
            concurrency: self.concurrency,
            include_contributors: self.contributors,
        }
    }
}

fn parse_global(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, name)) if !id.is_empty() && !name.is_empty() => Ok((id.to_string(), name.to_string())),
        _ => Err(format!("expected id=Name, got '{}'", value)),
    }
}

pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self) -> Result<()> {
        let cli = Cli::parse();
        Logger::init(cli.verbose);

        match cli.command {
            Commands::Build(args) => self.handle_build_command(args).await,
            Commands::Init { root } => self.handle_init_command(&root).await,
        }
    }

    async fn handle_build_command(&self, args: BuildArgs) -> Result<()> {
        let cwd = std::env::current_dir()?;
        let root = ProjectMetadata::find_root(&cwd).ok_or_else(|| {
            LibpackError::config(format!("No package.json found in {} or its parents", cwd.display()))
        })?;
        let metadata = Arc::new(ProjectMetadata::load(&root)?);

        let config = ConfigLoader::load(&root, args.config.as_deref())?;
        let options = Arc::new(ConfigLoader::build_options(config, &args.overrides(), &root, metadata)?);
        Logger::debug(&format!("Resolved options: {:?}", options));

        if options.watch {
            self.watch(options).await
        } else {
            self.build(options).await
        }
    }

    async fn build(&self, options: Arc<BuildOptions>) -> Result<()> {
        let ui = Arc::new(BuildUI::new());
        ui.show_banner();

        let summary = run_build(options, default_services(), ui.clone()).await?;
        ui.show_completion(&summary);
        Ok(())
    }

    async fn watch(&self, options: Arc<BuildOptions>) -> Result<()> {
        let watch_options = WatchOptions::for_input(&options.input);
        let mut events = run_watch(options, default_services(), &watch_options)?;
        Logger::info("   Press Ctrl+C to stop");

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => BuildUI::watch_event(&event),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    Logger::info("👋 Stopping watch mode...");
                    break;
                }
            }
        }

        // Dropping the sessions releases their watchers
        drop(events);
        Ok(())
    }

    async fn handle_init_command(&self, root: &Path) -> Result<()> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            return Err(LibpackError::config(format!("{} already exists", path.display())));
        }
        tokio::fs::write(&path, ConfigLoader::generate_example() + "\n").await?;
        Logger::info(&format!("✅ Wrote {}", path.display()));
        Ok(())
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}
