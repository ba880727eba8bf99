//! Shell configuration: TOML file plus command-line options.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tsh_jobs::JobControlConfig;

/// Settings read from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub prompt: String,
    pub emit_prompt: bool,
    pub verbose: bool,
    pub jobs: JobControlConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "tsh> ".to_string(),
            emit_prompt: true,
            verbose: false,
            jobs: JobControlConfig::default(),
        }
    }
}

impl ShellConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Resolve the config file: `--config`, then `$TSH_CONFIG`, then
    /// `<config dir>/tsh/config.toml` if it exists. Defaults otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os("TSH_CONFIG") {
            return Self::load(Path::new(&path));
        }
        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tsh").join("config.toml"))
}

/// Parsed command-line options.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub help: bool,
    pub verbose: bool,
    pub no_prompt: bool,
    pub config: Option<PathBuf>,
}

impl Options {
    /// Accepts `-h`, `-v`, `-p` (combinable, e.g. `-vp`) and `--config <path>`.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options::default();

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "--config" {
                if i + 1 < args.len() {
                    opts.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                    continue;
                }
                bail!("--config requires a value");
            }
            let Some(flags) = arg.strip_prefix('-').filter(|f| !f.is_empty() && !f.starts_with('-'))
            else {
                bail!("Unknown argument: {}", arg);
            };
            for flag in flags.chars() {
                match flag {
                    'h' => opts.help = true,
                    'v' => opts.verbose = true,
                    'p' => opts.no_prompt = true,
                    other => bail!("Unknown flag: -{}", other),
                }
            }
            i += 1;
        }

        Ok(opts)
    }

    /// Command-line flags win over the config file.
    pub fn apply(&self, config: &mut ShellConfig) {
        if self.verbose {
            config.verbose = true;
        }
        if self.no_prompt {
            config.emit_prompt = false;
        }
    }
}
