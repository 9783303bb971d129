use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Install root holding config.json and the models directory
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a single text
    Translate {
        /// Text to translate
        text: String,

        /// Source language code
        #[arg(short, long, default_value = "auto")]
        from: String,

        /// Target language code
        #[arg(short, long, default_value = "zh")]
        to: String,

        /// Translation provider (llama-cpp, baidu)
        #[arg(short, long, default_value = "llama-cpp")]
        provider: String,
    },

    /// Translate several texts in order
    Batch {
        /// File with one text per line
        #[arg(long)]
        file: Option<PathBuf>,

        /// Texts to translate (ignored when --file is given)
        texts: Vec<String>,

        /// Source language code
        #[arg(short, long, default_value = "auto")]
        from: String,

        /// Target language code
        #[arg(short, long, default_value = "zh")]
        to: String,

        /// Translation provider (llama-cpp, baidu)
        #[arg(short, long, default_value = "llama-cpp")]
        provider: String,
    },

    /// List installed models
    Models,

    /// Make a model the active one
    Switch {
        /// Model filename inside the model directory
        name: String,
    },

    /// Show or set the inference mode
    Mode {
        /// New mode (cpu)
        name: Option<String>,
    },

    /// Inspect or edit the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the liveness payload
    Health,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Set KEY=VALUE pairs; values are parsed as JSON when possible
    Set {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}
