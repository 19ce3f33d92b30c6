use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::config::ENV_BASE_URL;
use crate::protocol::{ModelId, PromptDraft, ProviderKind};

#[derive(Parser, Debug)]
#[command(name = "peer-review-chat")]
#[command(version)]
#[command(about = "Terminal client for a multi-model AI peer review backend")]
pub struct Args {
    /// Backend base URL (default http://127.0.0.1:8000)
    #[arg(long, env = ENV_BASE_URL, global = true)]
    pub url: Option<String>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the local state database
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// UI language for this run (zh or en); defaults to the saved setting
    #[arg(long, global = true)]
    pub lang: Option<String>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask one question and print the best answer
    Ask {
        question: String,
        #[command(flatten)]
        selection: ModelSelection,
        /// Print the review trace after the answer
        #[arg(long)]
        details: bool,
        /// Do not save the exchange to local history
        #[arg(long)]
        no_archive: bool,
    },
    /// Interactive conversation; Ctrl-C stops the current generation
    Chat {
        #[command(flatten)]
        selection: ModelSelection,
    },
    /// List selectable provider::model identifiers
    Models,
    /// Check that the backend is reachable
    Health,
    /// Manage model providers
    Providers {
        #[command(subcommand)]
        action: ProviderCommand,
    },
    /// Manage critique/revision prompt templates
    Prompts {
        #[command(subcommand)]
        action: PromptCommand,
    },
    /// Extract text from an image
    Ocr {
        image: PathBuf,
        /// OCR model (provider::model); guessed from vision models if omitted
        #[arg(long)]
        model: Option<String>,
    },
    /// Web search through the backend
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Result language; defaults to the UI language
        #[arg(long)]
        language: Option<String>,
    },
    /// Local chat history
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Local preferences
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Print a shell completion script
    Completions { shell: clap_complete::Shell },
}

/// Models and optional image for a generation.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ModelSelection {
    /// Model to consult (provider::model); repeatable
    #[arg(long = "model", short = 'm')]
    pub models: Vec<String>,

    /// Attach an image; its recognized text is sent with the question
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// OCR model for --image
    #[arg(long)]
    pub ocr_model: Option<String>,

    /// Send only the first model, skipping peer review
    #[arg(long)]
    pub no_peer_review: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    List,
    Add {
        name: String,
        #[arg(long = "type", value_enum)]
        kind: ProviderKind,
        #[arg(long)]
        api_key: String,
        #[arg(long, default_value = "")]
        api_base: String,
        /// Comma-separated model names
        #[arg(long)]
        models: String,
    },
    Update {
        name: String,
        /// Rename the provider
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long = "type", value_enum)]
        kind: ProviderKind,
        /// Omit to keep the stored key
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, default_value = "")]
        api_base: String,
        #[arg(long)]
        models: String,
    },
    Delete {
        name: String,
    },
}

/// Both language variants of a prompt template.
#[derive(ClapArgs, Debug, Clone)]
pub struct PromptFields {
    #[arg(long)]
    pub name_zh: String,
    #[arg(long)]
    pub critique_zh: String,
    #[arg(long)]
    pub revision_zh: String,
    #[arg(long)]
    pub name_en: String,
    #[arg(long)]
    pub critique_en: String,
    #[arg(long)]
    pub revision_en: String,
    /// Make this the active template
    #[arg(long)]
    pub active: bool,
}

impl PromptFields {
    pub fn into_draft(self) -> PromptDraft {
        PromptDraft {
            name_zh: self.name_zh,
            critique_prompt_zh: self.critique_zh,
            revision_prompt_zh: self.revision_zh,
            name_en: self.name_en,
            critique_prompt_en: self.critique_en,
            revision_prompt_en: self.revision_en,
            is_active: i64::from(self.active),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum PromptCommand {
    List,
    Add {
        #[command(flatten)]
        fields: PromptFields,
    },
    Update {
        id: i64,
        #[command(flatten)]
        fields: PromptFields,
    },
    Delete {
        id: i64,
    },
    Activate {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    List,
    Show { id: String },
    Delete { id: String },
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Language { lang: String },
    Theme { theme: String },
    /// Set the wallpaper from an image file (4 MiB max)
    Wallpaper { path: PathBuf },
    ResetWallpaper,
    Opacity {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    Brightness {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    Timestamps {
        #[arg(value_enum)]
        state: Toggle,
    },
    PeerReview {
        #[arg(value_enum)]
        state: Toggle,
    },
}

/// Explicit `--model` flags win; otherwise fall back to the configured defaults.
pub fn resolve_models(explicit: &[String], defaults: &[String]) -> Vec<String> {
    if explicit.is_empty() {
        defaults.to_vec()
    } else {
        explicit.to_vec()
    }
}

/// Pick the OCR model: explicit flag, then config, then the first
/// vision-looking model among those available.
pub fn resolve_ocr_model(
    explicit: Option<&str>,
    configured: Option<&str>,
    available: &[ModelId],
) -> Option<String> {
    explicit
        .or(configured)
        .map(str::to_string)
        .or_else(|| {
            available
                .iter()
                .find(|m| m.looks_like_vision())
                .map(|m| m.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_models_explicit_wins() {
        let defaults = vec!["a::x".to_string()];
        assert_eq!(resolve_models(&["b::y".to_string()], &defaults), vec!["b::y"]);
        assert_eq!(resolve_models(&[], &defaults), vec!["a::x"]);
    }

    #[test]
    fn test_resolve_ocr_model_order() {
        let available = vec![ModelId::new("p", "deepseek-chat"), ModelId::new("p", "qwen-vl-max")];
        assert_eq!(
            resolve_ocr_model(Some("x::y"), Some("c::d"), &available).as_deref(),
            Some("x::y")
        );
        assert_eq!(
            resolve_ocr_model(None, Some("c::d"), &available).as_deref(),
            Some("c::d")
        );
        assert_eq!(
            resolve_ocr_model(None, None, &available).as_deref(),
            Some("p::qwen-vl-max")
        );
        assert_eq!(resolve_ocr_model(None, None, &available[..1]), None);
    }

    #[test]
    fn test_args_parse_ask_minimal() {
        let args = Args::parse_from(["prc", "ask", "what is 2+2?"]);
        match args.command {
            Command::Ask {
                question,
                selection,
                details,
                no_archive,
            } => {
                assert_eq!(question, "what is 2+2?");
                assert!(selection.models.is_empty());
                assert!(!selection.no_peer_review);
                assert!(!details);
                assert!(!no_archive);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_parse_ask_full() {
        let args = Args::parse_from([
            "prc",
            "--url",
            "http://10.0.0.5:8000",
            "ask",
            "describe",
            "-m",
            "acme::gpt-4o",
            "--model",
            "acme::deepseek-chat",
            "--image",
            "shot.png",
            "--ocr-model",
            "acme::qwen-vl",
            "--details",
            "-v",
        ]);
        assert_eq!(args.url.as_deref(), Some("http://10.0.0.5:8000"));
        assert!(args.verbose);
        match args.command {
            Command::Ask { selection, details, .. } => {
                assert_eq!(selection.models.len(), 2);
                assert_eq!(selection.image, Some(PathBuf::from("shot.png")));
                assert_eq!(selection.ocr_model.as_deref(), Some("acme::qwen-vl"));
                assert!(details);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_provider_add() {
        let args = Args::parse_from([
            "prc", "providers", "add", "acme", "--type", "gemini", "--api-key", "k", "--models", "gemini-1.5-pro",
        ]);
        match args.command {
            Command::Providers {
                action: ProviderCommand::Add { name, kind, api_base, .. },
            } => {
                assert_eq!(name, "acme");
                assert_eq!(kind, ProviderKind::Gemini);
                assert_eq!(api_base, "");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_provider_update_without_key() {
        let args = Args::parse_from([
            "prc", "providers", "update", "acme", "--type", "openai", "--models", "gpt-4o",
        ]);
        match args.command {
            Command::Providers {
                action: ProviderCommand::Update { api_key, new_name, .. },
            } => {
                assert!(api_key.is_none());
                assert!(new_name.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_prompt_add_builds_draft() {
        let args = Args::parse_from([
            "prc",
            "prompts",
            "add",
            "--name-zh",
            "严格",
            "--critique-zh",
            "c",
            "--revision-zh",
            "r",
            "--name-en",
            "Strict",
            "--critique-en",
            "c",
            "--revision-en",
            "r",
            "--active",
        ]);
        match args.command {
            Command::Prompts {
                action: PromptCommand::Add { fields },
            } => {
                let draft = fields.into_draft();
                assert_eq!(draft.name_en, "Strict");
                assert_eq!(draft.is_active, 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_settings_toggle_and_negative() {
        let args = Args::parse_from(["prc", "settings", "peer-review", "off"]);
        assert!(matches!(
            args.command,
            Command::Settings {
                action: SettingsCommand::PeerReview { state: Toggle::Off }
            }
        ));
        let args = Args::parse_from(["prc", "settings", "opacity", "-5"]);
        assert!(matches!(
            args.command,
            Command::Settings {
                action: SettingsCommand::Opacity { value: -5 }
            }
        ));
    }

    #[test]
    fn test_args_parse_completions() {
        let args = Args::parse_from(["prc", "completions", "bash"]);
        assert!(matches!(
            args.command,
            Command::Completions {
                shell: clap_complete::Shell::Bash
            }
        ));
    }

    #[test]
    fn test_args_reject_missing_subcommand() {
        assert!(Args::try_parse_from(["prc"]).is_err());
    }
}
