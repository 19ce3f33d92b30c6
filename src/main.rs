use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use peer_review_chat::api::ApiClient;
use peer_review_chat::cli::{
    resolve_models, resolve_ocr_model, Args, Command, HistoryCommand, ModelSelection,
    PromptCommand, ProviderCommand, SettingsCommand,
};
use peer_review_chat::config::ClientConfig;
use peer_review_chat::controller::SessionController;
use peer_review_chat::error::{Result, ValidationError};
use peer_review_chat::history::ChatArchive;
use peer_review_chat::i18n::{t, tf, Lang};
use peer_review_chat::protocol::{NewProvider, ProviderUpdate, SearchRequest};
use peer_review_chat::render::{
    render_archive_list, render_archived_chat, render_details, render_models,
    render_prompts, render_providers, render_search, render_settings, TerminalView,
};
use peer_review_chat::session::SessionOutcome;
use peer_review_chat::settings::{Preferences, Theme};
use peer_review_chat::store::{KeyValueStore, SqliteStore};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) if e.is_validation() => {
            eprintln!("{} {e}", "warning:".bright_yellow().bold());
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".bright_red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Everything a subcommand may need, opened once.
struct App {
    config: ClientConfig,
    api: ApiClient,
    prefs: Preferences,
    archive: ChatArchive,
    lang: Lang,
}

impl App {
    fn open(args: &Args) -> Result<Self> {
        let config = ClientConfig::load(args.config.as_deref())?
            .with_overrides(args.url.clone(), args.data_dir.clone())?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.data_dir)?);
        let prefs = Preferences::new(store.clone());
        let archive = ChatArchive::new(store);
        let lang = match args.lang.as_deref() {
            Some(code) => Lang::parse(code)?,
            None => prefs.language()?,
        };
        let api = ApiClient::new(&config)?;
        debug!(base_url = %config.base_url, data_dir = %config.data_dir.display(), %lang, "client ready");
        Ok(Self {
            config,
            api,
            prefs,
            archive,
            lang,
        })
    }

    fn say(&self, key: &str) {
        println!("{}", t(self.lang, key).bright_green());
    }

    fn controller(&self, selection: &ModelSelection) -> Result<SessionController> {
        let peer_review = self.prefs.peer_review()? && !selection.no_peer_review;
        let view = Arc::new(TerminalView::new(self.lang));
        Ok(SessionController::new(Arc::new(self.api.clone()), view)
            .with_language(self.lang)
            .with_peer_review(peer_review))
    }

    /// Run OCR on `--image`, if given, and show the recognized text.
    async fn image_text(&self, selection: &ModelSelection) -> Result<Option<String>> {
        let Some(path) = selection.image.as_deref() else {
            return Ok(None);
        };
        let model = self.ocr_model(selection.ocr_model.as_deref()).await?;
        let text = self.api.ocr_file(path, &model).await?;
        let name = path.display().to_string();
        println!("{}", tf(self.lang, "imageUploaded", &[("name", name.as_str())]).bright_blue());
        println!("{}\n{}\n", t(self.lang, "ocrRecognized").bright_yellow(), text.dimmed());
        Ok(Some(text))
    }

    async fn ocr_model(&self, explicit: Option<&str>) -> Result<String> {
        let configured = self.config.ocr_model.as_deref();
        if let Some(model) = resolve_ocr_model(explicit, configured, &[]) {
            return Ok(model);
        }
        let providers = self.api.list_providers().await?;
        let available: Vec<_> = providers.iter().flat_map(|p| p.model_ids()).collect();
        resolve_ocr_model(None, None, &available)
            .ok_or_else(|| ValidationError::MissingOcrModel.into())
    }

    fn models(&self, selection: &ModelSelection) -> Vec<String> {
        resolve_models(&selection.models, &self.config.default_models)
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    if let Command::Completions { shell } = &args.command {
        let mut cmd = Args::command();
        clap_complete::generate(*shell, &mut cmd, "peer-review-chat", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let app = App::open(&args)?;
    match args.command {
        Command::Ask {
            question,
            selection,
            details,
            no_archive,
        } => ask(&app, &question, &selection, details, no_archive).await,
        Command::Chat { selection } => chat(&app, &selection).await,
        Command::Models => {
            let providers = app.api.list_providers().await?;
            println!("{}", render_models(&providers, app.lang));
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let health = app.api.health().await?;
            println!("{} {}", app.api.base_url(), health.status.bright_green());
            Ok(ExitCode::SUCCESS)
        }
        Command::Providers { action } => providers(&app, action).await,
        Command::Prompts { action } => prompts(&app, action).await,
        Command::Ocr { image, model } => {
            let model = app.ocr_model(model.as_deref()).await?;
            let text = app.api.ocr_file(&image, &model).await?;
            println!("{text}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Search {
            query,
            page,
            language,
        } => {
            let request = SearchRequest {
                query,
                language: language.unwrap_or_else(|| app.lang.code().to_string()),
                page,
            };
            let response = app.api.search(&request).await?;
            println!("{}", render_search(&response, app.lang));
            Ok(ExitCode::SUCCESS)
        }
        Command::History { action } => history(&app, action),
        Command::Settings { action } => settings(&app, action),
        Command::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Spawn a Ctrl-C listener that stops the running generation. When nothing
/// is running it pings `idle` instead.
fn stop_on_ctrl_c(controller: &SessionController, idle: Arc<Notify>) -> tokio::task::JoinHandle<()> {
    let stopper = controller.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !stopper.stop() {
                idle.notify_one();
            }
        }
    })
}

async fn ask(
    app: &App,
    question: &str,
    selection: &ModelSelection,
    details: bool,
    no_archive: bool,
) -> Result<ExitCode> {
    let ocr_text = app.image_text(selection).await?;
    let controller = app.controller(selection)?;
    let listener = stop_on_ctrl_c(&controller, Arc::new(Notify::new()));
    let report = controller.submit(question, app.models(selection), ocr_text).await;
    listener.abort();

    let code = match report?.outcome {
        SessionOutcome::Completed { details: trace, .. } => {
            if details {
                println!("\n{}", render_details(&trace, app.lang));
            }
            if !no_archive {
                app.archive.save_transcript(&controller.transcript())?;
            }
            ExitCode::SUCCESS
        }
        SessionOutcome::Cancelled => ExitCode::from(130),
        SessionOutcome::Failed(_) => ExitCode::FAILURE,
    };
    Ok(code)
}

async fn chat(app: &App, selection: &ModelSelection) -> Result<ExitCode> {
    let controller = app.controller(selection)?;
    let models = app.models(selection);
    let mut ocr_text = app.image_text(selection).await?;
    let quit = Arc::new(Notify::new());
    let listener = stop_on_ctrl_c(&controller, quit.clone());

    println!("{}", t(app.lang, "chatHints").dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", t(app.lang, "prompt").bright_green().bold());
        let _ = io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let result = match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                app.archive.save_transcript(&controller.transcript())?;
                controller.clear();
                app.say("newChatStarted");
                continue;
            }
            "/details" => {
                match controller.last_details() {
                    Some(trace) => println!("{}", render_details(&trace, app.lang)),
                    None => println!("{}", t(app.lang, "noDetails").dimmed()),
                }
                continue;
            }
            "/regen" => controller.regenerate().await,
            question => controller.submit(question, models.clone(), ocr_text.take()).await,
        };
        match result {
            Ok(_) => {}
            Err(e) if e.is_validation() => {
                println!("{}", e.to_string().bright_yellow());
            }
            Err(e) => {
                listener.abort();
                return Err(e);
            }
        }
    }

    listener.abort();
    controller.stop();
    if let Err(e) = app.archive.save_transcript(&controller.transcript()) {
        warn!(error = %e, "could not archive conversation");
    }
    Ok(ExitCode::SUCCESS)
}

async fn providers(app: &App, action: ProviderCommand) -> Result<ExitCode> {
    match action {
        ProviderCommand::List => {
            let providers = app.api.list_providers().await?;
            println!("{}", render_providers(&providers, app.lang));
        }
        ProviderCommand::Add {
            name,
            kind,
            api_key,
            api_base,
            models,
        } => {
            let provider = NewProvider {
                name,
                kind,
                api_key,
                api_base,
                models,
            };
            app.api.add_provider(&provider).await?;
            app.say("addSuccess");
        }
        ProviderCommand::Update {
            name,
            new_name,
            kind,
            api_key,
            api_base,
            models,
        } => {
            let update = ProviderUpdate {
                name: new_name.unwrap_or_else(|| name.clone()),
                kind,
                api_key,
                api_base,
                models,
            };
            app.api.update_provider(&name, &update).await?;
            app.say("updateSuccess");
        }
        ProviderCommand::Delete { name } => {
            app.api.delete_provider(&name).await?;
            app.say("deleteSuccess");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn prompts(app: &App, action: PromptCommand) -> Result<ExitCode> {
    match action {
        PromptCommand::List => {
            let prompts = app.api.list_prompts().await?;
            println!("{}", render_prompts(&prompts, app.lang));
        }
        PromptCommand::Add { fields } => {
            app.api.add_prompt(&fields.into_draft()).await?;
            app.say("addSuccess");
        }
        PromptCommand::Update { id, fields } => {
            app.api.update_prompt(id, &fields.into_draft()).await?;
            app.say("updateSuccess");
        }
        PromptCommand::Delete { id } => {
            app.api.delete_prompt(id).await?;
            app.say("deleteSuccess");
        }
        PromptCommand::Activate { id } => {
            app.api.activate_prompt(id).await?;
            app.say("activateSuccess");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn history(app: &App, action: HistoryCommand) -> Result<ExitCode> {
    match action {
        HistoryCommand::List => {
            println!("{}", render_archive_list(&app.archive.load()?, app.lang));
        }
        HistoryCommand::Show { id } => match app.archive.get(&id)? {
            Some(entry) => {
                let timestamps = app.prefs.timestamps()?;
                println!("{}", render_archived_chat(&entry, app.lang, timestamps));
            }
            None => {
                eprintln!("{}", t(app.lang, "noHistory").bright_yellow());
                return Ok(ExitCode::FAILURE);
            }
        },
        HistoryCommand::Delete { id } => {
            if !app.archive.delete(&id)? {
                eprintln!("{}", t(app.lang, "noHistory").bright_yellow());
                return Ok(ExitCode::FAILURE);
            }
            app.say("deleteSuccess");
        }
        HistoryCommand::Clear => {
            app.archive.clear()?;
            app.say("deleteSuccess");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn settings(app: &App, action: SettingsCommand) -> Result<ExitCode> {
    let prefs = &app.prefs;
    match action {
        SettingsCommand::Show => {
            println!("{}", render_settings(&prefs.snapshot()?, app.lang));
            if let Some(url) = prefs.wallpaper()? {
                let preview: String = url.chars().take(40).collect();
                println!("  {}", format!("{preview}...").dimmed());
            }
            return Ok(ExitCode::SUCCESS);
        }
        SettingsCommand::Language { lang } => {
            let lang = Lang::parse(&lang)?;
            prefs.set_language(lang)?;
            println!("{}", t(lang, "updateSuccess").bright_green());
            return Ok(ExitCode::SUCCESS);
        }
        SettingsCommand::Theme { theme } => prefs.set_theme(Theme::parse(&theme)?)?,
        SettingsCommand::Wallpaper { path } => prefs.set_wallpaper_file(&path)?,
        SettingsCommand::ResetWallpaper => prefs.reset_wallpaper()?,
        SettingsCommand::Opacity { value } => prefs.set_opacity(value)?,
        SettingsCommand::Brightness { value } => prefs.set_brightness(value)?,
        SettingsCommand::Timestamps { state } => prefs.set_timestamps(state.is_on())?,
        SettingsCommand::PeerReview { state } => prefs.set_peer_review(state.is_on())?,
    }
    app.say("updateSuccess");
    Ok(ExitCode::SUCCESS)
}
