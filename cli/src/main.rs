use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bookshelf::config::ConfigError;
use bookshelf::{
    App, ApiError, Book, ClientConfig, CollectionError, ErrorCode, HistoryNavigator, Route, SessionError, SessionState,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("refusing to delete book {0} without --yes")]
    ConfirmationRequired(u64),
    #[error("not signed in; run `bookshelf login` first")]
    NotSignedIn,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Collection(e) => e.error_code(),
            Self::Api(e) => e.error_code(),
            Self::ConfirmationRequired(_) => "E_CONFIRMATION_REQUIRED",
            Self::NotSignedIn => "E_NOT_SIGNED_IN",
            Self::Json(_) => "E_JSON",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Collection(e) => e.retryable(),
            Self::Api(e) => e.retryable(),
            _ => false,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "bookshelf", about = "Book Explorer catalog and collection CLI")]
struct Cli {
    #[arg(long, env = "BOOKSHELF_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "BOOKSHELF_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange credentials for a session token.
    Login(LoginArgs),
    /// Register an account and sign in.
    Signup(SignupArgs),
    /// Forget the stored session token.
    Logout,
    /// Show the signed-in user's profile.
    Whoami,
    /// Show whether a session token is held.
    Status,
    /// Search the open catalog by title.
    Search { title: String },
    /// Save a book to your collection.
    Save(SaveArgs),
    /// List saved books.
    List {
        /// Cursor URL from a previous page's `next` or `previous`.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Delete a saved book.
    Delete {
        id: u64,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Look up a book by ISBN without saving it.
    Lookup { isbn: String },
    /// Look up a book by ISBN and save it.
    AddIsbn { isbn: String },
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long, env = "BOOKSHELF_USERNAME")]
    username: String,
    #[arg(long, env = "BOOKSHELF_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct SignupArgs {
    #[arg(long)]
    username: String,
    #[arg(long, env = "BOOKSHELF_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Args, Debug)]
struct SaveArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    isbn: Option<String>,
    #[arg(long)]
    cover_url: Option<String>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    published_date: Option<String>,
}

impl SaveArgs {
    fn into_book(self) -> Book {
        let mut book = Book::new(self.title);
        if let Some(author) = self.author.filter(|a| !a.trim().is_empty()) {
            book.author = author;
        }
        book.isbn = self.isbn.filter(|v| !v.trim().is_empty());
        book.cover_url = self.cover_url.filter(|v| !v.trim().is_empty());
        book.description = self.description;
        book.published_date = self.published_date;
        book
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(code = e.error_code(), error = %e, "command failed");
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn build_app(cli: &Cli) -> Result<App, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(token_file) = &cli.token_file {
        config.token_file.clone_from(token_file);
    }
    Ok(App::from_config(&config, Arc::new(HistoryNavigator::new(Route::Home)))?)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let app = build_app(&cli)?;

    match cli.command {
        Command::Login(args) => {
            let outcome = app.session.login(&args.username, &args.password).await?;
            let username = outcome.profile.map_or(args.username, |p| p.username);
            print_json(&json!({ "logged_in": true, "username": username }))
        }
        Command::Signup(args) => {
            let message = app
                .session
                .signup(&args.username, &args.password, args.email.as_deref())
                .await?;
            eprintln!("{message}");
            print_json(&json!({ "logged_in": true, "username": args.username }))
        }
        Command::Logout => {
            app.session.logout();
            print_json(&json!({ "logged_in": false }))
        }
        Command::Whoami => {
            require_session(&app)?;
            print_json(&app.session.current_user().await?)
        }
        Command::Status => {
            let logged_in = app.session.state() == SessionState::Authenticated;
            print_json(&json!({ "logged_in": logged_in, "base_url": app.api.base_url() }))
        }
        Command::Search { title } => print_json(&app.collection.search(&title).await?),
        Command::Save(args) => {
            require_session(&app)?;
            print_json(&app.collection.save(&args.into_book()).await?)
        }
        Command::List { cursor } => {
            require_session(&app)?;
            print_json(&app.collection.list(cursor.as_deref()).await?)
        }
        Command::Delete { id, yes } => {
            if !yes {
                return Err(CliError::ConfirmationRequired(id));
            }
            require_session(&app)?;
            app.collection.delete(id).await?;
            print_json(&json!({ "deleted": id }))
        }
        Command::Lookup { isbn } => print_json(&app.collection.lookup_isbn(&isbn).await?),
        Command::AddIsbn { isbn } => {
            require_session(&app)?;
            print_json(&app.collection.add_by_isbn(&isbn).await?)
        }
    }
}

fn require_session(app: &App) -> Result<(), CliError> {
    if app.store.is_authenticated() {
        Ok(())
    } else {
        Err(CliError::NotSignedIn)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
