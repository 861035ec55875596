//! CLI interface for wirelink - send files and share links to Wire.

use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::fmt::WriteStyle;
use log::{LevelFilter, debug};
use serde_json::Value;
use wirelink_core::kitty::{self, ImageFormat};
use wirelink_core::paths::write_default_config;
use wirelink_core::{
    APP_NAME, ApiError, AppConfig, AppPaths, Avatar, Bridge, ConversationRef, Permission,
    ShareLinkRequest, generate_schema,
};

/// Repository URL used as schema `$id`.
const REPO_URL: &str = "https://github.com/byteowlz/wirelink";

fn main() -> anyhow::Result<()> {
    try_main()
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Auth { subcommand } => rt.block_on(handle_auth(&ctx, subcommand)),
        Command::Conversations => rt.block_on(handle_conversations(&ctx)),
        Command::Teams => rt.block_on(handle_teams(&ctx)),
        Command::Msg {
            conversation,
            message,
        } => rt.block_on(handle_msg(&ctx, conversation, &message)),
        Command::Links(cmd) => rt.block_on(handle_links(&ctx, cmd)),
        Command::File {
            conversation,
            file_id,
        } => rt.block_on(handle_file(&ctx, conversation, file_id)),
        Command::Files { command } => handle_files(&ctx, command),
        Command::Avatar { command } => rt.block_on(handle_avatar(&ctx, command)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "wirelink",
    author,
    version,
    about = "Send files, share links and messages to Wire",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Local user the session and files belong to.
    #[arg(long, env = "WIRELINK_USER", default_value = "local", global = true)]
    pub user: String,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not change anything on disk.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    pub assume_yes: bool,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect a Wire account and check the connection.
    Auth {
        #[command(subcommand)]
        subcommand: AuthSubcommand,
    },
    /// List your conversations with team names.
    Conversations,
    /// List your teams.
    Teams,
    /// Send a message. Usage: wirelink msg <conversation-id> <message>.
    Msg {
        /// Conversation ID.
        conversation: String,
        /// Message text.
        message: String,
    },
    /// Share files as links in one message.
    Links(LinksCommand),
    /// Upload a file and announce it in a conversation.
    File {
        /// Conversation ID.
        conversation: String,
        /// File ID (see `wirelink files list`).
        file_id: u64,
    },
    /// Shared folder index.
    Files {
        #[command(subcommand)]
        command: FilesCommand,
    },
    /// Show a user or team avatar.
    Avatar {
        #[command(subcommand)]
        command: AvatarCommand,
    },
    /// Create config directories and default files.
    Init(InitCommand),
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum AuthSubcommand {
    /// Check connection status.
    Status,
    /// Log in with email and password.
    Login {
        /// Account email.
        email: String,
        /// Password. Read from stdin when omitted.
        #[arg(long, env = "WIRELINK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Wire API URL for this user (defaults to wire.api_url).
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct LinksCommand {
    /// Conversation ID.
    conversation: String,
    /// File IDs (see `wirelink files list`).
    #[arg(required = true)]
    file_ids: Vec<u64>,
    /// Conversation name, used in the share label.
    #[arg(long, default_value = "")]
    name: String,
    /// Conversation domain.
    #[arg(long, default_value = "")]
    domain: String,
    /// Text placed above the links.
    #[arg(short, long, default_value = "")]
    comment: String,
    /// Allow recipients to edit.
    #[arg(long)]
    edit: bool,
    /// Last valid day (YYYY-MM-DD).
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    expires: Option<NaiveDate>,
    /// Protect the links with a password.
    #[arg(long)]
    password: Option<String>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum FilesCommand {
    /// Scan your shared folder and assign file IDs.
    Index,
    /// List indexed files.
    List,
}

#[derive(Debug, Clone, Subcommand)]
enum AvatarCommand {
    /// Avatar of a user.
    User {
        /// Federation domain.
        domain: String,
        /// Wire user ID.
        id: String,
        /// Save the image instead of displaying it.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Avatar of a team.
    Team {
        /// Federation domain.
        domain: String,
        /// Team ID.
        id: String,
        /// Save the image instead of displaying it.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists.
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration.
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print all resolved paths.
    Paths,
    /// Print the JSON schema.
    Schema,
    /// Regenerate the default configuration file.
    Reset,
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let config = AppConfig::load(&paths, common.dry_run)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !io::stderr().is_terminal());

        if let Some(file) = self.config.logging.open_file()? {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            builder.write_style(WriteStyle::Never);
        } else if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    /// Flags win over the configured level.
    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self.config.logging.level.as_filter(),
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            self.paths.log_dry_run();
            return Ok(());
        }
        self.paths.ensure_directories()
    }

    fn bridge(&self) -> Result<Bridge> {
        Bridge::open(&self.config, &self.paths)
    }

    fn user(&self) -> &str {
        &self.common.user
    }

    /// Open the bridge, failing early when no account is connected.
    fn connected_bridge(&self) -> Result<Bridge> {
        let bridge = self.bridge()?;
        if !bridge.sessions().is_connected(self.user())? {
            return Err(anyhow!(
                "{}. Run 'wirelink auth login <email>' first.",
                ApiError::NotConnected
            ));
        }
        Ok(bridge)
    }

    fn print_sent(&self, value: &Value) -> Result<()> {
        if self.common.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", render_sent(value));
        }
        Ok(())
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn handle_auth(ctx: &RuntimeContext, cmd: AuthSubcommand) -> Result<()> {
    let bridge = ctx.bridge()?;
    let sessions = bridge.sessions();

    match cmd {
        AuthSubcommand::Status => {
            let info = sessions.connection_info(ctx.user())?;
            if ctx.common.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            if !info.connected {
                println!("Not connected to {}. Run 'wirelink auth login <email>'.", info.display_url);
                return Ok(());
            }

            let session = sessions.load(ctx.user())?;
            println!("Connected to:  {}", info.display_url);
            println!("Wire user:     {}", session.remote_user_id);
            if let Some(expires_at) = session.token_expires_at {
                let remaining = expires_at - chrono::Utc::now().timestamp();
                if remaining > 0 {
                    println!("Token expires: {}m {}s remaining", remaining / 60, remaining % 60);
                } else {
                    println!("Token expired; it is refreshed on the next request.");
                }
            }
            Ok(())
        }
        AuthSubcommand::Login {
            email,
            password,
            url,
        } => {
            if let Some(url) = url {
                sessions.set_base_url(ctx.user(), &url)?;
            }
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };

            let grant = sessions.connect(ctx.user(), &email, &password).await?;
            println!(
                "Connected {} to {}",
                grant.user.as_deref().unwrap_or(&email),
                sessions.connection_info(ctx.user())?.display_url
            );
            Ok(())
        }
    }
}

fn read_password() -> Result<String> {
    if io::stdin().is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("reading password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow!("empty password"));
    }
    Ok(password)
}

async fn handle_conversations(ctx: &RuntimeContext) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let conversations = bridge.client().get_my_conversations(ctx.user()).await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }
    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }

    for conversation in &conversations {
        let name = conversation["name"].as_str().unwrap_or("(unnamed)");
        let id = conversation["id"].as_str().unwrap_or("?");
        match conversation["team_name"].as_str() {
            Some(team) => println!("  {name}  {}", dim(&format!("[{team}]"))),
            None => println!("  {name}"),
        }
        println!("    {}", dim(id));
    }
    Ok(())
}

async fn handle_teams(ctx: &RuntimeContext) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let teams = bridge.client().get_my_teams_per_id(ctx.user()).await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&teams)?);
        return Ok(());
    }

    for (id, team) in &teams {
        let name = team["name"].as_str().unwrap_or("?");
        println!("  {}", truncate(name, 60));
        println!("    ID: {id}");
    }
    Ok(())
}

async fn handle_msg(ctx: &RuntimeContext, conversation: String, message: &str) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let conversation = ConversationRef {
        id: conversation,
        ..ConversationRef::default()
    };
    let sent = bridge.client().send_message(ctx.user(), message, &conversation).await?;
    ctx.print_sent(&sent)
}

async fn handle_links(ctx: &RuntimeContext, cmd: LinksCommand) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let count = cmd.file_ids.len();
    let request = ShareLinkRequest {
        file_ids: cmd.file_ids,
        conversation: ConversationRef {
            id: cmd.conversation,
            domain: cmd.domain,
            name: cmd.name,
            members: Vec::new(),
        },
        comment: cmd.comment,
        permission: if cmd.edit { Permission::Edit } else { Permission::View },
        expiration_date: cmd.expires,
        password: cmd.password,
    };

    let sent = bridge.links().send_links(ctx.user(), &request).await?;
    debug!("sent links for {count} requested files");
    ctx.print_sent(&sent)
}

async fn handle_file(ctx: &RuntimeContext, conversation: String, file_id: u64) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let conversation = ConversationRef {
        id: conversation,
        ..ConversationRef::default()
    };
    let sent = bridge.links().send_file(ctx.user(), file_id, &conversation).await?;
    ctx.print_sent(&sent)
}

fn handle_files(ctx: &RuntimeContext, command: FilesCommand) -> Result<()> {
    let bridge = ctx.bridge()?;
    let files = bridge.files();
    let nodes = match command {
        FilesCommand::Index => {
            if ctx.common.dry_run {
                log::info!("dry-run: would index {}", files.user_dir(ctx.user())?.display());
                return Ok(());
            }
            files.index_user_folder(ctx.user())?
        }
        FilesCommand::List => files.list(ctx.user())?,
    };

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }
    if nodes.is_empty() {
        println!(
            "No files indexed. Put files into {} and run 'wirelink files index'.",
            files.user_dir(ctx.user())?.display()
        );
        return Ok(());
    }

    for node in &nodes {
        let kind = match node.kind {
            wirelink_core::sharing::NodeKind::File => "file",
            wirelink_core::sharing::NodeKind::Folder => "dir",
        };
        println!("  {:>6}  {kind:<4}  {}", node.id, node.path);
    }
    Ok(())
}

async fn handle_avatar(ctx: &RuntimeContext, command: AvatarCommand) -> Result<()> {
    let bridge = ctx.connected_bridge()?;
    let client = bridge.client();
    let (avatar, output) = match command {
        AvatarCommand::User { domain, id, output } => {
            (client.get_user_avatar(ctx.user(), &domain, &id).await?, output)
        }
        AvatarCommand::Team { domain, id, output } => {
            (client.get_team_avatar(ctx.user(), &domain, &id).await?, output)
        }
    };

    match avatar {
        Avatar::Image(bytes) => show_image(&bytes, output.as_deref()),
        Avatar::UserInfo(info) | Avatar::TeamInfo(info) => {
            eprintln!("No avatar image available.");
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn show_image(bytes: &[u8], output: Option<&Path>) -> Result<()> {
    let format = ImageFormat::detect(bytes);
    if let Some(path) = output {
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        println!("Saved {} bytes to {}", bytes.len(), path.display());
        return Ok(());
    }

    if format.is_some() && kitty::is_supported() && io::stdout().is_terminal() {
        kitty::display_image(bytes)?;
    } else {
        let ext = format.map_or("bin", ImageFormat::extension);
        println!(
            "Avatar image: {} bytes ({ext}). Use --output avatar.{ext} to save it.",
            bytes.len()
        );
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }
    if ctx.common.dry_run {
        log::info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Paths => {
            if ctx.common.json {
                let paths = serde_json::json!({
                    "config": ctx.paths.config_file,
                    "data": ctx.paths.data_dir,
                    "state": ctx.paths.state_dir,
                    "files": ctx.paths.files_dir,
                    "sessions": ctx.paths.sessions_file(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&paths).context("serializing paths to JSON")?
                );
            } else {
                println!("config:   {}", ctx.paths.config_file.display());
                println!("data:     {}", ctx.paths.data_dir.display());
                println!("state:    {}", ctx.paths.state_dir.display());
                println!("files:    {}", ctx.paths.files_dir.display());
                println!("sessions: {}", ctx.paths.sessions_file().display());
            }
            Ok(())
        }
        ConfigCommand::Schema => {
            println!("{}", generate_schema(APP_NAME, REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                log::info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Formatting helpers ──────────────────────────────────────────────

/// Short confirmation for a Wire send response.
fn render_sent(value: &Value) -> String {
    match value["time"].as_str() {
        Some(time) => format!("Sent at {time}"),
        None => "Sent.".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{truncated}...")
    }
}

fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
