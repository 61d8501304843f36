use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use console::Term;
use dialoguer::{theme::ColorfulTheme, Input as Prompt, Password};
use interaction::model::{AuthenticatorTag, OobChannel};
use interaction::testing::{totp_code, InMemoryBackend, RecordingEventSink};
use interaction::{
    AuthenticationStage, AuthenticatorKind, BaseCodeGenerator, Categorizable, Context, Edge,
    EffectAction, EngineConfig, FormInput, Intent, InteractionService, LoginIdKey, Outcome,
    StartOptions, TenantConfig,
};
use interaction::context::RandomCodeGenerator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo password";

#[derive(Parser)]
#[command(name = "interaction-demo", about = "Walk through authentication flows in the terminal")]
struct Cli {
    /// Tenant configuration as JSON
    #[arg(long, global = true)]
    tenant_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in as the demo user
    Login,
    /// Create a new account
    Signup,
    /// Reset the demo user's password
    ResetPassword,
    /// Enroll another authenticator for the demo user
    AddAuthenticator {
        #[arg(long, value_enum, default_value = "totp")]
        kind: KindArg,
        /// Enroll for the primary stage instead of the secondary one
        #[arg(long)]
        primary: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Password,
    Totp,
    Oob,
}

impl From<KindArg> for AuthenticatorKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Password => AuthenticatorKind::Password,
            KindArg::Totp => AuthenticatorKind::Totp,
            KindArg::Oob => AuthenticatorKind::OobOtp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,interaction=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let term = Term::stdout();
    print_banner(&term)?;

    let tenant = match &cli.tenant_config {
        Some(path) => TenantConfig::from_file(path)?,
        None => TenantConfig::default(),
    };
    let engine = EngineConfig::from_env()?;
    tracing::debug!(?engine, ?tenant, "configuration loaded");

    let backend = InMemoryBackend::new();
    let events = RecordingEventSink::new();
    let demo_user = seed_demo_user(&backend);

    let ctx = Context::new(Arc::new(backend.clone()), Arc::new(backend.clone()), tenant);
    let service = InteractionService::builder(ctx, Arc::new(backend.clone()), Arc::new(events.clone()))
        .with_config(engine)
        .build();

    let intent = match cli.command {
        Command::Login => Intent::login(),
        Command::Signup => Intent::signup(),
        Command::ResetPassword => Intent::reset_password(),
        Command::AddAuthenticator { kind, primary } => {
            let stage = if primary {
                AuthenticationStage::Primary
            } else {
                AuthenticationStage::Secondary
            };
            Intent::add_authenticator(demo_user, stage, kind.into())
        }
    };

    run(&term, &service, &events, intent).await?;

    println!();
    println!("{}", "Committed:".bright_blue().bold());
    for effect in backend.applied_effects() {
        println!("  {} {}", "•".bright_blue(), describe(&effect));
    }
    Ok(())
}

async fn run(
    term: &Term,
    service: &InteractionService,
    events: &RecordingEventSink,
    intent: Intent,
) -> Result<()> {
    println!("{} {}", "▶".bright_green(), intent.kind().bold());
    let mut outcome = service.start(intent, StartOptions::default()).await?;

    loop {
        show_deliveries(events);

        let (token, edges) = match outcome {
            Outcome::AwaitingInput { token, edges } => (token, edges),
            Outcome::Finished { user_id, session } => {
                println!();
                println!("{} {}", "✅ Finished for user".bright_green().bold(), user_id);
                if let Some(session) = session {
                    let amr: Vec<_> = session.amr.iter().map(|k| k.to_string()).collect();
                    println!("   session {} (amr: {})", session.id, amr.join(", "));
                }
                return Ok(());
            }
        };

        let edge = edges
            .first()
            .context("interaction is waiting without any edges")?;
        let form = prompt(term, edge)?;

        outcome = match service.feed(&token, &form).await {
            Ok(next) => next,
            Err(err) if err.is_recoverable() => {
                println!("{} {}", "✗".bright_red(), err.safe_message().to_string().bright_red());
                let view = service.inspect(&token).await?;
                Outcome::AwaitingInput {
                    token,
                    edges: view.edges,
                }
            }
            Err(err) if err.category().requires_restart() => {
                println!("{} {}", "✗".bright_red(), err.safe_message().to_string().bright_red());
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
    }
}

fn prompt(term: &Term, edge: &Edge) -> Result<FormInput> {
    let theme = ColorfulTheme::default();
    let form = FormInput::default();

    let form = match edge {
        Edge::SelectIdentityLoginId | Edge::CreateIdentityLoginId | Edge::ForgotPassword => {
            let raw: String = Prompt::with_theme(&theme)
                .with_prompt("Email, phone or username")
                .interact_text_on(term)?;
            form.with_login_id(guess_key(&raw), raw)
        }
        Edge::AuthenticationPassword { .. } => {
            let password = Password::with_theme(&theme)
                .with_prompt("Password")
                .interact_on(term)?;
            form.with_password(password)
        }
        Edge::CreateAuthenticatorPassword { .. } => {
            let password = new_password(term, &theme)?;
            form.with_new_password(password.clone(), password)
        }
        Edge::AuthenticationTotp { authenticators, .. } => {
            if let Some(authenticator) = authenticators.first() {
                hint(&format!("authenticator app shows {}", totp_code(&authenticator.secret)));
            }
            form.with_code(code(term, &theme, "TOTP code")?)
        }
        Edge::CreateAuthenticatorTotp { authenticator, .. } => {
            hint(&format!(
                "seed {} (authenticator app shows {})",
                authenticator.secret,
                totp_code(&authenticator.secret)
            ));
            form.with_code(code(term, &theme, "TOTP code")?)
        }
        Edge::AuthenticationOob { challenge, .. } | Edge::CreateAuthenticatorOob { challenge, .. } => {
            form.with_code(code(term, &theme, &format!("Code sent to {}", challenge.target))?)
        }
        Edge::ResetPassword { identity, .. } => {
            let sent = code(term, &theme, &format!("Code sent to {}", identity.login_id.value))?;
            let password = new_password(term, &theme)?;
            form.with_code(sent).with_new_password(password.clone(), password)
        }
        other => bail!("{} does not take input", other.kind()),
    };
    Ok(form)
}

fn code(term: &Term, theme: &ColorfulTheme, label: &str) -> Result<String> {
    Ok(Prompt::<String>::with_theme(theme)
        .with_prompt(label)
        .interact_text_on(term)?)
}

fn new_password(term: &Term, theme: &ColorfulTheme) -> Result<String> {
    Ok(Password::with_theme(theme)
        .with_prompt("New password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact_on(term)?)
}

fn guess_key(raw: &str) -> LoginIdKey {
    let raw = raw.trim();
    if raw.contains('@') {
        LoginIdKey::Email
    } else if raw.starts_with('+') {
        LoginIdKey::Phone
    } else {
        LoginIdKey::Username
    }
}

fn seed_demo_user(backend: &InMemoryBackend) -> Uuid {
    let user_id = Uuid::new_v4();
    backend.seed_identity(user_id, LoginIdKey::Email, DEMO_EMAIL);
    backend.seed_authenticator(
        user_id,
        AuthenticatorKind::Password,
        AuthenticatorTag::Primary,
        DEMO_PASSWORD,
        None,
    );
    backend.seed_authenticator(
        user_id,
        AuthenticatorKind::Totp,
        AuthenticatorTag::Secondary,
        &RandomCodeGenerator.generate_secret(),
        None,
    );

    println!(
        "{} {} / {}",
        "Demo user:".bright_yellow(),
        DEMO_EMAIL,
        DEMO_PASSWORD
    );
    user_id
}

fn show_deliveries(events: &RecordingEventSink) {
    for effect in events.delivered() {
        println!("{} {}", "📨".bright_magenta(), describe(&effect));
    }
    events.clear();
}

fn describe(effect: &EffectAction) -> String {
    match effect {
        EffectAction::SendOobCode {
            channel,
            target,
            code,
        } => format!("{} code {} to {}", channel_name(*channel), code, target),
        EffectAction::SendResetPasswordCode {
            channel,
            target,
            code,
        } => format!(
            "{} reset code {} to {}",
            channel_name(*channel),
            code,
            target
        ),
        EffectAction::DispatchEvent { event } => format!("event {}", event.name()),
        other => other.name().to_string(),
    }
}

fn channel_name(channel: OobChannel) -> &'static str {
    match channel {
        OobChannel::Email => "email",
        OobChannel::Sms => "sms",
    }
}

fn hint(message: &str) {
    println!("  {} {}", "hint:".dimmed(), message.dimmed());
}

fn print_banner(term: &Term) -> Result<()> {
    term.clear_screen()?;
    println!(
        "{}",
        "╔════════════════════════════════════════╗".bright_cyan()
    );
    println!(
        "{}",
        "║       Interaction Graph Demo           ║".bright_cyan()
    );
    println!(
        "{}",
        "╚════════════════════════════════════════╝".bright_cyan()
    );
    println!();
    Ok(())
}
