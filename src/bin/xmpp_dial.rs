//! xmpp-dial: connect (or register) an account and hold the session open.
//!
//! Reads accounts from a TOML config file, falling back to the
//! `XMPP_ACCOUNT` / `XMPP_PASSWORD` / `XMPP_SERVER` environment.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use xmpp::protocol::{BobData, Form, FormHandler};
use xmpp::transport::{LogSink, TrafficLog};
use xmpp::{Config, Dialer, VERSION};

#[derive(Parser)]
#[command(name = "xmpp-dial")]
#[command(version = VERSION)]
#[command(about = "Dial an XMPP account and keep the session alive", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Create the account with in-band registration
    #[arg(long)]
    create: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Account to use when several are configured
    #[arg(long)]
    account: Option<String>,
}

/// Prompts on stdin for every field the server asks for.
struct PromptHandler;

impl FormHandler for PromptHandler {
    fn fill(&self, form: &Form, data: &[BobData]) -> xmpp::Result<Form> {
        let stdin = io::stdin();
        let mut out = io::stderr().lock();
        let mut filled = form.clone();

        if let Some(title) = &form.title {
            writeln!(out, "{title}")?;
        }
        for line in &form.instructions {
            writeln!(out, "{line}")?;
        }

        for field in &mut filled.fields {
            if matches!(field.kind.as_deref(), Some("hidden" | "fixed")) || field.var.is_none() {
                continue;
            }
            for media in &field.media {
                match data.iter().find(|d| d.matches_uri(&media.uri)) {
                    Some(blob) => {
                        let path = std::env::temp_dir().join(media_file_name(&blob.cid));
                        std::fs::write(&path, &blob.data)?;
                        writeln!(out, "  media saved to {}", path.display())?;
                    },
                    None => writeln!(out, "  media: {}", media.uri)?,
                }
            }

            let label = field
                .label
                .as_deref()
                .or(field.var.as_deref())
                .unwrap_or_default();
            let marker = if field.required { "*" } else { "" };
            match field.value() {
                Some(current) => write!(out, "{label}{marker} [{current}]: ")?,
                None => write!(out, "{label}{marker}: ")?,
            }
            out.flush()?;

            let mut answer = String::new();
            stdin.lock().read_line(&mut answer)?;
            let answer = answer.trim();
            if !answer.is_empty() {
                field.set_value(answer);
            }
        }

        Ok(filled.submit())
    }
}

/// Local file name for a server supplied content id.
fn media_file_name(cid: &str) -> String {
    let safe: String = cid
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '+' | '@' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("xmpp-dial-{safe}")
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return Config::from_file(&path).with_context(|| format!("loading {}", path.display()));
    }
    match Config::default_path().filter(|p| p.exists()) {
        Some(path) => {
            Config::from_file(&path).with_context(|| format!("loading {}", path.display()))
        },
        None => Ok(Config::from_env()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = load_config(cli.config_file)?;
    let account = config
        .account(cli.account.as_deref())
        .context("selecting account")?;

    let mut dial_config = account.dialer_config(&config.liveness);
    if config.logging.traffic {
        let sink: LogSink = Arc::new(Mutex::new(io::stderr()));
        dial_config = dial_config.with_traffic_log(TrafficLog::both(sink));
    }
    let dialer = Dialer::new(dial_config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let mut session = if cli.create {
            dialer.register_account(Arc::new(PromptHandler)).await
        } else {
            dialer.connect().await
        }
        .with_context(|| format!("connecting {}", account.account))?;

        tracing::info!(
            "Connected as {} (stages: {:?}, registration: {:?})",
            session.jid(),
            session.report().stages,
            session.report().registration
        );

        tokio::select! {
            failure = session.next_failure() => {
                if let Some(failure) = failure {
                    anyhow::bail!("session failed: {failure}");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing session");
                session.close().await?;
            },
        }
        Ok::<_, anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_file_name_stays_in_directory() {
        assert_eq!(
            media_file_name("sha1+5a4b@bob.xmpp.org"),
            "xmpp-dial-sha1+5a4b@bob.xmpp.org"
        );

        let name = media_file_name("../../etc/passwd");
        assert!(!name.contains('/'));
        let path = std::env::temp_dir().join(&name);
        assert_eq!(path.parent(), Some(std::env::temp_dir().as_path()));

        assert!(!media_file_name("..\\x:y").contains(['\\', ':']));
    }
}
