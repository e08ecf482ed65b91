// UI layer: terminal output for posts and reports, the command handlers
// shared by the CLI and the interactive shell, and the shell itself.

use crate::actions::{self, Progress};
use crate::api::{build_client, ContentService, XrpcClient};
use crate::config::Config;
use crate::record::PostView;
use crate::richtext;
use crate::session::SessionManager;
use crate::store::{CredentialStore, LocalStorageStore, MemoryStorage};
use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat};
use crossterm::style::Stylize;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

pub type Sessions = SessionManager<Box<dyn CredentialStore>, XrpcClient>;

/// Print one post: author line, rich text, images, counters, reply parent
/// and the post URI.
pub fn print_post(w: &mut dyn Write, p: &PostView) -> Result<()> {
    let created = p
        .record
        .created_at()
        .with_context(|| format!("post {}", p.uri))?;
    writeln!(
        w,
        "{} [{}] ({})",
        p.author.handle.as_str().red(),
        p.author.display_name.as_deref().unwrap_or(""),
        created
            .with_timezone(&Local)
            .to_rfc3339_opts(SecondsFormat::Secs, false)
    )?;

    let spans = p.record.spans();
    let segments = richtext::render(&p.record.text, &spans);
    writeln!(w, "{}", richtext::to_ansi(&segments))?;

    if let Some(embed) = &p.embed {
        for image in &embed.images {
            writeln!(w, " {{{}}}", image.fullsize)?;
        }
    }
    writeln!(
        w,
        " 👍({})⚡({})↩️ ({})",
        p.like_count.unwrap_or(0),
        p.repost_count.unwrap_or(0),
        p.reply_count.unwrap_or(0)
    )?;
    if let Some(parent) = p.record.reply.as_ref().and_then(|r| r.parent.as_ref()) {
        writeln!(w, " > {}", parent.uri.as_str().blue())?;
    }
    writeln!(w, " - {}", p.uri.as_str().blue())?;
    writeln!(w)?;
    Ok(())
}

/// Obtain a session for the configured account and build a client for it.
/// A credential that could not be saved is still used for this run.
pub fn connect(sessions: &Sessions, config: &Config) -> Result<XrpcClient> {
    config.validate()?;
    let obtained = sessions
        .obtain(config)
        .with_context(|| format!("cannot log in as {}", config.handle))?;
    if let Some(e) = &obtained.persist_error {
        eprintln!("{} {}", "Warning:".yellow().bold(), e);
    }
    Ok(build_client(&obtained.credential, &config.host)?)
}

pub fn cmd_follow(client: &dyn ContentService, target: &str, w: &mut dyn Write) -> Result<()> {
    let done = actions::follow_one(client, target)?;
    writeln!(w, "{}", done.uri)?;
    Ok(())
}

pub fn cmd_follows(client: &dyn ContentService, handle: &str, w: &mut dyn Write) -> Result<()> {
    for account in actions::FollowsPager::new(client, handle) {
        let account = account.with_context(|| format!("cannot list follows of {}", handle))?;
        writeln!(
            w,
            "{}\t{}\t{}",
            account.handle,
            account.did,
            account.display_name.unwrap_or_default()
        )?;
    }
    Ok(())
}

pub fn cmd_follow_all(client: &dyn ContentService, handle: &str, w: &mut dyn Write) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} [{pos}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = actions::follow_all_followed_by_with(client, handle, |event| {
        match event {
            Progress::Followed(a, _) => spinner.set_message(format!("followed {}", a.handle)),
            Progress::Failed(a, _) => spinner.set_message(format!("failed {}", a.handle)),
            Progress::Skipped(a) => spinner.set_message(format!("skipped {}", a.handle)),
        }
        spinner.inc(1);
    });
    spinner.finish_and_clear();

    let report = report.with_context(|| format!("cannot list follows of {}", handle))?;
    writeln!(w, "{}", report)?;
    Ok(())
}

pub fn cmd_timeline(client: &dyn ContentService, limit: u32, w: &mut dyn Write) -> Result<()> {
    let page = client.timeline(limit, None)?;
    for item in page.feed.iter().rev() {
        print_post(w, &item.post)?;
    }
    Ok(())
}

pub fn cmd_post(client: &dyn ContentService, text: &str, w: &mut dyn Write) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("refusing to post empty text");
    }
    let uri = client.create_post(text)?;
    writeln!(w, "{}", uri)?;
    Ok(())
}

const HELP: &str = "\
commands:
  login <handle> <password>   remember credentials for this shell
  follow <did|at-uri|handle>  follow one account
  follows [handle]            list accounts a user follows
  follow-all <handle>         follow everyone <handle> follows
  timeline [n]                show the home timeline
  post <text...>              publish a post
  help                        show this help
  exit                        leave the shell";

/// Interactive command loop. Credentials given with `login` live in the
/// shell's local storage and override the configured handle and password.
pub struct Shell {
    config: Config,
    sessions: Sessions,
    logins: LocalStorageStore<MemoryStorage>,
}

impl Shell {
    pub fn new(config: Config, sessions: Sessions) -> Self {
        Shell {
            config,
            sessions,
            logins: LocalStorageStore::new(MemoryStorage::default()),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        println!("type `help` for commands");
        loop {
            let line: String = Input::new().with_prompt("bsctl").interact_text()?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            let Some((&command, args)) = parts.split_first() else {
                continue;
            };
            if matches!(command, "exit" | "quit") {
                break;
            }

            let mut out = Vec::new();
            match self.execute(command, args, &line, &mut out) {
                Ok(()) => print!("{}", String::from_utf8_lossy(&out)),
                Err(e) => {
                    tracing::debug!(command, error = ?e, "command failed");
                    eprintln!("{} {:#}", "Error:".red().bold(), e);
                }
            }
        }
        Ok(())
    }

    /// The configuration for the next command, with any shell login applied.
    fn effective_config(&self) -> Config {
        let mut cfg = self.config.clone();
        if let Some((handle, password)) = self.logins.stored_login() {
            cfg.handle = handle;
            cfg.password = password;
        }
        cfg
    }

    fn execute(&mut self, command: &str, args: &[&str], line: &str, w: &mut dyn Write) -> Result<()> {
        match command {
            "help" => writeln!(w, "{}", HELP)?,
            "login" => {
                let [handle, password] = args else {
                    anyhow::bail!("usage: login <handle> <password>");
                };
                self.sessions.forget(&self.effective_config());
                self.logins.remember_login(handle, password)?;
                writeln!(w, "login credentials stored for {}", handle)?;
            }
            "follow" => {
                let [target] = args else {
                    anyhow::bail!("usage: follow <did|at-uri|handle>");
                };
                let client = connect(&self.sessions, &self.effective_config())?;
                cmd_follow(&client, target, w)?;
            }
            "follows" => {
                let cfg = self.effective_config();
                let handle = args.first().copied().unwrap_or(cfg.handle.as_str()).to_string();
                let client = connect(&self.sessions, &cfg)?;
                cmd_follows(&client, &handle, w)?;
            }
            "follow-all" => {
                let [handle] = args else {
                    anyhow::bail!("usage: follow-all <handle>");
                };
                let client = connect(&self.sessions, &self.effective_config())?;
                cmd_follow_all(&client, handle, w)?;
            }
            "timeline" => {
                let limit = match args.first() {
                    Some(n) => n.parse().context("timeline count must be a number")?,
                    None => 30,
                };
                let client = connect(&self.sessions, &self.effective_config())?;
                cmd_timeline(&client, limit, w)?;
            }
            "post" => {
                let text = line.trim_start().trim_start_matches("post").trim();
                let client = connect(&self.sessions, &self.effective_config())?;
                cmd_post(&client, text, w)?;
            }
            other => anyhow::bail!("unrecognized command {}; try `help`", other),
        }
        Ok(())
    }
}
