use std::{error::Error, io::Write, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    style::Print,
    terminal,
    terminal::ClearType,
};
use engine::{Credential, CredentialStore};

#[derive(Parser, Debug)]
#[command(name = "homebot_admin")]
#[command(about = "Admin utilities for homebot (bank credentials)")]
struct Cli {
    /// Credential store file (also read from `HOMEBOT_CREDENTIALS`).
    #[arg(
        long,
        env = "HOMEBOT_CREDENTIALS",
        default_value = "config/credentials"
    )]
    credentials: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Credentials(Credentials),
}

#[derive(Args, Debug)]
struct Credentials {
    #[command(subcommand)]
    command: CredentialsCommand,
}

#[derive(Subcommand, Debug)]
enum CredentialsCommand {
    /// Add or replace the bank login of a telegram user.
    Add(AddArgs),
    List,
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Telegram user id allowed to run the sync.
    #[arg(long)]
    user_id: u64,
    #[arg(long)]
    username: String,
    #[arg(long)]
    phone: String,
    /// Already authorized session to start from.
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Args, Debug)]
struct RemoveArgs {
    #[arg(long)]
    user_id: u64,
}

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self, Box<dyn Error + Send + Sync>> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn prompt_password(prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    let _raw = RawModeGuard::enter()?;

    let mut out = std::io::stderr();
    execute!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(prompt)
    )?;
    out.flush()?;

    let mut buf = String::new();
    loop {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event::read()?
        else {
            continue;
        };

        match code {
            KeyCode::Enter => {
                execute!(out, Print("\r\n"))?;
                out.flush()?;
                break;
            }
            KeyCode::Backspace => {
                if buf.pop().is_some() {
                    execute!(out, cursor::MoveLeft(1), Print(" "), cursor::MoveLeft(1))?;
                    out.flush()?;
                }
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                execute!(out, Print("\r\n"))?;
                out.flush()?;
                return Err("interrupted".into());
            }
            KeyCode::Char(ch) if !modifiers.contains(KeyModifiers::CONTROL) => {
                buf.push(ch);
                execute!(out, Print("*"))?;
                out.flush()?;
            }
            _ => {}
        }
    }

    Ok(buf)
}

fn notice(message: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut out = std::io::stderr();
    execute!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(message),
        Print("\r\n")
    )?;
    Ok(())
}

fn prompt_password_twice() -> Result<String, Box<dyn Error + Send + Sync>> {
    for _ in 0..3 {
        let p1 = prompt_password("Bank password: ")?;
        if p1.is_empty() {
            notice("Password must not be empty.")?;
            continue;
        }

        let p2 = prompt_password("Confirm password: ")?;
        if p1 == p2 {
            return Ok(p1);
        }

        notice("Passwords do not match. Try again.")?;
    }

    Err("too many attempts".into())
}

/// `+7********67`: enough to tell logins apart.
fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    chars
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            if i < 2 || i >= chars.len() - 2 {
                *ch
            } else {
                '*'
            }
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let Command::Credentials(Credentials { command }) = cli.command;

    let mut store = CredentialStore::load_or_empty(&cli.credentials)?;

    match command {
        CredentialsCommand::Add(args) => {
            let password = prompt_password_twice()?;
            let credential = Credential {
                username: args.username.clone(),
                phone: args.phone,
                password,
                session_id: args.session_id,
            };

            let replaced = store.insert(args.user_id, credential).is_some();
            store.save(&cli.credentials)?;
            if replaced {
                println!("replaced credential of user {}: {}", args.user_id, args.username);
            } else {
                println!("added credential of user {}: {}", args.user_id, args.username);
            }
        }
        CredentialsCommand::List => {
            if store.is_empty() {
                println!("no credentials in {}", cli.credentials.display());
            }
            for (user_id, credential) in store.iter() {
                println!(
                    "{user_id}\t{}\t{}{}",
                    credential.username,
                    mask_phone(&credential.phone),
                    if credential.session_id.is_some() {
                        "\t(session)"
                    } else {
                        ""
                    }
                );
            }
        }
        CredentialsCommand::Remove(args) => match store.remove(args.user_id) {
            Some(credential) => {
                store.save(&cli.credentials)?;
                println!(
                    "removed credential of user {}: {}",
                    args.user_id, credential.username
                );
            }
            None => {
                eprintln!("user not found: {}", args.user_id);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phones_are_masked() {
        assert_eq!(mask_phone("+79991234567"), "+7********67");
        assert_eq!(mask_phone("123"), "***");
    }

    #[test]
    fn cli_parses_add() {
        let cli = Cli::parse_from([
            "homebot_admin",
            "--credentials",
            "/tmp/creds",
            "credentials",
            "add",
            "--user-id",
            "42",
            "--username",
            "alice",
            "--phone",
            "+70000000000",
        ]);

        assert_eq!(cli.credentials, PathBuf::from("/tmp/creds"));
        let Command::Credentials(Credentials {
            command: CredentialsCommand::Add(args),
        }) = cli.command
        else {
            panic!("expected add");
        };
        assert_eq!(args.user_id, 42);
        assert_eq!(args.session_id, None);
    }
}
