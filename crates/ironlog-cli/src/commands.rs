//! Command parsing and execution.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tracing::debug;

use ironlog_core::api::ApiError;
use ironlog_core::auth::{SessionError, SessionManager};
use ironlog_core::models::{Exercise, UserUpdate};
use ironlog_core::Config;

pub const USAGE: &str = "\
Usage: ironlog <command> [args]

Commands:
  login [email]             Sign in (prompts for password)
  signup <name> <email>     Create an account and sign in
  logout                    Sign out and forget the stored session
  whoami                    Show the signed-in user
  groups                    List muscle groups
  exercises <group>         List exercises for a group
  catalog                   List every group with its exercises
  exercise <id>             Show exercise details
  done <id>                 Mark an exercise as completed today
  history                   Show training history
  profile <name> [--password]
                            Update your name (and optionally password)
  help                      Show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    SignUp { name: String, email: String },
    Logout,
    WhoAmI,
    Groups,
    Exercises { group: String },
    Catalog,
    Exercise { id: String },
    Done { id: String },
    History,
    Profile { name: String, change_password: bool },
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };
        let arg = |i: usize, what: &str| -> Result<String> {
            args.get(i)
                .cloned()
                .with_context(|| format!("`{name}` needs {what}"))
        };

        Ok(match name.as_str() {
            "login" => Command::Login {
                email: args.get(1).cloned(),
            },
            "signup" => Command::SignUp {
                name: arg(1, "a name")?,
                email: arg(2, "an email")?,
            },
            "logout" => Command::Logout,
            "whoami" => Command::WhoAmI,
            "groups" => Command::Groups,
            "exercises" => Command::Exercises {
                group: arg(1, "a group")?,
            },
            "catalog" => Command::Catalog,
            "exercise" => Command::Exercise {
                id: arg(1, "an exercise id")?,
            },
            "done" => Command::Done {
                id: arg(1, "an exercise id")?,
            },
            "history" => Command::History,
            "profile" => Command::Profile {
                name: arg(1, "a name")?,
                change_password: args.iter().skip(2).any(|a| a == "--password"),
            },
            "help" | "-h" | "--help" => Command::Help,
            other => bail!("unknown command `{other}`"),
        })
    }

    fn needs_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::SignUp { .. } | Command::Logout | Command::Help
        )
    }
}

pub async fn run(command: Command, manager: &SessionManager, config: &mut Config) -> Result<()> {
    if command.needs_session() && !manager.is_signed_in() {
        bail!("not signed in - run `ironlog login` first");
    }

    let result = execute(command, manager, config).await;
    if let Err(ref e) = result {
        if let Some(api) = e.downcast_ref::<ApiError>() {
            if api.is_session_ending() {
                eprintln!("Your session has ended. Run `ironlog login` to sign in again.");
            }
        }
    }
    result
}

async fn execute(command: Command, manager: &SessionManager, config: &mut Config) -> Result<()> {
    let client = manager.client();
    debug!(?command, "Running command");

    match command {
        Command::Help => println!("{USAGE}"),
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let session = manager.sign_in(&email, &password).await.map_err(flatten)?;
            config.last_email = Some(email);
            config.save()?;
            println!("Signed in as {} <{}>", session.user.name, session.user.email);
        }
        Command::SignUp { name, email } => {
            let password = rpassword::prompt_password("Password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                bail!("passwords do not match");
            }
            let session = manager
                .sign_up(&name, &email, &password)
                .await
                .map_err(flatten)?;
            config.last_email = Some(email);
            config.save()?;
            println!("Welcome, {}!", session.user.name);
        }
        Command::Logout => {
            manager.sign_out().map_err(flatten)?;
            println!("Signed out");
        }
        Command::WhoAmI => {
            if let Some(session) = manager.session() {
                println!("{} <{}>", session.user.name, session.user.email);
                if let Some(ref avatar) = session.user.avatar {
                    println!("Avatar: {}", client.avatar_url(avatar));
                }
            }
        }
        Command::Groups => {
            for group in client.fetch_groups().await? {
                println!("{group}");
            }
        }
        Command::Exercises { group } => {
            let exercises = client.fetch_exercises_by_group(&group).await?;
            print_exercises(&exercises);
        }
        Command::Catalog => {
            let groups = client.fetch_groups().await?;
            let lookups = groups
                .iter()
                .map(|group| client.fetch_exercises_by_group(group));
            let results = join_all(lookups).await;
            for (group, result) in groups.iter().zip(results) {
                println!("== {group}");
                print_exercises(&result?);
            }
        }
        Command::Exercise { id } => {
            let exercise = client.fetch_exercise(&id).await?;
            println!("{} ({})", exercise.name, exercise.group);
            println!("{}", exercise.summary());
            if let Some(ref demo) = exercise.demo {
                println!("Demo: {}", client.exercise_demo_url(demo));
            }
        }
        Command::Done { id } => {
            client.register_history(&id).await?;
            println!("Nice work! Exercise logged to your history.");
        }
        Command::History => {
            let days = client.fetch_history().await?;
            if days.is_empty() {
                println!("No exercises logged yet.");
            }
            for day in days {
                println!("== {}", day.title);
                for entry in day.data {
                    println!("  {}  {:<28} {}", entry.hour, entry.name, entry.group);
                }
            }
        }
        Command::Profile {
            name,
            change_password,
        } => {
            let mut update = UserUpdate {
                name,
                ..UserUpdate::default()
            };
            if change_password {
                update.old_password = Some(rpassword::prompt_password("Current password: ")?);
                let password = rpassword::prompt_password("New password: ")?;
                if password.len() < 6 {
                    bail!("password must have at least 6 characters");
                }
                update.password = Some(password);
            }
            let user = manager.update_account(update).await.map_err(flatten)?;
            println!("Profile updated: {}", user.name);
        }
    }
    Ok(())
}

fn print_exercises(exercises: &[Exercise]) {
    if exercises.is_empty() {
        println!("  (no exercises)");
    }
    for exercise in exercises {
        println!("  [{}] {:<28} {}", exercise.id, exercise.name, exercise.summary());
    }
}

/// Keep `ApiError` reachable by `downcast_ref` in `run`.
fn flatten(err: SessionError) -> anyhow::Error {
    match err {
        SessionError::Api(api) => api.into(),
        other => other.into(),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("no value entered");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_args_is_help() {
        assert_eq!(Command::parse(&[]).unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_login_optional_email() {
        assert_eq!(
            Command::parse(&args(&["login"])).unwrap(),
            Command::Login { email: None }
        );
        assert_eq!(
            Command::parse(&args(&["login", "ana@example.com"])).unwrap(),
            Command::Login {
                email: Some("ana@example.com".to_string())
            }
        );
    }

    #[test]
    fn test_parse_profile_password_flag() {
        assert_eq!(
            Command::parse(&args(&["profile", "Ana", "--password"])).unwrap(),
            Command::Profile {
                name: "Ana".to_string(),
                change_password: true
            }
        );
    }

    #[test]
    fn test_parse_missing_argument() {
        let err = Command::parse(&args(&["exercises"])).unwrap_err();
        assert!(err.to_string().contains("needs a group"));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(Command::parse(&args(&["dance"])).is_err());
    }

    #[test]
    fn test_session_requirements() {
        assert!(!Command::Logout.needs_session());
        assert!(!Command::Login { email: None }.needs_session());
        assert!(Command::History.needs_session());
        assert!(Command::Catalog.needs_session());
    }
}
