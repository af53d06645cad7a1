use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use repometa::auth::TokenGenerator;
use repometa::config::MetadataConfig;
use repometa::metadata::MetadataService;
use repometa::store::SqliteStore;
use repometa::types::{Identity, ProjectRole, ProjectRoles, QuotaConfig, RepositoryRole, User};

fn parse_repository_role(s: &str) -> Result<RepositoryRole, String> {
    RepositoryRole::parse(s).ok_or_else(|| format!("invalid repository role: {s}"))
}

fn parse_project_role(s: &str) -> Result<ProjectRole, String> {
    ProjectRole::parse(s).ok_or_else(|| format!("invalid project role: {s}"))
}

#[derive(Parser)]
#[command(name = "repometa")]
#[command(about = "Project and repository metadata administration", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the database (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Login of the user performing the change
    #[arg(long, global = true, default_value = "admin@localhost.localdomain")]
    author: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Init,

    /// Project commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Repository commands
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Project membership commands
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },

    /// Application token commands
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Resolve the role of a user, a token or an anonymous caller on a repository
    Role {
        project: String,
        repo: String,

        /// Login of the user
        #[arg(long, conflicts_with = "token")]
        user: Option<String>,

        /// Application id of the token
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    List,
    Create { name: String },
    Show { name: String },
    Remove { name: String },
    Restore { name: String },
    Purge { name: String },
    /// Show the commit log of a project's metadata
    Log { name: String },
}

#[derive(Subcommand)]
enum RepoCommands {
    Add {
        project: String,
        repo: String,
        #[arg(long, value_parser = parse_repository_role, default_value = "write")]
        member_role: RepositoryRole,
        #[arg(long, value_parser = parse_repository_role)]
        guest_role: Option<RepositoryRole>,
    },
    Remove { project: String, repo: String },
    Restore { project: String, repo: String },
    Purge { project: String, repo: String },
    /// Replace the default roles of members and guests
    Roles {
        project: String,
        repo: String,
        #[arg(long, value_parser = parse_repository_role)]
        member_role: Option<RepositoryRole>,
        #[arg(long, value_parser = parse_repository_role)]
        guest_role: Option<RepositoryRole>,
    },
    /// Set the write quota
    Quota {
        project: String,
        repo: String,
        #[arg(long)]
        requests: u32,
        #[arg(long)]
        window: u32,
    },
    /// Grant a role on the repository to a member
    Grant {
        project: String,
        repo: String,
        login: String,
        #[arg(value_parser = parse_repository_role)]
        role: RepositoryRole,
    },
    /// Revoke a member's role on the repository
    Revoke {
        project: String,
        repo: String,
        login: String,
    },
}

#[derive(Subcommand)]
enum MemberCommands {
    Add {
        project: String,
        login: String,
        #[arg(long, value_parser = parse_project_role, default_value = "member")]
        role: ProjectRole,
    },
    Remove { project: String, login: String },
}

#[derive(Subcommand)]
enum TokenCommands {
    List,
    Create {
        app_id: String,
        /// Give the token system administrator privileges
        #[arg(long)]
        admin: bool,
    },
    Destroy { app_id: String },
    Purge { app_id: String },
    Activate { app_id: String },
    Deactivate { app_id: String },
    /// Register the token to a project
    Register {
        project: String,
        app_id: String,
        #[arg(long, value_parser = parse_project_role, default_value = "member")]
        role: ProjectRole,
    },
    /// Unregister the token from a project
    Unregister { project: String, app_id: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<MetadataConfig> {
    let mut config = match &cli.config {
        Some(path) => MetadataConfig::load(path)?,
        None => MetadataConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn open_store(config: &MetadataConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let db_path = config.db_path();
    if !db_path.exists() {
        bail!(
            "Database not found at {}. Run 'repometa init' first.",
            db_path.display()
        );
    }
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    Ok(Arc::new(store))
}

fn init(config: &MetadataConfig) -> anyhow::Result<()> {
    fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    info!("Initialized database at {}", db_path.display());
    println!("Initialized database at {}", db_path.display());
    Ok(())
}

async fn run_project(
    service: &MetadataService,
    store: &SqliteStore,
    author: &User,
    command: ProjectCommands,
) -> anyhow::Result<()> {
    match command {
        ProjectCommands::List => print_json(&service.list_projects().await?)?,
        ProjectCommands::Create { name } => {
            let revision = service.create_project(author, &name).await?;
            println!("Created project '{name}' at revision {revision}");
        }
        ProjectCommands::Show { name } => print_json(&service.get_project(&name).await?)?,
        ProjectCommands::Remove { name } => {
            let revision = service.remove_project(author, &name).await?;
            println!("Removed project '{name}' at revision {revision}");
        }
        ProjectCommands::Restore { name } => {
            let revision = service.restore_project(author, &name).await?;
            println!("Restored project '{name}' at revision {revision}");
        }
        ProjectCommands::Purge { name } => {
            service.purge_project(author, &name).await?;
            println!("Purged project '{name}'");
        }
        ProjectCommands::Log { name } => {
            for record in store.commit_log(&format!("projects/{name}"))? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.revision,
                    record.committed_at.to_rfc3339(),
                    record.author,
                    record.summary
                );
            }
        }
    }
    Ok(())
}

async fn run_repo(
    service: &MetadataService,
    author: &User,
    command: RepoCommands,
) -> anyhow::Result<()> {
    let revision = match command {
        RepoCommands::Add {
            project,
            repo,
            member_role,
            guest_role,
        } => {
            let roles = ProjectRoles::of(Some(member_role), guest_role);
            service.add_repo(author, &project, &repo, roles).await?
        }
        RepoCommands::Remove { project, repo } => {
            service.remove_repo(author, &project, &repo).await?
        }
        RepoCommands::Restore { project, repo } => {
            service.restore_repo(author, &project, &repo).await?
        }
        RepoCommands::Purge { project, repo } => service.purge_repo(author, &project, &repo).await?,
        RepoCommands::Roles {
            project,
            repo,
            member_role,
            guest_role,
        } => {
            let roles = ProjectRoles::of(member_role, guest_role);
            service
                .update_repository_project_roles(author, &project, &repo, roles)
                .await?
        }
        RepoCommands::Quota {
            project,
            repo,
            requests,
            window,
        } => {
            let quota = QuotaConfig::new(requests, window)?;
            service
                .update_write_quota(author, &project, &repo, quota)
                .await?
        }
        RepoCommands::Grant {
            project,
            repo,
            login,
            role,
        } => {
            let member = User::new(&login)?;
            service
                .add_user_repository_role(author, &project, &repo, &member, role)
                .await?
        }
        RepoCommands::Revoke {
            project,
            repo,
            login,
        } => {
            let member = User::new(&login)?;
            service
                .remove_user_repository_role(author, &project, &repo, &member)
                .await?
        }
    };
    println!("Revision {revision}");
    Ok(())
}

async fn run_member(
    service: &MetadataService,
    author: &User,
    command: MemberCommands,
) -> anyhow::Result<()> {
    let revision = match command {
        MemberCommands::Add {
            project,
            login,
            role,
        } => {
            let member = User::new(&login)?;
            service.add_member(author, &project, &member, role).await?
        }
        MemberCommands::Remove { project, login } => {
            let member = User::new(&login)?;
            service.remove_member(author, &project, &member).await?
        }
    };
    println!("Revision {revision}");
    Ok(())
}

async fn run_token(
    service: &MetadataService,
    author: &User,
    command: TokenCommands,
) -> anyhow::Result<()> {
    let revision = match command {
        TokenCommands::List => {
            let tokens = service.get_tokens().await?;
            return print_json(&tokens.app_ids);
        }
        TokenCommands::Create { app_id, admin } => {
            let issued = service.create_token(author, &app_id, admin).await?;
            println!();
            println!("========================================");
            println!("Token secret for '{app_id}' (save this, it won't be shown again):");
            println!();
            println!("  {}", issued.secret);
            println!();
            println!("========================================");
            println!();
            issued.revision
        }
        TokenCommands::Destroy { app_id } => service.destroy_token(author, &app_id).await?,
        TokenCommands::Purge { app_id } => service.purge_token(author, &app_id).await?,
        TokenCommands::Activate { app_id } => service.activate_token(author, &app_id).await?,
        TokenCommands::Deactivate { app_id } => service.deactivate_token(author, &app_id).await?,
        TokenCommands::Register {
            project,
            app_id,
            role,
        } => service.add_token(author, &project, &app_id, role).await?,
        TokenCommands::Unregister { project, app_id } => {
            service.remove_token(author, &project, &app_id).await?
        }
    };
    println!("Revision {revision}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_filter.parse()?))
        .init();

    let command = match cli.command {
        Commands::Init => return init(&config),
        command => command,
    };

    let store = open_store(&config)?;
    let service = MetadataService::new(store.clone())
        .with_catalog(store.clone())
        .with_token_generator(TokenGenerator::with_prefix(config.token_prefix.clone()));
    let author = User::new(&cli.author)?;

    match command {
        Commands::Init => {}
        Commands::Project { command } => run_project(&service, &store, &author, command).await?,
        Commands::Repo { command } => run_repo(&service, &author, command).await?,
        Commands::Member { command } => run_member(&service, &author, command).await?,
        Commands::Token { command } => run_token(&service, &author, command).await?,
        Commands::Role {
            project,
            repo,
            user,
            token,
        } => {
            let identity = match (user, token) {
                (Some(login), _) => Identity::User(User::new(&login)?),
                (None, Some(app_id)) => Identity::Token(app_id),
                (None, None) => Identity::Anonymous,
            };
            let role = service.find_repository_role(&project, &repo, &identity).await?;
            match role {
                Some(role) => println!("{role}"),
                None => println!("NONE"),
            }
        }
    }

    Ok(())
}
