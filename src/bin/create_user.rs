use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use campus_api::auth::passwords::PasswordService;
use campus_api::auth::responses::Role;

#[derive(Parser, Debug)]
#[command(name = "create_user", about = "Provision a campus account directly")]
struct Args {
    /// Unique username for the account.
    #[arg(long)]
    username: String,

    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    /// Role to assign (`student`, `lecturer`, or `admin`).
    #[arg(long, default_value = "student")]
    role: String,

    /// Mark the email as already confirmed.
    #[arg(long)]
    confirmed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = args.email.trim().to_lowercase();

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }

    let role = args.role.trim().to_lowercase();
    if !Role::is_valid(&role) {
        writeln!(
            io::stderr(),
            "error: unsupported role '{role}'. Use 'student', 'lecturer', or 'admin'."
        )?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let existing =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE lower(email) = lower($1)")
            .bind(&email)
            .fetch_one(&pool)
            .await?;

    if existing > 0 {
        writeln!(
            io::stderr(),
            "error: a user with email '{email}' already exists."
        )?;
        std::process::exit(1);
    }

    let password_service = PasswordService::new(19 * 1024)
        .map_err(|err| io::Error::other(format!("argon2 init failed: {err}")))?;
    let password_hash = password_service
        .hash_password(&args.password)
        .map_err(|err| io::Error::other(format!("password hash failed: {err}")))?;

    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (username, email, role, password_hash, email_confirmed) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(args.username.trim())
    .bind(&email)
    .bind(&role)
    .bind(&password_hash)
    .bind(args.confirmed)
    .fetch_one(&pool)
    .await?;

    println!("Created {role} user '{email}' with id {user_id}");
    Ok(())
}
