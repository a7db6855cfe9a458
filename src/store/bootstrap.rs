use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use sqlx::PgPool;
use uuid::Uuid;

/// First-run bootstrap: create a single admin user if the `users` table is
/// empty. Bearer-token issuance for that user is external-collaborator
/// territory (see auth module); this only seeds the account row.
#[tracing::instrument(skip(pool, admin_password), err)]
pub async fn run(pool: &PgPool, admin_password: Option<&str>) -> anyhow::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        tracing::info!("bootstrap skipped — users already exist");
        return Ok(());
    }

    let password = admin_password.unwrap_or("admin");
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hash failed: {e}"))?
        .to_string();

    let admin_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash) VALUES ($1, 'admin', 'admin@localhost', $2)",
    )
    .bind(admin_id)
    .bind(&password_hash)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %admin_id, "admin user created");

    Ok(())
}
