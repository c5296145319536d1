//! Store adapter: CRUD over channels, destinations, users, config and
//! audit logs.
//!
//! Credential writes always persist both the SHA-256 lookup hash and the
//! AEAD blob. Credential reads decrypt; a failed decryption is a warning,
//! not a fatal — the channel simply loses token display/injection until
//! the credential is rotated.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use onair_common::ids;
use onair_common::models::{
    AuditLogEntry, Channel, ChannelStatus, Destination, DestinationStatus, EncodingProfile, Source,
    User, UserRole,
};
use onair_common::vault::{self, TokenVault};

// ── Channels ────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: i32,
    slug: String,
    display_name: String,
    enabled: bool,
    loop_enabled: bool,
    primary_override_enabled: bool,
    auto_restart_loop: bool,
    primary_preempt_requires_stability: bool,
    failover_timeout_seconds: i32,
    current_active_source: String,
    loop_source_file: String,
    keyframe_interval: i32,
    video_bitrate: i32,
    audio_bitrate: i32,
    output_resolution: String,
    primary_token_encrypted: String,
    primary_token_nonce: String,
    loop_token_encrypted: String,
    loop_token_nonce: String,
}

const CHANNEL_COLUMNS: &str = "id, slug, display_name, enabled, loop_enabled, \
     primary_override_enabled, auto_restart_loop, primary_preempt_requires_stability, \
     failover_timeout_seconds, current_active_source, loop_source_file, \
     keyframe_interval, video_bitrate, audio_bitrate, output_resolution, \
     primary_token_encrypted, primary_token_nonce, loop_token_encrypted, loop_token_nonce";

fn decrypt_or_warn(vault: &TokenVault, slug: &str, which: &str, ct: &str, nonce: &str) -> String {
    match vault.open(ct, nonce) {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(slug, which, error = %e, "token decryption failed");
            String::new()
        }
    }
}

impl ChannelRow {
    fn into_channel(self, vault: &TokenVault) -> Channel {
        let primary_token = decrypt_or_warn(
            vault,
            &self.slug,
            "primary",
            &self.primary_token_encrypted,
            &self.primary_token_nonce,
        );
        let loop_token = decrypt_or_warn(
            vault,
            &self.slug,
            "loop",
            &self.loop_token_encrypted,
            &self.loop_token_nonce,
        );
        Channel {
            id: self.id,
            slug: self.slug,
            display_name: self.display_name,
            enabled: self.enabled,
            loop_enabled: self.loop_enabled,
            primary_override_enabled: self.primary_override_enabled,
            auto_restart_loop: self.auto_restart_loop,
            primary_preempt_requires_stability: self.primary_preempt_requires_stability,
            failover_timeout_seconds: self.failover_timeout_seconds,
            active_source: Source::from_str(&self.current_active_source).unwrap_or(Source::None),
            loop_source_file: self.loop_source_file,
            encoding: EncodingProfile {
                keyframe_interval: self.keyframe_interval,
                video_bitrate_kbps: self.video_bitrate,
                audio_bitrate_kbps: self.audio_bitrate,
            },
            output_resolution: self.output_resolution,
            primary_token,
            loop_token,
            status: ChannelStatus::Down,
            bitrate_kbps: 0,
            uptime: String::new(),
            destinations: Vec::new(),
            primary_stream_name: String::new(),
        }
    }
}

/// Load every channel with its destinations embedded. Observed fields
/// (status, bitrate, uptime) are left at their defaults; the caller
/// derives them from the live stream map.
pub async fn load_channels(pool: &PgPool, vault: &TokenVault) -> sqlx::Result<Vec<Channel>> {
    let rows: Vec<ChannelRow> =
        sqlx::query_as(&format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id"))
            .fetch_all(pool)
            .await?;

    let mut by_channel: HashMap<i32, Vec<Destination>> = HashMap::new();
    for dest in all_destinations(pool).await? {
        by_channel.entry(dest.channel_id).or_default().push(dest);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut ch = row.into_channel(vault);
            ch.destinations = by_channel.remove(&ch.id).unwrap_or_default();
            ch
        })
        .collect())
}

pub async fn load_channel(
    pool: &PgPool,
    vault: &TokenVault,
    id: i32,
) -> sqlx::Result<Option<Channel>> {
    let row: Option<ChannelRow> =
        sqlx::query_as(&format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    match row {
        Some(row) => {
            let mut ch = row.into_channel(vault);
            ch.destinations = destinations_for_channel(pool, ch.id).await?;
            Ok(Some(ch))
        }
        None => Ok(None),
    }
}

/// Freshly created channel with its one-time-displayed credentials.
pub struct CreatedChannel {
    pub id: i32,
    pub primary_token: String,
    pub loop_token: String,
}

pub async fn create_channel(
    pool: &PgPool,
    vault: &TokenVault,
    slug: &str,
    display_name: &str,
    loop_source_file: &str,
    enabled: bool,
) -> anyhow::Result<CreatedChannel> {
    let primary_token = vault::generate_token();
    let loop_token = vault::generate_token();

    let (primary_enc, primary_nonce) = vault.seal(&primary_token)?;
    let (loop_enc, loop_nonce) = vault.seal(&loop_token)?;

    let org_id = ensure_default_org(pool).await?;

    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO channels (slug, display_name, enabled, loop_source_file, \
             current_active_source, loop_enabled, primary_override_enabled, \
             auto_restart_loop, failover_timeout_seconds, organization_id, \
             primary_token_hash, primary_token_encrypted, primary_token_nonce, \
             loop_token_hash, loop_token_encrypted, loop_token_nonce) \
         VALUES ($1, $2, $3, $4, 'NONE', false, true, true, 10, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING id",
    )
    .bind(slug)
    .bind(display_name)
    .bind(enabled)
    .bind(loop_source_file)
    .bind(&org_id)
    .bind(vault::hash_token(&primary_token))
    .bind(&primary_enc)
    .bind(&primary_nonce)
    .bind(vault::hash_token(&loop_token))
    .bind(&loop_enc)
    .bind(&loop_nonce)
    .fetch_one(pool)
    .await?;

    Ok(CreatedChannel {
        id,
        primary_token,
        loop_token,
    })
}

/// Settings accepted by `PUT /api/channels/{id}`.
#[derive(Debug, serde::Deserialize)]
pub struct ChannelUpdate {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub loop_source_file: String,
    #[serde(default)]
    pub loop_enabled: bool,
    #[serde(default)]
    pub primary_override_enabled: bool,
    #[serde(default)]
    pub auto_restart_loop: bool,
    #[serde(default)]
    pub primary_preempt_requires_stability: bool,
    #[serde(default)]
    pub failover_timeout_seconds: i32,
    #[serde(default)]
    pub keyframe_interval: i32,
    #[serde(default)]
    pub video_bitrate: i32,
    #[serde(default)]
    pub audio_bitrate: i32,
    #[serde(default)]
    pub output_resolution: String,
}

pub async fn update_channel(pool: &PgPool, id: i32, update: &ChannelUpdate) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE channels SET \
             display_name = COALESCE(NULLIF($1, ''), display_name), \
             loop_source_file = $2, \
             loop_enabled = $3, \
             primary_override_enabled = $4, \
             auto_restart_loop = $5, \
             primary_preempt_requires_stability = $6, \
             failover_timeout_seconds = GREATEST($7, 1), \
             keyframe_interval = $8, \
             video_bitrate = $9, \
             audio_bitrate = $10, \
             output_resolution = $11, \
             updated_at = now() \
         WHERE id = $12",
    )
    .bind(&update.display_name)
    .bind(&update.loop_source_file)
    .bind(update.loop_enabled)
    .bind(update.primary_override_enabled)
    .bind(update.auto_restart_loop)
    .bind(update.primary_preempt_requires_stability)
    .bind(update.failover_timeout_seconds)
    .bind(update.keyframe_interval)
    .bind(update.video_bitrate)
    .bind(update.audio_bitrate)
    .bind(&update.output_resolution)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_channel(pool: &PgPool, id: i32) -> sqlx::Result<u64> {
    // Destinations cascade via the foreign key.
    let result = sqlx::query("DELETE FROM channels WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn set_channel_enabled(pool: &PgPool, id: i32, enabled: bool) -> sqlx::Result<()> {
    sqlx::query("UPDATE channels SET enabled = $1, updated_at = now() WHERE id = $2")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_loop_enabled(pool: &PgPool, id: i32, enabled: bool) -> sqlx::Result<()> {
    sqlx::query("UPDATE channels SET loop_enabled = $1, updated_at = now() WHERE id = $2")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_active_source_by_id(
    pool: &PgPool,
    id: i32,
    source: Source,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE channels SET current_active_source = $1, updated_at = now() WHERE id = $2")
        .bind(source.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_active_source_by_slug(
    pool: &PgPool,
    slug: &str,
    source: Source,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE channels SET current_active_source = $1, updated_at = now() WHERE slug = $2",
    )
    .bind(source.as_str())
    .bind(slug)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Hook authentication ─────────────────────────────────────────────

/// The minimum a publish hook needs to authenticate a stream.
#[derive(sqlx::FromRow)]
pub struct ChannelAuth {
    pub id: i32,
    pub slug: String,
    pub primary_token_hash: String,
    pub loop_token_hash: String,
    pub primary_token_encrypted: String,
    pub primary_token_nonce: String,
    pub loop_token_encrypted: String,
    pub loop_token_nonce: String,
}

const AUTH_COLUMNS: &str = "id, slug, primary_token_hash, loop_token_hash, \
     primary_token_encrypted, primary_token_nonce, loop_token_encrypted, loop_token_nonce";

pub async fn channel_auth_by_slug(pool: &PgPool, slug: &str) -> sqlx::Result<Option<ChannelAuth>> {
    sqlx::query_as(&format!(
        "SELECT {AUTH_COLUMNS} FROM channels WHERE slug = $1 AND enabled = true"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await
}

/// Fallback lookup for operators who used the raw primary token as the
/// stream path.
pub async fn channel_auth_by_primary_token(
    pool: &PgPool,
    raw_token: &str,
) -> sqlx::Result<Option<ChannelAuth>> {
    sqlx::query_as(&format!(
        "SELECT {AUTH_COLUMNS} FROM channels \
         WHERE primary_token_hash = $1 AND enabled = true"
    ))
    .bind(vault::hash_token(raw_token))
    .fetch_optional(pool)
    .await
}

// ── Destinations ────────────────────────────────────────────────────

type DestinationRow = (i32, i32, String, String, Option<String>, bool, String);

fn destination_from_row(row: DestinationRow) -> Destination {
    let (id, channel_id, name, target_url, stream_key, enabled, status) = row;
    Destination {
        id,
        channel_id,
        name,
        target_url,
        stream_key,
        enabled,
        status: DestinationStatus::from_str(&status).unwrap_or(DestinationStatus::Disconnected),
    }
}

const DESTINATION_COLUMNS: &str = "id, channel_id, name, target_url, stream_key, enabled, status";

pub async fn all_destinations(pool: &PgPool) -> sqlx::Result<Vec<Destination>> {
    let rows: Vec<DestinationRow> =
        sqlx::query_as(&format!("SELECT {DESTINATION_COLUMNS} FROM destinations ORDER BY id"))
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(destination_from_row).collect())
}

pub async fn destinations_for_channel(
    pool: &PgPool,
    channel_id: i32,
) -> sqlx::Result<Vec<Destination>> {
    let rows: Vec<DestinationRow> = sqlx::query_as(&format!(
        "SELECT {DESTINATION_COLUMNS} FROM destinations WHERE channel_id = $1 ORDER BY id"
    ))
    .bind(channel_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(destination_from_row).collect())
}

pub async fn create_destination(
    pool: &PgPool,
    channel_id: i32,
    name: &str,
    target_url: &str,
    stream_key: Option<&str>,
) -> sqlx::Result<i32> {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO destinations (channel_id, name, target_url, stream_key, enabled, status) \
         VALUES ($1, $2, $3, $4, true, 'DISCONNECTED') RETURNING id",
    )
    .bind(channel_id)
    .bind(name)
    .bind(target_url)
    .bind(stream_key)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Partial destination update; only provided fields are written.
pub async fn update_destination(
    pool: &PgPool,
    id: i32,
    name: Option<&str>,
    target_url: Option<&str>,
    stream_key: Option<&str>,
) -> sqlx::Result<u64> {
    // Build dynamic UPDATE (only set provided fields)
    let mut sets = Vec::new();
    let mut params: Vec<&str> = Vec::new();
    let mut idx = 1; // $1 = id

    for (column, value) in [
        ("name", name),
        ("target_url", target_url),
        ("stream_key", stream_key),
    ] {
        if let Some(value) = value {
            idx += 1;
            sets.push(format!("{column} = ${idx}"));
            params.push(value);
        }
    }

    if sets.is_empty() {
        return Ok(0);
    }

    let sql = format!("UPDATE destinations SET {} WHERE id = $1", sets.join(", "));
    let mut query = sqlx::query(&sql).bind(id);
    for param in params {
        query = query.bind(param);
    }
    Ok(query.execute(pool).await?.rows_affected())
}

pub async fn delete_destination(pool: &PgPool, id: i32) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM destinations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn set_destination_enabled(pool: &PgPool, id: i32, enabled: bool) -> sqlx::Result<()> {
    sqlx::query("UPDATE destinations SET enabled = $1 WHERE id = $2")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_destination_status(
    pool: &PgPool,
    id: i32,
    status: DestinationStatus,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE destinations SET status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Users ───────────────────────────────────────────────────────────

type UserRow = (
    String,
    String,
    String,
    String,
    String,
    bool,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn user_from_row(row: UserRow) -> User {
    let (id, email, name, password_hash, role, is_active, last_login_at, created_at, updated_at) =
        row;
    User {
        id,
        email,
        name,
        password_hash,
        role: UserRole::from_str(&role).unwrap_or(UserRole::Viewer),
        is_active,
        last_login_at,
        created_at,
        updated_at,
    }
}

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, is_active, last_login_at, created_at, updated_at";

pub async fn list_users(pool: &PgPool) -> sqlx::Result<Vec<User>> {
    let rows: Vec<UserRow> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"))
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(user_from_row).collect())
}

pub async fn get_user(pool: &PgPool, id: &str) -> sqlx::Result<Option<User>> {
    let row: Option<UserRow> =
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(user_from_row))
}

pub async fn create_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    name: &str,
    role: UserRole,
) -> sqlx::Result<String> {
    let id = ids::user_id();
    sqlx::query("INSERT INTO users (id, email, password_hash, name, role) VALUES ($1, $2, $3, $4, $5)")
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(role.to_string())
        .execute(pool)
        .await?;
    Ok(id)
}

/// Partial user update; absent fields keep their current value.
pub async fn update_user(
    pool: &PgPool,
    id: &str,
    name: Option<&str>,
    email: Option<&str>,
    role: Option<&str>,
    is_active: Option<bool>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE users SET \
             name = COALESCE($2, name), \
             email = COALESCE($3, email), \
             role = COALESCE($4, role), \
             is_active = COALESCE($5, is_active), \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(role)
    .bind(is_active)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_user(pool: &PgPool, id: &str) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn set_user_active(pool: &PgPool, id: &str, active: bool) -> sqlx::Result<u64> {
    let result =
        sqlx::query("UPDATE users SET is_active = $1, updated_at = now() WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn set_user_password(pool: &PgPool, id: &str, password_hash: &str) -> sqlx::Result<u64> {
    let result =
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

// ── System config ───────────────────────────────────────────────────

pub async fn list_config(
    pool: &PgPool,
) -> sqlx::Result<Vec<(String, serde_json::Value, Option<String>)>> {
    sqlx::query_as("SELECT key, value, description FROM system_config ORDER BY key")
        .fetch_all(pool)
        .await
}

pub async fn upsert_config(
    pool: &PgPool,
    key: &str,
    value: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO system_config (key, value) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Audit log ───────────────────────────────────────────────────────

pub async fn append_audit(
    pool: &PgPool,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: serde_json::Value,
    actor: Option<&str>,
    ip: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO audit_logs (id, action, resource_type, resource_id, details, actor, ip_address) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(ids::audit_id())
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(details)
    .bind(actor)
    .bind(ip)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_audit(pool: &PgPool, limit: i64) -> sqlx::Result<Vec<AuditLogEntry>> {
    type Row = (
        String,
        String,
        String,
        String,
        Option<serde_json::Value>,
        Option<String>,
        Option<String>,
        DateTime<Utc>,
    );
    let rows: Vec<Row> = sqlx::query_as(
        "SELECT id, action, resource_type, resource_id, details, actor, ip_address, created_at \
         FROM audit_logs ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(
            |(id, action, resource_type, resource_id, details, actor, ip_address, created_at)| {
                AuditLogEntry {
                    id,
                    action,
                    resource_type,
                    resource_id,
                    details: details.unwrap_or(serde_json::Value::Null),
                    actor,
                    ip_address,
                    created_at,
                }
            },
        )
        .collect())
}

// ── Organizations ───────────────────────────────────────────────────

/// Fetch the default organization, creating it on first use.
pub async fn ensure_default_org(pool: &PgPool) -> sqlx::Result<String> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM organizations LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }
    let id = ids::org_id();
    sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, 'Default')")
        .bind(&id)
        .execute(pool)
        .await?;
    Ok(id)
}
