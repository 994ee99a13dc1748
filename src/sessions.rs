// Session/Auth gate
// Server-side sessions in SQLite: key = token, value = user id, fixed TTL.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

/// Sessions live this long from creation; there is no sliding renewal.
pub const SESSION_TTL_DAYS: i64 = 30;

/// An authenticated account. Only what handlers need to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn create_user(conn: &Connection, username: &str, password: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
        params![username, hash_password(password)],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Check credentials. A mismatch is `None`, not an error; the web layer
/// reports it as a plain rejection message.
pub fn verify_login(conn: &Connection, username: &str, password: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username FROM users WHERE username = ?1 AND password_hash = ?2",
            params![username, hash_password(password)],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(user)
}

/// Open a session for a user and return its token.
pub fn create_session(conn: &Connection, user_id: i64) -> Result<String> {
    let token = uuid::Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);

    conn.execute(
        "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, expires_at.to_rfc3339()],
    )?;

    Ok(token)
}

/// Resolve a session token to its user. Unknown or expired tokens resolve
/// to `None`; callers redirect to login rather than erring.
pub fn session_user(conn: &Connection, token: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT u.id, u.username, s.expires_at
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            params![token],
            |row| {
                let expires_at: String = row.get(2)?;
                Ok((
                    User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                    },
                    expires_at,
                ))
            },
        )
        .optional()?;

    let Some((user, expires_at)) = row else {
        return Ok(None);
    };

    let expires_at = DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc);
    if expires_at <= Utc::now() {
        return Ok(None);
    }

    Ok(Some(user))
}

pub fn destroy_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop expired session rows. Returns how many were removed.
pub fn purge_expired(conn: &Connection) -> Result<usize> {
    let purged = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![Utc::now().to_rfc3339()],
    )?;

    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_login_roundtrip() {
        let conn = test_conn();
        create_user(&conn, "farmacia", "secreto").unwrap();

        let user = verify_login(&conn, "farmacia", "secreto").unwrap();
        assert_eq!(user.unwrap().username, "farmacia");

        assert!(verify_login(&conn, "farmacia", "wrong").unwrap().is_none());
        assert!(verify_login(&conn, "nobody", "secreto").unwrap().is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let conn = test_conn();
        let user_id = create_user(&conn, "farmacia", "secreto").unwrap();

        let token = create_session(&conn, user_id).unwrap();
        let user = session_user(&conn, &token).unwrap().unwrap();
        assert_eq!(user.id, user_id);

        destroy_session(&conn, &token).unwrap();
        assert!(session_user(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn test_unknown_token_is_none() {
        let conn = test_conn();
        assert!(session_user(&conn, "not-a-token").unwrap().is_none());
    }

    #[test]
    fn test_expired_sessions_rejected_and_purged() {
        let conn = test_conn();
        let user_id = create_user(&conn, "farmacia", "secreto").unwrap();

        // Insert a session that expired an hour ago.
        let expired_at = (Utc::now() - Duration::hours(1)).to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params!["stale-token", user_id, expired_at],
        )
        .unwrap();

        assert!(session_user(&conn, "stale-token").unwrap().is_none());
        assert_eq!(purge_expired(&conn).unwrap(), 1);
    }

    #[test]
    fn test_password_never_stored_verbatim() {
        let conn = test_conn();
        create_user(&conn, "farmacia", "secreto").unwrap();

        let stored: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = 'farmacia'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_ne!(stored, "secreto");
        assert_eq!(stored.len(), 64);
    }
}
