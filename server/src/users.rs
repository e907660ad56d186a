//! User verification.
//!
//! The reactor is generic over [`UserStore`] so the database never leaks
//! into the connection engine: workers call `verify` synchronously during
//! POST handling and tests substitute a fixed-outcome store.

use crate::config::DatabaseConfig;
use mysql::prelude::Queryable;

/// Synchronous account verification, callable from any worker thread.
pub trait UserStore: Send + Sync + 'static {
    /// Check a login, or register a new account.
    ///
    /// Login: true iff the username exists and the password matches.
    /// Register: true iff the username was free and the row was inserted.
    fn verify(&self, name: &str, password: &str, is_login: bool) -> bool;
}

/// MySQL-backed store. The pool tolerates one connection per concurrent
/// worker.
pub struct MysqlUserStore {
    pool: mysql::Pool,
}

impl MysqlUserStore {
    /// Connect a pool sized from the configuration.
    pub fn connect(config: &DatabaseConfig) -> Result<MysqlUserStore, mysql::Error> {
        let constraints = mysql::PoolConstraints::new(1, config.pool_size.max(1))
            .unwrap_or_default();
        let pool_opts = mysql::PoolOpts::new().with_constraints(constraints);
        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.name.clone()))
            .pool_opts(pool_opts);
        let pool = mysql::Pool::new(opts)?;
        Ok(MysqlUserStore { pool })
    }
}

impl UserStore for MysqlUserStore {
    fn verify(&self, name: &str, password: &str, is_login: bool) -> bool {
        let mut conn = match self.pool.get_conn() {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(%err, "account database unavailable");
                return false;
            }
        };

        let stored: Option<String> = match conn.exec_first(
            "SELECT password FROM user WHERE username = ? LIMIT 1",
            (name,),
        ) {
            Ok(row) => row,
            Err(err) => {
                tracing::error!(%err, "account lookup failed");
                return false;
            }
        };

        match (stored, is_login) {
            (Some(stored), true) => {
                let ok = stored == password;
                if !ok {
                    tracing::debug!(user = name, "password mismatch");
                }
                ok
            }
            (None, true) => false,
            // Register: the name is taken.
            (Some(_), false) => false,
            (None, false) => conn
                .exec_drop(
                    "INSERT INTO user(username, password) VALUES (?, ?)",
                    (name, password),
                )
                .inspect_err(|err| tracing::error!(%err, "account insert failed"))
                .is_ok(),
        }
    }
}

/// Store with a fixed outcome; used in tests and when the database is
/// disabled.
pub struct FixedUserStore {
    outcome: bool,
}

impl FixedUserStore {
    pub fn new(outcome: bool) -> FixedUserStore {
        FixedUserStore { outcome }
    }
}

impl UserStore for FixedUserStore {
    fn verify(&self, _name: &str, _password: &str, _is_login: bool) -> bool {
        self.outcome
    }
}
