//! Configuration loading for kiln.
//!
//! Settings are layered with `figment`, lowest precedence first:
//!
//! 1. built-in defaults (an SQLite database named `app`),
//! 2. a TOML file, either given explicitly or `kiln.toml` in the user's
//!    configuration directory,
//! 3. `DB_`-prefixed environment variables (`DB_TYPE`, `DB_NAME`, `DB_DSN`,
//!    `DB_USER`, `DB_PASSWORD`).
//!
//! ```toml
//! [database]
//! type = "postgres"
//! name = "shop"
//! dsn = "localhost:5432"
//! user = "shop"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use kiln_orm::{Core, Database, Dialect};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

pub const CONFIG_FILE: &str = "kiln.toml";
pub const ENV_PREFIX: &str = "DB_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
}

/// The default database, as named by `DB_TYPE`, `DB_NAME` and `DB_DSN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite`, `postgres`, `cockroach`, `mysql` or `maria`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Database name, or the SQLite file name base. Also the name the
    /// database is registered under.
    pub name: String,
    /// SQLite: a file name. PostgreSQL family: `host:port`. MySQL family:
    /// `user:pass@host:port` or `user:pass@tcp(host:port)`.
    pub dsn: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: Dialect::Sqlite.to_string(),
            name: "app".to_string(),
            dsn: String::new(),
            user: None,
            password: None,
        }
    }
}

impl Config {
    /// `kiln.toml` in the platform configuration directory.
    pub fn default_file() -> Option<PathBuf> {
        ProjectDirs::from("", "", "kiln").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// The provider stack, without extracting anything.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file.map(Path::to_path_buf).or_else(Self::default_file) {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).map(|key| format!("database.{key}").into()))
    }

    /// Load from the defaults, `file` (which must exist when given) and the
    /// environment.
    #[instrument]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(file) = file
            && !file.is_file()
        {
            tracing::error!(path = %file.display(), "Configuration file not found");
            exn::bail!(ErrorKind::Load);
        }
        Self::extract(&Self::figment(file))
    }

    pub fn extract(figment: &Figment) -> Result<Self> {
        figment.extract().or_raise(|| ErrorKind::Load)
    }
}

impl DatabaseConfig {
    pub fn dialect(&self) -> Result<Dialect> {
        self.kind.parse::<Dialect>().or_raise(|| ErrorKind::UnknownDialect(self.kind.clone()))
    }

    /// The `sqlx` connection URL this configuration describes.
    pub fn connection_url(&self) -> Result<String> {
        let dsn = self.dsn.trim();
        let malformed = || ErrorKind::MalformedDsn(dsn.to_string());
        match self.dialect()? {
            Dialect::Sqlite => {
                let file = if dsn.is_empty() { format!("{}.sqlite", self.name) } else { dsn.to_string() };
                Ok(format!("sqlite://{file}?mode=rwc"))
            },
            Dialect::Postgres | Dialect::Cockroach => {
                let address = host_port(dsn).ok_or_raise(malformed)?;
                let credentials = match (&self.user, &self.password) {
                    (Some(user), Some(password)) => format!("{user}:{password}@"),
                    (Some(user), None) => format!("{user}@"),
                    (None, _) => String::new(),
                };
                Ok(format!("postgres://{credentials}{address}/{}", self.name))
            },
            Dialect::MySql | Dialect::Maria => {
                let (credentials, address) = dsn
                    .rsplit_once('@')
                    .filter(|(credentials, _)| !credentials.is_empty())
                    .ok_or_raise(malformed)?;
                let address = address
                    .strip_prefix("tcp(")
                    .and_then(|inner| inner.strip_suffix(')'))
                    .unwrap_or(address);
                let address = host_port(address).ok_or_raise(malformed)?;
                Ok(format!("mysql://{credentials}@{address}/{}", self.name))
            },
        }
    }

    /// Connect and register this database on `core` under [`Self::name`].
    #[instrument(skip_all, fields(database = %self.name, kind = %self.kind))]
    pub async fn register(&self, core: &Core) -> Result<Arc<Database>> {
        let dialect = self.dialect()?;
        let url = self.connection_url()?;
        let database = core
            .connect(&self.name, dialect, &url)
            .await
            .or_raise(|| ErrorKind::Connect)?;
        tracing::info!("Registered database");
        Ok(database)
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn host_port(input: &str) -> Option<&str> {
    let (host, port) = input.split_once(':')?;
    let valid = !host.is_empty() && !host.contains(['/', '@', ' ', '(', ')']) && port.parse::<u16>().is_ok();
    valid.then_some(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn database(kind: &str, dsn: &str) -> DatabaseConfig {
        DatabaseConfig {
            kind: kind.to_string(),
            name: "shop".to_string(),
            dsn: dsn.to_string(),
            ..DatabaseConfig::default()
        }
    }

    #[rstest]
    #[case("sqlite", "", "sqlite://shop.sqlite?mode=rwc")]
    #[case("sqlite", "data/test.sqlite", "sqlite://data/test.sqlite?mode=rwc")]
    #[case("postgres", "localhost:5432", "postgres://localhost:5432/shop")]
    #[case("cockroach", "crdb:26257", "postgres://crdb:26257/shop")]
    #[case("mysql", "root:secret@db:3306", "mysql://root:secret@db:3306/shop")]
    #[case("maria", "root:secret@tcp(db:3306)", "mysql://root:secret@db:3306/shop")]
    fn test_connection_url(#[case] kind: &str, #[case] dsn: &str, #[case] expected: &str) {
        assert_eq!(database(kind, dsn).connection_url().unwrap(), expected);
    }

    #[rstest]
    #[case("postgres", "")]
    #[case("postgres", "localhost")]
    #[case("postgres", "localhost:port")]
    #[case("mysql", "db:3306")]
    #[case("mysql", "@db:3306")]
    #[case("maria", "root:secret@tcp(db)")]
    fn test_malformed_dsn(#[case] kind: &str, #[case] dsn: &str) {
        let err = database(kind, dsn).connection_url().unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedDsn(_)));
    }

    #[test]
    fn test_unknown_dialect() {
        let err = database("oracle", "").connection_url().unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownDialect("oracle".to_string()));
    }

    #[test]
    fn test_postgres_credentials() {
        let config = DatabaseConfig {
            user: Some("ops".to_string()),
            password: Some("pw".to_string()),
            ..database("postgres", "db:5432")
        };
        assert_eq!(config.connection_url().unwrap(), "postgres://ops:pw@db:5432/shop");
    }

    #[test]
    fn test_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "kiln.toml",
                "[database]\ntype = \"postgres\"\nname = \"shop\"\ndsn = \"db:5432\"\n",
            )?;
            jail.set_env("DB_NAME", "audit");
            jail.set_env("DB_USER", "ops");

            let config = Config::load(Some(Path::new("kiln.toml"))).unwrap();
            assert_eq!(config.database.kind, "postgres");
            assert_eq!(config.database.name, "audit");
            assert_eq!(config.database.dsn, "db:5432");
            assert_eq!(config.database.user.as_deref(), Some("ops"));
            assert_eq!(config.database.connection_url().unwrap(), "postgres://ops@db:5432/audit");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here/kiln.toml"))).unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }

    #[test]
    fn test_defaults() {
        let config = Config::extract(&Figment::from(Serialized::defaults(Config::default()))).unwrap();
        assert_eq!(config.database.kind, "sqlite");
        assert_eq!(config.database.connection_url().unwrap(), "sqlite://app.sqlite?mode=rwc");
    }

    #[tokio::test]
    async fn test_register_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            dsn: dir.path().join("app.sqlite").display().to_string(),
            ..DatabaseConfig::default()
        };
        let core = Core::new();
        let registered = config.register(&core).await.unwrap();
        assert_eq!(registered.name(), "app");
        assert_eq!(registered.dialect(), Dialect::Sqlite);
        assert_eq!(core.list_databases(), vec!["app"]);

        let err = config.register(&core).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Connect);
    }
}
