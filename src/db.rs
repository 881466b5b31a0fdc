use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Build, Rocket};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::migrate::Migrator;
use std::path::Path;
use std::str::FromStr;
use log::{error, info};

// macro to encode/decode some type as SQL text via Display/FromStr
#[macro_export]
macro_rules! impl_sqlx_text_type_encode_decode {
    ($type:ident) => {
        impl<DB: sqlx::Database> sqlx::Type<DB> for $type
        where str: sqlx::Type<DB>
        {
            fn type_info() -> <DB as sqlx::Database>::TypeInfo {
                // TEXT columns only
                <&str as sqlx::Type<DB>>::type_info()
            }
        }

        impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for $type
        where &'r str: sqlx::Decode<'r, DB>
        {
            fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let value = <&str as sqlx::Decode<DB>>::decode(value)?;
                let value = value.parse::<$type>().map_err(|e| e.to_string())?;
                Ok(value)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $type {
            fn encode_by_ref(&self, buf: &mut <sqlx::Sqlite as sqlx::Database>::ArgumentBuffer<'q>) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <String as sqlx::Encode<'q, sqlx::Sqlite>>::encode(self.to_string(), buf)
            }
        }
    };
}

// macro to encode/decode some type as SQL JSON text
#[macro_export]
macro_rules! impl_sqlx_json_text_type_encode_decode {
    ($type:ident) => {
        impl<DB: sqlx::Database> sqlx::Type<DB> for $type
        where str: sqlx::Type<DB>
        {
            fn type_info() -> <DB as sqlx::Database>::TypeInfo {
                // TEXT columns only
                <&str as sqlx::Type<DB>>::type_info()
            }
        }

        impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for $type
        where &'r str: sqlx::Decode<'r, DB>
        {
            fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let value = <&str as sqlx::Decode<DB>>::decode(value)?;
                Ok(serde_json::from_str::<$type>(value)?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $type {
            fn encode_by_ref(&self, buf: &mut <sqlx::Sqlite as sqlx::Database>::ArgumentBuffer<'q>) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                let json = serde_json::to_string(self)?;
                <String as sqlx::Encode<'q, sqlx::Sqlite>>::encode(json, buf)
            }
        }
    };
}

static MIGRATOR: Migrator = sqlx::migrate!("db/migrations");

pub struct DbPool(pub SqlitePool);

pub struct DbPoolFairing();
#[rocket::async_trait]
impl Fairing for DbPoolFairing {
    fn info(&self) -> Info {
        Info {
            name: "SQLite Studio Database Pool with Migrations",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let database_url = if cfg!(test) {
            "sqlite::memory:".to_string()
        } else {
            let figment = rocket.figment();
            let Ok(database_url) = figment.extract_inner::<String>("database_url") else {
                error!("Studio database_url is not configured");
                return Err(rocket);
            };
            if database_url.starts_with("sqlite://") {
                let db_path = database_url.trim_start_matches("sqlite://");
                if !Path::new(db_path).exists() {
                    info!("Creating studio database: {db_path}");
                    if let Err(err) = std::fs::File::create(db_path) {
                        error!("Cannot create studio database file {db_path}: {err}");
                        return Err(rocket);
                    }
                }
            }
            database_url
        };

        info!("Opening database: {database_url}");
        let opts = match SqliteConnectOptions::from_str(&database_url) {
            Ok(opts) => opts.journal_mode(SqliteJournalMode::Wal),
            Err(err) => {
                error!("Invalid database url {database_url}: {err}");
                return Err(rocket);
            }
        };
        // every connection to sqlite::memory: is a separate database
        let pool_options = if cfg!(test) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = match pool_options.connect_with(opts).await {
            Ok(pool) => pool,
            Err(err) => {
                error!("Database connection error: {:?}", err);
                return Err(rocket);
            }
        };

        match MIGRATOR.run(&pool).await {
            Ok(_) => info!("Migrations applied successfully!"),
            Err(err) => {
                error!("Migration error: {:?}", err);
                return Err(rocket);
            }
        };

        Ok(rocket.manage(DbPool(pool)))
    }
}

/// Fresh migrated in-memory pool for unit tests that bypass Rocket.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:").expect("valid sqlite url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("in-memory pool");
    MIGRATOR.run(&pool).await.expect("migrations");
    pool
}
