use std::{
    env::{self, VarError},
    fmt::Display,
    str::FromStr,
    time::Duration,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::{info, instrument, warn};
use url::Url;

/// # Errors
/// Will return [`Err`] if the connection to the database fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?db_connection_options, "Connecting to database");
    set_db_conn(Database::connect(db_connection_options).await?);

    info!("Container initialized");
    Ok(container)
}

/// Closes the pool shared by every request.
/// Any request still holding the connection afterwards fails as storage unavailable.
///
/// # Errors
/// Will return [`Err`] if the database reports an error while closing.
#[instrument(skip(container))]
pub async fn shutdown_container(container: &Container) -> anyhow::Result<()> {
    info!("Closing database connection");
    container.read(db_conn_capsule).close().await?;
    info!("Database connection closed");
    Ok(())
}

/// # Panics
/// Panics when `DB_URL` is not set, or when any pool setting is invalid.
#[must_use]
pub fn db_connection_options_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> ConnectOptions {
    let timeout = *get.as_ref(storage_timeout_capsule);
    let max_connections = *get.as_ref(db_max_connections_capsule);

    let mut options = ConnectOptions::new(required_env_var("DB_URL"));
    options
        .max_connections(max_connections)
        .connect_timeout(timeout)
        .acquire_timeout(timeout);
    options
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    env_var_or("ADDR", "127.0.0.1:3000")
}

/// Base URL that short tokens are appended to, always ending in `/`.
///
/// # Panics
/// Panics when environment variable is not a valid absolute URL.
pub fn public_base_url_capsule(_: CapsuleHandle) -> Url {
    with_trailing_slash(parse_env_value(
        "PUBLIC_BASE_URL",
        &env_var_or("PUBLIC_BASE_URL", "http://localhost:3000/"),
    ))
}

/// Upper bound on every call to the database.
///
/// # Panics
/// Panics when environment variable is not a whole number of milliseconds.
pub fn storage_timeout_capsule(_: CapsuleHandle) -> Duration {
    Duration::from_millis(parse_env_value(
        "STORAGE_TIMEOUT_MS",
        &env_var_or("STORAGE_TIMEOUT_MS", "5000"),
    ))
}

/// # Panics
/// Panics when environment variable is not a positive integer.
pub fn db_max_connections_capsule(_: CapsuleHandle) -> u32 {
    parse_env_value(
        "DB_MAX_CONNECTIONS",
        &env_var_or("DB_MAX_CONNECTIONS", "10"),
    )
}

fn required_env_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|err| match err {
        VarError::NotPresent => panic!("{name} is not set"),
        VarError::NotUnicode(actual) => {
            panic!("{name} is invalid unicode: {}", actual.display());
        }
    })
}

fn env_var_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) => {
            info!(value, "{name} environment variable set");
            value
        }
        Err(VarError::NotPresent) => {
            warn!(
                value = default,
                "{name} environment variable not set; defaulting to {default}"
            );
            default.to_owned()
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{name} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}

fn parse_env_value<T>(name: &str, raw: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .unwrap_or_else(|err| panic!("{name} environment variable {raw:?} is invalid: {err}"))
}

// NOTE: Url::join replaces the last path segment unless the base ends in `/`
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
