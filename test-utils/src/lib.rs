//! `test-utils` is used for testing in both `choke-lib` and `choke`.
//! This crate does not depend on `choke-lib` or `choke`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Build a valid `CapacityPolicy`.
///
/// With a single argument, bursting is disabled.
#[macro_export]
macro_rules! policy {
    ($limit:expr) => {
        CapacityPolicy::new($limit, 0, 0, 0).expect("Expected valid capacity policy")
    };
    ($limit:expr, $burst:expr, $grace:expr, $flap:expr $(,)?) => {
        CapacityPolicy::new($limit, $burst, $grace, $flap).expect("Expected valid capacity policy")
    };
}

/// Build a `Registry` from `name => policy` pairs, in order
#[macro_export]
macro_rules! registry {
    ($($name:expr => $policy:expr),* $(,)?) => {{
        let mut registry = Registry::new();
        $(
            registry.register($name, $policy);
        )*
        registry
    }};
}

/// Create a throw-away directory for a ledger region and its lock file
#[macro_export]
macro_rules! ledger_dir {
    () => {
        tempfile::tempdir().expect("Expected temporary ledger directory")
    };
}

/// Ledger identity inside a directory created by [`ledger_dir!`]
#[macro_export]
macro_rules! identity {
    ($dir:expr) => {
        LedgerIdentity::in_dir($dir.path(), std::process::id())
    };
}

/// Write `contents` to a temporary `.toml` file and return its handle
#[macro_export]
macro_rules! config_file {
    ($contents:expr) => {{
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Expected temporary config file");
        file.write_all($contents.as_bytes())
            .expect("Expected config file to be writable");
        file
    }};
}
