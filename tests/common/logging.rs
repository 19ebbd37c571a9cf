use std::{io, sync::Once, thread};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use lattice_rs::types::data_types::Account;
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that prints every message at `level` and above, tagged with the thread it came from.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

// Log a test step, prefixed with a short form of the account it concerns, if any.
pub(crate) fn log_with_context(account: Option<&Account>, message: &str) {
    match account {
        Some(account) => log::debug!("[{}] {}", short_account(account), message),
        None => log::debug!("[Test] {}", message),
    }
}

// The first seven base64 characters of `account`, which is enough to tell the accounts in one test apart.
pub(crate) fn short_account(account: &Account) -> String {
    let encoded = STANDARD_NO_PAD.encode(account.bytes());
    encoded[0..7].to_string()
}
