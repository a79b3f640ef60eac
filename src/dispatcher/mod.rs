//! Delivery of scheduled WhatsApp messages

mod postgres;
mod store;
mod worker;

pub use postgres::PgDispatchStore;
pub use store::{DispatchStore, Recipient};
pub use worker::{DispatchSettings, Dispatcher, TickSummary};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Digits only; a bare 10-digit number gets the country code. Shorter numbers are unusable.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("{}{}", country_code, digits)),
        11..=15 => Some(digits),
        _ => None,
    }
}
