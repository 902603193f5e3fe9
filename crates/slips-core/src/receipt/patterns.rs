//! Regex patterns for receipt naming.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Canonical name: {merchant}_{YYYY-MM-DD}_{amount}zar, ASCII digits only
    pub static ref CANONICAL_NAME: Regex = Regex::new(
        r"^[a-z0-9]+(-[a-z0-9]+)*_[0-9]{4}-[0-9]{2}-[0-9]{2}_[0-9]+\.[0-9]{2}zar$"
    ).unwrap();

    // Runs of characters that cannot appear in a merchant slug
    pub static ref SLUG_SEPARATOR: Regex = Regex::new(r"[^a-z0-9]+").unwrap();

    // Apostrophes are dropped rather than turned into separators ("Nando's" -> "nandos")
    pub static ref APOSTROPHES: Regex = Regex::new(r"['\u{2019}`]").unwrap();
}
