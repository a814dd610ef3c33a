use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

const TEMPLATE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("The {what} list is empty.")]
    EmptyList { what: &'static str },

    #[error("Entry {index} of the {what} list '{list}' is empty.")]
    EmptyEntry {
        what: &'static str,
        index: usize,
        list: String,
    },

    #[error("Invalid date '{0}'. Expected YYYY-MM-DD (e.g., '2021-11-03').")]
    InvalidDate(String),

    #[error("Invalid --set format: '{0}'. Expected KEY=VALUE.")]
    InvalidKeyValue(String),
}

/// Splits a comma-separated list of paths, e.g. `a.pkl.gz,b.pkl.gz`.
///
/// Surrounding whitespace is ignored; an empty entry in the middle of the list is an error
/// because it would shift the positional pairing of bundles and structures.
pub fn parse_path_list(list: &str, what: &'static str) -> Result<Vec<PathBuf>, ParseError> {
    let list = list.trim();
    if list.is_empty() {
        return Err(ParseError::EmptyList { what });
    }
    list.split(',')
        .enumerate()
        .map(|(i, entry)| {
            let entry = entry.trim();
            if entry.is_empty() {
                Err(ParseError::EmptyEntry {
                    what,
                    index: i + 1,
                    list: list.to_string(),
                })
            } else {
                Ok(PathBuf::from(entry))
            }
        })
        .collect()
}

pub fn parse_template_date(value: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(value.trim(), TEMPLATE_DATE_FORMAT)
        .map_err(|_| ParseError::InvalidDate(value.to_string()))
}

pub fn format_template_date(date: NaiveDate) -> String {
    date.format(TEMPLATE_DATE_FORMAT).to_string()
}

pub fn split_key_value(pair: &str) -> Result<(&str, &str), ParseError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(ParseError::InvalidKeyValue(pair.to_string())),
    }
}
