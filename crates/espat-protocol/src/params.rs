//! Parameter tokenizer for `AT+CMD=<params>` argument lists
//!
//! ESP-AT argument lists are comma separated. String arguments are wrapped in
//! double quotes and may themselves contain commas, so a quoted section is
//! treated as one atomic token. Inside quotes a backslash escapes the next
//! character (`\"`, `\,`, `\\`), matching the firmware's SSID handling.
//! Whitespace outside quotes is ignored.

use crate::error::ParseError;

/// A single argument from a command's parameter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Argument text with quotes and escapes removed
    pub value: String,
    /// Whether the argument was written as a quoted string
    pub quoted: bool,
}

impl Param {
    /// Create an unquoted parameter
    pub fn bare(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: false,
        }
    }

    /// Create a quoted parameter
    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: true,
        }
    }

    /// Parse this parameter as an unsigned integer
    ///
    /// Quoted values are rejected; numbers are always written bare.
    pub fn as_number(&self, name: &'static str) -> Result<u64, ParseError> {
        if self.quoted || self.value.is_empty() || !self.value.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ParseError::InvalidParameter {
                name,
                value: self.value.clone(),
            });
        }
        self.value.parse().map_err(|_| ParseError::InvalidParameter {
            name,
            value: self.value.clone(),
        })
    }

    /// Parse this parameter as an integer constrained to `min..=max`
    pub fn as_ranged(&self, name: &'static str, min: u64, max: u64) -> Result<u64, ParseError> {
        let value = self.as_number(name)?;
        if value < min || value > max {
            return Err(ParseError::OutOfRange {
                name,
                value: value.min(i64::MAX as u64) as i64,
            });
        }
        Ok(value)
    }

    /// Return the value of a parameter that must have been quoted
    pub fn as_quoted(&self, name: &'static str) -> Result<&str, ParseError> {
        if !self.quoted {
            return Err(ParseError::InvalidParameter {
                name,
                value: self.value.clone(),
            });
        }
        Ok(&self.value)
    }

    /// True if the parameter looks like a bare decimal number
    pub fn is_numeric(&self) -> bool {
        !self.quoted && !self.value.is_empty() && self.value.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Split an argument list into parameters
///
/// An empty input yields no parameters. Empty bare fields (`1,,2`) are kept
/// as empty values so that the caller can reject them.
pub fn split_params(input: &str) -> Result<Vec<Param>, ParseError> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    if input.trim().is_empty() {
        return Ok(params);
    }

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(ParseError::UnterminatedQuote);
            }
            params.push(Param::quoted(value));

            // Anything between the closing quote and the next comma is ignored
            while chars.next_if(|c| *c != ',').is_some() {}
        } else {
            let mut value = String::new();
            while let Some(c) = chars.next_if(|c| *c != ',') {
                if !c.is_whitespace() {
                    value.push(c);
                }
            }
            params.push(Param::bare(value));
        }

        if chars.next_if_eq(&',').is_none() {
            break;
        }
    }

    Ok(params)
}
