//! Template record encoding and decoding
//!
//! A record is a template number followed by zero or more fields, separated
//! by commas. Fields are stored unescaped and escaped when the record is
//! rendered with [`fmt::Display`].

use std::fmt;

use crate::error::ProtocolError;
use crate::escape::escape;
use crate::template::{OperationStatus, Template};

/// A single template record line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Template number
    code: u16,
    /// Unescaped field values
    fields: Vec<String>,
}

impl Record {
    /// Create a record with no fields
    pub fn new(template: Template) -> Self {
        Self {
            code: template.as_u16(),
            fields: Vec::new(),
        }
    }

    /// Append a field (stored raw, escaped on rendering)
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Append several fields
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Operation status update: `<501|502|503>,<type>[,<text>]`
    pub fn operation_status(
        status: OperationStatus,
        operation_type: &str,
        text: Option<&str>,
    ) -> Self {
        let record = Self::new(status.template()).with_field(operation_type);
        match text {
            Some(text) => record.with_field(text),
            None => record,
        }
    }

    /// Numeric template code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Known template, if the code is one the agent understands
    pub fn template(&self) -> Option<Template> {
        Template::from_u16(self.code)
    }

    /// Unescaped fields after the template code
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Parse a record line, honoring quoted fields
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::EmptyRecord);
        }

        let mut parts = split_fields(line)?.into_iter();
        let head = parts.next().unwrap_or_default();
        let code = head
            .trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::InvalidTemplate(head.clone()))?;

        Ok(Self {
            code,
            fields: parts.collect(),
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        for field in &self.fields {
            write!(f, ",{}", escape(field))?;
        }
        Ok(())
    }
}

/// Split a record line into unescaped fields
fn split_fields(line: &str) -> Result<Vec<String>, ProtocolError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }

        match c {
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            ',' => {
                fields.push(std::mem::take(&mut current));
                at_field_start = true;
            }
            _ => {
                current.push(c);
                at_field_start = false;
            }
        }
    }

    if in_quotes {
        return Err(ProtocolError::UnterminatedQuote);
    }
    fields.push(current);
    Ok(fields)
}
