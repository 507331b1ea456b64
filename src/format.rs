//! Message format templates.
//!
//! A channel declares a request format and a reply format when it is
//! acquired. A template is plain text with printf-style conversions; only
//! the string conversion is understood:
//!
//! ```text
//! %s   one string field
//! %%   a literal percent sign
//! ```

use std::fmt;

/// A validated format template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgFormat {
    template: String,
    fields: usize,
}

impl MsgFormat {
    /// Parse and validate a template.
    pub fn parse(template: &str) -> Result<Self, FormatError> {
        let mut fields = 0;
        let mut chars = template.char_indices();

        while let Some((pos, c)) = chars.next() {
            if c != '%' {
                continue;
            }
            match chars.next() {
                Some((_, 's')) => fields += 1,
                Some((_, '%')) => {}
                Some((_, other)) => {
                    return Err(FormatError::Unsupported {
                        conversion: other,
                        position: pos,
                    })
                }
                None => return Err(FormatError::Dangling),
            }
        }

        Ok(Self {
            template: template.to_string(),
            fields,
        })
    }

    /// Number of `%s` fields in the template.
    pub fn field_count(&self) -> usize {
        self.fields
    }
}

impl fmt::Display for MsgFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Format template errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A conversion other than `%s` or `%%`.
    Unsupported { conversion: char, position: usize },
    /// The template ends with a lone `%`.
    Dangling,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Unsupported {
                conversion,
                position,
            } => write!(
                f,
                "unsupported conversion '%{conversion}' at offset {position}"
            ),
            FormatError::Dangling => write!(f, "template ends with a lone '%'"),
        }
    }
}

impl std::error::Error for FormatError {}
