use std::fmt::Write as _;

use crate::frontend::lexer::LexerError;

/// Broad class of a compile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Overflow,
    OutOfMemory,
    /// The compiler broke one of its own invariants.
    Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// The expression could not be extended at `offset`.
    #[error("{message}")]
    Syntax { offset: usize, message: String },

    /// A configured bound would be exceeded.
    #[error("Overflow Error: {what} exceeds the limit of {limit}")]
    Overflow {
        offset: usize,
        what: &'static str,
        limit: usize,
    },

    #[error("Out of memory while compiling expression")]
    OutOfMemory { offset: usize },

    #[error("Internal error: {message}")]
    Internal { offset: usize, message: String },
}

impl CompileError {
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub fn internal(offset: usize, message: impl Into<String>) -> Self {
        CompileError::Internal {
            offset,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Syntax { .. } => ErrorKind::Syntax,
            CompileError::Overflow { .. } => ErrorKind::Overflow,
            CompileError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            CompileError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Byte offset into the compiled text.
    pub fn offset(&self) -> usize {
        match self {
            CompileError::Syntax { offset, .. }
            | CompileError::Overflow { offset, .. }
            | CompileError::OutOfMemory { offset }
            | CompileError::Internal { offset, .. } => *offset,
        }
    }

    /// Moves the offset into the frame of an enclosing text that embeds this
    /// expression at `by`.
    pub fn rebase(mut self, by: usize) -> Self {
        match &mut self {
            CompileError::Syntax { offset, .. }
            | CompileError::Overflow { offset, .. }
            | CompileError::OutOfMemory { offset }
            | CompileError::Internal { offset, .. } => *offset += by,
        }
        self
    }

    /// The offending source line with a caret under the error position,
    /// followed by the message.
    pub fn render(&self, source: &str) -> String {
        let mut offset = self.offset().min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[offset..]
            .find('\n')
            .map_or(source.len(), |i| offset + i);
        let column = source[line_start..offset].chars().count();

        let mut out = String::new();
        let _ = writeln!(out, "  {}", &source[line_start..line_end]);
        let _ = writeln!(out, "  {}^", " ".repeat(column));
        let _ = write!(out, "{}", self);
        out
    }
}

impl From<LexerError> for CompileError {
    fn from(e: LexerError) -> Self {
        match e {
            LexerError::Syntax { offset, message } => CompileError::Syntax { offset, message },
            LexerError::Overflow {
                offset,
                what,
                limit,
            } => CompileError::Overflow {
                offset,
                what,
                limit,
            },
            LexerError::OutOfMemory { offset } => CompileError::OutOfMemory { offset },
        }
    }
}
