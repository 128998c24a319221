use std::fmt;

pub type CseResult<T> = Result<T, PassError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    E0001, // Malformed descriptor line
    E0002, // Unknown operator or type
    E0003, // Unresolved block or local reference
    E2001, // IR verification failure
}

impl ErrCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E0001 => "E0001",
            Self::E0002 => "E0002",
            Self::E0003 => "E0003",
            Self::E2001 => "E2001",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassError {
    pub code: ErrCode,
    pub stage: Stage,
    pub message: String,
    pub line: Option<usize>,
}

impl PassError {
    pub fn new(code: ErrCode, stage: Stage, msg: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: msg.into(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.as_str(),
            self.stage.as_str(),
            self.message
        )?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for PassError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_code_and_line() {
        let e = PassError::new(ErrCode::E0001, Stage::Parse, "bad token").with_line(7);
        let s = e.to_string();
        assert!(s.contains("E0001"), "missing code in {s}");
        assert!(s.contains("parse"), "missing stage in {s}");
        assert!(s.contains("bad token"), "missing message in {s}");
        assert!(s.contains("line 7"), "missing line in {s}");
    }
}
